//! The threaded code stream executed by the engine.
//!
//! A function body is a flat sequence of 64-bit words. The first word of
//! every instruction is an opcode word ([`Op`] as `u64`); the following
//! words are that instruction's immediates. Branch targets are absolute
//! word indices into the code array, so taking a branch is a single
//! assignment to `pc`.
//!
//! The compiler that lowers validated Wasm into this stream is an external
//! collaborator; [`CodeWriter`] is the emission interface it (and the test
//! suite) uses. The layout contract per instruction is documented on the
//! [`Op`] variants.
//!
//! # Differences from the Wasm instruction set
//!
//! - Control flow is flattened to plain gotos; `end` and `return` carry the
//!   result count and copy results into the frame base before unwinding.
//! - Every function body starts with `entry`, which installs the stack
//!   pointer and zeroes the declared locals.
//! - `local.*` and the slot-shuffling ops address slots relative to the
//!   frame pointer.
//! - Calls carry a `frame_offset` immediate placing the callee frame; tail
//!   calls carry the parameter count instead and reuse the current frame.

use wasm5_core::UntypedValue;

macro_rules! define_ops {
    (
        $( $(#[$attr:meta])* $name:ident, )*
    ) => {
        /// An opcode word of the threaded code stream.
        ///
        /// The discriminant is the word written into the code array. In the
        /// C lineage of this engine the word is the handler's address;
        /// opcode indices dispatched through one `match` keep the
        /// one-branch-per-instruction property without baking function
        /// pointers into data.
        #[repr(u64)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq)]
        pub enum Op {
            $( $(#[$attr])* $name, )*
        }

        impl Op {
            const COUNT: u64 = {
                let mut count = 0;
                $( let _ = Op::$name; count += 1; )*
                count
            };

            /// Decodes an opcode word read from the code stream.
            ///
            /// Returns `None` for words that are not opcodes, which only
            /// happens on malformed streams; see
            /// [`validate_word`](Self::validate_word).
            #[inline]
            pub fn from_word(word: u64) -> Option<Self> {
                if word < Self::COUNT {
                    // SAFETY: `Op` is `repr(u64)` with contiguous
                    // discriminants starting at zero, so every word below
                    // `COUNT` is a valid discriminant.
                    Some(unsafe { core::mem::transmute::<u64, Op>(word) })
                } else {
                    None
                }
            }

            /// Returns `true` if `word` is a plausible opcode word.
            ///
            /// Backs the `WASM5_VALIDATE_CODE` diagnostic mode; this is a
            /// loose sanity check for compiler bugs, not a validator.
            #[inline]
            pub fn validate_word(word: u64) -> bool {
                word < Self::COUNT
            }
        }
    };
}

define_ops! {
    /// Traps unconditionally.
    Unreachable,
    /// Does nothing.
    Nop,
    /// Pops one slot.
    Drop,
    /// Pops `cond`, `b`, `a`; pushes `a` if `cond != 0` else `b`.
    Select,
    /// `copy_slot src, dst` — copies the fp-relative slot `src` to `dst`.
    CopySlot,
    /// `set_sp slot` — sets `sp = fp + slot`.
    SetSp,
    /// `br target` — unconditional jump to the absolute word index.
    Br,
    /// `br_if taken, not_taken` — pops the condition, jumps either way.
    BrIf,
    /// `if else_target` — pops the condition, falls through when non-zero.
    If,
    /// `br_table num_labels, t0..tN` — pops the index; `N+1` targets, the
    /// last being the default for out-of-range indices.
    BrTable,
    /// `end num_results` — copies the top `num_results` slots to
    /// `fp[0..num_results)` and returns from the function.
    End,
    /// `return num_results` — same copy-and-unwind as `end`.
    Return,
    /// `func_exit num_results` — returns without copying; the compiler has
    /// already staged the results at `fp[0..num_results)`.
    FuncExit,
    /// `entry num_locals, first_local, num_zero` — first instruction of
    /// every function: sets `sp = fp + num_locals` and zeroes the
    /// uninitialized locals.
    Entry,
    /// `call code_idx, frame_offset` — local call; the callee frame starts
    /// at `fp + frame_offset` where the arguments already are.
    Call,
    /// `call_import import_idx, frame_offset` — host, linked or unresolved
    /// import call; args in and results out at `fp + frame_offset`.
    CallImport,
    /// `call_indirect type_idx, table_idx, frame_offset` — pops the element
    /// index, resolves and type-checks the table entry.
    CallIndirect,
    /// `call_ref type_idx, frame_offset` — pops a funcref and dispatches
    /// like `call_indirect` without the table lookup.
    CallRef,
    /// `return_call code_idx, num_params` — tail call reusing the frame.
    ReturnCall,
    /// `return_call_import import_idx, num_params`.
    ReturnCallImport,
    /// `return_call_indirect type_idx, table_idx, num_params`.
    ReturnCallIndirect,
    /// `return_call_ref type_idx, num_params`.
    ReturnCallRef,
    /// Pushes the immediate slot.
    I32Const,
    /// Pushes the immediate slot.
    I64Const,
    /// Pushes the immediate slot.
    F32Const,
    /// Pushes the immediate slot.
    F64Const,
    /// `local.get slot` — pushes `fp[slot]`.
    LocalGet,
    /// `local.set slot` — pops into `fp[slot]`.
    LocalSet,
    /// `local.tee slot` — copies the stack top into `fp[slot]`.
    LocalTee,
    /// `global.get idx` — pushes `globals[idx]`.
    GlobalGet,
    /// `global.set idx` — pops into `globals[idx]`.
    GlobalSet,
    I32Load,
    I64Load,
    F32Load,
    F64Load,
    I32Load8S,
    I32Load8U,
    I32Load16S,
    I32Load16U,
    I64Load8S,
    I64Load8U,
    I64Load16S,
    I64Load16U,
    I64Load32S,
    I64Load32U,
    I32Store,
    I64Store,
    F32Store,
    F64Store,
    I32Store8,
    I32Store16,
    I64Store8,
    I64Store16,
    I64Store32,
    MemorySize,
    MemoryGrow,
    MemoryCopy,
    MemoryFill,
    /// `memory.init data_idx` — pops `n`, `src`, `dest`.
    MemoryInit,
    /// `data.drop data_idx`.
    DataDrop,
    /// `table.get table_idx` — pops the element index, pushes the entry as
    /// a reference slot.
    TableGet,
    /// `table.set table_idx` — pops the value and the element index.
    TableSet,
    TableSize,
    /// `table.grow table_idx` — pops `delta` and the initializer, pushes
    /// the old size or −1.
    TableGrow,
    TableFill,
    /// `table.copy dst_table, src_table`.
    TableCopy,
    /// `table.init table_idx, elem_idx`.
    TableInit,
    /// `elem.drop elem_idx`.
    ElemDrop,
    /// Pushes the null reference.
    RefNull,
    /// `ref.func func_idx` — pushes the tagged funcref.
    RefFunc,
    RefIsNull,
    RefEq,
    RefAsNonNull,
    /// `br_on_null target` — pops and branches on null, otherwise keeps
    /// the reference on the stack.
    BrOnNull,
    /// `br_on_non_null target` — branches keeping the reference when it is
    /// non-null, pops it otherwise.
    BrOnNonNull,
    /// `array.new type_idx` — pops length and initializer, pushes the
    /// reference to the new managed array.
    ArrayNew,
    /// `array.new_default type_idx` — pops the length.
    ArrayNewDefault,
    /// `array.new_fixed type_idx, length` — pops `length` element values.
    ArrayNewFixed,
    /// Pops index and array reference, pushes the element.
    ArrayGet,
    /// Pops value, index and array reference.
    ArraySet,
    /// Pops an array reference, pushes its length.
    ArrayLen,
    /// `struct.new type_idx, field_count` — pops `field_count` initializers.
    StructNew,
    /// `struct.new_default type_idx, field_count`.
    StructNewDefault,
    /// `struct.get field_idx` — pops the struct reference.
    StructGet,
    /// `struct.set field_idx` — pops value and struct reference.
    StructSet,
    I32Eqz,
    I32Eq,
    I32Ne,
    I32LtS,
    I32LtU,
    I32GtS,
    I32GtU,
    I32LeS,
    I32LeU,
    I32GeS,
    I32GeU,
    I64Eqz,
    I64Eq,
    I64Ne,
    I64LtS,
    I64LtU,
    I64GtS,
    I64GtU,
    I64LeS,
    I64LeU,
    I64GeS,
    I64GeU,
    F32Eq,
    F32Ne,
    F32Lt,
    F32Gt,
    F32Le,
    F32Ge,
    F64Eq,
    F64Ne,
    F64Lt,
    F64Gt,
    F64Le,
    F64Ge,
    I32Clz,
    I32Ctz,
    I32Popcnt,
    I32Add,
    I32Sub,
    I32Mul,
    I32DivS,
    I32DivU,
    I32RemS,
    I32RemU,
    I32And,
    I32Or,
    I32Xor,
    I32Shl,
    I32ShrS,
    I32ShrU,
    I32Rotl,
    I32Rotr,
    I64Clz,
    I64Ctz,
    I64Popcnt,
    I64Add,
    I64Sub,
    I64Mul,
    I64DivS,
    I64DivU,
    I64RemS,
    I64RemU,
    I64And,
    I64Or,
    I64Xor,
    I64Shl,
    I64ShrS,
    I64ShrU,
    I64Rotl,
    I64Rotr,
    F32Abs,
    F32Neg,
    F32Ceil,
    F32Floor,
    F32Trunc,
    F32Nearest,
    F32Sqrt,
    F32Add,
    F32Sub,
    F32Mul,
    F32Div,
    F32Min,
    F32Max,
    F32Copysign,
    F64Abs,
    F64Neg,
    F64Ceil,
    F64Floor,
    F64Trunc,
    F64Nearest,
    F64Sqrt,
    F64Add,
    F64Sub,
    F64Mul,
    F64Div,
    F64Min,
    F64Max,
    F64Copysign,
    I32WrapI64,
    I32TruncF32S,
    I32TruncF32U,
    I32TruncF64S,
    I32TruncF64U,
    I64ExtendI32S,
    I64ExtendI32U,
    I64TruncF32S,
    I64TruncF32U,
    I64TruncF64S,
    I64TruncF64U,
    F32ConvertI32S,
    F32ConvertI32U,
    F32ConvertI64S,
    F32ConvertI64U,
    F32DemoteF64,
    F64ConvertI32S,
    F64ConvertI32U,
    F64ConvertI64S,
    F64ConvertI64U,
    F64PromoteF32,
    I32ReinterpretF32,
    I64ReinterpretF64,
    F32ReinterpretI32,
    F64ReinterpretI64,
    I32TruncSatF32S,
    I32TruncSatF32U,
    I32TruncSatF64S,
    I32TruncSatF64U,
    I64TruncSatF32S,
    I64TruncSatF32U,
    I64TruncSatF64S,
    I64TruncSatF64U,
    I32Extend8S,
    I32Extend16S,
    I64Extend8S,
    I64Extend16S,
    I64Extend32S,
}

/// A reservation for a not-yet-known branch target.
///
/// Returned by [`CodeWriter::reserve_target`] and redeemed by
/// [`CodeWriter::patch_target`] once the destination pc is known, the same
/// way forward branches are resolved during compilation.
#[derive(Debug)]
pub struct Reloc {
    pc: usize,
}

/// Compiler-facing emission interface for the threaded code stream.
#[derive(Debug, Default)]
pub struct CodeWriter {
    code: Vec<u64>,
}

impl CodeWriter {
    /// Creates an empty [`CodeWriter`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The current emission position, i.e. the absolute word index the next
    /// pushed word will occupy.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    /// Emits an opcode word.
    pub fn op(&mut self, op: Op) -> &mut Self {
        self.code.push(op as u64);
        self
    }

    /// Emits an immediate word.
    pub fn imm(&mut self, value: u64) -> &mut Self {
        self.code.push(value);
        self
    }

    /// Emits a value slot immediate (for the `*.const` instructions).
    pub fn slot(&mut self, value: UntypedValue) -> &mut Self {
        self.code.push(value.to_bits());
        self
    }

    /// Emits an absolute branch-target immediate.
    pub fn target(&mut self, dst_pc: usize) -> &mut Self {
        self.code.push(dst_pc as u64);
        self
    }

    /// Emits a placeholder target immediate to be patched later.
    pub fn reserve_target(&mut self) -> Reloc {
        let pc = self.code.len();
        self.code.push(u64::MAX);
        Reloc { pc }
    }

    /// Patches a reserved target with the now-known destination.
    ///
    /// # Panics
    ///
    /// If the reservation does not refer to a placeholder word.
    pub fn patch_target(&mut self, reloc: Reloc, dst_pc: usize) {
        assert_eq!(
            self.code[reloc.pc],
            u64::MAX,
            "target relocation points to an already patched word"
        );
        self.code[reloc.pc] = dst_pc as u64;
    }

    /// Emits the `entry` instruction every function body starts with.
    pub fn entry(&mut self, num_locals: usize, first_local: usize, num_zero: usize) -> &mut Self {
        self.op(Op::Entry)
            .imm(num_locals as u64)
            .imm(first_local as u64)
            .imm(num_zero as u64)
    }

    /// Emits the `end` instruction terminating a function body.
    pub fn end(&mut self, num_results: usize) -> &mut Self {
        self.op(Op::End).imm(num_results as u64)
    }

    /// Finishes emission and yields the code stream.
    pub fn finish(self) -> Vec<u64> {
        self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_words_round_trip() {
        for word in 0..Op::COUNT {
            let op = Op::from_word(word).expect("word below COUNT must decode");
            assert_eq!(op as u64, word);
        }
        assert_eq!(Op::from_word(Op::COUNT), None);
        assert_eq!(Op::from_word(u64::MAX), None);
    }

    #[test]
    fn validate_word_accepts_exactly_the_opcodes() {
        assert!(Op::validate_word(Op::I32Add as u64));
        assert!(Op::validate_word(Op::Entry as u64));
        assert!(!Op::validate_word(Op::COUNT));
        assert!(!Op::validate_word(0x1000_0000));
    }

    #[test]
    fn writer_emits_and_patches() {
        let mut writer = CodeWriter::new();
        writer.entry(2, 0, 2);
        writer.op(Op::Br);
        let reloc = writer.reserve_target();
        writer.op(Op::Nop);
        let dst = writer.pc();
        writer.end(0);
        writer.patch_target(reloc, dst);

        let code = writer.finish();
        assert_eq!(code[0], Op::Entry as u64);
        assert_eq!(code[4], Op::Br as u64);
        assert_eq!(code[5], dst as u64);
        assert_eq!(code[6], Op::Nop as u64);
        assert_eq!(code[7], Op::End as u64);
    }
}
