//! The threaded interpreter.
//!
//! Execution is a tight loop over `(pc, sp, fp)` kept in locals: read the
//! opcode word, advance `pc`, dispatch through one `match`, repeat. Calls
//! recurse on the native Rust stack and return the callee's final stack
//! top so the caller can resume with its operand top at
//! `callee_fp + num_results`; tail calls reuse the current frame and stay
//! in the same loop iteration. Cold per-instance state is reached through
//! the store on demand, while the code stream of the active context is
//! pinned once per invocation.

use crate::{
    code::Op,
    context::FuncKind,
    func::ImportTarget,
    host,
    stack::ValueStack,
    store::{ContextId, Store},
    table::{entry_to_ref, ref_to_entry, NULL_ENTRY},
    DEFAULT_CALL_STACK_LIMIT,
    DEFAULT_VALUE_STACK_LIMIT,
    MAX_CONTEXT_DEPTH,
};
use std::sync::Arc;
use wasm5_core::{TrapCode, UntypedValue};

/// How a function invocation left the interpreter.
enum Flow {
    /// Normal unwind; carries the callee's final stack top,
    /// `fp + num_results`.
    Return(usize),
    /// `proc_exit` was called somewhere below; unwind everything without
    /// executing further instructions.
    Exit,
}

/// Executes the function whose `entry` instruction is at the given word
/// index of `context`'s code stream.
///
/// A fresh operand stack is allocated for the invocation and registered as
/// a GC root together with the context's globals; both registrations are
/// undone on every exit path. `args` are copied to the frame base before
/// execution and `results` are copied out of it afterwards.
///
/// # Errors
///
/// Returns the [`TrapCode`] of the first trapping instruction. The nesting
/// of cross-module invocations is bounded by
/// [`MAX_CONTEXT_DEPTH`](crate::MAX_CONTEXT_DEPTH); exceeding it fails with
/// [`TrapCode::StackOverflow`] before anything runs.
pub fn execute(
    store: &mut Store,
    context: ContextId,
    entry: usize,
    args: &[UntypedValue],
    results: &mut [UntypedValue],
) -> Result<(), TrapCode> {
    if store.invocation_depth >= MAX_CONTEXT_DEPTH {
        return Err(TrapCode::StackOverflow);
    }
    let mut stack = ValueStack::new(DEFAULT_VALUE_STACK_LIMIT);
    if args.len() > stack.capacity() {
        return Err(TrapCode::StackOverflow);
    }
    for (i, arg) in args.iter().enumerate() {
        stack[i] = *arg;
    }

    let code = store.context(context).code.clone();
    let globals_root = {
        let globals = &store.context(context).globals;
        if globals.is_empty() {
            None
        } else {
            Some((globals.as_ptr(), globals.len()))
        }
    };
    let (stack_base, stack_slots) = stack.root_range();
    store.heap.push_stack_root(stack_base, stack_slots);
    let saved_globals = store.heap.set_globals_root(globals_root);
    store.invocation_depth += 1;

    let validate = std::env::var_os("WASM5_VALIDATE_CODE").is_some();
    let outcome = {
        let mut executor = Executor {
            store: &mut *store,
            context,
            code,
            stack: &mut stack,
            depth: 0,
            validate,
        };
        executor.run(entry, args.len(), 0)
    };

    store.invocation_depth -= 1;
    store.heap.set_globals_root(saved_globals);
    store.heap.pop_stack_root();

    outcome.map(|_flow| {
        for (i, result) in results.iter_mut().enumerate() {
            *result = stack[i];
        }
    })
}

/// Invokes a defined function of another (or the same) registered context.
///
/// This is the cross-module FFI: the engine's own linked-import and
/// external-funcref calls go through it, and drivers can use it to call
/// into any instance. `func_idx` indexes the target's defined functions.
pub fn call_external(
    store: &mut Store,
    context: ContextId,
    func_idx: usize,
    args: &[UntypedValue],
    results: &mut [UntypedValue],
) -> Result<(), TrapCode> {
    let meta = *store
        .context(context)
        .funcs
        .get(func_idx)
        .ok_or(TrapCode::OutOfBoundsTable)?;
    execute(store, context, meta.entry, args, results)
}

macro_rules! imm {
    ($self:ident, $pc:ident) => {{
        let value = $self.code[$pc];
        $pc += 1;
        value
    }};
}

macro_rules! unop {
    ($self:ident, $sp:ident, $method:ident) => {{
        $self.stack[$sp - 1] = $self.stack[$sp - 1].$method();
    }};
}

macro_rules! try_unop {
    ($self:ident, $sp:ident, $method:ident) => {{
        $self.stack[$sp - 1] = $self.stack[$sp - 1].$method()?;
    }};
}

macro_rules! binop {
    ($self:ident, $sp:ident, $method:ident) => {{
        $sp -= 1;
        let rhs = $self.stack[$sp];
        $self.stack[$sp - 1] = $self.stack[$sp - 1].$method(rhs);
    }};
}

macro_rules! try_binop {
    ($self:ident, $sp:ident, $method:ident) => {{
        $sp -= 1;
        let rhs = $self.stack[$sp];
        $self.stack[$sp - 1] = $self.stack[$sp - 1].$method(rhs)?;
    }};
}

macro_rules! load {
    ($self:ident, $pc:ident, $sp:ident, $ty:ty) => {{
        let offset = imm!($self, $pc);
        let addr = u32::from($self.stack[$sp - 1]);
        let value = $self
            .store
            .context($self.context)
            .memory
            .load::<$ty>(addr, offset)?;
        $self.stack[$sp - 1] = UntypedValue::from(value);
    }};
    ($self:ident, $pc:ident, $sp:ident, $ty:ty as $wide:ty) => {{
        let offset = imm!($self, $pc);
        let addr = u32::from($self.stack[$sp - 1]);
        let value = $self
            .store
            .context($self.context)
            .memory
            .load::<$ty>(addr, offset)?;
        $self.stack[$sp - 1] = UntypedValue::from(value as $wide);
    }};
}

macro_rules! store_op {
    ($self:ident, $pc:ident, $sp:ident, $ty:ty, $from:ty) => {{
        let offset = imm!($self, $pc);
        $sp -= 2;
        let addr = u32::from($self.stack[$sp]);
        let value = <$from>::from($self.stack[$sp + 1]) as $ty;
        $self
            .store
            .context_mut($self.context)
            .memory
            .store::<$ty>(addr, offset, value)?;
    }};
}

struct Executor<'a> {
    store: &'a mut Store,
    context: ContextId,
    code: Arc<[u64]>,
    stack: &'a mut ValueStack,
    depth: usize,
    validate: bool,
}

impl<'a> Executor<'a> {
    /// Runs one function activation whose frame starts at `fp`.
    fn run(&mut self, mut pc: usize, mut sp: usize, fp: usize) -> Result<Flow, TrapCode> {
        loop {
            if self.validate && !Op::validate_word(self.code[pc]) {
                log::error!(
                    "WASM5_VALIDATE_CODE: word {:#018x} at pc {} is not a handler",
                    self.code[pc],
                    pc
                );
                return Err(TrapCode::Unreachable);
            }
            let op = Op::from_word(self.code[pc]).ok_or(TrapCode::Unreachable)?;
            pc += 1;
            match op {
                Op::Unreachable => return Err(TrapCode::Unreachable),
                Op::Nop => {}
                Op::Drop => sp -= 1,
                Op::Select => {
                    sp -= 2;
                    let cond = u32::from(self.stack[sp + 1]);
                    if cond == 0 {
                        self.stack[sp - 1] = self.stack[sp];
                    }
                }
                Op::CopySlot => {
                    let src = imm!(self, pc) as usize;
                    let dst = imm!(self, pc) as usize;
                    self.stack[fp + dst] = self.stack[fp + src];
                }
                Op::SetSp => {
                    let slot = imm!(self, pc) as usize;
                    sp = fp + slot;
                }
                Op::Br => {
                    pc = self.code[pc] as usize;
                }
                Op::BrIf => {
                    let taken = imm!(self, pc) as usize;
                    let not_taken = imm!(self, pc) as usize;
                    sp -= 1;
                    pc = if u32::from(self.stack[sp]) != 0 {
                        taken
                    } else {
                        not_taken
                    };
                }
                Op::If => {
                    let else_target = imm!(self, pc) as usize;
                    sp -= 1;
                    if u32::from(self.stack[sp]) == 0 {
                        pc = else_target;
                    }
                }
                Op::BrTable => {
                    let num_labels = imm!(self, pc) as usize;
                    sp -= 1;
                    let index = u32::from(self.stack[sp]) as usize;
                    // Out-of-range indices clamp to the default target.
                    let chosen = index.min(num_labels);
                    pc = self.code[pc + chosen] as usize;
                }
                Op::End | Op::Return => {
                    let num_results = imm!(self, pc) as usize;
                    self.stack.copy_slots(sp - num_results, fp, num_results);
                    return Ok(Flow::Return(fp + num_results));
                }
                Op::FuncExit => {
                    let num_results = imm!(self, pc) as usize;
                    return Ok(Flow::Return(fp + num_results));
                }
                Op::Entry => {
                    let num_locals = imm!(self, pc) as usize;
                    let first_local = imm!(self, pc) as usize;
                    let num_zero = imm!(self, pc) as usize;
                    sp = fp + num_locals;
                    self.stack.zero_slots(fp + first_local, num_zero);
                }
                Op::Call => {
                    let code_idx = imm!(self, pc) as usize;
                    let frame_offset = imm!(self, pc) as usize;
                    match self.call_local(code_idx, sp, fp + frame_offset)? {
                        Flow::Return(top) => sp = top,
                        Flow::Exit => return Ok(Flow::Exit),
                    }
                }
                Op::CallImport => {
                    let import_idx = imm!(self, pc) as usize;
                    let frame_offset = imm!(self, pc) as usize;
                    match self.call_import(import_idx, fp + frame_offset)? {
                        Some(top) => sp = top,
                        None => return Ok(Flow::Exit),
                    }
                }
                Op::CallIndirect => {
                    let type_idx = imm!(self, pc) as usize;
                    let table_idx = imm!(self, pc) as usize;
                    let frame_offset = imm!(self, pc) as usize;
                    sp -= 1;
                    let elem = u32::from(self.stack[sp]);
                    let callee = self.resolve_table_entry(table_idx, elem)?;
                    self.type_check(callee, type_idx)?;
                    match self.invoke_callee(callee, fp + frame_offset, sp)? {
                        Some(top) => sp = top,
                        None => return Ok(Flow::Exit),
                    }
                }
                Op::CallRef => {
                    let type_idx = imm!(self, pc) as usize;
                    let frame_offset = imm!(self, pc) as usize;
                    sp -= 1;
                    let callee = self.resolve_funcref(self.stack[sp])?;
                    self.type_check(callee, type_idx)?;
                    match self.invoke_callee(callee, fp + frame_offset, sp)? {
                        Some(top) => sp = top,
                        None => return Ok(Flow::Exit),
                    }
                }
                Op::ReturnCall => {
                    let code_idx = imm!(self, pc) as usize;
                    let num_params = imm!(self, pc) as usize;
                    self.stack.copy_slots(sp - num_params, fp, num_params);
                    sp = fp + num_params;
                    pc = code_idx;
                }
                Op::ReturnCallImport => {
                    let import_idx = imm!(self, pc) as usize;
                    let num_params = imm!(self, pc) as usize;
                    self.stack.copy_slots(sp - num_params, fp, num_params);
                    return match self.call_import(import_idx, fp)? {
                        Some(top) => Ok(Flow::Return(top)),
                        None => Ok(Flow::Exit),
                    };
                }
                Op::ReturnCallIndirect => {
                    let type_idx = imm!(self, pc) as usize;
                    let table_idx = imm!(self, pc) as usize;
                    let num_params = imm!(self, pc) as usize;
                    sp -= 1;
                    let elem = u32::from(self.stack[sp]);
                    let callee = self.resolve_table_entry(table_idx, elem)?;
                    self.type_check(callee, type_idx)?;
                    self.stack.copy_slots(sp - num_params, fp, num_params);
                    sp = fp + num_params;
                    match callee {
                        FuncKind::Defined(func_idx) => {
                            pc = self.store.context(self.context).funcs[func_idx].entry;
                        }
                        _ => {
                            return match self.invoke_callee(callee, fp, sp)? {
                                Some(top) => Ok(Flow::Return(top)),
                                None => Ok(Flow::Exit),
                            };
                        }
                    }
                }
                Op::ReturnCallRef => {
                    let type_idx = imm!(self, pc) as usize;
                    let num_params = imm!(self, pc) as usize;
                    sp -= 1;
                    let callee = self.resolve_funcref(self.stack[sp])?;
                    self.type_check(callee, type_idx)?;
                    self.stack.copy_slots(sp - num_params, fp, num_params);
                    sp = fp + num_params;
                    match callee {
                        FuncKind::Defined(func_idx) => {
                            pc = self.store.context(self.context).funcs[func_idx].entry;
                        }
                        _ => {
                            return match self.invoke_callee(callee, fp, sp)? {
                                Some(top) => Ok(Flow::Return(top)),
                                None => Ok(Flow::Exit),
                            };
                        }
                    }
                }
                Op::I32Const | Op::I64Const | Op::F32Const | Op::F64Const => {
                    let bits = imm!(self, pc);
                    self.stack[sp] = UntypedValue::from_bits(bits);
                    sp += 1;
                }
                Op::LocalGet => {
                    let slot = imm!(self, pc) as usize;
                    self.stack[sp] = self.stack[fp + slot];
                    sp += 1;
                }
                Op::LocalSet => {
                    let slot = imm!(self, pc) as usize;
                    sp -= 1;
                    self.stack[fp + slot] = self.stack[sp];
                }
                Op::LocalTee => {
                    let slot = imm!(self, pc) as usize;
                    self.stack[fp + slot] = self.stack[sp - 1];
                }
                Op::GlobalGet => {
                    let index = imm!(self, pc) as usize;
                    self.stack[sp] = self.store.context(self.context).globals[index];
                    sp += 1;
                }
                Op::GlobalSet => {
                    let index = imm!(self, pc) as usize;
                    sp -= 1;
                    self.store.context_mut(self.context).globals[index] = self.stack[sp];
                }
                Op::I32Load => load!(self, pc, sp, u32),
                Op::I64Load => load!(self, pc, sp, u64),
                Op::F32Load => load!(self, pc, sp, u32),
                Op::F64Load => load!(self, pc, sp, u64),
                Op::I32Load8S => load!(self, pc, sp, i8 as i32),
                Op::I32Load8U => load!(self, pc, sp, u8 as u32),
                Op::I32Load16S => load!(self, pc, sp, i16 as i32),
                Op::I32Load16U => load!(self, pc, sp, u16 as u32),
                Op::I64Load8S => load!(self, pc, sp, i8 as i64),
                Op::I64Load8U => load!(self, pc, sp, u8 as u64),
                Op::I64Load16S => load!(self, pc, sp, i16 as i64),
                Op::I64Load16U => load!(self, pc, sp, u16 as u64),
                Op::I64Load32S => load!(self, pc, sp, i32 as i64),
                Op::I64Load32U => load!(self, pc, sp, u32 as u64),
                Op::I32Store => store_op!(self, pc, sp, u32, u32),
                Op::I64Store => store_op!(self, pc, sp, u64, u64),
                Op::F32Store => store_op!(self, pc, sp, u32, u32),
                Op::F64Store => store_op!(self, pc, sp, u64, u64),
                Op::I32Store8 => store_op!(self, pc, sp, u8, u32),
                Op::I32Store16 => store_op!(self, pc, sp, u16, u32),
                Op::I64Store8 => store_op!(self, pc, sp, u8, u64),
                Op::I64Store16 => store_op!(self, pc, sp, u16, u64),
                Op::I64Store32 => store_op!(self, pc, sp, u32, u64),
                Op::MemorySize => {
                    let pages = self.store.context(self.context).memory.size_in_pages();
                    self.stack[sp] = UntypedValue::from(pages);
                    sp += 1;
                }
                Op::MemoryGrow => {
                    let delta = u32::from(self.stack[sp - 1]);
                    let old_pages = self.store.context_mut(self.context).memory.grow(delta);
                    self.stack[sp - 1] = UntypedValue::from(old_pages);
                }
                Op::MemoryCopy => {
                    sp -= 3;
                    let dest = u64::from(u32::from(self.stack[sp]));
                    let src = u64::from(u32::from(self.stack[sp + 1]));
                    let len = u64::from(u32::from(self.stack[sp + 2]));
                    self.store
                        .context_mut(self.context)
                        .memory
                        .copy(dest, src, len)?;
                }
                Op::MemoryFill => {
                    sp -= 3;
                    let dest = u64::from(u32::from(self.stack[sp]));
                    let byte = u32::from(self.stack[sp + 1]) as u8;
                    let len = u64::from(u32::from(self.stack[sp + 2]));
                    self.store
                        .context_mut(self.context)
                        .memory
                        .fill(dest, byte, len)?;
                }
                Op::MemoryInit => {
                    let data_idx = imm!(self, pc) as usize;
                    sp -= 3;
                    let dest = u64::from(u32::from(self.stack[sp]));
                    let src = u64::from(u32::from(self.stack[sp + 1]));
                    let len = u64::from(u32::from(self.stack[sp + 2]));
                    self.store
                        .context_mut(self.context)
                        .memory_init(data_idx, dest, src, len)?;
                }
                Op::DataDrop => {
                    let data_idx = imm!(self, pc) as usize;
                    self.store
                        .context_mut(self.context)
                        .data_segments
                        .get_mut(data_idx)
                        .ok_or(TrapCode::OutOfBoundsMemory)?
                        .drop_contents();
                }
                Op::TableGet => {
                    let table_idx = imm!(self, pc) as usize;
                    let elem = u32::from(self.stack[sp - 1]);
                    let entry = self
                        .store
                        .context(self.context)
                        .tables
                        .get(table_idx)
                        .ok_or(TrapCode::OutOfBoundsTable)?
                        .get(elem)?;
                    self.stack[sp - 1] = entry_to_ref(entry);
                }
                Op::TableSet => {
                    let table_idx = imm!(self, pc) as usize;
                    sp -= 2;
                    let elem = u32::from(self.stack[sp]);
                    let entry =
                        ref_to_entry(self.stack[sp + 1]).ok_or(TrapCode::NullReference)?;
                    self.store
                        .context_mut(self.context)
                        .tables
                        .get_mut(table_idx)
                        .ok_or(TrapCode::OutOfBoundsTable)?
                        .set(elem, entry)?;
                }
                Op::TableSize => {
                    let table_idx = imm!(self, pc) as usize;
                    let size = self
                        .store
                        .context(self.context)
                        .tables
                        .get(table_idx)
                        .ok_or(TrapCode::OutOfBoundsTable)?
                        .size();
                    self.stack[sp] = UntypedValue::from(size);
                    sp += 1;
                }
                Op::TableGrow => {
                    let table_idx = imm!(self, pc) as usize;
                    sp -= 2;
                    let init =
                        ref_to_entry(self.stack[sp]).ok_or(TrapCode::NullReference)?;
                    let delta = i32::from(self.stack[sp + 1]);
                    let old_size = self
                        .store
                        .context_mut(self.context)
                        .tables
                        .get_mut(table_idx)
                        .ok_or(TrapCode::OutOfBoundsTable)?
                        .grow(delta, init);
                    self.stack[sp] = UntypedValue::from(old_size);
                    sp += 1;
                }
                Op::TableFill => {
                    let table_idx = imm!(self, pc) as usize;
                    sp -= 3;
                    let start = u64::from(u32::from(self.stack[sp]));
                    let entry =
                        ref_to_entry(self.stack[sp + 1]).ok_or(TrapCode::NullReference)?;
                    let len = u64::from(u32::from(self.stack[sp + 2]));
                    self.store
                        .context_mut(self.context)
                        .tables
                        .get_mut(table_idx)
                        .ok_or(TrapCode::TableBoundsAccess)?
                        .fill(start, entry, len)?;
                }
                Op::TableCopy => {
                    let dst_table = imm!(self, pc) as usize;
                    let src_table = imm!(self, pc) as usize;
                    sp -= 3;
                    let dest = u64::from(u32::from(self.stack[sp]));
                    let src = u64::from(u32::from(self.stack[sp + 1]));
                    let len = u64::from(u32::from(self.stack[sp + 2]));
                    self.store
                        .context_mut(self.context)
                        .table_copy(dst_table, src_table, dest, src, len)?;
                }
                Op::TableInit => {
                    let table_idx = imm!(self, pc) as usize;
                    let elem_idx = imm!(self, pc) as usize;
                    sp -= 3;
                    let dest = u64::from(u32::from(self.stack[sp]));
                    let src = u64::from(u32::from(self.stack[sp + 1]));
                    let len = u64::from(u32::from(self.stack[sp + 2]));
                    self.store
                        .context_mut(self.context)
                        .table_init(table_idx, elem_idx, dest, src, len)?;
                }
                Op::ElemDrop => {
                    let elem_idx = imm!(self, pc) as usize;
                    self.store
                        .context_mut(self.context)
                        .elem_segments
                        .get_mut(elem_idx)
                        .ok_or(TrapCode::TableBoundsAccess)?
                        .drop_contents();
                }
                Op::RefNull => {
                    self.stack[sp] = UntypedValue::null();
                    sp += 1;
                }
                Op::RefFunc => {
                    let func_idx = imm!(self, pc) as u32;
                    self.stack[sp] = UntypedValue::funcref(func_idx);
                    sp += 1;
                }
                Op::RefIsNull => {
                    let is_null = self.stack[sp - 1].is_null();
                    self.stack[sp - 1] = UntypedValue::from(is_null);
                }
                Op::RefEq => {
                    sp -= 1;
                    let rhs = self.stack[sp];
                    let lhs = self.stack[sp - 1];
                    self.stack[sp - 1] = UntypedValue::from(lhs.to_bits() == rhs.to_bits());
                }
                Op::RefAsNonNull => {
                    if self.stack[sp - 1].is_null() {
                        return Err(TrapCode::NullReference);
                    }
                }
                Op::BrOnNull => {
                    let target = imm!(self, pc) as usize;
                    if self.stack[sp - 1].is_null() {
                        sp -= 1;
                        pc = target;
                    }
                }
                Op::BrOnNonNull => {
                    let target = imm!(self, pc) as usize;
                    if self.stack[sp - 1].is_null() {
                        sp -= 1;
                    } else {
                        pc = target;
                    }
                }
                Op::ArrayNew => {
                    let type_idx = imm!(self, pc) as u32;
                    sp -= 1;
                    let length = i32::from(self.stack[sp]);
                    let init = self.stack[sp - 1];
                    let array = self
                        .store
                        .heap
                        .alloc_array(type_idx, length, init)
                        .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp - 1] = array;
                }
                Op::ArrayNewDefault => {
                    let type_idx = imm!(self, pc) as u32;
                    let length = i32::from(self.stack[sp - 1]);
                    let array = self
                        .store
                        .heap
                        .alloc_array(type_idx, length, UntypedValue::default())
                        .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp - 1] = array;
                }
                Op::ArrayNewFixed => {
                    let type_idx = imm!(self, pc) as u32;
                    let length = imm!(self, pc) as usize;
                    sp -= length;
                    let array = {
                        let values = self.stack.slice(sp, length);
                        self.store.heap.alloc_array_from_values(type_idx, values)
                    }
                    .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp] = array;
                    sp += 1;
                }
                Op::ArrayGet => {
                    sp -= 1;
                    let index = i32::from(self.stack[sp]);
                    let array = self.stack[sp - 1];
                    if array.is_null() {
                        return Err(TrapCode::NullReference);
                    }
                    let value = usize::try_from(index)
                        .ok()
                        .and_then(|index| self.store.heap.get_slot(array, index))
                        .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp - 1] = value;
                }
                Op::ArraySet => {
                    sp -= 3;
                    let array = self.stack[sp];
                    let index = i32::from(self.stack[sp + 1]);
                    let value = self.stack[sp + 2];
                    if array.is_null() {
                        return Err(TrapCode::NullReference);
                    }
                    let stored = usize::try_from(index)
                        .ok()
                        .map(|index| self.store.heap.set_slot(array, index, value))
                        .unwrap_or(false);
                    if !stored {
                        return Err(TrapCode::OutOfBoundsMemory);
                    }
                }
                Op::ArrayLen => {
                    let array = self.stack[sp - 1];
                    if array.is_null() {
                        return Err(TrapCode::NullReference);
                    }
                    let length = self
                        .store
                        .heap
                        .length(array)
                        .ok_or(TrapCode::NullReference)?;
                    self.stack[sp - 1] = UntypedValue::from(length as u32);
                }
                Op::StructNew => {
                    let type_idx = imm!(self, pc) as u32;
                    let field_count = imm!(self, pc) as usize;
                    sp -= field_count;
                    let object = {
                        let fields = self.stack.slice(sp, field_count);
                        self.store.heap.alloc_struct_from_values(type_idx, fields)
                    }
                    .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp] = object;
                    sp += 1;
                }
                Op::StructNewDefault => {
                    let type_idx = imm!(self, pc) as u32;
                    let field_count = imm!(self, pc) as i32;
                    let object = self
                        .store
                        .heap
                        .alloc_struct(type_idx, field_count)
                        .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp] = object;
                    sp += 1;
                }
                Op::StructGet => {
                    let field_idx = imm!(self, pc) as usize;
                    let object = self.stack[sp - 1];
                    if object.is_null() {
                        return Err(TrapCode::NullReference);
                    }
                    let value = self
                        .store
                        .heap
                        .get_slot(object, field_idx)
                        .ok_or(TrapCode::OutOfBoundsMemory)?;
                    self.stack[sp - 1] = value;
                }
                Op::StructSet => {
                    let field_idx = imm!(self, pc) as usize;
                    sp -= 2;
                    let object = self.stack[sp];
                    let value = self.stack[sp + 1];
                    if object.is_null() {
                        return Err(TrapCode::NullReference);
                    }
                    if !self.store.heap.set_slot(object, field_idx, value) {
                        return Err(TrapCode::OutOfBoundsMemory);
                    }
                }
                Op::I32Eqz => unop!(self, sp, i32_eqz),
                Op::I32Eq => binop!(self, sp, i32_eq),
                Op::I32Ne => binop!(self, sp, i32_ne),
                Op::I32LtS => binop!(self, sp, i32_lt_s),
                Op::I32LtU => binop!(self, sp, i32_lt_u),
                Op::I32GtS => binop!(self, sp, i32_gt_s),
                Op::I32GtU => binop!(self, sp, i32_gt_u),
                Op::I32LeS => binop!(self, sp, i32_le_s),
                Op::I32LeU => binop!(self, sp, i32_le_u),
                Op::I32GeS => binop!(self, sp, i32_ge_s),
                Op::I32GeU => binop!(self, sp, i32_ge_u),
                Op::I64Eqz => unop!(self, sp, i64_eqz),
                Op::I64Eq => binop!(self, sp, i64_eq),
                Op::I64Ne => binop!(self, sp, i64_ne),
                Op::I64LtS => binop!(self, sp, i64_lt_s),
                Op::I64LtU => binop!(self, sp, i64_lt_u),
                Op::I64GtS => binop!(self, sp, i64_gt_s),
                Op::I64GtU => binop!(self, sp, i64_gt_u),
                Op::I64LeS => binop!(self, sp, i64_le_s),
                Op::I64LeU => binop!(self, sp, i64_le_u),
                Op::I64GeS => binop!(self, sp, i64_ge_s),
                Op::I64GeU => binop!(self, sp, i64_ge_u),
                Op::F32Eq => binop!(self, sp, f32_eq),
                Op::F32Ne => binop!(self, sp, f32_ne),
                Op::F32Lt => binop!(self, sp, f32_lt),
                Op::F32Gt => binop!(self, sp, f32_gt),
                Op::F32Le => binop!(self, sp, f32_le),
                Op::F32Ge => binop!(self, sp, f32_ge),
                Op::F64Eq => binop!(self, sp, f64_eq),
                Op::F64Ne => binop!(self, sp, f64_ne),
                Op::F64Lt => binop!(self, sp, f64_lt),
                Op::F64Gt => binop!(self, sp, f64_gt),
                Op::F64Le => binop!(self, sp, f64_le),
                Op::F64Ge => binop!(self, sp, f64_ge),
                Op::I32Clz => unop!(self, sp, i32_clz),
                Op::I32Ctz => unop!(self, sp, i32_ctz),
                Op::I32Popcnt => unop!(self, sp, i32_popcnt),
                Op::I32Add => binop!(self, sp, i32_add),
                Op::I32Sub => binop!(self, sp, i32_sub),
                Op::I32Mul => binop!(self, sp, i32_mul),
                Op::I32DivS => try_binop!(self, sp, i32_div_s),
                Op::I32DivU => try_binop!(self, sp, i32_div_u),
                Op::I32RemS => try_binop!(self, sp, i32_rem_s),
                Op::I32RemU => try_binop!(self, sp, i32_rem_u),
                Op::I32And => binop!(self, sp, i32_and),
                Op::I32Or => binop!(self, sp, i32_or),
                Op::I32Xor => binop!(self, sp, i32_xor),
                Op::I32Shl => binop!(self, sp, i32_shl),
                Op::I32ShrS => binop!(self, sp, i32_shr_s),
                Op::I32ShrU => binop!(self, sp, i32_shr_u),
                Op::I32Rotl => binop!(self, sp, i32_rotl),
                Op::I32Rotr => binop!(self, sp, i32_rotr),
                Op::I64Clz => unop!(self, sp, i64_clz),
                Op::I64Ctz => unop!(self, sp, i64_ctz),
                Op::I64Popcnt => unop!(self, sp, i64_popcnt),
                Op::I64Add => binop!(self, sp, i64_add),
                Op::I64Sub => binop!(self, sp, i64_sub),
                Op::I64Mul => binop!(self, sp, i64_mul),
                Op::I64DivS => try_binop!(self, sp, i64_div_s),
                Op::I64DivU => try_binop!(self, sp, i64_div_u),
                Op::I64RemS => try_binop!(self, sp, i64_rem_s),
                Op::I64RemU => try_binop!(self, sp, i64_rem_u),
                Op::I64And => binop!(self, sp, i64_and),
                Op::I64Or => binop!(self, sp, i64_or),
                Op::I64Xor => binop!(self, sp, i64_xor),
                Op::I64Shl => binop!(self, sp, i64_shl),
                Op::I64ShrS => binop!(self, sp, i64_shr_s),
                Op::I64ShrU => binop!(self, sp, i64_shr_u),
                Op::I64Rotl => binop!(self, sp, i64_rotl),
                Op::I64Rotr => binop!(self, sp, i64_rotr),
                Op::F32Abs => unop!(self, sp, f32_abs),
                Op::F32Neg => unop!(self, sp, f32_neg),
                Op::F32Ceil => unop!(self, sp, f32_ceil),
                Op::F32Floor => unop!(self, sp, f32_floor),
                Op::F32Trunc => unop!(self, sp, f32_trunc),
                Op::F32Nearest => unop!(self, sp, f32_nearest),
                Op::F32Sqrt => unop!(self, sp, f32_sqrt),
                Op::F32Add => binop!(self, sp, f32_add),
                Op::F32Sub => binop!(self, sp, f32_sub),
                Op::F32Mul => binop!(self, sp, f32_mul),
                Op::F32Div => try_binop!(self, sp, f32_div),
                Op::F32Min => binop!(self, sp, f32_min),
                Op::F32Max => binop!(self, sp, f32_max),
                Op::F32Copysign => binop!(self, sp, f32_copysign),
                Op::F64Abs => unop!(self, sp, f64_abs),
                Op::F64Neg => unop!(self, sp, f64_neg),
                Op::F64Ceil => unop!(self, sp, f64_ceil),
                Op::F64Floor => unop!(self, sp, f64_floor),
                Op::F64Trunc => unop!(self, sp, f64_trunc),
                Op::F64Nearest => unop!(self, sp, f64_nearest),
                Op::F64Sqrt => unop!(self, sp, f64_sqrt),
                Op::F64Add => binop!(self, sp, f64_add),
                Op::F64Sub => binop!(self, sp, f64_sub),
                Op::F64Mul => binop!(self, sp, f64_mul),
                Op::F64Div => try_binop!(self, sp, f64_div),
                Op::F64Min => binop!(self, sp, f64_min),
                Op::F64Max => binop!(self, sp, f64_max),
                Op::F64Copysign => binop!(self, sp, f64_copysign),
                Op::I32WrapI64 => unop!(self, sp, i32_wrap_i64),
                Op::I32TruncF32S => try_unop!(self, sp, i32_trunc_f32_s),
                Op::I32TruncF32U => try_unop!(self, sp, i32_trunc_f32_u),
                Op::I32TruncF64S => try_unop!(self, sp, i32_trunc_f64_s),
                Op::I32TruncF64U => try_unop!(self, sp, i32_trunc_f64_u),
                Op::I64ExtendI32S => unop!(self, sp, i64_extend_i32_s),
                Op::I64ExtendI32U => unop!(self, sp, i64_extend_i32_u),
                Op::I64TruncF32S => try_unop!(self, sp, i64_trunc_f32_s),
                Op::I64TruncF32U => try_unop!(self, sp, i64_trunc_f32_u),
                Op::I64TruncF64S => try_unop!(self, sp, i64_trunc_f64_s),
                Op::I64TruncF64U => try_unop!(self, sp, i64_trunc_f64_u),
                Op::F32ConvertI32S => unop!(self, sp, f32_convert_i32_s),
                Op::F32ConvertI32U => unop!(self, sp, f32_convert_i32_u),
                Op::F32ConvertI64S => unop!(self, sp, f32_convert_i64_s),
                Op::F32ConvertI64U => unop!(self, sp, f32_convert_i64_u),
                Op::F32DemoteF64 => unop!(self, sp, f32_demote_f64),
                Op::F64ConvertI32S => unop!(self, sp, f64_convert_i32_s),
                Op::F64ConvertI32U => unop!(self, sp, f64_convert_i32_u),
                Op::F64ConvertI64S => unop!(self, sp, f64_convert_i64_s),
                Op::F64ConvertI64U => unop!(self, sp, f64_convert_i64_u),
                Op::F64PromoteF32 => unop!(self, sp, f64_promote_f32),
                Op::I32ReinterpretF32 => unop!(self, sp, i32_reinterpret_f32),
                Op::I64ReinterpretF64 => unop!(self, sp, i64_reinterpret_f64),
                Op::F32ReinterpretI32 => unop!(self, sp, f32_reinterpret_i32),
                Op::F64ReinterpretI64 => unop!(self, sp, f64_reinterpret_i64),
                Op::I32TruncSatF32S => unop!(self, sp, i32_trunc_sat_f32_s),
                Op::I32TruncSatF32U => unop!(self, sp, i32_trunc_sat_f32_u),
                Op::I32TruncSatF64S => unop!(self, sp, i32_trunc_sat_f64_s),
                Op::I32TruncSatF64U => unop!(self, sp, i32_trunc_sat_f64_u),
                Op::I64TruncSatF32S => unop!(self, sp, i64_trunc_sat_f32_s),
                Op::I64TruncSatF32U => unop!(self, sp, i64_trunc_sat_f32_u),
                Op::I64TruncSatF64S => unop!(self, sp, i64_trunc_sat_f64_s),
                Op::I64TruncSatF64U => unop!(self, sp, i64_trunc_sat_f64_u),
                Op::I32Extend8S => unop!(self, sp, i32_extend8_s),
                Op::I32Extend16S => unop!(self, sp, i32_extend16_s),
                Op::I64Extend8S => unop!(self, sp, i64_extend8_s),
                Op::I64Extend16S => unop!(self, sp, i64_extend16_s),
                Op::I64Extend32S => unop!(self, sp, i64_extend32_s),
            }
        }
    }

    /// Recurses into a local function whose frame starts at `new_fp`.
    fn call_local(&mut self, entry: usize, sp: usize, new_fp: usize) -> Result<Flow, TrapCode> {
        if self.depth >= DEFAULT_CALL_STACK_LIMIT {
            return Err(TrapCode::StackOverflow);
        }
        self.depth += 1;
        let flow = self.run(entry, sp, new_fp);
        self.depth -= 1;
        flow
    }

    /// Performs an imported call with the argument window at `frame`.
    ///
    /// Returns the caller's new stack top, or `None` when a host handler
    /// set the sticky exit flag.
    fn call_import(&mut self, import_idx: usize, frame: usize) -> Result<Option<usize>, TrapCode> {
        let import = self.store.context(self.context).imports[import_idx];
        match import.target {
            ImportTarget::Host(handler) => {
                let window_len = import.num_params.max(import.num_results);
                host::invoke(
                    self.store,
                    self.context,
                    handler,
                    self.stack.window(frame, window_len),
                )?;
                if self.store.wasi.exited() {
                    return Ok(None);
                }
                Ok(Some(frame + import.num_results))
            }
            ImportTarget::Linked { context, func_idx } => self.call_linked(
                context,
                func_idx,
                frame,
                import.num_params,
                import.num_results,
            ),
            ImportTarget::Unresolved => {
                // An invoked-but-unresolved spectest import is a no-op that
                // produces zeroed results.
                self.stack.zero_slots(frame, import.num_results);
                Ok(Some(frame + import.num_results))
            }
        }
    }

    /// Performs a cross-module call into `target`'s defined function.
    ///
    /// The target instance runs on its own operand stack; arguments are
    /// copied over and results copied back into the caller's window, so
    /// the caller's state cannot be observed (or clobbered) by the callee.
    fn call_linked(
        &mut self,
        target: ContextId,
        func_idx: usize,
        frame: usize,
        num_params: usize,
        num_results: usize,
    ) -> Result<Option<usize>, TrapCode> {
        let args = self.stack.slice(frame, num_params).to_vec();
        let mut results = vec![UntypedValue::default(); num_results];
        call_external(self.store, target, func_idx, &args, &mut results)?;
        self.stack
            .window(frame, num_results)
            .copy_from_slice(&results);
        if self.store.wasi.exited() {
            return Ok(None);
        }
        Ok(Some(frame + num_results))
    }

    /// Resolves a `call_indirect` table access down to a callee.
    fn resolve_table_entry(&self, table_idx: usize, elem: u32) -> Result<FuncKind, TrapCode> {
        let ctx = self.store.context(self.context);
        let entry = ctx
            .tables
            .get(table_idx)
            .ok_or(TrapCode::OutOfBoundsTable)?
            .get(elem)?;
        if entry == NULL_ENTRY {
            return Err(TrapCode::UninitializedElement);
        }
        ctx.resolve_func(entry as usize)
            .ok_or(TrapCode::OutOfBoundsTable)
    }

    /// Resolves a popped funcref down to a callee.
    fn resolve_funcref(&self, value: UntypedValue) -> Result<FuncKind, TrapCode> {
        if value.is_null() {
            return Err(TrapCode::NullFunctionReference);
        }
        let index = value
            .funcref_index()
            .ok_or(TrapCode::IndirectCallTypeMismatch)?;
        self.store
            .context(self.context)
            .resolve_func(index as usize)
            .ok_or(TrapCode::IndirectCallTypeMismatch)
    }

    /// Checks the callee against the call site's expected type.
    ///
    /// Defined functions compare their full signature-hash pair; imports
    /// and external funcrefs carry only parameter/result counts, so those
    /// are what is checked.
    fn type_check(&self, callee: FuncKind, expected_type: usize) -> Result<(), TrapCode> {
        let ctx = self.store.context(self.context);
        let expected = ctx
            .types
            .get(expected_type)
            .ok_or(TrapCode::IndirectCallTypeMismatch)?;
        let counts_match = |num_params: usize, num_results: usize| {
            num_params == expected.params().len() && num_results == expected.results().len()
        };
        let matches = match callee {
            FuncKind::Defined(func_idx) => {
                ctx.types[ctx.funcs[func_idx].type_idx].matches(expected)
            }
            FuncKind::Import(import_idx) => {
                let import = &ctx.imports[import_idx];
                counts_match(import.num_params, import.num_results)
            }
            FuncKind::Extern(extern_idx) => {
                let ext = &ctx.extern_funcrefs[extern_idx];
                counts_match(ext.num_params, ext.num_results)
            }
        };
        if matches {
            Ok(())
        } else {
            Err(TrapCode::IndirectCallTypeMismatch)
        }
    }

    /// Dispatches a resolved callee with its frame at `frame`.
    fn invoke_callee(
        &mut self,
        callee: FuncKind,
        frame: usize,
        sp: usize,
    ) -> Result<Option<usize>, TrapCode> {
        match callee {
            FuncKind::Defined(func_idx) => {
                let entry = self.store.context(self.context).funcs[func_idx].entry;
                match self.call_local(entry, sp, frame)? {
                    Flow::Return(top) => Ok(Some(top)),
                    Flow::Exit => Ok(None),
                }
            }
            FuncKind::Import(import_idx) => self.call_import(import_idx, frame),
            FuncKind::Extern(extern_idx) => {
                let ext = self.store.context(self.context).extern_funcrefs[extern_idx];
                self.call_linked(ext.context, ext.func_idx, frame, ext.num_params, ext.num_results)
            }
        }
    }
}
