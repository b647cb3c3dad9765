//! # wasm5
//!
//! A threaded-code WebAssembly execution engine.
//!
//! This library executes WebAssembly modules that have already been decoded,
//! validated and lowered into the engine's threaded code stream: a flat
//! sequence of 64-bit words in which the first word of every instruction
//! selects its handler and the following words are immediates. The engine
//! provides the semantics the WebAssembly specification mandates: trapping
//! arithmetic, bounds-checked linear memory, typed tables with indirect
//! calls, bulk memory and table operations, typed function references, a
//! tracing garbage-collected heap for managed arrays and structs, cross
//! module linking, and a subset of the WASI system interface.
//!
//! ## Structure
//!
//! - A [`RuntimeContext`] is the per-instance module image: code stream,
//!   globals, linear memory, tables, segments and import bindings. It is
//!   produced once per instantiation from the output of the (external)
//!   compiler.
//! - A [`Store`] owns every registered context, the managed [`Heap`] and the
//!   WASI state, and is the unit the driver keeps alive across invocations.
//! - [`execute`] runs a function of a context on a fresh operand stack and
//!   either yields its results or a [`TrapCode`].
//!
//! Execution is single-threaded and cooperative: the engine owns the host
//! thread of control while a function runs, and the only ways out of the
//! interpreter are returning, trapping, or calling a host import.

/// WebAssembly-specific sizes and units.
pub mod memory_units {
    pub use memory_units::{size_of, wasm32::*, ByteSize, Bytes, RoundUpTo};
}

mod code;
mod context;
mod executor;
mod func;
mod heap;
mod host;
mod memory;
mod segment;
mod stack;
mod store;
mod table;

pub use self::{
    code::{CodeWriter, Op, Reloc},
    context::{ContextBuilder, RuntimeContext},
    executor::{call_external, execute},
    func::{ExternFuncRef, FuncMeta, FuncType, ImportMeta, ImportTarget},
    heap::{Heap, HeapKind},
    host::{spectest, wasi, HandlerId},
    host::wasi::{WasiCtx, WasiCtxBuilder},
    memory::{LinearMemory, PAGE_SIZE},
    segment::{DataSegment, ElemSegment},
    stack::ValueStack,
    store::{ContextId, Store},
    table::Table,
};
pub use wasm5_core::{
    TrapCode,
    UntypedValue,
    Value,
    ValueType,
    F32,
    F64,
    FUNCREF_TAG,
    REF_NULL,
};

/// Default number of 64-bit slots of the operand stack of one invocation.
pub const DEFAULT_VALUE_STACK_LIMIT: usize = 64 * 1024;

/// Maximum nesting of function calls within one invocation.
///
/// Calls recurse on the native stack, so this bound also keeps the host
/// stack within its limits; tail calls reuse their frame and are not
/// counted.
pub const DEFAULT_CALL_STACK_LIMIT: usize = 2048;

/// Maximum nesting of cross-module calls.
///
/// Each linked import or external funcref call re-enters the engine in the
/// target context; pathological mutual imports fail with
/// [`TrapCode::StackOverflow`] instead of exhausting native memory.
pub const MAX_CONTEXT_DEPTH: usize = 16;
