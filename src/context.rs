//! The per-instance module image.

use crate::{
    func::{ExternFuncRef, FuncMeta, FuncType, ImportMeta},
    memory::LinearMemory,
    memory_units::Pages,
    segment::{DataSegment, ElemSegment},
    table::Table,
};
use std::sync::Arc;
use wasm5_core::{TrapCode, UntypedValue};

/// Default capacity of the spectest output buffer in bytes.
const DEFAULT_OUTPUT_CAPACITY: usize = 64 * 1024;

/// A bounded byte buffer capturing the output of the spectest print
/// handlers.
///
/// Appends beyond the capacity are silently truncated; the test driver
/// compares the captured bytes against expectations.
#[derive(Debug)]
pub struct OutputBuffer {
    buf: Vec<u8>,
    capacity: usize,
}

impl OutputBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Vec::new(),
            capacity,
        }
    }

    /// Appends `bytes`, truncating at the capacity bound.
    pub fn append(&mut self, bytes: &[u8]) {
        let room = self.capacity - self.buf.len();
        let take = bytes.len().min(room);
        self.buf.extend_from_slice(&bytes[..take]);
    }

    /// The captured output so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Discards the captured output.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// How a combined function index resolves within a context.
///
/// The combined index space lists imported functions first, the module's
/// own functions second, and linker-appended external funcrefs last; table
/// entries and tagged funcref slots both use it.
#[derive(Debug, Copy, Clone)]
pub(crate) enum FuncKind {
    Import(usize),
    Defined(usize),
    Extern(usize),
}

/// The runtime context of one instantiated module.
///
/// Everything the interpreter reads while this instance is active lives
/// here: the code stream, globals, linear memory, tables, function and
/// import metadata, passive segments and the spectest output buffer. The
/// image is immutable after instantiation except for the fields that are
/// mutable by design: global values, memory and table sizes, droppable
/// segments and the output buffer.
#[derive(Debug)]
pub struct RuntimeContext {
    pub(crate) code: Arc<[u64]>,
    pub(crate) globals: Vec<UntypedValue>,
    pub(crate) memory: LinearMemory,
    pub(crate) tables: Vec<Table>,
    pub(crate) types: Vec<FuncType>,
    pub(crate) funcs: Vec<FuncMeta>,
    pub(crate) imports: Vec<ImportMeta>,
    pub(crate) extern_funcrefs: Vec<ExternFuncRef>,
    pub(crate) data_segments: Vec<DataSegment>,
    pub(crate) elem_segments: Vec<ElemSegment>,
    pub(crate) output: OutputBuffer,
}

impl RuntimeContext {
    /// Starts building a context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// The captured spectest output.
    pub fn output(&self) -> &[u8] {
        self.output.as_bytes()
    }

    /// Discards the captured spectest output.
    pub fn clear_output(&mut self) {
        self.output.clear()
    }

    /// Read access to the linear memory.
    pub fn memory(&self) -> &LinearMemory {
        &self.memory
    }

    /// Write access to the linear memory.
    ///
    /// The loader uses this to apply active data segments at
    /// instantiation; it is also the driver's way to stage guest buffers.
    pub fn memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.memory
    }

    /// Read access to a global value.
    pub fn global(&self, index: usize) -> UntypedValue {
        self.globals[index]
    }

    /// Read access to a table.
    pub fn table(&self, index: usize) -> &Table {
        &self.tables[index]
    }

    /// Write access to a table.
    ///
    /// The loader uses this to apply active element segments at
    /// instantiation.
    pub fn table_mut(&mut self, index: usize) -> &mut Table {
        &mut self.tables[index]
    }

    /// Number of imported functions, the base of the defined-function
    /// index range.
    pub fn num_imported_funcs(&self) -> usize {
        self.imports.len()
    }

    /// The code-stream entry of a defined function.
    ///
    /// Drivers resolve exported function indices to entry pcs through
    /// this.
    pub fn func_entry(&self, func_idx: usize) -> Option<usize> {
        self.funcs.get(func_idx).map(|meta| meta.entry)
    }

    /// Replaces an import's resolution.
    ///
    /// Linking mutually importing modules needs both contexts registered
    /// before either can name the other, so the loader registers first
    /// and resolves afterwards.
    pub fn resolve_import(&mut self, import_idx: usize, target: crate::func::ImportTarget) {
        self.imports[import_idx].target = target;
    }

    pub(crate) fn resolve_func(&self, index: usize) -> Option<FuncKind> {
        let num_imports = self.imports.len();
        let num_funcs = self.funcs.len();
        if index < num_imports {
            Some(FuncKind::Import(index))
        } else if index < num_imports + num_funcs {
            Some(FuncKind::Defined(index - num_imports))
        } else if index < num_imports + num_funcs + self.extern_funcrefs.len() {
            Some(FuncKind::Extern(index - num_imports - num_funcs))
        } else {
            None
        }
    }

    /// The `memory.init` operation; split off here so the segment read and
    /// the memory write can borrow different fields.
    pub(crate) fn memory_init(
        &mut self,
        data_idx: usize,
        dst: u64,
        src: u64,
        len: u64,
    ) -> Result<(), TrapCode> {
        let segment = self
            .data_segments
            .get(data_idx)
            .ok_or(TrapCode::OutOfBoundsMemory)?;
        self.memory.init(dst, segment.bytes(), src, len)
    }

    /// The `table.init` operation.
    pub(crate) fn table_init(
        &mut self,
        table_idx: usize,
        elem_idx: usize,
        dst: u64,
        src: u64,
        len: u64,
    ) -> Result<(), TrapCode> {
        let segment = self
            .elem_segments
            .get(elem_idx)
            .ok_or(TrapCode::TableBoundsAccess)?;
        let table = self
            .tables
            .get_mut(table_idx)
            .ok_or(TrapCode::TableBoundsAccess)?;
        table.init(dst, segment.elems(), src, len)
    }

    /// The `table.copy` operation, between possibly distinct tables.
    pub(crate) fn table_copy(
        &mut self,
        dst_table: usize,
        src_table: usize,
        dst: u64,
        src: u64,
        len: u64,
    ) -> Result<(), TrapCode> {
        if dst_table.max(src_table) >= self.tables.len() {
            return Err(TrapCode::TableBoundsAccess);
        }
        if dst_table == src_table {
            return self.tables[dst_table].copy_within(dst, src, len);
        }
        // Distinct indices; split the slice to borrow both tables.
        let (lo, hi) = self.tables.split_at_mut(dst_table.max(src_table));
        let (dst_ref, src_ref) = if dst_table < src_table {
            (&mut lo[dst_table], &hi[0])
        } else {
            (&mut hi[0], &lo[src_table])
        };
        dst_ref.copy_from(dst, src_ref, src, len)
    }
}

/// Builder assembling a [`RuntimeContext`] from the compiler's output.
///
/// This is the Rust face of `create_runtime_context`: the loader feeds it
/// the code stream, entities and segments and registers the result with
/// the [`Store`](crate::Store).
#[derive(Debug, Default)]
pub struct ContextBuilder {
    code: Vec<u64>,
    globals: Vec<UntypedValue>,
    memory: Option<LinearMemory>,
    tables: Vec<Table>,
    types: Vec<FuncType>,
    funcs: Vec<FuncMeta>,
    imports: Vec<ImportMeta>,
    extern_funcrefs: Vec<ExternFuncRef>,
    data_segments: Vec<DataSegment>,
    elem_segments: Vec<ElemSegment>,
    output_capacity: Option<usize>,
}

impl ContextBuilder {
    /// Sets the threaded code stream.
    pub fn code(mut self, code: Vec<u64>) -> Self {
        self.code = code;
        self
    }

    /// Appends a global with its initial value.
    pub fn global(mut self, value: impl Into<UntypedValue>) -> Self {
        self.globals.push(value.into());
        self
    }

    /// Sets the linear memory limits in pages.
    pub fn memory(mut self, initial: usize, maximum: usize) -> Self {
        self.memory = Some(LinearMemory::new(Pages(initial), Pages(maximum)));
        self
    }

    /// Appends a table with the given element limits.
    pub fn table(mut self, initial: u32, maximum: u32) -> Self {
        self.tables.push(Table::new(initial, maximum));
        self
    }

    /// Appends a function type; returns `self` with the type recorded in
    /// declaration order.
    pub fn func_type(mut self, ty: FuncType) -> Self {
        self.types.push(ty);
        self
    }

    /// Appends a defined function's metadata.
    pub fn func(mut self, entry: usize, num_locals: usize, type_idx: usize) -> Self {
        self.funcs.push(FuncMeta {
            entry,
            num_locals,
            type_idx,
        });
        self
    }

    /// Appends an import record.
    pub fn import(mut self, import: ImportMeta) -> Self {
        self.imports.push(import);
        self
    }

    /// Appends an external funcref binding.
    pub fn extern_funcref(mut self, extern_ref: ExternFuncRef) -> Self {
        self.extern_funcrefs.push(extern_ref);
        self
    }

    /// Appends a passive data segment.
    pub fn data_segment(mut self, bytes: impl Into<Box<[u8]>>) -> Self {
        self.data_segments.push(DataSegment::new(bytes));
        self
    }

    /// Appends a passive element segment.
    pub fn elem_segment(mut self, elems: impl Into<Box<[i32]>>) -> Self {
        self.elem_segments.push(ElemSegment::new(elems));
        self
    }

    /// Overrides the spectest output buffer capacity.
    pub fn output_capacity(mut self, capacity: usize) -> Self {
        self.output_capacity = Some(capacity);
        self
    }

    /// Finishes the context.
    pub fn build(self) -> RuntimeContext {
        RuntimeContext {
            code: self.code.into(),
            globals: self.globals,
            memory: self
                .memory
                .unwrap_or_else(|| LinearMemory::new(Pages(0), Pages(0))),
            tables: self.tables,
            types: self.types,
            funcs: self.funcs,
            imports: self.imports,
            extern_funcrefs: self.extern_funcrefs,
            data_segments: self.data_segments,
            elem_segments: self.elem_segments,
            output: OutputBuffer::new(self.output_capacity.unwrap_or(DEFAULT_OUTPUT_CAPACITY)),
        }
    }
}
