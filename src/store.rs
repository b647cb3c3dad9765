//! The driver-facing registry owning contexts, the managed heap and the
//! WASI state.

use crate::{context::RuntimeContext, heap::Heap, host::wasi::WasiCtx};

/// Handle of a registered [`RuntimeContext`].
///
/// Import records and external funcref bindings refer to other instances
/// through these handles; the driver obtains them from
/// [`Store::register`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ContextId(pub(crate) usize);

/// Owns every module instance of one embedding, plus the process-wide
/// services they share: the managed heap and the WASI context.
///
/// Cross-module calls re-enter the engine through the store; the nesting
/// depth is tracked here and capped at
/// [`MAX_CONTEXT_DEPTH`](crate::MAX_CONTEXT_DEPTH).
#[derive(Debug)]
pub struct Store {
    contexts: Vec<RuntimeContext>,
    pub(crate) heap: Heap,
    pub(crate) wasi: WasiCtx,
    pub(crate) invocation_depth: usize,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// Creates a store without WASI capabilities.
    ///
    /// WASI handlers invoked through such a store operate on an empty
    /// environment: no arguments, no preopens, stdio only.
    pub fn new() -> Self {
        Self::with_wasi(WasiCtx::default())
    }

    /// Creates a store with the given WASI context.
    pub fn with_wasi(wasi: WasiCtx) -> Self {
        Self {
            contexts: Vec::new(),
            heap: Heap::new(),
            wasi,
            invocation_depth: 0,
        }
    }

    /// Registers a context and returns its handle.
    pub fn register(&mut self, context: RuntimeContext) -> ContextId {
        let id = ContextId(self.contexts.len());
        self.contexts.push(context);
        id
    }

    /// Read access to a registered context.
    pub fn context(&self, id: ContextId) -> &RuntimeContext {
        &self.contexts[id.0]
    }

    /// Write access to a registered context.
    pub fn context_mut(&mut self, id: ContextId) -> &mut RuntimeContext {
        &mut self.contexts[id.0]
    }

    /// The WASI context.
    pub fn wasi(&self) -> &WasiCtx {
        &self.wasi
    }

    /// Write access to the WASI context.
    pub fn wasi_mut(&mut self) -> &mut WasiCtx {
        &mut self.wasi
    }

    /// The managed heap.
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Write access to the managed heap.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Splits out the parts host import handlers operate on: the active
    /// context (guest memory and output buffer) and the WASI state.
    pub(crate) fn host_parts(&mut self, id: ContextId) -> (&mut RuntimeContext, &mut WasiCtx) {
        let Store { contexts, wasi, .. } = self;
        (&mut contexts[id.0], wasi)
    }
}
