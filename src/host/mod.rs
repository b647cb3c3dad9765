//! The host import surface: spectest formatters and the WASI syscall bank.
//!
//! Host handlers are addressed by a small fixed id space baked into import
//! records by the loader: ids 0..=7 are the spectest print handlers, ids
//! 8..=48 the WASI subset. A handler receives its arguments as a window
//! into the operand stack starting at the call's frame offset and writes
//! its results over the same slots.

pub mod spectest;
pub mod wasi;

use crate::store::{ContextId, Store};
use wasm5_core::{TrapCode, UntypedValue};

/// Identifier of a host handler within the import surface.
pub type HandlerId = u32;

/// Dispatches a host import call to its handler.
///
/// `window` holds `max(num_params, num_results)` slots: arguments on
/// entry, results on exit.
pub(crate) fn invoke(
    store: &mut Store,
    context: ContextId,
    handler: HandlerId,
    window: &mut [UntypedValue],
) -> Result<(), TrapCode> {
    let (ctx, wasi_ctx) = store.host_parts(context);
    if handler <= spectest::PRINT_CHAR {
        spectest::invoke(handler, window, &mut ctx.output);
        return Ok(());
    }
    if (wasi::FIRST_HANDLER..=wasi::LAST_HANDLER).contains(&handler) {
        wasi::invoke(handler, window, &mut ctx.memory, wasi_ctx);
        return Ok(());
    }
    log::error!("unknown host handler id {handler}");
    Err(TrapCode::Unreachable)
}
