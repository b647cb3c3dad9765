//! Shared helpers for the end-to-end interpreter tests.
//!
//! The parser and compiler are external to this crate, so tests assemble
//! threaded code directly through [`CodeWriter`], the same interface the
//! compiler emits through.

#![allow(dead_code)]

use wasm5::{
    execute,
    CodeWriter,
    ContextId,
    ImportMeta,
    Op,
    RuntimeContext,
    Store,
    TrapCode,
    UntypedValue,
};

/// Runs `entry` of `context` and returns `num_results` result slots.
pub fn run(
    store: &mut Store,
    context: ContextId,
    entry: usize,
    args: &[UntypedValue],
    num_results: usize,
) -> Result<Vec<UntypedValue>, TrapCode> {
    let mut results = vec![UntypedValue::default(); num_results];
    execute(store, context, entry, args, &mut results)?;
    Ok(results)
}

/// Runs a single-result function and returns its result slot.
pub fn run1(
    store: &mut Store,
    context: ContextId,
    entry: usize,
    args: &[UntypedValue],
) -> Result<UntypedValue, TrapCode> {
    run(store, context, entry, args, 1).map(|results| results[0])
}

/// Converts i32 arguments into value slots.
pub fn args_i32(values: &[i32]) -> Vec<UntypedValue> {
    values.iter().map(|&v| UntypedValue::from(v)).collect()
}

/// Builds a context whose `i`-th function forwards its parameters to the
/// `i`-th import and returns the import's results.
///
/// Returns the context (without memory; add via the closure) and the
/// entry pc of each forwarder.
pub fn import_forwarders(
    imports: Vec<ImportMeta>,
    configure: impl FnOnce(wasm5::ContextBuilder) -> wasm5::ContextBuilder,
) -> (RuntimeContext, Vec<usize>) {
    let mut writer = CodeWriter::new();
    let mut entries = Vec::new();
    for (index, import) in imports.iter().enumerate() {
        let np = import.num_params;
        let nr = import.num_results;
        entries.push(writer.pc());
        writer.entry(np, np, 0);
        for slot in 0..np {
            writer.op(Op::LocalGet).imm(slot as u64);
        }
        writer.op(Op::CallImport).imm(index as u64).imm(np as u64);
        writer.end(nr);
    }
    let mut builder = RuntimeContext::builder().code(writer.finish());
    for import in imports {
        builder = builder.import(import);
    }
    let context = configure(builder).build();
    (context, entries)
}
