//! Spectest print handlers and their output formatting.

mod common;

use common::{import_forwarders, run};
use wasm5::{spectest, ImportMeta, ImportTarget, Store, UntypedValue};

fn print_import(handler: u32, num_params: usize) -> ImportMeta {
    ImportMeta {
        num_params,
        num_results: 0,
        target: ImportTarget::Host(handler),
    }
}

#[test]
fn print_i32_then_print_f64() {
    let (context, entries) = import_forwarders(
        vec![
            print_import(spectest::PRINT_I32, 1),
            print_import(spectest::PRINT_F64, 1),
        ],
        |builder| builder,
    );
    let mut store = Store::new();
    let ctx = store.register(context);
    run(&mut store, ctx, entries[0], &[UntypedValue::from(42i32)], 0).unwrap();
    run(&mut store, ctx, entries[1], &[UntypedValue::from(1.0f64)], 0).unwrap();
    assert_eq!(store.context(ctx).output(), b"42 : i32\n1 : f64\n");
}

#[test]
fn print_handles_floats_and_pairs() {
    let (context, entries) = import_forwarders(
        vec![
            print_import(spectest::PRINT_F32, 1),
            print_import(spectest::PRINT_I32_F32, 2),
            print_import(spectest::PRINT_F64_F64, 2),
        ],
        |builder| builder,
    );
    let mut store = Store::new();
    let ctx = store.register(context);
    run(&mut store, ctx, entries[0], &[UntypedValue::from(0.1f32)], 0).unwrap();
    run(
        &mut store,
        ctx,
        entries[1],
        &[UntypedValue::from(7i32), UntypedValue::from(3.5f32)],
        0,
    )
    .unwrap();
    run(
        &mut store,
        ctx,
        entries[2],
        &[UntypedValue::from(1e10f64), UntypedValue::from(-0.5f64)],
        0,
    )
    .unwrap();
    let expected = "0.100000001 : f32\n7 : i32, 3.5 : f32\n10000000000 : f64, -0.5 : f64\n";
    assert_eq!(store.context(ctx).output(), expected.as_bytes());
}

#[test]
fn print_char_emits_byte_and_newline() {
    let (context, entries) = import_forwarders(
        vec![print_import(spectest::PRINT_CHAR, 1)],
        |builder| builder,
    );
    let mut store = Store::new();
    let ctx = store.register(context);
    run(&mut store, ctx, entries[0], &[UntypedValue::from(b'a' as i32)], 0).unwrap();
    run(&mut store, ctx, entries[0], &[UntypedValue::from(b'!' as i32)], 0).unwrap();
    assert_eq!(store.context(ctx).output(), b"a\n!\n");
}

#[test]
fn output_buffer_is_bounded() {
    let (context, entries) = import_forwarders(
        vec![print_import(spectest::PRINT_I32, 1)],
        |builder| builder.output_capacity(10),
    );
    let mut store = Store::new();
    let ctx = store.register(context);
    for _ in 0..10 {
        run(
            &mut store,
            ctx,
            entries[0],
            &[UntypedValue::from(123456i32)],
            0,
        )
        .unwrap();
    }
    assert_eq!(store.context(ctx).output(), b"123456 : i");
}

#[test]
fn clearing_the_output_starts_a_fresh_record() {
    let (context, entries) = import_forwarders(
        vec![print_import(spectest::PRINT_I32, 1)],
        |builder| builder,
    );
    let mut store = Store::new();
    let ctx = store.register(context);
    run(&mut store, ctx, entries[0], &[UntypedValue::from(1i32)], 0).unwrap();
    store.context_mut(ctx).clear_output();
    run(&mut store, ctx, entries[0], &[UntypedValue::from(2i32)], 0).unwrap();
    assert_eq!(store.context(ctx).output(), b"2 : i32\n");
}
