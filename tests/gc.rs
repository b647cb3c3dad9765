//! Managed heap operations driven through the interpreter.

mod common;

use assert_matches::assert_matches;
use common::{args_i32, run1};
use wasm5::{CodeWriter, Op, RuntimeContext, Store, TrapCode, UntypedValue};

#[test]
fn array_new_get_set_len() {
    let mut writer = CodeWriter::new();
    // f(len, idx, value): a = array.new(init=7, len); a[idx] = value;
    // return a[idx] + array.len(a)
    writer.entry(4, 3, 1);
    writer.op(Op::I32Const).slot(UntypedValue::from(7i32));
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::ArrayNew).imm(0);
    writer.op(Op::LocalSet).imm(3);
    writer.op(Op::LocalGet).imm(3);
    writer.op(Op::LocalGet).imm(1);
    writer.op(Op::LocalGet).imm(2);
    writer.op(Op::ArraySet);
    writer.op(Op::LocalGet).imm(3);
    writer.op(Op::LocalGet).imm(1);
    writer.op(Op::ArrayGet);
    writer.op(Op::LocalGet).imm(3);
    writer.op(Op::ArrayLen);
    writer.op(Op::I32Add);
    writer.end(1);

    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    let result = run1(&mut store, ctx, 0, &args_i32(&[8, 3, 40])).unwrap();
    assert_eq!(i32::from(result), 48);
    assert!(store.heap().num_objects() > 0);

    // Out-of-range element access.
    assert_matches!(
        run1(&mut store, ctx, 0, &args_i32(&[4, 9, 0])),
        Err(TrapCode::OutOfBoundsMemory)
    );
    // Negative length fails at the allocation site.
    assert_matches!(
        run1(&mut store, ctx, 0, &args_i32(&[-1, 0, 0])),
        Err(TrapCode::OutOfBoundsMemory)
    );
}

#[test]
fn array_new_fixed_takes_elements_from_the_stack() {
    let mut writer = CodeWriter::new();
    // a = [x, y, 5]; return a[0] * 100 + a[2]
    writer.entry(2, 2, 0);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::LocalGet).imm(1);
    writer.op(Op::I32Const).slot(UntypedValue::from(5i32));
    writer.op(Op::ArrayNewFixed).imm(0).imm(3);
    writer.op(Op::LocalTee).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(0i32));
    writer.op(Op::ArrayGet);
    writer.op(Op::I32Const).slot(UntypedValue::from(100i32));
    writer.op(Op::I32Mul);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(2i32));
    writer.op(Op::ArrayGet);
    writer.op(Op::I32Add);
    writer.end(1);

    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    let result = run1(&mut store, ctx, 0, &args_i32(&[7, 9])).unwrap();
    assert_eq!(i32::from(result), 705);
}

#[test]
fn array_ops_on_null_trap() {
    let mut writer = CodeWriter::new();
    writer.entry(0, 0, 0);
    writer.op(Op::RefNull);
    writer.op(Op::I32Const).slot(UntypedValue::from(0i32));
    writer.op(Op::ArrayGet);
    writer.end(1);
    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    assert_matches!(run1(&mut store, ctx, 0, &[]), Err(TrapCode::NullReference));
}

#[test]
fn struct_new_get_set() {
    let mut writer = CodeWriter::new();
    // s = struct.new(type 2, fields = {x, y}); s.0 = s.0 + s.1; return s.0
    writer.entry(3, 2, 1);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::LocalGet).imm(1);
    writer.op(Op::StructNew).imm(2).imm(2);
    writer.op(Op::LocalSet).imm(2);
    writer.op(Op::LocalGet).imm(2);
    writer.op(Op::LocalGet).imm(2);
    writer.op(Op::StructGet).imm(0);
    writer.op(Op::LocalGet).imm(2);
    writer.op(Op::StructGet).imm(1);
    writer.op(Op::I32Add);
    writer.op(Op::StructSet).imm(0);
    writer.op(Op::LocalGet).imm(2);
    writer.op(Op::StructGet).imm(0);
    writer.end(1);

    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    let result = run1(&mut store, ctx, 0, &args_i32(&[30, 12])).unwrap();
    assert_eq!(i32::from(result), 42);
}

#[test]
fn struct_get_on_null_traps() {
    let mut writer = CodeWriter::new();
    writer.entry(0, 0, 0);
    writer.op(Op::RefNull);
    writer.op(Op::StructGet).imm(0);
    writer.end(1);
    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    assert_matches!(run1(&mut store, ctx, 0, &[]), Err(TrapCode::NullReference));
}

/// Allocates a thousand arrays while keeping only the even-indexed ones
/// reachable through a global; collections triggered along the way must
/// preserve exactly the reachable data.
#[test]
fn collection_preserves_reachable_arrays() {
    let mut writer = CodeWriter::new();
    // locals: 0 = i, 1 = child, 2 = acc
    writer.entry(3, 0, 3);
    // global0 = keeper = array.new_default(500)
    writer.op(Op::I32Const).slot(UntypedValue::from(500i32));
    writer.op(Op::ArrayNewDefault).imm(1);
    writer.op(Op::GlobalSet).imm(0);
    // fill loop
    let fill_start = writer.pc();
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(1000i32));
    writer.op(Op::I32LtU);
    writer.op(Op::If);
    let fill_exit = writer.reserve_target();
    // child = array.new_default(8)
    writer.op(Op::I32Const).slot(UntypedValue::from(8i32));
    writer.op(Op::ArrayNewDefault).imm(0);
    writer.op(Op::LocalSet).imm(1);
    // if i is even, remember the child and tag it with i
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(1i32));
    writer.op(Op::I32And);
    writer.op(Op::I32Eqz);
    writer.op(Op::If);
    let skip = writer.reserve_target();
    writer.op(Op::LocalGet).imm(1);
    writer.op(Op::I32Const).slot(UntypedValue::from(0i32));
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::ArraySet);
    writer.op(Op::GlobalGet).imm(0);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(1i32));
    writer.op(Op::I32ShrU);
    writer.op(Op::LocalGet).imm(1);
    writer.op(Op::ArraySet);
    let skip_pc = writer.pc();
    writer.patch_target(skip, skip_pc);
    // i += 1
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(1i32));
    writer.op(Op::I32Add);
    writer.op(Op::LocalSet).imm(0);
    writer.op(Op::Br).target(fill_start);
    let fill_done = writer.pc();
    writer.patch_target(fill_exit, fill_done);
    // i = 0; sum loop over keeper
    writer.op(Op::I32Const).slot(UntypedValue::from(0i32));
    writer.op(Op::LocalSet).imm(0);
    let sum_start = writer.pc();
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(500i32));
    writer.op(Op::I32LtU);
    writer.op(Op::If);
    let sum_exit = writer.reserve_target();
    writer.op(Op::LocalGet).imm(2);
    writer.op(Op::GlobalGet).imm(0);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::ArrayGet);
    writer.op(Op::I32Const).slot(UntypedValue::from(0i32));
    writer.op(Op::ArrayGet);
    writer.op(Op::I32Add);
    writer.op(Op::LocalSet).imm(2);
    writer.op(Op::LocalGet).imm(0);
    writer.op(Op::I32Const).slot(UntypedValue::from(1i32));
    writer.op(Op::I32Add);
    writer.op(Op::LocalSet).imm(0);
    writer.op(Op::Br).target(sum_start);
    let sum_done = writer.pc();
    writer.patch_target(sum_exit, sum_done);
    writer.op(Op::LocalGet).imm(2);
    writer.end(1);

    let mut store = Store::new();
    let ctx = store.register(
        RuntimeContext::builder()
            .code(writer.finish())
            .global(0i32)
            .build(),
    );
    let result = run1(&mut store, ctx, 0, &[]).unwrap();
    // Sum of the even numbers below 1000.
    assert_eq!(i32::from(result), 249_500);
    // More than 512 allocations happened, so at least one collection ran;
    // the keeper and its 500 children survive, the odd-indexed arrays are
    // eligible once their conservative stack slots are gone.
    assert!(store.heap().num_objects() >= 501);

    // With the invocation over, nothing roots the keeper any more.
    store.heap_mut().collect();
    assert_eq!(store.heap().num_objects(), 0);
}

#[test]
fn unreachable_objects_are_reclaimed_after_the_run() {
    let mut writer = CodeWriter::new();
    writer.entry(0, 0, 0);
    writer.op(Op::I32Const).slot(UntypedValue::from(4i32));
    writer.op(Op::ArrayNewDefault).imm(0);
    writer.end(1);
    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    let array = run1(&mut store, ctx, 0, &[]).unwrap();
    assert!(store.heap().is_managed(array));
    store.heap_mut().collect();
    assert!(!store.heap().is_managed(array));
    assert_eq!(store.heap().num_objects(), 0);
}

#[test]
fn run_results_copy_out_before_reclamation() {
    // The returned reference is still valid right after the call because
    // no collection has run since; this mirrors how a driver would read
    // result arrays before triggering further allocation.
    let mut writer = CodeWriter::new();
    writer.entry(0, 0, 0);
    writer.op(Op::I32Const).slot(UntypedValue::from(3i32));
    writer.op(Op::I32Const).slot(UntypedValue::from(2i32));
    writer.op(Op::ArrayNew).imm(0);
    writer.end(1);
    let mut store = Store::new();
    let ctx = store.register(RuntimeContext::builder().code(writer.finish()).build());
    let array = run1(&mut store, ctx, 0, &[]).unwrap();
    assert_eq!(store.heap().length(array), Some(2));
    assert_eq!(
        store.heap().get_slot(array, 1),
        Some(UntypedValue::from(3i32))
    );
}
