//! End-to-end scenarios exercising whole slices of the pipeline rather than
//! a single pass in isolation.

use sysyc_mid::pass_dce::AdcePass;
use sysyc_mid::pass_dce::DsePass;
use sysyc_mid::pass_global::GlobalOptPass;
use sysyc_mid::pass_loop::{LoopConvPass, NaiveUnrollPass};
use sysyc_mid::pass_sccp::SccpPass;
use sysyc_mid::pass_ssa::Mem2RegPass;
use sysyc_mid::passes::{BlockPass, FunctionPass, ModulePass};
use sysyc_mid::value::{BinOp, Linkage, ValueKind};
use sysyc_mid::{verify_module, Module};

fn int_const_value(m: &Module, id: sysyc_mid::ValueId) -> Option<u32> {
    match &m.get(id).kind {
        ValueKind::ConstInt(v) => Some(*v),
        _ => None,
    }
}

/// `int x; if (cond) x = 1; else x = 1; return x;` — mem2reg promotes the
/// alloca to a trivial phi (both incoming values are the same constant) and
/// sccp/the trivial-phi removal collapse it straight to the constant.
#[test]
fn constant_folds_across_a_phi_with_identical_incoming_values() {
    let mut m = Module::new();
    let i32_ty = m.types.i32();
    let fn_ty = m.types.function(vec![i32_ty], i32_ty, false);
    let f = m.create_function(Linkage::External, "cond_same_value".into(), fn_ty);
    let entry = m.create_block(f, "entry".into());
    let t = m.create_block(f, "t".into());
    let e = m.create_block(f, "e".into());
    let join = m.create_block(f, "join".into());

    m.set_insert_point(entry);
    let x = m.create_alloca(i32_ty);
    let zero = m.get_int32(0);
    m.create_store(zero, x);
    let cond = m.create_arg_ref(f, 0);
    m.create_branch(cond, t, e);

    m.set_insert_point(t);
    let one = m.get_int32(1);
    m.create_store(one, x);
    m.create_jump(join);

    m.set_insert_point(e);
    m.create_store(one, x);
    m.create_jump(join);

    m.set_insert_point(join);
    let v = m.create_load(x);
    m.create_return(Some(v));

    Mem2RegPass.run_on_function(&mut m, f);
    SccpPass.run_on_function(&mut m, f);

    let ret = *m.block_body(join).insts.last().unwrap();
    let returned = match &m.get(ret).kind {
        ValueKind::Return { value: Some(v) } => *v,
        other => panic!("expected a value-returning return, got {:?}", other),
    };
    assert_eq!(int_const_value(&m, returned), Some(1));
    assert!(verify_module(&m).is_ok());
}

/// `*p = 1; *p = 2;` through the same alloca with no intervening load —
/// dse removes the dead first store, leaving only the store of 2.
#[test]
fn dead_store_elimination_removes_the_overwritten_store() {
    let mut m = Module::new();
    let i32_ty = m.types.i32();
    let fn_ty = m.types.function(vec![], i32_ty, false);
    let f = m.create_function(Linkage::External, "double_store".into(), fn_ty);
    let entry = m.create_block(f, "entry".into());
    m.set_insert_point(entry);
    let x = m.create_alloca(i32_ty);
    let one = m.get_int32(1);
    let two = m.get_int32(2);
    m.create_store(one, x);
    m.create_store(two, x);
    let zero = m.get_int32(0);
    m.create_return(Some(zero));

    DsePass.run_on_block(&mut m, entry);

    let stores: Vec<_> = m
        .block_body(entry)
        .insts
        .iter()
        .copied()
        .filter(|&i| matches!(m.get(i).kind, ValueKind::Store { .. }))
        .collect();
    assert_eq!(stores.len(), 1);
    let remaining_value = match &m.get(stores[0]).kind {
        ValueKind::Store { value, .. } => *value,
        _ => unreachable!(),
    };
    assert_eq!(int_const_value(&m, remaining_value), Some(2));
}

/// `for (i = 0; i < 8; ++i) a[i] = 0;` — loop_conv recognizes the zeroing
/// idiom and replaces the whole loop with a single `memset` call in the
/// preheader, wired straight through to the loop's exit.
#[test]
fn loop_conv_rewrites_array_zeroing_into_a_memset_call() {
    let mut m = Module::new();
    let i32_ty = m.types.i32();
    let fn_ty = m.types.function(vec![], i32_ty, false);
    let f = m.create_function(Linkage::External, "zero_array".into(), fn_ty);
    let entry = m.create_block(f, "entry".into());
    let header = m.create_block(f, "header".into());
    let body = m.create_block(f, "body".into());
    let exit = m.create_block(f, "exit".into());

    let arr_ty = m.types.array(i32_ty, 8, false);
    m.set_insert_point(entry);
    let arr = m.create_alloca(arr_ty);
    m.create_jump(header);

    m.set_insert_point(header);
    let zero = m.get_int32(0);
    let bound = m.get_int32(8);
    let o_init = m.create_phi_operand(zero, entry);
    let placeholder = m.get_undef(i32_ty);
    let o_tail = m.create_phi_operand(placeholder, body);
    let iv = m.create_phi(vec![o_init, o_tail]);
    let cmp = m.create_binary(BinOp::SLt, iv, bound, i32_ty);
    m.create_branch(cmp, body, exit);

    m.set_insert_point(body);
    let elem = m.create_elem_access(arr, iv, i32_ty);
    m.create_store(zero, elem);
    let one = m.get_int32(1);
    let next = m.create_binary(BinOp::Add, iv, one, i32_ty);
    if let ValueKind::Phi { operands } = m.get(iv).kind.clone() {
        m.get_mut(operands[1]).kind = ValueKind::PhiOperand { value: next, block: body };
    }
    m.create_jump(header);

    m.set_insert_point(exit);
    let ret_zero = m.get_int32(0);
    m.create_return(Some(ret_zero));

    let changed = LoopConvPass.run_on_function(&mut m, f);
    assert!(changed, "loop_conv should have recognized the zeroing idiom");

    let entry_insts = m.block_body(entry).insts.clone();
    let has_memset_call = entry_insts.iter().any(|&i| match &m.get(i).kind {
        ValueKind::Call { callee, .. } => matches!(&m.get(*callee).kind, ValueKind::Function { name, .. } if name == "memset"),
        _ => false,
    });
    assert!(has_memset_call, "expected a memset call in the preheader");

    let terminator = *entry_insts.last().unwrap();
    assert!(matches!(m.get(terminator).kind, ValueKind::Jump { target } if target == exit));
    assert!(m.predecessors(exit).contains(&entry));
}

/// `internal int g = 5;` never written — global_opt marks it non-mutable and
/// sccp folds a load of it straight through to the constant.
#[test]
fn global_opt_and_sccp_fold_a_never_written_internal_global() {
    let mut m = Module::new();
    let i32_ty = m.types.i32();
    let five = m.get_int32(5);
    let g = m.create_global_var_init(Linkage::Internal, true, "g".into(), i32_ty, five);

    let fn_ty = m.types.function(vec![], i32_ty, false);
    let f = m.create_function(Linkage::External, "read_g".into(), fn_ty);
    let entry = m.create_block(f, "entry".into());
    m.set_insert_point(entry);
    let v = m.create_load(g);
    m.create_return(Some(v));

    GlobalOptPass.run_on_globals(&mut m);
    assert!(matches!(&m.get(g).kind, ValueKind::GlobalVar { is_var: false, .. }));

    SccpPass.run_on_function(&mut m, f);
    let ret = *m.block_body(entry).insts.last().unwrap();
    let returned = match &m.get(ret).kind {
        ValueKind::Return { value: Some(v) } => *v,
        other => panic!("expected a value-returning return, got {:?}", other),
    };
    assert_eq!(int_const_value(&m, returned), Some(5));
}

/// A call to an external function is a side effect adce must never erase,
/// even though its result is unused.
#[test]
fn adce_preserves_a_call_with_unused_result() {
    let mut m = Module::new();
    let i32_ty = m.types.i32();
    let extern_fn_ty = m.types.function(vec![], i32_ty, false);
    let extern_fn = m.create_function(Linkage::External, "observe".into(), extern_fn_ty);

    let fn_ty = m.types.function(vec![], i32_ty, false);
    let f = m.create_function(Linkage::External, "caller".into(), fn_ty);
    let entry = m.create_block(f, "entry".into());
    m.set_insert_point(entry);
    let call = m.create_call(extern_fn, vec![]);
    let zero = m.get_int32(0);
    m.create_return(Some(zero));

    AdcePass.run_on_function(&mut m, f);

    assert!(!m.is_erased(call));
    assert!(m.block_body(entry).insts.contains(&call));
}

/// `naive_unroll` flags eligibility (trip count within the bound) and then
/// performs the actual block-copying unroll for a small trip count, leaving
/// the loop's header/latch back-edge gone; it stays silent and leaves the
/// loop untouched when the trip count exceeds the cap.
#[test]
fn naive_unroll_flags_small_trip_counts_and_ignores_large_ones() {
    let build_loop = |m: &mut Module, bound_value: u32| -> sysyc_mid::ValueId {
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, format!("loop_{}", bound_value), fn_ty);
        let entry = m.create_block(f, "entry".into());
        let header = m.create_block(f, "header".into());
        let body = m.create_block(f, "body".into());
        let exit = m.create_block(f, "exit".into());
        m.set_insert_point(entry);
        m.create_jump(header);

        m.set_insert_point(header);
        let zero = m.get_int32(0);
        let one = m.get_int32(1);
        let bound = m.get_int32(bound_value);
        let o_init = m.create_phi_operand(zero, entry);
        let placeholder = m.get_undef(i32_ty);
        let o_tail = m.create_phi_operand(placeholder, body);
        let iv = m.create_phi(vec![o_init, o_tail]);
        let cmp = m.create_binary(BinOp::SLt, iv, bound, i32_ty);
        m.create_branch(cmp, body, exit);

        m.set_insert_point(body);
        let next = m.create_binary(BinOp::Add, iv, one, i32_ty);
        if let ValueKind::Phi { operands } = m.get(iv).kind.clone() {
            m.get_mut(operands[1]).kind = ValueKind::PhiOperand { value: next, block: body };
        }
        m.create_jump(header);

        m.set_insert_point(exit);
        m.create_return(Some(zero));
        f
    };

    let mut small = Module::new();
    let f_small = build_loop(&mut small, 8);
    let entry_small = small.function_body(f_small).blocks[0];
    let header_small = small.function_body(f_small).blocks[1];
    let changed = NaiveUnrollPass.run_on_function(&mut small, f_small);
    assert_eq!(small.diagnostics.warning_count(), 1);
    assert!(changed, "a trip count within the cap should be unrolled");
    assert!(
        !small.successors(entry_small).contains(&header_small),
        "the preheader should jump straight into the unrolled chain, not back into the header"
    );
    assert!(verify_module(&small).is_ok());

    let mut large = Module::new();
    let f_large = build_loop(&mut large, 100);
    let changed_large = NaiveUnrollPass.run_on_function(&mut large, f_large);
    assert_eq!(large.diagnostics.warning_count(), 0);
    assert!(!changed_large, "a trip count past the cap must be left alone");
}

/// `for (i = 0; i < 4; ++i) s = s + a[i];` — naive_unroll clones the body
/// four times with `i` substituted by its per-iteration constant, so every
/// `a[i]` access becomes a constant-indexed `ElemAccess` and the running sum
/// is rerouted straight to the value the fourth copy produced; no block
/// still closes a back-edge into the header afterwards.
#[test]
fn naive_unroll_fully_unrolls_a_small_counted_accumulation_loop() {
    let mut m = Module::new();
    let i32_ty = m.types.i32();
    let arr_ty = m.types.array(i32_ty, 4, false);
    let fn_ty = m.types.function(vec![], i32_ty, false);
    let f = m.create_function(Linkage::External, "sum_array".into(), fn_ty);
    let entry = m.create_block(f, "entry".into());
    let header = m.create_block(f, "header".into());
    let body = m.create_block(f, "body".into());
    let exit = m.create_block(f, "exit".into());

    m.set_insert_point(entry);
    let arr = m.create_alloca(arr_ty);
    m.create_jump(header);

    m.set_insert_point(header);
    let zero = m.get_int32(0);
    let one = m.get_int32(1);
    let four = m.get_int32(4);
    let i_init = m.create_phi_operand(zero, entry);
    let i_placeholder = m.get_undef(i32_ty);
    let i_tail = m.create_phi_operand(i_placeholder, body);
    let iv = m.create_phi(vec![i_init, i_tail]);
    let s_init = m.create_phi_operand(zero, entry);
    let s_placeholder = m.get_undef(i32_ty);
    let s_tail = m.create_phi_operand(s_placeholder, body);
    let sum = m.create_phi(vec![s_init, s_tail]);
    let cmp = m.create_binary(BinOp::SLt, iv, four, i32_ty);
    m.create_branch(cmp, body, exit);

    m.set_insert_point(body);
    let elem_ptr = m.create_elem_access(arr, iv, i32_ty);
    let elem = m.create_load(elem_ptr);
    let sum_next = m.create_binary(BinOp::Add, sum, elem, i32_ty);
    if let ValueKind::Phi { operands } = m.get(sum).kind.clone() {
        m.get_mut(operands[1]).kind = ValueKind::PhiOperand { value: sum_next, block: body };
    }
    let iv_next = m.create_binary(BinOp::Add, iv, one, i32_ty);
    if let ValueKind::Phi { operands } = m.get(iv).kind.clone() {
        m.get_mut(operands[1]).kind = ValueKind::PhiOperand { value: iv_next, block: body };
    }
    m.create_jump(header);

    m.set_insert_point(exit);
    m.create_return(Some(sum));

    let changed = NaiveUnrollPass.run_on_function(&mut m, f);
    assert!(changed);
    assert!(verify_module(&m).is_ok());

    // Every surviving ElemAccess into `arr` now uses a plain constant index.
    let elem_accesses: Vec<_> = m
        .function_body(f)
        .blocks
        .iter()
        .flat_map(|&b| m.block_body(b).insts.clone())
        .filter(|&i| !m.is_erased(i))
        .filter(|&i| matches!(m.get(i).kind, ValueKind::ElemAccess { ptr, .. } if ptr == arr))
        .collect();
    assert_eq!(elem_accesses.len(), 4);
    for &i in &elem_accesses {
        if let ValueKind::ElemAccess { index, .. } = m.get(i).kind {
            assert!(matches!(m.get(index).kind, ValueKind::ConstInt(_)));
        }
    }

    // The preheader (`entry`) now jumps straight into the unrolled chain; the
    // original header/body are left behind, unreachable.
    assert!(!m.successors(entry).contains(&header));

    let ret = match m.get(*m.block_body(exit).insts.last().unwrap()).kind.clone() {
        ValueKind::Return { value: Some(v) } => v,
        other => panic!("expected a value-returning return, got {:?}", other),
    };
    assert_ne!(ret, sum, "the return should have been rerouted off the original phi");
}
