//! Small local cleanup passes and value-numbering.
//!
//! `store_comb` (constant-array store coalescing), `gvn` (local value
//! numbering, a generalization grounded in the original `memlvn.cpp`
//! scalar-load-value-numbering pass — supplemented here to cover binary
//! ops too, see SPEC_FULL.md §3), `undef_prop`, `branch_simp`, `blk_merge`,
//! and `dirty_conv`.

use std::collections::HashMap;

use crate::analysis::Constant;
use crate::module::Module;
use crate::passes::{BlockPass, FunctionPass, PassInfo, Stage, StageSet};
use crate::value::{BinOp, Linkage, ValueId, ValueKind};

/// Structural key for value-numbering pure instructions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum VnKey {
    Binary(u8, ValueId, ValueId),
    Unary(u8, ValueId),
    Cast(ValueId, crate::types::TypeId),
    Load(ValueId),
}

fn bin_tag(op: BinOp) -> u8 {
    op as u8
}

fn vn_key(module: &Module, inst: ValueId) -> Option<VnKey> {
    match &module.get(inst).kind {
        ValueKind::Binary { op, lhs, rhs } if op.is_commutative() && lhs > rhs => {
            Some(VnKey::Binary(bin_tag(*op), *rhs, *lhs))
        }
        ValueKind::Binary { op, lhs, rhs } => Some(VnKey::Binary(bin_tag(*op), *lhs, *rhs)),
        ValueKind::Unary { op, opr } => Some(VnKey::Unary(*op as u8, *opr)),
        ValueKind::Cast { opr } => Some(VnKey::Cast(*opr, module.type_of(inst)?)),
        ValueKind::Load { ptr } => Some(VnKey::Load(*ptr)),
        _ => None,
    }
}

/// Local GVN: a single forward pass per block, conservatively invalidating
/// all tracked loads on any Store or Call (no alias analysis, matching the
/// `dse`/`store_comb` no-alias assumption).
pub struct GvnPass;

impl BlockPass for GvnPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "gvn",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool {
        let mut table: HashMap<VnKey, ValueId> = HashMap::new();
        let mut changed = false;
        for inst in module.block_body(block).insts.clone() {
            if module.is_erased(inst) {
                continue;
            }
            if matches!(module.get(inst).kind, ValueKind::Store { .. } | ValueKind::Call { .. }) {
                table.retain(|k, _| !matches!(k, VnKey::Load(_)));
                continue;
            }
            let key = match vn_key(module, inst) {
                Some(k) => k,
                None => continue,
            };
            if let Some(&existing) = table.get(&key) {
                module.replace_by(inst, existing);
                module.erase(inst);
                module.block_body_mut(block).insts.retain(|&i| i != inst);
                changed = true;
            } else {
                table.insert(key, inst);
            }
        }
        changed
    }
}

/// Combines a complete run of constant element-stores into a local array
/// into one `ConstArray` store.
pub struct StoreCombPass;

impl BlockPass for StoreCombPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "store_comb",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &["gvn"],
            invalidates: &[],
        }
    }

    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool {
        // Per array base, the element stores seen so far: `(constant value,
        // the store instruction that wrote it)`. Once every slot is filled
        // the last store is rewritten to hold the whole `ConstArray` and
        // every other tracked store is erased, so the run really does
        // collapse to a single store rather than leaving the N-1 earlier
        // element stores dangling.
        let mut pending: HashMap<ValueId, Vec<Option<(ValueId, ValueId)>>> = HashMap::new();
        let mut changed = false;
        for inst in module.block_body(block).insts.clone() {
            if module.is_erased(inst) {
                continue;
            }
            match module.get(inst).kind.clone() {
                ValueKind::Store { value, ptr } => {
                    let elem_access = if let ValueKind::ElemAccess { ptr: base, index } = &module.get(ptr).kind {
                        Some((*base, *index))
                    } else {
                        None
                    };
                    if let Some((base, index)) = elem_access {
                        if let (Some(idx), true) = (Constant::int_value(module, index), module.get(value).kind.is_constant()) {
                            let arr_ty = module.types.pointee(module.type_of(base).unwrap()).unwrap();
                            if let Some((_, len)) = module.types.array_info(arr_ty) {
                                let slots = pending.entry(base).or_insert_with(|| vec![None; len]);
                                if (idx as usize) < slots.len() {
                                    slots[idx as usize] = Some((value, inst));
                                    if slots.iter().all(Option::is_some) {
                                        let elems: Vec<ValueId> = slots.iter().map(|s| s.unwrap().0).collect();
                                        let store_insts: Vec<ValueId> = slots.iter().map(|s| s.unwrap().1).collect();
                                        let combined = module.get_array(elems, arr_ty);
                                        module.get_mut(inst).kind = ValueKind::Store { value: combined, ptr: base };
                                        for prev in store_insts {
                                            if prev != inst {
                                                module.erase(prev);
                                                module.block_body_mut(block).insts.retain(|&i| i != prev);
                                            }
                                        }
                                        pending.remove(&base);
                                        changed = true;
                                    }
                                    continue;
                                }
                            }
                        }
                    }
                    pending.clear();
                }
                ValueKind::Load { .. } | ValueKind::Call { .. } => pending.clear(),
                _ => {}
            }
        }
        changed
    }
}

pub struct UndefPropPass;

impl BlockPass for UndefPropPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "undef_prop",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool {
        let mut changed = false;
        for inst in module.block_body(block).insts.clone() {
            if module.is_erased(inst) {
                continue;
            }
            let is_undef = |m: &Module, v: ValueId| matches!(m.get(v).kind, ValueKind::Undef);
            match module.get(inst).kind.clone() {
                ValueKind::Binary { op, lhs, rhs } if is_undef(module, lhs) || is_undef(module, rhs) => {
                    let ty = module.type_of(inst).unwrap();
                    let replacement = match op {
                        BinOp::Mul | BinOp::And | BinOp::UDiv | BinOp::SDiv | BinOp::URem | BinOp::SRem => {
                            Some(module.get_zero(ty))
                        }
                        BinOp::Or => Some(module.get_int(u32::MAX, ty)),
                        BinOp::Xor if lhs == rhs => Some(module.get_zero(ty)),
                        _ => None,
                    };
                    if let Some(r) = replacement {
                        module.replace_by(inst, r);
                        module.erase(inst);
                        module.block_body_mut(block).insts.retain(|&i| i != inst);
                        changed = true;
                    }
                }
                ValueKind::Branch { cond, .. } if is_undef(module, cond) => {
                    let zero = module.get_int32(0);
                    module.get_mut(inst).kind.set_operand(0, zero);
                    changed = true;
                }
                _ => {}
            }
        }
        changed
    }
}

pub struct BranchSimpPass;

impl BlockPass for BranchSimpPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "branch_simp",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool {
        let term = match module.terminator_of(block) {
            Some(t) => t,
            None => return false,
        };
        if let ValueKind::Branch { true_bb, false_bb, .. } = &module.get(term).kind {
            let (true_bb, false_bb) = (*true_bb, *false_bb);
            if true_bb == false_bb {
                module.erase(term);
                module.block_body_mut(block).insts.retain(|&i| i != term);
                module.set_insert_point(block);
                module.create_jump(true_bb);
                return true;
            }
        }
        false
    }
}

pub struct BlkMergePass;

impl FunctionPass for BlkMergePass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "blk_merge",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &["dom_info", "loop_info"],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let mut changed = false;
        loop {
            let mut merged_this_round = false;
            let blocks = module.function_body(func).blocks.clone();
            for &block in &blocks {
                let succs = module.successors(block);
                if succs.len() != 1 {
                    continue;
                }
                let succ = succs[0];
                if succ == block || module.predecessors(succ).len() != 1 {
                    continue;
                }
                if module.block_body(succ).insts.iter().any(|&i| matches!(module.get(i).kind, ValueKind::Phi { .. })) {
                    continue;
                }
                let term = module.terminator_of(block).unwrap();
                module.erase(term);
                module.block_body_mut(block).insts.retain(|&i| i != term);
                let succ_insts = module.block_body(succ).insts.clone();
                for inst in succ_insts {
                    module.block_body_mut(block).insts.push(inst);
                }
                for target in module.successors(succ).to_vec() {
                    module.block_body_mut(target).preds.retain(|&p| p != succ);
                    module.block_body_mut(target).preds.push(block);
                }
                module.function_body_mut(func).blocks.retain(|&b| b != succ);
                module.erase(succ);
                merged_this_round = true;
                changed = true;
            }
            if !merged_this_round {
                break;
            }
        }
        changed
    }
}

/// Rewrites calls to `starttime`/`stoptime` into `_sysy_starttime(line)` /
/// `_sysy_stoptime(line)`, synthesizing the extern declaration on first use.
pub struct DirtyConvPass;

impl FunctionPass for DirtyConvPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "dirty_conv",
            is_analysis: false,
            min_opt_level: 0,
            stages: StageSet::single(Stage::PreOpt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let mut changed = false;
        for &block in &module.function_body(func).blocks.clone() {
            for inst in module.block_body(block).insts.clone() {
                if module.is_erased(inst) {
                    continue;
                }
                let (callee, line) = match module.get(inst).kind.clone() {
                    ValueKind::Call { callee, .. } => (callee, module.loc_of(inst).line),
                    _ => continue,
                };
                let name = match &module.get(callee).kind {
                    ValueKind::Function { name, .. } => name.clone(),
                    _ => continue,
                };
                let replacement_name = match name.as_str() {
                    "starttime" => Some("_sysy_starttime"),
                    "stoptime" => Some("_sysy_stoptime"),
                    _ => None,
                };
                if let Some(replacement_name) = replacement_name {
                    let target = find_or_declare_timer(module, replacement_name);
                    let line_arg = module.get_int32(line);
                    module.get_mut(inst).kind = ValueKind::Call { callee: target, args: vec![line_arg] };
                    changed = true;
                }
            }
        }
        changed
    }
}

fn find_or_declare_timer(module: &mut Module, name: &str) -> ValueId {
    for &f in &module.functions {
        if let ValueKind::Function { name: n, .. } = &module.get(f).kind {
            if n == name {
                return f;
            }
        }
    }
    let i32_ty = module.types.i32();
    let fn_ty = module.types.function(vec![i32_ty], module.types.void(), false);
    module.create_function(Linkage::External, name.to_string(), fn_ty)
}
