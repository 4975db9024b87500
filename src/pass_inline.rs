//! inliner — bounded call-site inlining.

use std::collections::{HashMap, HashSet};

use crate::module::Module;
use crate::passes::{FunctionPass, PassInfo, Stage, StageSet};
use crate::value::{Loc, Value, ValueId, ValueKind};

const MAX_CALLEE_INSTS: usize = 128;
const MAX_CALLER_INSTS: usize = 512;
const MAX_IN_LOOP_CALLEE_BLOCKS: usize = 3;
const MAX_RECURSIVE_INLINES: u32 = 3;

fn inst_count(module: &Module, func: ValueId) -> usize {
    module.function_body(func).blocks.iter().map(|&b| module.block_body(b).insts.len()).sum()
}

fn calls_in(module: &Module, func: ValueId) -> Vec<ValueId> {
    let mut out = Vec::new();
    for &block in &module.function_body(func).blocks {
        for &inst in &module.block_body(block).insts {
            if matches!(module.get(inst).kind, ValueKind::Call { .. }) {
                out.push(inst);
            }
        }
    }
    out
}

/// Detects cross-function recursive cycles via a DFS over the call graph.
fn is_recursive_cycle(module: &Module, caller: ValueId, callee: ValueId) -> bool {
    if caller == callee {
        return true;
    }
    let mut seen = HashSet::new();
    let mut stack = vec![callee];
    while let Some(f) = stack.pop() {
        if !seen.insert(f) {
            continue;
        }
        for call in calls_in(module, f) {
            if let ValueKind::Call { callee: target, .. } = module.get(call).kind {
                if target == caller {
                    return true;
                }
                stack.push(target);
            }
        }
    }
    false
}

/// Copies `callee`'s blocks/instructions into `caller`, splicing them in at
/// `call`'s position, and returns the value the call's uses should be
/// replaced by (or `None` for a void callee).
fn inline_call(module: &mut Module, caller: ValueId, call: ValueId) -> Option<ValueId> {
    let (callee, args) = match module.get(call).kind.clone() {
        ValueKind::Call { callee, args } => (callee, args),
        _ => return None,
    };
    let call_block = crate::analysis::ParentScanner::scan(module).block_of(call)?;
    let call_pos = module.block_body(call_block).insts.iter().position(|&i| i == call)?;

    // Split the caller block at the call site.
    let tail = module.create_block(caller, format!("inline.tail.{}", call.index()));
    let after: Vec<ValueId> = module.block_body(call_block).insts[call_pos + 1..].to_vec();
    module.block_body_mut(call_block).insts.truncate(call_pos + 1);
    for inst in &after {
        module.block_body_mut(tail).insts.push(*inst);
    }
    for succ in module.successors(tail).to_vec() {
        module.block_body_mut(succ).preds.retain(|&p| p != call_block);
        module.block_body_mut(succ).preds.push(tail);
    }

    // Clone the callee's argument bindings and blocks.
    let mut value_map: HashMap<ValueId, ValueId> = HashMap::new();
    for (i, &param) in module.function_body(callee).args.iter().enumerate() {
        value_map.insert(param, args[i]);
    }
    let mut block_map: HashMap<ValueId, ValueId> = HashMap::new();
    let callee_blocks = module.function_body(callee).blocks.clone();
    for &b in &callee_blocks {
        let name = format!("inline.{}.{}", callee.index(), b.index());
        let cloned = module.create_block(caller, name);
        block_map.insert(b, cloned);
    }

    let mut return_values: Vec<(ValueId, ValueId)> = Vec::new();
    let mut hoisted_allocas = Vec::new();
    for &b in &callee_blocks {
        let cloned_block = block_map[&b];
        for &inst in &module.block_body(b).insts.clone() {
            let kind = module.get(inst).kind.clone();
            let remapped = remap_kind(&kind, &value_map, &block_map);
            let ty = module.type_of(inst);
            let new_id = module.alloc(Value::new(ty, Loc::UNKNOWN, remapped));
            value_map.insert(inst, new_id);
            if matches!(kind, ValueKind::Alloca) {
                hoisted_allocas.push(new_id);
            } else {
                module.block_body_mut(cloned_block).insts.push(new_id);
            }
            if let ValueKind::Return { value } = kind {
                if let Some(v) = value {
                    return_values.push((*value_map.get(&v).unwrap_or(&v), cloned_block));
                }
            }
        }
    }

    // Fix up block-operand references inside already-cloned instructions
    // (phi incoming blocks, branch/jump targets) using the finished map.
    for &b in &callee_blocks {
        let cloned_block = block_map[&b];
        for &inst in &module.block_body(cloned_block).insts.clone() {
            let kind = module.get(inst).kind.clone();
            let remapped = remap_kind(&kind, &value_map, &block_map);
            module.get_mut(inst).kind = remapped;
        }
    }

    let entry_clone = block_map[&callee_blocks[0]];
    let entry_pos = hoisted_allocas.len();
    for (i, alloca) in hoisted_allocas.into_iter().enumerate() {
        module.block_body_mut(caller).insts.insert(i, alloca);
        let _ = entry_pos;
    }
    module.set_insert_point(call_block);
    module.create_jump(entry_clone);
    module.block_body_mut(entry_clone).preds.push(call_block);

    // Replace `return`s with jumps to `tail`; collect the merged return
    // value via a phi if there is more than one live return.
    let result = if return_values.is_empty() {
        None
    } else if return_values.len() == 1 {
        Some(return_values[0].0)
    } else {
        let ty = module.type_of(call);
        module.set_insert_point(tail);
        module.set_insert_point_before(tail, 0);
        let mut oprs = Vec::new();
        for (v, b) in &return_values {
            oprs.push(module.create_phi_operand(*v, *b));
        }
        Some(module.create_phi(oprs).tap_type(module, ty))
    };

    for &b in &callee_blocks {
        let cloned_block = block_map[&b];
        if let Some(term) = module.terminator_of(cloned_block) {
            if matches!(module.get(term).kind, ValueKind::Return { .. }) {
                let pos = module.block_body(cloned_block).insts.iter().position(|&i| i == term).unwrap();
                module.block_body_mut(cloned_block).insts.remove(pos);
                module.erase(term);
                module.set_insert_point(cloned_block);
                module.create_jump(tail);
                module.block_body_mut(tail).preds.push(cloned_block);
            }
        }
    }

    module.erase(call);
    module.block_body_mut(call_block).insts.retain(|&i| i != call);
    result
}

trait TapType {
    fn tap_type(self, module: &mut Module, ty: Option<crate::types::TypeId>) -> ValueId;
}

impl TapType for ValueId {
    fn tap_type(self, module: &mut Module, ty: Option<crate::types::TypeId>) -> ValueId {
        module.get_mut(self).ty = ty;
        self
    }
}

fn remap_kind(
    kind: &ValueKind,
    value_map: &HashMap<ValueId, ValueId>,
    block_map: &HashMap<ValueId, ValueId>,
) -> ValueKind {
    let mv = |id: ValueId| -> ValueId {
        *value_map.get(&id).or_else(|| block_map.get(&id)).unwrap_or(&id)
    };
    match kind.clone() {
        ValueKind::Load { ptr } => ValueKind::Load { ptr: mv(ptr) },
        ValueKind::Store { value, ptr } => ValueKind::Store { value: mv(value), ptr: mv(ptr) },
        ValueKind::PtrAccess { ptr, index } => ValueKind::PtrAccess { ptr: mv(ptr), index: mv(index) },
        ValueKind::ElemAccess { ptr, index } => ValueKind::ElemAccess { ptr: mv(ptr), index: mv(index) },
        ValueKind::Binary { op, lhs, rhs } => ValueKind::Binary { op, lhs: mv(lhs), rhs: mv(rhs) },
        ValueKind::Unary { op, opr } => ValueKind::Unary { op, opr: mv(opr) },
        ValueKind::Cast { opr } => ValueKind::Cast { opr: mv(opr) },
        ValueKind::Branch { cond, true_bb, false_bb } => {
            ValueKind::Branch { cond: mv(cond), true_bb: mv(true_bb), false_bb: mv(false_bb) }
        }
        ValueKind::Jump { target } => ValueKind::Jump { target: mv(target) },
        ValueKind::Return { value } => ValueKind::Return { value: value.map(mv) },
        ValueKind::Call { callee, args } => ValueKind::Call { callee, args: args.iter().map(|&a| mv(a)).collect() },
        ValueKind::Phi { operands } => ValueKind::Phi { operands: operands.iter().map(|&o| mv(o)).collect() },
        ValueKind::PhiOperand { value, block } => ValueKind::PhiOperand { value: mv(value), block: mv(block) },
        ValueKind::Select { cond, true_val, false_val } => {
            ValueKind::Select { cond: mv(cond), true_val: mv(true_val), false_val: mv(false_val) }
        }
        other => other,
    }
}

pub struct InlinerPass {
    recursive_inline_count: HashMap<ValueId, u32>,
}

impl InlinerPass {
    pub fn new() -> Self {
        Self { recursive_inline_count: HashMap::new() }
    }
}

impl Default for InlinerPass {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionPass for InlinerPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "inliner",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &["loop_info", "naive_unroll", "loop_conv"],
            invalidates: &["dom_info", "loop_info"],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        if inst_count(module, func) > MAX_CALLER_INSTS {
            return false;
        }
        let mut changed = false;
        let dom = crate::analysis::DominanceInfo::compute(module, func);
        let loops = crate::analysis::LoopInfo::compute(module, func, &dom);

        for call in calls_in(module, func) {
            if module.is_erased(call) {
                continue;
            }
            let callee = match module.get(call).kind {
                ValueKind::Call { callee, .. } => callee,
                _ => continue,
            };
            if module.function_body(callee).blocks.is_empty() {
                continue; // declaration, nothing to inline
            }
            if is_recursive_cycle(module, func, callee) {
                let count = self.recursive_inline_count.entry(callee).or_insert(0);
                if *count >= MAX_RECURSIVE_INLINES {
                    continue;
                }
                *count += 1;
            }
            if inst_count(module, callee) > MAX_CALLEE_INSTS {
                continue;
            }
            let in_loop = loops.loops().iter().any(|l| {
                crate::analysis::ParentScanner::scan(module).block_of(call).map(|b| l.blocks.contains(&b)).unwrap_or(false)
            });
            if in_loop && (module.function_body(callee).blocks.len() > MAX_IN_LOOP_CALLEE_BLOCKS || inst_count(module, callee) > MAX_CALLEE_INSTS) {
                continue;
            }

            if let Some(result) = inline_call(module, func, call) {
                module.replace_by(call, result);
            }
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Linkage;

    #[test]
    fn inlines_a_small_leaf_callee() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![i32_ty], i32_ty, false);
        let callee = m.create_function(Linkage::Internal, "double".into(), fn_ty);
        let cb = m.create_block(callee, "entry".into());
        m.set_insert_point(cb);
        let carg = m.create_arg_ref(callee, 0);
        let doubled = m.create_add(carg, carg);
        m.create_return(Some(doubled));

        let caller_ty = m.types.function(vec![], i32_ty, false);
        let caller = m.create_function(Linkage::External, "main".into(), caller_ty);
        let entry = m.create_block(caller, "entry".into());
        m.set_insert_point(entry);
        let five = m.get_int32(5);
        let call = m.create_call(callee, vec![five]);
        m.create_return(Some(call));

        let mut pass = InlinerPass::new();
        assert!(pass.run_on_function(&mut m, caller));
        assert!(m.is_erased(call));
    }
}
