//! SSA construction and demotion: `mem2reg`, `phi_simp`, `reg2mem`.

use std::collections::HashMap;

use crate::analysis::ParentScanner;
use crate::module::Module;
use crate::passes::{FunctionPass, PassInfo, Stage, StageSet};
use crate::value::{Loc, Value, ValueId, ValueKind};

/// An alloca is promotable when every use is a direct Load or Store (never
/// the pointer operand of an Access/Cast, never passed to a Call).
fn is_promotable(module: &Module, alloca: ValueId) -> bool {
    let ty = module.type_of(alloca).unwrap();
    let pointee = module.types.pointee(ty).unwrap();
    if module.types.is_aggregate(pointee) {
        return false;
    }
    module.users_of(alloca).iter().all(|&(user, idx)| match &module.get(user).kind {
        ValueKind::Load { .. } => true,
        ValueKind::Store { .. } => idx == 1, // operand 1 is the pointer; operand 0 the stored value
        _ => false,
    })
}

struct Mem2Reg {
    current_def: HashMap<(ValueId, ValueId), ValueId>, // (block, alloca) -> value
    incomplete_phis: HashMap<(ValueId, ValueId), ValueId>,
    sealed: std::collections::HashSet<ValueId>,
}

impl Mem2Reg {
    fn new() -> Self {
        Self { current_def: HashMap::new(), incomplete_phis: HashMap::new(), sealed: std::collections::HashSet::new() }
    }

    fn write_variable(&mut self, block: ValueId, alloca: ValueId, value: ValueId) {
        self.current_def.insert((block, alloca), value);
    }

    fn read_variable(&mut self, module: &mut Module, block: ValueId, alloca: ValueId) -> ValueId {
        if let Some(&v) = self.current_def.get(&(block, alloca)) {
            return v;
        }
        self.read_variable_recursive(module, block, alloca)
    }

    fn read_variable_recursive(&mut self, module: &mut Module, block: ValueId, alloca: ValueId) -> ValueId {
        let preds = module.predecessors(block).to_vec();
        let val = if preds.len() == 1 {
            self.read_variable(module, preds[0], alloca)
        } else {
            let ty = module.types.pointee(module.type_of(alloca).unwrap()).unwrap();
            let phi = module.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Phi { operands: Vec::new() }));
            module.block_body_mut(block).insts.insert(0, phi);
            self.write_variable(block, alloca, phi);
            if preds.is_empty() {
                module.diagnostics.warn(Loc::UNKNOWN, "using uninitialized variable");
                let undef = module.get_undef(ty);
                module.replace_by(phi, undef);
                undef
            } else {
                for &p in &preds {
                    let incoming = self.read_variable(module, p, alloca);
                    let opr = module.create_phi_operand(incoming, p);
                    module.append_phi_operand(phi, opr);
                }
                try_remove_trivial_phi(module, phi).unwrap_or(phi)
            }
        };
        self.write_variable(block, alloca, val);
        val
    }
}

/// Collapses `phi` if all its non-self operands are equal, returning the
/// replacement value. Recursively simplifies phi users that may themselves
/// become trivial, per Braun/Buchwald.
pub fn try_remove_trivial_phi(module: &mut Module, phi: ValueId) -> Option<ValueId> {
    let operands = match &module.get(phi).kind {
        ValueKind::Phi { operands } => operands.clone(),
        _ => return None,
    };
    let mut same: Option<ValueId> = None;
    for &opr in &operands {
        let value = match &module.get(opr).kind {
            ValueKind::PhiOperand { value, .. } => *value,
            _ => opr,
        };
        if value == phi {
            continue; // self-reference
        }
        match same {
            Some(s) if s == value => {}
            Some(_) => return None, // more than one distinct value: not trivial
            None => same = Some(value),
        }
    }
    let replacement = match same {
        Some(v) => v,
        None => {
            module.diagnostics.warn(Loc::UNKNOWN, "phi with no non-self operands");
            let ty = module.type_of(phi).unwrap();
            module.get_undef(ty)
        }
    };

    let users: Vec<ValueId> = module.users_of(phi).iter().map(|&(u, _)| u).collect();
    module.replace_by(phi, replacement);
    module.erase(phi);
    for u in users {
        if u != phi && matches!(module.try_get(u).map(|v| &v.kind), Some(ValueKind::Phi { .. })) {
            try_remove_trivial_phi(module, u);
        }
    }
    Some(replacement)
}

pub struct Mem2RegPass;

impl FunctionPass for Mem2RegPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "mem2reg",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Promote),
            requires: &[],
            invalidates: &["dom_info"],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let blocks = module.function_body(func).blocks.clone();
        if blocks.is_empty() {
            return false;
        }
        let entry = blocks[0];
        let allocas: Vec<ValueId> = module
            .block_body(entry)
            .insts
            .iter()
            .copied()
            .filter(|&i| matches!(module.get(i).kind, ValueKind::Alloca) && is_promotable(module, i))
            .collect();
        if allocas.is_empty() {
            return false;
        }

        let mut state = Mem2Reg::new();
        state.sealed.extend(blocks.iter().copied());

        for &block in &blocks {
            let insts = module.block_body(block).insts.clone();
            for inst in insts {
                if module.is_erased(inst) {
                    continue;
                }
                match module.get(inst).kind.clone() {
                    ValueKind::Store { value, ptr } if allocas.contains(&ptr) => {
                        state.write_variable(block, ptr, value);
                        module.erase(inst);
                        module.block_body_mut(block).insts.retain(|&i| i != inst);
                    }
                    ValueKind::Load { ptr } if allocas.contains(&ptr) => {
                        let replacement = state.read_variable(module, block, ptr);
                        module.replace_by(inst, replacement);
                        module.erase(inst);
                        module.block_body_mut(block).insts.retain(|&i| i != inst);
                    }
                    _ => {}
                }
            }
        }

        for &alloca in &allocas {
            if module.user_count(alloca) == 0 {
                module.erase(alloca);
                module.block_body_mut(entry).insts.retain(|&i| i != alloca);
            }
        }
        true
    }
}

pub struct PhiSimpPass;

impl FunctionPass for PhiSimpPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "phi_simp",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Promote),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let mut changed = false;
        for &block in &module.function_body(func).blocks {
            let phis: Vec<ValueId> = module
                .block_body(block)
                .insts
                .iter()
                .copied()
                .filter(|&i| matches!(module.try_get(i).map(|v| &v.kind), Some(ValueKind::Phi { .. })))
                .collect();
            for phi in phis {
                if module.is_erased(phi) {
                    continue;
                }
                if try_remove_trivial_phi(module, phi).is_some() {
                    changed = true;
                }
            }
        }
        changed
    }
}

/// Splits the edge `pred -> succ` with a fresh block containing only a
/// jump, used to break critical edges before reg2mem.
fn split_edge(module: &mut Module, func: ValueId, pred: ValueId, succ: ValueId) -> ValueId {
    let split = module.create_block(func, format!("crit_edge.{}.{}", pred.index(), succ.index()));
    // Reroute pred's terminator target from succ to split.
    if let Some(term) = module.terminator_of(pred) {
        let idx = module.get(term).kind.operands().iter().position(|&o| o == succ);
        if let Some(idx) = idx {
            module.get_mut(term).kind.set_operand(idx, split);
        }
    }
    module.block_body_mut(succ).preds.retain(|&p| p != pred);
    module.block_body_mut(succ).preds.push(split);
    module.block_body_mut(split).preds.push(pred);
    module.set_insert_point(split);
    module.create_jump(succ);
    split
}

pub struct Reg2MemPass;

impl FunctionPass for Reg2MemPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "reg2mem",
            is_analysis: false,
            min_opt_level: 0,
            stages: StageSet::single(Stage::Demote),
            requires: &[],
            invalidates: &["dom_info", "loop_info"],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        // Break critical edges.
        let blocks = module.function_body(func).blocks.clone();
        for &block in &blocks {
            let succs = module.successors(block);
            if succs.len() > 1 {
                for succ in succs {
                    if module.predecessors(succ).len() > 1 {
                        split_edge(module, func, block, succ);
                    }
                }
            }
        }

        let mut changed = false;
        let blocks = module.function_body(func).blocks.clone();
        let entry = blocks[0];
        let parents = ParentScanner::scan(module);

        for &block in &blocks {
            let insts = module.block_body(block).insts.clone();
            for inst in insts {
                if module.is_erased(inst) {
                    continue;
                }
                let is_phi = matches!(module.get(inst).kind, ValueKind::Phi { .. });
                let escapes = module.users_of(inst).iter().any(|&(u, _)| parents.block_of(u) != Some(block));
                if !is_phi && !escapes {
                    continue;
                }
                let ty = match module.type_of(inst) {
                    Some(t) => t,
                    None => continue,
                };
                module.set_insert_point(entry);
                module.set_insert_point_before(entry, 0);
                let slot = module.create_alloca(ty);

                if is_phi {
                    let operands = match module.get(inst).kind.clone() {
                        ValueKind::Phi { operands } => operands,
                        _ => unreachable!(),
                    };
                    for opr in operands {
                        if let ValueKind::PhiOperand { value, block: incoming } = module.get(opr).kind {
                            let term = module.terminator_of(incoming);
                            let pos = term.map(|t| {
                                module.block_body(incoming).insts.iter().position(|&i| i == t).unwrap()
                            });
                            module.set_insert_point(incoming);
                            if let Some(p) = pos {
                                module.set_insert_point_before(incoming, p);
                            }
                            module.create_store(value, slot);
                        }
                    }
                    let users: Vec<(ValueId, usize)> = module.users_of(inst).to_vec();
                    for (user, _) in users {
                        let user_block = parents.block_of(user).unwrap_or(block);
                        module.set_insert_point(user_block);
                        let pos = module.block_body(user_block).insts.iter().position(|&i| i == user).unwrap_or(0);
                        module.set_insert_point_before(user_block, pos);
                        let load = module.create_load(slot);
                        let idx = module.get(user).kind.operands().iter().position(|&o| o == inst);
                        if let Some(idx) = idx {
                            module.get_mut(user).kind.set_operand(idx, load);
                        }
                    }
                    module.erase(inst);
                    module.block_body_mut(block).insts.retain(|&i| i != inst);
                } else {
                    let pos = module.block_body(block).insts.iter().position(|&i| i == inst).unwrap();
                    module.set_insert_point(block);
                    module.set_insert_point_before(block, pos + 1);
                    module.create_store(inst, slot);

                    let users: Vec<(ValueId, usize)> = module
                        .users_of(inst)
                        .iter()
                        .copied()
                        .filter(|&(u, _)| parents.block_of(u) != Some(block))
                        .collect();
                    for (user, idx) in users {
                        let user_block = parents.block_of(user).unwrap();
                        let upos = module.block_body(user_block).insts.iter().position(|&i| i == user).unwrap_or(0);
                        module.set_insert_point(user_block);
                        module.set_insert_point_before(user_block, upos);
                        let load = module.create_load(slot);
                        module.get_mut(user).kind.set_operand(idx, load);
                    }
                }
                changed = true;
            }
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Linkage;

    #[test]
    fn mem2reg_removes_promotable_alloca_with_single_store() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        m.set_insert_point(entry);
        let slot = m.create_alloca(i32_ty);
        let five = m.get_int32(5);
        m.create_store(five, slot);
        let loaded = m.create_load(slot);
        m.create_return(Some(loaded));

        let mut pass = Mem2RegPass;
        assert!(pass.run_on_function(&mut m, f));
        assert!(m.is_erased(slot));
    }

    #[test]
    fn phi_simp_collapses_phi_with_identical_operands() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        let a = m.create_block(f, "a".into());
        let join = m.create_block(f, "join".into());
        m.set_insert_point(entry);
        let cond = m.get_bool(true);
        m.create_branch(cond, a, join);
        m.set_insert_point(a);
        m.create_jump(join);
        let five = m.get_int32(5);
        m.set_insert_point(join);
        let o1 = m.create_phi_operand(five, entry);
        let o2 = m.create_phi_operand(five, a);
        let phi = m.create_phi(vec![o1, o2]);
        m.create_return(Some(phi));

        let mut pass = PhiSimpPass;
        assert!(pass.run_on_function(&mut m, f));
        assert!(m.is_erased(phi));
    }
}
