//! Dead-code elimination family: `dce`, `adce`, `dse`, `dead_global_elim`.

use std::collections::{HashMap, HashSet};

use crate::module::Module;
use crate::passes::{BlockPass, FunctionPass, ModulePass, PassInfo, Stage, StageSet};
use crate::value::{Loc, ValueId, ValueKind};

pub struct DcePass;

impl BlockPass for DcePass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "dce",
            is_analysis: false,
            min_opt_level: 0,
            stages: StageSet::of(&[Stage::PreOpt, Stage::Opt, Stage::PostOpt]),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool {
        let mut changed = false;
        let insts = module.block_body(block).insts.clone();
        for inst in insts {
            if module.is_erased(inst) {
                continue;
            }
            let kind = &module.get(inst).kind;
            if !kind.is_pure() || module.user_count(inst) > 0 {
                continue;
            }
            if matches!(kind, ValueKind::Alloca) {
                module.diagnostics.warn(Loc::UNKNOWN, "unused variable");
            }
            module.erase(inst);
            module.block_body_mut(block).insts.retain(|&i| i != inst);
            changed = true;
        }
        changed
    }
}

pub struct AdcePass;

impl FunctionPass for AdcePass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "adce",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let mut live: HashSet<ValueId> = HashSet::new();
        let mut worklist = Vec::new();
        for &block in &module.function_body(func).blocks {
            for &inst in &module.block_body(block).insts {
                if module.get(inst).kind.has_side_effects() {
                    if live.insert(inst) {
                        worklist.push(inst);
                    }
                }
            }
        }
        while let Some(v) = worklist.pop() {
            for opr in module.get(v).kind.operands() {
                if live.insert(opr) {
                    worklist.push(opr);
                }
            }
        }

        let mut changed = false;
        for &block in &module.function_body(func).blocks {
            let insts = module.block_body(block).insts.clone();
            for inst in insts {
                if module.is_erased(inst) || live.contains(&inst) {
                    continue;
                }
                module.erase(inst);
                module.block_body_mut(block).insts.retain(|&i| i != inst);
                changed = true;
            }
        }
        changed
    }
}

/// Returns the alloca a pointer ultimately derives from, following Cast and
/// Access chains, or `None` if it escapes that shape.
fn alloca_base(module: &Module, mut ptr: ValueId) -> Option<ValueId> {
    loop {
        match &module.get(ptr).kind {
            ValueKind::Alloca => return Some(ptr),
            ValueKind::Cast { opr } => ptr = *opr,
            ValueKind::PtrAccess { ptr: p, .. } | ValueKind::ElemAccess { ptr: p, .. } => ptr = *p,
            _ => return None,
        }
    }
}

pub struct DsePass;

impl BlockPass for DsePass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "dse",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &["store_comb"],
            invalidates: &[],
        }
    }

    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool {
        let mut last_store: HashMap<ValueId, ValueId> = HashMap::new();
        let mut changed = false;
        for inst in module.block_body(block).insts.clone() {
            if module.is_erased(inst) {
                continue;
            }
            match module.get(inst).kind.clone() {
                ValueKind::Store { ptr, .. } => {
                    if let Some(base) = alloca_base(module, ptr) {
                        if let Some(&prev) = last_store.get(&base) {
                            if !module.is_erased(prev) {
                                module.erase(prev);
                                module.block_body_mut(block).insts.retain(|&i| i != prev);
                                changed = true;
                            }
                        }
                        last_store.insert(base, inst);
                    }
                }
                ValueKind::Load { .. } | ValueKind::Call { .. } => last_store.clear(),
                _ => {}
            }
        }
        changed
    }
}

pub struct DeadGlobalElimPass;

impl ModulePass for DeadGlobalElimPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "dead_global_elim",
            is_analysis: false,
            min_opt_level: 0,
            stages: StageSet::of(&[Stage::PreOpt, Stage::Opt]),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_globals(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        let globals = module.globals.clone();
        for g in globals {
            if module.is_erased(g) || module.user_count(g) > 0 {
                continue;
            }
            module.erase(g);
            module.globals.retain(|&x| x != g);
            changed = true;
        }
        changed
    }

    fn run_on_functions(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        let functions = module.functions.clone();
        for f in functions {
            if module.is_erased(f) {
                continue;
            }
            let is_declaration = module.function_body(f).blocks.is_empty();
            let linkage = match &module.get(f).kind {
                ValueKind::Function { linkage, .. } => *linkage,
                _ => continue,
            };
            let unused = module.user_count(f) == 0;
            let removable_definition = matches!(
                linkage,
                crate::value::Linkage::Internal | crate::value::Linkage::Inline
            ) && unused;
            if (is_declaration && unused) || removable_definition {
                for &block in &module.function_body(f).blocks.clone() {
                    for &inst in &module.block_body(block).insts.clone() {
                        module.erase(inst);
                    }
                    module.erase(block);
                }
                module.erase(f);
                module.functions.retain(|&x| x != f);
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
    fn dce_erases_unused_pure_instruction() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        m.set_insert_point(entry);
        let a = m.get_int32(1);
        let b = m.get_int32(2);
        let _unused = m.create_add(a, b);
        let zero = m.get_int32(0);
        m.create_return(Some(zero));

        let mut pass = DcePass;
        assert!(pass.run_on_block(&mut m, entry));
    }

    #[test]
    fn dse_removes_overwritten_store_to_same_alloca() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        m.set_insert_point(entry);
        let slot = m.create_alloca(i32_ty);
        let one = m.get_int32(1);
        let two = m.get_int32(2);
        let first = m.create_store(one, slot);
        m.create_store(two, slot);
        m.create_return(None);

        let mut pass = DsePass;
        assert!(pass.run_on_block(&mut m, entry));
        assert!(m.is_erased(first));
    }

    #[test]
    fn dead_global_elim_drops_unreferenced_internal_global() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let zero = m.get_zero(i32_ty);
        let g = m.create_global_var_init(Linkage::Internal, true, "g".into(), i32_ty, zero);

        let mut pass = DeadGlobalElimPass;
        assert!(pass.run_on_globals(&mut m));
        assert!(m.is_erased(g));
    }
}
