//! Global/local promotion passes: `global_opt`, `gvar_inliner`, `arr_inliner`, `local_prom`.

use crate::module::Module;
use crate::passes::{FunctionPass, ModulePass, PassInfo, Stage, StageSet};
use crate::value::{Linkage, Loc, ValueId, ValueKind};

const MAX_INLINED_GLOBAL_BYTES: u32 = 4 * 1024 * 1024;

fn is_store_target(module: &Module, global: ValueId, mut ptr: ValueId) -> bool {
    loop {
        if ptr == global {
            return true;
        }
        match &module.get(ptr).kind {
            ValueKind::Cast { opr } | ValueKind::PtrAccess { ptr: opr, .. } | ValueKind::ElemAccess { ptr: opr, .. } => {
                ptr = *opr;
            }
            _ => return false,
        }
    }
}

/// True if `global` is ever the ultimate target of a Store, directly or
/// through Access/Cast chains.
fn is_ever_written(module: &Module, global: ValueId) -> bool {
    for &(user, _) in module.users_of(global) {
        match &module.get(user).kind {
            ValueKind::Store { ptr, .. } if is_store_target(module, global, *ptr) => return true,
            ValueKind::Call { args, .. } if args.contains(&global) => return true,
            _ => {}
        }
    }
    false
}

pub struct GlobalOptPass;

impl ModulePass for GlobalOptPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "global_opt",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_globals(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for g in module.globals.clone() {
            let (linkage, is_var) = match &module.get(g).kind {
                ValueKind::GlobalVar { linkage, is_var, .. } => (*linkage, *is_var),
                _ => continue,
            };
            if linkage != Linkage::Internal || !is_var {
                continue;
            }
            if !is_ever_written(module, g) {
                if let ValueKind::GlobalVar { is_var, .. } = &mut module.get_mut(g).kind {
                    *is_var = false;
                }
                changed = true;
            }
        }
        changed
    }

    fn run_on_functions(&mut self, _module: &mut Module) -> bool {
        false
    }
}

/// Materializes an alloca for a global only ever touched from one function,
/// enabling mem2reg to promote it the rest of the way.
fn inline_single_use_global(module: &mut Module, func: ValueId, global: ValueId) -> bool {
    let ptr_ty = module.type_of(global).unwrap();
    let pointee = module.types.pointee(ptr_ty).unwrap();
    let init = match &module.get(global).kind {
        ValueKind::GlobalVar { init, .. } => *init,
        _ => return false,
    };
    let entry = module.function_body(func).blocks[0];
    module.set_insert_point(entry);
    module.set_insert_point_before(entry, 0);
    let slot = module.create_alloca(pointee);
    if let Some(init) = init {
        module.set_insert_point_before(entry, 1);
        module.create_store(init, slot);
    }
    module.replace_by(global, slot);
    true
}

pub struct GvarInlinerPass;

impl FunctionPass for GvarInlinerPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "gvar_inliner",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::of(&[Stage::PreOpt, Stage::Opt]),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let mut changed = false;
        for g in module.globals.clone() {
            let is_scalar = match &module.get(g).kind {
                ValueKind::GlobalVar { .. } => {
                    let ty = module.types.pointee(module.type_of(g).unwrap()).unwrap();
                    !module.types.is_array(ty)
                }
                _ => false,
            };
            if !is_scalar || module.user_count(g) == 0 {
                continue;
            }
            let parents = crate::analysis::ParentScanner::scan(module);
            let all_in_func = module.users_of(g).iter().all(|&(u, _)| {
                parents.function_of(parents.block_of(u).unwrap_or(func)) == Some(func)
            });
            if all_in_func && inline_single_use_global(module, func, g) {
                module.globals.retain(|&x| x != g);
                changed = true;
            }
        }
        changed
    }
}

pub struct ArrInlinerPass;

impl FunctionPass for ArrInlinerPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "arr_inliner",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let mut changed = false;
        for g in module.globals.clone() {
            let pointee = match &module.get(g).kind {
                ValueKind::GlobalVar { .. } => module.types.pointee(module.type_of(g).unwrap()).unwrap(),
                _ => continue,
            };
            if !module.types.is_array(pointee) || module.types.size_of(pointee) > MAX_INLINED_GLOBAL_BYTES {
                continue;
            }
            if module.user_count(g) == 0 {
                continue;
            }
            let parents = crate::analysis::ParentScanner::scan(module);
            let all_in_func = module.users_of(g).iter().all(|&(u, _)| {
                parents.function_of(parents.block_of(u).unwrap_or(func)) == Some(func)
            });
            if all_in_func && inline_single_use_global(module, func, g) {
                module.globals.retain(|&x| x != g);
                changed = true;
            }
        }
        changed
    }
}

pub struct LocalPromPass;

impl ModulePass for LocalPromPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "local_prom",
            is_analysis: false,
            min_opt_level: 2,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_globals(&mut self, _module: &mut Module) -> bool {
        false
    }

    fn run_on_functions(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for &func in &module.functions.clone() {
            if module.function_body(func).blocks.is_empty() {
                continue;
            }
            let entry = module.function_body(func).blocks[0];
            let allocas: Vec<ValueId> =
                module.block_body(entry).insts.iter().copied().filter(|&i| matches!(module.get(i).kind, ValueKind::Alloca)).collect();
            for alloca in allocas {
                let stores: Vec<ValueId> = module
                    .users_of(alloca)
                    .iter()
                    .filter(|&&(u, idx)| idx == 1 && matches!(module.get(u).kind, ValueKind::Store { .. }))
                    .map(|&(u, _)| u)
                    .collect();
                if stores.len() != 1 {
                    continue;
                }
                let store = stores[0];
                let value = match module.get(store).kind {
                    ValueKind::Store { value, .. } => value,
                    _ => continue,
                };
                if !module.get(value).kind.is_constant() {
                    continue;
                }
                let ty = module.types.pointee(module.type_of(alloca).unwrap()).unwrap();
                let name = format!("_local_prom.{}", alloca.index());
                let new_global = module.create_global_var_init(Linkage::Internal, false, name, ty, value);
                module.replace_by(alloca, new_global);
                module.erase(store);
                module.diagnostics.warn(Loc::UNKNOWN, "promoted single-assignment local to a global constant");
                changed = true;
            }
        }
        changed
    }
}
