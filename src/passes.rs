//! Pass infrastructure: pass granularities, metadata, and the stage-ordered
//! fixed-point scheduler.
//!
//! Passes run in five ordered stages — `PreOpt < Promote < Opt < Demote <
//! PostOpt` — and within a stage the manager iterates every pass registered
//! for it to a fixed point (bounded, so a pass pair that oscillates forever
//! cannot hang the pipeline). A pass declares its own granularity
//! (block/function/module); the manager drives the iteration over blocks or
//! functions, the pass itself only implements the per-unit transform.

use crate::error::{MidError, MidResult};
use crate::module::Module;
use crate::value::ValueId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    PreOpt,
    Promote,
    Opt,
    Demote,
    PostOpt,
}

pub const STAGE_ORDER: [Stage; 5] =
    [Stage::PreOpt, Stage::Promote, Stage::Opt, Stage::Demote, Stage::PostOpt];

#[derive(Debug, Clone, Copy, Default)]
pub struct StageSet(u8);

impl StageSet {
    pub fn single(s: Stage) -> Self {
        Self(1 << s as u8)
    }

    pub fn of(stages: &[Stage]) -> Self {
        stages.iter().fold(Self(0), |acc, &s| Self(acc.0 | (1 << s as u8)))
    }

    pub fn contains(&self, s: Stage) -> bool {
        self.0 & (1 << s as u8) != 0
    }
}

#[derive(Debug, Clone)]
pub struct PassInfo {
    pub name: &'static str,
    pub is_analysis: bool,
    pub min_opt_level: u8,
    pub stages: StageSet,
    pub requires: &'static [&'static str],
    pub invalidates: &'static [&'static str],
}

pub trait BlockPass {
    fn info(&self) -> PassInfo;
    fn run_on_block(&mut self, module: &mut Module, block: ValueId) -> bool;
}

pub trait FunctionPass {
    fn info(&self) -> PassInfo;
    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool;
}

/// Module passes run twice per invocation: once over globals, once over
/// functions, matching the "globals then functions" contract.
pub trait ModulePass {
    fn info(&self) -> PassInfo;
    fn run_on_globals(&mut self, module: &mut Module) -> bool;
    fn run_on_functions(&mut self, module: &mut Module) -> bool;
}

pub enum AnyPass {
    Block(Box<dyn BlockPass>),
    Function(Box<dyn FunctionPass>),
    Module(Box<dyn ModulePass>),
}

impl AnyPass {
    pub fn info(&self) -> PassInfo {
        match self {
            AnyPass::Block(p) => p.info(),
            AnyPass::Function(p) => p.info(),
            AnyPass::Module(p) => p.info(),
        }
    }

    fn run(&mut self, module: &mut Module) -> bool {
        match self {
            AnyPass::Block(p) => {
                let blocks: Vec<ValueId> = module
                    .functions
                    .clone()
                    .into_iter()
                    .flat_map(|f| module.function_body(f).blocks.clone())
                    .collect();
                let mut changed = false;
                for b in blocks {
                    changed |= p.run_on_block(module, b);
                }
                changed
            }
            AnyPass::Function(p) => {
                let funcs = module.functions.clone();
                let mut changed = false;
                for f in funcs {
                    changed |= p.run_on_function(module, f);
                }
                changed
            }
            AnyPass::Module(p) => {
                let mut changed = p.run_on_globals(module);
                changed |= p.run_on_functions(module);
                changed
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PassManagerConfig {
    pub opt_level: u8,
    pub werror: bool,
    /// When set, only passes whose name appears here run.
    pub only: Option<Vec<String>>,
}

impl Default for PassManagerConfig {
    fn default() -> Self {
        Self { opt_level: 2, werror: false, only: None }
    }
}

const MAX_FIXED_POINT_ITERS: u32 = 64;

pub struct PassManager {
    passes: Vec<AnyPass>,
    config: PassManagerConfig,
}

impl PassManager {
    pub fn new(config: PassManagerConfig) -> Self {
        Self { passes: Vec::new(), config }
    }

    pub fn register(&mut self, pass: AnyPass) {
        self.passes.push(pass);
    }

    fn eligible(&self, idx: usize, stage: Stage) -> bool {
        let info = self.passes[idx].info();
        if !info.stages.contains(stage) || info.min_opt_level > self.config.opt_level {
            return false;
        }
        match &self.config.only {
            Some(names) => names.iter().any(|n| n == info.name),
            None => true,
        }
    }

    /// Runs every eligible pass through all five stages, iterating each
    /// stage to a fixed point.
    pub fn run(&mut self, module: &mut Module) -> MidResult<()> {
        module.diagnostics.set_werror(self.config.werror);
        for stage in STAGE_ORDER {
            let indices: Vec<usize> =
                (0..self.passes.len()).filter(|&i| self.eligible(i, stage)).collect();
            if indices.is_empty() {
                continue;
            }
            let mut iters = 0;
            loop {
                let mut changed = false;
                for &idx in &indices {
                    changed |= self.passes[idx].run(module);
                }
                iters += 1;
                if !changed || iters >= MAX_FIXED_POINT_ITERS {
                    break;
                }
            }
        }
        if module.diagnostics.error_count() > 0 {
            return Err(MidError::PassFailed {
                pass: "pipeline",
                reason: format!("{} diagnostic error(s) reported", module.diagnostics.error_count()),
            });
        }
        Ok(())
    }

    /// Runs a single named pass once (not to a fixed point); used by tests
    /// and by one-shot `-passes=name` invocation.
    pub fn run_one(&mut self, name: &str, module: &mut Module) -> MidResult<bool> {
        let idx = self
            .passes
            .iter()
            .position(|p| p.info().name == name)
            .ok_or_else(|| MidError::UnknownPass(name.to_string()))?;
        Ok(self.passes[idx].run(module))
    }

    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.info().name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Linkage;

    struct CountToZero(u32);
    impl FunctionPass for CountToZero {
        fn info(&self) -> PassInfo {
            PassInfo {
                name: "count-to-zero",
                is_analysis: false,
                min_opt_level: 0,
                stages: StageSet::single(Stage::Opt),
                requires: &[],
                invalidates: &[],
            }
        }
        fn run_on_function(&mut self, _module: &mut Module, _func: ValueId) -> bool {
            if self.0 > 0 {
                self.0 -= 1;
                true
            } else {
                false
            }
        }
    }

    #[test]
    fn fixed_point_loop_terminates_once_pass_reports_no_change() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        m.create_function(Linkage::External, "f".into(), fn_ty);

        let mut pm = PassManager::new(PassManagerConfig { opt_level: 2, werror: false, only: None });
        pm.register(AnyPass::Function(Box::new(CountToZero(3))));
        pm.run(&mut m).unwrap();
    }

    #[test]
    fn run_one_reports_unknown_pass() {
        let mut m = Module::new();
        let mut pm = PassManager::new(PassManagerConfig::default());
        assert!(pm.run_one("nope", &mut m).is_err());
    }

    #[test]
    fn min_opt_level_excludes_pass_below_threshold() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        m.create_function(Linkage::External, "f".into(), fn_ty);

        struct Expensive;
        impl FunctionPass for Expensive {
            fn info(&self) -> PassInfo {
                PassInfo {
                    name: "expensive",
                    is_analysis: false,
                    min_opt_level: 3,
                    stages: StageSet::single(Stage::Opt),
                    requires: &[],
                    invalidates: &[],
                }
            }
            fn run_on_function(&mut self, module: &mut Module, _func: ValueId) -> bool {
                module.diagnostics.error(crate::value::Loc::UNKNOWN, "should not run");
                false
            }
        }

        let mut pm = PassManager::new(PassManagerConfig { opt_level: 2, werror: false, only: None });
        pm.register(AnyPass::Function(Box::new(Expensive)));
        pm.run(&mut m).unwrap();
        assert_eq!(m.diagnostics.error_count(), 0);
    }
}
