//! Registers every known pass with a [`PassManager`] in a fixed order.
//!
//! The order here is cosmetic — the manager schedules strictly by stage —
//! but keeping producers before consumers within a stage helps a single
//! pipeline iteration make more progress before falling back to the
//! fixed-point loop.

use crate::pass_dce::{AdcePass, DcePass, DeadGlobalElimPass, DsePass};
use crate::pass_global::{ArrInlinerPass, GlobalOptPass, GvarInlinerPass, LocalPromPass};
use crate::pass_inline::InlinerPass;
use crate::pass_instcombine::InstCombinePass;
use crate::pass_loop::{LicmPass, LoopConvPass, LoopNormPass, LoopReducePass, NaiveUnrollPass};
use crate::pass_misc::{BlkMergePass, BranchSimpPass, DirtyConvPass, GvnPass, StoreCombPass, UndefPropPass};
use crate::pass_sccp::SccpPass;
use crate::pass_ssa::{Mem2RegPass, PhiSimpPass, Reg2MemPass};
use crate::passes::{AnyPass, PassManager};

pub fn register_all_passes(pm: &mut PassManager) {
    pm.register(AnyPass::Function(Box::new(DirtyConvPass)));
    pm.register(AnyPass::Module(Box::new(DeadGlobalElimPass)));

    pm.register(AnyPass::Function(Box::new(Mem2RegPass)));
    pm.register(AnyPass::Function(Box::new(PhiSimpPass)));
    pm.register(AnyPass::Function(Box::new(GvarInlinerPass)));

    pm.register(AnyPass::Block(Box::new(GvnPass)));
    pm.register(AnyPass::Function(Box::new(SccpPass)));
    pm.register(AnyPass::Function(Box::new(InstCombinePass)));
    pm.register(AnyPass::Block(Box::new(UndefPropPass)));
    pm.register(AnyPass::Block(Box::new(BranchSimpPass)));
    pm.register(AnyPass::Function(Box::new(BlkMergePass)));
    pm.register(AnyPass::Block(Box::new(StoreCombPass)));
    pm.register(AnyPass::Block(Box::new(DsePass)));
    pm.register(AnyPass::Block(Box::new(DcePass)));
    pm.register(AnyPass::Function(Box::new(AdcePass)));

    pm.register(AnyPass::Function(Box::new(LoopNormPass)));
    pm.register(AnyPass::Function(Box::new(LicmPass)));
    pm.register(AnyPass::Function(Box::new(NaiveUnrollPass)));
    pm.register(AnyPass::Function(Box::new(LoopConvPass)));
    pm.register(AnyPass::Function(Box::new(LoopReducePass)));

    pm.register(AnyPass::Function(Box::new(InlinerPass::new())));
    pm.register(AnyPass::Module(Box::new(GlobalOptPass)));
    pm.register(AnyPass::Function(Box::new(ArrInlinerPass)));
    pm.register(AnyPass::Module(Box::new(LocalPromPass)));

    pm.register(AnyPass::Function(Box::new(Reg2MemPass)));
}
