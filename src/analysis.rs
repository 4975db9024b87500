//! Shared analyses used by multiple passes: dominance, natural loops, and a
//! handful of small constant-folding/querying helpers.
//!
//! These are computed on demand rather than cached across pass invocations;
//! the pass manager re-derives them whenever a pass that `requires` one runs
//! (see [`crate::passes`]), which keeps invalidation trivial at the cost of
//! some recomputation — acceptable at the IR sizes this crate targets.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::module::Module;
use crate::value::{BinOp, ValueId, ValueKind};

/// Dominator tree of a single function's blocks, computed with the
/// Cooper/Harvey/Kennedy iterative algorithm over a reverse-postorder
/// numbering.
pub struct DominanceInfo {
    rpo: Vec<ValueId>,
    rpo_index: HashMap<ValueId, usize>,
    idom: Vec<usize>,
}

impl DominanceInfo {
    pub fn compute(module: &Module, func: ValueId) -> Self {
        let entry = module.function_body(func).blocks[0];
        let rpo = reverse_postorder(module, entry);
        let rpo_index: HashMap<ValueId, usize> = rpo.iter().enumerate().map(|(i, &b)| (b, i)).collect();

        let mut idom = vec![usize::MAX; rpo.len()];
        idom[0] = 0;
        let mut changed = true;
        while changed {
            changed = false;
            for i in 1..rpo.len() {
                let block = rpo[i];
                let preds: SmallVec<[usize; 4]> = module
                    .predecessors(block)
                    .iter()
                    .filter_map(|p| rpo_index.get(p).copied())
                    .collect();
                let mut new_idom = None;
                for &p in &preds {
                    if idom[p] != usize::MAX {
                        new_idom = Some(p);
                        break;
                    }
                }
                let Some(mut cand) = new_idom else { continue };
                for &p in &preds {
                    if idom[p] != usize::MAX && p != cand {
                        cand = intersect(&idom, p, cand);
                    }
                }
                if idom[i] != cand {
                    idom[i] = cand;
                    changed = true;
                }
            }
        }
        Self { rpo, rpo_index, idom }
    }

    pub fn dominates(&self, a: ValueId, b: ValueId) -> bool {
        let (Some(&ia), Some(&ib)) = (self.rpo_index.get(&a), self.rpo_index.get(&b)) else {
            return false;
        };
        if ia == ib {
            return true;
        }
        let mut cur = ib;
        loop {
            if self.idom[cur] == cur {
                return cur == ia;
            }
            cur = self.idom[cur];
            if cur == ia {
                return true;
            }
        }
    }

    pub fn strictly_dominates(&self, a: ValueId, b: ValueId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn immediate_dominator(&self, b: ValueId) -> Option<ValueId> {
        let &i = self.rpo_index.get(&b)?;
        if self.idom[i] == i {
            return None; // entry
        }
        Some(self.rpo[self.idom[i]])
    }

    pub fn reverse_postorder(&self) -> &[ValueId] {
        &self.rpo
    }
}

fn intersect(idom: &[usize], mut a: usize, mut b: usize) -> usize {
    while a != b {
        while a > b {
            a = idom[a];
        }
        while b > a {
            b = idom[b];
        }
    }
    a
}

fn reverse_postorder(module: &Module, entry: ValueId) -> Vec<ValueId> {
    let mut visited = std::collections::HashSet::new();
    let mut postorder = Vec::new();
    let mut stack = vec![(entry, false)];
    while let Some((block, expanded)) = stack.pop() {
        if expanded {
            postorder.push(block);
            continue;
        }
        if !visited.insert(block) {
            continue;
        }
        stack.push((block, true));
        for succ in module.successors(block) {
            if !visited.contains(&succ) {
                stack.push((succ, false));
            }
        }
    }
    postorder.reverse();
    postorder
}

/// One natural loop: a header with a back-edge from some latch that the
/// header dominates, plus the set of blocks that can reach the latch
/// without leaving through the header.
#[derive(Debug, Clone)]
pub struct Loop {
    pub header: ValueId,
    pub latch: ValueId,
    pub blocks: Vec<ValueId>,
    pub preheader: Option<ValueId>,
}

pub struct LoopInfo {
    loops: Vec<Loop>,
    block_to_loop: HashMap<ValueId, usize>,
}

impl LoopInfo {
    pub fn compute(module: &Module, func: ValueId, dom: &DominanceInfo) -> Self {
        let mut loops = Vec::new();
        for &block in dom.reverse_postorder() {
            for pred in module.predecessors(block).to_vec() {
                if dom.dominates(block, pred) {
                    let blocks = natural_loop_body(module, block, pred);
                    let preheader = single_non_loop_predecessor(module, block, &blocks);
                    loops.push(Loop { header: block, latch: pred, blocks, preheader });
                }
            }
        }
        let _ = func;
        let mut block_to_loop = HashMap::new();
        for (i, l) in loops.iter().enumerate() {
            for &b in &l.blocks {
                block_to_loop.entry(b).or_insert(i);
            }
        }
        Self { loops, block_to_loop }
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn loop_for_block(&self, block: ValueId) -> Option<&Loop> {
        self.block_to_loop.get(&block).map(|&i| &self.loops[i])
    }

    pub fn num_loops(&self) -> usize {
        self.loops.len()
    }
}

fn natural_loop_body(module: &Module, header: ValueId, latch: ValueId) -> Vec<ValueId> {
    let mut body = vec![header];
    let mut seen = std::collections::HashSet::new();
    seen.insert(header);
    let mut stack = vec![latch];
    if seen.insert(latch) {
        body.push(latch);
    }
    while let Some(b) = stack.pop() {
        for p in module.predecessors(b) {
            if seen.insert(*p) {
                body.push(*p);
                stack.push(*p);
            }
        }
    }
    body
}

/// If the loop has exactly one predecessor of its header outside the loop
/// body, that block is already a valid preheader.
fn single_non_loop_predecessor(module: &Module, header: ValueId, body: &[ValueId]) -> Option<ValueId> {
    let outside: Vec<ValueId> =
        module.predecessors(header).iter().copied().filter(|p| !body.contains(p)).collect();
    match outside.as_slice() {
        [single] => Some(*single),
        _ => None,
    }
}

/// Maps instructions/blocks to their owning block/function. Built by a
/// single scan; intended to be recomputed whenever the arena shape changes.
pub struct ParentScanner {
    block_of_inst: HashMap<ValueId, ValueId>,
    func_of_block: HashMap<ValueId, ValueId>,
}

impl ParentScanner {
    pub fn scan(module: &Module) -> Self {
        let mut block_of_inst = HashMap::new();
        let mut func_of_block = HashMap::new();
        for &func in &module.functions {
            for &block in &module.function_body(func).blocks {
                func_of_block.insert(block, func);
                for &inst in &module.block_body(block).insts {
                    block_of_inst.insert(inst, block);
                }
            }
        }
        Self { block_of_inst, func_of_block }
    }

    pub fn block_of(&self, inst: ValueId) -> Option<ValueId> {
        self.block_of_inst.get(&inst).copied()
    }

    pub fn function_of(&self, block: ValueId) -> Option<ValueId> {
        self.func_of_block.get(&block).copied()
    }
}

/// Small constant-folding helpers shared by SCCP and instcombine.
pub struct Constant;

impl Constant {
    pub fn is_zero(module: &Module, id: ValueId) -> bool {
        match &module.get(id).kind {
            ValueKind::ConstZero => true,
            ValueKind::ConstInt(0) => true,
            _ => false,
        }
    }

    pub fn is_identical(module: &Module, a: ValueId, b: ValueId) -> bool {
        if a == b {
            return true;
        }
        match (&module.get(a).kind, &module.get(b).kind) {
            (ValueKind::ConstInt(x), ValueKind::ConstInt(y)) => x == y,
            (ValueKind::ConstZero, ValueKind::ConstZero) => true,
            (ValueKind::ConstZero, ValueKind::ConstInt(0)) | (ValueKind::ConstInt(0), ValueKind::ConstZero) => true,
            (ValueKind::ConstStr(x), ValueKind::ConstStr(y)) => x == y,
            (ValueKind::Undef, ValueKind::Undef) => true,
            _ => false,
        }
    }

    /// Folds a binary op over two integer constants, if both operands are
    /// foldable. Division/remainder by zero folds to `None` rather than
    /// panicking — the caller (instcombine) leaves the instruction alone.
    pub fn fold_binary(module: &Module, op: BinOp, lhs: ValueId, rhs: ValueId) -> Option<i64> {
        let l = Self::int_value(module, lhs)?;
        let r = Self::int_value(module, rhs)?;
        Some(match op {
            BinOp::Add => l.wrapping_add(r),
            BinOp::Sub => l.wrapping_sub(r),
            BinOp::Mul => l.wrapping_mul(r),
            BinOp::UDiv | BinOp::SDiv => {
                if r == 0 {
                    return None;
                }
                l.wrapping_div(r)
            }
            BinOp::URem | BinOp::SRem => {
                if r == 0 {
                    return None;
                }
                l.wrapping_rem(r)
            }
            BinOp::And => l & r,
            BinOp::Or => l | r,
            BinOp::Xor => l ^ r,
            BinOp::Shl => l.wrapping_shl(r as u32),
            BinOp::LShr => ((l as u64) >> (r as u32)) as i64,
            BinOp::AShr => l.wrapping_shr(r as u32),
            BinOp::Eq => (l == r) as i64,
            BinOp::Ne => (l != r) as i64,
            BinOp::ULt => ((l as u64) < (r as u64)) as i64,
            BinOp::ULe => ((l as u64) <= (r as u64)) as i64,
            BinOp::UGt => ((l as u64) > (r as u64)) as i64,
            BinOp::UGe => ((l as u64) >= (r as u64)) as i64,
            BinOp::SLt => (l < r) as i64,
            BinOp::SLe => (l <= r) as i64,
            BinOp::SGt => (l > r) as i64,
            BinOp::SGe => (l >= r) as i64,
        })
    }

    pub fn int_value(module: &Module, id: ValueId) -> Option<i64> {
        match &module.get(id).kind {
            ValueKind::ConstInt(v) => Some(*v as i64),
            ValueKind::ConstZero => Some(0),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Linkage;

    fn diamond(module: &mut Module) -> (ValueId, ValueId, ValueId, ValueId, ValueId) {
        let i32_ty = module.types.i32();
        let fn_ty = module.types.function(vec![], i32_ty, false);
        let f = module.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = module.create_block(f, "entry".into());
        let t = module.create_block(f, "t".into());
        let e = module.create_block(f, "e".into());
        let join = module.create_block(f, "join".into());
        module.set_insert_point(entry);
        let cond = module.get_bool(true);
        module.create_branch(cond, t, e);
        module.set_insert_point(t);
        module.create_jump(join);
        module.set_insert_point(e);
        module.create_jump(join);
        module.set_insert_point(join);
        let zero = module.get_int32(0);
        module.create_return(Some(zero));
        (f, entry, t, e, join)
    }

    #[test]
    fn entry_dominates_every_block_in_a_diamond() {
        let mut m = Module::new();
        let (f, entry, t, e, join) = diamond(&mut m);
        let dom = DominanceInfo::compute(&m, f);
        assert!(dom.dominates(entry, t));
        assert!(dom.dominates(entry, e));
        assert!(dom.dominates(entry, join));
        assert!(!dom.dominates(t, e));
        assert!(!dom.strictly_dominates(join, join));
    }

    #[test]
    fn join_is_not_dominated_by_either_arm_alone() {
        let mut m = Module::new();
        let (f, _, t, e, join) = diamond(&mut m);
        let dom = DominanceInfo::compute(&m, f);
        assert!(!dom.dominates(t, join));
        assert!(!dom.dominates(e, join));
    }

    #[test]
    fn detects_a_single_natural_loop() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        let header = m.create_block(f, "header".into());
        let body = m.create_block(f, "body".into());
        let exit = m.create_block(f, "exit".into());
        m.set_insert_point(entry);
        m.create_jump(header);
        m.set_insert_point(header);
        let cond = m.get_bool(true);
        m.create_branch(cond, body, exit);
        m.set_insert_point(body);
        m.create_jump(header);
        m.set_insert_point(exit);
        let zero = m.get_int32(0);
        m.create_return(Some(zero));

        let dom = DominanceInfo::compute(&m, f);
        let loops = LoopInfo::compute(&m, f, &dom);
        assert_eq!(loops.num_loops(), 1);
        let l = &loops.loops()[0];
        assert_eq!(l.header, header);
        assert_eq!(l.preheader, Some(entry));
    }

    #[test]
    fn fold_binary_add_computes_sum() {
        let mut m = Module::new();
        let a = m.get_int32(2);
        let b = m.get_int32(3);
        assert_eq!(Constant::fold_binary(&m, BinOp::Add, a, b), Some(5));
    }
}
