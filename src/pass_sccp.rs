//! sccp — sparse conditional constant propagation.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::analysis::Constant;
use crate::module::Module;
use crate::passes::{FunctionPass, PassInfo, Stage, StageSet};
use crate::value::{ValueId, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lattice {
    Unknown,
    Const(i64),
    Overdefined,
}

impl Lattice {
    fn meet(self, other: Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Unknown, x) | (x, Lattice::Unknown) => x,
            (Lattice::Const(a), Lattice::Const(b)) if a == b => Lattice::Const(a),
            (Lattice::Const(_), Lattice::Const(_)) => Lattice::Overdefined,
            _ => Lattice::Overdefined,
        }
    }
}

struct Solver<'m> {
    module: &'m mut Module,
    values: HashMap<ValueId, Lattice>,
    executable: HashSet<ValueId>,
    block_worklist: VecDeque<ValueId>,
    inst_worklist: VecDeque<ValueId>,
}

impl<'m> Solver<'m> {
    fn value_of(&self, id: ValueId) -> Lattice {
        if let Some(v) = Constant::int_value(self.module, id) {
            return Lattice::Const(v);
        }
        if matches!(self.module.get(id).kind, ValueKind::Undef) {
            return Lattice::Unknown;
        }
        *self.values.get(&id).unwrap_or(&Lattice::Unknown)
    }

    fn mark_executable(&mut self, block: ValueId) {
        if self.executable.insert(block) {
            self.block_worklist.push_back(block);
        }
    }

    fn set_value(&mut self, id: ValueId, new: Lattice) {
        let old = *self.values.get(&id).unwrap_or(&Lattice::Unknown);
        let merged = old.meet(new);
        if merged != old {
            self.values.insert(id, merged);
            self.inst_worklist.push_back(id);
        }
    }

    fn run(&mut self, entry: ValueId) {
        self.mark_executable(entry);
        let mut guard = 0;
        while (!self.block_worklist.is_empty() || !self.inst_worklist.is_empty()) && guard < 100_000 {
            guard += 1;
            while let Some(v) = self.inst_worklist.pop_front() {
                let users: Vec<ValueId> = self.module.users_of(v).iter().map(|&(u, _)| u).collect();
                for u in users {
                    self.visit(u);
                }
            }
            if let Some(block) = self.block_worklist.pop_front() {
                for inst in self.module.block_body(block).insts.clone() {
                    self.visit(inst);
                }
            }
        }
    }

    fn visit(&mut self, inst: ValueId) {
        if self.module.is_erased(inst) {
            return;
        }
        match self.module.get(inst).kind.clone() {
            ValueKind::Binary { op, lhs, rhs } => {
                let (l, r) = (self.value_of(lhs), self.value_of(rhs));
                let result = match (l, r) {
                    (Lattice::Const(a), Lattice::Const(b)) => Constant::fold_binary(self.module, op, lhs, rhs)
                        .map(Lattice::Const)
                        .unwrap_or(Lattice::Overdefined),
                    (Lattice::Const(0), _) | (_, Lattice::Const(0)) if is_annihilating_zero(op) => Lattice::Const(0),
                    (Lattice::Const(-1), _) | (_, Lattice::Const(-1)) if is_annihilating_all_ones(op) => {
                        Lattice::Const(-1)
                    }
                    (Lattice::Overdefined, _) | (_, Lattice::Overdefined) => Lattice::Overdefined,
                    _ => Lattice::Unknown,
                };
                self.set_value(inst, result);
            }
            ValueKind::Unary { opr, .. } | ValueKind::Cast { opr } => {
                let v = self.value_of(opr);
                self.set_value(inst, v);
            }
            ValueKind::Phi { operands } => {
                let mut acc = Lattice::Unknown;
                for opr in operands {
                    if let ValueKind::PhiOperand { value, block } = self.module.get(opr).kind {
                        if self.executable.contains(&block) {
                            acc = acc.meet(self.value_of(value));
                        }
                    }
                }
                self.set_value(inst, acc);
            }
            ValueKind::Branch { cond, true_bb, false_bb } => match self.value_of(cond) {
                Lattice::Const(0) => self.mark_edge(inst, false_bb),
                Lattice::Const(_) => self.mark_edge(inst, true_bb),
                _ => {
                    self.mark_edge(inst, true_bb);
                    self.mark_edge(inst, false_bb);
                }
            },
            ValueKind::Jump { target } => self.mark_edge(inst, target),
            ValueKind::Call { .. } => self.set_value(inst, Lattice::Overdefined),
            ValueKind::Load { ptr } => {
                let folded = self.try_fold_global_load(ptr);
                self.set_value(inst, folded);
            }
            _ => {}
        }
    }

    fn mark_edge(&mut self, _term: ValueId, target: ValueId) {
        self.mark_executable(target);
    }

    fn try_fold_global_load(&self, ptr: ValueId) -> Lattice {
        if let ValueKind::GlobalVar { is_var: false, init: Some(init), .. } = &self.module.get(ptr).kind {
            return match Constant::int_value(self.module, *init) {
                Some(v) => Lattice::Const(v),
                None => Lattice::Overdefined,
            };
        }
        Lattice::Overdefined
    }
}

fn is_annihilating_zero(op: crate::value::BinOp) -> bool {
    use crate::value::BinOp::*;
    matches!(op, Mul | And | UDiv | SDiv | URem | SRem)
}

fn is_annihilating_all_ones(op: crate::value::BinOp) -> bool {
    matches!(op, crate::value::BinOp::Or)
}

pub struct SccpPass;

impl FunctionPass for SccpPass {
    fn info(&self) -> PassInfo {
        PassInfo {
            name: "sccp",
            is_analysis: false,
            min_opt_level: 1,
            stages: StageSet::single(Stage::Opt),
            requires: &[],
            invalidates: &[],
        }
    }

    fn run_on_function(&mut self, module: &mut Module, func: ValueId) -> bool {
        let blocks = module.function_body(func).blocks.clone();
        if blocks.is_empty() {
            return false;
        }
        let entry = blocks[0];
        let args = module.function_body(func).args.clone();

        let mut solver = Solver {
            module,
            values: HashMap::new(),
            executable: HashSet::new(),
            block_worklist: VecDeque::new(),
            inst_worklist: VecDeque::new(),
        };
        for a in &args {
            solver.values.insert(*a, Lattice::Overdefined);
        }
        solver.run(entry);

        let mut changed = false;
        let resolved: Vec<(ValueId, i64)> = solver
            .values
            .iter()
            .filter_map(|(&id, &lat)| match lat {
                Lattice::Const(c) if solver.module.user_count(id) > 0 => Some((id, c)),
                _ => None,
            })
            .collect();
        let module = solver.module;
        for (id, c) in resolved {
            if module.is_erased(id) || matches!(module.get(id).kind, ValueKind::Branch { .. } | ValueKind::Jump { .. }) {
                continue;
            }
            let ty = match module.type_of(id) {
                Some(t) => t,
                None => continue,
            };
            let value = module.get_int(c as u32, ty);
            module.replace_by(id, value);
            changed = true;
        }

        for &block in &blocks {
            for inst in module.block_body(block).insts.clone() {
                if module.is_erased(inst) {
                    continue;
                }
                if let ValueKind::Branch { cond, true_bb, false_bb } = module.get(inst).kind {
                    if let Some(c) = Constant::int_value(module, cond) {
                        let target = if c != 0 { true_bb } else { false_bb };
                        let dead = if c != 0 { false_bb } else { true_bb };
                        module.block_body_mut(dead).preds.retain(|&p| p != block);
                        let pos = module.block_body(block).insts.iter().position(|&i| i == inst).unwrap();
                        module.block_body_mut(block).insts.remove(pos);
                        module.erase(inst);
                        module.set_insert_point(block);
                        module.create_jump(target);
                        changed = true;
                    }
                }
            }
        }

        changed
    }
}
