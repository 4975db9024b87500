//! The Module: sole owner of the value arena and the reverse use-list
//! side-table that realizes the Value/User/Use graph described in the data
//! model.

use smallvec::SmallVec;

use crate::diagnostics::DiagnosticSink;
use crate::types::TypeCtx;
use crate::value::{BlockBody, FunctionBody, Loc, Value, ValueId, ValueKind};

/// `(user, operand_index)` — one entry per operand slot that currently
/// points at the owning arena index.
pub type UserEdges = SmallVec<[(ValueId, usize); 4]>;

pub struct Module {
    pub types: TypeCtx,
    arena: Vec<Option<Value>>,
    users: Vec<UserEdges>,
    pub globals: Vec<ValueId>,
    pub functions: Vec<ValueId>,
    pub diagnostics: DiagnosticSink,

    pub(crate) global_ctor: Option<ValueId>,
    pub(crate) ctor_entry: Option<ValueId>,
    pub(crate) ctor_exit: Option<ValueId>,
    pub(crate) ctor_sealed: bool,

    pub(crate) insert_block: Option<ValueId>,
    pub(crate) insert_pos: Option<usize>,
}

impl Module {
    pub fn new() -> Self {
        Self {
            types: TypeCtx::new(),
            arena: Vec::new(),
            users: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            diagnostics: DiagnosticSink::new(),
            global_ctor: None,
            ctor_entry: None,
            ctor_exit: None,
            ctor_sealed: true,
            insert_block: None,
            insert_pos: None,
        }
    }

    /// Inserts `value` into the arena and registers its operands' back-edges.
    pub fn alloc(&mut self, value: Value) -> ValueId {
        let id = ValueId(self.arena.len() as u32);
        let operands = value.kind.operands();
        self.arena.push(Some(value));
        self.users.push(UserEdges::new());
        for (idx, operand) in operands.into_iter().enumerate() {
            self.users[operand.index()].push((id, idx));
        }
        id
    }

    pub fn get(&self, id: ValueId) -> &Value {
        self.arena[id.index()].as_ref().expect("use of erased value")
    }

    pub fn get_mut(&mut self, id: ValueId) -> &mut Value {
        self.arena[id.index()].as_mut().expect("use of erased value")
    }

    pub fn try_get(&self, id: ValueId) -> Option<&Value> {
        self.arena[id.index()].as_ref()
    }

    pub fn is_erased(&self, id: ValueId) -> bool {
        self.arena[id.index()].is_none()
    }

    pub fn users_of(&self, id: ValueId) -> &[(ValueId, usize)] {
        &self.users[id.index()]
    }

    pub fn user_count(&self, id: ValueId) -> usize {
        self.users[id.index()].len()
    }

    pub fn type_of(&self, id: ValueId) -> Option<crate::types::TypeId> {
        self.get(id).ty
    }

    /// Rewrites every use of `old` to point at `new`. `replace_by(old, old)`
    /// is a no-op; passing a value that transitively uses `old` would
    /// reintroduce a cycle through the operand graph and is rejected.
    pub fn replace_by(&mut self, old: ValueId, new: ValueId) {
        if old == new {
            return;
        }
        debug_assert!(
            !self.would_cycle(new, old),
            "replace_by would introduce a self-cycle through {} -> {}",
            old,
            new
        );
        let edges = std::mem::take(&mut self.users[old.index()]);
        for (user, op_idx) in &edges {
            if self.arena[user.index()].is_none() {
                continue;
            }
            self.get_mut(*user).kind.set_operand(*op_idx, new);
            self.users[new.index()].push((*user, *op_idx));
        }
    }

    /// Conservative check: does `candidate`'s operand graph reach `target`
    /// through a short (depth-bounded) walk? Used only to catch obviously
    /// cyclic `replace_by` calls in debug builds; phi self-references are
    /// exempted since operands() naturally includes them.
    fn would_cycle(&self, candidate: ValueId, target: ValueId) -> bool {
        if candidate == target {
            return false; // a phi referencing itself is legal
        }
        let mut seen = std::collections::HashSet::new();
        let mut stack = vec![candidate];
        let mut depth = 0;
        while let Some(v) = stack.pop() {
            if !seen.insert(v) {
                continue;
            }
            depth += 1;
            if depth > 4096 {
                return false; // bail out rather than blow up on pathological graphs
            }
            if v == target {
                return true;
            }
            if let Some(val) = self.try_get(v) {
                if matches!(val.kind, ValueKind::Phi { .. }) {
                    continue; // phis legitimately close cycles
                }
                stack.extend(val.kind.operands());
            }
        }
        false
    }

    /// Removes `id` from the arena, severing its outgoing operand edges
    /// first so no dangling reverse-edge remains on its former operands.
    pub fn erase(&mut self, id: ValueId) {
        if let Some(val) = self.arena[id.index()].take() {
            for operand in val.kind.operands() {
                if operand.index() < self.users.len() {
                    self.users[operand.index()].retain(|(u, _)| *u != id);
                }
            }
        }
        self.users[id.index()] = UserEdges::new();
    }

    /// Appends a fresh operand to an existing Phi's operand list, registering
    /// its reverse edge. Used by mem2reg, which must grow an in-progress phi
    /// one predecessor at a time (the phi may already have readers by the
    /// time later predecessors are filled in).
    pub fn append_phi_operand(&mut self, phi: ValueId, opr: ValueId) {
        let idx = match &mut self.get_mut(phi).kind {
            ValueKind::Phi { operands } => {
                operands.push(opr);
                operands.len() - 1
            }
            _ => panic!("{} is not a phi", phi),
        };
        self.users[opr.index()].push((phi, idx));
    }

    pub fn block_body(&self, id: ValueId) -> &BlockBody {
        match &self.get(id).kind {
            ValueKind::BasicBlock(b) => b,
            _ => panic!("{} is not a basic block", id),
        }
    }

    pub fn block_body_mut(&mut self, id: ValueId) -> &mut BlockBody {
        match &mut self.get_mut(id).kind {
            ValueKind::BasicBlock(b) => b,
            _ => panic!("{} is not a basic block", id),
        }
    }

    pub fn function_body(&self, id: ValueId) -> &FunctionBody {
        match &self.get(id).kind {
            ValueKind::Function { body, .. } => body,
            _ => panic!("{} is not a function", id),
        }
    }

    pub fn function_body_mut(&mut self, id: ValueId) -> &mut FunctionBody {
        match &mut self.get_mut(id).kind {
            ValueKind::Function { body, .. } => body,
            _ => panic!("{} is not a function", id),
        }
    }

    /// Terminator of a block, if the block currently has one (the block
    /// may be mid-construction and still "open").
    pub fn terminator_of(&self, block: ValueId) -> Option<ValueId> {
        self.block_body(block)
            .insts
            .last()
            .copied()
            .filter(|&i| self.get(i).kind.is_terminator())
    }

    pub fn successors(&self, block: ValueId) -> SmallVec<[ValueId; 2]> {
        match self.terminator_of(block).map(|t| &self.get(t).kind) {
            Some(ValueKind::Jump { target }) => SmallVec::from_slice(&[*target]),
            Some(ValueKind::Branch { true_bb, false_bb, .. }) => {
                SmallVec::from_slice(&[*true_bb, *false_bb])
            }
            _ => SmallVec::new(),
        }
    }

    pub fn predecessors(&self, block: ValueId) -> &[ValueId] {
        &self.block_body(block).preds
    }

    /// Appends `value` to the function's global-ctor-sealed state tracking;
    /// real seal logic lives in [`crate::builder::Builder::seal_global_ctor`].
    pub fn loc_of(&self, id: ValueId) -> Loc {
        self.get(id).loc
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::BinOp;

    fn push_const(m: &mut Module, v: i64) -> ValueId {
        let ty = m.types.i32();
        m.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstInt(v as u32)))
    }

    #[test]
    fn alloc_registers_reverse_edges() {
        let mut m = Module::new();
        let a = push_const(&mut m, 1);
        let b = push_const(&mut m, 2);
        let ty = m.types.i32();
        let add = m.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b }));
        assert_eq!(m.users_of(a), &[(add, 0)]);
        assert_eq!(m.users_of(b), &[(add, 1)]);
    }

    #[test]
    fn replace_by_rewrites_every_use() {
        let mut m = Module::new();
        let a = push_const(&mut m, 1);
        let b = push_const(&mut m, 2);
        let c = push_const(&mut m, 3);
        let ty = m.types.i32();
        let add = m.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b }));
        m.replace_by(a, c);
        match &m.get(add).kind {
            ValueKind::Binary { lhs, .. } => assert_eq!(*lhs, c),
            _ => unreachable!(),
        }
        assert!(m.users_of(a).is_empty());
        assert_eq!(m.users_of(c), &[(add, 0)]);
    }

    #[test]
    fn erase_severs_outgoing_edges() {
        let mut m = Module::new();
        let a = push_const(&mut m, 1);
        let b = push_const(&mut m, 2);
        let ty = m.types.i32();
        let add = m.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Binary { op: BinOp::Add, lhs: a, rhs: b }));
        m.erase(add);
        assert!(m.users_of(a).is_empty());
        assert!(m.users_of(b).is_empty());
        assert!(m.is_erased(add));
    }
}
