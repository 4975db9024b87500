//! Module/Builder construction API (spec §4.1).
//!
//! The `Module` is the sole factory for SSA nodes: every `create_*` method
//! enforces its precondition by assertion, builds the node, registers its
//! operands (which updates the use-def back-edges via `Module::alloc`), and
//! for instruction-kinded nodes inserts it at the current cursor position.
//! No runtime error propagates out of these calls — malformed requests are
//! programmer bugs, not `Result`s.

use crate::types::TypeId;
use crate::value::{
    BinOp, BlockBody, FunctionBody, Linkage, Loc, UnOp, Value, ValueId, ValueKind,
};
use crate::module::Module;

/// RAII scope guard: restores the previous insert point (or global-ctor
/// status) when dropped. Mirrors the original `xstl::Guard` pattern via a
/// plain closure-holding struct, since Rust's `Drop` is the idiomatic
/// equivalent.
pub struct InsertGuard<'m> {
    module: &'m mut Module,
    saved_block: Option<ValueId>,
    saved_pos: Option<usize>,
}

impl<'m> Drop for InsertGuard<'m> {
    fn drop(&mut self) {
        self.module.insert_block = self.saved_block;
        self.module.insert_pos = self.saved_pos;
    }
}

impl Module {
    // ---- insert cursor -------------------------------------------------

    pub fn set_insert_point(&mut self, block: ValueId) {
        self.insert_block = Some(block);
        self.insert_pos = None; // None means "append at end"
    }

    pub fn set_insert_point_before(&mut self, block: ValueId, pos: usize) {
        self.insert_block = Some(block);
        self.insert_pos = Some(pos);
    }

    pub fn insert_point(&self) -> Option<ValueId> {
        self.insert_block
    }

    /// Scoped switch to the lazily-materialized global constructor.
    pub fn enter_global_ctor(&mut self) -> InsertGuard<'_> {
        let saved_block = self.insert_block;
        let saved_pos = self.insert_pos;
        self.ensure_global_ctor();
        let entry = self.ctor_entry.unwrap();
        self.ctor_sealed = false;
        self.set_insert_point(entry);
        InsertGuard { module: self, saved_block, saved_pos }
    }

    fn ensure_global_ctor(&mut self) {
        if self.global_ctor.is_some() {
            return;
        }
        let void = self.types.void();
        let fn_ty = self.types.function(vec![], void, false);
        let ctor = self.create_function(Linkage::GlobalCtor, "_$ctor".to_string(), fn_ty);
        let entry = self.create_block(ctor, "entry".to_string());
        let exit = self.create_block(ctor, "exit".to_string());
        self.global_ctor = Some(ctor);
        self.ctor_entry = Some(entry);
        self.ctor_exit = Some(exit);
        self.ctor_sealed = true; // no unsealed content yet
    }

    /// Wires ctor entry to exit with a jump (if not already terminated) and
    /// terminates the exit block with a void return. Idempotent.
    pub fn seal_global_ctor(&mut self) {
        if self.ctor_sealed {
            return;
        }
        let entry = self.ctor_entry.unwrap();
        let exit = self.ctor_exit.unwrap();
        if self.terminator_of(entry).is_none() {
            let saved = (self.insert_block, self.insert_pos);
            self.set_insert_point(entry);
            self.create_jump(exit);
            self.insert_block = saved.0;
            self.insert_pos = saved.1;
        }
        if self.terminator_of(exit).is_none() {
            let saved = (self.insert_block, self.insert_pos);
            self.set_insert_point(exit);
            self.create_return(None);
            self.insert_block = saved.0;
            self.insert_pos = saved.1;
        }
        self.ctor_sealed = true;
    }

    // ---- low-level insertion --------------------------------------------

    fn insert_inst(&mut self, value: Value) -> ValueId {
        let block = self.insert_block.expect("create_* called with no insert point set");
        let id = self.alloc(value);
        let pos = self.insert_pos;
        let body = self.block_body_mut(block);
        match pos {
            Some(p) => {
                body.insts.insert(p, id);
                self.insert_pos = Some(p + 1);
            }
            None => body.insts.push(id),
        }
        id
    }

    // ---- top level -------------------------------------------------------

    pub fn create_function(&mut self, linkage: Linkage, name: String, ty: TypeId) -> ValueId {
        assert!(self.types.is_function(ty), "create_function requires a function type");
        let id = self.alloc(Value::new(
            Some(ty),
            Loc::UNKNOWN,
            ValueKind::Function { name, linkage, body: FunctionBody::default() },
        ));
        let (arg_tys, _) = self.types.fn_sig(ty).unwrap();
        let arg_tys: Vec<TypeId> = arg_tys.to_vec();
        for (i, arg_ty) in arg_tys.into_iter().enumerate() {
            let arg = self.alloc(Value::new(Some(arg_ty), Loc::UNKNOWN, ValueKind::ArgRef { func: id, index: i }));
            self.function_body_mut(id).args.push(arg);
        }
        self.functions.push(id);
        id
    }

    pub fn create_block(&mut self, parent: ValueId, name: String) -> ValueId {
        let id = self.alloc(Value::new(
            None,
            Loc::UNKNOWN,
            ValueKind::BasicBlock(BlockBody { parent: Some(parent), insts: Vec::new(), preds: Vec::new(), name }),
        ));
        self.function_body_mut(parent).blocks.push(id);
        id
    }

    pub fn create_arg_ref(&self, func: ValueId, index: usize) -> ValueId {
        self.function_body(func).args[index]
    }

    // ---- memory ------------------------------------------------------

    pub fn create_alloca(&mut self, ty: TypeId) -> ValueId {
        assert!(!self.types.is_void(ty), "cannot alloca void");
        let ptr_ty = self.types.pointer(ty, false);
        self.insert_inst(Value::new(Some(ptr_ty), Loc::UNKNOWN, ValueKind::Alloca))
    }

    pub fn create_load(&mut self, ptr: ValueId) -> ValueId {
        let ptr_ty = self.type_of(ptr).expect("load pointer has no type");
        assert!(self.types.is_pointer(ptr_ty), "load requires a pointer operand");
        let pointee = self.types.pointee(ptr_ty).unwrap();
        self.insert_inst(Value::new(Some(pointee), Loc::UNKNOWN, ValueKind::Load { ptr }))
    }

    /// Stores `value` through `ptr`, auto-inserting a cast if needed and
    /// climbing through `get_addr`-style access if `ptr` is not already a
    /// pointer (preserved convenience, see SPEC_FULL.md Open Questions).
    pub fn create_store(&mut self, value: ValueId, ptr: ValueId) -> ValueId {
        let ptr_ty = self.type_of(ptr).expect("store target has no type");
        assert!(self.types.is_pointer(ptr_ty), "store requires a pointer target");
        let pointee = self.types.pointee(ptr_ty).unwrap();
        let value_ty = self.type_of(value).expect("store value has no type");
        let value = if self.types.can_accept(pointee, value_ty) && value_ty != pointee {
            self.create_cast(value, pointee)
        } else {
            value
        };
        self.insert_inst(Value::new(None, Loc::UNKNOWN, ValueKind::Store { value, ptr }))
    }

    pub fn create_ptr_access(&mut self, ptr: ValueId, index: ValueId) -> ValueId {
        let ptr_ty = self.type_of(ptr).expect("ptr_access base has no type");
        assert!(self.types.is_pointer(ptr_ty), "ptr_access requires a pointer base");
        self.insert_inst(Value::new(Some(ptr_ty), Loc::UNKNOWN, ValueKind::PtrAccess { ptr, index }))
    }

    pub fn create_elem_access(&mut self, ptr: ValueId, index: ValueId, elem_ty: TypeId) -> ValueId {
        let ptr_ty = self.type_of(ptr).expect("elem_access base has no type");
        assert!(self.types.is_pointer(ptr_ty), "elem_access requires a pointer base");
        let result_ty = self.types.pointer(elem_ty, false);
        self.insert_inst(Value::new(Some(result_ty), Loc::UNKNOWN, ValueKind::ElemAccess { ptr, index }))
    }

    // ---- control flow ---------------------------------------------------

    pub fn create_jump(&mut self, target: ValueId) -> ValueId {
        let cur = self.insert_block.expect("create_jump with no insert point");
        let id = self.insert_inst(Value::new(None, Loc::UNKNOWN, ValueKind::Jump { target }));
        self.block_body_mut(target).preds.push(cur);
        id
    }

    pub fn create_branch(&mut self, cond: ValueId, true_bb: ValueId, false_bb: ValueId) -> ValueId {
        let cond_ty = self.type_of(cond).expect("branch cond has no type");
        assert!(self.types.is_integer(cond_ty), "branch condition must be an integer");
        let cur = self.insert_block.expect("create_branch with no insert point");
        let id = self.insert_inst(Value::new(None, Loc::UNKNOWN, ValueKind::Branch { cond, true_bb, false_bb }));
        self.block_body_mut(true_bb).preds.push(cur);
        self.block_body_mut(false_bb).preds.push(cur);
        id
    }

    pub fn create_return(&mut self, value: Option<ValueId>) -> ValueId {
        self.insert_inst(Value::new(None, Loc::UNKNOWN, ValueKind::Return { value }))
    }

    // ---- arithmetic / logic ----------------------------------------------

    pub fn create_binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, result_ty: TypeId) -> ValueId {
        let (lt, rt) = (self.type_of(lhs).unwrap(), self.type_of(rhs).unwrap());
        assert_eq!(self.types.strip_const(lt), self.types.strip_const(rt), "binary operands must have the same type");
        self.insert_inst(Value::new(Some(result_ty), Loc::UNKNOWN, ValueKind::Binary { op, lhs, rhs }))
    }

    fn signed_variant(&self, ty: TypeId, signed: BinOp, unsigned: BinOp) -> BinOp {
        if self.types.is_unsigned(ty) || self.types.is_pointer(ty) { unsigned } else { signed }
    }

    pub fn create_add(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::Add, lhs, rhs, ty)
    }

    pub fn create_sub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::Sub, lhs, rhs, ty)
    }

    pub fn create_mul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::Mul, lhs, rhs, ty)
    }

    pub fn create_div(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        let op = self.signed_variant(ty, BinOp::SDiv, BinOp::UDiv);
        self.create_binary(op, lhs, rhs, ty)
    }

    pub fn create_rem(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        let op = self.signed_variant(ty, BinOp::SRem, BinOp::URem);
        self.create_binary(op, lhs, rhs, ty)
    }

    fn cmp_result_ty(&mut self) -> TypeId {
        self.types.i32()
    }

    pub fn create_equal(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.cmp_result_ty();
        self.create_binary(BinOp::Eq, lhs, rhs, ty)
    }

    pub fn create_not_eq(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.cmp_result_ty();
        self.create_binary(BinOp::Ne, lhs, rhs, ty)
    }

    pub fn create_less(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let lt = self.type_of(lhs).unwrap();
        let op = self.signed_variant(lt, BinOp::SLt, BinOp::ULt);
        let ty = self.cmp_result_ty();
        self.create_binary(op, lhs, rhs, ty)
    }

    pub fn create_less_eq(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let lt = self.type_of(lhs).unwrap();
        let op = self.signed_variant(lt, BinOp::SLe, BinOp::ULe);
        let ty = self.cmp_result_ty();
        self.create_binary(op, lhs, rhs, ty)
    }

    pub fn create_great(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let lt = self.type_of(lhs).unwrap();
        let op = self.signed_variant(lt, BinOp::SGt, BinOp::UGt);
        let ty = self.cmp_result_ty();
        self.create_binary(op, lhs, rhs, ty)
    }

    pub fn create_great_eq(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let lt = self.type_of(lhs).unwrap();
        let op = self.signed_variant(lt, BinOp::SGe, BinOp::UGe);
        let ty = self.cmp_result_ty();
        self.create_binary(op, lhs, rhs, ty)
    }

    pub fn create_and(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::And, lhs, rhs, ty)
    }
    pub fn create_or(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::Or, lhs, rhs, ty)
    }
    pub fn create_xor(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::Xor, lhs, rhs, ty)
    }
    pub fn create_shl(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        self.create_binary(BinOp::Shl, lhs, rhs, ty)
    }
    pub fn create_shr(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.type_of(lhs).unwrap();
        let op = self.signed_variant(ty, BinOp::AShr, BinOp::LShr);
        self.create_binary(op, lhs, rhs, ty)
    }

    pub fn create_unary(&mut self, op: UnOp, opr: ValueId, result_ty: TypeId) -> ValueId {
        self.insert_inst(Value::new(Some(result_ty), Loc::UNKNOWN, ValueKind::Unary { op, opr }))
    }

    pub fn create_neg(&mut self, opr: ValueId) -> ValueId {
        let ty = self.type_of(opr).unwrap();
        self.create_unary(UnOp::Neg, opr, ty)
    }

    pub fn create_not(&mut self, opr: ValueId) -> ValueId {
        let ty = self.type_of(opr).unwrap();
        self.create_unary(UnOp::Not, opr, ty)
    }

    pub fn create_logic_not(&mut self, opr: ValueId) -> ValueId {
        let ty = self.cmp_result_ty();
        self.create_unary(UnOp::LogicNot, opr, ty)
    }

    /// Returns `v` unchanged if already of type `ty`; folds a constant cast
    /// without inserting an instruction; otherwise inserts a `Cast`.
    pub fn create_cast(&mut self, v: ValueId, ty: TypeId) -> ValueId {
        let vt = self.type_of(v).expect("cast operand has no type");
        if self.types.strip_const(vt) == self.types.strip_const(ty) {
            return v;
        }
        if let ValueKind::ConstInt(i) = &self.get(v).kind {
            let i = *i;
            return self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstInt(i)));
        }
        self.insert_inst(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Cast { opr: v }))
    }

    // ---- call / phi / select ---------------------------------------------

    pub fn create_call(&mut self, callee: ValueId, args: Vec<ValueId>) -> ValueId {
        let callee_ty = self.type_of(callee).expect("call target has no function type");
        let (_, ret) = self.types.fn_sig(callee_ty).expect("call target is not a function");
        self.insert_inst(Value::new(Some(ret), Loc::UNKNOWN, ValueKind::Call { callee, args }))
    }

    pub fn create_phi_operand(&mut self, val: ValueId, block: ValueId) -> ValueId {
        let ty = self.type_of(val);
        self.alloc(Value::new(ty, Loc::UNKNOWN, ValueKind::PhiOperand { value: val, block }))
    }

    pub fn create_phi(&mut self, oprs: Vec<ValueId>) -> ValueId {
        let ty = oprs.first().and_then(|&o| self.type_of(o));
        self.insert_inst(Value::new(ty, Loc::UNKNOWN, ValueKind::Phi { operands: oprs }))
    }

    pub fn create_select(&mut self, cond: ValueId, true_val: ValueId, false_val: ValueId) -> ValueId {
        let ty = self.type_of(true_val).expect("select arm has no type");
        self.insert_inst(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Select { cond, true_val, false_val }))
    }

    // ---- global variables -------------------------------------------------

    pub fn create_global_var_init(
        &mut self,
        linkage: Linkage,
        is_var: bool,
        name: String,
        ty: TypeId,
        init: ValueId,
    ) -> ValueId {
        let ptr_ty = self.types.pointer(ty, false);
        let id = self.alloc(Value::new(
            Some(ptr_ty),
            Loc::UNKNOWN,
            ValueKind::GlobalVar { name, linkage, is_var, init: Some(init) },
        ));
        self.globals.push(id);
        id
    }

    pub fn create_global_var_decl(&mut self, linkage: Linkage, is_var: bool, name: String, ty: TypeId) -> ValueId {
        let ptr_ty = self.types.pointer(ty, false);
        let id = self.alloc(Value::new(
            Some(ptr_ty),
            Loc::UNKNOWN,
            ValueKind::GlobalVar { name, linkage, is_var, init: None },
        ));
        self.globals.push(id);
        id
    }

    // ---- constants --------------------------------------------------------

    pub fn get_zero(&mut self, ty: TypeId) -> ValueId {
        self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstZero))
    }

    pub fn get_int(&mut self, value: u32, ty: TypeId) -> ValueId {
        assert!(self.types.is_integer(ty), "get_int requires an integer type");
        self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstInt(value)))
    }

    pub fn get_int32(&mut self, value: u32) -> ValueId {
        let ty = self.types.i32();
        self.get_int(value, ty)
    }

    pub fn get_bool(&mut self, value: bool) -> ValueId {
        self.get_int32(value as u32)
    }

    pub fn get_string(&mut self, s: String, ty: TypeId) -> ValueId {
        self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstStr(s)))
    }

    pub fn get_struct(&mut self, elems: Vec<ValueId>, ty: TypeId) -> ValueId {
        debug_assert!(elems.iter().all(|&e| self.get(e).kind.is_constant()), "get_struct elements must be constant");
        self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstStruct(elems)))
    }

    pub fn get_array(&mut self, elems: Vec<ValueId>, ty: TypeId) -> ValueId {
        debug_assert!(elems.iter().all(|&e| self.get(e).kind.is_constant()), "get_array elements must be constant");
        self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::ConstArray(elems)))
    }

    pub fn get_undef(&mut self, ty: TypeId) -> ValueId {
        self.alloc(Value::new(Some(ty), Loc::UNKNOWN, ValueKind::Undef))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_trivial_function_returning_a_constant() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "main".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        m.set_insert_point(entry);
        let five = m.get_int32(5);
        m.create_return(Some(five));
        assert_eq!(m.function_body(f).blocks, vec![entry]);
        assert!(m.terminator_of(entry).is_some());
    }

    #[test]
    fn branch_registers_predecessors_on_both_targets() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "f".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        let t = m.create_block(f, "t".into());
        let e = m.create_block(f, "e".into());
        m.set_insert_point(entry);
        let cond = m.get_bool(true);
        m.create_branch(cond, t, e);
        assert_eq!(m.predecessors(t), &[entry]);
        assert_eq!(m.predecessors(e), &[entry]);
    }

    #[test]
    fn global_ctor_lazily_materializes_and_seals() {
        let mut m = Module::new();
        {
            let mut guard = m.enter_global_ctor();
            let i32_ty = guard.module.types.i32();
            let g = guard.module.create_global_var_decl(Linkage::Internal, true, "g".into(), i32_ty);
            let five = guard.module.get_int32(5);
            guard.module.create_store(five, g);
        }
        m.seal_global_ctor();
        let entry = m.ctor_entry.unwrap();
        let exit = m.ctor_exit.unwrap();
        assert!(m.terminator_of(entry).is_some());
        assert!(m.terminator_of(exit).is_some());
    }
}
