//! Nominal type system for the mid-end.
//!
//! Types are hash-consed (interned) inside a [`TypeCtx`]: two structurally
//! identical types always resolve to the same [`TypeId`], so type equality
//! is `TypeId` equality (the `Const` wrapper is the one exception — it is
//! transparent for identity purposes, see [`TypeCtx::strip_const`]).

use std::fmt;

use rustc_hash::FxHashMap;

/// Interned handle to a [`TypeData`]. Equality is by-id, not structural.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Prim {
    I8,
    I32,
    U8,
    U32,
}

impl Prim {
    pub fn size(&self) -> u32 {
        match self {
            Prim::I8 | Prim::U8 => 1,
            Prim::I32 | Prim::U32 => 4,
        }
    }

    pub fn is_unsigned(&self) -> bool {
        matches!(self, Prim::U8 | Prim::U32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StructField {
    pub name: String,
    pub ty: TypeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeData {
    Void,
    Prim(Prim),
    Pointer { pointee: TypeId, is_rvalue: bool },
    Array { elem: TypeId, len: usize, is_rvalue: bool },
    Struct { fields: Vec<StructField>, id: u32, is_rvalue: bool },
    Function { args: Vec<TypeId>, ret: TypeId, is_rvalue: bool },
    Const(TypeId),
}

/// Interner for [`TypeData`]. Cheap to clone-share via `&TypeCtx` everywhere
/// a type is needed; the arena itself never shrinks (types are immutal once
/// created).
pub struct TypeCtx {
    arena: Vec<TypeData>,
    interned: FxHashMap<TypeData, TypeId>,
    next_struct_id: u32,
    void: TypeId,
    i8: TypeId,
    i32: TypeId,
    u8: TypeId,
    u32: TypeId,
}

impl TypeCtx {
    pub fn new() -> Self {
        let mut arena = Vec::new();
        let mut interned = FxHashMap::default();
        let mut intern = |arena: &mut Vec<TypeData>, interned: &mut FxHashMap<TypeData, TypeId>, data: TypeData| -> TypeId {
            if let Some(id) = interned.get(&data) {
                return *id;
            }
            let id = TypeId(arena.len() as u32);
            arena.push(data.clone());
            interned.insert(data, id);
            id
        };
        let void = intern(&mut arena, &mut interned, TypeData::Void);
        let i8 = intern(&mut arena, &mut interned, TypeData::Prim(Prim::I8));
        let i32 = intern(&mut arena, &mut interned, TypeData::Prim(Prim::I32));
        let u8 = intern(&mut arena, &mut interned, TypeData::Prim(Prim::U8));
        let u32 = intern(&mut arena, &mut interned, TypeData::Prim(Prim::U32));
        Self { arena, interned, next_struct_id: 0, void, i8, i32, u8, u32 }
    }

    fn intern(&mut self, data: TypeData) -> TypeId {
        if let Some(id) = self.interned.get(&data) {
            return *id;
        }
        let id = TypeId(self.arena.len() as u32);
        self.arena.push(data.clone());
        self.interned.insert(data, id);
        id
    }

    pub fn data(&self, id: TypeId) -> &TypeData {
        &self.arena[id.0 as usize]
    }

    pub fn void(&self) -> TypeId { self.void }
    pub fn i8(&self) -> TypeId { self.i8 }
    pub fn i32(&self) -> TypeId { self.i32 }
    pub fn u8(&self) -> TypeId { self.u8 }
    pub fn u32(&self) -> TypeId { self.u32 }

    pub fn prim(&self, p: Prim) -> TypeId {
        match p {
            Prim::I8 => self.i8,
            Prim::I32 => self.i32,
            Prim::U8 => self.u8,
            Prim::U32 => self.u32,
        }
    }

    pub fn pointer(&mut self, pointee: TypeId, is_rvalue: bool) -> TypeId {
        self.intern(TypeData::Pointer { pointee, is_rvalue })
    }

    pub fn array(&mut self, elem: TypeId, len: usize, is_rvalue: bool) -> TypeId {
        self.intern(TypeData::Array { elem, len, is_rvalue })
    }

    pub fn struct_type(&mut self, fields: Vec<StructField>, is_rvalue: bool) -> TypeId {
        let id = self.next_struct_id;
        self.next_struct_id += 1;
        self.intern(TypeData::Struct { fields, id, is_rvalue })
    }

    pub fn function(&mut self, args: Vec<TypeId>, ret: TypeId, is_rvalue: bool) -> TypeId {
        self.intern(TypeData::Function { args, ret, is_rvalue })
    }

    pub fn const_of(&mut self, inner: TypeId) -> TypeId {
        if matches!(self.data(inner), TypeData::Const(_)) {
            return inner;
        }
        self.intern(TypeData::Const(inner))
    }

    /// Strips a `Const` wrapper for identity purposes; non-const types pass through.
    pub fn strip_const(&self, id: TypeId) -> TypeId {
        match self.data(id) {
            TypeData::Const(inner) => *inner,
            _ => id,
        }
    }

    pub fn is_const(&self, id: TypeId) -> bool {
        matches!(self.data(id), TypeData::Const(_))
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Void)
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Prim(_))
    }

    pub fn is_unsigned(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Prim(p) if p.is_unsigned())
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Pointer { .. })
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Array { .. })
    }

    pub fn is_struct(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Struct { .. })
    }

    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.data(self.strip_const(id)), TypeData::Function { .. })
    }

    pub fn is_aggregate(&self, id: TypeId) -> bool {
        self.is_array(id) || self.is_struct(id)
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.data(self.strip_const(id)) {
            TypeData::Pointer { pointee, .. } => Some(*pointee),
            _ => None,
        }
    }

    pub fn array_info(&self, id: TypeId) -> Option<(TypeId, usize)> {
        match self.data(self.strip_const(id)) {
            TypeData::Array { elem, len, .. } => Some((*elem, *len)),
            _ => None,
        }
    }

    pub fn struct_fields(&self, id: TypeId) -> Option<&[StructField]> {
        match self.data(self.strip_const(id)) {
            TypeData::Struct { fields, .. } => Some(fields),
            _ => None,
        }
    }

    pub fn fn_sig(&self, id: TypeId) -> Option<(&[TypeId], TypeId)> {
        match self.data(self.strip_const(id)) {
            TypeData::Function { args, ret, .. } => Some((args, *ret)),
            _ => None,
        }
    }

    /// Size in bytes. Function/void types have no size.
    pub fn size_of(&self, id: TypeId) -> u32 {
        match self.data(self.strip_const(id)) {
            TypeData::Void => 0,
            TypeData::Prim(p) => p.size(),
            TypeData::Pointer { .. } => 4,
            TypeData::Array { elem, len, .. } => self.size_of(*elem) * (*len as u32),
            TypeData::Struct { fields, .. } => {
                let mut offset = 0u32;
                for f in fields {
                    let (sz, al) = (self.size_of(f.ty), self.align_of(f.ty));
                    offset = align_up(offset, al);
                    offset += sz;
                }
                align_up(offset, self.align_of(id))
            }
            TypeData::Function { .. } => 0,
            TypeData::Const(_) => unreachable!("stripped"),
        }
    }

    /// Alignment in bytes: widest member for structs/arrays, own size otherwise.
    pub fn align_of(&self, id: TypeId) -> u32 {
        match self.data(self.strip_const(id)) {
            TypeData::Void => 1,
            TypeData::Prim(p) => p.size(),
            TypeData::Pointer { .. } => 4,
            TypeData::Array { elem, .. } => self.align_of(*elem),
            TypeData::Struct { fields, .. } => {
                fields.iter().map(|f| self.align_of(f.ty)).max().unwrap_or(1)
            }
            TypeData::Function { .. } => 1,
            TypeData::Const(_) => unreachable!("stripped"),
        }
    }

    /// Byte offset of `field_index` inside a struct type.
    pub fn field_offset(&self, id: TypeId, field_index: usize) -> u32 {
        let fields = self.struct_fields(id).expect("field_offset on non-struct");
        let mut offset = 0u32;
        for f in &fields[..field_index] {
            let al = self.align_of(f.ty);
            offset = align_up(offset, al);
            offset += self.size_of(f.ty);
        }
        align_up(offset, self.align_of(fields[field_index].ty))
    }

    /// Whether a value of type `from` may be stored into a location of type `self`
    /// (i.e. assignment compatibility). `Const` targets never accept.
    pub fn can_accept(&self, target: TypeId, from: TypeId) -> bool {
        if self.is_const(target) {
            return false;
        }
        let (t, f) = (self.strip_const(target), self.strip_const(from));
        if t == f {
            return true;
        }
        match (self.data(t), self.data(f)) {
            (TypeData::Prim(_), TypeData::Prim(_)) => true,
            (TypeData::Pointer { pointee: p1, .. }, TypeData::Pointer { pointee: p2, .. }) => {
                self.strip_const(*p1) == self.strip_const(*p2)
            }
            _ => false,
        }
    }

    pub fn display(&self, id: TypeId) -> String {
        match self.data(id) {
            TypeData::Void => "void".into(),
            TypeData::Prim(Prim::I8) => "i8".into(),
            TypeData::Prim(Prim::I32) => "i32".into(),
            TypeData::Prim(Prim::U8) => "u8".into(),
            TypeData::Prim(Prim::U32) => "u32".into(),
            TypeData::Pointer { pointee, .. } => format!("{}*", self.display(*pointee)),
            TypeData::Array { elem, len, .. } => format!("[{} x {}]", len, self.display(*elem)),
            TypeData::Struct { id, .. } => format!("%struct.{}", id),
            TypeData::Function { args, ret, .. } => {
                let a: Vec<_> = args.iter().map(|t| self.display(*t)).collect();
                format!("{} ({})", self.display(*ret), a.join(", "))
            }
            TypeData::Const(inner) => format!("const {}", self.display(*inner)),
        }
    }
}

impl Default for TypeCtx {
    fn default() -> Self {
        Self::new()
    }
}

fn align_up(offset: u32, align: u32) -> u32 {
    if align == 0 {
        return offset;
    }
    (offset + align - 1) / align * align
}

impl fmt::Debug for TypeCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeCtx({} interned types)", self.arena.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_structural() {
        let mut ctx = TypeCtx::new();
        let p1 = ctx.pointer(ctx.i32(), false);
        let p2 = ctx.pointer(ctx.i32(), false);
        assert_eq!(p1, p2);
    }

    #[test]
    fn const_wrapper_transparent_for_identity() {
        let mut ctx = TypeCtx::new();
        let i32_ty = ctx.i32();
        let const_i32 = ctx.const_of(i32_ty);
        assert_eq!(ctx.strip_const(const_i32), i32_ty);
        assert!(!ctx.can_accept(const_i32, i32_ty));
    }

    #[test]
    fn struct_layout_aligns_fields() {
        let mut ctx = TypeCtx::new();
        let fields = vec![
            StructField { name: "a".into(), ty: ctx.i8() },
            StructField { name: "b".into(), ty: ctx.i32() },
        ];
        let st = ctx.struct_type(fields, false);
        assert_eq!(ctx.field_offset(st, 0), 0);
        assert_eq!(ctx.field_offset(st, 1), 4);
        assert_eq!(ctx.size_of(st), 8);
    }

    #[test]
    fn array_size_is_elem_times_len() {
        let mut ctx = TypeCtx::new();
        let arr = ctx.array(ctx.i32(), 10, false);
        assert_eq!(ctx.size_of(arr), 40);
    }
}
