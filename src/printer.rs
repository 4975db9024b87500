//! Textual IR dump: globals first, then each function's blocks in
//! insertion order with a `preds: [...]` annotation and one instruction
//! per line.

use std::fmt::Write as FmtWrite;

use crate::module::Module;
use crate::value::{Linkage, ValueId, ValueKind};

pub struct IrPrinter<'m> {
    module: &'m Module,
    output: String,
}

impl<'m> IrPrinter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self { module, output: String::new() }
    }

    pub fn print(mut self) -> String {
        for &g in &self.module.globals {
            self.print_global(g);
        }
        if !self.module.globals.is_empty() {
            writeln!(self.output).unwrap();
        }
        for (i, &f) in self.module.functions.iter().enumerate() {
            if i > 0 {
                writeln!(self.output).unwrap();
            }
            self.print_function(f);
        }
        self.output
    }

    fn print_global(&mut self, g: ValueId) {
        let (name, linkage, is_var, init) = match &self.module.get(g).kind {
            ValueKind::GlobalVar { name, linkage, is_var, init } => (name.clone(), *linkage, *is_var, *init),
            _ => return,
        };
        write!(self.output, "@{} = {} {}", name, linkage_str(linkage), if is_var { "global" } else { "constant" }).unwrap();
        let ty = self.module.type_of(g).and_then(|t| self.module.types.pointee(t));
        if let Some(ty) = ty {
            write!(self.output, " {}", self.module.types.display(ty)).unwrap();
        }
        if let Some(init) = init {
            write!(self.output, " = {}", self.value_ref(init)).unwrap();
        }
        writeln!(self.output).unwrap();
    }

    fn print_function(&mut self, f: ValueId) {
        let (name, linkage) = match &self.module.get(f).kind {
            ValueKind::Function { name, linkage, .. } => (name.clone(), *linkage),
            _ => return,
        };
        let blocks = self.module.function_body(f).blocks.clone();
        let args = self.module.function_body(f).args.clone();
        let arg_list: Vec<String> = args.iter().map(|&a| self.value_ref(a)).collect();
        if blocks.is_empty() {
            writeln!(self.output, "declare {} @{}({})", linkage_str(linkage), name, arg_list.join(", ")).unwrap();
            return;
        }
        writeln!(self.output, "define {} @{}({}) {{", linkage_str(linkage), name, arg_list.join(", ")).unwrap();
        for &block in &blocks {
            self.print_block(block);
        }
        writeln!(self.output, "}}").unwrap();
    }

    fn print_block(&mut self, block: ValueId) {
        let body = self.module.block_body(block);
        let preds: Vec<String> = body.preds.iter().map(|p| format!("{}", p)).collect();
        writeln!(self.output, "{}: preds: [{}]", block_label(self.module, block), preds.join(", ")).unwrap();
        for &inst in &body.insts.clone() {
            self.print_inst(inst);
        }
    }

    fn print_inst(&mut self, inst: ValueId) {
        let kind = self.module.get(inst).kind.clone();
        write!(self.output, "  ").unwrap();
        if self.module.type_of(inst).is_some() && !kind.is_terminator() {
            write!(self.output, "{} = ", inst).unwrap();
        }
        match kind {
            ValueKind::Alloca => write!(self.output, "alloca {}", self.ty_str(inst)).unwrap(),
            ValueKind::Load { ptr } => write!(self.output, "load {}", self.value_ref(ptr)).unwrap(),
            ValueKind::Store { value, ptr } => {
                write!(self.output, "store {}, {}", self.value_ref(value), self.value_ref(ptr)).unwrap()
            }
            ValueKind::PtrAccess { ptr, index } => {
                write!(self.output, "ptr_access {}, {}", self.value_ref(ptr), self.value_ref(index)).unwrap()
            }
            ValueKind::ElemAccess { ptr, index } => {
                write!(self.output, "elem_access {}, {}", self.value_ref(ptr), self.value_ref(index)).unwrap()
            }
            ValueKind::Binary { op, lhs, rhs } => {
                write!(self.output, "{:?} {}, {}", op, self.value_ref(lhs), self.value_ref(rhs)).unwrap()
            }
            ValueKind::Unary { op, opr } => write!(self.output, "{:?} {}", op, self.value_ref(opr)).unwrap(),
            ValueKind::Cast { opr } => write!(self.output, "cast {} to {}", self.value_ref(opr), self.ty_str(inst)).unwrap(),
            ValueKind::Branch { cond, true_bb, false_bb } => write!(
                self.output,
                "br {}, {}, {}",
                self.value_ref(cond),
                block_label(self.module, true_bb),
                block_label(self.module, false_bb)
            )
            .unwrap(),
            ValueKind::Jump { target } => write!(self.output, "jmp {}", block_label(self.module, target)).unwrap(),
            ValueKind::Return { value } => match value {
                Some(v) => write!(self.output, "ret {}", self.value_ref(v)).unwrap(),
                None => write!(self.output, "ret").unwrap(),
            },
            ValueKind::Call { callee, args } => {
                let callee_name = match &self.module.get(callee).kind {
                    ValueKind::Function { name, .. } => name.clone(),
                    _ => format!("{}", callee),
                };
                let args_str: Vec<String> = args.iter().map(|&a| self.value_ref(a)).collect();
                write!(self.output, "call @{}({})", callee_name, args_str.join(", ")).unwrap()
            }
            ValueKind::Phi { operands } => {
                let parts: Vec<String> = operands
                    .iter()
                    .map(|&o| match &self.module.get(o).kind {
                        ValueKind::PhiOperand { value, block } => {
                            format!("[{}, {}]", self.value_ref(*value), block_label(self.module, *block))
                        }
                        _ => self.value_ref(o),
                    })
                    .collect();
                write!(self.output, "phi {}", parts.join(", ")).unwrap()
            }
            ValueKind::PhiOperand { .. } => {}
            ValueKind::Select { cond, true_val, false_val } => write!(
                self.output,
                "select {}, {}, {}",
                self.value_ref(cond),
                self.value_ref(true_val),
                self.value_ref(false_val)
            )
            .unwrap(),
            other => write!(self.output, "{:?}", other).unwrap(),
        }
        writeln!(self.output).unwrap();
    }

    fn value_ref(&self, id: ValueId) -> String {
        match &self.module.get(id).kind {
            ValueKind::ConstInt(v) => format!("{}", v),
            ValueKind::ConstZero => "zeroinit".to_string(),
            ValueKind::ConstStr(s) => format!("{:?}", s),
            ValueKind::Undef => "undef".to_string(),
            ValueKind::GlobalVar { name, .. } => format!("@{}", name),
            ValueKind::ArgRef { index, .. } => format!("%arg{}", index),
            ValueKind::BasicBlock(b) => b.name.clone(),
            _ => format!("{}", id),
        }
    }

    fn ty_str(&self, id: ValueId) -> String {
        self.module.type_of(id).map(|t| self.module.types.display(t)).unwrap_or_else(|| "?".to_string())
    }
}

fn linkage_str(linkage: Linkage) -> &'static str {
    match linkage {
        Linkage::Internal => "internal",
        Linkage::External => "external",
        Linkage::Inline => "inline",
        Linkage::GlobalCtor => "internal",
    }
}

fn block_label(module: &Module, block: ValueId) -> String {
    let name = &module.block_body(block).name;
    if name.is_empty() {
        format!("bb{}", block.index())
    } else {
        name.clone()
    }
}

pub fn print_module(module: &Module) -> String {
    IrPrinter::new(module).print()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Linkage;

    #[test]
    fn prints_a_function_with_a_constant_return() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "main".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        m.set_insert_point(entry);
        let zero = m.get_int32(0);
        m.create_return(Some(zero));

        let text = print_module(&m);
        assert!(text.contains("define external @main"));
        assert!(text.contains("entry: preds: []"));
        assert!(text.contains("ret"));
    }

    #[test]
    fn prints_block_predecessors_for_a_branch() {
        let mut m = Module::new();
        let i32_ty = m.types.i32();
        let fn_ty = m.types.function(vec![], i32_ty, false);
        let f = m.create_function(Linkage::External, "main".into(), fn_ty);
        let entry = m.create_block(f, "entry".into());
        let join = m.create_block(f, "join".into());
        m.set_insert_point(entry);
        let cond = m.get_bool(true);
        m.create_branch(cond, join, join);
        m.set_insert_point(join);
        let zero = m.get_int32(0);
        m.create_return(Some(zero));

        let text = print_module(&m);
        assert!(text.contains("join: preds: ["));
    }
}
