//! Construction-time checks. Anything accepted here can be analysed without
//! further shape errors.

use super::{
    BlockId, Callee, Expr, FuncId, Function, Place, Program, Projection, Scope, Statement,
    Terminator, Ty,
};
use crate::error::{AnalysisError, Result};

pub(super) fn validate(program: &Program) -> Result<()> {
    for (index, decl) in program.vars.iter().enumerate() {
        check_ty(program, &decl.ty, &decl.name)?;
        if let Some(init) = &decl.init {
            if decl.scope != Scope::Global {
                return Err(malformed(format!(
                    "non-global `{}` carries a static initializer",
                    decl.name
                )));
            }
            check_global_init(program, init, index)?;
        }
    }
    for def in program.structs.iter() {
        for (field, ty) in def.fields.iter() {
            check_ty(program, ty, &format!("{}.{}", def.name, field))?;
        }
    }
    for (index, func) in program.functions.iter().enumerate() {
        if program
            .functions
            .iter()
            .skip(index + 1)
            .any(|other| other.name == func.name)
        {
            return Err(malformed(format!("function `{}` defined twice", func.name)));
        }
        check_function(program, func)?;
    }
    Ok(())
}

fn malformed(message: String) -> AnalysisError {
    AnalysisError::MalformedIr(message)
}

fn check_ty(program: &Program, ty: &Ty, what: &str) -> Result<()> {
    match ty {
        Ty::Union(name) => Err(AnalysisError::UnsupportedConstruct(format!(
            "union {} used by `{}`",
            name, what
        ))),
        Ty::Struct(id) if id.index() >= program.structs.len() => {
            Err(malformed(format!("`{}` refers to an undeclared struct", what)))
        }
        Ty::Pointer(to) | Ty::Array(to, _) => check_ty(program, to, what),
        _ => Ok(()),
    }
}

fn check_global_init(program: &Program, init: &Expr, var: usize) -> Result<()> {
    match init {
        Expr::Null | Expr::Scalar => Ok(()),
        Expr::AddressOf(place) if program.var(place.var).scope == Scope::Global => {
            program.place_ty(place).map(|_| ())
        }
        _ => Err(malformed(format!(
            "initializer of global `{}` is not a constant",
            program.vars[var].name
        ))),
    }
}

fn check_function(program: &Program, func: &Function) -> Result<()> {
    if func.variadic {
        return Err(AnalysisError::UnsupportedConstruct(format!(
            "variadic function `{}`",
            func.name
        )));
    }
    if func.blocks.is_empty() {
        return Err(malformed(format!("function `{}` has no blocks", func.name)));
    }
    if matches!(func.ret, Ty::Struct(_) | Ty::Array(..)) && program.holds_pointers(&func.ret) {
        return Err(AnalysisError::UnsupportedConstruct(format!(
            "`{}` returns an aggregate holding pointers by value",
            func.name
        )));
    }
    let checker = FunctionChecker { program, func };
    for block in func.blocks.iter() {
        for statement in block.statements.iter() {
            checker.statement(statement)?;
        }
        checker.terminator(&block.terminator)?;
    }
    Ok(())
}

struct FunctionChecker<'p> {
    program: &'p Program,
    func: &'p Function,
}

impl<'p> FunctionChecker<'p> {
    fn statement(&self, statement: &Statement) -> Result<()> {
        match statement {
            Statement::Assign(dest, value) => {
                self.place(dest)?;
                self.expr(value)
            }
            Statement::Alloc { dest, ty, .. } => {
                check_ty(self.program, ty, &self.func.name)?;
                if !self.program.place_ty(dest)?.is_pointer() {
                    return Err(malformed(format!(
                        "allocation in `{}` stored into a non-pointer",
                        self.func.name
                    )));
                }
                self.place(dest)
            }
            Statement::Call {
                dest, callee, args, ..
            } => {
                if let Some(dest) = dest {
                    self.place(dest)?;
                }
                for arg in args.iter() {
                    self.expr(arg)?;
                }
                match callee {
                    Callee::Direct(target) => self.direct_call(*target, args.len()),
                    Callee::External(name) if name.is_empty() => {
                        Err(malformed(format!("unnamed external in `{}`", self.func.name)))
                    }
                    Callee::External(_) => Ok(()),
                    Callee::Indirect(_) => Err(AnalysisError::UnsupportedConstruct(format!(
                        "indirect call in `{}`",
                        self.func.name
                    ))),
                }
            }
        }
    }

    fn direct_call(&self, target: FuncId, arity: usize) -> Result<()> {
        let Some(callee) = self.program.functions.get(target.index()) else {
            return Err(malformed(format!(
                "`{}` calls an unknown function",
                self.func.name
            )));
        };
        if callee.params.len() != arity {
            return Err(malformed(format!(
                "`{}` calls `{}` with {} arguments, expected {}",
                self.func.name,
                callee.name,
                arity,
                callee.params.len()
            )));
        }
        Ok(())
    }

    fn terminator(&self, terminator: &Terminator) -> Result<()> {
        for target in terminator.successors() {
            self.block(target)?;
        }
        match terminator {
            Terminator::Branch { cond, .. } => self.expr(cond),
            Terminator::Return(Some(value)) => {
                if self.func.ret == Ty::Void {
                    return Err(malformed(format!(
                        "void function `{}` returns a value",
                        self.func.name
                    )));
                }
                self.expr(value)
            }
            Terminator::Return(None) | Terminator::Goto(_) => Ok(()),
        }
    }

    fn block(&self, block: BlockId) -> Result<()> {
        if self.func.block(block).is_none() {
            return Err(malformed(format!(
                "`{}` jumps to missing block {}",
                self.func.name,
                block.index()
            )));
        }
        Ok(())
    }

    fn place(&self, place: &Place) -> Result<()> {
        let Some(decl) = self.program.vars.get(place.var.index()) else {
            return Err(malformed(format!(
                "`{}` refers to an unknown variable",
                self.func.name
            )));
        };
        if let Some(owner) = decl.owner() {
            if owner != self.func.id {
                return Err(malformed(format!(
                    "`{}` uses `{}` which belongs to another function",
                    self.func.name, decl.name
                )));
            }
        }
        self.program.place_ty(place)?;
        for elem in place.projection.iter() {
            if let Projection::Field(name) = elem {
                if name.is_empty() {
                    return Err(malformed(format!("empty field name in `{}`", self.func.name)));
                }
            }
        }
        Ok(())
    }

    fn expr(&self, expr: &Expr) -> Result<()> {
        match expr {
            Expr::Use(place) | Expr::AddressOf(place) => self.place(place),
            Expr::Offset(base, offset) => {
                self.expr(base)?;
                self.expr(offset)?;
                self.program.expr_ty(expr).map(|_| ())
            }
            Expr::Binary(_, lhs, rhs) => {
                self.expr(lhs)?;
                self.expr(rhs)
            }
            Expr::Null | Expr::Scalar => Ok(()),
        }
    }
}
