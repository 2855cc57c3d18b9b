use std::collections::HashMap;

use super::{
    validate, BasicBlock, BlockId, Callee, Expr, FuncId, Function, Place, Program, Scope,
    SiteId, Statement, StructDef, StructId, Terminator, Ty, VarDecl, VarId,
};
use crate::error::{AnalysisError, Result};

struct PendingBlock {
    statements: Vec<Statement>,
    terminator: Option<Terminator>,
}

struct PendingFunction {
    name: String,
    params: Vec<VarId>,
    locals: Vec<VarId>,
    ret: Ty,
    variadic: bool,
    blocks: Vec<PendingBlock>,
    defined: bool,
}

/// Assembles a `Program`. Functions are declared first so that bodies can
/// call each other in any order, then defined through `define`.
pub struct ProgramBuilder {
    vars: Vec<VarDecl>,
    structs: Vec<StructDef>,
    struct_index: HashMap<String, StructId>,
    functions: Vec<PendingFunction>,
    globals: Vec<VarId>,
    next_site: u32,
    conflicts: Vec<String>,
}

impl Default for ProgramBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramBuilder {
    pub fn new() -> Self {
        Self {
            vars: Vec::new(),
            structs: Vec::new(),
            struct_index: HashMap::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            next_site: 0,
            conflicts: Vec::new(),
        }
    }

    /// Interns a struct by name. Redeclaring a name with the same fields
    /// returns the existing id. A declaration without fields is a forward
    /// declaration and may be completed later, which is how
    /// self-referential structs are built.
    pub fn declare_struct(&mut self, name: &str, fields: Vec<(&str, Ty)>) -> StructId {
        let fields: Vec<(String, Ty)> = fields
            .into_iter()
            .map(|(field, ty)| (field.to_owned(), ty))
            .collect();
        if let Some(id) = self.struct_index.get(name) {
            let existing = &mut self.structs[id.index()].fields;
            if existing.is_empty() {
                *existing = fields;
            } else if !fields.is_empty() && *existing != fields {
                self.conflicts
                    .push(format!("struct {} redeclared with different fields", name));
            }
            return *id;
        }
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructDef {
            name: name.to_owned(),
            fields,
        });
        self.struct_index.insert(name.to_owned(), id);
        id
    }

    pub fn struct_ty(&self, name: &str) -> Option<Ty> {
        self.struct_index.get(name).map(|id| Ty::Struct(*id))
    }

    pub fn global(&mut self, name: &str, ty: Ty) -> VarId {
        self.global_with_init(name, ty, None)
    }

    pub fn global_with_init(&mut self, name: &str, ty: Ty, init: Option<Expr>) -> VarId {
        let id = self.push_var(name, ty, Scope::Global, init);
        self.globals.push(id);
        id
    }

    pub fn declare_function(&mut self, name: &str, params: Vec<(&str, Ty)>, ret: Ty) -> FuncId {
        self.declare(name, params, ret, false)
    }

    pub fn declare_variadic(&mut self, name: &str, params: Vec<(&str, Ty)>, ret: Ty) -> FuncId {
        self.declare(name, params, ret, true)
    }

    fn declare(&mut self, name: &str, params: Vec<(&str, Ty)>, ret: Ty, variadic: bool) -> FuncId {
        let func = FuncId(self.functions.len() as u32);
        let params = params
            .into_iter()
            .map(|(param, ty)| self.push_var(param, ty, Scope::Param(func), None))
            .collect();
        self.functions.push(PendingFunction {
            name: name.to_owned(),
            params,
            locals: Vec::new(),
            ret,
            variadic,
            blocks: vec![PendingBlock {
                statements: Vec::new(),
                terminator: None,
            }],
            defined: false,
        });
        func
    }

    /// Opens the body of a declared function, positioned at its entry block.
    pub fn define(&mut self, func: FuncId) -> FunctionBuilder<'_> {
        self.functions[func.index()].defined = true;
        FunctionBuilder {
            program: self,
            func,
            current: BlockId::ENTRY,
        }
    }

    fn push_var(&mut self, name: &str, ty: Ty, scope: Scope, init: Option<Expr>) -> VarId {
        let id = VarId(self.vars.len() as u32);
        self.vars.push(VarDecl {
            name: name.to_owned(),
            ty,
            scope,
            init,
        });
        id
    }

    fn next_site(&mut self) -> SiteId {
        let site = SiteId(self.next_site);
        self.next_site += 1;
        site
    }

    /// Finishes construction and validates the program.
    pub fn build(self) -> Result<Program> {
        if let Some(conflict) = self.conflicts.into_iter().next() {
            return Err(AnalysisError::MalformedIr(conflict));
        }
        let mut functions = Vec::with_capacity(self.functions.len());
        for (index, pending) in self.functions.into_iter().enumerate() {
            if !pending.defined {
                return Err(AnalysisError::MalformedIr(format!(
                    "function `{}` is declared but never defined",
                    pending.name
                )));
            }
            let mut blocks = Vec::with_capacity(pending.blocks.len());
            for (block_index, block) in pending.blocks.into_iter().enumerate() {
                let terminator = block.terminator.ok_or_else(|| {
                    AnalysisError::MalformedIr(format!(
                        "block {} of `{}` has no terminator",
                        block_index, pending.name
                    ))
                })?;
                blocks.push(BasicBlock {
                    statements: block.statements,
                    terminator,
                });
            }
            functions.push(Function {
                id: FuncId(index as u32),
                name: pending.name,
                params: pending.params,
                locals: pending.locals,
                ret: pending.ret,
                variadic: pending.variadic,
                blocks,
            });
        }
        let program = Program {
            vars: self.vars,
            structs: self.structs,
            functions,
            globals: self.globals,
        };
        validate::validate(&program)?;
        Ok(program)
    }
}

/// Appends statements to one function body. Statements go to the current
/// block; `switch_to` moves between blocks.
pub struct FunctionBuilder<'a> {
    program: &'a mut ProgramBuilder,
    func: FuncId,
    current: BlockId,
}

impl<'a> FunctionBuilder<'a> {
    pub fn id(&self) -> FuncId {
        self.func
    }

    pub fn param(&self, index: usize) -> VarId {
        self.program.functions[self.func.index()].params[index]
    }

    pub fn local(&mut self, name: &str, ty: Ty) -> VarId {
        let id = self
            .program
            .push_var(name, ty, Scope::Local(self.func), None);
        self.program.functions[self.func.index()].locals.push(id);
        id
    }

    pub fn new_block(&mut self) -> BlockId {
        let blocks = &mut self.program.functions[self.func.index()].blocks;
        blocks.push(PendingBlock {
            statements: Vec::new(),
            terminator: None,
        });
        BlockId(blocks.len() as u32 - 1)
    }

    pub fn current_block(&self) -> BlockId {
        self.current
    }

    pub fn switch_to(&mut self, block: BlockId) {
        self.current = block;
    }

    /// Index the next statement of the current block will get.
    pub fn next_statement_index(&self) -> usize {
        self.block_ref().statements.len()
    }

    pub fn assign(&mut self, dest: Place, value: Expr) -> &mut Self {
        self.push(Statement::Assign(dest, value));
        self
    }

    pub fn alloc(&mut self, dest: Place, ty: Ty) -> SiteId {
        let site = self.program.next_site();
        self.push(Statement::Alloc { dest, site, ty });
        site
    }

    pub fn call(&mut self, dest: Option<Place>, callee: FuncId, args: Vec<Expr>) -> SiteId {
        self.push_call(dest, Callee::Direct(callee), args)
    }

    pub fn call_external(&mut self, dest: Option<Place>, name: &str, args: Vec<Expr>) -> SiteId {
        self.push_call(dest, Callee::External(name.to_owned()), args)
    }

    pub fn call_indirect(&mut self, dest: Option<Place>, target: Expr, args: Vec<Expr>) -> SiteId {
        self.push_call(dest, Callee::Indirect(target), args)
    }

    fn push_call(&mut self, dest: Option<Place>, callee: Callee, args: Vec<Expr>) -> SiteId {
        let site = self.program.next_site();
        self.push(Statement::Call {
            dest,
            callee,
            args,
            site,
        });
        site
    }

    pub fn goto(&mut self, target: BlockId) {
        self.terminate(Terminator::Goto(target));
    }

    pub fn branch(&mut self, cond: Expr, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn ret(&mut self, value: Option<Expr>) {
        self.terminate(Terminator::Return(value));
    }

    fn push(&mut self, statement: Statement) {
        self.block_mut().statements.push(statement);
    }

    fn terminate(&mut self, terminator: Terminator) {
        self.block_mut().terminator = Some(terminator);
    }

    fn block_mut(&mut self) -> &mut PendingBlock {
        &mut self.program.functions[self.func.index()].blocks[self.current.index()]
    }

    fn block_ref(&self) -> &PendingBlock {
        &self.program.functions[self.func.index()].blocks[self.current.index()]
    }
}
