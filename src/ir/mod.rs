//! # ir
//!
//! A small C-like intermediate representation. A front end lowers source
//! into a `Program` through `ProgramBuilder`; the analyses only read it.
//!
//! Identifiers are resolved before the IR exists: every variable is a
//! `VarId` into one symbol arena, so a local `x0` shadowing a global `x0`
//! is a different symbol.
mod builder;
mod ty;
mod validate;

pub use builder::{FunctionBuilder, ProgramBuilder};
pub use ty::{StructDef, StructId, Ty};

use crate::error::{AnalysisError, Result};

macro_rules! index_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            pub fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

index_type!(
    /// Handle of a variable in the program's symbol arena.
    VarId
);
index_type!(FuncId);
index_type!(BlockId);
index_type!(
    /// Static call site. Allocation sites are call sites of allocators.
    SiteId
);

impl BlockId {
    pub const ENTRY: BlockId = BlockId(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Global,
    Param(FuncId),
    Local(FuncId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarDecl {
    pub name: String,
    pub ty: Ty,
    pub scope: Scope,
    /// Static initializer, globals only.
    pub init: Option<Expr>,
}

impl VarDecl {
    /// The function owning this variable's storage, `None` for globals.
    pub fn owner(&self) -> Option<FuncId> {
        match self.scope {
            Scope::Global => None,
            Scope::Param(func) | Scope::Local(func) => Some(func),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Projection {
    Deref,
    Field(String),
    /// `base[i]`. Index values are not tracked.
    Index,
}

/// An lvalue: a variable followed by projections, e.g. `p->next[i].x` is
/// `p, Deref, Field(next), Index, Field(x)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Place {
    pub var: VarId,
    pub projection: Vec<Projection>,
}

impl Place {
    pub fn var(var: VarId) -> Self {
        Self {
            var,
            projection: Vec::new(),
        }
    }

    pub fn deref(mut self) -> Self {
        self.projection.push(Projection::Deref);
        self
    }

    pub fn field(mut self, name: &str) -> Self {
        self.projection.push(Projection::Field(name.to_owned()));
        self
    }

    pub fn index(mut self) -> Self {
        self.projection.push(Projection::Index);
        self
    }

    /// `p->field`
    pub fn arrow(self, name: &str) -> Self {
        self.deref().field(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Expr {
    /// Read an lvalue. Arrays decay to the address of their storage.
    Use(Place),
    AddressOf(Place),
    /// Pointer arithmetic `base + offset`.
    Offset(Box<Expr>, Box<Expr>),
    /// The null pointer, `0` in pointer context.
    Null,
    /// Opaque non-pointer value.
    Scalar,
    /// Scalar arithmetic or comparison.
    Binary(BinOp, Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn var(var: VarId) -> Self {
        Expr::Use(Place::var(var))
    }

    pub fn offset(base: Expr, offset: Expr) -> Self {
        Expr::Offset(Box::new(base), Box::new(offset))
    }

    pub fn binary(op: BinOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Callee {
    Direct(FuncId),
    /// A library function without a body, e.g. `malloc` or `printf`.
    External(String),
    /// Call through a function pointer. Not modelled.
    Indirect(Expr),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    Assign(Place, Expr),
    Alloc {
        dest: Place,
        site: SiteId,
        ty: Ty,
    },
    Call {
        dest: Option<Place>,
        callee: Callee,
        args: Vec<Expr>,
        site: SiteId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Goto(BlockId),
    Branch {
        cond: Expr,
        then_block: BlockId,
        else_block: BlockId,
    },
    Return(Option<Expr>),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Goto(target) => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Return(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicBlock {
    pub statements: Vec<Statement>,
    pub terminator: Terminator,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    pub params: Vec<VarId>,
    pub locals: Vec<VarId>,
    pub ret: Ty,
    pub variadic: bool,
    /// `blocks[0]` is the entry block.
    pub blocks: Vec<BasicBlock>,
}

impl Function {
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId)
    }

    /// Parameters followed by locals.
    pub fn variables(&self) -> impl Iterator<Item = VarId> + '_ {
        self.params.iter().chain(self.locals.iter()).copied()
    }
}

/// A point between statements: before `statement_index` of `block`.
/// `statement_index == statements.len()` is the point before the terminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub block: BlockId,
    pub statement_index: usize,
}

impl Location {
    pub fn new(block: BlockId, statement_index: usize) -> Self {
        Self {
            block,
            statement_index,
        }
    }

    /// The point right after statement `statement_index` executed.
    pub fn after(block: BlockId, statement_index: usize) -> Self {
        Self::new(block, statement_index + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramPoint {
    At(FuncId, Location),
    /// Joined over every `return` of the function.
    Exit(FuncId),
}

impl ProgramPoint {
    pub fn function(&self) -> FuncId {
        match self {
            ProgramPoint::At(func, _) | ProgramPoint::Exit(func) => *func,
        }
    }
}

/// A whole program. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub(crate) vars: Vec<VarDecl>,
    pub(crate) structs: Vec<StructDef>,
    pub(crate) functions: Vec<Function>,
    pub(crate) globals: Vec<VarId>,
}

impl Program {
    pub fn var(&self, id: VarId) -> &VarDecl {
        &self.vars[id.index()]
    }

    /// `None` for an id that does not belong to this program.
    pub fn get_var(&self, id: VarId) -> Option<&VarDecl> {
        self.vars.get(id.index())
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.index()]
    }

    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    pub fn function_by_name(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|func| func.name == name)
    }

    pub fn globals(&self) -> &[VarId] {
        &self.globals
    }

    pub fn struct_def(&self, id: StructId) -> &StructDef {
        &self.structs[id.index()]
    }

    pub fn contains_point(&self, point: ProgramPoint) -> bool {
        let Some(func) = self.functions.get(point.function().index()) else {
            return false;
        };
        match point {
            ProgramPoint::Exit(_) => true,
            ProgramPoint::At(_, location) => func
                .block(location.block)
                .map_or(false, |block| location.statement_index <= block.statements.len()),
        }
    }

    /// Whether a value of this type may carry a pointer.
    pub fn holds_pointers(&self, ty: &Ty) -> bool {
        match ty {
            Ty::Pointer(_) => true,
            Ty::Struct(id) => self
                .struct_def(*id)
                .fields
                .iter()
                .any(|(_, field)| self.holds_pointers(field)),
            Ty::Array(of, _) => self.holds_pointers(of),
            Ty::Void | Ty::Scalar | Ty::Union(_) => false,
        }
    }

    /// Field paths from an object of type `ty` to each pointer cell it holds
    /// directly. Array contents are not named.
    pub fn pointer_paths(&self, ty: &Ty) -> Vec<Vec<String>> {
        match ty {
            Ty::Pointer(_) => vec![Vec::new()],
            Ty::Struct(id) => {
                let mut paths = Vec::new();
                for (name, field) in self.struct_def(*id).fields.iter() {
                    for mut path in self.pointer_paths(field) {
                        path.insert(0, name.clone());
                        paths.push(path);
                    }
                }
                paths
            }
            Ty::Array(..) | Ty::Void | Ty::Scalar | Ty::Union(_) => Vec::new(),
        }
    }

    pub fn field_ty(&self, ty: &Ty, name: &str) -> Result<Ty> {
        let Ty::Struct(id) = ty else {
            return Err(AnalysisError::MalformedIr(format!(
                "field `{}` of non-struct type {}",
                name, ty
            )));
        };
        let def = self.struct_def(*id);
        def.field(name).cloned().ok_or_else(|| {
            AnalysisError::MalformedIr(format!("struct {} has no field `{}`", def.name, name))
        })
    }

    pub fn place_ty(&self, place: &Place) -> Result<Ty> {
        let mut ty = self.var(place.var).ty.clone();
        for elem in place.projection.iter() {
            ty = match elem {
                Projection::Deref => match ty {
                    Ty::Pointer(to) => *to,
                    other => {
                        return Err(AnalysisError::MalformedIr(format!(
                            "dereference of non-pointer type {} in `{}`",
                            other,
                            self.var(place.var).name
                        )))
                    }
                },
                Projection::Field(name) => self.field_ty(&ty, name)?,
                Projection::Index => match ty {
                    Ty::Pointer(of) | Ty::Array(of, _) => *of,
                    other => {
                        return Err(AnalysisError::MalformedIr(format!(
                            "index into non-indexable type {} in `{}`",
                            other,
                            self.var(place.var).name
                        )))
                    }
                },
            };
        }
        Ok(ty)
    }

    pub fn expr_ty(&self, expr: &Expr) -> Result<Ty> {
        match expr {
            Expr::Use(place) => self.place_ty(place),
            Expr::AddressOf(place) => Ok(Ty::ptr(self.place_ty(place)?)),
            Expr::Offset(base, _) => match self.expr_ty(base)? {
                Ty::Pointer(to) | Ty::Array(to, _) => Ok(Ty::Pointer(to)),
                other => Err(AnalysisError::MalformedIr(format!(
                    "pointer arithmetic on non-pointer type {}",
                    other
                ))),
            },
            Expr::Null => Ok(Ty::ptr(Ty::Void)),
            Expr::Scalar | Expr::Binary(..) => Ok(Ty::Scalar),
        }
    }
}
