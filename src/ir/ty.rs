use std::fmt;

/// Index of an interned struct definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StructId(pub(crate) u32);

impl StructId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// `void`, only meaningful as a return type or behind a pointer.
    Void,
    /// Any non-pointer value: integers, floats, enums.
    Scalar,
    Pointer(Box<Ty>),
    /// Named struct, fields live in the program's struct table.
    Struct(StructId),
    Array(Box<Ty>, Option<u64>),
    /// Rejected by validation, type punning is not modelled.
    Union(String),
}

impl Ty {
    pub fn ptr(to: Ty) -> Ty {
        Ty::Pointer(Box::new(to))
    }

    pub fn array(of: Ty, size: Option<u64>) -> Ty {
        Ty::Array(Box::new(of), size)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Pointer(_))
    }

    /// What a pointer points to, or what an array holds.
    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Pointer(to) | Ty::Array(to, _) => Some(to),
            _ => None,
        }
    }
}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Void => write!(f, "void"),
            Ty::Scalar => write!(f, "scalar"),
            Ty::Pointer(to) => write!(f, "{}*", to),
            Ty::Struct(id) => write!(f, "struct#{}", id.0),
            Ty::Array(of, Some(size)) => write!(f, "{}[{}]", of, size),
            Ty::Array(of, None) => write!(f, "{}[]", of),
            Ty::Union(name) => write!(f, "union {}", name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructDef {
    pub name: String,
    pub fields: Vec<(String, Ty)>,
}

impl StructDef {
    pub fn field(&self, name: &str) -> Option<&Ty> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, ty)| ty)
    }
}
