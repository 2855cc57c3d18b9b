//! # location
//!
//! Abstract storage locations and points-to sets.
//!
//! Locations are interned in a `LocationArena` owned by one analysis run and
//! referred to by `LocId`. Interning makes structural equality an id
//! comparison: two `Field(base, "x")` built from the same base are the same
//! `LocId`.
//!
//! Nesting is k-limited. When a field, element or incoming location would
//! exceed `max_depth`, the base is returned instead and marked as a
//! summary, so the arena stays finite for loops such as `p = p->next`.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use log::warn;

use crate::ir::{FuncId, Program, Scope, SiteId, VarId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LocId(u32);

impl LocId {
    /// The null pointer value, interned first in every arena.
    pub const NULL: LocId = LocId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AbstractLocation {
    Null,
    StackVar(FuncId, VarId),
    GlobalVar(VarId),
    /// Every object allocated at one static call site.
    HeapSite(SiteId),
    /// The unknown object `base` pointed to when the analysed function was
    /// entered, owned by the caller.
    Incoming(LocId),
    Field(LocId, String),
    /// All elements of the array stored at (or starting at) `base`.
    ArrayElement(LocId),
}

pub struct LocationArena {
    locations: Vec<AbstractLocation>,
    depths: Vec<usize>,
    index: HashMap<AbstractLocation, LocId>,
    summarized: HashSet<LocId>,
    max_depth: usize,
}

impl LocationArena {
    pub fn new(max_depth: usize) -> Self {
        let mut arena = Self {
            locations: Vec::new(),
            depths: Vec::new(),
            index: HashMap::new(),
            summarized: HashSet::new(),
            max_depth: max_depth.max(1),
        };
        arena.intern(AbstractLocation::Null, 0);
        arena
    }

    fn intern(&mut self, location: AbstractLocation, depth: usize) -> LocId {
        if let Some(id) = self.index.get(&location) {
            return *id;
        }
        let id = LocId(self.locations.len() as u32);
        self.locations.push(location.clone());
        self.depths.push(depth);
        self.index.insert(location, id);
        id
    }

    /// Storage of a variable.
    pub fn var(&mut self, program: &Program, var: VarId) -> LocId {
        self.intern(Self::var_location(program, var), 0)
    }

    fn var_location(program: &Program, var: VarId) -> AbstractLocation {
        match program.var(var).scope {
            Scope::Global => AbstractLocation::GlobalVar(var),
            Scope::Param(func) | Scope::Local(func) => AbstractLocation::StackVar(func, var),
        }
    }

    pub fn heap(&mut self, site: SiteId) -> LocId {
        self.intern(AbstractLocation::HeapSite(site), 0)
    }

    pub fn field(&mut self, base: LocId, name: &str) -> LocId {
        self.nested(base, AbstractLocation::Field(base, name.to_owned()))
    }

    /// Element summary of `base`. The element of an element is itself, so
    /// repeated pointer arithmetic stays on one location.
    pub fn element(&mut self, base: LocId) -> LocId {
        if let AbstractLocation::ArrayElement(_) = self.get(base) {
            return base;
        }
        self.nested(base, AbstractLocation::ArrayElement(base))
    }

    pub fn incoming(&mut self, base: LocId) -> LocId {
        self.nested(base, AbstractLocation::Incoming(base))
    }

    fn nested(&mut self, base: LocId, location: AbstractLocation) -> LocId {
        if let Some(id) = self.index.get(&location) {
            return *id;
        }
        let depth = self.depths[base.index()] + 1;
        if depth > self.max_depth {
            if self.summarized.insert(base) {
                warn!("location depth limit reached, summarizing {:?}", self.get(base));
            }
            return base;
        }
        self.intern(location, depth)
    }

    /// Read-only lookup, `None` if the location was never built.
    pub fn lookup(&self, location: &AbstractLocation) -> Option<LocId> {
        self.index.get(location).copied()
    }

    pub fn lookup_var(&self, program: &Program, var: VarId) -> Option<LocId> {
        self.lookup(&Self::var_location(program, var))
    }

    pub fn lookup_field(&self, base: LocId, name: &str) -> Option<LocId> {
        self.lookup(&AbstractLocation::Field(base, name.to_owned()))
    }

    pub fn get(&self, id: LocId) -> &AbstractLocation {
        &self.locations[id.index()]
    }

    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = LocId> {
        (0..self.locations.len() as u32).map(LocId)
    }

    /// The object containing `id`: strips fields and elements.
    pub fn object(&self, id: LocId) -> LocId {
        let mut current = id;
        loop {
            match self.get(current) {
                AbstractLocation::Field(base, _) | AbstractLocation::ArrayElement(base) => {
                    current = *base
                }
                _ => return current,
            }
        }
    }

    /// The variable a location was derived from, through fields, elements
    /// and incoming objects.
    pub fn origin(&self, id: LocId) -> Option<VarId> {
        let mut current = id;
        loop {
            match self.get(current) {
                AbstractLocation::Field(base, _)
                | AbstractLocation::ArrayElement(base)
                | AbstractLocation::Incoming(base) => current = *base,
                AbstractLocation::StackVar(_, var) | AbstractLocation::GlobalVar(var) => {
                    return Some(*var)
                }
                AbstractLocation::HeapSite(_) | AbstractLocation::Null => return None,
            }
        }
    }

    pub fn heap_site(&self, id: LocId) -> Option<SiteId> {
        match self.get(self.object(id)) {
            AbstractLocation::HeapSite(site) => Some(*site),
            _ => None,
        }
    }

    pub fn is_incoming(&self, id: LocId) -> bool {
        matches!(self.get(self.object(id)), AbstractLocation::Incoming(_))
    }

    /// The stack frame holding `id`, if it lives in one.
    pub fn frame(&self, id: LocId) -> Option<FuncId> {
        match self.get(self.object(id)) {
            AbstractLocation::StackVar(func, _) => Some(*func),
            _ => None,
        }
    }

    /// Whether `id` names exactly one runtime cell, so that a store to it
    /// may overwrite the previous contents.
    pub fn is_singular(&self, id: LocId) -> bool {
        if self.summarized.contains(&id) {
            return false;
        }
        match self.get(id) {
            AbstractLocation::StackVar(..)
            | AbstractLocation::GlobalVar(_)
            | AbstractLocation::Incoming(_) => true,
            AbstractLocation::Field(base, _) => self.is_singular(*base),
            AbstractLocation::Null
            | AbstractLocation::HeapSite(_)
            | AbstractLocation::ArrayElement(_) => false,
        }
    }

    /// Whether `id` is `ancestor` or one of its fields/elements.
    pub fn is_within(&self, id: LocId, ancestor: LocId) -> bool {
        let mut current = id;
        loop {
            if current == ancestor {
                return true;
            }
            match self.get(current) {
                AbstractLocation::Field(base, _) | AbstractLocation::ArrayElement(base) => {
                    current = *base
                }
                _ => return false,
            }
        }
    }

    /// Re-roots `id` from `from` onto `to`: `from.a[*]` becomes `to.a[*]`.
    pub fn rebase(&mut self, id: LocId, from: LocId, to: LocId) -> Option<LocId> {
        if id == from {
            return Some(to);
        }
        match self.get(id).clone() {
            AbstractLocation::Field(base, name) => {
                let base = self.rebase(base, from, to)?;
                Some(self.field(base, &name))
            }
            AbstractLocation::ArrayElement(base) => {
                let base = self.rebase(base, from, to)?;
                Some(self.element(base))
            }
            _ => None,
        }
    }

    pub fn display<'a>(&'a self, id: LocId, program: &'a Program) -> DisplayLocation<'a> {
        DisplayLocation {
            arena: self,
            program,
            id,
        }
    }
}

/// Renders a location as `card0`, `heap#3`, `*p`, `x0.next` or `x0[*]`.
pub struct DisplayLocation<'a> {
    arena: &'a LocationArena,
    program: &'a Program,
    id: LocId,
}

impl<'a> fmt::Display for DisplayLocation<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nested = |id| self.arena.display(id, self.program);
        match self.arena.get(self.id) {
            AbstractLocation::Null => write!(f, "null"),
            AbstractLocation::StackVar(_, var) | AbstractLocation::GlobalVar(var) => {
                write!(f, "{}", self.program.var(*var).name)
            }
            AbstractLocation::HeapSite(site) => write!(f, "heap#{}", site.index()),
            AbstractLocation::Incoming(base) => write!(f, "*{}", nested(*base)),
            AbstractLocation::Field(base, name) => write!(f, "{}.{}", nested(*base), name),
            AbstractLocation::ArrayElement(base) => write!(f, "{}[*]", nested(*base)),
        }
    }
}

/// May-point-to set: the pointer holds one of these locations.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PointsToSet(BTreeSet<LocId>);

impl PointsToSet {
    pub fn new() -> Self {
        Self(BTreeSet::new())
    }

    pub fn singleton(id: LocId) -> Self {
        let mut set = BTreeSet::new();
        set.insert(id);
        Self(set)
    }

    pub fn null() -> Self {
        Self::singleton(LocId::NULL)
    }

    pub fn insert(&mut self, id: LocId) -> bool {
        self.0.insert(id)
    }

    /// Join. Returns whether `self` grew.
    pub fn union(&mut self, other: &PointsToSet) -> bool {
        let before = self.0.len();
        self.0.extend(other.0.iter().copied());
        self.0.len() != before
    }

    pub fn contains(&self, id: LocId) -> bool {
        self.0.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = LocId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_singleton(&self) -> Option<LocId> {
        if self.0.len() == 1 {
            self.0.iter().next().copied()
        } else {
            None
        }
    }

    pub fn contains_null(&self) -> bool {
        self.contains(LocId::NULL)
    }

    /// The real locations, `Null` removed.
    pub fn without_null(&self) -> PointsToSet {
        self.iter().filter(|id| *id != LocId::NULL).collect()
    }

    pub fn may_alias(&self, other: &PointsToSet) -> bool {
        self.iter().any(|id| id != LocId::NULL && other.contains(id))
    }

    /// Both sets hold the same single real location.
    pub fn must_alias(&self, other: &PointsToSet) -> bool {
        match (self.as_singleton(), other.as_singleton()) {
            (Some(a), Some(b)) => a == b && a != LocId::NULL,
            _ => false,
        }
    }
}

impl FromIterator<LocId> for PointsToSet {
    fn from_iter<T: IntoIterator<Item = LocId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<LocId> for PointsToSet {
    fn extend<T: IntoIterator<Item = LocId>>(&mut self, iter: T) {
        self.0.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ProgramBuilder, Ty};

    fn program_with_local() -> (Program, VarId) {
        let mut builder = ProgramBuilder::new();
        let f = builder.declare_function("f", vec![("p", Ty::ptr(Ty::Scalar))], Ty::Void);
        let mut body = builder.define(f);
        let p = body.param(0);
        body.ret(None);
        (builder.build().unwrap(), p)
    }

    #[test]
    fn test_interning_is_structural() {
        let (program, p) = program_with_local();
        let mut arena = LocationArena::new(8);
        let a = arena.var(&program, p);
        let b = arena.var(&program, p);
        assert_eq!(a, b);
        assert_eq!(arena.field(a, "x"), arena.field(b, "x"));
        assert_ne!(arena.field(a, "x"), arena.field(a, "y"));
        assert_eq!(arena.heap(SiteId(3)), arena.heap(SiteId(3)));
    }

    #[test]
    fn test_element_of_element_is_element() {
        let (program, p) = program_with_local();
        let mut arena = LocationArena::new(8);
        let base = arena.var(&program, p);
        let incoming = arena.incoming(base);
        let element = arena.element(incoming);
        assert_ne!(element, incoming);
        assert_eq!(arena.element(element), element);
        assert!(!arena.is_singular(element));
        assert!(arena.is_singular(incoming));
    }

    #[test]
    fn test_depth_limit_summarizes_base() {
        let (program, p) = program_with_local();
        let mut arena = LocationArena::new(2);
        let base = arena.var(&program, p);
        let one = arena.incoming(base);
        let two = arena.field(one, "next");
        let three = arena.incoming(two);
        assert_eq!(three, two);
        assert!(!arena.is_singular(two));
    }

    #[test]
    fn test_object_origin_and_rebase() {
        let (program, p) = program_with_local();
        let mut arena = LocationArena::new(8);
        let base = arena.var(&program, p);
        let heap = arena.heap(SiteId(0));
        let field = arena.field(heap, "next");
        let element = arena.element(field);
        assert_eq!(arena.object(element), heap);
        assert_eq!(arena.heap_site(element), Some(SiteId(0)));
        assert!(arena.is_within(element, heap));
        let incoming = arena.incoming(base);
        assert_eq!(arena.origin(incoming), Some(p));

        let other = arena.heap(SiteId(1));
        let rebased = arena.rebase(element, heap, other).unwrap();
        assert_eq!(format!("{}", arena.display(rebased, &program)), "heap#1.next[*]");
        assert_eq!(arena.rebase(base, heap, other), None);
    }

    #[test]
    fn test_points_to_set_predicates() {
        let a = LocId(1);
        let b = LocId(2);
        let single = PointsToSet::singleton(a);
        let pair: PointsToSet = vec![a, b].into_iter().collect();
        assert!(single.must_alias(&PointsToSet::singleton(a)));
        assert!(!single.must_alias(&pair));
        assert!(single.may_alias(&pair));
        assert!(!PointsToSet::null().must_alias(&PointsToSet::null()));
        assert!(!PointsToSet::null().may_alias(&PointsToSet::null()));

        let mut joined = PointsToSet::null();
        assert!(joined.union(&single));
        assert!(!joined.union(&single));
        assert_eq!(joined.without_null(), single);
    }
}
