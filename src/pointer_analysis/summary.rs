use std::collections::{BTreeSet, HashMap};

use super::state::PtsState;
use crate::ir::FuncId;
use crate::location::{AbstractLocation, LocId, LocationArena, PointsToSet};

/// Renames the locations of a callee summary into the caller's terms at one
/// call site.
///
/// A summary talks about the objects the formals pointed to on entry
/// (`Incoming(formal)`) and about what those objects held
/// (`Incoming(Incoming(formal))`, and so on). At a call site the former are
/// the pointees of the actuals and the latter are read from the caller state
/// before the call. The callee frame maps to nothing. Every other location
/// keeps its name.
pub(crate) struct SummaryTranslation<'s> {
    callee: FuncId,
    before: &'s PtsState,
    /// Pointer formal -> what the actual points to.
    pointer_formals: HashMap<LocId, PointsToSet>,
    /// Aggregate formal -> the caller objects it was copied from.
    aggregate_formals: HashMap<LocId, BTreeSet<LocId>>,
    cache: HashMap<LocId, BTreeSet<LocId>>,
}

impl<'s> SummaryTranslation<'s> {
    pub(crate) fn new(callee: FuncId, before: &'s PtsState) -> Self {
        Self {
            callee,
            before,
            pointer_formals: HashMap::new(),
            aggregate_formals: HashMap::new(),
            cache: HashMap::new(),
        }
    }

    pub(crate) fn bind_pointer(&mut self, formal: LocId, actual: PointsToSet) {
        self.pointer_formals.insert(formal, actual);
    }

    pub(crate) fn bind_aggregate(&mut self, formal: LocId, sources: BTreeSet<LocId>) {
        self.aggregate_formals.insert(formal, sources);
    }

    /// Caller locations standing for the summary location `loc`.
    pub(crate) fn translate(&mut self, loc: LocId, arena: &mut LocationArena) -> BTreeSet<LocId> {
        if let Some(known) = self.cache.get(&loc) {
            return known.clone();
        }
        let object = arena.object(loc);
        let mut translated = BTreeSet::new();
        match arena.get(object).clone() {
            AbstractLocation::Incoming(base) => {
                for target in self.entry_contents(base, arena).iter() {
                    translated.extend(arena.rebase(loc, object, target));
                }
            }
            AbstractLocation::StackVar(func, _) if func == self.callee => {
                if let Some(sources) = self.aggregate_formals.get(&object).cloned() {
                    for source in sources {
                        translated.extend(arena.rebase(loc, object, source));
                    }
                }
            }
            _ => {
                translated.insert(loc);
            }
        }
        self.cache.insert(loc, translated.clone());
        translated
    }

    pub(crate) fn translate_set(
        &mut self,
        pointees: &PointsToSet,
        arena: &mut LocationArena,
    ) -> PointsToSet {
        let mut translated = PointsToSet::new();
        for loc in pointees.iter() {
            for target in self.translate(loc, arena) {
                translated.insert(target);
            }
        }
        translated
    }

    /// What the summary location `base` held when the callee was entered.
    fn entry_contents(&mut self, base: LocId, arena: &mut LocationArena) -> PointsToSet {
        if let Some(actual) = self.pointer_formals.get(&base) {
            return actual.without_null();
        }
        let before = self.before;
        let mut contents = PointsToSet::new();
        for cell in self.translate(base, arena) {
            contents.union(&before.points_to(cell, arena));
        }
        contents.without_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Expr, ProgramBuilder, SiteId, Ty};

    #[test]
    fn test_incoming_objects_map_onto_actuals() {
        // void set(int **a) { *a = malloc(); }, called as set(&p) with p = &x
        let mut builder = ProgramBuilder::new();
        let int_ptr = Ty::ptr(Ty::Scalar);
        let set =
            builder.declare_function("set", vec![("a", Ty::ptr(int_ptr.clone()))], Ty::Void);
        builder.define(set).ret(None);
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(main);
        let x = body.local("x", Ty::Scalar);
        let p = body.local("p", int_ptr);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();
        let a = program.function(set).params[0];

        let mut arena = LocationArena::new(8);
        let a_loc = arena.var(&program, a);
        let x_loc = arena.var(&program, x);
        let p_loc = arena.var(&program, p);
        let target = arena.incoming(a_loc);
        let old = arena.incoming(target);
        let heap = arena.heap(SiteId(0));

        let mut before = PtsState::new();
        before.set_points_to_strong_update(p_loc, PointsToSet::singleton(x_loc));
        let mut translation = SummaryTranslation::new(set, &before);
        translation.bind_pointer(a_loc, PointsToSet::singleton(p_loc));

        assert_eq!(
            translation.translate(target, &mut arena),
            BTreeSet::from([p_loc])
        );
        assert_eq!(
            translation.translate(old, &mut arena),
            BTreeSet::from([x_loc])
        );
        assert_eq!(
            translation.translate(heap, &mut arena),
            BTreeSet::from([heap])
        );
        assert!(translation.translate(a_loc, &mut arena).is_empty());
    }
}
