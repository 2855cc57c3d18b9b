use std::collections::BTreeMap;
use std::rc::Rc;

use crate::ir::FuncId;
use crate::location::{LocId, LocationArena, PointsToSet};

/// Abstract memory at one program point: what every pointer-holding
/// location may point to.
///
/// A location without an entry holds its default contents: the unknown
/// `Incoming` object for caller-owned memory, nothing otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PtsState {
    pts: BTreeMap<LocId, PointsToSet>,
}

impl PtsState {
    pub fn new() -> Self {
        Self {
            pts: BTreeMap::new(),
        }
    }

    fn default_points_to(loc: LocId, arena: &mut LocationArena) -> PointsToSet {
        if loc != LocId::NULL && arena.is_incoming(loc) {
            PointsToSet::singleton(arena.incoming(loc))
        } else {
            PointsToSet::new()
        }
    }

    pub fn points_to(&self, loc: LocId, arena: &mut LocationArena) -> PointsToSet {
        match self.pts.get(&loc) {
            Some(pointees) => pointees.clone(),
            None => Self::default_points_to(loc, arena),
        }
    }

    /// Recorded contents only, no default materialization.
    pub fn get(&self, loc: LocId) -> Option<&PointsToSet> {
        self.pts.get(&loc)
    }

    pub fn batch_points_to<I>(&self, locs: I, arena: &mut LocationArena) -> PointsToSet
    where
        I: IntoIterator<Item = LocId>,
    {
        let mut pointees = PointsToSet::new();
        for loc in locs {
            pointees.union(&self.points_to(loc, arena));
        }
        pointees
    }

    pub fn set_points_to_strong_update(&mut self, loc: LocId, pointees: PointsToSet) -> bool {
        self.pts.insert(loc, pointees.clone()) != Some(pointees)
    }

    pub fn add_points_to(
        &mut self,
        loc: LocId,
        pointees: &PointsToSet,
        arena: &mut LocationArena,
    ) -> bool {
        if !self.pts.contains_key(&loc) {
            let default = Self::default_points_to(loc, arena);
            self.pts.insert(loc, default);
        }
        match self.pts.get_mut(&loc) {
            Some(existing) => existing.union(pointees),
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (LocId, &PointsToSet)> {
        self.pts.iter().map(|(loc, pointees)| (*loc, pointees))
    }

    /// Locations with recorded contents inside the object at `root`.
    pub fn locations_within(&self, root: LocId, arena: &LocationArena) -> Vec<LocId> {
        self.pts
            .keys()
            .copied()
            .filter(|loc| arena.is_within(*loc, root))
            .collect()
    }

    /// Drops the stack frame of `func` after it returned.
    pub fn strip_frame(&mut self, func: FuncId, arena: &LocationArena) {
        self.pts.retain(|loc, _| arena.frame(*loc) != Some(func));
    }

    /// Join. Returns whether `self` changed.
    pub fn union(&mut self, other: &PtsState, arena: &mut LocationArena) -> bool {
        let mut changed = false;
        for (loc, pointees) in other.pts.iter() {
            changed |= self.add_points_to(*loc, pointees, arena);
        }
        let missing: Vec<LocId> = self
            .pts
            .keys()
            .copied()
            .filter(|loc| !other.pts.contains_key(loc))
            .collect();
        for loc in missing {
            let default = Self::default_points_to(loc, arena);
            changed |= self.add_points_to(loc, &default, arena);
        }
        changed
    }
}

/// Joins `other` into a block entry state. `None` is an unreached block.
pub fn union_state(
    this: &mut Option<Rc<PtsState>>,
    other: &PtsState,
    arena: &mut LocationArena,
) -> bool {
    match this.as_ref() {
        None => {
            *this = Some(Rc::new(other.clone()));
            true
        }
        Some(this_state) => {
            let mut cloned = PtsState::clone(this_state);
            if cloned.union(other, arena) {
                *this = Some(Rc::new(cloned));
                true
            } else {
                false
            }
        }
    }
}
