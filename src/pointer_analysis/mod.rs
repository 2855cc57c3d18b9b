//! # pointer_analysis
//!
//! Flow-sensitive, context-sensitive points-to analysis.
//!
//! Each function is solved with a forward worklist over its basic blocks.
//! Block entry states are joined with `union_state`; statements inside a
//! block are transferred in order, so a store to a singular location is a
//! strong update and a store to a summary location is a weak one.
//!
//! A direct call re-solves the callee with the caller's state bound to its
//! formals (`call_cache` memoizes per entry state), then strips the callee
//! frame from its exit state. Calls into a function already on the stack,
//! or beyond `max_call_depth`, use the callee's summary instead: the join of
//! every outcome it produced, iterated until it stops changing. A summary is
//! renamed into the caller's terms at the call site and joined in weakly.
//!
//! Every function is also solved as a root with unknown caller memory:
//! pointer parameters and globals start at `Incoming` objects. The final
//! root run records the state at every point, which is what queries read.
mod extern_api;
mod state;
mod summary;

pub use extern_api::{allocation_sites, ExternApi};
pub use state::{union_state, PtsState};

use summary::SummaryTranslation;

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::rc::Rc;

use log::{debug, info, trace, warn};

use crate::callgraph::Callgraph;
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::ir::{
    BlockId, Callee, Expr, FuncId, Function, Location, Place, Program, ProgramPoint, Projection,
    SiteId, Statement, Terminator, Ty, VarId,
};
use crate::location::{LocId, LocationArena, PointsToSet};

/// What a solved function context hands back to its caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOutcome {
    /// State joined over every `return`. `None` if no return is reachable.
    pub exit: Option<PtsState>,
    /// Locations the return value may point to.
    pub ret: PointsToSet,
}

impl CallOutcome {
    fn join(&mut self, other: &CallOutcome, arena: &mut LocationArena) -> bool {
        let mut changed = self.ret.union(&other.ret);
        match (&mut self.exit, &other.exit) {
            (_, None) => {}
            (None, Some(exit)) => {
                self.exit = Some(exit.clone());
                changed = true;
            }
            (Some(mine), Some(exit)) => changed |= mine.union(exit, arena),
        }
        changed
    }
}

/// Result of a finished analysis. Read-only.
pub struct PointsToResult {
    pub arena: LocationArena,
    states: HashMap<FuncId, BTreeMap<Location, PtsState>>,
    exits: HashMap<FuncId, PtsState>,
    roots: HashMap<FuncId, CallOutcome>,
}

impl PointsToResult {
    /// State at `point`, joined over every context the point was reached
    /// in. `None` if the point is unreachable.
    pub fn state_at(&self, point: ProgramPoint) -> Option<&PtsState> {
        match point {
            ProgramPoint::At(func, location) => self.states.get(&func)?.get(&location),
            ProgramPoint::Exit(func) => self.exits.get(&func),
        }
    }

    /// Every recorded state of `func`, exit included.
    pub fn states_of(&self, func: FuncId) -> impl Iterator<Item = &PtsState> {
        self.states
            .get(&func)
            .into_iter()
            .flat_map(|states| states.values())
            .chain(self.exits.get(&func))
    }

    /// Outcome of `func` analysed as a root, with unknown callers.
    pub fn root_outcome(&self, func: FuncId) -> Option<&CallOutcome> {
        self.roots.get(&func)
    }

    /// Location of `var.f1.f2...`, `None` if the analysis never built it.
    pub fn lvalue_location(
        &self,
        program: &Program,
        var: VarId,
        fields: &[String],
    ) -> Option<LocId> {
        let mut loc = self.arena.lookup_var(program, var)?;
        for field in fields {
            loc = self.arena.lookup_field(loc, field)?;
        }
        Some(loc)
    }

    /// Contents of a variable-rooted location in `state`. Variables hold
    /// nothing until written, so a missing entry is the empty set.
    pub fn lvalue_points_to(
        &self,
        program: &Program,
        state: &PtsState,
        var: VarId,
        fields: &[String],
    ) -> PointsToSet {
        self.lvalue_location(program, var, fields)
            .and_then(|loc| state.get(loc).cloned())
            .unwrap_or_default()
    }
}

pub struct PointerAnalysis<'p> {
    program: &'p Program,
    config: AnalysisConfig,
    callgraph: Callgraph,
    arena: LocationArena,
    states: HashMap<FuncId, BTreeMap<Location, PtsState>>,
    exits: HashMap<FuncId, PtsState>,
    roots: HashMap<FuncId, CallOutcome>,
    call_cache: HashMap<(FuncId, PtsState), CallOutcome>,
    summaries: HashMap<FuncId, CallOutcome>,
    /// Functions whose summary stood in for a call in the current round.
    summarized_calls: HashSet<FuncId>,
    summaries_changed: bool,
    active: Vec<FuncId>,
}

impl<'p> PointerAnalysis<'p> {
    pub fn new(program: &'p Program, config: AnalysisConfig) -> Self {
        let arena = LocationArena::new(config.max_location_depth);
        Self {
            program,
            callgraph: Callgraph::new(program),
            config,
            arena,
            states: HashMap::new(),
            exits: HashMap::new(),
            roots: HashMap::new(),
            call_cache: HashMap::new(),
            summaries: HashMap::new(),
            summarized_calls: HashSet::new(),
            summaries_changed: false,
            active: Vec::new(),
        }
    }

    /// Solves every function as a root, callees first.
    pub fn analyze(mut self) -> Result<PointsToResult> {
        for func in self.callgraph.bottom_up_order() {
            self.analyze_root(func)?;
        }
        Ok(PointsToResult {
            arena: self.arena,
            states: self.states,
            exits: self.exits,
            roots: self.roots,
        })
    }

    fn analyze_root(&mut self, func: FuncId) -> Result<()> {
        let program = self.program;
        let function = program.function(func);
        let mut rounds = 0;
        loop {
            self.call_cache.clear();
            self.summarized_calls.clear();
            self.summaries_changed = false;
            let entry = self.root_entry(function)?;
            self.solve(func, entry, false)?;
            if !self.summaries_changed {
                break;
            }
            rounds += 1;
            if rounds >= self.config.max_summary_rounds {
                return Err(AnalysisError::IterationLimit {
                    function: function.name.clone(),
                    limit: self.config.max_summary_rounds,
                });
            }
            debug!("summaries changed while solving `{}`, round {}", function.name, rounds);
        }
        let entry = self.root_entry(function)?;
        let outcome = self.solve(func, entry, true)?;
        info!(
            "analyzed `{}`: {} return targets, {} locations",
            function.name,
            outcome.ret.len(),
            self.arena.len()
        );
        self.roots.insert(func, outcome);
        Ok(())
    }

    /// Entry state of `function` called from an unknown context. The entry
    /// function sees globals at their static initial values.
    fn root_entry(&mut self, function: &'p Function) -> Result<PtsState> {
        let program = self.program;
        let mut state = PtsState::new();
        let is_entry = function.name == self.config.entry;
        for global in program.globals() {
            let decl = program.var(*global);
            let loc = self.arena.var(program, *global);
            if is_entry {
                self.seed_zeroed(&mut state, loc, &decl.ty);
                if let (Ty::Pointer(_), Some(init)) = (&decl.ty, &decl.init) {
                    let value = self.eval(&state, init)?;
                    state.set_points_to_strong_update(loc, value);
                }
            } else {
                self.seed_unknown(&mut state, loc, &decl.ty);
            }
        }
        for param in function.params.iter() {
            let loc = self.arena.var(program, *param);
            self.seed_unknown(&mut state, loc, &program.var(*param).ty);
        }
        Ok(state)
    }

    fn seed_unknown(&mut self, state: &mut PtsState, loc: LocId, ty: &Ty) {
        let mut cells = BTreeSet::new();
        self.pointer_cells(loc, ty, &mut cells);
        for cell in cells {
            let target = self.arena.incoming(cell);
            state.set_points_to_strong_update(cell, PointsToSet::singleton(target));
        }
    }

    fn seed_zeroed(&mut self, state: &mut PtsState, loc: LocId, ty: &Ty) {
        let mut cells = BTreeSet::new();
        self.pointer_cells(loc, ty, &mut cells);
        for cell in cells {
            state.set_points_to_strong_update(cell, PointsToSet::null());
        }
    }

    /// Pointer-holding cells of an object of type `ty` stored at `root`.
    fn pointer_cells(&mut self, root: LocId, ty: &Ty, cells: &mut BTreeSet<LocId>) {
        let program = self.program;
        match ty {
            Ty::Pointer(_) => {
                cells.insert(root);
            }
            Ty::Struct(id) => {
                for (name, field_ty) in program.struct_def(*id).fields.iter() {
                    let field = self.arena.field(root, name);
                    self.pointer_cells(field, field_ty, cells);
                }
            }
            Ty::Array(of, _) => {
                let element = self.arena.element(root);
                self.pointer_cells(element, of, cells);
            }
            Ty::Void | Ty::Scalar | Ty::Union(_) => {}
        }
    }

    /// Solves one context of `func`. With `record`, the states at every
    /// point are joined into the result.
    fn solve(&mut self, func: FuncId, entry: PtsState, record: bool) -> Result<CallOutcome> {
        let program = self.program;
        let function = program.function(func);
        self.active.push(func);
        let solved = self.solve_active(function, entry, record);
        self.active.pop();
        let outcome = solved?;
        let summary = self.summaries.entry(func).or_default();
        if summary.join(&outcome, &mut self.arena) && self.summarized_calls.contains(&func) {
            debug!("summary of `{}` grew", function.name);
            self.summaries_changed = true;
        }
        Ok(outcome)
    }

    fn solve_active(
        &mut self,
        function: &'p Function,
        entry: PtsState,
        record: bool,
    ) -> Result<CallOutcome> {
        let mut entries: Vec<Option<Rc<PtsState>>> = vec![None; function.blocks.len()];
        entries[0] = Some(Rc::new(entry));
        let mut worklist = vec![BlockId::ENTRY];
        let mut loop_times = 0usize;
        while let Some(block_id) = worklist.pop() {
            loop_times += 1;
            if loop_times > self.config.max_iterations {
                return Err(AnalysisError::IterationLimit {
                    function: function.name.clone(),
                    limit: self.config.max_iterations,
                });
            }
            trace!("`{}`: visiting block {}", function.name, block_id.index());
            let Some(before) = entries[block_id.index()].clone() else {
                continue;
            };
            let block = &function.blocks[block_id.index()];
            let mut state = PtsState::clone(&before);
            for statement in block.statements.iter() {
                self.transfer_statement(&mut state, statement, false)?;
            }
            for succ in block.terminator.successors() {
                let changed = union_state(&mut entries[succ.index()], &state, &mut self.arena);
                if changed && !worklist.contains(&succ) {
                    worklist.push(succ);
                }
            }
        }

        // Replay every reached block once on the converged entry states.
        let mut outcome = CallOutcome::default();
        for block_id in function.block_ids() {
            let Some(before) = entries[block_id.index()].clone() else {
                continue;
            };
            let block = &function.blocks[block_id.index()];
            let mut state = PtsState::clone(&before);
            for (statement_index, statement) in block.statements.iter().enumerate() {
                if record {
                    self.record(function.id, Location::new(block_id, statement_index), &state);
                }
                self.transfer_statement(&mut state, statement, record)?;
            }
            if record {
                self.record(
                    function.id,
                    Location::new(block_id, block.statements.len()),
                    &state,
                );
            }
            if let Terminator::Return(value) = &block.terminator {
                if let Some(value) = value {
                    let ret = self.eval(&state, value)?;
                    outcome.ret.union(&ret);
                }
                let returned = CallOutcome {
                    exit: Some(state),
                    ret: PointsToSet::new(),
                };
                outcome.join(&returned, &mut self.arena);
            }
        }
        if record {
            if let Some(exit) = &outcome.exit {
                match self.exits.get_mut(&function.id) {
                    Some(joined) => {
                        joined.union(exit, &mut self.arena);
                    }
                    None => {
                        self.exits.insert(function.id, exit.clone());
                    }
                }
            }
        }
        Ok(outcome)
    }

    fn record(&mut self, func: FuncId, location: Location, state: &PtsState) {
        match self.states.entry(func).or_default().entry(location) {
            Entry::Occupied(mut recorded) => {
                recorded.get_mut().union(state, &mut self.arena);
            }
            Entry::Vacant(recorded) => {
                recorded.insert(state.clone());
            }
        }
    }

    fn transfer_statement(
        &mut self,
        state: &mut PtsState,
        statement: &'p Statement,
        record: bool,
    ) -> Result<()> {
        match statement {
            Statement::Assign(dest, value) => self.transfer_assign(state, dest, value),
            Statement::Alloc { dest, site, .. } => {
                let dests = self.resolve_place(state, dest)?;
                let heap = self.arena.heap(*site);
                self.store(state, &dests, PointsToSet::singleton(heap));
                Ok(())
            }
            Statement::Call {
                dest,
                callee,
                args,
                site,
            } => self.transfer_call(state, dest.as_ref(), callee, args, *site, record),
        }
    }

    fn transfer_assign(&mut self, state: &mut PtsState, dest: &Place, value: &Expr) -> Result<()> {
        let ty = self.program.place_ty(dest)?;
        if !self.program.holds_pointers(&ty) {
            return Ok(());
        }
        let dests = self.resolve_place(state, dest)?;
        if ty.is_pointer() {
            let value = self.eval(state, value)?;
            self.store(state, &dests, value);
        } else if let Expr::Use(source) = value {
            let sources = self.resolve_place(state, source)?;
            self.copy_object(state, &sources, &dests, Some(&ty), true);
        } else {
            debug!("aggregate assignment from {:?} has no pointer effect", value);
        }
        Ok(())
    }

    /// Locations an lvalue may denote.
    fn resolve_place(&mut self, state: &PtsState, place: &Place) -> Result<BTreeSet<LocId>> {
        let program = self.program;
        let mut ty = program.var(place.var).ty.clone();
        let mut locs = BTreeSet::new();
        locs.insert(self.arena.var(program, place.var));
        for elem in place.projection.iter() {
            match elem {
                Projection::Deref => {
                    let pointees = state.batch_points_to(locs.iter().copied(), &mut self.arena);
                    if pointees.contains_null() {
                        debug!(
                            "`{}` may be null where it is dereferenced",
                            program.var(place.var).name
                        );
                    }
                    locs = pointees.without_null().iter().collect();
                    ty = pointee(ty)?;
                }
                Projection::Field(name) => {
                    locs = locs
                        .into_iter()
                        .map(|loc| self.arena.field(loc, name))
                        .collect();
                    ty = program.field_ty(&ty, name)?;
                }
                Projection::Index => match ty {
                    Ty::Array(of, _) => {
                        locs = locs.into_iter().map(|loc| self.arena.element(loc)).collect();
                        ty = *of;
                    }
                    Ty::Pointer(of) => {
                        let pointees =
                            state.batch_points_to(locs.iter().copied(), &mut self.arena);
                        locs = pointees
                            .without_null()
                            .iter()
                            .map(|loc| self.arena.element(loc))
                            .collect();
                        ty = *of;
                    }
                    other => {
                        return Err(AnalysisError::MalformedIr(format!(
                            "index into non-indexable type {}",
                            other
                        )))
                    }
                },
            }
        }
        Ok(locs)
    }

    /// Locations a pointer-valued expression may evaluate to.
    fn eval(&mut self, state: &PtsState, expr: &Expr) -> Result<PointsToSet> {
        match expr {
            Expr::Use(place) => {
                let locs = self.resolve_place(state, place)?;
                if let Ty::Array(..) = self.program.place_ty(place)? {
                    return Ok(locs.into_iter().collect());
                }
                Ok(state.batch_points_to(locs, &mut self.arena))
            }
            Expr::AddressOf(place) => Ok(self.resolve_place(state, place)?.into_iter().collect()),
            Expr::Offset(base, _) => {
                let base = self.eval(state, base)?;
                Ok(base
                    .without_null()
                    .iter()
                    .map(|loc| self.arena.element(loc))
                    .collect())
            }
            Expr::Null => Ok(PointsToSet::null()),
            Expr::Scalar | Expr::Binary(..) => Ok(PointsToSet::new()),
        }
    }

    fn store(&mut self, state: &mut PtsState, dests: &BTreeSet<LocId>, value: PointsToSet) {
        if dests.is_empty() {
            debug!("store through a pointer with no known target dropped");
            return;
        }
        if dests.len() == 1 {
            if let Some(dest) = dests.iter().next() {
                if self.arena.is_singular(*dest) {
                    state.set_points_to_strong_update(*dest, value);
                    return;
                }
            }
        }
        debug!("weak update of {} locations", dests.len());
        for dest in dests.iter() {
            state.add_points_to(*dest, &value, &mut self.arena);
        }
    }

    /// Copies the pointer contents of one object onto another, cell by
    /// cell. With a type, every pointer cell of that type is copied, unknown
    /// contents included; otherwise only cells the state has written. Strong
    /// only between two single singular objects.
    fn copy_object(
        &mut self,
        state: &mut PtsState,
        sources: &BTreeSet<LocId>,
        dests: &BTreeSet<LocId>,
        ty: Option<&Ty>,
        allow_strong: bool,
    ) {
        let mut contents = Vec::new();
        for source in sources.iter().copied() {
            let mut cells: BTreeSet<LocId> = state
                .locations_within(source, &self.arena)
                .into_iter()
                .collect();
            if let Some(ty) = ty {
                self.pointer_cells(source, ty, &mut cells);
            }
            for cell in cells {
                let pointees = state.points_to(cell, &mut self.arena);
                contents.push((source, cell, pointees));
            }
        }
        let strong = allow_strong
            && sources.len() == 1
            && dests.len() == 1
            && dests.iter().all(|dest| self.arena.is_singular(*dest));
        for dest in dests.iter() {
            for (source, cell, pointees) in contents.iter() {
                let Some(target) = self.arena.rebase(*cell, *source, *dest) else {
                    continue;
                };
                if strong && self.arena.is_singular(target) {
                    state.set_points_to_strong_update(target, pointees.clone());
                } else {
                    state.add_points_to(target, pointees, &mut self.arena);
                }
            }
        }
    }

    fn transfer_call(
        &mut self,
        state: &mut PtsState,
        dest: Option<&Place>,
        callee: &'p Callee,
        args: &'p [Expr],
        site: SiteId,
        record: bool,
    ) -> Result<()> {
        let mut actuals = Vec::with_capacity(args.len());
        for arg in args.iter() {
            actuals.push(self.eval(state, arg)?);
        }
        let ret = match callee {
            Callee::External(name) => self.transfer_extern(state, name, args, &actuals, site)?,
            Callee::Direct(target) => self.transfer_direct(state, *target, args, actuals, record)?,
            Callee::Indirect(_) => {
                return Err(AnalysisError::UnsupportedConstruct(
                    "call through a function pointer".to_owned(),
                ))
            }
        };
        if let Some(dest) = dest {
            if self.program.place_ty(dest)?.is_pointer() {
                let dests = self.resolve_place(state, dest)?;
                self.store(state, &dests, ret);
            }
        }
        Ok(())
    }

    fn transfer_extern(
        &mut self,
        state: &mut PtsState,
        name: &str,
        args: &[Expr],
        actuals: &[PointsToSet],
        site: SiteId,
    ) -> Result<PointsToSet> {
        match ExternApi::new(name) {
            Some(ExternApi::Alloc) => Ok(PointsToSet::singleton(self.arena.heap(site))),
            Some(ExternApi::Copy) => {
                let (Some(to), Some(from)) = (actuals.first(), actuals.get(1)) else {
                    return Err(AnalysisError::MalformedIr(format!(
                        "`{}` expects a destination and a source",
                        name
                    )));
                };
                let sources: BTreeSet<LocId> = from.without_null().iter().collect();
                let dests: BTreeSet<LocId> = to.without_null().iter().collect();
                let ty = self.copied_ty(args.get(..2).unwrap_or(&[]));
                self.copy_object(state, &sources, &dests, ty.as_ref(), false);
                if ty.is_some() {
                    // the buffer may hold an array of such objects
                    let elements: BTreeSet<LocId> =
                        sources.iter().map(|loc| self.arena.element(*loc)).collect();
                    let element_dests: BTreeSet<LocId> =
                        dests.iter().map(|loc| self.arena.element(*loc)).collect();
                    self.copy_object(state, &elements, &element_dests, ty.as_ref(), false);
                }
                Ok(to.clone())
            }
            Some(ExternApi::Free) => Ok(PointsToSet::new()),
            None => {
                debug!("external `{}` has no modelled pointer effect", name);
                Ok(PointsToSet::new())
            }
        }
    }

    /// Pointee type of the first argument that points to pointer-holding
    /// memory.
    fn copied_ty(&self, args: &[Expr]) -> Option<Ty> {
        args.iter().find_map(|arg| match self.program.expr_ty(arg) {
            Ok(Ty::Pointer(to)) if self.program.holds_pointers(&to) => Some(*to),
            _ => None,
        })
    }

    fn transfer_direct(
        &mut self,
        state: &mut PtsState,
        target: FuncId,
        args: &'p [Expr],
        actuals: Vec<PointsToSet>,
        record: bool,
    ) -> Result<PointsToSet> {
        let program = self.program;
        let callee = program.function(target);
        // only a cycle in the call graph can put the callee on the stack
        let reentered = self.callgraph.is_recursive(target) && self.active.contains(&target);
        if reentered || self.active.len() >= self.config.max_call_depth {
            if !reentered {
                warn!(
                    "call depth limit {} reached, summarizing `{}`",
                    self.config.max_call_depth, callee.name
                );
            }
            self.summarized_calls.insert(target);
            let summary = self.summaries.get(&target).cloned().unwrap_or_default();
            return self.apply_summary(state, callee, args, actuals, &summary);
        }

        let mut entry = state.clone();
        for ((param, arg), actual) in callee.params.iter().zip(args.iter()).zip(actuals) {
            let param_loc = self.arena.var(program, *param);
            let ty = &program.var(*param).ty;
            if ty.is_pointer() {
                entry.set_points_to_strong_update(param_loc, actual);
            } else if program.holds_pointers(ty) {
                if let Expr::Use(place) = arg {
                    let sources = self.resolve_place(state, place)?;
                    let mut dests = BTreeSet::new();
                    dests.insert(param_loc);
                    self.copy_object(&mut entry, &sources, &dests, Some(ty), true);
                }
            }
        }

        let outcome = if record {
            self.solve(target, entry, true)?
        } else {
            let key = (target, entry);
            match self.call_cache.get(&key) {
                Some(outcome) => outcome.clone(),
                None => {
                    let outcome = self.solve(target, key.1.clone(), false)?;
                    self.call_cache.insert(key, outcome.clone());
                    outcome
                }
            }
        };
        match outcome.exit {
            Some(mut exit) => {
                exit.strip_frame(target, &self.arena);
                *state = exit;
            }
            None => debug!("`{}` never returns", callee.name),
        }
        Ok(outcome.ret)
    }

    /// Joins the summary of `callee` into the caller state at one call
    /// site. Every update is weak; the callee frame is left out.
    fn apply_summary(
        &mut self,
        state: &mut PtsState,
        callee: &'p Function,
        args: &'p [Expr],
        actuals: Vec<PointsToSet>,
        summary: &CallOutcome,
    ) -> Result<PointsToSet> {
        let program = self.program;
        let before = state.clone();
        let mut translation = SummaryTranslation::new(callee.id, &before);
        for ((param, arg), actual) in callee.params.iter().zip(args.iter()).zip(actuals) {
            let param_loc = self.arena.var(program, *param);
            let ty = &program.var(*param).ty;
            if ty.is_pointer() {
                translation.bind_pointer(param_loc, actual);
            } else if program.holds_pointers(ty) {
                if let Expr::Use(place) = arg {
                    let sources = self.resolve_place(&before, place)?;
                    translation.bind_aggregate(param_loc, sources);
                }
            }
        }
        if let Some(exit) = &summary.exit {
            for (loc, pointees) in exit.iter() {
                if self.arena.frame(loc) == Some(callee.id) {
                    continue;
                }
                let pointees = translation.translate_set(pointees, &mut self.arena);
                for target in translation.translate(loc, &mut self.arena) {
                    state.add_points_to(target, &pointees, &mut self.arena);
                }
            }
        }
        let ret = translation.translate_set(&summary.ret, &mut self.arena);
        debug!(
            "applied summary of `{}`: {} return targets",
            callee.name,
            ret.len()
        );
        Ok(ret)
    }
}

fn pointee(ty: Ty) -> Result<Ty> {
    match ty {
        Ty::Pointer(to) => Ok(*to),
        other => Err(AnalysisError::MalformedIr(format!(
            "dereference of non-pointer type {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ProgramBuilder;
    use test_log::test;

    fn points_to_names(
        result: &PointsToResult,
        program: &Program,
        point: ProgramPoint,
        var: VarId,
    ) -> Vec<String> {
        let state = result.state_at(point).unwrap();
        let mut names: Vec<String> = result
            .lvalue_points_to(program, state, var, &[])
            .iter()
            .map(|loc| result.arena.display(loc, program).to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_strong_update_on_stack_variable() {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(main);
        let a = body.local("a", Ty::Scalar);
        let b = body.local("b", Ty::Scalar);
        let p = body.local("p", Ty::ptr(Ty::Scalar));
        body.assign(Place::var(p), Expr::AddressOf(Place::var(a)));
        body.assign(Place::var(p), Expr::AddressOf(Place::var(b)));
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let result = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let after_first = ProgramPoint::At(main, Location::after(BlockId::ENTRY, 0));
        assert_eq!(points_to_names(&result, &program, after_first, p), vec!["a"]);
        assert_eq!(
            points_to_names(&result, &program, ProgramPoint::Exit(main), p),
            vec!["b"]
        );
    }

    #[test]
    fn test_branches_join_weakly() {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(main);
        let a = body.local("a", Ty::Scalar);
        let b = body.local("b", Ty::Scalar);
        let p = body.local("p", Ty::ptr(Ty::Scalar));
        let then_block = body.new_block();
        let else_block = body.new_block();
        let join = body.new_block();
        body.branch(Expr::Scalar, then_block, else_block);
        body.switch_to(then_block);
        body.assign(Place::var(p), Expr::AddressOf(Place::var(a)));
        body.goto(join);
        body.switch_to(else_block);
        body.assign(Place::var(p), Expr::AddressOf(Place::var(b)));
        body.goto(join);
        body.switch_to(join);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let result = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let at_join = ProgramPoint::At(main, Location::new(join, 0));
        assert_eq!(points_to_names(&result, &program, at_join, p), vec!["a", "b"]);
    }

    #[test]
    fn test_list_building_loop_summarizes_heap() {
        // for (;;) { n = malloc(); n->next = head; head = n; }
        let mut builder = ProgramBuilder::new();
        let node = builder.declare_struct("node", vec![]);
        let node_ty = Ty::Struct(node);
        builder.declare_struct("node", vec![("next", Ty::ptr(node_ty.clone()))]);
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(main);
        let head = body.local("head", Ty::ptr(node_ty.clone()));
        let n = body.local("n", Ty::ptr(node_ty));
        let looping = body.new_block();
        let exit = body.new_block();
        body.assign(Place::var(head), Expr::Null);
        body.goto(looping);
        body.switch_to(looping);
        body.call_external(Some(Place::var(n)), "malloc", vec![Expr::Scalar]);
        body.assign(Place::var(n).arrow("next"), Expr::var(head));
        body.assign(Place::var(head), Expr::var(n));
        body.branch(Expr::Scalar, looping, exit);
        body.switch_to(exit);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let result = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let exit = result.state_at(ProgramPoint::Exit(main)).unwrap();
        let heap = result.lvalue_points_to(&program, exit, head, &[]);
        assert_eq!(heap.len(), 1);
        let heap = heap.as_singleton().unwrap();
        let next = result.arena.lookup_field(heap, "next").unwrap();
        let targets = exit.get(next).unwrap();
        assert!(targets.contains(heap));
        assert!(targets.contains_null());
    }

    #[test]
    fn test_linked_list_loop() {
        let mut builder = ProgramBuilder::new();
        let node = builder.declare_struct("node", vec![("val", Ty::Scalar)]);
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(main);
        let head = body.local("head", Ty::ptr(Ty::Struct(node)));
        let n = body.local("n", Ty::ptr(Ty::Struct(node)));
        let looping = body.new_block();
        let exit = body.new_block();
        body.assign(Place::var(head), Expr::Null);
        body.goto(looping);
        body.switch_to(looping);
        body.call_external(Some(Place::var(n)), "malloc", vec![Expr::Scalar]);
        body.assign(Place::var(head), Expr::var(n));
        body.branch(Expr::Scalar, looping, exit);
        body.switch_to(exit);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let result = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        assert_eq!(
            points_to_names(&result, &program, ProgramPoint::Exit(main), head),
            vec!["heap#0"]
        );
        assert_eq!(
            points_to_names(&result, &program, ProgramPoint::Exit(main), n),
            vec!["heap#0"]
        );
    }

    #[test]
    fn test_call_binds_formals_and_strips_frame() {
        // int *id(int *q) { return q; }
        let mut builder = ProgramBuilder::new();
        let id = builder.declare_function(
            "id",
            vec![("q", Ty::ptr(Ty::Scalar))],
            Ty::ptr(Ty::Scalar),
        );
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(id);
        let q = body.param(0);
        body.ret(Some(Expr::var(q)));
        let mut body = builder.define(main);
        let a = body.local("a", Ty::Scalar);
        let p = body.local("p", Ty::ptr(Ty::Scalar));
        body.call(Some(Place::var(p)), id, vec![Expr::AddressOf(Place::var(a))]);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let result = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let exit = result.state_at(ProgramPoint::Exit(main)).unwrap();
        assert_eq!(
            points_to_names(&result, &program, ProgramPoint::Exit(main), p),
            vec!["a"]
        );
        assert!(exit.iter().all(|(loc, _)| result.arena.frame(loc) != Some(id)));

        // as a root, `id` returns whatever its caller passed
        let root = result.root_outcome(id).unwrap();
        let rendered: Vec<String> = root
            .ret
            .iter()
            .map(|loc| result.arena.display(loc, &program).to_string())
            .collect();
        assert_eq!(rendered, vec!["*q"]);
    }

    #[test]
    fn test_recursion_uses_summaries() {
        // int *walk(int *p, int n) { if (n) return walk(p, n); return p; }
        let mut builder = ProgramBuilder::new();
        let walk = builder.declare_function(
            "walk",
            vec![("p", Ty::ptr(Ty::Scalar)), ("n", Ty::Scalar)],
            Ty::ptr(Ty::Scalar),
        );
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(walk);
        let p = body.param(0);
        let n = body.param(1);
        let r = body.local("r", Ty::ptr(Ty::Scalar));
        let again = body.new_block();
        let done = body.new_block();
        body.branch(Expr::var(n), again, done);
        body.switch_to(again);
        body.call(Some(Place::var(r)), walk, vec![Expr::var(p), Expr::var(n)]);
        body.ret(Some(Expr::var(r)));
        body.switch_to(done);
        body.ret(Some(Expr::var(p)));
        let mut body = builder.define(main);
        let a = body.local("a", Ty::Scalar);
        let x = body.local("x", Ty::ptr(Ty::Scalar));
        body.call(Some(Place::var(x)), walk, vec![Expr::AddressOf(Place::var(a)), Expr::Scalar]);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let result = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let names = points_to_names(&result, &program, ProgramPoint::Exit(main), x);
        assert!(names.contains(&"a".to_owned()));
    }

    #[test]
    fn test_iteration_limit_is_reported() {
        let mut builder = ProgramBuilder::new();
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        let mut body = builder.define(main);
        let a = body.local("a", Ty::Scalar);
        let p = body.local("p", Ty::ptr(Ty::Scalar));
        let looping = body.new_block();
        let exit = body.new_block();
        body.goto(looping);
        body.switch_to(looping);
        body.assign(Place::var(p), Expr::AddressOf(Place::var(a)));
        body.branch(Expr::Scalar, looping, exit);
        body.switch_to(exit);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let config = AnalysisConfig {
            max_iterations: 1,
            ..AnalysisConfig::default()
        };
        assert!(matches!(
            PointerAnalysis::new(&program, config).analyze(),
            Err(AnalysisError::IterationLimit { .. })
        ));
    }
}
