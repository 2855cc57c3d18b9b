//! # escape_analysis
//!
//! Decides which heap allocation sites outlive the function that contains
//! them.
//!
//! For each function, the exit state of its root run (unknown callers) is
//! turned into a location graph. Edges are pointer contents plus the
//! structural edges from an object to its fields and elements. A site
//! escapes if its object is reachable from one of:
//!
//! * the returned pointer,
//! * caller-owned memory reached through a parameter (`*out = p`),
//! * a global.
//!
//! The first route found is reported, together with a witness path.
use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};

use crate::ir::{FuncId, Function, Program, SiteId, VarId};
use crate::location::{AbstractLocation, LocId, LocationArena};
use crate::pointer_analysis::{allocation_sites, PointsToResult};
use crate::util::Graph;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EscapeRoute {
    Return,
    /// Stored into memory the caller passed in through this parameter.
    Parameter(VarId),
    Global(VarId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscapeRecord {
    pub site: SiteId,
    /// The function containing the allocation.
    pub function: FuncId,
    pub escapes: bool,
    pub route: Option<EscapeRoute>,
    /// Locations from the route's root to the allocated object. Empty if
    /// the site does not escape.
    pub witness: Vec<LocId>,
}

pub struct EscapeAnalysis {
    records: BTreeMap<SiteId, EscapeRecord>,
    variables: BTreeMap<FuncId, BTreeSet<VarId>>,
}

impl EscapeAnalysis {
    pub fn new(program: &Program, points_to: &PointsToResult) -> Self {
        let arena = &points_to.arena;
        let structure = structural_graph(arena);
        let mut records = BTreeMap::new();
        let mut variables = BTreeMap::new();
        for func in program.functions() {
            let sites = allocation_sites(func);
            if sites.is_empty() {
                continue;
            }
            let mut graph = structure.clone();
            graph.union(content_graph(points_to, func.id));
            let mut escaping = BTreeSet::new();
            for (route, roots) in routes(program, points_to, func) {
                if roots.is_empty() {
                    continue;
                }
                let parents = graph.reachable_from(roots);
                for node in parents.keys().copied() {
                    let Some(site) = arena.heap_site(node) else {
                        continue;
                    };
                    if !sites.contains(&site) || escaping.contains(&site) {
                        continue;
                    }
                    // a pointer into the middle of the object reaches it too
                    let object = arena.object(node);
                    let target = if parents.contains_key(&object) {
                        object
                    } else {
                        node
                    };
                    let witness = Graph::path_to(&parents, target);
                    debug!(
                        "site {} of `{}` escapes via {:?}",
                        site.index(),
                        func.name,
                        route
                    );
                    escaping.insert(site);
                    records.insert(
                        site,
                        EscapeRecord {
                            site,
                            function: func.id,
                            escapes: true,
                            route: Some(route),
                            witness,
                        },
                    );
                }
            }
            for site in sites.iter().copied() {
                records.entry(site).or_insert(EscapeRecord {
                    site,
                    function: func.id,
                    escapes: false,
                    route: None,
                    witness: Vec::new(),
                });
            }
            let vars = escaping_variables(program, points_to, func, &escaping);
            info!(
                "`{}`: {} of {} allocation sites escape, {} variables hold them",
                func.name,
                escaping.len(),
                sites.len(),
                vars.len()
            );
            variables.insert(func.id, vars);
        }
        Self { records, variables }
    }

    pub fn record(&self, site: SiteId) -> Option<&EscapeRecord> {
        self.records.get(&site)
    }

    pub fn records(&self) -> impl Iterator<Item = &EscapeRecord> {
        self.records.values()
    }

    pub fn escaping_sites(&self, func: FuncId) -> BTreeSet<SiteId> {
        self.records
            .values()
            .filter(|record| record.function == func && record.escapes)
            .map(|record| record.site)
            .collect()
    }

    /// Variables of `func` that point to an escaping allocation at some
    /// point of the function.
    pub fn escaping_variables(&self, func: FuncId) -> BTreeSet<VarId> {
        self.variables.get(&func).cloned().unwrap_or_default()
    }
}

/// Object -> field and object -> element edges.
fn structural_graph(arena: &LocationArena) -> Graph<LocId> {
    let mut graph = Graph::new();
    for id in arena.ids() {
        match arena.get(id) {
            AbstractLocation::Field(base, _) | AbstractLocation::ArrayElement(base) => {
                graph.add_edge(*base, id);
            }
            _ => {
                graph.add_node(id);
            }
        }
    }
    graph
}

/// Pointer -> pointee edges of the root exit state of `func`.
fn content_graph(points_to: &PointsToResult, func: FuncId) -> Graph<LocId> {
    let mut graph = Graph::new();
    let Some(exit) = points_to.root_outcome(func).and_then(|outcome| outcome.exit.as_ref()) else {
        return graph;
    };
    for (loc, pointees) in exit.iter() {
        for target in pointees.without_null().iter() {
            graph.add_edge(loc, target);
        }
    }
    graph
}

/// Roots of each escape route, in reporting order.
fn routes(
    program: &Program,
    points_to: &PointsToResult,
    func: &Function,
) -> Vec<(EscapeRoute, Vec<LocId>)> {
    let arena = &points_to.arena;
    let mut routes = Vec::new();
    let returned: Vec<LocId> = points_to
        .root_outcome(func.id)
        .map(|outcome| outcome.ret.without_null().iter().collect())
        .unwrap_or_default();
    routes.push((EscapeRoute::Return, returned));
    for param in func.params.iter().copied() {
        let roots = arena
            .ids()
            .filter(|id| arena.is_incoming(*id) && arena.origin(*id) == Some(param))
            .collect();
        routes.push((EscapeRoute::Parameter(param), roots));
    }
    for global in program.globals().iter().copied() {
        let roots = arena
            .ids()
            .filter(|id| arena.origin(*id) == Some(global))
            .collect();
        routes.push((EscapeRoute::Global(global), roots));
    }
    routes
}

fn escaping_variables(
    program: &Program,
    points_to: &PointsToResult,
    func: &Function,
    escaping: &BTreeSet<SiteId>,
) -> BTreeSet<VarId> {
    let arena = &points_to.arena;
    let mut vars = BTreeSet::new();
    if escaping.is_empty() {
        return vars;
    }
    for var in func.variables() {
        let Some(var_loc) = arena.lookup_var(program, var) else {
            continue;
        };
        let holds_escaping = points_to.states_of(func.id).any(|state| {
            state.iter().any(|(loc, pointees)| {
                arena.is_within(loc, var_loc)
                    && pointees
                        .iter()
                        .filter_map(|target| arena.heap_site(target))
                        .any(|site| escaping.contains(&site))
            })
        });
        if holds_escaping {
            vars.insert(var);
        }
    }
    vars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalysisConfig;
    use crate::ir::{Expr, Place, ProgramBuilder, Ty};
    use crate::pointer_analysis::PointerAnalysis;
    use test_log::test;

    #[test]
    fn test_local_allocation_does_not_escape() {
        let mut builder = ProgramBuilder::new();
        let f = builder.declare_function("f", vec![], Ty::Void);
        let mut body = builder.define(f);
        let p = body.local("p", Ty::ptr(Ty::Scalar));
        let site = body.call_external(Some(Place::var(p)), "malloc", vec![Expr::Scalar]);
        body.call_external(None, "free", vec![Expr::var(p)]);
        body.ret(None);
        let program = builder.build().unwrap();

        let points_to = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let escapes = EscapeAnalysis::new(&program, &points_to);
        let record = escapes.record(site).unwrap();
        assert!(!record.escapes);
        assert_eq!(record.route, None);
        assert!(escapes.escaping_sites(f).is_empty());
        assert!(escapes.escaping_variables(f).is_empty());
    }

    #[test]
    fn test_escape_through_output_parameter() {
        // void make(int **out) { int *p = malloc(); *out = p; }
        let mut builder = ProgramBuilder::new();
        let make = builder.declare_function(
            "make",
            vec![("out", Ty::ptr(Ty::ptr(Ty::Scalar)))],
            Ty::Void,
        );
        let mut body = builder.define(make);
        let out = body.param(0);
        let p = body.local("p", Ty::ptr(Ty::Scalar));
        let site = body.alloc(Place::var(p), Ty::Scalar);
        body.assign(Place::var(out).deref(), Expr::var(p));
        body.ret(None);
        let program = builder.build().unwrap();

        let points_to = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let escapes = EscapeAnalysis::new(&program, &points_to);
        let record = escapes.record(site).unwrap();
        assert!(record.escapes);
        assert_eq!(record.route, Some(EscapeRoute::Parameter(out)));
        let witness: Vec<String> = record
            .witness
            .iter()
            .map(|loc| points_to.arena.display(*loc, &program).to_string())
            .collect();
        assert_eq!(witness, vec!["*out", "heap#0"]);
        assert_eq!(escapes.escaping_variables(make), BTreeSet::from([p]));
    }

    #[test]
    fn test_escape_through_global_field() {
        // struct box { int *v; } g; void keep() { g.v = malloc(); }
        let mut builder = ProgramBuilder::new();
        let boxed = builder.declare_struct("box", vec![("v", Ty::ptr(Ty::Scalar))]);
        let g = builder.global("g", Ty::Struct(boxed));
        let keep = builder.declare_function("keep", vec![], Ty::Void);
        let mut body = builder.define(keep);
        let site = body.call_external(Some(Place::var(g).field("v")), "malloc", vec![Expr::Scalar]);
        body.ret(None);
        let program = builder.build().unwrap();

        let points_to = PointerAnalysis::new(&program, AnalysisConfig::default())
            .analyze()
            .unwrap();
        let escapes = EscapeAnalysis::new(&program, &points_to);
        let record = escapes.record(site).unwrap();
        assert_eq!(record.route, Some(EscapeRoute::Global(g)));
        assert_eq!(record.witness.len(), 2);
    }
}
