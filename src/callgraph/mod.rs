//! # callgraph
//!
//! Direct call graph of a program. Node is a `FuncId`.
//! Edge (A, B) means A calls B at least once.
//! Calls to externals are not part of the graph.
//! Strongly connected components identify recursion, which the pointer
//! analysis resolves through summaries instead of re-entering the callee.

use std::collections::{HashMap, HashSet};

use petgraph::algo::tarjan_scc;
use petgraph::{Directed, Graph};

use crate::ir::{Callee, FuncId, Program, Statement};

pub struct Callgraph {
    graph: Graph<FuncId, (), Directed>,
    recursive: HashSet<FuncId>,
}

impl Callgraph {
    pub fn new(program: &Program) -> Self {
        let mut graph = Graph::new();
        let mut nodes = HashMap::new();
        for func in program.functions() {
            nodes.insert(func.id, graph.add_node(func.id));
        }
        for func in program.functions() {
            let caller_idx = nodes[&func.id];
            for block in func.blocks.iter() {
                for statement in block.statements.iter() {
                    if let Statement::Call {
                        callee: Callee::Direct(callee),
                        ..
                    } = statement
                    {
                        graph.update_edge(caller_idx, nodes[callee], ());
                    }
                }
            }
        }
        let mut recursive = HashSet::new();
        for component in tarjan_scc(&graph) {
            let cyclic = component.len() > 1
                || component
                    .iter()
                    .any(|idx| graph.find_edge(*idx, *idx).is_some());
            if cyclic {
                recursive.extend(component.iter().map(|idx| graph[*idx]));
            }
        }
        Self { graph, recursive }
    }

    /// Whether `func` can reach itself through calls.
    pub fn is_recursive(&self, func: FuncId) -> bool {
        self.recursive.contains(&func)
    }

    /// Functions in callee-first order: every function comes after the
    /// functions it calls, except inside recursive cycles.
    pub fn bottom_up_order(&self) -> Vec<FuncId> {
        tarjan_scc(&self.graph)
            .into_iter()
            .flat_map(|component| {
                let mut funcs: Vec<FuncId> = component.iter().map(|idx| self.graph[*idx]).collect();
                funcs.sort();
                funcs
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::Callgraph;
    use crate::ir::{Expr, ProgramBuilder, Ty};

    #[test]
    fn test_recursion_and_order() {
        let mut builder = ProgramBuilder::new();
        let even = builder.declare_function("even", vec![("n", Ty::Scalar)], Ty::Scalar);
        let odd = builder.declare_function("odd", vec![("n", Ty::Scalar)], Ty::Scalar);
        let leaf = builder.declare_function("leaf", vec![], Ty::Scalar);
        let main = builder.declare_function("main", vec![], Ty::Scalar);
        for (func, other) in [(even, odd), (odd, even)] {
            let mut body = builder.define(func);
            body.call(None, other, vec![Expr::Scalar]);
            body.ret(Some(Expr::Scalar));
        }
        builder.define(leaf).ret(Some(Expr::Scalar));
        let mut body = builder.define(main);
        body.call(None, leaf, vec![]);
        body.call(None, even, vec![Expr::Scalar]);
        body.ret(Some(Expr::Scalar));
        let program = builder.build().unwrap();

        let callgraph = Callgraph::new(&program);
        assert!(callgraph.is_recursive(even));
        assert!(callgraph.is_recursive(odd));
        assert!(!callgraph.is_recursive(leaf));
        assert!(!callgraph.is_recursive(main));
        assert_eq!(callgraph.graph.edge_count(), 4);

        let order = callgraph.bottom_up_order();
        let position = |func| order.iter().position(|f| *f == func).unwrap();
        assert!(position(leaf) < position(main));
        assert!(position(even) < position(main));
    }
}
