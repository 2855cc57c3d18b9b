use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Debug;

/// Directed adjacency graph keyed by small copyable ids. Ordered containers
/// keep traversals deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Graph<N: Ord + Copy + Debug> {
    pub nodes: BTreeSet<N>,
    pub edges: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Ord + Copy + Debug> Default for Graph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: Ord + Copy + Debug> Graph<N> {
    pub fn new() -> Self {
        Self {
            nodes: BTreeSet::new(),
            edges: BTreeMap::new(),
        }
    }

    pub fn add_node(&mut self, node: N) -> bool {
        self.nodes.insert(node)
    }

    pub fn add_edge(&mut self, from: N, to: N) -> bool {
        let mut changed = self.nodes.insert(from);
        changed |= self.nodes.insert(to);
        changed |= self.edges.entry(from).or_default().insert(to);
        changed
    }

    pub fn neighbors(&self, node: N) -> Option<&BTreeSet<N>> {
        self.edges.get(&node)
    }

    pub fn union(&mut self, other: Self) -> bool {
        let mut changed = false;
        let old_len = self.nodes.len();
        self.nodes.extend(other.nodes);
        if self.nodes.len() != old_len {
            changed = true;
        }
        for (from, tos) in other.edges {
            let this_tos = self.edges.entry(from).or_default();
            let old_len = this_tos.len();
            this_tos.extend(tos);
            changed |= this_tos.len() != old_len;
        }
        changed
    }

    /// Breadth-first search from `roots`. Maps every reached node to the
    /// node it was first reached from; roots map to `None`.
    pub fn reachable_from<I>(&self, roots: I) -> BTreeMap<N, Option<N>>
    where
        I: IntoIterator<Item = N>,
    {
        let mut parents = BTreeMap::new();
        let mut worklist = VecDeque::new();
        for root in roots {
            if parents.insert(root, None).is_none() {
                worklist.push_back(root);
            }
        }
        while let Some(node) = worklist.pop_front() {
            if let Some(tos) = self.neighbors(node) {
                for to in tos.iter().copied() {
                    if !parents.contains_key(&to) {
                        parents.insert(to, Some(node));
                        worklist.push_back(to);
                    }
                }
            }
        }
        parents
    }

    /// Walks the parent map of `reachable_from` back to a root.
    pub fn path_to(parents: &BTreeMap<N, Option<N>>, target: N) -> Vec<N> {
        let mut path = vec![target];
        let mut current = target;
        while let Some(Some(parent)) = parents.get(&current) {
            path.push(*parent);
            current = *parent;
        }
        path.reverse();
        path
    }
}
