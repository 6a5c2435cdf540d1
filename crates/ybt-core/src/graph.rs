//! The target graph (spec §4.5).
//!
//! Grounded on `examples/original_source/yabt/graph.py`:
//! `build_target_dep_graph` (edge `target -> dep` per target), and
//! `stable_reverse_topological_sort`, which this module reimplements
//! node-for-node (the iterative DFS with `seen`/`explored` sets, sorted
//! fringe, and "`new_nodes` empty -> node fully explored -> yield" shape)
//! rather than reaching for `petgraph`'s own `toposort`, because the spec
//! requires *this exact* deterministic tie-break, not merely *a* valid
//! topological order. `petgraph::graph::DiGraph` is still used underneath
//! for storage and for the `to_dot` export (spec §9 supplement, `ybt tree
//! --dot`), sourced from the graph crate in the AerynOS tools pack since the
//! teacher itself has no graph library in its dependency tree.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use snafu::Snafu;
use tracing::instrument;

use crate::name::QualifiedName;
use crate::spec::TargetSpec;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("target graph contains a cycle reaching '{node}'"))]
    CycleDetected { node: String },

    #[snafu(display("unknown target '{name}' referenced from the graph"))]
    UnknownTarget { name: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// The in-memory target graph: one node per surviving [`TargetSpec`], one
/// edge `target -> dep` per dependency (spec §4.5).
#[derive(Debug, Default)]
pub struct TargetGraph {
    targets: BTreeMap<QualifiedName, TargetSpec>,
    graph: DiGraph<QualifiedName, ()>,
    index: BTreeMap<QualifiedName, NodeIndex>,
}

impl TargetGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a graph from a finished (post-crawl, post-prune) target table
    /// (`build_target_dep_graph` in graph.py).
    pub fn build(targets: BTreeMap<QualifiedName, TargetSpec>) -> Self {
        let mut graph = DiGraph::new();
        let mut index = BTreeMap::new();
        for name in targets.keys() {
            index.insert(name.clone(), graph.add_node(name.clone()));
        }
        for (name, target) in &targets {
            let from = index[name];
            for dep in &target.deps {
                if let Some(&to) = index.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }
        Self { targets, graph, index }
    }

    pub fn get(&self, name: &QualifiedName) -> Option<&TargetSpec> {
        self.targets.get(name)
    }

    pub fn get_mut(&mut self, name: &QualifiedName) -> Option<&mut TargetSpec> {
        self.targets.get_mut(name)
    }

    pub fn contains(&self, name: &QualifiedName) -> bool {
        self.targets.contains_key(name)
    }

    pub fn targets(&self) -> &BTreeMap<QualifiedName, TargetSpec> {
        &self.targets
    }

    pub fn deps_of(&self, name: &QualifiedName) -> &[QualifiedName] {
        self.targets.get(name).map(|t| t.deps.as_slice()).unwrap_or(&[])
    }

    /// All nodes transitively reachable from `source`, following dependency
    /// edges (`get_descendants` in graph.py, backed by
    /// `networkx.algorithms.dag.descendants`).
    pub fn descendants(&self, source: &QualifiedName) -> Result<BTreeSet<QualifiedName>> {
        let mut out = BTreeSet::new();
        let mut stack = vec![source.clone()];
        let mut visited = BTreeSet::new();
        visited.insert(source.clone());
        while let Some(n) = stack.pop() {
            for dep in self.deps_of(&n) {
                if visited.insert(dep.clone()) {
                    out.insert(dep.clone());
                    stack.push(dep.clone());
                }
            }
        }
        Ok(out)
    }

    /// The deterministic build order: dependencies before dependents, ties
    /// broken lexicographically by name (spec §4.11, grounded exactly on
    /// `stable_reverse_topological_sort` in graph.py).
    #[instrument(level = "trace", skip_all)]
    pub fn stable_reverse_topological_sort(&self) -> Result<Vec<QualifiedName>> {
        let mut seen: BTreeSet<QualifiedName> = BTreeSet::new();
        let mut explored: BTreeSet<QualifiedName> = BTreeSet::new();
        let mut order = Vec::with_capacity(self.targets.len());

        for v in self.targets.keys() {
            if explored.contains(v) {
                continue;
            }
            let mut fringe = vec![v.clone()];
            while let Some(w) = fringe.last().cloned() {
                if explored.contains(&w) {
                    fringe.pop();
                    continue;
                }
                seen.insert(w.clone());

                let mut successors: Vec<&QualifiedName> = self.deps_of(&w).iter().collect();
                successors.sort();

                let mut new_nodes = Vec::new();
                for n in successors {
                    if !explored.contains(n) {
                        if seen.contains(n) {
                            return CycleDetectedSnafu { node: n.to_string() }.fail();
                        }
                        new_nodes.push(n.clone());
                    }
                }

                if !new_nodes.is_empty() {
                    fringe.extend(new_nodes);
                } else {
                    explored.insert(w.clone());
                    order.push(w.clone());
                    fringe.pop();
                }
            }
        }
        Ok(order)
    }

    /// Render the graph as Graphviz DOT (spec §9 supplement: `ybt tree
    /// --dot`), mirroring `petgraph::dot::Dot`'s default node labeling.
    pub fn to_dot(&self) -> String {
        use std::fmt::Write as _;
        let mut out = String::from("digraph ybt {\n");
        for name in self.targets.keys() {
            let _ = writeln!(out, "    \"{name}\";");
        }
        for (name, target) in &self.targets {
            for dep in &target.deps {
                if self.targets.contains_key(dep) {
                    let _ = writeln!(out, "    \"{name}\" -> \"{dep}\";");
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

/// Memoizing wrapper over [`TargetGraph::descendants`]
/// (`CachedDescendants` in caching.py), used by the image-cache classifier
/// so each target's descendant set is computed at most once per run.
#[derive(Debug, Default)]
pub struct CachedDescendants {
    cache: std::cell::RefCell<BTreeMap<QualifiedName, BTreeSet<QualifiedName>>>,
}

impl CachedDescendants {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, graph: &TargetGraph, key: &QualifiedName) -> Result<BTreeSet<QualifiedName>> {
        if let Some(cached) = self.cache.borrow().get(key) {
            return Ok(cached.clone());
        }
        let computed = graph.descendants(key)?;
        self.cache.borrow_mut().insert(key.clone(), computed.clone());
        Ok(computed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, deps: &[&str]) -> TargetSpec {
        let mut t = TargetSpec::new(QualifiedName::new("", name), "generic");
        for d in deps {
            t.push_dep(QualifiedName::new("", *d));
        }
        t
    }

    fn n(name: &str) -> QualifiedName {
        QualifiedName::new("", name)
    }

    #[test]
    fn deps_come_before_dependents() {
        let mut targets = BTreeMap::new();
        targets.insert(n("a"), spec("a", &["b"]));
        targets.insert(n("b"), spec("b", &["c"]));
        targets.insert(n("c"), spec("c", &[]));
        let graph = TargetGraph::build(targets);
        let order = graph.stable_reverse_topological_sort().unwrap();
        let pos = |x: &str| order.iter().position(|n| n.local() == x).unwrap();
        assert!(pos("c") < pos("b"));
        assert!(pos("b") < pos("a"));
    }

    #[test]
    fn ties_break_lexicographically() {
        let mut targets = BTreeMap::new();
        targets.insert(n("z"), spec("z", &["leaf"]));
        targets.insert(n("a"), spec("a", &["leaf"]));
        targets.insert(n("leaf"), spec("leaf", &[]));
        let graph = TargetGraph::build(targets);
        let order = graph.stable_reverse_topological_sort().unwrap();
        let names: Vec<&str> = order.iter().map(|n| n.local()).collect();
        assert_eq!(names, vec!["leaf", "a", "z"]);
    }

    #[test]
    fn cycle_is_detected() {
        let mut targets = BTreeMap::new();
        targets.insert(n("a"), spec("a", &["b"]));
        targets.insert(n("b"), spec("b", &["a"]));
        let graph = TargetGraph::build(targets);
        let err = graph.stable_reverse_topological_sort().unwrap_err();
        assert!(matches!(err, Error::CycleDetected { .. }));
    }

    #[test]
    fn descendants_are_transitive() {
        let mut targets = BTreeMap::new();
        targets.insert(n("a"), spec("a", &["b"]));
        targets.insert(n("b"), spec("b", &["c"]));
        targets.insert(n("c"), spec("c", &[]));
        let graph = TargetGraph::build(targets);
        let desc = graph.descendants(&n("a")).unwrap();
        assert!(desc.contains(&n("b")));
        assert!(desc.contains(&n("c")));
    }

    #[test]
    fn cached_descendants_memoizes() {
        let mut targets = BTreeMap::new();
        targets.insert(n("a"), spec("a", &["b"]));
        targets.insert(n("b"), spec("b", &[]));
        let graph = TargetGraph::build(targets);
        let cache = CachedDescendants::new();
        let first = cache.get(&graph, &n("a")).unwrap();
        let second = cache.get(&graph, &n("a")).unwrap();
        assert_eq!(first, second);
    }
}
