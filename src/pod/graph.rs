//! Dependency graph over container names.
//!
//! Containers are nodes in an arena indexed by [`ContainerName`]; an edge
//! `c -> d` means `c` references `d` via `volumes_from`, `links` or
//! `net=container:`. Adjacency is stored as parallel index lists; the
//! transpose needed for dependents-first traversal is built once.
//!
//! The graph must be acyclic. Traversal order is deterministic: whenever
//! several nodes are ready at once, they are taken in lexicographic
//! `ContainerName` order.

use std::collections::{BTreeSet, HashMap};

use crate::error::{Error, Result};
use crate::name::ContainerName;

/// Arena of containers plus their dependency edges.
pub struct DependencyGraph {
    names: Vec<ContainerName>,
    index: HashMap<ContainerName, usize>,
    /// `deps[c]` is the set of nodes `c` depends on.
    deps: Vec<Vec<usize>>,
    /// Transpose: `dependents[d]` is the set of nodes depending on `d`.
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Builds the graph from `(name, dependencies)` pairs. Edges to names
    /// absent from the node set are dropped; reference validation happens
    /// in the manifest loader, and observed containers may depend on
    /// containers outside the pod.
    pub fn build<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (ContainerName, Vec<ContainerName>)>,
    {
        let nodes: Vec<(ContainerName, Vec<ContainerName>)> = nodes.into_iter().collect();
        let names: Vec<ContainerName> = nodes.iter().map(|(n, _)| n.clone()).collect();
        let index: HashMap<ContainerName, usize> = names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();

        let mut deps = vec![Vec::new(); names.len()];
        let mut dependents = vec![Vec::new(); names.len()];
        for (i, (_, targets)) in nodes.iter().enumerate() {
            for target in targets {
                if let Some(&j) = index.get(target) {
                    if i != j && !deps[i].contains(&j) {
                        deps[i].push(j);
                        dependents[j].push(i);
                    }
                }
            }
        }

        Self {
            names,
            index,
            deps,
            dependents,
        }
    }

    /// Order in which containers must be created: every container after
    /// all of its dependencies, ties broken lexicographically.
    pub fn creation_order(&self) -> Result<Vec<ContainerName>> {
        self.toposort(&self.deps, &self.dependents)
    }

    /// Order in which containers must be removed: every container before
    /// all of its dependencies (dependents first).
    pub fn removal_order(&self) -> Result<Vec<ContainerName>> {
        self.toposort(&self.dependents, &self.deps)
    }

    /// Kahn's algorithm with a lexicographically ordered ready set.
    /// `blocking[c]` are the nodes that must precede `c`; `unblocks[c]`
    /// are the nodes `c` releases once emitted.
    fn toposort(
        &self,
        blocking: &[Vec<usize>],
        unblocks: &[Vec<usize>],
    ) -> Result<Vec<ContainerName>> {
        let mut remaining: Vec<usize> = blocking.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<ContainerName> = self
            .names
            .iter()
            .enumerate()
            .filter(|(i, _)| remaining[*i] == 0)
            .map(|(_, n)| n.clone())
            .collect();

        let mut order = Vec::with_capacity(self.names.len());
        while let Some(name) = ready.pop_first() {
            let i = self.index[&name];
            order.push(name);
            for &j in &unblocks[i] {
                remaining[j] -= 1;
                if remaining[j] == 0 {
                    ready.insert(self.names[j].clone());
                }
            }
        }

        if order.len() == self.names.len() {
            Ok(order)
        } else {
            Err(self.cycle_error(&remaining))
        }
    }

    /// Builds a [`Error::ManifestCycle`] naming every edge among the
    /// nodes left unordered, so the report shows the whole cycle.
    fn cycle_error(&self, remaining: &[usize]) -> Error {
        let stuck: BTreeSet<usize> = remaining
            .iter()
            .enumerate()
            .filter(|(_, r)| **r > 0)
            .map(|(i, _)| i)
            .collect();

        let mut edges: Vec<String> = Vec::new();
        for &i in &stuck {
            for &j in &self.deps[i] {
                if stuck.contains(&j) {
                    edges.push(format!("{} -> {}", self.names[i], self.names[j]));
                }
            }
        }
        edges.sort();
        Error::ManifestCycle { edges }
    }
}
