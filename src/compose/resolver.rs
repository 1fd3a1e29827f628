//! Dependency resolution into start stages
//!
//! Services are layered with Kahn's algorithm: each [`Stage`] holds every
//! service whose dependencies were all placed in earlier stages. Members of a
//! stage are independent of each other and may start concurrently. Within a
//! stage, members keep manifest declaration order.

use super::manifest::Manifest;
use crate::error::CycleError;
use std::collections::HashSet;

/// Set of mutually independent services
pub type Stage = Vec<String>;

/// Dependency graph derived from a manifest
///
/// Edges point from a dependent service to each of its dependencies.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    /// Service names in declaration order
    nodes: Vec<String>,
    /// `edges[i]` holds the node indices that node `i` depends on
    edges: Vec<Vec<usize>>,
}

impl DependencyGraph {
    pub fn from_manifest(manifest: &Manifest) -> Self {
        let nodes: Vec<String> = manifest.services().iter().map(|s| s.name.clone()).collect();
        let edges = manifest
            .services()
            .iter()
            .map(|s| {
                s.depends_on
                    .iter()
                    .filter_map(|dep| manifest.position(dep))
                    .collect()
            })
            .collect();

        Self { nodes, edges }
    }

    /// Direct dependencies of a service
    pub fn dependencies(&self, service: &str) -> Vec<&str> {
        self.index_of(service)
            .map(|i| self.edges[i].iter().map(|&d| self.nodes[d].as_str()).collect())
            .unwrap_or_default()
    }

    /// Services that directly depend on `service`
    pub fn dependents(&self, service: &str) -> Vec<&str> {
        let Some(target) = self.index_of(service) else {
            return Vec::new();
        };
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, deps)| deps.contains(&target))
            .map(|(i, _)| self.nodes[i].as_str())
            .collect()
    }

    /// Layer the graph into stages
    pub fn stages(&self) -> Result<Vec<Stage>, CycleError> {
        let mut remaining_deps: Vec<usize> = self.edges.iter().map(|deps| deps.len()).collect();
        let mut placed = vec![false; self.nodes.len()];
        let mut stages = Vec::new();
        let mut placed_count = 0;

        while placed_count < self.nodes.len() {
            let ready: Vec<usize> = (0..self.nodes.len())
                .filter(|&i| !placed[i] && remaining_deps[i] == 0)
                .collect();

            if ready.is_empty() {
                return Err(self.cycle_error(&placed));
            }

            for &i in &ready {
                placed[i] = true;
            }
            placed_count += ready.len();

            // Release dependents only after the whole stage is fixed, so a
            // service never shares a stage with one of its dependencies
            for (node, deps) in self.edges.iter().enumerate() {
                if placed[node] {
                    continue;
                }
                let satisfied = deps.iter().filter(|d| ready.contains(d)).count();
                remaining_deps[node] -= satisfied;
            }

            stages.push(ready.into_iter().map(|i| self.nodes[i].clone()).collect());
        }

        Ok(stages)
    }

    /// Build the cycle error from the services left unplaced
    ///
    /// Only services that can reach themselves are named; unplaced services
    /// that merely depend on a cycle are left out.
    fn cycle_error(&self, placed: &[bool]) -> CycleError {
        let on_cycle = |start: usize| {
            let mut seen = vec![false; self.nodes.len()];
            let mut stack: Vec<usize> = self.edges[start].clone();
            while let Some(i) = stack.pop() {
                if i == start {
                    return true;
                }
                if !placed[i] && !seen[i] {
                    seen[i] = true;
                    stack.extend(self.edges[i].iter().copied());
                }
            }
            false
        };

        let services = (0..self.nodes.len())
            .filter(|&i| !placed[i] && on_cycle(i))
            .map(|i| self.nodes[i].clone())
            .collect();
        CycleError { services }
    }

    /// Services reachable from `roots` through dependency edges, roots included
    pub fn closure(&self, roots: &[String]) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<usize> = roots.iter().filter_map(|r| self.index_of(r)).collect();

        while let Some(i) = stack.pop() {
            if seen.insert(self.nodes[i].clone()) {
                stack.extend(self.edges[i].iter().copied());
            }
        }

        seen
    }

    fn index_of(&self, service: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n == service)
    }
}

/// Resolve a manifest into its start stages
pub fn resolve(manifest: &Manifest) -> Result<Vec<Stage>, CycleError> {
    DependencyGraph::from_manifest(manifest).stages()
}

/// Teardown order: stages reversed, members reversed within each stage
pub fn teardown_order(stages: &[Stage]) -> Vec<Stage> {
    stages
        .iter()
        .rev()
        .map(|stage| stage.iter().rev().cloned().collect())
        .collect()
}
