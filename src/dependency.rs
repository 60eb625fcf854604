//! Declared-dependency resolution.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::InitError;

/// A small helper for resolving module interdependencies.
///
/// Register edges with [`add_dependency`](Self::add_dependency) (`a`
/// depends on `b`), nodes without dependencies with [`add`](Self::add),
/// then call [`solve`](Self::solve) to obtain every known node in a valid
/// initialization order. Nodes that only ever appear as a dependency are
/// part of the result as well, ordered before their dependents.
#[derive(Debug, Clone, Default)]
pub struct DependencySolver {
    dependencies: BTreeMap<String, BTreeSet<String>>,
}

impl DependencySolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `node` without dependencies, ensuring it appears in the
    /// result of [`solve`](Self::solve).
    pub fn add(&mut self, node: impl Into<String>) {
        self.dependencies.entry(node.into()).or_default();
    }

    /// Add a dependency from `from` to `to`.
    pub fn add_dependency(&mut self, from: impl Into<String>, to: impl Into<String>) {
        self.dependencies
            .entry(from.into())
            .or_default()
            .insert(to.into());
    }

    /// Remove a direct dependency. Does nothing if there was no such
    /// dependency.
    pub fn remove_dependency(&mut self, from: &str, to: &str) {
        if let Some(deps) = self.dependencies.get_mut(from) {
            deps.remove(to);
        }
    }

    /// The direct dependencies of `node`.
    pub fn direct_dependencies(&self, node: &str) -> Vec<&str> {
        self.dependencies
            .get(node)
            .map(|deps| deps.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// All nodes that directly depend on `node`.
    pub fn direct_dependents(&self, node: &str) -> Vec<&str> {
        self.dependencies
            .iter()
            .filter(|(other, deps)| other.as_str() != node && deps.contains(node))
            .map(|(other, _)| other.as_str())
            .collect()
    }

    pub fn has_direct_dependency(&self, from: &str, to: &str) -> bool {
        self.dependencies
            .get(from)
            .is_some_and(|deps| deps.contains(to))
    }

    /// Solve the dependency system.
    ///
    /// Returns every known node, dependencies before dependents, or
    /// [`InitError::DependencyLoop`] carrying a cycle path when the system
    /// cannot be solved.
    pub fn solve(&self) -> Result<Vec<String>, InitError> {
        let mut sorted: Vec<String> = Vec::new();
        let mut placed: BTreeSet<String> = BTreeSet::new();
        let mut remaining: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (node, deps) in &self.dependencies {
            if deps.is_empty() {
                if placed.insert(node.clone()) {
                    sorted.push(node.clone());
                }
            } else {
                remaining.insert(node.clone(), deps.clone());
                // dependencies never registered themselves have nothing to
                // wait for
                for dep in deps {
                    if !self.dependencies.contains_key(dep) && placed.insert(dep.clone()) {
                        sorted.push(dep.clone());
                    }
                }
            }
        }

        loop {
            let mut updated = false;
            let candidates: Vec<String> = remaining.keys().cloned().collect();
            for node in candidates {
                let deps = remaining.get_mut(&node).expect("candidate still present");
                let before = deps.len();
                deps.retain(|dep| !placed.contains(dep));
                if deps.len() != before {
                    updated = true;
                }
                if deps.is_empty() {
                    remaining.remove(&node);
                    placed.insert(node.clone());
                    sorted.push(node);
                }
            }
            if !updated {
                break;
            }
        }

        if let Some(start) = remaining.keys().next() {
            return Err(InitError::DependencyLoop(find_cycle(&remaining, start)));
        }
        Ok(sorted)
    }
}

/// Walk unresolvable nodes until one repeats; the returned path ends with
/// the repeated node.
fn find_cycle(remaining: &BTreeMap<String, BTreeSet<String>>, start: &str) -> Vec<String> {
    let mut path = vec![start.to_string()];
    loop {
        let current = path.last().expect("path never empty");
        let next = remaining
            .get(current)
            .and_then(|deps| deps.iter().next())
            .expect("unresolved node keeps unresolved dependencies")
            .clone();
        let closes_cycle = path.contains(&next);
        path.push(next);
        if closes_cycle {
            return path;
        }
    }
}
