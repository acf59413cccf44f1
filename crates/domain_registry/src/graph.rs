//! Adapter dependency graph
//!
//! Edges point from a dependency to its dependents. Ordering uses Kahn's
//! algorithm with a sorted ready set, so the same configuration always
//! produces the same start order.

use std::collections::{BTreeMap, BTreeSet};

use core_kernel::{AdapterId, ConfigError};

use crate::descriptor::AdapterDescriptor;

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// adapter -> adapters it depends on
    dependencies: BTreeMap<AdapterId, BTreeSet<AdapterId>>,
    /// adapter -> adapters depending on it
    dependents: BTreeMap<AdapterId, BTreeSet<AdapterId>>,
}

impl DependencyGraph {
    /// Builds the graph, rejecting dependencies on adapters not in the set
    pub fn build<'a>(
        descriptors: impl IntoIterator<Item = &'a AdapterDescriptor>,
    ) -> Result<Self, ConfigError> {
        let mut graph = Self::default();
        let descriptors: Vec<&AdapterDescriptor> = descriptors.into_iter().collect();

        for descriptor in &descriptors {
            graph.dependencies.entry(descriptor.id.clone()).or_default();
            graph.dependents.entry(descriptor.id.clone()).or_default();
        }

        for descriptor in &descriptors {
            for dependency in &descriptor.depends_on {
                if !graph.dependencies.contains_key(dependency) {
                    return Err(ConfigError::UnknownDependency {
                        adapter: descriptor.id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                graph
                    .dependencies
                    .entry(descriptor.id.clone())
                    .or_default()
                    .insert(dependency.clone());
                graph
                    .dependents
                    .entry(dependency.clone())
                    .or_default()
                    .insert(descriptor.id.clone());
            }
        }

        Ok(graph)
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Returns every adapter in dependency order
    ///
    /// # Errors
    ///
    /// `ConfigError::CyclicDependency` listing the adapters on the cycle(s).
    pub fn topological_order(&self) -> Result<Vec<AdapterId>, ConfigError> {
        Ok(self.levels()?.into_iter().flatten().collect())
    }

    /// Groups adapters into levels; every dependency of a level-n adapter is
    /// in a level below n, so one level can be started concurrently
    pub fn levels(&self) -> Result<Vec<Vec<AdapterId>>, ConfigError> {
        let mut in_degree: BTreeMap<&AdapterId, usize> = self
            .dependencies
            .iter()
            .map(|(id, deps)| (id, deps.len()))
            .collect();

        let mut levels = Vec::new();
        let mut ready: BTreeSet<&AdapterId> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut placed = 0;

        while !ready.is_empty() {
            let mut next = BTreeSet::new();
            for id in &ready {
                in_degree.remove(*id);
                for dependent in self.dependents.get(*id).into_iter().flatten() {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            next.insert(dependent);
                        }
                    }
                }
            }
            placed += ready.len();
            levels.push(ready.into_iter().cloned().collect());
            ready = next;
        }

        if placed < self.dependencies.len() {
            let remaining: BTreeSet<&AdapterId> = in_degree.keys().copied().collect();
            return Err(ConfigError::CyclicDependency {
                adapters: self.cycle_members(remaining),
            });
        }

        Ok(levels)
    }

    // Adapters left over by Kahn are on a cycle or downstream of one. Peel
    // off the downstream ones: they have no dependents among the leftovers.
    fn cycle_members(&self, mut remaining: BTreeSet<&AdapterId>) -> Vec<AdapterId> {
        loop {
            let leaves: Vec<&AdapterId> = remaining
                .iter()
                .copied()
                .filter(|id| {
                    !self
                        .dependents
                        .get(*id)
                        .into_iter()
                        .flatten()
                        .any(|dependent| remaining.contains(dependent))
                })
                .collect();
            if leaves.is_empty() {
                break;
            }
            for leaf in leaves {
                remaining.remove(leaf);
            }
        }
        remaining.into_iter().cloned().collect()
    }
}
