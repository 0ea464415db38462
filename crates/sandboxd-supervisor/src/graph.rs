//! Dependency graph and startup levels.

use std::collections::HashMap;

use sandboxd_config::ProcessConfig;
use serde::Serialize;

use crate::error::SupervisorError;

/// `dependent` depends on `dependency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge {
    pub dependent: String,
    pub dependency: String,
}

/// Acyclic dependency graph over the configured processes.
///
/// A process's level is one more than the deepest of its dependencies, so
/// everything on one level can start concurrently once the previous levels
/// are ready. Within a level, configuration order is kept.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    levels: Vec<Vec<String>>,
    level_of: HashMap<String, usize>,
    dependencies: HashMap<String, Vec<String>>,
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn from_processes(processes: &[ProcessConfig]) -> Result<Self, SupervisorError> {
        let mut dependencies: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for process in processes {
            dependencies.insert(process.name.clone(), process.depends_on.clone());
            dependents.entry(process.name.clone()).or_default();
        }

        for process in processes {
            for dep in &process.depends_on {
                if !dependencies.contains_key(dep) {
                    return Err(SupervisorError::UnknownDependency {
                        process: process.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .push(process.name.clone());
            }
        }

        // Repeated passes in configuration order; a pass that places nothing
        // means the remaining processes wait on each other.
        let mut level_of: HashMap<String, usize> = HashMap::new();
        while level_of.len() < processes.len() {
            let mut placed = false;
            for process in processes {
                if level_of.contains_key(&process.name) {
                    continue;
                }
                let dep_levels: Option<Vec<usize>> = process
                    .depends_on
                    .iter()
                    .map(|d| level_of.get(d).copied())
                    .collect();
                if let Some(dep_levels) = dep_levels {
                    let level = dep_levels.iter().max().map(|l| l + 1).unwrap_or(0);
                    level_of.insert(process.name.clone(), level);
                    placed = true;
                }
            }
            if !placed {
                let mut stuck: Vec<&str> = processes
                    .iter()
                    .map(|p| p.name.as_str())
                    .filter(|n| !level_of.contains_key(*n))
                    .collect();
                stuck.sort();
                return Err(SupervisorError::DependencyCycle(stuck.join(", ")));
            }
        }

        let depth = level_of.values().max().map(|l| l + 1).unwrap_or(0);
        let mut levels = vec![Vec::new(); depth];
        for process in processes {
            levels[level_of[&process.name]].push(process.name.clone());
        }

        Ok(Self {
            levels,
            level_of,
            dependencies,
            dependents,
        })
    }

    /// Startup levels, leaves first.
    pub fn levels(&self) -> &[Vec<String>] {
        &self.levels
    }

    pub fn level_of(&self, name: &str) -> Option<usize> {
        self.level_of.get(name).copied()
    }

    /// Every process, dependencies before dependents.
    pub fn startup_order(&self) -> Vec<&str> {
        self.levels.iter().flatten().map(String::as_str).collect()
    }

    /// Exact reverse of [`startup_order`](Self::startup_order).
    pub fn teardown_order(&self) -> Vec<&str> {
        let mut order = self.startup_order();
        order.reverse();
        order
    }

    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.dependencies.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Processes that list `name` in their own `depends_on`.
    pub fn direct_dependents(&self, name: &str) -> &[String] {
        self.dependents.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.startup_order()
            .into_iter()
            .flat_map(|name| {
                self.dependencies_of(name)
                    .iter()
                    .map(move |dep| DependencyEdge {
                        dependent: name.to_string(),
                        dependency: dep.clone(),
                    })
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.level_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.level_of.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.level_of.contains_key(name)
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
