//! Dependency ordering of plugins.

use crate::descriptor::Descriptor;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Why a plugin could not be placed by [`resolve_load_order`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    /// Dependencies that were neither provided nor already loaded.
    Missing(Vec<String>),
    /// The plugin depends on itself, directly or through other plugins.
    Cycle,
    /// Dependencies that are provided but unresolved themselves.
    Blocked(Vec<String>),
}

/// Result of [`resolve_load_order`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOrder {
    /// Plugins in an order where every plugin follows all of its dependencies.
    pub ordered: Vec<String>,
    /// Plugins whose dependencies can never be satisfied, keyed by name.
    pub unresolved: BTreeMap<String, Unresolved>,
}

impl LoadOrder {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Orders plugins so that each comes after everything it depends on.
///
/// Plugins without dependencies seed the ready queue; a plugin becomes ready
/// once its last dependency has been placed. Ties are broken by name so the
/// order is stable across runs. When two descriptors share a name the last one
/// wins.
pub fn resolve_load_order(descriptors: &[Descriptor]) -> LoadOrder {
    resolve_load_order_with(descriptors, |_| false)
}

/// Same as [`resolve_load_order`], except that dependencies for which
/// `is_satisfied` returns `true`, such as plugins loaded earlier, count as
/// already placed.
pub fn resolve_load_order_with<F>(descriptors: &[Descriptor], is_satisfied: F) -> LoadOrder
where
    F: Fn(&str) -> bool,
{
    let graph: BTreeMap<&str, BTreeSet<&str>> = descriptors
        .iter()
        .map(|descriptor| {
            let dependencies = descriptor
                .dependencies()
                .iter()
                .map(String::as_str)
                .filter(|dependency| !is_satisfied(*dependency))
                .collect();
            (descriptor.name(), dependencies)
        })
        .collect();

    let mut waiting: HashMap<&str, usize> = HashMap::with_capacity(graph.len());
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut ready = VecDeque::new();

    for (&name, dependencies) in &graph {
        if dependencies.is_empty() {
            ready.push_back(name);
            continue;
        }
        waiting.insert(name, dependencies.len());
        for &dependency in dependencies {
            dependents.entry(dependency).or_default().push(name);
        }
    }

    let mut ordered = Vec::with_capacity(graph.len());
    while let Some(name) = ready.pop_front() {
        ordered.push(name.to_string());
        let Some(unblocked) = dependents.get(name) else {
            continue;
        };
        for &dependent in unblocked {
            if let Some(remaining) = waiting.get_mut(dependent) {
                *remaining -= 1;
                if *remaining == 0 {
                    waiting.remove(dependent);
                    ready.push_back(dependent);
                }
            }
        }
    }

    let stuck: BTreeSet<&str> = waiting.into_keys().collect();
    let unresolved = stuck
        .iter()
        .map(|&name| (name.to_string(), classify(&graph, &stuck, name)))
        .collect();

    LoadOrder { ordered, unresolved }
}

fn classify(graph: &BTreeMap<&str, BTreeSet<&str>>, stuck: &BTreeSet<&str>, name: &str) -> Unresolved {
    let dependencies = graph.get(name).into_iter().flatten().copied();
    let missing: Vec<String> = dependencies
        .clone()
        .filter(|dependency| !graph.contains_key(dependency))
        .map(str::to_string)
        .collect();
    if !missing.is_empty() {
        return Unresolved::Missing(missing);
    }

    // Walk the stuck dependencies looking for a way back to `name`.
    let mut visited = BTreeSet::new();
    let mut pending: Vec<&str> = dependencies.clone().filter(|d| stuck.contains(d)).collect();
    while let Some(current) = pending.pop() {
        if current == name {
            return Unresolved::Cycle;
        }
        if visited.insert(current) {
            if let Some(next) = graph.get(current) {
                pending.extend(next.iter().copied().filter(|d| stuck.contains(d)));
            }
        }
    }

    Unresolved::Blocked(
        dependencies
            .filter(|dependency| stuck.contains(dependency))
            .map(str::to_string)
            .collect(),
    )
}
