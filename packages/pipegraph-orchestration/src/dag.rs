//! Layered topological sorting over the node dependency map.

use crate::error::{PipelineError, Result};
use std::collections::{HashMap, HashSet};

/// Group node names into topological layers.
///
/// `dependencies` maps every node name to the names of its parents; nodes
/// without parents map to an empty set. The result is a sequence of layers
/// where layer `i` holds exactly the nodes whose parents all sit in layers
/// `< i`, so every node of a layer may execute concurrently. Names within a
/// layer are sorted to keep derived artifacts reproducible.
///
/// An unresolvable remainder (some strongly connected component) surfaces as
/// [`PipelineError::CircularDependency`] naming the nodes left over.
pub(crate) fn topological_layers(
    dependencies: &HashMap<String, HashSet<String>>,
) -> Result<Vec<Vec<String>>> {
    let mut in_degree: HashMap<&str, usize> = dependencies
        .iter()
        .map(|(name, parents)| (name.as_str(), parents.len()))
        .collect();

    // Reverse adjacency for O(1) dependent lookups while draining.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (child, parents) in dependencies {
        for parent in parents {
            dependents
                .entry(parent.as_str())
                .or_default()
                .push(child.as_str());
        }
    }

    let mut layers = Vec::new();
    let mut processed = 0usize;

    while processed < dependencies.len() {
        let mut ready: Vec<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(name, _)| *name)
            .collect();

        if ready.is_empty() {
            let mut remaining: Vec<String> = in_degree.keys().map(|s| (*s).to_string()).collect();
            remaining.sort();
            return Err(PipelineError::CircularDependency { nodes: remaining });
        }

        ready.sort_unstable();
        processed += ready.len();

        for name in &ready {
            in_degree.remove(name);
            for child in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                }
            }
        }

        layers.push(ready.into_iter().map(String::from).collect());
    }

    Ok(layers)
}
