//! Dependency graph checks: unknown references, duplicates, cycles.
//!
//! Uses `petgraph` to model dependencies as a directed graph. Topological
//! sort detects cycles, so a cyclic DAG template is rejected while it is
//! being expanded instead of deadlocking the engine.

use std::collections::HashMap;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;
use treadle_types::workflow::DagTask;

/// Anything with a name and a list of names it depends on.
pub trait DependencyNode {
    fn id(&self) -> &str;
    fn depends_on(&self) -> &[String];
}

impl DependencyNode for DagTask {
    fn id(&self) -> &str {
        &self.name
    }

    fn depends_on(&self) -> &[String] {
        &self.dependencies
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("'{item}' depends on unknown '{dependency}'")]
    UnknownDependency { item: String, dependency: String },

    #[error("duplicate name '{0}'")]
    Duplicate(String),

    #[error("cycle detected involving '{0}'")]
    Cycle(String),
}

/// Return `items` in an order where every item follows its dependencies.
pub fn topological_order<T: DependencyNode>(items: &[T]) -> Result<Vec<&T>, GraphError> {
    let mut id_to_idx: HashMap<&str, usize> = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if id_to_idx.insert(item.id(), i).is_some() {
            return Err(GraphError::Duplicate(item.id().to_string()));
        }
    }

    // Edge from dependency -> dependent
    let mut graph = DiGraph::<usize, ()>::new();
    let node_indices: Vec<_> = (0..items.len()).map(|i| graph.add_node(i)).collect();

    for (to_idx, item) in items.iter().enumerate() {
        for dep in item.depends_on() {
            let from_idx = id_to_idx.get(dep.as_str()).ok_or_else(|| {
                GraphError::UnknownDependency {
                    item: item.id().to_string(),
                    dependency: dep.clone(),
                }
            })?;
            graph.add_edge(node_indices[*from_idx], node_indices[to_idx], ());
        }
    }

    let sorted = toposort(&graph, None)
        .map_err(|cycle| GraphError::Cycle(items[graph[cycle.node_id()]].id().to_string()))?;

    Ok(sorted.into_iter().map(|idx| &items[graph[idx]]).collect())
}

/// Validate that `items` form a DAG whose references all exist.
pub fn validate_dag<T: DependencyNode>(items: &[T]) -> Result<(), GraphError> {
    topological_order(items).map(|_| ())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn task(name: &str, dependencies: Vec<&str>) -> DagTask {
        DagTask {
            name: name.to_string(),
            template: "noop".to_string(),
            dependencies: dependencies.into_iter().map(String::from).collect(),
            arguments: Default::default(),
            with_items: None,
            on_exit: None,
            tolerate_failure: false,
        }
    }

    fn names(order: Vec<&DagTask>) -> Vec<&str> {
        order.into_iter().map(|t| t.name.as_str()).collect()
    }

    #[test]
    fn test_linear_chain_order() {
        let tasks = vec![task("c", vec!["b"]), task("b", vec!["a"]), task("a", vec![])];
        assert_eq!(names(topological_order(&tasks).unwrap()), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_diamond_is_valid() {
        // A -> {B, C} -> D
        let tasks = vec![
            task("a", vec![]),
            task("b", vec!["a"]),
            task("c", vec!["a"]),
            task("d", vec!["b", "c"]),
        ];
        let order = names(topological_order(&tasks).unwrap());
        assert_eq!(order.first(), Some(&"a"));
        assert_eq!(order.last(), Some(&"d"));
    }

    #[test]
    fn test_cycle_detected() {
        let tasks = vec![task("a", vec!["c"]), task("b", vec!["a"]), task("c", vec!["b"])];
        let err = validate_dag(&tasks).unwrap_err();
        assert!(err.to_string().contains("cycle detected"), "got: {err}");
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let tasks = vec![task("a", vec!["a"])];
        assert!(matches!(validate_dag(&tasks), Err(GraphError::Cycle(_))));
    }

    #[test]
    fn test_unknown_dependency() {
        let tasks = vec![task("a", vec!["missing"])];
        assert_eq!(
            validate_dag(&tasks).unwrap_err(),
            GraphError::UnknownDependency {
                item: "a".to_string(),
                dependency: "missing".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_name() {
        let tasks = vec![task("a", vec![]), task("a", vec![])];
        assert_eq!(validate_dag(&tasks).unwrap_err(), GraphError::Duplicate("a".to_string()));
    }

    #[test]
    fn test_empty_is_valid() {
        assert!(validate_dag::<DagTask>(&[]).is_ok());
    }
}
