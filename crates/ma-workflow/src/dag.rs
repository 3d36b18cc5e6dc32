//! Step dependency ordering (spec §4.9 step 1).
//!
//! Direct port of `csa-todo/src/dag.rs`'s Kahn's-algorithm BFS reduction,
//! generalized from markdown TODO items to named workflow steps whose
//! edges come from an explicit `depends_on` list rather than parsed
//! inline annotations.

use std::collections::{HashMap, VecDeque};

use ma_core::AppError;

use crate::definition::StepDefinition;

/// Indices into `steps`, in an order where every step's dependencies
/// precede it. Errors with the names still carrying in-degree on a cycle.
pub fn topological_order(steps: &[StepDefinition]) -> Result<Vec<usize>, AppError> {
    let index_of: HashMap<&str, usize> =
        steps.iter().enumerate().map(|(i, s)| (s.name.as_str(), i)).collect();

    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for dep in &step.depends_on {
            let Some(&from) = index_of.get(dep.as_str()) else {
                return Err(AppError::ConfigError(format!(
                    "step '{}' depends on unknown step '{}'",
                    step.name, dep
                )));
            };
            edges[from].push(i);
            incoming[i].push(from);
        }
    }

    let mut indegree: Vec<usize> = incoming.iter().map(Vec::len).collect();
    let mut queue: VecDeque<usize> = indegree
        .iter()
        .enumerate()
        .filter_map(|(i, d)| (*d == 0).then_some(i))
        .collect();
    let mut order = Vec::with_capacity(steps.len());

    while let Some(node) = queue.pop_front() {
        order.push(node);
        for &next in &edges[node] {
            indegree[next] = indegree[next].saturating_sub(1);
            if indegree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() == steps.len() {
        Ok(order)
    } else {
        let stuck: Vec<&str> = indegree
            .iter()
            .enumerate()
            .filter_map(|(i, d)| (*d > 0).then_some(steps[i].name.as_str()))
            .collect();
        Err(AppError::ConfigError(format!(
            "dependency cycle detected among steps: {}",
            stuck.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn step(name: &str, depends_on: &[&str]) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            step_type: "context".to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            condition: None,
            outputs: Vec::new(),
            config: Value::Null,
            continue_on_failure: false,
        }
    }

    #[test]
    fn independent_steps_keep_declaration_order() {
        let steps = vec![step("a", &[]), step("b", &[])];
        let order = topological_order(&steps).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn dependency_runs_before_dependent() {
        let steps = vec![step("b", &["a"]), step("a", &[])];
        let order = topological_order(&steps).unwrap();
        let pos_a = order.iter().position(|&i| steps[i].name == "a").unwrap();
        let pos_b = order.iter().position(|&i| steps[i].name == "b").unwrap();
        assert!(pos_a < pos_b);
    }

    #[test]
    fn cycle_is_rejected() {
        let steps = vec![step("a", &["b"]), step("b", &["a"])];
        let err = topological_order(&steps).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let steps = vec![step("a", &["missing"])];
        assert!(topological_order(&steps).is_err());
    }
}
