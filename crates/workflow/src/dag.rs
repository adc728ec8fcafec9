//! DAG shape and stable topological ordering.
//!
//! Shapes are adjacency lists keyed by step id; children are declared on
//! parents and there are no pointers, only ids.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeStep {
    pub step_id: String,
    pub task_name: String,
    #[serde(default)]
    pub children_step_ids: Vec<String>,
}

/// Kahn's algorithm with the ready queue kept sorted by step id.
///
/// The sort is the deterministic tie-break for equal in-degree nodes: the
/// projection must produce the same order on every call for a fixed shape,
/// and UI consumers depend on that stability.
pub fn topo_sort(shape: &[ShapeStep]) -> Vec<String> {
    let step_ids: std::collections::HashSet<&str> =
        shape.iter().map(|s| s.step_id.as_str()).collect();

    let mut children: std::collections::HashMap<&str, Vec<&str>> = Default::default();
    let mut in_degree: std::collections::HashMap<&str, usize> =
        step_ids.iter().map(|id| (*id, 0)).collect();

    for step in shape {
        let kids: Vec<&str> = step
            .children_step_ids
            .iter()
            .map(String::as_str)
            .filter(|c| step_ids.contains(c))
            .collect();
        for &child in &kids {
            *in_degree.entry(child).or_insert(0) += 1;
        }
        children.insert(step.step_id.as_str(), kids);
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| *id)
        .collect();
    queue.sort_unstable();

    let mut result = Vec::with_capacity(shape.len());
    while !queue.is_empty() {
        let node = queue.remove(0);
        result.push(node.to_string());
        if let Some(kids) = children.get(node) {
            for &child in kids {
                if let Some(deg) = in_degree.get_mut(child) {
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push(child);
                        queue.sort_unstable();
                    }
                }
            }
        }
    }

    result
}

/// Parent names per step, resolved through the shape.
pub fn parents_by_step(shape: &[ShapeStep]) -> std::collections::HashMap<String, Vec<String>> {
    let name_of: std::collections::HashMap<&str, &str> = shape
        .iter()
        .map(|s| (s.step_id.as_str(), s.task_name.as_str()))
        .collect();

    let mut parents: std::collections::HashMap<String, Vec<String>> = shape
        .iter()
        .map(|s| (s.step_id.clone(), Vec::new()))
        .collect();

    for step in shape {
        for child in &step.children_step_ids {
            if let Some(list) = parents.get_mut(child) {
                list.push(name_of[step.step_id.as_str()].to_string());
            }
        }
    }

    parents
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, children: &[&str]) -> ShapeStep {
        ShapeStep {
            step_id: id.into(),
            task_name: format!("task_{id}"),
            children_step_ids: children.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn linear_chain_order() {
        let shape = vec![step("a", &["b"]), step("b", &["c"]), step("c", &[])];
        assert_eq!(topo_sort(&shape), vec!["a", "b", "c"]);
    }

    #[test]
    fn equal_in_degree_sorted_by_step_id() {
        let shape = vec![step("s_c", &[]), step("s_a", &["s_c"]), step("s_b", &["s_c"])];
        assert_eq!(topo_sort(&shape), vec!["s_a", "s_b", "s_c"]);
    }

    #[test]
    fn diamond_keeps_sink_last() {
        let shape = vec![
            step("s1", &["s2", "s3"]),
            step("s2", &["s4"]),
            step("s3", &["s4"]),
            step("s4", &[]),
        ];
        let order = topo_sort(&shape);
        assert_eq!(order.first().unwrap(), "s1");
        assert_eq!(order.last().unwrap(), "s4");
    }

    #[test]
    fn order_is_stable_across_calls() {
        let shape = vec![
            step("z", &[]),
            step("m", &["z"]),
            step("a", &["z"]),
            step("q", &["z"]),
        ];
        let first = topo_sort(&shape);
        for _ in 0..10 {
            assert_eq!(topo_sort(&shape), first);
        }
    }

    #[test]
    fn unknown_children_are_ignored() {
        let shape = vec![step("a", &["ghost", "b"]), step("b", &[])];
        assert_eq!(topo_sort(&shape), vec!["a", "b"]);
    }

    #[test]
    fn parents_resolved_to_task_names() {
        let shape = vec![step("s1", &["s3"]), step("s2", &["s3"]), step("s3", &[])];
        let parents = parents_by_step(&shape);
        let mut p = parents["s3"].clone();
        p.sort();
        assert_eq!(p, vec!["task_s1", "task_s2"]);
        assert!(parents["s1"].is_empty());
    }
}
