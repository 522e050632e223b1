//! Topological layering — run this before executing a workflow.
//!
//! The graph is the union of explicit step connections and implicit
//! data dependencies (any step referenced from an input spec is a
//! parent). Layering uses Kahn's algorithm with the step table's
//! insertion order as the deterministic tie-break:
//! 1. Seed a queue with every zero-in-degree step, in insertion order.
//! 2. Emit the queue's current contents as the next layer.
//! 3. Decrement successors; enqueue any that drop to zero, again in
//!    insertion order.
//!
//! Steps left unvisited sit on a cycle. They are appended as singleton
//! layers after the acyclic portion — the workflow still terminates,
//! but their relative order carries no guarantee.

use std::collections::VecDeque;

use indexmap::IndexMap;

use crate::models::StepDefinition;

// ---------------------------------------------------------------------------
// Graph projections
// ---------------------------------------------------------------------------

/// Successor lists over the edge union (explicit connections plus
/// implicit input dependencies), deduplicated, one entry per step in
/// insertion order.
pub fn successors(steps: &IndexMap<String, StepDefinition>) -> IndexMap<String, Vec<String>> {
    let mut adjacency: IndexMap<String, Vec<String>> = steps
        .keys()
        .map(|id| (id.clone(), Vec::new()))
        .collect();

    for step in steps.values() {
        for target in &step.connections {
            if steps.contains_key(target) {
                let list = adjacency.get_mut(&step.id).expect("seeded above");
                if !list.contains(target) {
                    list.push(target.clone());
                }
            }
        }
        // Implicit edges run parent → dependent. References to unknown
        // steps resolve to null at input time and add no edge.
        for parent in step.implicit_parents() {
            let parent = parent.to_string();
            if let Some(list) = adjacency.get_mut(&parent) {
                if !list.contains(&step.id) {
                    list.push(step.id.clone());
                }
            }
        }
    }

    adjacency
}

/// In-degree per step over the same edge union.
pub fn in_degrees(steps: &IndexMap<String, StepDefinition>) -> IndexMap<String, usize> {
    let mut degrees: IndexMap<String, usize> = steps.keys().map(|id| (id.clone(), 0)).collect();
    for targets in successors(steps).values() {
        for target in targets {
            *degrees.get_mut(target).expect("targets are known steps") += 1;
        }
    }
    degrees
}

// ---------------------------------------------------------------------------
// Layer plan
// ---------------------------------------------------------------------------

/// The computed execution layering of a workflow graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPlan {
    /// Layers in execution order; steps within a layer may run
    /// concurrently.
    pub layers: Vec<Vec<String>>,
    /// Steps on a cycle, appended as singleton layers at the end (in
    /// insertion order).
    pub cyclic: Vec<String>,
}

impl LayerPlan {
    /// True when the graph is non-empty but *nothing* can start: every
    /// step sits on a cycle.
    pub fn is_deadlocked(&self) -> bool {
        !self.cyclic.is_empty() && self.layers.len() == self.cyclic.len()
    }
}

/// Compute the layer plan for the given step table.
pub fn build_layers(steps: &IndexMap<String, StepDefinition>) -> LayerPlan {
    let adjacency = successors(steps);
    let mut in_degree = in_degrees(steps);

    // Seed with every zero-in-degree step, in insertion order.
    let mut queue: VecDeque<String> = steps
        .keys()
        .filter(|id| in_degree[*id] == 0)
        .cloned()
        .collect();

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut visited = 0usize;

    while !queue.is_empty() {
        let layer: Vec<String> = queue.drain(..).collect();
        visited += layer.len();

        // Collect newly-unblocked steps, then enqueue them in insertion
        // order so the tie-break stays deterministic.
        let mut unblocked: Vec<String> = Vec::new();
        for id in &layer {
            for target in &adjacency[id] {
                let degree = in_degree.get_mut(target).expect("known step");
                *degree -= 1;
                if *degree == 0 {
                    unblocked.push(target.clone());
                }
            }
        }
        for id in steps.keys() {
            if unblocked.contains(id) {
                queue.push_back(id.clone());
            }
        }

        layers.push(layer);
    }

    // Whatever was never visited sits on a cycle: append singletons.
    let mut cyclic: Vec<String> = Vec::new();
    if visited < steps.len() {
        for id in steps.keys() {
            if in_degree[id] > 0 {
                cyclic.push(id.clone());
                layers.push(vec![id.clone()]);
            }
        }
    }

    LayerPlan { layers, cyclic }
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{InputRef, InputSpec};
    use jobs::mock::MockJob;
    use serde_json::json;
    use std::sync::Arc;

    fn step(id: &str) -> StepDefinition {
        StepDefinition::new(id, Arc::new(MockJob::returning(id, json!({}))), InputSpec::new())
    }

    fn table(defs: Vec<StepDefinition>) -> IndexMap<String, StepDefinition> {
        defs.into_iter().map(|d| (d.id.clone(), d)).collect()
    }

    fn connect(steps: &mut IndexMap<String, StepDefinition>, from: &str, to: &str) {
        steps.get_mut(from).unwrap().connections.push(to.to_string());
    }

    #[test]
    fn linear_chain_layers_one_per_step() {
        // a → b → c
        let mut steps = table(vec![step("a"), step("b"), step("c")]);
        connect(&mut steps, "a", "b");
        connect(&mut steps, "b", "c");

        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["a"], vec!["b"], vec!["c"]]);
        assert!(plan.cyclic.is_empty());
    }

    #[test]
    fn parallel_fan_in_groups_sources_into_one_layer() {
        // a, b, c independent; d depends on all three.
        let mut steps = table(vec![step("a"), step("b"), step("c"), step("d")]);
        connect(&mut steps, "a", "d");
        connect(&mut steps, "b", "d");
        connect(&mut steps, "c", "d");

        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["a", "b", "c"], vec!["d"]]);
    }

    #[test]
    fn diamond_keeps_insertion_order_within_layers() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let mut steps = table(vec![step("a"), step("b"), step("c"), step("d")]);
        connect(&mut steps, "a", "b");
        connect(&mut steps, "a", "c");
        connect(&mut steps, "b", "d");
        connect(&mut steps, "c", "d");

        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["a"], vec!["b", "c"], vec!["d"]]);
    }

    #[test]
    fn implicit_dependency_is_an_edge() {
        // sum references fetch in its input spec; no explicit edge.
        let mut inputs = InputSpec::new();
        inputs.insert("total".into(), InputRef::dep("fetch", "items"));
        let sum = StepDefinition::new("sum", Arc::new(MockJob::returning("sum", json!({}))), inputs);

        let steps = table(vec![step("fetch"), sum]);
        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["fetch"], vec!["sum"]]);
    }

    #[test]
    fn explicit_and_implicit_edge_between_same_pair_counts_once() {
        let mut inputs = InputSpec::new();
        inputs.insert("x".into(), InputRef::dep("a", "x"));
        let b = StepDefinition::new("b", Arc::new(MockJob::returning("b", json!({}))), inputs);

        let mut steps = table(vec![step("a"), b]);
        connect(&mut steps, "a", "b");

        assert_eq!(in_degrees(&steps)["b"], 1);
        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["a"], vec!["b"]]);
    }

    #[test]
    fn cycle_members_become_trailing_singletons() {
        // a → b, then x → y → x (cycle) declared after.
        let mut steps = table(vec![step("a"), step("b"), step("x"), step("y")]);
        connect(&mut steps, "a", "b");
        connect(&mut steps, "x", "y");
        connect(&mut steps, "y", "x");

        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["a"], vec!["b"], vec!["x"], vec!["y"]]);
        assert_eq!(plan.cyclic, vec!["x", "y"]);
        assert!(!plan.is_deadlocked());
    }

    #[test]
    fn fully_cyclic_graph_is_deadlocked() {
        let mut steps = table(vec![step("x"), step("y")]);
        connect(&mut steps, "x", "y");
        connect(&mut steps, "y", "x");

        let plan = build_layers(&steps);
        assert!(plan.is_deadlocked());
    }

    #[test]
    fn empty_graph_yields_empty_plan() {
        let steps = IndexMap::new();
        let plan = build_layers(&steps);
        assert!(plan.layers.is_empty());
        assert!(plan.cyclic.is_empty());
        assert!(!plan.is_deadlocked());
    }

    #[test]
    fn single_step_single_layer() {
        let steps = table(vec![step("solo")]);
        let plan = build_layers(&steps);
        assert_eq!(plan.layers, vec![vec!["solo"]]);
    }
}
