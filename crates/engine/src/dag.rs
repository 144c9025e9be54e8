//! DAG validation. Run this before persisting or executing a workflow.
//!
//! Checks, in order (the first failing class is reported, with every
//! offender of that class):
//! 1. The definition has nodes and node IDs are unique.
//! 2. Every edge references declared node IDs (both ends).
//! 3. Every node type is registered in the [`NodeRegistry`].
//! 4. Declared entry nodes exist.
//! 5. The graph reachable from the entry nodes is acyclic.
//!
//! Validation is pure: it never touches persistence or the network.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use nodes::NodeRegistry;

use crate::models::{Edge, Node, WorkflowDefinition};
use crate::ValidationError;

/// A definition that passed validation, with its execution plan.
#[derive(Debug, Clone)]
pub struct ValidatedWorkflow {
    definition: WorkflowDefinition,
    entries: Vec<String>,
    /// Reachable node IDs in topological order.
    order: Vec<String>,
    /// Kahn levels over the reachable subgraph.
    layers: Vec<Vec<String>>,
    /// node ID → indices into `definition.edges`, declaration order,
    /// restricted to edges whose source is reachable.
    inbound: HashMap<String, Vec<usize>>,
    /// node ID → distinct reachable successors, in edge declaration order.
    successors: HashMap<String, Vec<String>>,
    /// node ID → position in `order`.
    rank: HashMap<String, usize>,
}

impl ValidatedWorkflow {
    pub fn definition(&self) -> &WorkflowDefinition {
        &self.definition
    }

    /// The nodes a run starts from: reachable nodes with no reachable
    /// predecessor, in declaration order. Each appears once.
    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    /// Reachable node IDs in topological order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// Kahn levels over the reachable subgraph; the first is [`Self::entries`].
    pub fn layers(&self) -> &[Vec<String>] {
        &self.layers
    }

    pub fn is_reachable(&self, node_id: &str) -> bool {
        self.rank.contains_key(node_id)
    }

    pub fn rank(&self, node_id: &str) -> Option<usize> {
        self.rank.get(node_id).copied()
    }

    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.definition.node(node_id)
    }

    /// Inbound edges of `node_id` from reachable sources, in declaration order.
    pub fn inbound_edges(&self, node_id: &str) -> impl Iterator<Item = &Edge> + '_ {
        self.inbound
            .get(node_id)
            .into_iter()
            .flatten()
            .map(move |&i| &self.definition.edges[i])
    }

    /// Distinct direct predecessors of `node_id` among reachable nodes.
    pub fn predecessors(&self, node_id: &str) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.inbound_edges(node_id)
            .map(|e| e.source_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn successors(&self, node_id: &str) -> &[String] {
        self.successors
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Validate `definition` against `registry` and build its execution plan.
///
/// # Errors
/// Every [`ValidationError`] of the first failing check class.
pub fn validate(
    definition: &WorkflowDefinition,
    registry: &NodeRegistry,
) -> Result<ValidatedWorkflow, Vec<ValidationError>> {
    // -----------------------------------------------------------------------
    // 1. Non-empty, unique node IDs
    // -----------------------------------------------------------------------
    if definition.nodes.is_empty() {
        return Err(vec![ValidationError::Empty]);
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(definition.nodes.len());
    let mut errors = Vec::new();
    for (i, node) in definition.nodes.iter().enumerate() {
        if index.insert(node.id.as_str(), i).is_some() {
            errors.push(ValidationError::DuplicateNodeId(node.id.clone()));
        }
    }
    fail_if_any(errors)?;

    // -----------------------------------------------------------------------
    // 2. Edge endpoints
    // -----------------------------------------------------------------------
    let mut errors = Vec::new();
    for edge in &definition.edges {
        for (node_id, side) in [(&edge.source_id, "source"), (&edge.target_id, "target")] {
            if !index.contains_key(node_id.as_str()) {
                errors.push(ValidationError::DanglingEdge {
                    edge_id: edge.id.clone(),
                    node_id: node_id.clone(),
                    side,
                });
            }
        }
    }
    fail_if_any(errors)?;

    // -----------------------------------------------------------------------
    // 3. Node types
    // -----------------------------------------------------------------------
    let errors = definition
        .nodes
        .iter()
        .filter(|n| !registry.contains(&n.node_type))
        .map(|n| ValidationError::UnknownNodeType {
            node_id: n.id.clone(),
            node_type: n.node_type.clone(),
        })
        .collect();
    fail_if_any(errors)?;

    // -----------------------------------------------------------------------
    // 4. Entry nodes
    // -----------------------------------------------------------------------
    let errors = definition
        .entry_nodes
        .iter()
        .filter(|id| !index.contains_key(id.as_str()))
        .map(|id| ValidationError::UnknownEntryNode(id.clone()))
        .collect();
    fail_if_any(errors)?;

    let seeds: Vec<&str> = if definition.entry_nodes.is_empty() {
        let targets: HashSet<&str> = definition.edges.iter().map(|e| e.target_id.as_str()).collect();
        definition
            .nodes
            .iter()
            .map(|n| n.id.as_str())
            .filter(|id| !targets.contains(id))
            .collect()
    } else {
        let mut seen = HashSet::new();
        definition
            .entry_nodes
            .iter()
            .map(String::as_str)
            .filter(|id| seen.insert(*id))
            .collect()
    };

    // -----------------------------------------------------------------------
    // 5. Reachability + topological sort (Kahn's algorithm)
    // -----------------------------------------------------------------------
    let mut outbound: HashMap<&str, Vec<usize>> = HashMap::new();
    for (i, edge) in definition.edges.iter().enumerate() {
        outbound.entry(edge.source_id.as_str()).or_default().push(i);
    }

    let mut reachable: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::new();
    for &seed in &seeds {
        if reachable.insert(seed) {
            queue.push_back(seed);
        }
    }
    while let Some(node_id) = queue.pop_front() {
        for &i in outbound.get(node_id).into_iter().flatten() {
            let target = definition.edges[i].target_id.as_str();
            if reachable.insert(target) {
                queue.push_back(target);
            }
        }
    }

    let mut inbound: HashMap<String, Vec<usize>> = HashMap::new();
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = reachable.iter().map(|&id| (id, 0)).collect();
    for (i, edge) in definition.edges.iter().enumerate() {
        if !reachable.contains(edge.source_id.as_str()) {
            continue;
        }
        inbound.entry(edge.target_id.clone()).or_default().push(i);
        let next = successors.entry(edge.source_id.clone()).or_default();
        if !next.contains(&edge.target_id) {
            next.push(edge.target_id.clone());
        }
        *in_degree.entry(edge.target_id.as_str()).or_insert(0) += 1;
    }

    // Ties are broken by declaration position so the order is deterministic.
    let mut frontier: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(&id, _)| Reverse(index[id]))
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(reachable.len());
    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut remaining = in_degree.clone();

    while !frontier.is_empty() {
        let mut layer = Vec::new();
        let mut next_frontier = BinaryHeap::new();
        while let Some(Reverse(i)) = frontier.pop() {
            let node_id = definition.nodes[i].id.as_str();
            layer.push(node_id.to_owned());
            for &e in outbound.get(node_id).into_iter().flatten() {
                let target = definition.edges[e].target_id.as_str();
                if let Some(deg) = remaining.get_mut(target) {
                    *deg -= 1;
                    if *deg == 0 {
                        next_frontier.push(Reverse(index[target]));
                    }
                }
            }
        }
        order.extend(layer.iter().cloned());
        layers.push(layer);
        frontier = next_frontier;
    }

    // If we didn't visit every reachable node the graph contains a cycle.
    if order.len() != reachable.len() {
        return Err(vec![ValidationError::Cycle(cycle_members(
            definition, &index, &order, &reachable,
        ))]);
    }

    let rank = order.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
    // A declared entry fed by another reachable node waits for it like any
    // other dependent; only the first layer starts the run.
    let entries = layers.first().cloned().unwrap_or_default();

    Ok(ValidatedWorkflow {
        definition: definition.clone(),
        entries,
        order,
        layers,
        inbound,
        successors,
        rank,
    })
}

fn fail_if_any(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Nodes left after Kahn's algorithm are on a cycle or downstream of one.
/// Repeatedly peeling off nodes with no outgoing edge inside the leftover
/// set strips the downstream tail.
fn cycle_members(
    definition: &WorkflowDefinition,
    index: &HashMap<&str, usize>,
    sorted: &[String],
    reachable: &HashSet<&str>,
) -> Vec<String> {
    let sorted: HashSet<&str> = sorted.iter().map(String::as_str).collect();
    let mut leftover: HashSet<&str> = reachable
        .iter()
        .copied()
        .filter(|id| !sorted.contains(id))
        .collect();

    loop {
        let sinks: Vec<&str> = leftover
            .iter()
            .copied()
            .filter(|&id| {
                !definition
                    .edges
                    .iter()
                    .any(|e| e.source_id == id && leftover.contains(e.target_id.as_str()))
            })
            .collect();
        if sinks.is_empty() {
            break;
        }
        for sink in sinks {
            leftover.remove(sink);
        }
    }

    let mut members: Vec<&str> = leftover.into_iter().collect();
    members.sort_by_key(|id| index[id]);
    members.into_iter().map(str::to_owned).collect()
}

// ============================================================
// Unit tests
// ============================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, Node};
    use nodes::mock::MockNode;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        registry.register("mock", Arc::new(MockNode::returning("mock", json!({}))));
        registry
    }

    fn make_definition(ids: &[&str], edges: &[(&str, &str)]) -> WorkflowDefinition {
        WorkflowDefinition::new(
            ids.iter().map(|id| Node::new(*id, "mock")).collect(),
            edges.iter().map(|(from, to)| Edge::new(*from, *to)).collect(),
        )
    }

    #[test]
    fn valid_linear_dag_returns_sorted_order() {
        // A → B → C
        let definition = make_definition(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);

        let plan = validate(&definition, &registry()).expect("should be valid");
        assert_eq!(plan.order(), ["a", "b", "c"]);
        assert_eq!(plan.entries(), ["a"]);
        assert_eq!(plan.layers().len(), 3);
    }

    #[test]
    fn valid_diamond_dag() {
        //   A
        //  / \
        // B   C
        //  \ /
        //   D
        let definition = make_definition(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
        );

        let plan = validate(&definition, &registry()).expect("should be valid");
        assert_eq!(plan.order(), ["a", "b", "c", "d"]);
        assert_eq!(
            plan.layers(),
            [vec!["a".to_string()], vec!["b".into(), "c".into()], vec!["d".into()]]
        );
        assert_eq!(plan.predecessors("d"), vec!["b", "c"]);
        assert_eq!(plan.successors("a"), ["b", "c"]);
    }

    #[test]
    fn empty_definition_is_rejected() {
        let result = validate(&WorkflowDefinition::default(), &registry());
        assert_eq!(result.unwrap_err(), vec![ValidationError::Empty]);
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let definition = make_definition(&["a", "a"], &[]);
        assert_eq!(
            validate(&definition, &registry()).unwrap_err(),
            vec![ValidationError::DuplicateNodeId("a".into())]
        );
    }

    #[test]
    fn edge_referencing_missing_node_is_rejected() {
        let definition = make_definition(&["a"], &[("a", "ghost"), ("phantom", "a")]);
        let errors = validate(&definition, &registry()).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(
            &errors[0],
            ValidationError::DanglingEdge { node_id, side: "target", .. } if node_id == "ghost"
        ));
        assert!(matches!(
            &errors[1],
            ValidationError::DanglingEdge { node_id, side: "source", .. } if node_id == "phantom"
        ));
    }

    #[test]
    fn dangling_edges_are_reported_before_unknown_types() {
        let mut definition = make_definition(&["a"], &[("a", "ghost")]);
        definition.nodes[0].node_type = "llm".into();
        let errors = validate(&definition, &registry()).unwrap_err();
        assert!(matches!(errors[0], ValidationError::DanglingEdge { .. }));
    }

    #[test]
    fn unknown_node_type_is_rejected() {
        let mut definition = make_definition(&["a", "b"], &[("a", "b")]);
        definition.nodes[1].node_type = "vector_search".into();
        assert_eq!(
            validate(&definition, &registry()).unwrap_err(),
            vec![ValidationError::UnknownNodeType {
                node_id: "b".into(),
                node_type: "vector_search".into(),
            }]
        );
    }

    #[test]
    fn unknown_entry_node_is_rejected() {
        let mut definition = make_definition(&["a"], &[]);
        definition.entry_nodes = vec!["trigger".into()];
        assert_eq!(
            validate(&definition, &registry()).unwrap_err(),
            vec![ValidationError::UnknownEntryNode("trigger".into())]
        );
    }

    #[test]
    fn cycle_reachable_from_entry_is_detected() {
        // T → A → B → C → A  (cycle!) ; C → D hangs off the cycle
        let mut definition = make_definition(
            &["t", "a", "b", "c", "d"],
            &[("t", "a"), ("a", "b"), ("b", "c"), ("c", "a"), ("c", "d")],
        );
        definition.entry_nodes = vec!["t".into()];
        assert_eq!(
            validate(&definition, &registry()).unwrap_err(),
            vec![ValidationError::Cycle(vec!["a".into(), "b".into(), "c".into()])]
        );
    }

    #[test]
    fn cycle_unreachable_from_entry_is_ignored() {
        // The trigger only feeds `a`; `x ⇄ y` is dead weight in the editor.
        let mut definition = make_definition(
            &["a", "b", "x", "y"],
            &[("a", "b"), ("x", "y"), ("y", "x")],
        );
        definition.entry_nodes = vec!["a".into()];

        let plan = validate(&definition, &registry()).expect("unreachable cycle is fine");
        assert_eq!(plan.order(), ["a", "b"]);
        assert!(!plan.is_reachable("x"));
    }

    #[test]
    fn edges_from_unreachable_sources_are_not_dependencies() {
        let mut definition = make_definition(&["a", "b", "orphan"], &[("a", "b"), ("orphan", "b")]);
        definition.entry_nodes = vec!["a".into()];

        let plan = validate(&definition, &registry()).expect("valid");
        assert_eq!(plan.predecessors("b"), vec!["a"]);
        assert_eq!(plan.order(), ["a", "b"]);
    }

    #[test]
    fn repeated_entry_is_listed_once() {
        let mut definition = make_definition(&["a", "b"], &[("a", "b")]);
        definition.entry_nodes = vec!["a".into(), "a".into()];

        let plan = validate(&definition, &registry()).expect("valid");
        assert_eq!(plan.entries(), ["a"]);
        assert_eq!(plan.order(), ["a", "b"]);
    }

    #[test]
    fn entry_with_reachable_predecessor_does_not_start_the_run() {
        // a → b → c, with both a and b declared as entries.
        let mut definition = make_definition(&["a", "b", "c"], &[("a", "b"), ("b", "c")]);
        definition.entry_nodes = vec!["b".into(), "a".into()];

        let plan = validate(&definition, &registry()).expect("valid");
        assert_eq!(plan.entries(), ["a"]);
        assert_eq!(plan.predecessors("b"), vec!["a"]);
        assert_eq!(plan.order(), ["a", "b", "c"]);
    }

    #[test]
    fn several_declared_entries_start_together() {
        let mut definition = make_definition(&["a", "b", "c", "x"], &[("a", "c"), ("b", "c")]);
        definition.entry_nodes = vec!["b".into(), "a".into()];

        let plan = validate(&definition, &registry()).expect("valid");
        assert_eq!(plan.entries(), ["a", "b"]);
        assert_eq!(plan.order(), ["a", "b", "c"]);
        assert!(!plan.is_reachable("x"));
    }

    #[test]
    fn single_node_no_edges_is_valid() {
        let definition = make_definition(&["solo"], &[]);
        let plan = validate(&definition, &registry()).expect("single node should be valid");
        assert_eq!(plan.order(), ["solo"]);
    }
}
