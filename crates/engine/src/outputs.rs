//! Per-execution node outputs and input assembly.

use std::collections::HashMap;

use serde_json::{Map, Value};

use nodes::NodeInputs;

use crate::dag::ValidatedWorkflow;

/// Append-only map of completed node outputs for one execution.
///
/// Only the engine writes here, once per node, right after that node's
/// executor returns. A second write for the same node is ignored.
#[derive(Debug, Default, Clone)]
pub struct NodeOutputs {
    values: HashMap<String, Value>,
}

impl NodeOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `output` for `node_id`. Returns `false` (and changes nothing)
    /// if the node already has an output.
    pub fn record(&mut self, node_id: &str, output: Value) -> bool {
        if self.values.contains_key(node_id) {
            return false;
        }
        self.values.insert(node_id.to_owned(), output);
        true
    }

    pub fn get(&self, node_id: &str) -> Option<&Value> {
        self.values.get(node_id)
    }
}

/// Build the inputs for `node_id`.
///
/// A node with no inbound edge gets the trigger payload (merged when it is an
/// object, otherwise under `"trigger"`). Otherwise each inbound edge is
/// applied in declaration order, so when two edges deliver the same key the
/// later-declared edge wins:
/// - `source_slot` picks that key out of the predecessor's output;
/// - `target_slot` stores the value under that key;
/// - without `target_slot` an object is merged key by key and anything else
///   is stored under the source node's id.
///
/// A predecessor with no recorded output (failed or skipped) contributes
/// `null`.
pub fn assemble_inputs(
    plan: &ValidatedWorkflow,
    node_id: &str,
    outputs: &NodeOutputs,
    trigger_data: &Value,
) -> NodeInputs {
    let mut inputs = Map::new();
    let mut has_inbound = false;

    for edge in plan.inbound_edges(node_id) {
        has_inbound = true;
        let output = outputs.get(&edge.source_id).unwrap_or(&Value::Null);
        let value = match &edge.source_slot {
            Some(slot) => output.get(slot).cloned().unwrap_or(Value::Null),
            None => output.clone(),
        };

        match (&edge.target_slot, value) {
            (Some(slot), value) => {
                inputs.insert(slot.clone(), value);
            }
            (None, Value::Object(fields)) => inputs.extend(fields),
            (None, value) => {
                inputs.insert(edge.source_id.clone(), value);
            }
        }
    }

    if !has_inbound {
        match trigger_data {
            Value::Object(fields) => inputs.extend(fields.clone()),
            Value::Null => {}
            other => {
                inputs.insert("trigger".to_owned(), other.clone());
            }
        }
    }

    inputs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::validate;
    use crate::models::{Edge, Node, WorkflowDefinition};
    use nodes::{mock::MockNode, NodeRegistry};
    use serde_json::json;
    use std::sync::Arc;

    fn plan(definition: WorkflowDefinition) -> ValidatedWorkflow {
        let mut registry = NodeRegistry::new();
        registry.register("mock", Arc::new(MockNode::echo("mock")));
        validate(&definition, &registry).expect("valid definition")
    }

    #[test]
    fn outputs_are_written_once() {
        let mut outputs = NodeOutputs::new();
        assert!(outputs.record("a", json!({ "v": 1 })));
        assert!(!outputs.record("a", json!({ "v": 2 })));
        assert_eq!(outputs.get("a"), Some(&json!({ "v": 1 })));
        assert_eq!(outputs.get("b"), None);
    }

    #[test]
    fn entry_nodes_receive_trigger_payload() {
        let plan = plan(WorkflowDefinition::linear(&["a"], "mock"));
        let outputs = NodeOutputs::new();

        let merged = assemble_inputs(&plan, "a", &outputs, &json!({ "email": "x@y.z" }));
        assert_eq!(Value::Object(merged), json!({ "email": "x@y.z" }));

        let wrapped = assemble_inputs(&plan, "a", &outputs, &json!("tick"));
        assert_eq!(Value::Object(wrapped), json!({ "trigger": "tick" }));
    }

    #[test]
    fn later_declared_edge_wins_on_convergent_keys() {
        // a ─┐
        //    ├─▶ c    both predecessors write `answer`
        // b ─┘
        let definition = WorkflowDefinition::new(
            vec![Node::new("a", "mock"), Node::new("b", "mock"), Node::new("c", "mock")],
            vec![Edge::new("b", "c"), Edge::new("a", "c")],
        );
        let plan = plan(definition);

        let mut outputs = NodeOutputs::new();
        outputs.record("a", json!({ "answer": "from a", "only_a": 1 }));
        outputs.record("b", json!({ "answer": "from b", "only_b": 2 }));

        let inputs = assemble_inputs(&plan, "c", &outputs, &Value::Null);
        assert_eq!(
            Value::Object(inputs),
            json!({ "answer": "from a", "only_a": 1, "only_b": 2 })
        );
    }

    #[test]
    fn slots_route_values() {
        let definition = WorkflowDefinition::new(
            vec![Node::new("a", "mock"), Node::new("b", "mock"), Node::new("c", "mock")],
            vec![
                Edge::new("a", "c").slots(Some("text"), Some("prompt")),
                Edge::new("b", "c").slots(None, Some("context")),
            ],
        );
        let plan = plan(definition);

        let mut outputs = NodeOutputs::new();
        outputs.record("a", json!({ "text": "hello", "ignored": true }));
        outputs.record("b", json!([1, 2, 3]));

        let inputs = assemble_inputs(&plan, "c", &outputs, &Value::Null);
        assert_eq!(
            Value::Object(inputs),
            json!({ "prompt": "hello", "context": [1, 2, 3] })
        );
    }

    #[test]
    fn missing_predecessor_output_becomes_null() {
        let plan = plan(WorkflowDefinition::linear(&["a", "b"], "mock"));
        let inputs = assemble_inputs(&plan, "b", &NodeOutputs::new(), &json!({ "x": 1 }));
        assert_eq!(Value::Object(inputs), json!({ "a": null }));
    }
}
