//! Core graph models for the workflow engine.
//!
//! These types are the source of truth for what a workflow version looks
//! like in memory. They are serialised to/from the JSON `definition` stored
//! with each version in the `db` crate.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use db::models::{ExecutionStepRow, WorkflowExecutionRow};

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// What a node does when one of its predecessors failed or was skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamFailure {
    /// Mark the node `skipped` without running it.
    #[default]
    Skip,
    /// Run anyway, with the failed predecessor's output replaced by `null`.
    AlwaysRun,
}

/// A single unit of work in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier within this definition (referenced by edges).
    pub id: String,
    /// Selects the registered `ExecutableNode` implementation.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Arbitrary configuration passed to the node at execution time.
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub on_upstream_failure: UpstreamFailure,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            config: Value::Null,
            on_upstream_failure: UpstreamFailure::Skip,
        }
    }

    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn always_run(mut self) -> Self {
        self.on_upstream_failure = UpstreamFailure::AlwaysRun;
        self
    }
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed dependency from `source_id` to `target_id`.
///
/// `source_slot` picks one key of the source's output; `target_slot` names
/// the input key the value is delivered under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source_id: String,
    pub target_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_slot: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_slot: Option<String>,
}

impl Edge {
    pub fn new(source_id: impl Into<String>, target_id: impl Into<String>) -> Self {
        let source_id = source_id.into();
        let target_id = target_id.into();
        Self {
            id: format!("{source_id}->{target_id}"),
            source_id,
            target_id,
            source_slot: None,
            target_slot: None,
        }
    }

    pub fn slots(mut self, source_slot: Option<&str>, target_slot: Option<&str>) -> Self {
        self.source_slot = source_slot.map(str::to_owned);
        self.target_slot = target_slot.map(str::to_owned);
        self
    }
}

// ---------------------------------------------------------------------------
// WorkflowDefinition
// ---------------------------------------------------------------------------

/// Editor camera position. Presentation-only; the engine ignores it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

/// An immutable snapshot of one workflow version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// The trigger's entry node(s). Empty means every node without an
    /// inbound edge.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_nodes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
}

impl WorkflowDefinition {
    /// Convenience constructor for testing.
    pub fn new(nodes: Vec<Node>, edges: Vec<Edge>) -> Self {
        Self {
            nodes,
            edges,
            entry_nodes: Vec::new(),
            viewport: None,
        }
    }

    /// A definition with every node of `node_type` chained in order:
    /// ids[0] → ids[1] → … → ids[n-1]
    pub fn linear(ids: &[&str], node_type: &str) -> Self {
        let nodes = ids.iter().map(|id| Node::new(*id, node_type)).collect();
        let edges = ids.windows(2).map(|w| Edge::new(w[0], w[1])).collect();
        Self::new(nodes, edges)
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

// ---------------------------------------------------------------------------
// Execution snapshot
// ---------------------------------------------------------------------------

/// An execution record together with its steps, as returned by `get_status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecution {
    #[serde(flatten)]
    pub execution: WorkflowExecutionRow,
    /// Steps in creation order.
    pub steps: Vec<ExecutionStepRow>,
}

impl WorkflowExecution {
    pub fn step(&self, node_id: &str) -> Option<&ExecutionStepRow> {
        self.steps.iter().find(|s| s.node_id == node_id)
    }
}
