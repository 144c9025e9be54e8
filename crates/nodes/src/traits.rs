//! The `ExecutableNode` trait, the contract every node capability must fulfil.

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::NodeError;

/// Inputs assembled by the engine from a node's direct predecessors.
pub type NodeInputs = Map<String, Value>;

/// Context passed to every node during execution.
///
/// Defined here (in the nodes crate) so both the engine and individual node
/// implementations can import it without a circular dependency.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// ID of the parent workflow.
    pub workflow_id: Uuid,
    /// ID of the current execution run.
    pub execution_id: Uuid,
    /// ID of the node being executed, as declared in the definition.
    pub node_id: String,
    /// Payload supplied by whichever trigger started the run.
    pub trigger_data: Value,
    /// Zero for the first attempt, incremented on every retry.
    pub attempt: u32,
    /// Fired when the execution is cancelled or times out.
    ///
    /// Long-running capabilities should watch it and return
    /// [`NodeError::Cancelled`]; the engine never aborts them forcibly.
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    /// Whether the owning execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// The core node trait.
///
/// A capability is opaque to the engine: it receives the node's declared
/// `config` and the assembled `inputs`, and returns the node's output.
#[async_trait]
pub trait ExecutableNode: Send + Sync {
    /// Execute the node and return its JSON output.
    async fn execute(
        &self,
        config: &Value,
        inputs: NodeInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError>;
}
