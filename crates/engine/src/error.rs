//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use db::models::{TriggerType, WorkflowStatus};

/// A structural problem with a workflow definition.
///
/// Caught before any run starts; never surfaced mid-execution.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The definition declares no nodes at all.
    #[error("workflow definition has no nodes")]
    Empty,

    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the definition.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    DanglingEdge {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    /// No capability is registered for the node's declared type.
    #[error("node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// A declared entry node does not exist.
    #[error("entry node '{0}' is not declared in the definition")]
    UnknownEntryNode(String),

    /// The part of the graph reachable from the entry nodes has a cycle.
    #[error("workflow graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// Errors produced by the execution engine's public operations.
///
/// Node failures are not in here: they are recorded on the step.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The definition failed validation; no execution was created.
    #[error("workflow definition is invalid: {}", summarize(.0))]
    Validation(Vec<ValidationError>),

    #[error("workflow {workflow_id} has no definition version {version}")]
    VersionNotFound { workflow_id: Uuid, version: u32 },

    /// The stored definition JSON does not match the graph model.
    #[error("workflow definition could not be decoded: {0}")]
    InvalidDefinition(#[from] serde_json::Error),

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// The execution already reached a terminal status.
    #[error("execution {0} has already terminated")]
    AlreadyTerminal(Uuid),

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),
}

/// Why a trigger did not start an execution.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// Only `active` workflows accept trigger-originated runs.
    #[error("workflow {workflow_id} is {status} and does not accept triggered runs")]
    WorkflowNotRunnable {
        workflow_id: Uuid,
        status: WorkflowStatus,
    },

    #[error("workflow {workflow_id} is configured for {expected} triggers, got {actual}")]
    TriggerTypeMismatch {
        workflow_id: Uuid,
        expected: TriggerType,
        actual: TriggerType,
    },

    #[error("workflow {0} has no definition")]
    NoDefinition(Uuid),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<db::DbError> for TriggerError {
    fn from(err: db::DbError) -> Self {
        Self::Engine(EngineError::Database(err))
    }
}

/// A progress event could not be handed to a transport.
///
/// Logged and dropped by the broadcaster; never blocks the engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("progress transport '{transport}' failed: {message}")]
pub struct TransportError {
    pub transport: String,
    pub message: String,
}

fn summarize(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_summary_lists_every_error() {
        let err = EngineError::Validation(vec![
            ValidationError::DuplicateNodeId("a".into()),
            ValidationError::Cycle(vec!["b".into(), "c".into()]),
        ]);
        let message = err.to_string();
        assert!(message.contains("duplicate node ID: 'a'"));
        assert!(message.contains("cycle through: b, c"));
    }

    #[test]
    fn trigger_errors_name_the_workflow() {
        let workflow_id = Uuid::new_v4();
        let err = TriggerError::WorkflowNotRunnable {
            workflow_id,
            status: WorkflowStatus::Paused,
        };
        assert!(err.to_string().contains(&workflow_id.to_string()));
        assert!(err.to_string().contains("paused"));
    }
}
