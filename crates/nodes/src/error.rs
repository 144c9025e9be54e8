//! Node-level error type.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine uses the variant to decide retry behaviour:
/// - `Retryable` / `Timeout`: re-attempted up to the type's `max_retries`.
/// - `Fatal` / `Cancelled`: the step is immediately marked as failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Transient failure; the engine may re-try the node.
    #[error("retryable node error: {0}")]
    Retryable(String),

    /// Permanent failure; no retry should be attempted.
    #[error("fatal node error: {0}")]
    Fatal(String),

    /// The attempt exceeded the node type's declared timeout.
    #[error("node timed out after {0:?}")]
    Timeout(Duration),

    /// The node observed the execution's cancellation signal and stopped.
    #[error("node cancelled")]
    Cancelled,
}

impl NodeError {
    /// Whether the engine's retry policy applies to this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Timeout(_))
    }
}
