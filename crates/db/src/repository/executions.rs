//! Execution and execution-step operations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    models::{ExecutionStepRow, WorkflowExecutionRow},
    DbError,
};

/// Durable storage for executions and their steps.
///
/// Implementations must reject any write that targets an execution whose
/// *stored* status is already terminal with [`DbError::ExecutionTerminated`],
/// including step inserts and updates.
#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Create a new workflow execution record.
    async fn create_execution(&self, execution: &WorkflowExecutionRow) -> Result<(), DbError>;

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError>;

    /// Replace the stored execution with `execution`.
    async fn update_execution(&self, execution: &WorkflowExecutionRow) -> Result<(), DbError>;

    /// All executions of a workflow, oldest first.
    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecutionRow>, DbError>;

    /// Delete an execution together with all of its steps.
    async fn delete_execution(&self, id: Uuid) -> Result<(), DbError>;

    async fn insert_step(&self, step: &ExecutionStepRow) -> Result<(), DbError>;

    async fn update_step(&self, step: &ExecutionStepRow) -> Result<(), DbError>;

    /// Steps of an execution in creation order.
    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStepRow>, DbError>;
}
