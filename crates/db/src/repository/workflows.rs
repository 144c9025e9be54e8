//! Workflow CRUD operations.

use async_trait::async_trait;
use uuid::Uuid;

use crate::{
    models::{WorkflowRow, WorkflowStatus},
    DbError,
};

#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert a new workflow.
    ///
    /// Each stored definition must be the serialised form of the `engine`
    /// crate's `WorkflowDefinition`.
    async fn create_workflow(&self, workflow: WorkflowRow) -> Result<WorkflowRow, DbError>;

    /// Fetch a single workflow by its primary key.
    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError>;

    /// Return all workflows ordered by creation time (newest first).
    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError>;

    async fn update_workflow_status(&self, id: Uuid, status: WorkflowStatus) -> Result<(), DbError>;

    /// Append a new definition version and return its version number.
    async fn add_definition(&self, id: Uuid, definition: serde_json::Value) -> Result<u32, DbError>;

    /// Permanently delete a workflow by its primary key.
    ///
    /// Returns `DbError::NotFound` if no row was deleted.
    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError>;
}
