//! In-process implementation of both repositories.
//!
//! All state sits behind one lock so that the terminal-status check and the
//! write it guards happen atomically.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::{
    models::{
        DefinitionRow, ExecutionStepRow, WorkflowExecutionRow, WorkflowRow, WorkflowStatus,
    },
    repository::{ExecutionRepository, WorkflowRepository},
    DbError,
};

#[derive(Default)]
struct Tables {
    workflows: HashMap<Uuid, WorkflowRow>,
    executions: HashMap<Uuid, WorkflowExecutionRow>,
    /// execution id → steps in insertion order
    steps: HashMap<Uuid, Vec<ExecutionStepRow>>,
}

impl Tables {
    fn writable_execution(&self, id: Uuid) -> Result<&WorkflowExecutionRow, DbError> {
        let execution = self.executions.get(&id).ok_or(DbError::NotFound)?;
        if execution.status.is_terminal() {
            return Err(DbError::ExecutionTerminated(id));
        }
        Ok(execution)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for MemoryStore {
    async fn create_workflow(&self, workflow: WorkflowRow) -> Result<WorkflowRow, DbError> {
        let mut tables = self.tables.write().await;
        if tables.workflows.contains_key(&workflow.id) {
            return Err(DbError::Conflict(workflow.id));
        }
        tables.workflows.insert(workflow.id, workflow.clone());
        Ok(workflow)
    }

    async fn get_workflow(&self, id: Uuid) -> Result<WorkflowRow, DbError> {
        let tables = self.tables.read().await;
        tables.workflows.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn list_workflows(&self) -> Result<Vec<WorkflowRow>, DbError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<WorkflowRow> = tables.workflows.values().cloned().collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn update_workflow_status(&self, id: Uuid, status: WorkflowStatus) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        let workflow = tables.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        workflow.status = status;
        Ok(())
    }

    async fn add_definition(&self, id: Uuid, definition: serde_json::Value) -> Result<u32, DbError> {
        let mut tables = self.tables.write().await;
        let workflow = tables.workflows.get_mut(&id).ok_or(DbError::NotFound)?;
        let version = workflow
            .latest_definition()
            .map_or(1, |latest| latest.version + 1);
        workflow.definitions.push(DefinitionRow {
            version,
            definition,
            created_at: Utc::now(),
        });
        Ok(version)
    }

    async fn delete_workflow(&self, id: Uuid) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        tables
            .workflows
            .remove(&id)
            .map(|_| ())
            .ok_or(DbError::NotFound)
    }
}

#[async_trait]
impl ExecutionRepository for MemoryStore {
    async fn create_execution(&self, execution: &WorkflowExecutionRow) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        if tables.executions.contains_key(&execution.id) {
            return Err(DbError::Conflict(execution.id));
        }
        tables.executions.insert(execution.id, execution.clone());
        tables.steps.insert(execution.id, Vec::new());
        Ok(())
    }

    async fn get_execution(&self, id: Uuid) -> Result<WorkflowExecutionRow, DbError> {
        let tables = self.tables.read().await;
        tables.executions.get(&id).cloned().ok_or(DbError::NotFound)
    }

    async fn update_execution(&self, execution: &WorkflowExecutionRow) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        tables.writable_execution(execution.id)?;
        tables.executions.insert(execution.id, execution.clone());
        Ok(())
    }

    async fn list_executions(&self, workflow_id: Uuid) -> Result<Vec<WorkflowExecutionRow>, DbError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<WorkflowExecutionRow> = tables
            .executions
            .values()
            .filter(|e| e.workflow_id == workflow_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        Ok(rows)
    }

    async fn delete_execution(&self, id: Uuid) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        tables.executions.remove(&id).ok_or(DbError::NotFound)?;
        let removed = tables.steps.remove(&id).map_or(0, |steps| steps.len());
        debug!(execution_id = %id, steps = removed, "deleted execution");
        Ok(())
    }

    async fn insert_step(&self, step: &ExecutionStepRow) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        tables.writable_execution(step.execution_id)?;
        let steps = tables.steps.entry(step.execution_id).or_default();
        if steps.iter().any(|s| s.id == step.id) {
            return Err(DbError::Conflict(step.id));
        }
        steps.push(step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &ExecutionStepRow) -> Result<(), DbError> {
        let mut tables = self.tables.write().await;
        tables.writable_execution(step.execution_id)?;
        let stored = tables
            .steps
            .get_mut(&step.execution_id)
            .and_then(|steps| steps.iter_mut().find(|s| s.id == step.id))
            .ok_or(DbError::NotFound)?;
        *stored = step.clone();
        Ok(())
    }

    async fn list_steps(&self, execution_id: Uuid) -> Result<Vec<ExecutionStepRow>, DbError> {
        let tables = self.tables.read().await;
        if !tables.executions.contains_key(&execution_id) {
            return Err(DbError::NotFound);
        }
        Ok(tables.steps.get(&execution_id).cloned().unwrap_or_default())
    }
}
