//! Trigger dispatcher: turns an external occurrence (manual run, schedule
//! tick, webhook call, ...) into an execution of the workflow's latest
//! definition.
//!
//! Trigger sources themselves (cron scheduling, HTTP endpoints, mailbox
//! polling) live outside this crate and only call [`TriggerDispatcher::on_trigger`].

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use db::models::{TriggerType, WorkflowRow, WorkflowStatus};
use db::{DbError, WorkflowRepository};

use crate::executor::ExecutionEngine;
use crate::TriggerError;

pub struct TriggerDispatcher {
    engine: Arc<ExecutionEngine>,
    workflows: Arc<dyn WorkflowRepository>,
}

impl TriggerDispatcher {
    pub fn new(engine: Arc<ExecutionEngine>, workflows: Arc<dyn WorkflowRepository>) -> Self {
        Self { engine, workflows }
    }

    pub fn engine(&self) -> &Arc<ExecutionEngine> {
        &self.engine
    }

    /// Start an execution for a trigger firing.
    ///
    /// The workflow must be `active` and configured for `trigger_type`; the
    /// run is pinned to the latest definition version.
    #[instrument(skip(self, payload))]
    pub async fn on_trigger(
        &self,
        workflow_id: Uuid,
        trigger_type: TriggerType,
        payload: Value,
    ) -> Result<Uuid, TriggerError> {
        let workflow = self.load(workflow_id).await?;

        if workflow.status != WorkflowStatus::Active {
            return Err(TriggerError::WorkflowNotRunnable {
                workflow_id,
                status: workflow.status,
            });
        }
        if workflow.trigger_type != trigger_type {
            return Err(TriggerError::TriggerTypeMismatch {
                workflow_id,
                expected: workflow.trigger_type,
                actual: trigger_type,
            });
        }

        let version = workflow
            .latest_definition()
            .map(|d| d.version)
            .ok_or(TriggerError::NoDefinition(workflow_id))?;
        let execution_id = self.engine.start(&workflow, version, payload).await?;

        info!(%execution_id, version, "trigger accepted");
        Ok(execution_id)
    }

    /// Operator re-run of a workflow with an explicit payload.
    ///
    /// Ignores the workflow's status and trigger configuration. `version`
    /// defaults to the latest definition.
    #[instrument(skip(self, payload))]
    pub async fn replay(
        &self,
        workflow_id: Uuid,
        version: Option<u32>,
        payload: Value,
    ) -> Result<Uuid, TriggerError> {
        let workflow = self.load(workflow_id).await?;
        let version = match version {
            Some(version) => version,
            None => workflow
                .latest_definition()
                .map(|d| d.version)
                .ok_or(TriggerError::NoDefinition(workflow_id))?,
        };

        let execution_id = self.engine.start(&workflow, version, payload).await?;
        info!(%execution_id, version, "replay started");
        Ok(execution_id)
    }

    async fn load(&self, workflow_id: Uuid) -> Result<WorkflowRow, TriggerError> {
        self.workflows
            .get_workflow(workflow_id)
            .await
            .map_err(|err| match err {
                DbError::NotFound => TriggerError::WorkflowNotFound(workflow_id),
                other => other.into(),
            })
    }
}
