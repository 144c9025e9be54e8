//! Record structs for workflows, executions and execution steps.
//!
//! These are *persistence* models; they carry no graph behaviour.
//! Graph types live in the `engine` crate; a definition version is stored
//! here as the JSON it was authored in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// Lifecycle status of a workflow. Only `Active` accepts trigger-originated runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Draft,
    Active,
    Paused,
    Archived,
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Active => write!(f, "active"),
            Self::Paused => write!(f, "paused"),
            Self::Archived => write!(f, "archived"),
        }
    }
}

/// The event class permitted to start new executions of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Schedule,
    Webhook,
    Event,
    Database,
    Email,
    Form,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Manual => write!(f, "manual"),
            Self::Schedule => write!(f, "schedule"),
            Self::Webhook => write!(f, "webhook"),
            Self::Event => write!(f, "event"),
            Self::Database => write!(f, "database"),
            Self::Email => write!(f, "email"),
            Self::Form => write!(f, "form"),
        }
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual"   => Ok(Self::Manual),
            "schedule" => Ok(Self::Schedule),
            "webhook"  => Ok(Self::Webhook),
            "event"    => Ok(Self::Event),
            "database" => Ok(Self::Database),
            "email"    => Ok(Self::Email),
            "form"     => Ok(Self::Form),
            other      => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// One immutable version of a workflow's graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionRow {
    pub version: u32,
    /// Full JSON workflow definition (nodes, edges, entry nodes, viewport).
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A persisted workflow together with all of its definition versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRow {
    pub id: Uuid,
    pub name: String,
    pub status: WorkflowStatus,
    pub trigger_type: TriggerType,
    /// Opaque trigger settings (cron expression, webhook path, …).
    pub trigger_config: serde_json::Value,
    /// Versions in ascending order.
    pub definitions: Vec<DefinitionRow>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowRow {
    /// A new workflow holding a single definition as version 1.
    pub fn new(
        name: impl Into<String>,
        status: WorkflowStatus,
        trigger_type: TriggerType,
        definition: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            status,
            trigger_type,
            trigger_config: serde_json::Value::Null,
            definitions: vec![DefinitionRow {
                version: 1,
                definition,
                created_at: now,
            }],
            created_at: now,
        }
    }

    pub fn definition(&self, version: u32) -> Option<&DefinitionRow> {
        self.definitions.iter().find(|d| d.version == version)
    }

    pub fn latest_definition(&self) -> Option<&DefinitionRow> {
        self.definitions.iter().max_by_key(|d| d.version)
    }
}

// ---------------------------------------------------------------------------
// workflow_executions
// ---------------------------------------------------------------------------

/// Possible statuses for a workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states are final; nothing may mutate the execution afterwards.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending"   => Ok(Self::Pending),
            "running"   => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed"    => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other       => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A persisted workflow execution row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowExecutionRow {
    pub id: Uuid,
    pub workflow_id: Uuid,
    /// The definition version this run was pinned to at creation.
    pub workflow_version: u32,
    pub status: ExecutionStatus,
    pub trigger_data: serde_json::Value,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}

impl WorkflowExecutionRow {
    /// A fresh `pending` execution.
    pub fn pending(workflow_id: Uuid, workflow_version: u32, trigger_data: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            workflow_id,
            workflow_version,
            status: ExecutionStatus::Pending,
            trigger_data,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            error: None,
        }
    }

    /// Move to a terminal status, stamping end time and duration.
    pub fn finish(&mut self, status: ExecutionStatus, error: Option<String>) {
        let now = Utc::now();
        self.status = status;
        self.end_time = Some(now);
        self.duration_ms = Some((now - self.start_time).num_milliseconds());
        self.error = error;
    }
}

// ---------------------------------------------------------------------------
// workflow_execution_steps
// ---------------------------------------------------------------------------

/// Possible statuses for one node's step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// A persisted execution step row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStepRow {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    pub status: StepStatus,
    pub input_data: Option<serde_json::Value>,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
}

impl ExecutionStepRow {
    pub fn pending(execution_id: Uuid, node_id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            execution_id,
            node_id: node_id.into(),
            node_type: node_type.into(),
            status: StepStatus::Pending,
            input_data: None,
            output_data: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            retry_count: 0,
        }
    }
}
