//! Progress broadcaster: fans execution and step transitions out to live
//! subscribers and to any attached transports.
//!
//! Each execution gets its own monotonically increasing sequence number so a
//! subscriber that reconnects can detect gaps. Delivery is at-most-once per
//! live subscription and nothing is replayed; after a reconnect, re-read the
//! current state with `ExecutionEngine::get_status`.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::task::{Context, Poll};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use db::models::{ExecutionStatus, ExecutionStepRow, StepStatus, WorkflowExecutionRow};

use crate::TransportError;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// The state change an event reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Execution {
        status: ExecutionStatus,
        error: Option<String>,
    },
    Step {
        step_id: Uuid,
        node_id: String,
        node_type: String,
        status: StepStatus,
        retry_count: u32,
        error: Option<String>,
    },
}

impl Transition {
    pub fn for_execution(execution: &WorkflowExecutionRow) -> Self {
        Self::Execution {
            status: execution.status,
            error: execution.error.clone(),
        }
    }

    pub fn for_step(step: &ExecutionStepRow) -> Self {
        Self::Step {
            step_id: step.id,
            node_id: step.node_id.clone(),
            node_type: step.node_type.clone(),
            status: step.status,
            retry_count: step.retry_count,
            error: step.error.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub execution_id: Uuid,
    pub workflow_id: Uuid,
    /// Starts at 1 for each execution and increases by one per event.
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub transition: Transition,
}

impl ProgressEvent {
    /// Name of the event on a push transport.
    pub fn event_name(&self) -> &'static str {
        match &self.transition {
            Transition::Execution { status: ExecutionStatus::Completed, .. } => "job-completed",
            Transition::Execution { status: ExecutionStatus::Failed, .. } => "job-failed",
            Transition::Execution { status: ExecutionStatus::Cancelled, .. } => "job-cancelled",
            _ => "job-update",
        }
    }

    /// Whether this event ends the execution's stream.
    pub fn is_terminal(&self) -> bool {
        matches!(&self.transition, Transition::Execution { status, .. } if status.is_terminal())
    }
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Which events a subscriber receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionScope {
    Execution(Uuid),
    Workflow(Uuid),
    All,
}

impl SubscriptionScope {
    fn matches(&self, event: &ProgressEvent) -> bool {
        match self {
            Self::Execution(id) => *id == event.execution_id,
            Self::Workflow(id) => *id == event.workflow_id,
            Self::All => true,
        }
    }
}

pub type SubscriberId = u64;

struct Subscriber {
    scope: SubscriptionScope,
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

#[derive(Default)]
struct Registry {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, Subscriber>,
    sequences: HashMap<Uuid, u64>,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A live, unbounded-duration sequence of progress events.
///
/// Dropping the subscription unsubscribes it and releases its channel.
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<ProgressEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once the broadcaster is gone.
    pub async fn next_event(&mut self) -> Option<ProgressEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`Subscription::next_event`].
    pub fn try_next_event(&mut self) -> Option<ProgressEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = ProgressEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock(&registry).subscribers.remove(&self.id);
        }
    }
}

// ---------------------------------------------------------------------------
// Transports
// ---------------------------------------------------------------------------

/// A push channel (socket layer, message bus, …) that receives every event.
#[async_trait]
pub trait ProgressTransport: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, event_name: &str, event: &ProgressEvent) -> Result<(), TransportError>;
}

// ---------------------------------------------------------------------------
// Broadcaster
// ---------------------------------------------------------------------------

/// Owns the subscriber registry. Each engine gets its own instance; there is
/// no process-wide singleton.
pub struct ProgressBroadcaster {
    registry: Arc<Mutex<Registry>>,
    transport_tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressBroadcaster {
    /// A broadcaster that only serves in-process subscribers.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            transport_tx: None,
        }
    }

    /// A broadcaster that also forwards every event, in order, to
    /// `transports`. Must be called from within a tokio runtime.
    ///
    /// Transport failures are logged and dropped; they never block
    /// publishing.
    pub fn with_transports(transports: Vec<Arc<dyn ProgressTransport>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let name = event.event_name();
                for transport in &transports {
                    if let Err(err) = transport.deliver(name, &event).await {
                        warn!(
                            execution_id = %event.execution_id,
                            sequence = event.sequence,
                            %err,
                            "dropping progress event"
                        );
                    }
                }
            }
        });

        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            transport_tx: Some(tx),
        }
    }

    pub fn subscribe(&self, scope: SubscriptionScope) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        registry.subscribers.insert(id, Subscriber { scope, tx });
        debug!(subscriber = id, ?scope, "progress subscriber attached");

        Subscription {
            id,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Detach a subscriber by id. Dropping the [`Subscription`] does the same.
    pub fn unsubscribe(&self, id: SubscriberId) {
        lock(&self.registry).subscribers.remove(&id);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.registry).subscribers.len()
    }

    /// Stamp `transition` with the execution's next sequence number and
    /// deliver it. Subscribers whose receiver is gone are pruned.
    pub fn publish(
        &self,
        execution_id: Uuid,
        workflow_id: Uuid,
        transition: Transition,
    ) -> ProgressEvent {
        let mut registry = lock(&self.registry);

        let counter = registry.sequences.entry(execution_id).or_insert(0);
        *counter += 1;
        let event = ProgressEvent {
            execution_id,
            workflow_id,
            sequence: *counter,
            timestamp: Utc::now(),
            transition,
        };
        if event.is_terminal() {
            registry.sequences.remove(&execution_id);
        }

        registry.subscribers.retain(|_, subscriber| {
            !subscriber.scope.matches(&event) || subscriber.tx.send(event.clone()).is_ok()
        });
        drop(registry);

        if let Some(tx) = &self.transport_tx {
            if tx.send(event.clone()).is_err() {
                warn!(execution_id = %event.execution_id, "progress transport pump has stopped");
            }
        }

        event
    }
}
