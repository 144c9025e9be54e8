//! Workflow execution engine.
//!
//! `ExecutionEngine` is the central orchestrator:
//! 1. Pins a definition version, validates it and creates a `pending`
//!    execution.
//! 2. Hands the run to a driver task that owns all of the run's mutable
//!    state (steps, outputs, ready queue).
//! 3. The driver starts every node whose predecessors have settled, up to
//!    the concurrency cap, and records each transition through the store
//!    before broadcasting it.
//! 4. Retryable failures (including per-node timeouts) are retried with
//!    backoff; anything else fails the step and skips its dependents unless
//!    they opt into `always_run`.
//! 5. The execution ends `completed` when every step completed or was
//!    skipped, otherwise `failed`. Cancellation and the execution timeout end
//!    it `cancelled`.
//!
//! Terminal executions are frozen by the store: once one of them is
//! recorded, every later write from the driver is rejected and the driver
//! stops without emitting anything further.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn, Instrument};
use uuid::Uuid;

use db::models::{
    ExecutionStatus, ExecutionStepRow, StepStatus, WorkflowExecutionRow, WorkflowRow,
};
use db::{DbError, ExecutionRepository};
use nodes::{ExecutableNode, ExecutionContext, NodeError, NodeInputs, NodeRegistry};

use crate::config::EngineConfig;
use crate::dag::{self, ValidatedWorkflow};
use crate::models::{UpstreamFailure, WorkflowDefinition, WorkflowExecution};
use crate::outputs::{assemble_inputs, NodeOutputs};
use crate::progress::{ProgressBroadcaster, SubscriptionScope, Transition};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Active runs
// ---------------------------------------------------------------------------

/// Handle shared between the driver of a live execution and `cancel`.
#[derive(Default)]
struct ActiveRun {
    cancellation: CancellationToken,
    /// Held across "write to store, then publish" so events leave in the
    /// same order their writes were accepted.
    transitions: tokio::sync::Mutex<()>,
}

type ActiveRuns = Arc<Mutex<HashMap<Uuid, Arc<ActiveRun>>>>;

fn lock(runs: &Mutex<HashMap<Uuid, Arc<ActiveRun>>>) -> MutexGuard<'_, HashMap<Uuid, Arc<ActiveRun>>> {
    runs.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ExecutionEngine
// ---------------------------------------------------------------------------

/// Runs workflow executions in the background and answers status and
/// cancellation requests for them.
///
/// Construct one engine per process; it is cheap to share behind an `Arc`.
pub struct ExecutionEngine {
    registry: NodeRegistry,
    store: Arc<dyn ExecutionRepository>,
    broadcaster: Arc<ProgressBroadcaster>,
    config: EngineConfig,
    active: ActiveRuns,
}

impl ExecutionEngine {
    pub fn new(
        registry: NodeRegistry,
        store: Arc<dyn ExecutionRepository>,
        broadcaster: Arc<ProgressBroadcaster>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            store,
            broadcaster,
            config,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Arc<ProgressBroadcaster> {
        &self.broadcaster
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate `definition` against this engine's registry.
    pub fn validate(&self, definition: &WorkflowDefinition) -> Result<ValidatedWorkflow, EngineError> {
        dag::validate(definition, &self.registry).map_err(EngineError::Validation)
    }

    /// Number of executions whose driver is still running.
    pub fn active_count(&self) -> usize {
        lock(&self.active).len()
    }

    /// Start an execution of `workflow` pinned to definition `version`.
    ///
    /// Returns as soon as the `pending` execution is recorded; the nodes run
    /// in a background task.
    ///
    /// # Errors
    /// - [`EngineError::VersionNotFound`] if the version does not exist.
    /// - [`EngineError::InvalidDefinition`] / [`EngineError::Validation`] if
    ///   the definition cannot run. No execution is created in that case.
    #[instrument(skip(self, workflow, trigger_data), fields(workflow_id = %workflow.id))]
    pub async fn start(
        &self,
        workflow: &WorkflowRow,
        version: u32,
        trigger_data: Value,
    ) -> Result<Uuid, EngineError> {
        let stored = workflow
            .definition(version)
            .ok_or(EngineError::VersionNotFound {
                workflow_id: workflow.id,
                version,
            })?;
        let definition: WorkflowDefinition = serde_json::from_value(stored.definition.clone())?;
        let plan = self.validate(&definition)?;

        let execution = WorkflowExecutionRow::pending(workflow.id, version, trigger_data);
        self.store.create_execution(&execution).await?;
        self.broadcaster.publish(
            execution.id,
            execution.workflow_id,
            Transition::for_execution(&execution),
        );

        let run = Arc::new(ActiveRun::default());
        lock(&self.active).insert(execution.id, Arc::clone(&run));

        info!(
            execution_id = %execution.id,
            version,
            nodes = plan.order().len(),
            layers = plan.layers().len(),
            "execution started"
        );

        let execution_id = execution.id;
        let driver = Driver::new(self, plan, execution, run);
        let span = tracing::info_span!("execution", %execution_id);
        tokio::spawn(driver.drive().instrument(span));

        Ok(execution_id)
    }

    /// Cancel a non-terminal execution.
    ///
    /// The `cancelled` status is recorded and broadcast before running
    /// nodes are signalled; whatever they return afterwards is discarded.
    /// Steps keep the last state recorded for them.
    ///
    /// # Errors
    /// [`EngineError::AlreadyTerminal`] if the execution already finished.
    #[instrument(skip(self))]
    pub async fn cancel(&self, execution_id: Uuid) -> Result<(), EngineError> {
        let run = lock(&self.active).get(&execution_id).cloned();
        let guard = match &run {
            Some(run) => Some(run.transitions.lock().await),
            None => None,
        };

        let mut execution = self.load_execution(execution_id).await?;
        if execution.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(execution_id));
        }

        execution.finish(ExecutionStatus::Cancelled, None);
        self.store
            .update_execution(&execution)
            .await
            .map_err(|err| match err {
                DbError::ExecutionTerminated(id) => EngineError::AlreadyTerminal(id),
                other => other.into(),
            })?;
        self.broadcaster.publish(
            execution.id,
            execution.workflow_id,
            Transition::for_execution(&execution),
        );
        drop(guard);

        if let Some(run) = run {
            run.cancellation.cancel();
        }
        info!("execution cancelled");
        Ok(())
    }

    /// Current execution record plus all of its steps.
    pub async fn get_status(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        let execution = self.load_execution(execution_id).await?;
        let steps = self.store.list_steps(execution_id).await?;
        Ok(WorkflowExecution { execution, steps })
    }

    /// Wait until the execution is terminal and return its final state.
    pub async fn wait(&self, execution_id: Uuid) -> Result<WorkflowExecution, EngineError> {
        // Subscribe before reading so the terminal event cannot slip between.
        let mut events = self
            .broadcaster
            .subscribe(SubscriptionScope::Execution(execution_id));

        loop {
            let status = self.get_status(execution_id).await?;
            if status.execution.status.is_terminal() {
                return Ok(status);
            }
            loop {
                match events.next_event().await {
                    Some(event) if event.is_terminal() => break,
                    Some(_) => continue,
                    None => return self.get_status(execution_id).await,
                }
            }
        }
    }

    async fn load_execution(&self, execution_id: Uuid) -> Result<WorkflowExecutionRow, EngineError> {
        self.store
            .get_execution(execution_id)
            .await
            .map_err(|err| match err {
                DbError::NotFound => EngineError::ExecutionNotFound(execution_id),
                other => other.into(),
            })
    }
}

/// Overall status once no step is pending or running. `None` while any is.
pub(crate) fn aggregate_status<I>(statuses: I) -> Option<ExecutionStatus>
where
    I: IntoIterator<Item = StepStatus>,
{
    let mut failed = false;
    for status in statuses {
        match status {
            StepStatus::Pending | StepStatus::Running => return None,
            StepStatus::Failed => failed = true,
            StepStatus::Completed | StepStatus::Skipped => {}
        }
    }
    Some(if failed {
        ExecutionStatus::Failed
    } else {
        ExecutionStatus::Completed
    })
}

// ---------------------------------------------------------------------------
// Recorder: store write, then broadcast
// ---------------------------------------------------------------------------

struct Recorder {
    store: Arc<dyn ExecutionRepository>,
    broadcaster: Arc<ProgressBroadcaster>,
    run: Arc<ActiveRun>,
    workflow_id: Uuid,
}

impl Recorder {
    async fn insert_step(&self, step: &ExecutionStepRow) -> Result<(), DbError> {
        let _order = self.run.transitions.lock().await;
        self.store.insert_step(step).await?;
        self.broadcaster
            .publish(step.execution_id, self.workflow_id, Transition::for_step(step));
        Ok(())
    }

    async fn update_step(&self, step: &ExecutionStepRow, announce: bool) -> Result<(), DbError> {
        let _order = self.run.transitions.lock().await;
        self.store.update_step(step).await?;
        if announce {
            self.broadcaster
                .publish(step.execution_id, self.workflow_id, Transition::for_step(step));
        }
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecutionRow) -> Result<(), DbError> {
        let _order = self.run.transitions.lock().await;
        self.store.update_execution(execution).await?;
        self.broadcaster.publish(
            execution.id,
            execution.workflow_id,
            Transition::for_execution(execution),
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Driver: one task per execution
// ---------------------------------------------------------------------------

struct AttemptDone {
    node_id: String,
    result: Result<Value, NodeError>,
}

struct Driver {
    plan: Arc<ValidatedWorkflow>,
    registry: NodeRegistry,
    recorder: Recorder,
    execution: WorkflowExecutionRow,
    steps: HashMap<String, ExecutionStepRow>,
    outputs: NodeOutputs,
    /// node ID → predecessors that have not settled yet.
    waiting: HashMap<String, usize>,
    /// Ranks of nodes whose step is pending and waiting for a slot.
    ready: BinaryHeap<Reverse<usize>>,
    attempts: JoinSet<AttemptDone>,
    /// Attempt task ID → node ID, so a task that dies can be attributed.
    tasks: HashMap<task::Id, String>,
    first_failure: Option<(String, NodeError)>,
    limit: usize,
    timeout: Option<Duration>,
    cancellation: CancellationToken,
    active: ActiveRuns,
}

impl Driver {
    fn new(
        engine: &ExecutionEngine,
        plan: ValidatedWorkflow,
        execution: WorkflowExecutionRow,
        run: Arc<ActiveRun>,
    ) -> Self {
        let waiting = plan
            .order()
            .iter()
            .map(|id| (id.clone(), plan.predecessors(id).len()))
            .collect();

        Self {
            registry: engine.registry.clone(),
            recorder: Recorder {
                store: Arc::clone(&engine.store),
                broadcaster: Arc::clone(&engine.broadcaster),
                run: Arc::clone(&run),
                workflow_id: execution.workflow_id,
            },
            plan: Arc::new(plan),
            execution,
            steps: HashMap::new(),
            outputs: NodeOutputs::new(),
            waiting,
            ready: BinaryHeap::new(),
            attempts: JoinSet::new(),
            tasks: HashMap::new(),
            first_failure: None,
            limit: engine.config.concurrency_limit(),
            timeout: engine.config.execution_timeout,
            cancellation: run.cancellation.clone(),
            active: Arc::clone(&engine.active),
        }
    }

    async fn drive(mut self) {
        match self.run().await {
            Ok(()) => {}
            Err(DbError::ExecutionTerminated(_)) => {
                debug!("execution reached a terminal state elsewhere; driver stopping");
            }
            Err(err) => {
                error!(%err, "failed to record execution progress");
                self.cancellation.cancel();
                self.execution
                    .finish(ExecutionStatus::Failed, Some(format!("failed to record progress: {err}")));
                if let Err(err) = self.recorder.update_execution(&self.execution).await {
                    warn!(%err, "could not mark execution failed");
                }
            }
        }

        // Late results from nodes that ignore cancellation are discarded.
        self.attempts.detach_all();
        lock(&self.active).remove(&self.execution.id);
    }

    async fn run(&mut self) -> Result<(), DbError> {
        self.execution.status = ExecutionStatus::Running;
        self.recorder.update_execution(&self.execution).await?;

        let plan = Arc::clone(&self.plan);
        for entry in plan.entries() {
            self.admit(entry).await?;
        }

        let deadline = self.timeout.map(|limit| Instant::now() + limit);
        let cancellation = self.cancellation.clone();

        loop {
            self.dispatch().await?;
            if self.attempts.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    debug!("execution cancelled; abandoning running nodes");
                    return Ok(());
                }
                _ = sleep_until(deadline) => {
                    return self.time_out().await;
                }
                Some(joined) = self.attempts.join_next_with_id() => {
                    if let Some(done) = self.attempt_outcome(joined) {
                        self.on_attempt_done(done).await?;
                    }
                }
            }
        }

        self.finish().await
    }

    /// Create the pending step for a node whose predecessors have all
    /// settled. Returns `true` if the node was skipped on the spot.
    async fn admit(&mut self, node_id: &str) -> Result<bool, DbError> {
        let plan = Arc::clone(&self.plan);
        let (Some(node), Some(rank)) = (plan.node(node_id), plan.rank(node_id)) else {
            return Ok(false);
        };
        if self.steps.contains_key(node_id) {
            warn!(node_id, "node already has a step; not admitting it again");
            return Ok(false);
        }

        let mut step = ExecutionStepRow::pending(self.execution.id, node_id, &node.node_type);
        self.recorder.insert_step(&step).await?;

        let upstream_failed = plan.predecessors(node_id).iter().any(|id| {
            self.steps
                .get(*id)
                .is_some_and(|s| matches!(s.status, StepStatus::Failed | StepStatus::Skipped))
        });

        let skipped = upstream_failed && node.on_upstream_failure == UpstreamFailure::Skip;
        if skipped {
            debug!(node_id, "skipping node after upstream failure");
            step.status = StepStatus::Skipped;
            step.finished_at = Some(Utc::now());
            self.recorder.update_step(&step, true).await?;
        } else {
            self.ready.push(Reverse(rank));
        }

        self.steps.insert(node_id.to_owned(), step);
        Ok(skipped)
    }

    /// Start ready nodes while there is spare capacity.
    async fn dispatch(&mut self) -> Result<(), DbError> {
        while self.attempts.len() < self.limit {
            let Some(Reverse(rank)) = self.ready.pop() else {
                break;
            };
            let Some(node_id) = self.plan.order().get(rank).cloned() else {
                continue;
            };

            let inputs = assemble_inputs(
                &self.plan,
                &node_id,
                &self.outputs,
                &self.execution.trigger_data,
            );
            if let Some(step) = self.steps.get_mut(&node_id) {
                step.status = StepStatus::Running;
                step.started_at = Some(Utc::now());
                step.input_data = Some(Value::Object(inputs.clone()));
                self.recorder.update_step(step, true).await?;
            }

            self.spawn_attempt(node_id, inputs, 0, Duration::ZERO);
        }
        Ok(())
    }

    fn spawn_attempt(&mut self, node_id: String, inputs: NodeInputs, attempt: u32, delay: Duration) {
        let ctx = ExecutionContext {
            workflow_id: self.execution.workflow_id,
            execution_id: self.execution.id,
            node_id: node_id.clone(),
            trigger_data: self.execution.trigger_data.clone(),
            attempt,
            cancellation: self.cancellation.clone(),
        };

        let node = self.plan.node(&node_id);
        let registered = node.and_then(|n| self.registry.get(&n.node_type)).cloned();
        let config = node.map(|n| n.config.clone()).unwrap_or_default();

        let task_node_id = node_id.clone();
        let handle = self.attempts.spawn(async move {
            let result = match registered {
                Some(registered) => {
                    run_attempt(
                        registered.node,
                        config,
                        inputs,
                        ctx,
                        delay,
                        registered.policy.timeout,
                    )
                    .await
                }
                None => Err(NodeError::Fatal("no capability registered for node type".into())),
            };
            AttemptDone { node_id, result }
        });
        self.tasks.insert(handle.id(), task_node_id);
    }

    /// Map a joined attempt task back to its node. A task that panicked or
    /// was aborted becomes a fatal failure of the node it was running.
    fn attempt_outcome(
        &mut self,
        joined: Result<(task::Id, AttemptDone), JoinError>,
    ) -> Option<AttemptDone> {
        match joined {
            Ok((id, done)) => {
                self.tasks.remove(&id);
                Some(done)
            }
            Err(err) => {
                let Some(node_id) = self.tasks.remove(&err.id()) else {
                    warn!(%err, "untracked attempt task ended abnormally");
                    return None;
                };
                let reason = if err.is_panic() {
                    "node panicked"
                } else {
                    "node attempt was aborted"
                };
                warn!(node_id = %node_id, %err, "{reason}");
                Some(AttemptDone {
                    node_id,
                    result: Err(NodeError::Fatal(reason.into())),
                })
            }
        }
    }

    async fn on_attempt_done(&mut self, done: AttemptDone) -> Result<(), DbError> {
        let AttemptDone { node_id, result } = done;
        let policy = self
            .plan
            .node(&node_id)
            .and_then(|n| self.registry.get(&n.node_type))
            .map(|r| r.policy.clone())
            .unwrap_or_default();

        let Some(step) = self.steps.get_mut(&node_id) else {
            return Ok(());
        };

        match result {
            Ok(output) => {
                if !self.outputs.record(&node_id, output.clone()) {
                    debug!(node_id = %node_id, "ignoring repeated output");
                    return Ok(());
                }
                info!(node_id = %node_id, "node completed");
                step.status = StepStatus::Completed;
                step.output_data = Some(output);
                step.error = None;
                step.finished_at = Some(Utc::now());
                self.recorder.update_step(step, true).await?;
            }

            Err(err) if err.is_retryable() && step.retry_count < policy.max_retries => {
                step.retry_count += 1;
                step.error = Some(err.to_string());
                let delay = policy.backoff.delay_for(step.retry_count);
                warn!(
                    node_id = %node_id,
                    retry = step.retry_count,
                    max_retries = policy.max_retries,
                    ?delay,
                    %err,
                    "retrying node"
                );
                self.recorder.update_step(step, false).await?;

                let inputs = match step.input_data.clone() {
                    Some(Value::Object(inputs)) => inputs,
                    _ => NodeInputs::new(),
                };
                let attempt = step.retry_count;
                self.spawn_attempt(node_id, inputs, attempt, delay);
                return Ok(());
            }

            Err(err) => {
                error!(node_id = %node_id, retries = step.retry_count, %err, "node failed");
                step.status = StepStatus::Failed;
                step.error = Some(err.to_string());
                step.finished_at = Some(Utc::now());
                self.recorder.update_step(step, true).await?;
                self.first_failure.get_or_insert((node_id.clone(), err));
            }
        }

        self.settle(node_id).await
    }

    /// Release the dependents of a node that just reached a terminal step
    /// status, cascading through any that get skipped.
    async fn settle(&mut self, node_id: String) -> Result<(), DbError> {
        let plan = Arc::clone(&self.plan);
        let mut settled = vec![node_id];

        while let Some(done) = settled.pop() {
            for next in plan.successors(&done) {
                let Some(left) = self.waiting.get_mut(next) else {
                    continue;
                };
                *left = left.saturating_sub(1);
                if *left == 0 && self.admit(next).await? {
                    settled.push(next.clone());
                }
            }
        }
        Ok(())
    }

    async fn finish(&mut self) -> Result<(), DbError> {
        let status = aggregate_status(self.steps.values().map(|s| s.status)).unwrap_or_else(|| {
            error!("execution stalled with unfinished steps");
            ExecutionStatus::Failed
        });
        let error = match (&self.first_failure, status) {
            (Some((node_id, err)), _) => Some(format!("node '{node_id}' failed: {err}")),
            (None, ExecutionStatus::Failed) => Some("execution stalled with unfinished steps".into()),
            (None, _) => None,
        };

        self.execution.finish(status, error);
        self.recorder.update_execution(&self.execution).await?;
        info!(
            %status,
            duration_ms = self.execution.duration_ms,
            steps = self.steps.len(),
            "execution finished"
        );
        Ok(())
    }

    /// The execution timeout elapsed: fail unfinished steps, then cancel.
    async fn time_out(&mut self) -> Result<(), DbError> {
        self.cancellation.cancel();
        let limit = self.timeout.unwrap_or_default();
        let message = format!("execution timed out after {limit:?}");
        warn!(?limit, "execution timed out");

        let mut unfinished: Vec<&String> = self
            .steps
            .iter()
            .filter(|(_, step)| !step.status.is_terminal())
            .map(|(id, _)| id)
            .collect();
        unfinished.sort_by_key(|id| self.plan.rank(id));
        let unfinished: Vec<String> = unfinished.into_iter().cloned().collect();

        for node_id in unfinished {
            if let Some(step) = self.steps.get_mut(&node_id) {
                step.status = StepStatus::Failed;
                step.error = Some(message.clone());
                step.finished_at = Some(Utc::now());
                self.recorder.update_step(step, true).await?;
            }
        }

        self.execution.finish(ExecutionStatus::Cancelled, Some(message));
        self.recorder.update_execution(&self.execution).await
    }
}

/// One attempt of one node: optional backoff, then the capability call,
/// bounded by the node's timeout.
async fn run_attempt(
    node: Arc<dyn ExecutableNode>,
    config: Value,
    inputs: NodeInputs,
    ctx: ExecutionContext,
    delay: Duration,
    timeout: Option<Duration>,
) -> Result<Value, NodeError> {
    if !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        }
    }

    let call = node.execute(&config, inputs, &ctx);
    match timeout {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(NodeError::Timeout(limit))),
        None => call.await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
