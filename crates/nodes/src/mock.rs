//! `MockNode`: a test double for `ExecutableNode`.
//!
//! Useful in unit and integration tests where a real capability is either
//! unavailable or irrelevant.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{traits::ExecutionContext, ExecutableNode, NodeError, NodeInputs};

/// Behaviour injected into `MockNode` at construction time.
pub enum MockBehaviour {
    /// Return `{"node": name}` merged with a specific JSON object.
    ReturnValue(Value),
    /// Return the assembled inputs unchanged.
    EchoInputs,
    /// Fail with a `Retryable` error.
    FailRetryable(String),
    /// Fail with a `Fatal` error.
    FailFatal(String),
    /// Fail with a `Retryable` error for the first `n` calls, then succeed.
    FlakyThenReturn { failures: usize, value: Value },
    /// Sleep, then return. A cooperative delay stops early on cancellation.
    Delay {
        duration: Duration,
        value: Value,
        cooperative: bool,
    },
}

/// A mock node that records every call it receives and returns a
/// programmer-specified result.
pub struct MockNode {
    /// Label used in test assertions.
    pub name: String,
    /// What the node will do when `execute` is called.
    pub behaviour: MockBehaviour,
    /// All inputs seen by this node (in call order).
    pub calls: Arc<Mutex<Vec<NodeInputs>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl MockNode {
    fn with_behaviour(name: impl Into<String>, behaviour: MockBehaviour) -> Self {
        Self {
            name: name.into(),
            behaviour,
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Create a mock that always succeeds with the given value.
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::ReturnValue(value))
    }

    /// Create a mock that hands its inputs straight back.
    pub fn echo(name: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::EchoInputs)
    }

    /// Create a mock that always fails with a `Fatal` error.
    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailFatal(msg.into()))
    }

    /// Create a mock that always fails with a `Retryable` error.
    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::with_behaviour(name, MockBehaviour::FailRetryable(msg.into()))
    }

    /// Create a mock that fails `failures` times before succeeding.
    pub fn flaky(name: impl Into<String>, failures: usize, value: Value) -> Self {
        Self::with_behaviour(name, MockBehaviour::FlakyThenReturn { failures, value })
    }

    /// Create a mock that sleeps for `duration` regardless of cancellation.
    pub fn delayed(name: impl Into<String>, duration: Duration, value: Value) -> Self {
        Self::with_behaviour(
            name,
            MockBehaviour::Delay {
                duration,
                value,
                cooperative: false,
            },
        )
    }

    /// Create a mock that sleeps for `duration` but honours cancellation.
    pub fn cooperative_delay(name: impl Into<String>, duration: Duration, value: Value) -> Self {
        Self::with_behaviour(
            name,
            MockBehaviour::Delay {
                duration,
                value,
                cooperative: true,
            },
        )
    }

    /// Number of times this node has been executed.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Inputs received on the `n`th call.
    pub fn inputs_of_call(&self, n: usize) -> Option<NodeInputs> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(n)
            .cloned()
    }

    /// Highest number of simultaneous `execute` calls observed.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn output(&self, value: &Value) -> Value {
        // Tag the output with the node name so tests can trace the data
        // flowing through the graph.
        let mut out = json!({ "node": self.name });
        if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), value.as_object()) {
            for (k, val) in v_obj {
                out_obj.insert(k.clone(), val.clone());
            }
        }
        out
    }
}

#[async_trait]
impl ExecutableNode for MockNode {
    async fn execute(
        &self,
        _config: &Value,
        inputs: NodeInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
            calls.push(inputs.clone());
            calls.len() - 1
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match &self.behaviour {
            MockBehaviour::ReturnValue(v) => Ok(self.output(v)),
            MockBehaviour::EchoInputs => Ok(Value::Object(inputs)),
            MockBehaviour::FailRetryable(msg) => Err(NodeError::Retryable(msg.clone())),
            MockBehaviour::FailFatal(msg) => Err(NodeError::Fatal(msg.clone())),
            MockBehaviour::FlakyThenReturn { failures, value } => {
                if call_index < *failures {
                    Err(NodeError::Retryable(format!(
                        "{} transient failure #{}",
                        self.name,
                        call_index + 1
                    )))
                } else {
                    Ok(self.output(value))
                }
            }
            MockBehaviour::Delay {
                duration,
                value,
                cooperative,
            } => {
                if *cooperative {
                    tokio::select! {
                        _ = tokio::time::sleep(*duration) => Ok(self.output(value)),
                        _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
                    }
                } else {
                    tokio::time::sleep(*duration).await;
                    Ok(self.output(value))
                }
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
