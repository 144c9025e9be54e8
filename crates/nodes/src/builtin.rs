//! Built-in node capabilities shipped with the engine.
//!
//! Real deployments register their own capabilities (HTTP calls, LLM
//! prompts, knowledge-base queries); these cover the plumbing cases.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{
    traits::ExecutionContext, ExecutableNode, NodeError, NodeInputs, NodePolicy, NodeRegistry,
};

/// Returns its inputs unchanged.
pub struct Passthrough;

#[async_trait]
impl ExecutableNode for Passthrough {
    async fn execute(
        &self,
        _config: &Value,
        inputs: NodeInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        Ok(Value::Object(inputs))
    }
}

/// Merges `config.values` over its inputs.
pub struct SetValues;

#[async_trait]
impl ExecutableNode for SetValues {
    async fn execute(
        &self,
        config: &Value,
        mut inputs: NodeInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        match config.get("values") {
            Some(Value::Object(values)) => {
                for (key, value) in values {
                    inputs.insert(key.clone(), value.clone());
                }
                Ok(Value::Object(inputs))
            }
            Some(_) => Err(NodeError::Fatal("`values` must be an object".into())),
            None => Ok(Value::Object(inputs)),
        }
    }
}

/// Sleeps for `config.ms` milliseconds, then passes its inputs through.
pub struct Delay;

#[async_trait]
impl ExecutableNode for Delay {
    async fn execute(
        &self,
        config: &Value,
        inputs: NodeInputs,
        ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let ms = config.get("ms").and_then(Value::as_u64).unwrap_or(0);
        debug!(node_id = %ctx.node_id, ms, "delay node sleeping");

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(Value::Object(inputs)),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

/// Always fails with `config.message`; `config.retryable` selects the kind.
pub struct Fail;

#[async_trait]
impl ExecutableNode for Fail {
    async fn execute(
        &self,
        config: &Value,
        _inputs: NodeInputs,
        _ctx: &ExecutionContext,
    ) -> Result<Value, NodeError> {
        let message = config
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("failed by configuration")
            .to_owned();

        if config.get("retryable").and_then(Value::as_bool).unwrap_or(false) {
            Err(NodeError::Retryable(message))
        } else {
            Err(NodeError::Fatal(message))
        }
    }
}

/// A registry pre-populated with every built-in capability.
pub fn builtin_registry() -> NodeRegistry {
    NodeRegistry::new()
        .with("passthrough", Arc::new(Passthrough), NodePolicy::default())
        .with("set", Arc::new(SetValues), NodePolicy::default())
        .with("delay", Arc::new(Delay), NodePolicy::default())
        .with("fail", Arc::new(Fail), NodePolicy::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    fn ctx() -> ExecutionContext {
        ExecutionContext {
            workflow_id: Uuid::new_v4(),
            execution_id: Uuid::new_v4(),
            node_id: "n".into(),
            trigger_data: Value::Null,
            attempt: 0,
            cancellation: CancellationToken::new(),
        }
    }

    fn inputs(value: Value) -> NodeInputs {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn set_overrides_inputs() {
        let out = SetValues
            .execute(
                &json!({ "values": { "b": 2, "a": "new" } }),
                inputs(json!({ "a": "old" })),
                &ctx(),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({ "a": "new", "b": 2 }));
    }

    #[tokio::test]
    async fn set_rejects_non_object_values() {
        let result = SetValues.execute(&json!({ "values": 3 }), NodeInputs::new(), &ctx()).await;
        assert!(matches!(result, Err(NodeError::Fatal(_))));
    }

    #[tokio::test]
    async fn fail_honours_retryable_flag() {
        let retryable = Fail
            .execute(&json!({ "retryable": true, "message": "later" }), NodeInputs::new(), &ctx())
            .await;
        assert_eq!(retryable, Err(NodeError::Retryable("later".into())));

        let fatal = Fail.execute(&Value::Null, NodeInputs::new(), &ctx()).await;
        assert!(matches!(fatal, Err(NodeError::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_stops_on_cancellation() {
        let ctx = ctx();
        ctx.cancellation.cancel();
        let result = Delay.execute(&json!({ "ms": 60_000 }), NodeInputs::new(), &ctx).await;
        assert_eq!(result, Err(NodeError::Cancelled));
    }

    #[test]
    fn builtin_registry_lists_all_types() {
        assert_eq!(
            builtin_registry().node_types(),
            vec!["delay", "fail", "passthrough", "set"]
        );
    }
}
