//! `engine` crate: graph model, validation, the execution engine, trigger
//! dispatch, and progress broadcasting.

pub mod config;
pub mod dag;
pub mod error;
pub mod executor;
pub mod models;
pub mod outputs;
pub mod progress;
pub mod trigger;

pub use config::EngineConfig;
pub use dag::{validate, ValidatedWorkflow};
pub use error::{EngineError, TransportError, TriggerError, ValidationError};
pub use executor::ExecutionEngine;
pub use models::{Edge, Node, UpstreamFailure, Viewport, WorkflowDefinition, WorkflowExecution};
pub use outputs::{assemble_inputs, NodeOutputs};
pub use progress::{
    ProgressBroadcaster, ProgressEvent, ProgressTransport, SubscriberId, Subscription,
    SubscriptionScope, Transition,
};
pub use trigger::TriggerDispatcher;
