//! `nodes` crate: the `ExecutableNode` trait, the node registry, and
//! built-in node implementations.
//!
//! Every capability, built-in or external, must implement [`ExecutableNode`].
//! The engine crate dispatches execution through this trait object, keyed by
//! the node's declared type in a [`NodeRegistry`].

pub mod builtin;
pub mod error;
pub mod mock;
pub mod policy;
pub mod registry;
pub mod traits;

pub use builtin::builtin_registry;
pub use error::NodeError;
pub use policy::{Backoff, NodePolicy};
pub use registry::{NodeRegistry, RegisteredNode};
pub use traits::{ExecutableNode, ExecutionContext, NodeInputs};
