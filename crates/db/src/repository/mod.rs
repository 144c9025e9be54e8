//! Repository traits: one method per persistence operation.
//!
//! Every method returns a `Result<T, DbError>`. No business logic lives
//! behind these traits beyond the terminal-execution guard.

pub mod executions;
pub mod workflows;

pub use executions::ExecutionRepository;
pub use workflows::WorkflowRepository;
