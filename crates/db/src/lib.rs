//! `db` crate: the persistence collaborator.
//!
//! Provides typed records, async repository traits for workflows,
//! executions and steps, and an in-process [`MemoryStore`]. No engine logic
//! lives here; the only rule enforced is that terminal executions are frozen.

pub mod error;
pub mod memory;
pub mod models;
pub mod repository;

pub use error::DbError;
pub use memory::MemoryStore;
pub use repository::{ExecutionRepository, WorkflowRepository};
