//! Typed error type for the db crate.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("row not found")]
    NotFound,

    /// The execution already reached a terminal status and is frozen.
    #[error("execution {0} is terminal and cannot be modified")]
    ExecutionTerminated(Uuid),

    /// A row with the same primary key already exists.
    #[error("duplicate key: {0}")]
    Conflict(Uuid),
}
