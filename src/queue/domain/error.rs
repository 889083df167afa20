//! Error types for queue domain validation and parsing.

use super::{TaskId, TaskStatus};
use thiserror::Error;

/// Errors returned while constructing or mutating domain queue values.
///
/// These are the never-retried validation failures: malformed input is
/// surfaced to the caller immediately rather than entering the retry path.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueueDomainError {
    /// The service name is empty or too long for the schema.
    #[error("invalid service name '{0}', expected a non-empty string")]
    InvalidServiceName(String),

    /// The node identifier is empty or too long for the schema.
    #[error("invalid node identifier '{0}', expected a non-empty string")]
    InvalidNodeId(String),

    /// A job submission carried no tasks.
    #[error("job submission must contain at least one task")]
    EmptyTaskList,

    /// The claim batch limit is zero.
    #[error("claim limit must be positive")]
    InvalidClaimLimit,

    /// The requested status transition is not permitted by the state machine.
    #[error("invalid task status transition for {task_id}: {from} -> {to}")]
    InvalidStatusTransition {
        /// Task whose transition was rejected.
        task_id: TaskId,
        /// Status the task currently holds.
        from: TaskStatus,
        /// Status the caller attempted to move to.
        to: TaskStatus,
    },

    /// The task is not eligible for claiming at the given instant.
    #[error("task {task_id} is not claimable in status {status}")]
    NotClaimable {
        /// Task that was not claimable.
        task_id: TaskId,
        /// Status the task currently holds.
        status: TaskStatus,
    },
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing job statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown job status: {0}")]
pub struct ParseJobStatusError(pub String);
