//! Domain model for datastore-coordinated job queueing.
//!
//! The queue domain models job submission, the task claim/lease state
//! machine, and retry/backoff accounting while keeping all infrastructure
//! concerns outside of the domain boundary.

mod error;
mod ids;
mod job;
mod retry;
mod task;

pub use error::{ParseJobStatusError, ParseTaskStatusError, QueueDomainError};
pub use ids::{JobId, NodeId, SequenceNumber, ServiceName, TaskId};
pub use job::{Job, JobStatus, JobSubmission, PersistedJobData};
pub use retry::RetryPolicy;
pub use task::{FailureDisposition, JobTask, PersistedTaskData, TaskSpec, TaskStatus};
