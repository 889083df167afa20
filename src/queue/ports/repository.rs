//! Repository port for job publication, task claiming, and lease management.

use crate::queue::domain::{
    FailureDisposition, Job, JobId, JobSubmission, JobTask, NodeId, QueueDomainError, RetryPolicy,
    ServiceName, TaskId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for queue repository operations.
pub type QueueRepositoryResult<T> = Result<T, QueueRepositoryError>;

/// Validated parameters for one claim-engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimRequest {
    service: ServiceName,
    node: NodeId,
    limit: u32,
    lease_duration: Duration,
}

impl ClaimRequest {
    /// Creates a claim request.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidClaimLimit`] when `limit` is zero.
    pub fn new(
        service: ServiceName,
        node: NodeId,
        limit: u32,
        lease_duration: Duration,
    ) -> Result<Self, QueueDomainError> {
        if limit == 0 {
            return Err(QueueDomainError::InvalidClaimLimit);
        }
        Ok(Self {
            service,
            node,
            limit,
            lease_duration,
        })
    }

    /// Returns the service whose tasks are requested.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the claiming node.
    #[must_use]
    pub const fn node(&self) -> &NodeId {
        &self.node
    }

    /// Returns the maximum batch size.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Returns the lease duration granted on claimed tasks.
    #[must_use]
    pub const fn lease_duration(&self) -> Duration {
        self.lease_duration
    }
}

/// Queue persistence and coordination contract.
///
/// Every mutation is a single transaction against the shared datastore; a
/// failed call leaves no partial claim or partial insert behind.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Inserts a job and all of its tasks atomically, assigning sequence
    /// numbers in submission order from the store's monotonic counter.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::Transient`] when the store rejects the
    /// transaction; nothing is inserted in that case.
    async fn submit_job(&self, submission: &JobSubmission) -> QueueRepositoryResult<Job>;

    /// Claims up to `request.limit()` runnable tasks for the service, in
    /// ascending sequence order.
    ///
    /// Eligible rows are pending tasks whose backoff window has passed plus
    /// claimed/running tasks with expired leases. Rows locked by a concurrent
    /// claim transaction are skipped, not waited on, so fairness is
    /// approximate under overlapping claimers. An empty pool yields
    /// `Ok(vec![])`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::Transient`] on store failure; no
    /// partial claim survives.
    async fn claim_tasks(&self, request: &ClaimRequest) -> QueueRepositoryResult<Vec<JobTask>>;

    /// Extends the lease on a task the node still holds.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::LeaseLost`] when another node has
    /// reclaimed the task since the caller's claim; no mutation is performed
    /// in that case. The executing agent must then abort its in-flight
    /// handler.
    async fn renew_lease(
        &self,
        task_id: TaskId,
        node: &NodeId,
        new_expiry: DateTime<Utc>,
    ) -> QueueRepositoryResult<()>;

    /// Transitions a claimed task to `running`, immediately before handler
    /// invocation.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::LeaseLost`] when the node no longer
    /// holds the task.
    async fn mark_running(&self, task_id: TaskId, node: &NodeId) -> QueueRepositoryResult<()>;

    /// Records handler success and releases the lease.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::LeaseLost`] when the node no longer
    /// holds the task; the terminal state must not be written by a
    /// superseded claimer.
    async fn mark_succeeded(&self, task_id: TaskId, node: &NodeId) -> QueueRepositoryResult<()>;

    /// Records handler failure and applies retry accounting under `policy`:
    /// either back to `pending` with a backoff-delayed next-eligible instant,
    /// or `dead` once attempts are exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::LeaseLost`] when the node no longer
    /// holds the task.
    async fn mark_failed(
        &self,
        task_id: TaskId,
        node: &NodeId,
        detail: &str,
        policy: &RetryPolicy,
    ) -> QueueRepositoryResult<FailureDisposition>;

    /// Finds a job by identifier; `None` when absent.
    async fn find_job(&self, id: JobId) -> QueueRepositoryResult<Option<Job>>;

    /// Finds a task by identifier; `None` when absent.
    async fn find_task(&self, id: TaskId) -> QueueRepositoryResult<Option<JobTask>>;

    /// Returns all tasks of a job in ascending sequence order.
    async fn tasks_for_job(&self, job_id: JobId) -> QueueRepositoryResult<Vec<JobTask>>;

    /// Recomputes aggregate statuses for non-terminal jobs and persists any
    /// change; the builder tick's finalisation pass.
    ///
    /// Returns the number of jobs whose stored status changed.
    async fn finalize_jobs(&self) -> QueueRepositoryResult<u64>;
}

/// Errors returned by queue repository implementations.
#[derive(Debug, Clone, Error)]
pub enum QueueRepositoryError {
    /// The job was not found.
    #[error("job not found: {0}")]
    JobNotFound(JobId),

    /// The task was not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// The caller's lease was superseded by another claimer.
    #[error("lease lost on task {0}")]
    LeaseLost(TaskId),

    /// Datastore-level failure (connectivity, aborted transaction, row
    /// decode). The transaction rolled back wholesale; callers retry with
    /// backoff.
    #[error("transient store error: {0}")]
    Transient(Arc<dyn std::error::Error + Send + Sync>),
}

impl QueueRepositoryError {
    /// Wraps a datastore-level error.
    pub fn transient(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transient(Arc::new(err))
    }
}
