//! Producer service: publishes jobs and finalises completed ones.

use crate::queue::domain::{Job, JobId, JobSubmission, QueueDomainError, TaskSpec};
use crate::queue::ports::{QueueRepository, QueueRepositoryError};
use std::sync::Arc;
use thiserror::Error;

/// Service-level errors for builder operations.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// Submission validation failed.
    #[error(transparent)]
    Domain(#[from] QueueDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] QueueRepositoryError),
}

/// Result type for builder service operations.
pub type BuilderResult<T> = Result<T, BuilderError>;

/// Builder orchestration service.
///
/// The builder is the producer side of the queue: it publishes jobs with
/// their tasks in one atomic transaction and, on each tick, finalises jobs
/// whose tasks have all reached a terminal status.
#[derive(Debug, Clone)]
pub struct BuilderService<R>
where
    R: QueueRepository,
{
    repository: Arc<R>,
}

impl<R> BuilderService<R>
where
    R: QueueRepository,
{
    /// Creates a new builder service.
    #[must_use]
    pub const fn new(repository: Arc<R>) -> Self {
        Self { repository }
    }

    /// Publishes a job and its tasks as runnable.
    ///
    /// All rows are inserted in one transaction; sequence numbers follow
    /// submission order.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Repository`] when the store rejects the
    /// transaction; no partial job is left behind.
    pub async fn submit_job(&self, submission: &JobSubmission) -> BuilderResult<Job> {
        let job = self.repository.submit_job(submission).await?;
        tracing::info!(
            job_id = %job.id(),
            tasks = submission.tasks().len(),
            "job submitted"
        );
        Ok(job)
    }

    /// Convenience wrapper validating raw specs into a submission first.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Domain`] when the task list is empty.
    pub async fn submit_tasks(&self, tasks: Vec<TaskSpec>) -> BuilderResult<Job> {
        let submission = JobSubmission::new(tasks)?;
        self.submit_job(&submission).await
    }

    /// Executes one builder cycle: finalise jobs whose tasks are all
    /// terminal, promoting aggregate statuses.
    ///
    /// Returns the number of jobs whose stored status changed. Emits a
    /// single summary event per cycle.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Repository`] on store failure.
    pub async fn tick(&self) -> BuilderResult<u64> {
        let finalized = self.repository.finalize_jobs().await?;
        tracing::info!(finalized, "builder tick");
        Ok(finalized)
    }

    /// Looks up a job with its stored aggregate status.
    ///
    /// # Errors
    ///
    /// Returns [`BuilderError::Repository`] when the job does not exist or
    /// the store fails.
    pub async fn job_status(&self, id: JobId) -> BuilderResult<Job> {
        self.repository
            .find_job(id)
            .await?
            .ok_or(BuilderError::Repository(QueueRepositoryError::JobNotFound(
                id,
            )))
    }
}
