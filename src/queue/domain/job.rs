//! Job aggregate root and submission types.

use super::{JobId, ParseJobStatusError, QueueDomainError, TaskSpec, TaskStatus};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Aggregate job status, derived from the statuses of its tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No task has started yet.
    Pending,
    /// At least one task has started and none is permanently failed.
    Running,
    /// Every task succeeded.
    Succeeded,
    /// At least one task exhausted its retries.
    Failed,
}

impl JobStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }

    /// Returns whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Derives the aggregate status from task statuses.
    ///
    /// `failed` if any task is dead, `succeeded` only when every task
    /// succeeded, `pending` while nothing has started, `running` otherwise.
    /// An empty iterator derives `pending`; submission validation prevents
    /// jobs without tasks from existing in the first place.
    #[must_use]
    pub fn derive(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut saw_any = false;
        let mut all_succeeded = true;
        let mut any_started = false;
        for status in statuses {
            saw_any = true;
            if status == TaskStatus::Dead {
                return Self::Failed;
            }
            if status != TaskStatus::Succeeded {
                all_succeeded = false;
            }
            if status != TaskStatus::Pending {
                any_started = true;
            }
        }
        if saw_any && all_succeeded {
            Self::Succeeded
        } else if any_started {
            Self::Running
        } else {
            Self::Pending
        }
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = ParseJobStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            _ => Err(ParseJobStatusError(value.to_owned())),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated request payload for publishing a job with its tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSubmission {
    metadata: Option<Value>,
    tasks: Vec<TaskSpec>,
}

impl JobSubmission {
    /// Creates a submission from an ordered task list.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::EmptyTaskList`] when no tasks are given.
    pub fn new(tasks: Vec<TaskSpec>) -> Result<Self, QueueDomainError> {
        if tasks.is_empty() {
            return Err(QueueDomainError::EmptyTaskList);
        }
        Ok(Self {
            metadata: None,
            tasks,
        })
    }

    /// Attaches job metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Returns the job metadata, if any.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Returns the ordered task specs.
    #[must_use]
    pub fn tasks(&self) -> &[TaskSpec] {
        &self.tasks
    }
}

/// A producer-submitted unit of work composed of one or more tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    id: JobId,
    metadata: Option<Value>,
    status: JobStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted job aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedJobData {
    /// Persisted job identifier.
    pub id: JobId,
    /// Persisted metadata payload, if any.
    pub metadata: Option<Value>,
    /// Persisted aggregate status.
    pub status: JobStatus,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest lifecycle timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new pending job from a submission.
    #[must_use]
    pub fn from_submission(submission: &JobSubmission, clock: &(impl Clock + ?Sized)) -> Self {
        let timestamp = clock.utc();
        Self {
            id: JobId::new(),
            metadata: submission.metadata().cloned(),
            status: JobStatus::Pending,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a job from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedJobData) -> Self {
        Self {
            id: data.id,
            metadata: data.metadata,
            status: data.status,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the job identifier.
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Returns the metadata payload, if any.
    #[must_use]
    pub const fn metadata(&self) -> Option<&Value> {
        self.metadata.as_ref()
    }

    /// Returns the aggregate status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest lifecycle timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Replaces the aggregate status, used by the builder finalisation pass.
    pub fn set_status(&mut self, status: JobStatus, clock: &(impl Clock + ?Sized)) {
        self.status = status;
        self.updated_at = clock.utc();
    }
}
