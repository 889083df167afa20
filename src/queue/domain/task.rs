//! Task aggregate root and the claim/lease state machine.

use super::{
    JobId, NodeId, ParseTaskStatusError, QueueDomainError, RetryPolicy, SequenceNumber,
    ServiceName, TaskId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is runnable and waiting to be claimed.
    Pending,
    /// A node holds a live lease but execution has not started.
    Claimed,
    /// The claiming node is executing the task.
    Running,
    /// The handler completed successfully.
    Succeeded,
    /// The handler reported failure; retry accounting decides what follows.
    Failed,
    /// Retries are exhausted; the task is permanently failed.
    Dead,
}

impl TaskStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }

    /// Returns whether the status permits a direct transition to `target`.
    ///
    /// Lease-expiry reclaim is deliberately absent from this table: an
    /// expired `claimed`/`running` task re-enters the claimable pool through
    /// [`JobTask::is_claimable`], not through a recorded transition.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Claimed)
                | (Self::Claimed, Self::Running)
                | (Self::Running, Self::Succeeded | Self::Failed)
                | (Self::Failed, Self::Pending | Self::Dead)
        )
    }

    /// Returns whether the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Dead)
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "claimed" => Ok(Self::Claimed),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of recording a handler failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// The task returned to the pool and becomes eligible at the instant.
    Retry(DateTime<Utc>),
    /// Attempts are exhausted; the task is permanently failed.
    Dead,
}

/// Specification of one task inside a job submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSpec {
    service: ServiceName,
    payload: Option<Value>,
}

impl TaskSpec {
    /// Creates a task specification for the given service.
    #[must_use]
    pub const fn new(service: ServiceName) -> Self {
        Self {
            service,
            payload: None,
        }
    }

    /// Attaches an application payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Returns the target service.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

/// The atomic claimable unit of work within a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTask {
    id: TaskId,
    job_id: JobId,
    service: ServiceName,
    sequence: SequenceNumber,
    status: TaskStatus,
    payload: Option<Value>,
    claimed_by: Option<NodeId>,
    lease_expires_at: Option<DateTime<Utc>>,
    not_before: Option<DateTime<Utc>>,
    attempts: u32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted owning-job identifier.
    pub job_id: JobId,
    /// Persisted service name.
    pub service: ServiceName,
    /// Persisted sequence number.
    pub sequence: SequenceNumber,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted application payload, if any.
    pub payload: Option<Value>,
    /// Persisted claiming node, if any.
    pub claimed_by: Option<NodeId>,
    /// Persisted lease expiry, if any.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Persisted next-eligible instant, if any.
    pub not_before: Option<DateTime<Utc>>,
    /// Persisted attempt counter.
    pub attempts: u32,
    /// Persisted last failure detail, if any.
    pub last_error: Option<String>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest lifecycle timestamp.
    pub updated_at: DateTime<Utc>,
}

impl JobTask {
    /// Creates a pending task from a submission spec.
    ///
    /// The sequence number is supplied by the datastore's monotonic counter;
    /// callers outside adapters should never invent one.
    #[must_use]
    pub fn from_spec(
        job_id: JobId,
        spec: &TaskSpec,
        sequence: SequenceNumber,
        clock: &(impl Clock + ?Sized),
    ) -> Self {
        let timestamp = clock.utc();
        Self {
            id: TaskId::new(),
            job_id,
            service: spec.service().clone(),
            sequence,
            status: TaskStatus::Pending,
            payload: spec.payload().cloned(),
            claimed_by: None,
            lease_expires_at: None,
            not_before: None,
            attempts: 0,
            last_error: None,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            job_id: data.job_id,
            service: data.service,
            sequence: data.sequence,
            status: data.status,
            payload: data.payload,
            claimed_by: data.claimed_by,
            lease_expires_at: data.lease_expires_at,
            not_before: data.not_before,
            attempts: data.attempts,
            last_error: data.last_error,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the owning job identifier.
    #[must_use]
    pub const fn job_id(&self) -> JobId {
        self.job_id
    }

    /// Returns the target service.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the global ordering position.
    #[must_use]
    pub const fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the application payload, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Returns the node holding the current lease, if any.
    #[must_use]
    pub const fn claimed_by(&self) -> Option<&NodeId> {
        self.claimed_by.as_ref()
    }

    /// Returns the lease expiry instant, if a lease is held.
    #[must_use]
    pub const fn lease_expires_at(&self) -> Option<DateTime<Utc>> {
        self.lease_expires_at
    }

    /// Returns the next-eligible instant set by retry backoff, if any.
    #[must_use]
    pub const fn not_before(&self) -> Option<DateTime<Utc>> {
        self.not_before
    }

    /// Returns the attempt counter.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the most recent failure detail, if any.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
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

    /// Returns whether the task is eligible for claiming at `now`.
    ///
    /// Eligible tasks are pending ones whose backoff window has passed, plus
    /// claimed or running ones whose lease has expired (the lazy reclaim path
    /// for crashed or hung agents).
    #[must_use]
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            TaskStatus::Pending => self.not_before.is_none_or(|eligible| eligible <= now),
            TaskStatus::Claimed | TaskStatus::Running => self
                .lease_expires_at
                .is_none_or(|expiry| expiry <= now),
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Dead => false,
        }
    }

    /// Marks the task claimed by `node` with a lease until `lease_expires_at`.
    ///
    /// Increments the attempt counter: an expired-lease reclaim must not
    /// reset retry accounting.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::NotClaimable`] when the task is not
    /// eligible at `now`.
    pub fn claim(
        &mut self,
        node: NodeId,
        lease_expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
        clock: &(impl Clock + ?Sized),
    ) -> Result<(), QueueDomainError> {
        if !self.is_claimable(now) {
            return Err(QueueDomainError::NotClaimable {
                task_id: self.id,
                status: self.status,
            });
        }
        self.status = TaskStatus::Claimed;
        self.claimed_by = Some(node);
        self.lease_expires_at = Some(lease_expires_at);
        self.not_before = None;
        self.attempts = self.attempts.saturating_add(1);
        self.touch(clock);
        Ok(())
    }

    /// Marks the task running, immediately before handler invocation.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidStatusTransition`] when the task is
    /// not currently claimed.
    pub fn begin(&mut self, clock: &(impl Clock + ?Sized)) -> Result<(), QueueDomainError> {
        self.transition_to(TaskStatus::Running)?;
        self.touch(clock);
        Ok(())
    }

    /// Marks the task succeeded and releases the lease.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidStatusTransition`] when the task is
    /// not currently running.
    pub fn complete(&mut self, clock: &(impl Clock + ?Sized)) -> Result<(), QueueDomainError> {
        self.transition_to(TaskStatus::Succeeded)?;
        self.release_lease();
        self.last_error = None;
        self.touch(clock);
        Ok(())
    }

    /// Records a handler failure and applies retry accounting.
    ///
    /// If attempts remain under `policy`, the task returns to `pending` with
    /// a backoff-delayed next-eligible instant; otherwise it is `dead`. The
    /// lease is released either way.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidStatusTransition`] when the task is
    /// not currently running.
    pub fn fail(
        &mut self,
        detail: impl Into<String>,
        policy: &RetryPolicy,
        clock: &(impl Clock + ?Sized),
    ) -> Result<FailureDisposition, QueueDomainError> {
        self.transition_to(TaskStatus::Failed)?;
        self.last_error = Some(detail.into());
        self.release_lease();

        let disposition = if policy.is_exhausted(self.attempts) {
            self.transition_to(TaskStatus::Dead)?;
            FailureDisposition::Dead
        } else {
            self.transition_to(TaskStatus::Pending)?;
            let eligible_at = clock.utc() + policy.delay_for_attempt(self.attempts);
            self.not_before = Some(eligible_at);
            FailureDisposition::Retry(eligible_at)
        };
        self.touch(clock);
        Ok(disposition)
    }

    /// Extends the lease to `new_expiry` while execution continues.
    ///
    /// Ownership checks (claimed-by compare-and-swap) belong to the
    /// repository; this method only guards the lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns [`QueueDomainError::InvalidStatusTransition`] when no lease is
    /// active.
    pub fn extend_lease(
        &mut self,
        new_expiry: DateTime<Utc>,
        clock: &(impl Clock + ?Sized),
    ) -> Result<(), QueueDomainError> {
        if !matches!(self.status, TaskStatus::Claimed | TaskStatus::Running) {
            return Err(QueueDomainError::InvalidStatusTransition {
                task_id: self.id,
                from: self.status,
                to: self.status,
            });
        }
        self.lease_expires_at = Some(new_expiry);
        self.touch(clock);
        Ok(())
    }

    fn release_lease(&mut self) {
        self.claimed_by = None;
        self.lease_expires_at = None;
    }

    fn transition_to(&mut self, target: TaskStatus) -> Result<(), QueueDomainError> {
        if !self.status.can_transition_to(target) {
            return Err(QueueDomainError::InvalidStatusTransition {
                task_id: self.id,
                from: self.status,
                to: target,
            });
        }
        self.status = target;
        Ok(())
    }

    fn touch(&mut self, clock: &(impl Clock + ?Sized)) {
        self.updated_at = clock.utc();
    }
}
