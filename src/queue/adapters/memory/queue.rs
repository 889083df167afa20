//! In-memory queue repository for tests and embedded deployments.
//!
//! The claim path uses the optimistic substitute for skip-locked selection:
//! candidates are gathered without exclusivity, then each row is claimed by a
//! conditional update, discarding rows lost to a race.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::{Clock, DefaultClock};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::queue::domain::{
    FailureDisposition, Job, JobId, JobStatus, JobSubmission, JobTask, NodeId, RetryPolicy,
    SequenceNumber, TaskId, TaskStatus,
};
use crate::queue::ports::{
    ClaimRequest, QueueRepository, QueueRepositoryError, QueueRepositoryResult,
};

/// Thread-safe in-memory queue repository.
#[derive(Clone)]
pub struct InMemoryQueueRepository {
    state: Arc<RwLock<InMemoryQueueState>>,
    clock: Arc<dyn Clock + Send + Sync>,
}

#[derive(Default)]
struct InMemoryQueueState {
    jobs: HashMap<JobId, Job>,
    tasks: HashMap<TaskId, JobTask>,
    next_sequence: i64,
}

impl InMemoryQueueRepository {
    /// Creates an empty repository using the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(DefaultClock))
    }

    /// Creates an empty repository with an injected clock, letting tests
    /// drive lease expiry deterministically.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            state: Arc::new(RwLock::new(InMemoryQueueState::default())),
            clock,
        }
    }

    fn write_state(
        &self,
    ) -> QueueRepositoryResult<std::sync::RwLockWriteGuard<'_, InMemoryQueueState>> {
        self.state.write().map_err(|err| {
            QueueRepositoryError::transient(std::io::Error::other(err.to_string()))
        })
    }

    fn read_state(
        &self,
    ) -> QueueRepositoryResult<std::sync::RwLockReadGuard<'_, InMemoryQueueState>> {
        self.state.read().map_err(|err| {
            QueueRepositoryError::transient(std::io::Error::other(err.to_string()))
        })
    }

    /// Looks up a task the node must still hold, enforcing the
    /// compare-and-swap ownership rule shared by every post-claim mutation.
    fn held_task_mut<'a>(
        state: &'a mut InMemoryQueueState,
        task_id: TaskId,
        node: &NodeId,
        expected: &[TaskStatus],
    ) -> QueueRepositoryResult<&'a mut JobTask> {
        let task = state
            .tasks
            .get_mut(&task_id)
            .ok_or(QueueRepositoryError::TaskNotFound(task_id))?;
        let held = task.claimed_by() == Some(node) && expected.contains(&task.status());
        if !held {
            return Err(QueueRepositoryError::LeaseLost(task_id));
        }
        Ok(task)
    }
}

impl Default for InMemoryQueueRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryQueueRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryQueueRepository").finish()
    }
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn submit_job(&self, submission: &JobSubmission) -> QueueRepositoryResult<Job> {
        let mut state = self.write_state()?;
        let job = Job::from_submission(submission, &*self.clock);
        for spec in submission.tasks() {
            state.next_sequence += 1;
            let sequence = SequenceNumber::new(state.next_sequence);
            let task = JobTask::from_spec(job.id(), spec, sequence, &*self.clock);
            state.tasks.insert(task.id(), task);
        }
        state.jobs.insert(job.id(), job.clone());
        Ok(job)
    }

    async fn claim_tasks(&self, request: &ClaimRequest) -> QueueRepositoryResult<Vec<JobTask>> {
        let mut state = self.write_state()?;
        let now = self.clock.utc();
        let lease_expiry = now + request.lease_duration();

        let mut candidates: Vec<(SequenceNumber, TaskId)> = state
            .tasks
            .values()
            .filter(|task| task.service() == request.service() && task.is_claimable(now))
            .map(|task| (task.sequence(), task.id()))
            .collect();
        candidates.sort_unstable();

        let mut claimed = Vec::new();
        for (_, task_id) in candidates {
            if claimed.len() >= request.limit() as usize {
                break;
            }
            let Some(task) = state.tasks.get_mut(&task_id) else {
                continue;
            };
            // Conditional update per candidate; a row that lost the race
            // since selection is skipped, never an error.
            if task
                .claim(request.node().clone(), lease_expiry, now, &*self.clock)
                .is_ok()
            {
                claimed.push(task.clone());
            }
        }
        Ok(claimed)
    }

    async fn renew_lease(
        &self,
        task_id: TaskId,
        node: &NodeId,
        new_expiry: DateTime<Utc>,
    ) -> QueueRepositoryResult<()> {
        let mut state = self.write_state()?;
        let task = Self::held_task_mut(
            &mut state,
            task_id,
            node,
            &[TaskStatus::Claimed, TaskStatus::Running],
        )?;
        task.extend_lease(new_expiry, &*self.clock)
            .map_err(QueueRepositoryError::transient)
    }

    async fn mark_running(&self, task_id: TaskId, node: &NodeId) -> QueueRepositoryResult<()> {
        let mut state = self.write_state()?;
        let task = Self::held_task_mut(&mut state, task_id, node, &[TaskStatus::Claimed])?;
        task.begin(&*self.clock)
            .map_err(QueueRepositoryError::transient)
    }

    async fn mark_succeeded(&self, task_id: TaskId, node: &NodeId) -> QueueRepositoryResult<()> {
        let mut state = self.write_state()?;
        let task = Self::held_task_mut(&mut state, task_id, node, &[TaskStatus::Running])?;
        task.complete(&*self.clock)
            .map_err(QueueRepositoryError::transient)
    }

    async fn mark_failed(
        &self,
        task_id: TaskId,
        node: &NodeId,
        detail: &str,
        policy: &RetryPolicy,
    ) -> QueueRepositoryResult<FailureDisposition> {
        let mut state = self.write_state()?;
        let task = Self::held_task_mut(&mut state, task_id, node, &[TaskStatus::Running])?;
        task.fail(detail, policy, &*self.clock)
            .map_err(QueueRepositoryError::transient)
    }

    async fn find_job(&self, id: JobId) -> QueueRepositoryResult<Option<Job>> {
        let state = self.read_state()?;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn find_task(&self, id: TaskId) -> QueueRepositoryResult<Option<JobTask>> {
        let state = self.read_state()?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn tasks_for_job(&self, job_id: JobId) -> QueueRepositoryResult<Vec<JobTask>> {
        let state = self.read_state()?;
        let mut tasks: Vec<JobTask> = state
            .tasks
            .values()
            .filter(|task| task.job_id() == job_id)
            .cloned()
            .collect();
        tasks.sort_unstable_by_key(JobTask::sequence);
        Ok(tasks)
    }

    async fn finalize_jobs(&self) -> QueueRepositoryResult<u64> {
        let mut state = self.write_state()?;
        let open_jobs: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| !job.status().is_terminal())
            .map(Job::id)
            .collect();

        let mut changed = 0u64;
        for job_id in open_jobs {
            let derived = JobStatus::derive(
                state
                    .tasks
                    .values()
                    .filter(|task| task.job_id() == job_id)
                    .map(JobTask::status),
            );
            if let Some(job) = state.jobs.get_mut(&job_id)
                && job.status() != derived
            {
                job.set_status(derived, &*self.clock);
                changed += 1;
            }
        }
        Ok(changed)
    }
}
