//! `PostgreSQL` queue repository built on skip-locked row claiming.

use super::{
    models::{JobRow, NewJobRow, NewTaskRow, TaskRow},
    schema::{job_tasks, jobs},
};
use crate::queue::domain::{
    FailureDisposition, Job, JobId, JobStatus, JobSubmission, JobTask, NodeId, PersistedJobData,
    PersistedTaskData, RetryPolicy, SequenceNumber, ServiceName, TaskId, TaskStatus,
};
use crate::queue::ports::{
    ClaimRequest, QueueRepository, QueueRepositoryError, QueueRepositoryResult,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use mockable::{Clock, DefaultClock};
use std::sync::Arc;

/// `PostgreSQL` connection pool type used by queue adapters.
pub type QueuePgPool = Pool<ConnectionManager<PgConnection>>;

/// Builds a connection pool for the given database URL.
///
/// # Errors
///
/// Returns [`QueueRepositoryError::Transient`] when the pool cannot be
/// constructed.
pub fn create_pool(database_url: &str) -> QueueRepositoryResult<QueuePgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    Pool::builder()
        .build(manager)
        .map_err(QueueRepositoryError::transient)
}

impl From<diesel::result::Error> for QueueRepositoryError {
    fn from(err: diesel::result::Error) -> Self {
        Self::transient(err)
    }
}

/// `PostgreSQL`-backed queue repository.
#[derive(Clone)]
pub struct PostgresQueueRepository {
    pool: QueuePgPool,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl PostgresQueueRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub fn new(pool: QueuePgPool) -> Self {
        Self::with_clock(pool, Arc::new(DefaultClock))
    }

    /// Creates a repository with an injected clock.
    #[must_use]
    pub fn with_clock(pool: QueuePgPool, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { pool, clock }
    }

    async fn run_blocking<F, T>(&self, f: F) -> QueueRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueueRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(QueueRepositoryError::transient)?;
            f(&mut connection)
        })
        .await
        .map_err(QueueRepositoryError::transient)?
    }
}

impl std::fmt::Debug for PostgresQueueRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresQueueRepository").finish()
    }
}

#[async_trait]
impl QueueRepository for PostgresQueueRepository {
    async fn submit_job(&self, submission: &JobSubmission) -> QueueRepositoryResult<Job> {
        let now = self.clock.utc();
        let job = Job::from_submission(submission, &*self.clock);
        let job_row = job_to_new_row(&job);
        let task_rows: Vec<NewTaskRow> = submission
            .tasks()
            .iter()
            .map(|spec| NewTaskRow {
                id: TaskId::new().into_inner(),
                job_id: job.id().into_inner(),
                service: spec.service().as_str().to_owned(),
                status: TaskStatus::Pending.as_str().to_owned(),
                payload: spec.payload().cloned(),
                attempts: 0,
                created_at: now,
                updated_at: now,
            })
            .collect();

        self.run_blocking(move |connection| {
            connection.transaction(|txn| {
                diesel::insert_into(jobs::table)
                    .values(&job_row)
                    .execute(txn)?;
                // One row at a time keeps the BIGSERIAL allocations in
                // submission order; a multi-row VALUES list does too, but
                // only as an implementation detail of the backend.
                for task_row in &task_rows {
                    diesel::insert_into(job_tasks::table)
                        .values(task_row)
                        .execute(txn)?;
                }
                Ok(())
            })
        })
        .await?;
        Ok(job)
    }

    async fn claim_tasks(&self, request: &ClaimRequest) -> QueueRepositoryResult<Vec<JobTask>> {
        let now = self.clock.utc();
        let lease_expiry = now + request.lease_duration();
        let service = request.service().as_str().to_owned();
        let node = request.node().as_str().to_owned();
        let limit = i64::from(request.limit());

        self.run_blocking(move |connection| {
            connection.transaction(|txn| {
                // Runnable rows: pending past their backoff window, plus
                // claimed/running rows whose lease has expired (lazy reclaim).
                // SKIP LOCKED keeps concurrent claimers from blocking on each
                // other; they each take a disjoint slice of unlocked rows.
                let runnable = job_tasks::status
                    .eq(TaskStatus::Pending.as_str())
                    .and(
                        job_tasks::not_before
                            .is_null()
                            .or(job_tasks::not_before.le(now)),
                    )
                    .or(job_tasks::status
                        .eq_any([TaskStatus::Claimed.as_str(), TaskStatus::Running.as_str()])
                        .and(job_tasks::lease_expires_at.le(now)));

                let selected: Vec<uuid::Uuid> = job_tasks::table
                    .filter(job_tasks::service.eq(&service))
                    .filter(runnable)
                    .order(job_tasks::sequence.asc())
                    .limit(limit)
                    .select(job_tasks::id)
                    .for_update()
                    .skip_locked()
                    .load(txn)?;

                if selected.is_empty() {
                    return Ok(Vec::new());
                }

                let rows: Vec<TaskRow> = diesel::update(
                    job_tasks::table.filter(job_tasks::id.eq_any(&selected)),
                )
                .set((
                    job_tasks::status.eq(TaskStatus::Claimed.as_str()),
                    job_tasks::claimed_by.eq(Some(node.clone())),
                    job_tasks::lease_expires_at.eq(Some(lease_expiry)),
                    job_tasks::not_before.eq(None::<DateTime<Utc>>),
                    job_tasks::attempts.eq(job_tasks::attempts + 1),
                    job_tasks::updated_at.eq(now),
                ))
                .returning(TaskRow::as_returning())
                .get_results(txn)?;

                let mut claimed = rows
                    .into_iter()
                    .map(row_to_task)
                    .collect::<QueueRepositoryResult<Vec<JobTask>>>()?;
                claimed.sort_unstable_by_key(JobTask::sequence);
                Ok(claimed)
            })
        })
        .await
    }

    async fn renew_lease(
        &self,
        task_id: TaskId,
        node: &NodeId,
        new_expiry: DateTime<Utc>,
    ) -> QueueRepositoryResult<()> {
        let now = self.clock.utc();
        let node_name = node.as_str().to_owned();

        self.run_blocking(move |connection| {
            let updated = diesel::update(
                job_tasks::table
                    .filter(job_tasks::id.eq(task_id.into_inner()))
                    .filter(job_tasks::claimed_by.eq(&node_name))
                    .filter(job_tasks::status.eq_any([
                        TaskStatus::Claimed.as_str(),
                        TaskStatus::Running.as_str(),
                    ])),
            )
            .set((
                job_tasks::lease_expires_at.eq(Some(new_expiry)),
                job_tasks::updated_at.eq(now),
            ))
            .execute(connection)?;

            if updated == 0 {
                return Err(lease_lost_or_missing(connection, task_id));
            }
            Ok(())
        })
        .await
    }

    async fn mark_running(&self, task_id: TaskId, node: &NodeId) -> QueueRepositoryResult<()> {
        let now = self.clock.utc();
        let node_name = node.as_str().to_owned();

        self.run_blocking(move |connection| {
            let updated = diesel::update(
                job_tasks::table
                    .filter(job_tasks::id.eq(task_id.into_inner()))
                    .filter(job_tasks::claimed_by.eq(&node_name))
                    .filter(job_tasks::status.eq(TaskStatus::Claimed.as_str())),
            )
            .set((
                job_tasks::status.eq(TaskStatus::Running.as_str()),
                job_tasks::updated_at.eq(now),
            ))
            .execute(connection)?;

            if updated == 0 {
                return Err(lease_lost_or_missing(connection, task_id));
            }
            Ok(())
        })
        .await
    }

    async fn mark_succeeded(&self, task_id: TaskId, node: &NodeId) -> QueueRepositoryResult<()> {
        let now = self.clock.utc();
        let node_name = node.as_str().to_owned();

        self.run_blocking(move |connection| {
            let updated = diesel::update(
                job_tasks::table
                    .filter(job_tasks::id.eq(task_id.into_inner()))
                    .filter(job_tasks::claimed_by.eq(&node_name))
                    .filter(job_tasks::status.eq(TaskStatus::Running.as_str())),
            )
            .set((
                job_tasks::status.eq(TaskStatus::Succeeded.as_str()),
                job_tasks::claimed_by.eq(None::<String>),
                job_tasks::lease_expires_at.eq(None::<DateTime<Utc>>),
                job_tasks::last_error.eq(None::<String>),
                job_tasks::updated_at.eq(now),
            ))
            .execute(connection)?;

            if updated == 0 {
                return Err(lease_lost_or_missing(connection, task_id));
            }
            Ok(())
        })
        .await
    }

    async fn mark_failed(
        &self,
        task_id: TaskId,
        node: &NodeId,
        detail: &str,
        policy: &RetryPolicy,
    ) -> QueueRepositoryResult<FailureDisposition> {
        let now = self.clock.utc();
        let node_name = node.as_str().to_owned();
        let failure_detail = detail.to_owned();
        let retry_policy = *policy;

        self.run_blocking(move |connection| {
            connection.transaction(|txn| {
                let row: Option<TaskRow> = job_tasks::table
                    .filter(job_tasks::id.eq(task_id.into_inner()))
                    .select(TaskRow::as_select())
                    .for_update()
                    .first(txn)
                    .optional()?;
                let Some(row) = row else {
                    return Err(QueueRepositoryError::TaskNotFound(task_id));
                };
                let held = row.claimed_by.as_deref() == Some(node_name.as_str())
                    && row.status == TaskStatus::Running.as_str();
                if !held {
                    return Err(QueueRepositoryError::LeaseLost(task_id));
                }

                let attempts =
                    u32::try_from(row.attempts).map_err(QueueRepositoryError::transient)?;
                let release = (
                    job_tasks::claimed_by.eq(None::<String>),
                    job_tasks::lease_expires_at.eq(None::<DateTime<Utc>>),
                    job_tasks::last_error.eq(Some(failure_detail.clone())),
                    job_tasks::updated_at.eq(now),
                );
                let target = job_tasks::table.filter(job_tasks::id.eq(task_id.into_inner()));

                if retry_policy.is_exhausted(attempts) {
                    diesel::update(target)
                        .set((job_tasks::status.eq(TaskStatus::Dead.as_str()), release))
                        .execute(txn)?;
                    Ok(FailureDisposition::Dead)
                } else {
                    let eligible_at = now + retry_policy.delay_for_attempt(attempts);
                    diesel::update(target)
                        .set((
                            job_tasks::status.eq(TaskStatus::Pending.as_str()),
                            job_tasks::not_before.eq(Some(eligible_at)),
                            release,
                        ))
                        .execute(txn)?;
                    Ok(FailureDisposition::Retry(eligible_at))
                }
            })
        })
        .await
    }

    async fn find_job(&self, id: JobId) -> QueueRepositoryResult<Option<Job>> {
        self.run_blocking(move |connection| {
            let row = jobs::table
                .filter(jobs::id.eq(id.into_inner()))
                .select(JobRow::as_select())
                .first::<JobRow>(connection)
                .optional()?;
            row.map(row_to_job).transpose()
        })
        .await
    }

    async fn find_task(&self, id: TaskId) -> QueueRepositoryResult<Option<JobTask>> {
        self.run_blocking(move |connection| {
            let row = job_tasks::table
                .filter(job_tasks::id.eq(id.into_inner()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn tasks_for_job(&self, job_id: JobId) -> QueueRepositoryResult<Vec<JobTask>> {
        self.run_blocking(move |connection| {
            let rows: Vec<TaskRow> = job_tasks::table
                .filter(job_tasks::job_id.eq(job_id.into_inner()))
                .order(job_tasks::sequence.asc())
                .select(TaskRow::as_select())
                .load(connection)?;
            rows.into_iter().map(row_to_task).collect()
        })
        .await
    }

    async fn finalize_jobs(&self) -> QueueRepositoryResult<u64> {
        let now = self.clock.utc();

        self.run_blocking(move |connection| {
            connection.transaction(|txn| {
                let open: Vec<(uuid::Uuid, String)> = jobs::table
                    .filter(
                        jobs::status
                            .ne_all([JobStatus::Succeeded.as_str(), JobStatus::Failed.as_str()]),
                    )
                    .select((jobs::id, jobs::status))
                    .for_update()
                    .skip_locked()
                    .load(txn)?;

                let mut changed = 0u64;
                for (job_id, stored) in open {
                    let statuses: Vec<String> = job_tasks::table
                        .filter(job_tasks::job_id.eq(job_id))
                        .select(job_tasks::status)
                        .load(txn)?;
                    let parsed = statuses
                        .iter()
                        .map(|status| TaskStatus::try_from(status.as_str()))
                        .collect::<Result<Vec<TaskStatus>, _>>()
                        .map_err(QueueRepositoryError::transient)?;
                    let derived = JobStatus::derive(parsed);
                    if derived.as_str() != stored {
                        diesel::update(jobs::table.filter(jobs::id.eq(job_id)))
                            .set((
                                jobs::status.eq(derived.as_str()),
                                jobs::updated_at.eq(now),
                            ))
                            .execute(txn)?;
                        changed += 1;
                    }
                }
                Ok(changed)
            })
        })
        .await
    }
}

/// Distinguishes a lost lease from a missing row after a zero-row CAS update.
fn lease_lost_or_missing(connection: &mut PgConnection, task_id: TaskId) -> QueueRepositoryError {
    let exists = job_tasks::table
        .filter(job_tasks::id.eq(task_id.into_inner()))
        .select(job_tasks::id)
        .first::<uuid::Uuid>(connection)
        .optional();
    match exists {
        Ok(Some(_)) => QueueRepositoryError::LeaseLost(task_id),
        Ok(None) => QueueRepositoryError::TaskNotFound(task_id),
        Err(err) => QueueRepositoryError::transient(err),
    }
}

fn job_to_new_row(job: &Job) -> NewJobRow {
    NewJobRow {
        id: job.id().into_inner(),
        metadata: job.metadata().cloned(),
        status: job.status().as_str().to_owned(),
        created_at: job.created_at(),
        updated_at: job.updated_at(),
    }
}

fn row_to_job(row: JobRow) -> QueueRepositoryResult<Job> {
    let status =
        JobStatus::try_from(row.status.as_str()).map_err(QueueRepositoryError::transient)?;
    Ok(Job::from_persisted(PersistedJobData {
        id: JobId::from_uuid(row.id),
        metadata: row.metadata,
        status,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

fn row_to_task(row: TaskRow) -> QueueRepositoryResult<JobTask> {
    let service = ServiceName::new(row.service).map_err(QueueRepositoryError::transient)?;
    let status =
        TaskStatus::try_from(row.status.as_str()).map_err(QueueRepositoryError::transient)?;
    let claimed_by = row
        .claimed_by
        .map(NodeId::new)
        .transpose()
        .map_err(QueueRepositoryError::transient)?;
    let attempts = u32::try_from(row.attempts).map_err(QueueRepositoryError::transient)?;

    Ok(JobTask::from_persisted(PersistedTaskData {
        id: TaskId::from_uuid(row.id),
        job_id: JobId::from_uuid(row.job_id),
        service,
        sequence: SequenceNumber::new(row.sequence),
        status,
        payload: row.payload,
        claimed_by,
        lease_expires_at: row.lease_expires_at,
        not_before: row.not_before,
        attempts,
        last_error: row.last_error,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}
