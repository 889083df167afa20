//! Diesel row models for queue persistence.

use super::schema::{job_tasks, jobs};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for job records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = jobs)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct JobRow {
    /// Job identifier.
    pub id: uuid::Uuid,
    /// Optional metadata payload.
    pub metadata: Option<Value>,
    /// Aggregate status.
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert model for job records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJobRow {
    /// Job identifier.
    pub id: uuid::Uuid,
    /// Optional metadata payload.
    pub metadata: Option<Value>,
    /// Aggregate status.
    pub status: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = job_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Owning job identifier.
    pub job_id: uuid::Uuid,
    /// Logical routing key.
    pub service: String,
    /// Datastore-assigned ordering position.
    pub sequence: i64,
    /// Lifecycle status.
    pub status: String,
    /// Optional application payload.
    pub payload: Option<Value>,
    /// Node holding the current lease, if any.
    pub claimed_by: Option<String>,
    /// Lease expiry instant, if a lease is held.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Next-eligible instant set by retry backoff.
    pub not_before: Option<DateTime<Utc>>,
    /// Attempt counter.
    pub attempts: i32,
    /// Most recent failure detail.
    pub last_error: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert model for task records.
///
/// Deliberately omits `sequence`: the column's BIGSERIAL default assigns it,
/// keeping the counter correct across concurrent builder processes.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = job_tasks)]
pub struct NewTaskRow {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Owning job identifier.
    pub job_id: uuid::Uuid,
    /// Logical routing key.
    pub service: String,
    /// Lifecycle status.
    pub status: String,
    /// Optional application payload.
    pub payload: Option<Value>,
    /// Attempt counter.
    pub attempts: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
