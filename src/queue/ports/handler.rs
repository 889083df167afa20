//! Handler port: the capability boundary where service logic enters.

use crate::queue::domain::JobTask;
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure detail reported by a task handler.
///
/// Drives the retry/dead transition; the detail string is persisted as the
/// task's last error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("handler failure: {detail}")]
pub struct HandlerFailure {
    /// Human-readable failure description.
    pub detail: String,
}

impl HandlerFailure {
    /// Creates a failure with the given detail.
    #[must_use]
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Executable capability for one service name.
///
/// Implementations live outside this crate's core; a deployment registers one
/// handler per service it runs. Leases are best-effort exclusivity, so
/// handlers must be idempotent or able to detect already-applied side
/// effects.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Executes the task, returning an optional result payload.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerFailure`] when execution fails; the agent then
    /// applies the retry policy.
    async fn execute(&self, task: &JobTask) -> Result<Option<Value>, HandlerFailure>;
}
