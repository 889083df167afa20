//! Consumer service: claims tasks, executes handlers, reports outcomes.

use crate::queue::domain::{
    FailureDisposition, JobTask, NodeId, QueueDomainError, RetryPolicy, ServiceName, TaskId,
};
use crate::queue::ports::{
    ClaimRequest, HandlerFailure, QueueRepository, QueueRepositoryError, TaskHandler,
};
use async_trait::async_trait;
use mockable::Clock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

/// Service-level errors for agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Claim parameter validation failed.
    #[error(transparent)]
    Domain(#[from] QueueDomainError),
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] QueueRepositoryError),
    /// No handler is registered for the service.
    #[error("no handler registered for service '{0}'")]
    MissingHandler(ServiceName),
}

/// Result type for agent service operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Tunable agent parameters with documented deployment defaults.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    service: ServiceName,
    node: NodeId,
    claim_limit: u32,
    lease_duration: Duration,
    renewal_interval: Duration,
    poll_interval: Duration,
    retry_policy: RetryPolicy,
}

impl AgentConfig {
    /// Creates a config for one service/node pair with the defaults: claim
    /// limit 1, lease 60 s, renewal every 20 s, poll every 1 s, default
    /// retry policy.
    #[must_use]
    pub fn new(service: ServiceName, node: NodeId) -> Self {
        Self {
            service,
            node,
            claim_limit: 1,
            lease_duration: Duration::from_secs(60),
            renewal_interval: Duration::from_secs(20),
            poll_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Sets the maximum claim batch size.
    #[must_use]
    pub const fn with_claim_limit(mut self, limit: u32) -> Self {
        self.claim_limit = limit;
        self
    }

    /// Sets the lease duration and keeps the renewal interval at a third of
    /// it, so a healthy agent renews twice before expiry.
    #[must_use]
    pub fn with_lease_duration(mut self, lease: Duration) -> Self {
        self.lease_duration = lease;
        self.renewal_interval = lease / 3;
        self
    }

    /// Sets the idle poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll_interval = poll;
        self
    }

    /// Sets the retry policy applied on handler failure.
    #[must_use]
    pub const fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Returns the service this agent drains.
    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    /// Returns the node identity.
    #[must_use]
    pub const fn node(&self) -> &NodeId {
        &self.node
    }

    /// Returns the idle poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Maps service names to their executable capabilities.
///
/// This registry is the deployment seam: application logic enters the system
/// only by registering a [`TaskHandler`] here.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<ServiceName, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for a service, replacing any previous one.
    #[must_use]
    pub fn with_handler(mut self, service: ServiceName, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(service, handler);
        self
    }

    /// Looks up the handler for a service.
    #[must_use]
    pub fn get(&self, service: &ServiceName) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(service).cloned()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("services", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Trivial handler that logs the task and succeeds; the out-of-the-box
/// capability for the `echo` service.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl TaskHandler for EchoHandler {
    async fn execute(&self, task: &JobTask) -> Result<Option<Value>, HandlerFailure> {
        tracing::info!(task_id = %task.id(), payload = ?task.payload(), "echo");
        Ok(Some(serde_json::json!({ "ok": true })))
    }
}

/// Outcome of processing one claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskOutcome {
    Succeeded,
    Retried,
    Dead,
    LeaseLost,
}

/// Counts from one agent pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassSummary {
    /// Tasks claimed in this pass.
    pub claimed: usize,
    /// Tasks whose handler succeeded.
    pub succeeded: usize,
    /// Tasks re-queued for retry after handler failure.
    pub retried: usize,
    /// Tasks that exhausted their retries.
    pub dead: usize,
    /// Tasks abandoned because the lease was lost mid-flight.
    pub lease_lost: usize,
}

/// Agent orchestration service: the poll/claim/execute loop body.
#[derive(Clone)]
pub struct AgentService<R, C>
where
    R: QueueRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<R>,
    clock: Arc<C>,
    handlers: HandlerRegistry,
    config: AgentConfig,
}

impl<R, C> AgentService<R, C>
where
    R: QueueRepository,
    C: Clock + Send + Sync,
{
    /// Creates a new agent service.
    #[must_use]
    pub const fn new(
        repository: Arc<R>,
        clock: Arc<C>,
        handlers: HandlerRegistry,
        config: AgentConfig,
    ) -> Self {
        Self {
            repository,
            clock,
            handlers,
            config,
        }
    }

    /// Returns the agent configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Executes one pass: claim a batch, run each task to a terminal or
    /// retry transition, and report the counts.
    ///
    /// An empty claim is a normal outcome; callers in continuous mode sleep
    /// for the poll interval and try again.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Repository`] when the store fails; claimed-task
    /// processing errors are folded into the summary instead, so one bad
    /// task does not abort the batch.
    pub async fn run_once(&self) -> AgentResult<PassSummary> {
        let request = ClaimRequest::new(
            self.config.service.clone(),
            self.config.node.clone(),
            self.config.claim_limit,
            self.config.lease_duration,
        )?;
        let claimed = self.repository.claim_tasks(&request).await?;

        let mut summary = PassSummary {
            claimed: claimed.len(),
            ..PassSummary::default()
        };
        if claimed.is_empty() {
            tracing::debug!(service = %self.config.service, "no claimable tasks");
            return Ok(summary);
        }

        for task in &claimed {
            match self.process(task).await? {
                TaskOutcome::Succeeded => summary.succeeded += 1,
                TaskOutcome::Retried => summary.retried += 1,
                TaskOutcome::Dead => summary.dead += 1,
                TaskOutcome::LeaseLost => summary.lease_lost += 1,
            }
        }
        tracing::info!(
            service = %self.config.service,
            claimed = summary.claimed,
            succeeded = summary.succeeded,
            retried = summary.retried,
            dead = summary.dead,
            lease_lost = summary.lease_lost,
            "agent pass"
        );
        Ok(summary)
    }

    /// Runs the claim/execute loop until a fatal error.
    ///
    /// Sleeps for the poll interval whenever a pass claims nothing or the
    /// store reports a transient failure; those are retried, never fatal.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Domain`] or [`AgentError::MissingHandler`] on
    /// configuration mistakes no amount of retrying will fix.
    pub async fn run(&self) -> AgentResult<()> {
        loop {
            match self.run_once().await {
                Ok(summary) if summary.claimed == 0 => {
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Ok(_) => {}
                Err(AgentError::Repository(err)) => {
                    tracing::warn!(error = %err, "agent pass failed, retrying");
                    tokio::time::sleep(self.config.poll_interval).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs one claimed task through the state machine.
    ///
    /// A lost lease at any point aborts the attempt without writing a
    /// terminal state; the reclaiming node owns the task now.
    async fn process(&self, task: &JobTask) -> AgentResult<TaskOutcome> {
        let handler = self
            .handlers
            .get(task.service())
            .ok_or_else(|| AgentError::MissingHandler(task.service().clone()))?;

        match self.repository.mark_running(task.id(), &self.config.node).await {
            Ok(()) => {}
            Err(QueueRepositoryError::LeaseLost(_) | QueueRepositoryError::TaskNotFound(_)) => {
                tracing::warn!(task_id = %task.id(), "lease lost before start");
                return Ok(TaskOutcome::LeaseLost);
            }
            Err(err) => return Err(err.into()),
        }

        match self.execute_with_renewal(task, handler).await {
            Ok(Ok(_result)) => {
                match self
                    .repository
                    .mark_succeeded(task.id(), &self.config.node)
                    .await
                {
                    Ok(()) => Ok(TaskOutcome::Succeeded),
                    Err(QueueRepositoryError::LeaseLost(_)) => Ok(TaskOutcome::LeaseLost),
                    Err(err) => Err(err.into()),
                }
            }
            Ok(Err(failure)) => self.record_failure(task.id(), &failure).await,
            Err(AgentError::Repository(QueueRepositoryError::LeaseLost(_))) => {
                tracing::warn!(task_id = %task.id(), "lease lost during execution, aborting");
                Ok(TaskOutcome::LeaseLost)
            }
            Err(err) => Err(err),
        }
    }

    /// Drives the handler while renewing the lease on a ticker, so runs
    /// longer than the lease stay owned by this node.
    async fn execute_with_renewal(
        &self,
        task: &JobTask,
        handler: Arc<dyn TaskHandler>,
    ) -> AgentResult<Result<Option<Value>, HandlerFailure>> {
        let mut renewals = tokio::time::interval(self.config.renewal_interval);
        renewals.set_missed_tick_behavior(MissedTickBehavior::Delay);
        renewals.tick().await;

        let execution = handler.execute(task);
        tokio::pin!(execution);
        loop {
            tokio::select! {
                result = &mut execution => return Ok(result),
                _ = renewals.tick() => {
                    let new_expiry = self.clock.utc() + self.config.lease_duration;
                    self.repository
                        .renew_lease(task.id(), &self.config.node, new_expiry)
                        .await?;
                    tracing::debug!(task_id = %task.id(), %new_expiry, "lease renewed");
                }
            }
        }
    }

    async fn record_failure(
        &self,
        task_id: TaskId,
        failure: &HandlerFailure,
    ) -> AgentResult<TaskOutcome> {
        let disposition = match self
            .repository
            .mark_failed(
                task_id,
                &self.config.node,
                &failure.detail,
                &self.config.retry_policy,
            )
            .await
        {
            Ok(disposition) => disposition,
            Err(QueueRepositoryError::LeaseLost(_)) => return Ok(TaskOutcome::LeaseLost),
            Err(err) => return Err(err.into()),
        };
        match disposition {
            FailureDisposition::Retry(eligible_at) => {
                tracing::warn!(%task_id, %eligible_at, detail = %failure.detail, "task retry scheduled");
                Ok(TaskOutcome::Retried)
            }
            FailureDisposition::Dead => {
                tracing::error!(%task_id, detail = %failure.detail, "task dead after exhausting retries");
                Ok(TaskOutcome::Dead)
            }
        }
    }
}

impl<R, C> std::fmt::Debug for AgentService<R, C>
where
    R: QueueRepository,
    C: Clock + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentService")
            .field("config", &self.config)
            .finish()
    }
}
