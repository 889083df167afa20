//! Builder/agent flows from submission through execution to finalisation.

#![expect(
    clippy::expect_used,
    reason = "Test code uses expect for assertion clarity"
)]

use super::helpers::{FixedClock, clocked_repository, node, service, specs};
use async_trait::async_trait;
use chrono::Duration;
use mockable::Clock;
use foreman::queue::adapters::memory::InMemoryQueueRepository;
use foreman::queue::domain::{JobStatus, JobTask, QueueDomainError, RetryPolicy, TaskStatus};
use foreman::queue::ports::{HandlerFailure, QueueRepository, TaskHandler};
use foreman::queue::services::{
    AgentConfig, AgentService, BuilderError, BuilderService, EchoHandler, HandlerRegistry,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;

/// Handler that fails every execution with a fixed detail string.
struct AlwaysFails;

#[async_trait]
impl TaskHandler for AlwaysFails {
    async fn execute(&self, _task: &JobTask) -> Result<Option<Value>, HandlerFailure> {
        Err(HandlerFailure::new("synthetic failure"))
    }
}

fn agent_for(
    repository: &Arc<InMemoryQueueRepository>,
    clock: &Arc<FixedClock>,
    service_name: &str,
    node_name: &str,
    handler: Arc<dyn TaskHandler>,
    limit: u32,
    policy: RetryPolicy,
) -> AgentService<InMemoryQueueRepository, FixedClock> {
    let handlers = HandlerRegistry::new().with_handler(service(service_name), handler);
    let config = AgentConfig::new(service(service_name), node(node_name))
        .with_claim_limit(limit)
        .with_retry_policy(policy);
    AgentService::new(repository.clone(), clock.clone(), handlers, config)
}

#[tokio::test]
async fn submitted_job_drains_to_succeeded() {
    let (repository, clock) = clocked_repository();
    let builder = BuilderService::new(repository.clone());
    let agent = agent_for(
        &repository,
        &clock,
        "echo",
        "agent-a",
        Arc::new(EchoHandler),
        10,
        RetryPolicy::default(),
    );

    let job = builder
        .submit_tasks(specs("echo", 3))
        .await
        .expect("submit job");
    assert_eq!(job.status(), JobStatus::Pending);

    let summary = agent.run_once().await.expect("agent pass");
    assert_eq!(summary.claimed, 3);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.retried, 0);
    assert_eq!(summary.dead, 0);

    let finalized = builder.tick().await.expect("builder tick");
    assert_eq!(finalized, 1);
    let finished = builder.job_status(job.id()).await.expect("job status");
    assert_eq!(finished.status(), JobStatus::Succeeded);

    // A second tick changes nothing; terminal jobs are left alone.
    let finalized_again = builder.tick().await.expect("second tick");
    assert_eq!(finalized_again, 0);
}

#[tokio::test]
async fn failing_task_retries_with_backoff_then_dies() {
    let (repository, clock) = clocked_repository();
    let builder = BuilderService::new(repository.clone());
    let policy = RetryPolicy::new(StdDuration::from_secs(5), StdDuration::from_secs(300), 2);
    let agent = agent_for(
        &repository,
        &clock,
        "flaky",
        "agent-a",
        Arc::new(AlwaysFails),
        1,
        policy,
    );

    let job = builder
        .submit_tasks(specs("flaky", 1))
        .await
        .expect("submit job");

    let first_pass = agent.run_once().await.expect("first pass");
    assert_eq!(first_pass.claimed, 1);
    assert_eq!(first_pass.retried, 1);

    let tasks = repository
        .tasks_for_job(job.id())
        .await
        .expect("tasks for job");
    let task = tasks.first().expect("one task");
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.attempts(), 1);
    assert_eq!(task.last_error(), Some("synthetic failure"));
    let eligible_at = task.not_before().expect("backoff window set");
    assert_eq!(eligible_at, clock.utc() + Duration::seconds(5));

    // Inside the backoff window the task stays invisible.
    let idle_pass = agent.run_once().await.expect("idle pass");
    assert_eq!(idle_pass.claimed, 0);

    clock.advance(Duration::seconds(6));
    let final_pass = agent.run_once().await.expect("final pass");
    assert_eq!(final_pass.claimed, 1);
    assert_eq!(final_pass.dead, 1);

    let finalized = builder.tick().await.expect("builder tick");
    assert_eq!(finalized, 1);
    let finished = builder.job_status(job.id()).await.expect("job status");
    assert_eq!(finished.status(), JobStatus::Failed);
}

#[tokio::test]
async fn partially_drained_job_finalises_to_running() {
    let (repository, clock) = clocked_repository();
    let builder = BuilderService::new(repository.clone());
    let agent = agent_for(
        &repository,
        &clock,
        "echo",
        "agent-a",
        Arc::new(EchoHandler),
        1,
        RetryPolicy::default(),
    );

    let job = builder
        .submit_tasks(specs("echo", 2))
        .await
        .expect("submit job");

    let summary = agent.run_once().await.expect("agent pass");
    assert_eq!(summary.succeeded, 1);

    builder.tick().await.expect("builder tick");
    let in_flight = builder.job_status(job.id()).await.expect("job status");
    assert_eq!(in_flight.status(), JobStatus::Running);
}

#[tokio::test]
async fn empty_submission_is_rejected() {
    let (repository, _clock) = clocked_repository();
    let builder = BuilderService::new(repository);
    let result = builder.submit_tasks(Vec::new()).await;
    assert!(matches!(
        result,
        Err(BuilderError::Domain(QueueDomainError::EmptyTaskList))
    ));
}

#[tokio::test]
async fn unknown_job_status_lookup_fails() {
    let (repository, _clock) = clocked_repository();
    let builder = BuilderService::new(repository);
    let result = builder
        .job_status(foreman::queue::domain::JobId::new())
        .await;
    assert!(matches!(result, Err(BuilderError::Repository(_))));
}
