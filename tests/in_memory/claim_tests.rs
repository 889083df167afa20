//! Batch claiming behaviour: ordering, disjointness, and service filtering.

#![expect(
    clippy::expect_used,
    reason = "Test code uses expect for assertion clarity"
)]
#![expect(
    clippy::indexing_slicing,
    reason = "Test code uses indexing after length checks"
)]

use super::helpers::{claim, clocked_repository, node, service, specs};
use foreman::queue::domain::{JobSubmission, QueueDomainError, TaskStatus};
use foreman::queue::ports::{ClaimRequest, QueueRepository};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn concurrent_claimers_receive_disjoint_batches_in_order() {
    let (repository, _clock) = clocked_repository();
    let submission = JobSubmission::new(specs("thumbnail", 3)).expect("valid submission");
    repository
        .submit_job(&submission)
        .await
        .expect("submit job");

    let first_batch = repository
        .claim_tasks(&claim("thumbnail", "agent-a", 2))
        .await
        .expect("first claim");
    let second_batch = repository
        .claim_tasks(&claim("thumbnail", "agent-b", 5))
        .await
        .expect("second claim");

    assert_eq!(first_batch.len(), 2);
    assert_eq!(first_batch[0].payload(), Some(&json!({"position": 0})));
    assert_eq!(first_batch[1].payload(), Some(&json!({"position": 1})));
    assert!(first_batch[0].sequence() < first_batch[1].sequence());

    assert_eq!(second_batch.len(), 1);
    assert_eq!(second_batch[0].payload(), Some(&json!({"position": 2})));

    for task in first_batch.iter().chain(second_batch.iter()) {
        assert_eq!(task.status(), TaskStatus::Claimed);
        assert_eq!(task.attempts(), 1);
    }
    assert!(
        first_batch
            .iter()
            .all(|task| second_batch.iter().all(|other| other.id() != task.id()))
    );
}

#[tokio::test]
async fn claims_follow_submission_order_across_jobs() {
    let (repository, _clock) = clocked_repository();
    let first_job = repository
        .submit_job(&JobSubmission::new(specs("notify", 1)).expect("valid submission"))
        .await
        .expect("submit first");
    let second_job = repository
        .submit_job(&JobSubmission::new(specs("notify", 1)).expect("valid submission"))
        .await
        .expect("submit second");

    let batch = repository
        .claim_tasks(&claim("notify", "agent-a", 10))
        .await
        .expect("claim");

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].job_id(), first_job.id());
    assert_eq!(batch[1].job_id(), second_job.id());
}

#[tokio::test]
async fn claim_only_returns_tasks_of_the_requested_service() {
    let (repository, _clock) = clocked_repository();
    let mut mixed = specs("thumbnail", 1);
    mixed.extend(specs("notify", 1));
    repository
        .submit_job(&JobSubmission::new(mixed).expect("valid submission"))
        .await
        .expect("submit job");

    let batch = repository
        .claim_tasks(&claim("notify", "agent-a", 10))
        .await
        .expect("claim");

    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].service(), &service("notify"));
}

#[tokio::test]
async fn empty_pool_yields_an_empty_batch() {
    let (repository, _clock) = clocked_repository();
    let batch = repository
        .claim_tasks(&claim("thumbnail", "agent-a", 4))
        .await
        .expect("claim");
    assert!(batch.is_empty());
}

#[tokio::test]
async fn zero_claim_limit_is_rejected_at_construction() {
    let result = ClaimRequest::new(
        service("thumbnail"),
        node("agent-a"),
        0,
        Duration::from_secs(60),
    );
    assert_eq!(result, Err(QueueDomainError::InvalidClaimLimit));
}
