//! Lease expiry, renewal, and post-reclaim ownership races.

#![expect(
    clippy::expect_used,
    reason = "Test code uses expect for assertion clarity"
)]
#![expect(
    clippy::indexing_slicing,
    reason = "Test code uses indexing after length checks"
)]

use super::helpers::{claim, clocked_repository, node, specs};
use chrono::Duration;
use mockable::Clock;
use foreman::queue::domain::{JobSubmission, RetryPolicy, TaskStatus};
use foreman::queue::ports::{QueueRepository, QueueRepositoryError};

#[tokio::test]
async fn expired_lease_makes_a_task_reclaimable() {
    let (repository, clock) = clocked_repository();
    repository
        .submit_job(&JobSubmission::new(specs("thumbnail", 1)).expect("valid submission"))
        .await
        .expect("submit job");

    let first = repository
        .claim_tasks(&claim("thumbnail", "agent-a", 1))
        .await
        .expect("first claim");
    assert_eq!(first.len(), 1);
    let task_id = first[0].id();

    // While the lease is live the task is invisible to other claimers.
    let contested = repository
        .claim_tasks(&claim("thumbnail", "agent-b", 1))
        .await
        .expect("contested claim");
    assert!(contested.is_empty());

    clock.advance(Duration::seconds(61));
    let reclaimed = repository
        .claim_tasks(&claim("thumbnail", "agent-b", 1))
        .await
        .expect("reclaim");
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id(), task_id);
    assert_eq!(reclaimed[0].claimed_by(), Some(&node("agent-b")));
    assert_eq!(reclaimed[0].attempts(), 2);
}

#[tokio::test]
async fn renewal_extends_a_held_lease() {
    let (repository, clock) = clocked_repository();
    repository
        .submit_job(&JobSubmission::new(specs("thumbnail", 1)).expect("valid submission"))
        .await
        .expect("submit job");

    let batch = repository
        .claim_tasks(&claim("thumbnail", "agent-a", 1))
        .await
        .expect("claim");
    let task_id = batch[0].id();

    let new_expiry = clock.utc() + Duration::seconds(300);
    repository
        .renew_lease(task_id, &node("agent-a"), new_expiry)
        .await
        .expect("renew lease");

    // The extended lease keeps the task invisible past the original expiry.
    clock.advance(Duration::seconds(120));
    let contested = repository
        .claim_tasks(&claim("thumbnail", "agent-b", 1))
        .await
        .expect("contested claim");
    assert!(contested.is_empty());

    let task = repository
        .find_task(task_id)
        .await
        .expect("find task")
        .expect("task exists");
    assert_eq!(task.lease_expires_at(), Some(new_expiry));
}

#[tokio::test]
async fn renewal_after_reclaim_reports_lease_lost() {
    let (repository, clock) = clocked_repository();
    repository
        .submit_job(&JobSubmission::new(specs("thumbnail", 1)).expect("valid submission"))
        .await
        .expect("submit job");

    let batch = repository
        .claim_tasks(&claim("thumbnail", "agent-a", 1))
        .await
        .expect("claim");
    let task_id = batch[0].id();

    clock.advance(Duration::seconds(61));
    let reclaimed = repository
        .claim_tasks(&claim("thumbnail", "agent-b", 1))
        .await
        .expect("reclaim");
    assert_eq!(reclaimed.len(), 1);

    let result = repository
        .renew_lease(task_id, &node("agent-a"), clock.utc() + Duration::seconds(60))
        .await;
    assert!(matches!(
        result,
        Err(QueueRepositoryError::LeaseLost(id)) if id == task_id
    ));
}

#[tokio::test]
async fn superseded_claimer_cannot_write_terminal_states() {
    let (repository, clock) = clocked_repository();
    repository
        .submit_job(&JobSubmission::new(specs("thumbnail", 1)).expect("valid submission"))
        .await
        .expect("submit job");

    let batch = repository
        .claim_tasks(&claim("thumbnail", "agent-a", 1))
        .await
        .expect("claim");
    let task_id = batch[0].id();
    repository
        .mark_running(task_id, &node("agent-a"))
        .await
        .expect("mark running");

    clock.advance(Duration::seconds(61));
    let reclaimed = repository
        .claim_tasks(&claim("thumbnail", "agent-b", 1))
        .await
        .expect("reclaim");
    assert_eq!(reclaimed.len(), 1);

    let succeed = repository.mark_succeeded(task_id, &node("agent-a")).await;
    assert!(matches!(succeed, Err(QueueRepositoryError::LeaseLost(_))));

    let fail = repository
        .mark_failed(task_id, &node("agent-a"), "boom", &RetryPolicy::default())
        .await;
    assert!(matches!(fail, Err(QueueRepositoryError::LeaseLost(_))));

    // The rival's claim is untouched by the stale writes.
    let task = repository
        .find_task(task_id)
        .await
        .expect("find task")
        .expect("task exists");
    assert_eq!(task.status(), TaskStatus::Claimed);
    assert_eq!(task.claimed_by(), Some(&node("agent-b")));
}

#[tokio::test]
async fn renewing_an_unknown_task_reports_not_found() {
    let (repository, clock) = clocked_repository();
    let result = repository
        .renew_lease(
            foreman::queue::domain::TaskId::new(),
            &node("agent-a"),
            clock.utc() + Duration::seconds(60),
        )
        .await;
    assert!(matches!(result, Err(QueueRepositoryError::TaskNotFound(_))));
}
