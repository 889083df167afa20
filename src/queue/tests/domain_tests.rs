//! Domain-focused tests for identifiers, submissions, and status parsing.

use crate::queue::domain::{
    JobId, JobStatus, JobSubmission, JobTask, NodeId, QueueDomainError, SequenceNumber,
    ServiceName, TaskSpec, TaskStatus,
};
use mockable::DefaultClock;
use rstest::{fixture, rstest};
use serde_json::json;

#[fixture]
fn clock() -> DefaultClock {
    DefaultClock
}

#[rstest]
fn service_name_accepts_and_trims_valid_values() {
    let service = ServiceName::new("  image-resize  ").expect("valid service name");
    assert_eq!(service.as_str(), "image-resize");
}

#[rstest]
#[case("")]
#[case("   ")]
fn service_name_rejects_blank_values(#[case] raw: &str) {
    let result = ServiceName::new(raw);
    assert_eq!(
        result,
        Err(QueueDomainError::InvalidServiceName(raw.to_owned()))
    );
}

#[rstest]
fn service_name_rejects_overlong_values() {
    let raw = "s".repeat(256);
    let result = ServiceName::new(raw.clone());
    assert_eq!(result, Err(QueueDomainError::InvalidServiceName(raw)));
}

#[rstest]
fn node_id_rejects_blank_values() {
    let result = NodeId::new("   ");
    assert_eq!(result, Err(QueueDomainError::InvalidNodeId("   ".to_owned())));
}

#[rstest]
fn job_submission_rejects_empty_task_list() {
    let result = JobSubmission::new(Vec::new());
    assert_eq!(result, Err(QueueDomainError::EmptyTaskList));
}

#[rstest]
fn job_submission_preserves_task_order_and_metadata() {
    let first = ServiceName::new("thumbnail").expect("valid service name");
    let second = ServiceName::new("notify").expect("valid service name");
    let submission = JobSubmission::new(vec![
        TaskSpec::new(first.clone()).with_payload(json!({"width": 320})),
        TaskSpec::new(second.clone()),
    ])
    .expect("valid submission")
    .with_metadata(json!({"source": "upload"}));

    assert_eq!(submission.tasks().len(), 2);
    assert_eq!(submission.tasks()[0].service(), &first);
    assert_eq!(submission.tasks()[0].payload(), Some(&json!({"width": 320})));
    assert_eq!(submission.tasks()[1].service(), &second);
    assert_eq!(submission.tasks()[1].payload(), None);
    assert_eq!(submission.metadata(), Some(&json!({"source": "upload"})));
}

#[rstest]
fn task_from_spec_starts_pending_with_zero_attempts(clock: DefaultClock) {
    let service = ServiceName::new("thumbnail").expect("valid service name");
    let spec = TaskSpec::new(service.clone()).with_payload(json!({"key": "object"}));
    let job_id = JobId::new();

    let task = JobTask::from_spec(job_id, &spec, SequenceNumber::new(7), &clock);

    assert_eq!(task.job_id(), job_id);
    assert_eq!(task.service(), &service);
    assert_eq!(task.sequence(), SequenceNumber::new(7));
    assert_eq!(task.status(), TaskStatus::Pending);
    assert_eq!(task.payload(), Some(&json!({"key": "object"})));
    assert_eq!(task.claimed_by(), None);
    assert_eq!(task.lease_expires_at(), None);
    assert_eq!(task.not_before(), None);
    assert_eq!(task.attempts(), 0);
    assert_eq!(task.last_error(), None);
    assert_eq!(task.created_at(), task.updated_at());
}

#[rstest]
#[case("pending", TaskStatus::Pending)]
#[case("claimed", TaskStatus::Claimed)]
#[case("RUNNING", TaskStatus::Running)]
#[case(" succeeded ", TaskStatus::Succeeded)]
#[case("failed", TaskStatus::Failed)]
#[case("dead", TaskStatus::Dead)]
fn task_status_parses_storage_values(#[case] raw: &str, #[case] expected: TaskStatus) {
    assert_eq!(TaskStatus::try_from(raw), Ok(expected));
}

#[rstest]
fn task_status_rejects_unknown_values() {
    let result = TaskStatus::try_from("paused");
    assert!(result.is_err());
}

#[rstest]
fn task_status_round_trips_through_as_str() {
    for status in [
        TaskStatus::Pending,
        TaskStatus::Claimed,
        TaskStatus::Running,
        TaskStatus::Succeeded,
        TaskStatus::Failed,
        TaskStatus::Dead,
    ] {
        assert_eq!(TaskStatus::try_from(status.as_str()), Ok(status));
    }
}

#[rstest]
#[case(vec![], JobStatus::Pending)]
#[case(vec![TaskStatus::Pending, TaskStatus::Pending], JobStatus::Pending)]
#[case(vec![TaskStatus::Pending, TaskStatus::Claimed], JobStatus::Running)]
#[case(vec![TaskStatus::Running, TaskStatus::Succeeded], JobStatus::Running)]
#[case(vec![TaskStatus::Succeeded, TaskStatus::Pending], JobStatus::Running)]
#[case(vec![TaskStatus::Succeeded, TaskStatus::Succeeded], JobStatus::Succeeded)]
#[case(vec![TaskStatus::Succeeded, TaskStatus::Dead], JobStatus::Failed)]
#[case(vec![TaskStatus::Pending, TaskStatus::Dead], JobStatus::Failed)]
#[case(vec![TaskStatus::Failed, TaskStatus::Pending], JobStatus::Running)]
fn job_status_derivation_follows_aggregate_rules(
    #[case] statuses: Vec<TaskStatus>,
    #[case] expected: JobStatus,
) {
    assert_eq!(JobStatus::derive(statuses), expected);
}

#[rstest]
#[case(JobStatus::Pending, false)]
#[case(JobStatus::Running, false)]
#[case(JobStatus::Succeeded, true)]
#[case(JobStatus::Failed, true)]
fn job_status_terminality(#[case] status: JobStatus, #[case] expected: bool) {
    assert_eq!(status.is_terminal(), expected);
}

#[rstest]
fn job_status_parses_storage_values() {
    assert_eq!(JobStatus::try_from("running"), Ok(JobStatus::Running));
    assert!(JobStatus::try_from("claimed").is_err());
}
