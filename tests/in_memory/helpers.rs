//! Shared fixtures for in-memory repository tests.

#![expect(
    clippy::expect_used,
    reason = "Test code uses expect for assertion clarity"
)]

use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use foreman::queue::adapters::memory::InMemoryQueueRepository;
use foreman::queue::domain::{NodeId, ServiceName, TaskSpec};
use foreman::queue::ports::ClaimRequest;
use mockable::Clock;
use std::sync::{Arc, RwLock};
use std::time::Duration as StdDuration;

/// Clock returning a programmable instant, letting tests drive lease expiry
/// and backoff windows deterministically.
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Moves the clock forward by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.write().expect("clock lock");
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.read().expect("clock lock")
    }
}

/// A stable instant for tests that need an absolute origin.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0)
        .single()
        .expect("valid timestamp")
}

/// Repository wired to a [`FixedClock`] starting at [`epoch`].
pub fn clocked_repository() -> (Arc<InMemoryQueueRepository>, Arc<FixedClock>) {
    let clock = Arc::new(FixedClock::new(epoch()));
    let repository = Arc::new(InMemoryQueueRepository::with_clock(clock.clone()));
    (repository, clock)
}

pub fn service(name: &str) -> ServiceName {
    ServiceName::new(name).expect("valid service name")
}

pub fn node(name: &str) -> NodeId {
    NodeId::new(name).expect("valid node id")
}

/// `count` specs for `service_name`, payloads carrying their position.
pub fn specs(service_name: &str, count: usize) -> Vec<TaskSpec> {
    (0..count)
        .map(|position| {
            TaskSpec::new(service(service_name))
                .with_payload(serde_json::json!({ "position": position }))
        })
        .collect()
}

/// Claim request with a 60 second lease.
pub fn claim(service_name: &str, node_name: &str, limit: u32) -> ClaimRequest {
    ClaimRequest::new(
        service(service_name),
        node(node_name),
        limit,
        StdDuration::from_secs(60),
    )
    .expect("valid claim request")
}
