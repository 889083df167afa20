//! In-memory queue adapter for tests and embedded deployments.

mod queue;

pub use queue::InMemoryQueueRepository;
