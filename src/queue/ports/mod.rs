//! Port contracts for queue coordination.
//!
//! Ports define infrastructure-agnostic interfaces used by queue services.

pub mod handler;
pub mod repository;

pub use handler::{HandlerFailure, TaskHandler};
pub use repository::{ClaimRequest, QueueRepository, QueueRepositoryError, QueueRepositoryResult};
