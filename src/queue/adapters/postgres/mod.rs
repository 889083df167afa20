//! `PostgreSQL` adapters for queue persistence and claiming.

mod dsn;
mod models;
mod repository;
mod schema;

pub use dsn::mask_dsn;
pub use repository::{PostgresQueueRepository, QueuePgPool, create_pool};
