//! Foreman: a datastore-coordinated distributed task queue.
//!
//! A builder process submits jobs made of ordered tasks; agent processes
//! claim runnable tasks under a time-bounded lease, execute them, and report
//! back. The datastore is the only coordination point, so agents need no
//! membership protocol: an agent that dies simply stops renewing its leases
//! and its tasks become claimable again.
//!
//! # Architecture
//!
//! Foreman follows hexagonal architecture principles:
//!
//! - **Domain**: Pure business logic with no infrastructure dependencies
//! - **Ports**: Abstract trait interfaces for external interactions
//! - **Adapters**: Concrete implementations of ports (PostgreSQL, in-memory)
//!
//! # Modules
//!
//! - [`queue`]: Job submission, task claiming, leases, and retry handling

pub mod queue;
