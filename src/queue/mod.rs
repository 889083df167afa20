//! Datastore-coordinated task queue.
//!
//! Jobs are submitted as ordered lists of tasks. Agents claim runnable tasks
//! with a bounded lease, renew the lease while executing, and report terminal
//! outcomes; expired leases make tasks reclaimable by other agents. The module
//! follows hexagonal architecture:
//!
//! - Domain types in [`domain`]
//! - Port contracts in [`ports`]
//! - Adapter implementations in [`adapters`]
//! - Orchestration services in [`services`]

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod services;

#[cfg(test)]
mod tests;
