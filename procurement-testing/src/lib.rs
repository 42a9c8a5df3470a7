//! Test support for the procurement engine.
//!
//! - [`chaos`]: an event store wrapper that injects conflicts and outages
//! - [`contract`]: the behaviour every event store adapter must show
//! - [`fixtures`]: an in-memory engine wired up for scenario tests

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod contract;
pub mod fixtures;

pub use chaos::{ChaosConfig, ChaosEventStore, ChaosEventStoreExt, Probability};
pub use fixtures::{actor, approver, date, MemoryOrderService, World};
