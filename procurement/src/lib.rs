//! Event-sourced procurement order engine.
//!
//! Orders move through a closed status machine from draft to receipt. Every
//! change is an event on the order's stream, and an order's current state,
//! including received quantities and variance status, is always recomputed
//! from those events. Commands read the streams they need, decide new events,
//! and write them atomically under optimistic concurrency; conflicts are
//! retried from a fresh read.
//!
//! Alongside orders, the crate projects product availability: supplier stock
//! snapshots netted against demand from open orders, converted into
//! orderable quantities.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod availability;
pub mod catalog;
pub mod command;
pub mod errors;
pub mod event_store;
pub mod executor;
pub mod finance;
pub mod order;
pub mod reconciliation;
pub mod service;
pub mod snapshot;
pub mod state_reconstruction;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{Command, CommandResult};
pub use errors::{
    CommandError, EventStoreError, ProjectionError, RepositoryError, ValidationError,
};
pub use event_store::{
    EventMetadata, EventStore, EventToWrite, ExpectedVersion, ReadOptions, StoredEvent,
    StreamData, StreamEvents,
};
pub use executor::config::{EngineConfig, ValidatedRetryConfig};
pub use executor::{CommandExecutor, ExecutionContext, ExecutionResult, RetryConfig, RetryPolicy};
pub use order::{Order, OrderStatus, ProcurementEvent};
pub use service::{DeliveryReceipt, OrderReader, OrderService};
pub use types::{EventId, EventVersion, StreamId, Timestamp};
