//! Error types for the procurement engine.
//!
//! Errors are layered the same way the engine is:
//!
//! - **ValidationError**: malformed input, rejected before any state is read
//! - **CommandError**: everything a command can fail with, including the
//!   integrity and state machine refusals raised while deciding
//! - **EventStoreError**: persistence failures reported by a store adapter
//! - **RepositoryError**: failures of the catalog, snapshot and availability
//!   repositories
//! - **ProjectionError**: failures while recomputing availability
//!
//! Every error is recoverable at the boundary of a single operation. The
//! executor retries the ones its `RetryPolicy` selects and surfaces the rest.
//!
//! # Example
//!
//! ```rust,ignore
//! match service.record_delivery(input).await {
//!     Ok(outcome) => show(outcome.status),
//!     Err(CommandError::Validation(err)) => ask_for_correction(&err),
//!     Err(CommandError::StoreUnavailable(_)) => {
//!         notify("failed to record delivery, please retry");
//!     }
//!     Err(other) => return Err(other),
//! }
//! ```

use crate::order::{OrderAction, OrderStatus};
use crate::types::{DeliveryId, DeliveryLineId, EventVersion, LineId, OrderId, StreamId};
use thiserror::Error;

/// Malformed input.
///
/// Raised while an input is being checked, before the order is read, so a
/// validation failure never changes state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// An order needs at least one line.
    #[error("Order must contain at least one line")]
    EmptyLines,

    /// Ordered quantities must be greater than zero.
    #[error("Line {line}: quantity must be greater than zero")]
    NonPositiveQuantity {
        /// Zero-based position of the offending line in the input
        line: usize,
    },

    /// Unit prices must be greater than zero.
    #[error("Line {line}: unit price must be greater than zero")]
    NonPositivePrice {
        /// Zero-based position of the offending line in the input
        line: usize,
    },

    /// A delivery cannot take stock away.
    #[error("Delivery line for {line_id} has negative quantity {quantity}")]
    NegativeDeliveryQuantity {
        /// The order line the delivery line points at
        line_id: LineId,
        /// The rejected quantity
        quantity: i64,
    },

    /// The same order line appears twice in one delivery.
    #[error("Delivery references line {0} more than once")]
    DuplicateDeliveryLine(LineId),

    /// `is_capitalised` was set without a capitalisation date.
    #[error("A capitalised delivery line requires a capitalisation date")]
    CapitalisedWithoutDate,

    /// A capitalisation date was supplied for a line that is not capitalised.
    #[error("A capitalisation date requires the line to be capitalised")]
    DateWithoutCapitalisation,

    /// A required text field was missing or blank.
    #[error("Field '{0}' is required")]
    MissingField(&'static str),

    /// A value could not be parsed into its domain type.
    #[error("Invalid {field}: {reason}")]
    InvalidValue {
        /// The field that failed to parse
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}

impl ValidationError {
    /// Wraps a smart constructor error for `field`.
    pub fn invalid(field: &'static str, error: impl std::fmt::Display) -> Self {
        Self::InvalidValue {
            field,
            reason: error.to_string(),
        }
    }
}

/// Errors that can occur while executing a command.
///
/// # Handling
///
/// - **Validation**: correct the input and resubmit
/// - **Integrity**: the input references something that does not exist on the
///   order; nothing was written
/// - **InvalidTransition**: the order's status does not allow the action
/// - **ConcurrencyConflict**: the order changed between read and write; the
///   executor re-reads and retries before surfacing this
/// - **StoreUnavailable**: the store could not be reached; local state was
///   discarded, retry later
#[derive(Debug, Clone, Error)]
pub enum CommandError {
    /// The command input was malformed.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The command referenced data inconsistent with the stored order.
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// The order's status machine refused the action.
    #[error("Cannot {action} an order in status {from}")]
    InvalidTransition {
        /// Status the order was in
        from: OrderStatus,
        /// The refused action
        action: OrderAction,
    },

    /// No order with this id has been created.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Optimistic concurrency control detected a conflicting update.
    #[error("Concurrency conflict on streams: {streams:?}")]
    ConcurrencyConflict {
        /// Streams whose guard failed
        streams: Vec<StreamId>,
    },

    /// The backing store could not be reached.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Any other event store failure.
    #[error("Event store error: {0}")]
    EventStore(EventStoreError),

    /// A command broke an engine invariant, such as writing an undeclared stream.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CommandError {
    /// A delivery line points at a line the order does not have.
    pub fn unknown_line(order_id: OrderId, line_id: LineId) -> Self {
        Self::Integrity(format!("order {order_id} has no line {line_id}"))
    }

    /// A finance update points at a delivery the order does not have.
    pub fn unknown_delivery(order_id: OrderId, delivery_id: DeliveryId) -> Self {
        Self::Integrity(format!("order {order_id} has no delivery {delivery_id}"))
    }

    /// A finance update points at a delivery line that does not exist.
    pub fn unknown_delivery_line(delivery_id: DeliveryId, line_id: DeliveryLineId) -> Self {
        Self::Integrity(format!("delivery {delivery_id} has no line {line_id}"))
    }
}

/// Errors reported by an event store adapter.
#[derive(Debug, Clone, Error)]
pub enum EventStoreError {
    /// No such stream.
    #[error("Stream '{0}' not found")]
    StreamNotFound(StreamId),

    /// A stream moved past the version the writer read.
    #[error(
        "Version conflict on stream '{stream}': expected {expected}, but current is {current}"
    )]
    VersionConflict {
        /// Stream whose guard failed
        stream: StreamId,
        /// Version the writer read
        expected: EventVersion,
        /// Version the stream is at now
        current: EventVersion,
    },

    /// Could not connect to the backend.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// An event could not be encoded.
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// A stored event could not be decoded.
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The backend did not answer in time.
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The backend is down or refusing writes.
    #[error("Event store unavailable: {0}")]
    Unavailable(String),

    /// A bug in a store adapter.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised by the catalog, snapshot and availability repositories.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    /// The repository could not be reached.
    #[error("Repository unavailable: {0}")]
    Unavailable(String),

    /// A record was rejected by the repository.
    #[error("Rejected record: {0}")]
    Rejected(String),
}

/// Errors raised while recomputing the availability set.
#[derive(Debug, Clone, Error)]
pub enum ProjectionError {
    /// Reading catalog or snapshot data failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Reading orders for demand netting failed.
    #[error("Order read failed: {0}")]
    Orders(#[from] CommandError),
}

/// Result of a command.
pub type CommandResult<T> = Result<T, CommandError>;

/// Result of a store call.
pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Type alias for repository results.
pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Result of a projection.
pub type ProjectionResult<T> = Result<T, ProjectionError>;

impl From<EventStoreError> for CommandError {
    fn from(err: EventStoreError) -> Self {
        match err {
            EventStoreError::VersionConflict { stream, .. } => Self::ConcurrencyConflict {
                streams: vec![stream],
            },
            EventStoreError::Unavailable(msg) | EventStoreError::ConnectionFailed(msg) => {
                Self::StoreUnavailable(msg)
            }
            EventStoreError::Timeout(after) => {
                Self::StoreUnavailable(format!("operation timed out after {after:?}"))
            }
            other => Self::EventStore(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_messages_are_descriptive() {
        insta::assert_snapshot!(
            ValidationError::EmptyLines,
            @"Order must contain at least one line"
        );
        insta::assert_snapshot!(
            ValidationError::NonPositiveQuantity { line: 2 },
            @"Line 2: quantity must be greater than zero"
        );
        insta::assert_snapshot!(
            ValidationError::CapitalisedWithoutDate,
            @"A capitalised delivery line requires a capitalisation date"
        );
        insta::assert_snapshot!(
            ValidationError::MissingField("docket_reference"),
            @"Field 'docket_reference' is required"
        );
    }

    #[test]
    fn invalid_transition_message_names_status_and_action() {
        let err = CommandError::InvalidTransition {
            from: OrderStatus::PendingApproval,
            action: OrderAction::Link,
        };
        insta::assert_snapshot!(
            err,
            @"Cannot link an order in status PENDING_APPROVAL"
        );
    }

    #[test]
    fn event_store_error_messages_are_descriptive() {
        let err = EventStoreError::VersionConflict {
            stream: StreamId::try_new("order-1").unwrap(),
            expected: EventVersion::try_new(5).unwrap(),
            current: EventVersion::try_new(7).unwrap(),
        };
        assert_eq!(
            err.to_string(),
            "Version conflict on stream 'order-1': expected 5, but current is 7"
        );
    }

    #[test]
    fn version_conflict_becomes_concurrency_conflict() {
        let stream_id = StreamId::try_new("order-1").unwrap();
        let command_err: CommandError = EventStoreError::VersionConflict {
            stream: stream_id.clone(),
            expected: EventVersion::try_new(1).unwrap(),
            current: EventVersion::try_new(2).unwrap(),
        }
        .into();

        match command_err {
            CommandError::ConcurrencyConflict { streams } => assert_eq!(streams, vec![stream_id]),
            other => panic!("Expected ConcurrencyConflict, got {other:?}"),
        }
    }

    #[test]
    fn transport_failures_become_store_unavailable() {
        let unavailable: CommandError = EventStoreError::Unavailable("down".to_string()).into();
        let connection: CommandError =
            EventStoreError::ConnectionFailed("refused".to_string()).into();
        let timeout: CommandError =
            EventStoreError::Timeout(std::time::Duration::from_secs(1)).into();

        assert!(matches!(unavailable, CommandError::StoreUnavailable(_)));
        assert!(matches!(connection, CommandError::StoreUnavailable(_)));
        assert!(matches!(timeout, CommandError::StoreUnavailable(_)));
    }

    #[test]
    fn other_store_errors_are_wrapped() {
        let command_err: CommandError =
            EventStoreError::SerializationFailed("bad payload".to_string()).into();
        assert!(matches!(
            command_err,
            CommandError::EventStore(EventStoreError::SerializationFailed(_))
        ));
    }

    #[test]
    fn validation_converts_into_command_error() {
        let err: CommandError = ValidationError::EmptyLines.into();
        assert_eq!(
            err.to_string(),
            "Validation failed: Order must contain at least one line"
        );
    }
}
