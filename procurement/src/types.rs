//! Core types for the procurement engine.
//!
//! Everything here uses smart constructors so that a value which exists is a
//! value which is valid. Raw strings and numbers coming from callers are parsed
//! into these types at the boundary; the engine never re-validates them.

use chrono::{DateTime, Utc};
use nutype::nutype;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stream identifier that uniquely identifies an event stream.
///
/// `StreamId` values are guaranteed to be non-empty and at most 255 characters.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 255),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct StreamId(String);

/// A globally unique event identifier using UUIDv7 format.
#[nutype(
    validate(predicate = |id: &Uuid| id.get_version() == Some(uuid::Version::SortRand)),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Deref,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new `EventId` with the current timestamp.
    pub fn new() -> Self {
        Self::try_new(Uuid::now_v7()).expect("Uuid::now_v7() should always return a valid v7 UUID")
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// The version of a stream after a given event.
///
/// A stream that has never been written is at version 0; the first event
/// written moves it to 1.
#[nutype(
    validate(greater_or_equal = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct EventVersion(u64);

impl EventVersion {
    /// The version of a stream with no events.
    pub fn initial() -> Self {
        Self::try_new(0).expect("0 is always a valid version")
    }

    /// Returns the next version after this one.
    #[must_use]
    pub fn next(self) -> Self {
        let current: u64 = self.into();
        Self::try_new(current + 1).expect("next version should always be valid")
    }
}

/// The moment an event was committed to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a new timestamp from a UTC `DateTime`.
    pub const fn new(datetime: DateTime<Utc>) -> Self {
        Self(datetime)
    }

    /// Creates a timestamp representing the current moment.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Returns the underlying `DateTime`.
    pub const fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(datetime: DateTime<Utc>) -> Self {
        Self::new(datetime)
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Identity of a procurement order.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct OrderId(Uuid);

impl OrderId {
    /// Generates a new time-ordered order id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Identity of a line within an order. Immutable after creation.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct LineId(Uuid);

impl LineId {
    /// Generates a new line id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Identity of a delivery. Supplied by the receiver so that a resubmitted
/// delivery can be recognised.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct DeliveryId(Uuid);

impl DeliveryId {
    /// Generates a new delivery id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Identity of a single line within a delivery.
#[nutype(derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    AsRef,
    Display,
    Serialize,
    Deserialize
))]
pub struct DeliveryLineId(Uuid);

impl DeliveryLineId {
    /// Generates a new delivery line id.
    pub fn generate() -> Self {
        Self::new(Uuid::now_v7())
    }
}

/// Internal catalog product identifier.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ProductId(String);

/// Supplier identifier.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SupplierId(String);

/// A supplier's own stock keeping unit code.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SupplierSku(String);

/// Delivery site the order is raised for.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct SiteId(String);

/// Name of a person acting on an order: requester, approver, receiver, admin.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 200),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ActorName(String);

/// Reference of the order in the external procurement system.
///
/// Surrounding whitespace is trimmed before validation, so a blank reference
/// can never be constructed.
#[nutype(
    sanitize(trim),
    validate(not_empty, len_char_max = 100),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct ExternalReference(String);

/// Human readable order reference such as `PO-000042`.
#[nutype(
    validate(not_empty),
    derive(
        Debug,
        Clone,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        AsRef,
        Display,
        Serialize,
        Deserialize
    )
)]
pub struct DisplayId(String);

impl DisplayId {
    /// Builds the display id for the `sequence`-th registered order.
    pub fn from_sequence(sequence: u64) -> Self {
        Self::try_new(format!("PO-{sequence:06}")).expect("formatted display id is never empty")
    }
}

/// Ordered quantity of a line. Always strictly positive.
#[nutype(
    validate(greater = 0),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct OrderedQuantity(u64);

/// Unit price of a line. Always strictly positive.
#[nutype(
    validate(predicate = |price: &Decimal| *price > Decimal::ZERO),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct UnitPrice(Decimal);

/// Conversion from a supplier pack to internal units. Never zero.
#[nutype(
    validate(greater = 0),
    default = 1,
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Hash,
        Display,
        Into,
        Default,
        Serialize,
        Deserialize
    )
)]
pub struct PackConversionFactor(u32);
