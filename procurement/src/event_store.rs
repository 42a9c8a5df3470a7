//! Event store port.
//!
//! Orders are persisted only as events. This module defines the `EventStore`
//! trait the engine writes through, along with the data types that cross it.
//! A store must support atomic multi-stream writes guarded by an expected
//! version per stream; that guard is what serialises concurrent writers to
//! the same order.

use crate::errors::EventStoreResult;
use crate::types::{EventId, EventVersion, StreamId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Data returned when reading from one or more streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamData<E> {
    /// Events of every requested stream, interleaved in commit order
    pub events: Vec<StoredEvent<E>>,
    /// Version each requested stream was at when read
    pub stream_versions: HashMap<StreamId, EventVersion>,
}

impl<E> StreamData<E> {
    /// Pairs read events with the versions they were read at.
    pub const fn new(
        events: Vec<StoredEvent<E>>,
        stream_versions: HashMap<StreamId, EventVersion>,
    ) -> Self {
        Self {
            events,
            stream_versions,
        }
    }

    /// True when none of the requested streams has events yet.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Version `stream_id` was read at, if it was part of the read.
    pub fn stream_version(&self, stream_id: &StreamId) -> Option<EventVersion> {
        self.stream_versions.get(stream_id).copied()
    }
}

/// A committed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent<E> {
    /// Store-assigned id
    pub event_id: EventId,
    /// Stream it was appended to
    pub stream_id: StreamId,
    /// Stream version this event produced
    pub event_version: EventVersion,
    /// Commit time
    pub timestamp: Timestamp,
    /// Domain event
    pub payload: E,
    /// Who wrote it and under which operation
    pub metadata: Option<EventMetadata>,
}

impl<E> StoredEvent<E> {
    /// Assembles an event read back from storage.
    pub const fn new(
        event_id: EventId,
        stream_id: StreamId,
        event_version: EventVersion,
        timestamp: Timestamp,
        payload: E,
        metadata: Option<EventMetadata>,
    ) -> Self {
        Self {
            event_id,
            stream_id,
            event_version,
            timestamp,
            payload,
            metadata,
        }
    }
}

/// Audit data stamped on every event of one command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Shared by every event the execution wrote, across streams
    pub correlation_id: Option<String>,
    /// Actor the command ran for
    pub user_id: Option<String>,
}

impl EventMetadata {
    /// Empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tags events with the execution they came from.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: String) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Tags events with the acting user.
    #[must_use]
    pub fn with_user_id(mut self, user_id: String) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Read filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadOptions {
    /// Per-stream lower bound, exclusive; `None` reads whole streams
    pub after_version: Option<EventVersion>,
}

impl ReadOptions {
    /// Reads every event.
    pub const fn new() -> Self {
        Self {
            after_version: None,
        }
    }

    /// Skips events up to and including `version`.
    #[must_use]
    pub const fn after_version(mut self, version: EventVersion) -> Self {
        self.after_version = Some(version);
        self
    }
}

/// Write guard on a single stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Stream has no events
    New,
    /// Stream is at exactly this version
    Exact(EventVersion),
    /// Unguarded append
    Any,
}

impl ExpectedVersion {
    /// The guard to use when writing back to a stream last seen at `version`.
    pub fn from_read(version: EventVersion) -> Self {
        if version == EventVersion::initial() {
            Self::New
        } else {
            Self::Exact(version)
        }
    }
}

/// One stream's share of an atomic write.
#[derive(Debug, Clone)]
pub struct StreamEvents<E> {
    /// Target stream
    pub stream_id: StreamId,
    /// Guard checked before anything is appended
    pub expected_version: ExpectedVersion,
    /// Payloads in append order
    pub events: Vec<EventToWrite<E>>,
}

impl<E> StreamEvents<E> {
    /// Guarded batch for one stream.
    pub const fn new(
        stream_id: StreamId,
        expected_version: ExpectedVersion,
        events: Vec<EventToWrite<E>>,
    ) -> Self {
        Self {
            stream_id,
            expected_version,
            events,
        }
    }
}

/// An uncommitted event.
#[derive(Debug, Clone)]
pub struct EventToWrite<E> {
    /// Id assigned by the writer
    pub event_id: EventId,
    /// Domain event
    pub payload: E,
    /// Audit data, if any
    pub metadata: Option<EventMetadata>,
}

impl<E> EventToWrite<E> {
    /// An event without audit metadata.
    pub const fn new(event_id: EventId, payload: E) -> Self {
        Self {
            event_id,
            payload,
            metadata: None,
        }
    }

    /// An event carrying audit metadata.
    pub const fn with_metadata(event_id: EventId, payload: E, metadata: EventMetadata) -> Self {
        Self {
            event_id,
            payload,
            metadata: Some(metadata),
        }
    }
}

/// The event store port.
///
/// Implementations must make `write_events_multi` all-or-nothing: if any
/// stream's expected version does not match, nothing is written.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// The event type this store handles.
    type Event: Send + Sync;

    /// Reads several streams in one consistent view.
    ///
    /// Every requested stream appears in `stream_versions`, at version 0 if
    /// it has no events.
    async fn read_streams(
        &self,
        stream_ids: &[StreamId],
        options: &ReadOptions,
    ) -> EventStoreResult<StreamData<Self::Event>>;

    /// Applies every batch or none of them, returning each stream's new
    /// version.
    ///
    /// # Errors
    ///
    /// `VersionConflict` when any guard fails, `Unavailable` when the
    /// backend cannot be reached.
    async fn write_events_multi(
        &self,
        stream_events: Vec<StreamEvents<Self::Event>>,
    ) -> EventStoreResult<HashMap<StreamId, EventVersion>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stored(stream: &str, version: u64, payload: &str) -> StoredEvent<String> {
        StoredEvent::new(
            EventId::new(),
            StreamId::try_new(stream).unwrap(),
            EventVersion::try_new(version).unwrap(),
            Timestamp::now(),
            payload.to_string(),
            None,
        )
    }

    #[test]
    fn stream_version_only_covers_streams_that_were_read() {
        let order = StreamId::try_new("order-1").unwrap();
        let data = StreamData::new(
            vec![stored("order-1", 1, "created")],
            HashMap::from([(order.clone(), EventVersion::try_new(1).unwrap())]),
        );

        assert!(!data.is_empty());
        assert_eq!(data.stream_version(&order), EventVersion::try_new(1).ok());
        assert_eq!(
            data.stream_version(&StreamId::try_new("order-2").unwrap()),
            None
        );
    }

    #[test]
    fn expected_version_from_read_uses_new_for_empty_streams() {
        assert_eq!(
            ExpectedVersion::from_read(EventVersion::initial()),
            ExpectedVersion::New
        );
        let three = EventVersion::try_new(3).unwrap();
        assert_eq!(
            ExpectedVersion::from_read(three),
            ExpectedVersion::Exact(three)
        );
    }

    #[test]
    fn event_metadata_builder() {
        let metadata = EventMetadata::new()
            .with_correlation_id("corr-1".to_string())
            .with_user_id("alice".to_string());
        assert_eq!(metadata.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(metadata.user_id.as_deref(), Some("alice"));
    }
}
