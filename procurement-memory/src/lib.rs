//! In-memory adapters for the procurement engine.
//!
//! Provides an in-memory implementation of the `EventStore` trait and of the
//! catalog, snapshot and availability repositories, for tests and
//! development where persistence is not required.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![allow(clippy::significant_drop_tightening)]

mod repositories;

pub use repositories::{
    InMemoryAvailabilityRepository, InMemoryCatalogRepository, InMemorySnapshotRepository,
};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use procurement::errors::{EventStoreError, EventStoreResult};
use procurement::event_store::{
    EventStore, ExpectedVersion, ReadOptions, StoredEvent, StreamData, StreamEvents,
};
use procurement::types::{EventVersion, StreamId, Timestamp};
use tracing::trace;

#[derive(Debug)]
struct Log<E> {
    // Every committed event, in commit order
    events: Vec<StoredEvent<E>>,
    versions: HashMap<StreamId, EventVersion>,
}

impl<E> Log<E> {
    fn version_of(&self, stream_id: &StreamId) -> EventVersion {
        self.versions
            .get(stream_id)
            .copied()
            .unwrap_or_else(EventVersion::initial)
    }
}

/// Thread-safe in-memory event store for testing.
///
/// Clones share the same storage.
#[derive(Debug)]
pub struct InMemoryEventStore<E> {
    log: Arc<RwLock<Log<E>>>,
}

impl<E> Clone for InMemoryEventStore<E> {
    fn clone(&self) -> Self {
        Self {
            log: Arc::clone(&self.log),
        }
    }
}

impl<E> InMemoryEventStore<E> {
    /// Create a new empty in-memory event store
    pub fn new() -> Self {
        Self {
            log: Arc::new(RwLock::new(Log {
                events: Vec::new(),
                versions: HashMap::new(),
            })),
        }
    }

    /// Number of events committed across all streams.
    pub fn event_count(&self) -> usize {
        self.log.read().events.len()
    }

    /// Current version of a stream, 0 if it has no events.
    pub fn stream_version(&self, stream_id: &StreamId) -> EventVersion {
        self.log.read().version_of(stream_id)
    }
}

impl<E> Default for InMemoryEventStore<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_expected<E>(log: &Log<E>, batch: &StreamEvents<E>) -> EventStoreResult<()> {
    let current = log.version_of(&batch.stream_id);
    let expected = match batch.expected_version {
        ExpectedVersion::Any => return Ok(()),
        ExpectedVersion::New => EventVersion::initial(),
        ExpectedVersion::Exact(expected) => expected,
    };
    if current == expected {
        Ok(())
    } else {
        Err(EventStoreError::VersionConflict {
            stream: batch.stream_id.clone(),
            expected,
            current,
        })
    }
}

#[async_trait]
impl<E> EventStore for InMemoryEventStore<E>
where
    E: Send + Sync + Clone + 'static,
{
    type Event = E;

    async fn read_streams(
        &self,
        stream_ids: &[StreamId],
        options: &ReadOptions,
    ) -> EventStoreResult<StreamData<Self::Event>> {
        let log = self.log.read();

        let stream_versions: HashMap<StreamId, EventVersion> = stream_ids
            .iter()
            .map(|stream_id| (stream_id.clone(), log.version_of(stream_id)))
            .collect();

        let events: Vec<StoredEvent<E>> = log
            .events
            .iter()
            .filter(|event| stream_versions.contains_key(&event.stream_id))
            .filter(|event| {
                options
                    .after_version
                    .map_or(true, |after| event.event_version > after)
            })
            .cloned()
            .collect();

        Ok(StreamData::new(events, stream_versions))
    }

    async fn write_events_multi(
        &self,
        stream_events: Vec<StreamEvents<Self::Event>>,
    ) -> EventStoreResult<HashMap<StreamId, EventVersion>> {
        let mut log = self.log.write();

        // Verify every guard before writing anything
        for batch in &stream_events {
            check_expected(&log, batch)?;
        }

        let timestamp = Timestamp::now();
        let mut new_versions = HashMap::new();
        for batch in stream_events {
            let mut version = log.version_of(&batch.stream_id);
            for event in batch.events {
                version = version.next();
                log.events.push(StoredEvent::new(
                    event.event_id,
                    batch.stream_id.clone(),
                    version,
                    timestamp,
                    event.payload,
                    event.metadata,
                ));
            }
            trace!(stream = %batch.stream_id, version = %version, "Stream advanced");
            log.versions.insert(batch.stream_id.clone(), version);
            new_versions.insert(batch.stream_id, version);
        }

        Ok(new_versions)
    }
}
