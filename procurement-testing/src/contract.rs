//! Behavioural contract every `EventStore` adapter must satisfy.
//!
//! Run the whole suite against an adapter with
//! [`event_store_contract_tests!`](crate::event_store_contract_tests).

use std::fmt;

use procurement::errors::EventStoreError;
use procurement::event_store::{
    EventStore, EventToWrite, ExpectedVersion, ReadOptions, StreamEvents,
};
use procurement::types::{EventId, EventVersion, StreamId};
use uuid::Uuid;

/// A contract scenario that did not hold.
#[derive(Debug)]
pub struct ContractTestFailure {
    scenario: &'static str,
    detail: String,
}

impl ContractTestFailure {
    fn store_error(scenario: &'static str, operation: &'static str, error: EventStoreError) -> Self {
        Self::assertion(
            scenario,
            format!("{operation} operation returned unexpected error: {error}"),
        )
    }

    fn assertion(scenario: &'static str, detail: impl Into<String>) -> Self {
        Self {
            scenario,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ContractTestFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.scenario, self.detail)
    }
}

impl std::error::Error for ContractTestFailure {}

/// Result of one contract scenario.
pub type ContractTestResult = Result<(), ContractTestFailure>;

/// Payload written by the contract scenarios.
pub type ContractEvent = String;

fn contract_stream_id(scenario: &'static str, label: &str) -> Result<StreamId, ContractTestFailure> {
    // Unique per run so scenarios can share a store
    let raw = format!("contract-{scenario}-{label}-{}", Uuid::now_v7());
    StreamId::try_new(raw.clone()).map_err(|error| {
        ContractTestFailure::assertion(scenario, format!("unable to construct stream id `{raw}`: {error}"))
    })
}

fn batch(stream_id: &StreamId, expected: ExpectedVersion, payload: &str) -> StreamEvents<ContractEvent> {
    StreamEvents::new(
        stream_id.clone(),
        expected,
        vec![EventToWrite::new(EventId::new(), payload.to_string())],
    )
}

fn version(scenario: &'static str, value: u64) -> Result<EventVersion, ContractTestFailure> {
    EventVersion::try_new(value)
        .map_err(|error| ContractTestFailure::assertion(scenario, error.to_string()))
}

async fn payloads<S>(
    scenario: &'static str,
    store: &S,
    streams: &[StreamId],
    options: &ReadOptions,
) -> Result<Vec<ContractEvent>, ContractTestFailure>
where
    S: EventStore<Event = ContractEvent>,
{
    let data = store
        .read_streams(streams, options)
        .await
        .map_err(|error| ContractTestFailure::store_error(scenario, "read_streams", error))?;
    Ok(data.events.into_iter().map(|event| event.payload).collect())
}

/// A written event can be read back, and the stream is at version 1.
pub async fn test_basic_read_write<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "basic_read_write";

    let store = make_store();
    let stream_id = contract_stream_id(SCENARIO, "single")?;

    let versions = store
        .write_events_multi(vec![batch(&stream_id, ExpectedVersion::New, "one")])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "write_events_multi", error))?;
    if versions.get(&stream_id) != Some(&version(SCENARIO, 1)?) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected stream at version 1 after first write, observed {versions:?}"),
        ));
    }

    let read = payloads(SCENARIO, &store, &[stream_id], &ReadOptions::new()).await?;
    if read != ["one"] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected exactly the written event, observed {read:?}"),
        ));
    }
    Ok(())
}

/// A second writer with a stale guard is refused.
pub async fn test_concurrent_version_conflicts<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "concurrent_version_conflicts";

    let store = make_store();
    let stream_id = contract_stream_id(SCENARIO, "shared")?;

    store
        .write_events_multi(vec![batch(&stream_id, ExpectedVersion::New, "first")])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "write_events_multi", error))?;

    match store
        .write_events_multi(vec![batch(&stream_id, ExpectedVersion::New, "second")])
        .await
    {
        Err(EventStoreError::VersionConflict { .. }) => Ok(()),
        Err(error) => Err(ContractTestFailure::store_error(
            SCENARIO,
            "write_events_multi",
            error,
        )),
        Ok(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "expected version conflict but write succeeded",
        )),
    }
}

/// Reading one stream never returns another stream's events.
pub async fn test_stream_isolation<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "stream_isolation";

    let store = make_store();
    let left = contract_stream_id(SCENARIO, "left")?;
    let right = contract_stream_id(SCENARIO, "right")?;

    store
        .write_events_multi(vec![
            batch(&left, ExpectedVersion::New, "left"),
            batch(&right, ExpectedVersion::New, "right"),
        ])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "write_events_multi", error))?;

    let read = payloads(SCENARIO, &store, &[left], &ReadOptions::new()).await?;
    if read != ["left"] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("left stream read foreign events: {read:?}"),
        ));
    }
    Ok(())
}

/// An untouched stream reads as empty at version 0.
pub async fn test_missing_stream_reads<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "missing_stream_reads";

    let store = make_store();
    let stream_id = contract_stream_id(SCENARIO, "ghost")?;

    let data = store
        .read_streams(&[stream_id.clone()], &ReadOptions::new())
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "read_streams", error))?;

    if !data.is_empty() || data.stream_version(&stream_id) != Some(EventVersion::initial()) {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            "expected an untouched stream to read empty at version 0",
        ));
    }
    Ok(())
}

/// A conflict on one stream of a multi-stream write writes nothing at all.
pub async fn test_conflict_preserves_atomicity<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "conflict_preserves_atomicity";

    let store = make_store();
    let left = contract_stream_id(SCENARIO, "left")?;
    let right = contract_stream_id(SCENARIO, "right")?;

    store
        .write_events_multi(vec![
            batch(&left, ExpectedVersion::New, "left-1"),
            batch(&right, ExpectedVersion::New, "right-1"),
        ])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "write_events_multi", error))?;

    // Right is current, left is stale
    let result = store
        .write_events_multi(vec![
            batch(&right, ExpectedVersion::Exact(version(SCENARIO, 1)?), "right-2"),
            batch(&left, ExpectedVersion::New, "left-2"),
        ])
        .await;

    match result {
        Err(EventStoreError::VersionConflict { .. }) => {
            let read = payloads(SCENARIO, &store, &[left, right], &ReadOptions::new()).await?;
            if read.len() == 2 {
                Ok(())
            } else {
                Err(ContractTestFailure::assertion(
                    SCENARIO,
                    format!("failed write left partial events behind: {read:?}"),
                ))
            }
        }
        Err(error) => Err(ContractTestFailure::store_error(
            SCENARIO,
            "write_events_multi",
            error,
        )),
        Ok(_) => Err(ContractTestFailure::assertion(
            SCENARIO,
            "expected version conflict but write succeeded",
        )),
    }
}

/// Events from several streams come back in the order they were committed.
pub async fn test_commit_order_across_streams<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "commit_order_across_streams";

    let store = make_store();
    let a = contract_stream_id(SCENARIO, "a")?;
    let b = contract_stream_id(SCENARIO, "b")?;

    let writes = [
        batch(&b, ExpectedVersion::New, "b1"),
        batch(&a, ExpectedVersion::New, "a1"),
        batch(&b, ExpectedVersion::Exact(version(SCENARIO, 1)?), "b2"),
        batch(&a, ExpectedVersion::Exact(version(SCENARIO, 1)?), "a2"),
    ];
    for write in writes {
        store
            .write_events_multi(vec![write])
            .await
            .map_err(|error| ContractTestFailure::store_error(SCENARIO, "write_events_multi", error))?;
    }

    let read = payloads(SCENARIO, &store, &[a, b], &ReadOptions::new()).await?;
    if read != ["b1", "a1", "b2", "a2"] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected commit order b1, a1, b2, a2; observed {read:?}"),
        ));
    }
    Ok(())
}

/// `after_version` skips events at or below the given version.
pub async fn test_read_after_version<F, S>(make_store: F) -> ContractTestResult
where
    F: Fn() -> S,
    S: EventStore<Event = ContractEvent>,
{
    const SCENARIO: &str = "read_after_version";

    let store = make_store();
    let stream_id = contract_stream_id(SCENARIO, "paged")?;
    let events = (1..=4)
        .map(|n| EventToWrite::new(EventId::new(), format!("e{n}")))
        .collect();
    store
        .write_events_multi(vec![StreamEvents::new(
            stream_id.clone(),
            ExpectedVersion::New,
            events,
        )])
        .await
        .map_err(|error| ContractTestFailure::store_error(SCENARIO, "write_events_multi", error))?;

    let options = ReadOptions::new().after_version(version(SCENARIO, 2)?);
    let read = payloads(SCENARIO, &store, &[stream_id], &options).await?;
    if read != ["e3", "e4"] {
        return Err(ContractTestFailure::assertion(
            SCENARIO,
            format!("expected e3, e4 after version 2; observed {read:?}"),
        ));
    }
    Ok(())
}

/// Generates a test module running every contract scenario against the
/// store produced by `make_store`.
#[macro_export]
macro_rules! event_store_contract_tests {
    (suite = $suite:ident, make_store = $make_store:expr $(,)?) => {
        #[allow(non_snake_case)]
        mod $suite {
            use $crate::contract::{
                test_basic_read_write, test_commit_order_across_streams,
                test_concurrent_version_conflicts, test_conflict_preserves_atomicity,
                test_missing_stream_reads, test_read_after_version, test_stream_isolation,
            };

            #[tokio::test]
            async fn basic_read_write_contract() {
                test_basic_read_write($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test]
            async fn concurrent_version_conflicts_contract() {
                test_concurrent_version_conflicts($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test]
            async fn stream_isolation_contract() {
                test_stream_isolation($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test]
            async fn missing_stream_reads_contract() {
                test_missing_stream_reads($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test]
            async fn conflict_preserves_atomicity_contract() {
                test_conflict_preserves_atomicity($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test]
            async fn commit_order_across_streams_contract() {
                test_commit_order_across_streams($make_store)
                    .await
                    .expect("event store contract failed");
            }

            #[tokio::test]
            async fn read_after_version_contract() {
                test_read_after_version($make_store)
                    .await
                    .expect("event store contract failed");
            }
        }
    };
}
