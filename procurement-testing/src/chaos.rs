//! Fault injection around an event store.
//!
//! [`ChaosEventStore`] wraps any store and, with configurable probability,
//! refuses writes with a version conflict or fails an operation as if the
//! store were unreachable. Useful for checking that the retrying executor
//! converges and that a failed command leaves no partial writes.

use std::collections::HashMap;

use async_trait::async_trait;
use nutype::nutype;
use parking_lot::Mutex;
use procurement::errors::{EventStoreError, EventStoreResult};
use procurement::event_store::{EventStore, ExpectedVersion, ReadOptions, StreamData, StreamEvents};
use procurement::types::{EventVersion, StreamId};
use rand::{random, rngs::StdRng, Rng, SeedableRng};
use tracing::debug;

/// Probability in `[0.0, 1.0]` of injecting a fault.
///
/// ```
/// use procurement_testing::chaos::Probability;
///
/// assert!(Probability::try_new(0.5).is_ok());
/// assert!(Probability::try_new(1.5).is_err());
/// assert!(Probability::try_new(-0.1).is_err());
/// assert!(Probability::try_new(f32::NAN).is_err());
/// ```
#[nutype(
    validate(finite, greater_or_equal = 0.0, less_or_equal = 1.0),
    default = 0.0,
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Display, Default, Into)
)]
pub struct Probability(f32);

impl Probability {
    fn clamped(value: f32) -> Self {
        // clamp passes NaN through; the finite check turns it into the default
        Self::try_new(value.clamp(0.0, 1.0)).unwrap_or_default()
    }
}

/// What to inject and how often.
#[derive(Debug, Clone, Default)]
pub struct ChaosConfig {
    deterministic_seed: Option<u64>,
    failure_probability: Probability,
    version_conflict_probability: Probability,
}

impl ChaosConfig {
    /// A configuration whose random choices repeat from run to run.
    pub fn deterministic() -> Self {
        Self::seeded(0)
    }

    /// A configuration seeded with `seed`.
    pub fn seeded(seed: u64) -> Self {
        Self {
            deterministic_seed: Some(seed),
            ..Self::default()
        }
    }

    /// Chance that a read or write fails as if the store were unreachable.
    #[must_use]
    pub fn with_failure_probability(mut self, probability: f32) -> Self {
        self.failure_probability = Probability::clamped(probability);
        self
    }

    /// Chance that a write is refused with a version conflict.
    #[must_use]
    pub fn with_version_conflict_probability(mut self, probability: f32) -> Self {
        self.version_conflict_probability = Probability::clamped(probability);
        self
    }
}

/// Wraps a store with [`ChaosEventStore`].
pub trait ChaosEventStoreExt: Sized {
    /// Wraps `self` so faults are injected per `config`.
    fn with_chaos(self, config: ChaosConfig) -> ChaosEventStore<Self>;
}

/// An event store that injects faults before delegating.
#[derive(Debug)]
pub struct ChaosEventStore<S> {
    store: S,
    config: ChaosConfig,
    rng: Mutex<StdRng>,
}

impl<S> ChaosEventStore<S> {
    /// Wraps `store`.
    pub fn new(store: S, config: ChaosConfig) -> Self {
        let rng = match config.deterministic_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::seed_from_u64(random()),
        };

        Self {
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    /// The wrapped store.
    pub const fn inner(&self) -> &S {
        &self.store
    }

    fn should_inject(&self, probability: Probability) -> bool {
        let probability: f32 = probability.into();

        if probability <= 0.0 {
            return false;
        }

        if probability >= 1.0 {
            return true;
        }

        self.rng.lock().random_bool(f64::from(probability))
    }
}

fn injected_conflict<E>(batch: &StreamEvents<E>) -> EventStoreError {
    let expected = match batch.expected_version {
        ExpectedVersion::Exact(version) => version,
        ExpectedVersion::New | ExpectedVersion::Any => EventVersion::initial(),
    };
    EventStoreError::VersionConflict {
        stream: batch.stream_id.clone(),
        expected,
        current: expected.next(),
    }
}

#[async_trait]
impl<S> EventStore for ChaosEventStore<S>
where
    S: EventStore,
{
    type Event = S::Event;

    async fn read_streams(
        &self,
        stream_ids: &[StreamId],
        options: &ReadOptions,
    ) -> EventStoreResult<StreamData<Self::Event>> {
        if self.should_inject(self.config.failure_probability) {
            debug!("Injecting read failure");
            return Err(EventStoreError::Unavailable("injected read failure".to_string()));
        }

        self.store.read_streams(stream_ids, options).await
    }

    async fn write_events_multi(
        &self,
        stream_events: Vec<StreamEvents<Self::Event>>,
    ) -> EventStoreResult<HashMap<StreamId, EventVersion>> {
        if let Some(first) = stream_events.first() {
            if self.should_inject(self.config.version_conflict_probability) {
                debug!(stream = %first.stream_id, "Injecting version conflict");
                return Err(injected_conflict(first));
            }
        }

        if self.should_inject(self.config.failure_probability) {
            debug!("Injecting write failure");
            return Err(EventStoreError::Unavailable("injected write failure".to_string()));
        }

        self.store.write_events_multi(stream_events).await
    }
}

impl<S> ChaosEventStoreExt for S
where
    S: EventStore,
{
    fn with_chaos(self, config: ChaosConfig) -> ChaosEventStore<Self> {
        ChaosEventStore::new(self, config)
    }
}
