//! Command execution with optimistic concurrency and retry.
//!
//! The executor runs the read → fold → decide → write pipeline for a
//! [`Command`]. Every stream the command writes is guarded by the version
//! observed when it was read, so two writers racing on the same order cannot
//! both succeed. The loser gets a `ConcurrencyConflict`, and the retry loop
//! discards everything it computed and starts again from a fresh read.

pub mod config;

use crate::command::{Command, CommandResult};
use crate::errors::CommandError;
use crate::event_store::{
    EventMetadata, EventStore, EventToWrite, ExpectedVersion, ReadOptions, StreamEvents,
};
use crate::state_reconstruction::reconstruct_state;
use crate::types::{EventId, EventVersion, StreamId};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

pub use config::{EngineConfig, RetryPolicyKind, ValidatedRetryConfig};

/// Configuration for command execution retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Base delay between retry attempts.
    pub base_delay: Duration,
    /// Maximum delay between retry attempts (for exponential backoff).
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

/// Policy defining which errors should trigger a retry.
#[derive(Debug, Clone, Default)]
pub enum RetryPolicy {
    /// Only retry on concurrency conflicts.
    #[default]
    ConcurrencyConflictsOnly,
    /// Retry on concurrency conflicts and on an unreachable store.
    ConcurrencyAndTransient,
    /// Custom policy with user-defined predicate.
    Custom(fn(&CommandError) -> bool),
}

impl RetryPolicy {
    /// Determines if an error should trigger a retry.
    pub fn should_retry(&self, error: &CommandError) -> bool {
        match self {
            Self::ConcurrencyConflictsOnly => {
                matches!(error, CommandError::ConcurrencyConflict { .. })
            }
            Self::ConcurrencyAndTransient => matches!(
                error,
                CommandError::ConcurrencyConflict { .. } | CommandError::StoreUnavailable(_)
            ),
            Self::Custom(predicate) => predicate(error),
        }
    }
}

/// Who is executing a command, and under which correlation id.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Correlation ID stamped on every event the command writes.
    pub correlation_id: String,
    /// User ID for auditing.
    pub user_id: Option<String>,
}

impl ExecutionContext {
    /// A context for `user_id` with a fresh correlation id.
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::default()
        }
    }

    fn metadata(&self) -> EventMetadata {
        let metadata = EventMetadata::new().with_correlation_id(self.correlation_id.clone());
        match &self.user_id {
            Some(user) => metadata.with_user_id(user.clone()),
            None => metadata,
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            correlation_id: uuid::Uuid::now_v7().to_string(),
            user_id: None,
        }
    }
}

/// What a successful execution wrote.
#[derive(Debug, Clone)]
pub struct ExecutionResult<E> {
    /// The version of every stream written to.
    pub stream_versions: HashMap<StreamId, EventVersion>,
    /// The events appended, in the order the command produced them.
    pub events: Vec<(StreamId, E)>,
}

impl<E> ExecutionResult<E> {
    /// Whether the command decided there was nothing to do.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }
}

/// Command executor responsible for orchestrating command execution.
///
/// # Example
///
/// ```rust,ignore
/// let executor = CommandExecutor::new(event_store)
///     .with_retry_config(RetryConfig::default())
///     .with_retry_policy(RetryPolicy::ConcurrencyAndTransient);
///
/// executor
///     .execute_with_retry(&RecordDelivery, input, ExecutionContext::for_user("dock-2"))
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct CommandExecutor<ES> {
    event_store: ES,
    retry_config: RetryConfig,
    retry_policy: RetryPolicy,
}

impl<ES> CommandExecutor<ES>
where
    ES: EventStore,
{
    /// Creates a new command executor with default retry configuration.
    pub fn new(event_store: ES) -> Self {
        Self {
            event_store,
            retry_config: RetryConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Builds an executor from validated engine configuration.
    pub fn from_config(event_store: ES, config: &EngineConfig) -> Self {
        Self::new(event_store)
            .with_retry_config(config.retry.to_retry_config())
            .with_retry_policy(config.retry_policy.into())
    }

    /// Sets the retry configuration for this executor.
    #[must_use]
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Sets the retry policy for this executor.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// The underlying event store.
    pub const fn event_store(&self) -> &ES {
        &self.event_store
    }

    /// Executes a command once, without retrying.
    ///
    /// 1. Reads the streams named by `command.read_streams()`
    /// 2. Folds them into fresh state with `command.apply()`
    /// 3. Decides new events with `command.handle()`
    /// 4. Writes them atomically, each stream guarded by the version read in step 1
    ///
    /// Nothing is written if `handle` fails or returns no events.
    #[instrument(skip_all, fields(command = command.name(), correlation_id = %context.correlation_id))]
    pub async fn execute<C>(
        &self,
        command: &C,
        input: C::Input,
        context: &ExecutionContext,
    ) -> CommandResult<ExecutionResult<C::Event>>
    where
        C: Command<Event = ES::Event>,
        C::Event: Clone,
    {
        let streams = command.read_streams(&input);
        let stream_data = self
            .event_store
            .read_streams(&streams, &ReadOptions::new())
            .await?;
        debug!(
            streams = streams.len(),
            events = stream_data.events.len(),
            "Read command streams"
        );

        let state = reconstruct_state(command, &stream_data);
        let produced = command.handle(state, input).await?;

        if produced.is_empty() {
            debug!("Command produced no events");
            return Ok(ExecutionResult {
                stream_versions: HashMap::new(),
                events: produced,
            });
        }

        let metadata = context.metadata();
        let mut batches: Vec<StreamEvents<C::Event>> = Vec::new();
        for (stream_id, event) in &produced {
            if !streams.contains(stream_id) {
                return Err(CommandError::Internal(format!(
                    "{} wrote to undeclared stream {stream_id}",
                    command.name()
                )));
            }
            let to_write = EventToWrite::with_metadata(EventId::new(), event.clone(), metadata.clone());
            match batches.iter_mut().find(|b| &b.stream_id == stream_id) {
                Some(batch) => batch.events.push(to_write),
                None => {
                    let read_version = stream_data
                        .stream_version(stream_id)
                        .unwrap_or_else(EventVersion::initial);
                    batches.push(StreamEvents::new(
                        stream_id.clone(),
                        ExpectedVersion::from_read(read_version),
                        vec![to_write],
                    ));
                }
            }
        }

        let stream_versions = self.event_store.write_events_multi(batches).await?;
        debug!(events = produced.len(), "Wrote command events");

        Ok(ExecutionResult {
            stream_versions,
            events: produced,
        })
    }

    /// Executes a command, retrying failures the retry policy selects.
    ///
    /// Each attempt starts from a fresh read of the store; nothing computed by
    /// a failed attempt is reused. Delays follow exponential backoff with
    /// jitter. After `max_attempts` the last error is returned.
    pub async fn execute_with_retry<C>(
        &self,
        command: &C,
        input: C::Input,
        context: ExecutionContext,
    ) -> CommandResult<ExecutionResult<C::Event>>
    where
        C: Command<Event = ES::Event>,
        C::Event: Clone,
    {
        let max_attempts = self.retry_config.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match self.execute(command, input.clone(), &context).await {
                Ok(result) => return Ok(result),
                Err(err) if self.retry_policy.should_retry(&err) => {
                    attempt += 1;
                    if attempt >= max_attempts {
                        error!(
                            command = command.name(),
                            attempts = attempt,
                            error = %err,
                            "Command failed after exhausting retries"
                        );
                        return Err(err);
                    }
                    let delay = self.calculate_retry_delay(attempt - 1);
                    warn!(
                        command = command.name(),
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "Retrying command"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Calculates the delay before the retry following `attempt` (0-based).
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        use rand::Rng;

        let base_delay_ms = self.retry_config.base_delay.as_millis() as f64;
        let max_delay_ms = self.retry_config.max_delay.as_millis() as f64;

        let delay = base_delay_ms * self.retry_config.backoff_multiplier.powi(attempt as i32);
        let delay = delay.min(max_delay_ms);

        // ±25% jitter
        let jitter = delay * 0.25 * (rand::rng().random::<f64>() - 0.5) * 2.0;
        let final_delay = (delay + jitter).max(0.0).min(max_delay_ms) as u64;

        Duration::from_millis(final_delay)
    }
}
