//! Validated engine configuration.
//!
//! Every tunable is a `nutype` newtype with range validation, so an invalid
//! configuration cannot be constructed, whether it is built in code or
//! deserialized from a host application's JSON.

use super::{RetryConfig, RetryPolicy};
use crate::order::OrderStatus;
use nutype::nutype;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Total number of attempts for a command, including the first.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct MaxRetryAttempts(u32);

/// Base delay between retry attempts in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 10_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryBaseDelayMs(u64);

impl RetryBaseDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Maximum delay between retry attempts in milliseconds.
#[nutype(
    validate(greater_or_equal = 1, less_or_equal = 300_000),
    derive(
        Debug,
        Clone,
        Copy,
        PartialEq,
        Eq,
        PartialOrd,
        Ord,
        Into,
        Serialize,
        Deserialize
    )
)]
pub struct RetryMaxDelayMs(u64);

impl RetryMaxDelayMs {
    /// Convert to Duration for use with tokio::time::sleep.
    pub fn as_duration(self) -> Duration {
        Duration::from_millis(self.into())
    }
}

/// Exponential backoff multiplier for retry delays.
#[nutype(
    validate(greater_or_equal = 1.0, less_or_equal = 3.0),
    derive(Debug, Clone, Copy, PartialEq, PartialOrd, Into, Serialize, Deserialize)
)]
pub struct BackoffMultiplier(f64);

/// Retry settings built only from validated parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidatedRetryConfig {
    /// Total attempts per command.
    pub max_attempts: MaxRetryAttempts,
    /// Delay before the first retry.
    pub base_delay_ms: RetryBaseDelayMs,
    /// Upper bound on any single delay.
    pub max_delay_ms: RetryMaxDelayMs,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: BackoffMultiplier,
}

impl ValidatedRetryConfig {
    /// 3 attempts, 100 ms base delay, 30 s cap, doubling.
    pub fn new() -> Self {
        Self::build(3, 100, 30_000, 2.0)
    }

    /// Fewer, slower attempts for stores that should not be hammered.
    pub fn conservative() -> Self {
        Self::build(2, 500, 60_000, 2.5)
    }

    /// More, quicker attempts for highly contended orders.
    pub fn aggressive() -> Self {
        Self::build(8, 20, 2_000, 1.5)
    }

    fn build(attempts: u32, base_ms: u64, max_ms: u64, multiplier: f64) -> Self {
        Self {
            max_attempts: MaxRetryAttempts::try_new(attempts).expect("preset attempts are in range"),
            base_delay_ms: RetryBaseDelayMs::try_new(base_ms).expect("preset base delay is in range"),
            max_delay_ms: RetryMaxDelayMs::try_new(max_ms).expect("preset max delay is in range"),
            backoff_multiplier: BackoffMultiplier::try_new(multiplier)
                .expect("preset multiplier is in range"),
        }
    }

    /// The plain configuration the executor runs with.
    pub fn to_retry_config(self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.into(),
            base_delay: self.base_delay_ms.as_duration(),
            max_delay: self.max_delay_ms.as_duration(),
            backoff_multiplier: self.backoff_multiplier.into(),
        }
    }
}

impl Default for ValidatedRetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializable selector for the built-in retry policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicyKind {
    /// Retry only optimistic concurrency conflicts.
    #[default]
    ConcurrencyConflictsOnly,
    /// Also retry when the store is unreachable.
    ConcurrencyAndTransient,
}

impl From<RetryPolicyKind> for RetryPolicy {
    fn from(kind: RetryPolicyKind) -> Self {
        match kind {
            RetryPolicyKind::ConcurrencyConflictsOnly => Self::ConcurrencyConflictsOnly,
            RetryPolicyKind::ConcurrencyAndTransient => Self::ConcurrencyAndTransient,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Retry settings for every order command.
    pub retry: ValidatedRetryConfig,
    /// Which failures are retried.
    pub retry_policy: RetryPolicyKind,
    /// Order statuses whose lines count as pending demand.
    pub open_demand_statuses: Vec<OrderStatus>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: ValidatedRetryConfig::new(),
            retry_policy: RetryPolicyKind::default(),
            open_demand_statuses: OrderStatus::OPEN_DEMAND.to_vec(),
        }
    }
}

impl EngineConfig {
    /// Parses configuration from JSON, filling omitted fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
