//! Stream configuration.
//!
//! One validated struct covers the whole publish/consume surface: batching
//! bounds, partitioning expressions, compression, confirmation timeouts,
//! retry backoff and connection pooling. Construct it with struct-update
//! syntax over [`StreamConfig::default`] and call [`StreamConfig::validate`]
//! before handing it to a producer; validation failures are fatal at
//! startup.
//!
//! ```rust
//! use streamlet::config::StreamConfig;
//!
//! let config = StreamConfig {
//!     partition_count: 4,
//!     partition_key_expression: "attributes['order-id']".to_string(),
//!     ..Default::default()
//! };
//! config.validate().expect("invalid stream configuration");
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::compression::Compression;
use crate::constants::{
    DEFAULT_BACKOFF_INITIAL_INTERVAL_MS, DEFAULT_BACKOFF_MAX_INTERVAL_MS,
    DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_BATCH_BUFFER_SIZE, DEFAULT_BATCH_PUBLISHING_DELAY_MS,
    DEFAULT_BATCH_SIZE, DEFAULT_CONFIRM_TIMEOUT_MS, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_CONNECTIONS,
    DEFAULT_MAX_IDLE_TIME_SECS, DEFAULT_PARTITION_COUNT, DEFAULT_PENDING_HIGH_WATER,
    DEFAULT_POOL_ACQUIRE_TIMEOUT_MS, DEFAULT_SHUTDOWN_TIMEOUT_MS,
};
use crate::error::{Result, StreamError};
use crate::producer::router::KeyExpression;

/// What the tagger does when messages within one batch disagree on the
/// filter attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterConflictPolicy {
    /// Fail the batch with a filter-conflict error, forcing the caller to
    /// split it.
    Reject,
    /// Tag the chunk with the wildcard value, disabling chunk-level
    /// filtering for it. Messages are never dropped either way.
    #[default]
    Wildcard,
}

/// Configuration for one stream's publishing and filtering core.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Maximum messages per batch.
    pub batch_size: usize,

    /// Byte budget per batch. A single oversized message still ships alone;
    /// the budget bounds accumulation, not individual messages.
    pub batch_buffer_size: usize,

    /// Maximum time an under-filled batch waits before sealing.
    pub batch_publishing_delay_ms: u64,

    /// Compression algorithm recorded in every chunk header.
    pub compression: Compression,

    /// Number of partitions; fixed for the stream's lifetime.
    pub partition_count: u32,

    /// Expression selecting the routing key, e.g. `attributes['order-id']`.
    /// Empty routes everything to partition 0.
    pub partition_key_expression: String,

    /// Expression selecting the per-batch filter value, e.g.
    /// `attributes['kind']`. Empty disables chunk-level filtering.
    pub filter_value_expression: String,

    /// Maximum delivery attempts per batch (initial send + retries).
    pub max_attempts: u32,

    /// Initial retry backoff interval.
    pub backoff_initial_interval_ms: u64,

    /// Cap on the retry backoff interval.
    pub backoff_max_interval_ms: u64,

    /// Backoff multiplier applied per attempt.
    pub backoff_multiplier: f64,

    /// How long to wait for a broker confirmation before the in-flight
    /// batch counts as expired.
    pub confirm_timeout_ms: u64,

    /// Fail a batch immediately (no retry) when its partition has no route.
    pub mandatory: bool,

    /// Maximum pooled broker connections.
    pub max_connections: usize,

    /// Idle time after which a pooled connection is evicted.
    pub max_idle_time_secs: u64,

    /// Bound on how long connection acquisition may block.
    pub pool_acquire_timeout_ms: u64,

    /// Ceiling on sealed-but-unconfirmed batches across all partitions;
    /// `offer` backpressures once it is reached.
    pub pending_high_water: usize,

    /// How long `close` waits for pending confirmations before reporting
    /// the stragglers as failed.
    pub shutdown_timeout_ms: u64,

    /// Treat a missing routing attribute as fatal instead of defaulting to
    /// partition 0.
    pub strict_routing: bool,

    /// Conflict handling for the filter tagger.
    pub filter_conflict_policy: FilterConflictPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_buffer_size: DEFAULT_BATCH_BUFFER_SIZE,
            batch_publishing_delay_ms: DEFAULT_BATCH_PUBLISHING_DELAY_MS,
            compression: Compression::default(),
            partition_count: DEFAULT_PARTITION_COUNT,
            partition_key_expression: String::new(),
            filter_value_expression: String::new(),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_initial_interval_ms: DEFAULT_BACKOFF_INITIAL_INTERVAL_MS,
            backoff_max_interval_ms: DEFAULT_BACKOFF_MAX_INTERVAL_MS,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            confirm_timeout_ms: DEFAULT_CONFIRM_TIMEOUT_MS,
            mandatory: false,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_idle_time_secs: DEFAULT_MAX_IDLE_TIME_SECS,
            pool_acquire_timeout_ms: DEFAULT_POOL_ACQUIRE_TIMEOUT_MS,
            pending_high_water: DEFAULT_PENDING_HIGH_WATER,
            shutdown_timeout_ms: DEFAULT_SHUTDOWN_TIMEOUT_MS,
            strict_routing: false,
            filter_conflict_policy: FilterConflictPolicy::default(),
        }
    }
}

impl StreamConfig {
    /// Validate the configuration. Call once at startup; all failures here
    /// are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(StreamError::Config("batch_size must be >= 1".to_string()));
        }
        if self.batch_buffer_size == 0 {
            return Err(StreamError::Config(
                "batch_buffer_size must be >= 1".to_string(),
            ));
        }
        if self.partition_count == 0 {
            return Err(StreamError::Config(
                "partition_count must be >= 1".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(StreamError::Config("max_attempts must be >= 1".to_string()));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(StreamError::Config(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }
        if self.backoff_max_interval_ms < self.backoff_initial_interval_ms {
            return Err(StreamError::Config(
                "backoff_max_interval_ms must be >= backoff_initial_interval_ms".to_string(),
            ));
        }
        if self.confirm_timeout_ms == 0 {
            return Err(StreamError::Config(
                "confirm_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(StreamError::Config(
                "max_connections must be >= 1".to_string(),
            ));
        }
        if self.pending_high_water == 0 {
            return Err(StreamError::Config(
                "pending_high_water must be >= 1".to_string(),
            ));
        }

        // Both expressions must parse; partitioned streams need a key.
        let key = KeyExpression::parse(&self.partition_key_expression)?;
        KeyExpression::parse(&self.filter_value_expression)?;
        if self.partition_count > 1 && key.is_constant() {
            return Err(StreamError::Config(
                "partition_key_expression is required when partition_count > 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Batch delay as a [`Duration`].
    pub fn batch_publishing_delay(&self) -> Duration {
        Duration::from_millis(self.batch_publishing_delay_ms)
    }

    /// Confirmation timeout as a [`Duration`].
    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.confirm_timeout_ms)
    }

    /// Initial backoff as a [`Duration`].
    pub fn backoff_initial_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_interval_ms)
    }

    /// Backoff cap as a [`Duration`].
    pub fn backoff_max_interval(&self) -> Duration {
        Duration::from_millis(self.backoff_max_interval_ms)
    }

    /// Pool idle eviction threshold as a [`Duration`].
    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }

    /// Pool acquisition bound as a [`Duration`].
    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_acquire_timeout_ms)
    }

    /// Shutdown drain bound as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
