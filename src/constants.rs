//! Centralized wire-format and configuration constants.
//!
//! This module consolidates the magic numbers used throughout the Streamlet
//! client core. Having them in one place makes it easier to:
//!
//! - Understand the chunk format constraints
//! - Update defaults consistently
//! - Document the rationale for each constant
//!
//! # Categories
//!
//! - **Chunk Format Constants**: wire-level sizes and limits
//! - **Batching Defaults**: accumulator bounds and publish latency
//! - **Confirmation Defaults**: retry/backoff and timeout tuning
//! - **Connection Defaults**: pool sizing and idle eviction

// =============================================================================
// Chunk Format Constants
// =============================================================================

/// Magic number at the start of every encoded chunk (`"SL"` big-endian).
pub const CHUNK_MAGIC: u16 = 0x534C;

/// Size in bytes of the chunk-level filter index bitmap.
///
/// 64 bytes = 512 bits. With two hash functions and at most 16 distinct
/// filter values per chunk the false-positive rate stays below 1%
/// (`(1 - e^(-2*16/512))^2 ≈ 0.004`). False negatives are impossible by
/// construction.
pub const FILTER_INDEX_BYTES: usize = 64;

/// Number of hash functions used by the filter index.
pub const FILTER_INDEX_HASHES: usize = 2;

/// Maximum number of attributes a single message may carry.
///
/// Bounds decoder allocations when parsing untrusted chunk bodies.
pub const MAX_ATTRIBUTE_COUNT: usize = 256;

/// Maximum length of a filter value in bytes.
pub const MAX_FILTER_VALUE_LEN: usize = 255;

/// Maximum number of messages a decoder will accept in one chunk.
pub const MAX_CHUNK_MESSAGE_COUNT: u32 = 1_000_000;

// =============================================================================
// Batching Defaults
// =============================================================================

/// Default maximum number of messages per batch.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default byte budget per batch (1 MiB).
pub const DEFAULT_BATCH_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum time a batch waits for more messages before sealing.
pub const DEFAULT_BATCH_PUBLISHING_DELAY_MS: u64 = 100;

/// Default number of stream partitions.
pub const DEFAULT_PARTITION_COUNT: u32 = 1;

// =============================================================================
// Confirmation Defaults
// =============================================================================

/// Default maximum delivery attempts per batch (initial send + retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default initial retry backoff interval.
pub const DEFAULT_BACKOFF_INITIAL_INTERVAL_MS: u64 = 1_000;

/// Default retry backoff cap.
pub const DEFAULT_BACKOFF_MAX_INTERVAL_MS: u64 = 10_000;

/// Default backoff multiplier applied per attempt.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default time to wait for a broker confirmation before treating the
/// in-flight batch as expired.
pub const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 30_000;

/// Default ceiling on sealed-but-unconfirmed batches across all partitions.
pub const DEFAULT_PENDING_HIGH_WATER: usize = 64;

/// Default time to wait for pending confirmations during `close`.
pub const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 10_000;

// =============================================================================
// Connection Defaults
// =============================================================================

/// Default maximum number of pooled broker connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 5;

/// Default idle time after which a pooled connection is evicted.
pub const DEFAULT_MAX_IDLE_TIME_SECS: u64 = 60;

/// Default bound on how long connection acquisition may block.
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT_MS: u64 = 5_000;

/// Capacity of each per-partition command queue on the publish path.
pub const PUBLISH_QUEUE_DEPTH: usize = 1_024;

/// Capacity of the per-partition sealed-batch handoff queue.
pub const DISPATCH_QUEUE_DEPTH: usize = 16;

/// Capacity of the consumer delivery channel.
pub const DELIVERY_QUEUE_DEPTH: usize = 256;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_magic_spells_sl() {
        assert_eq!(CHUNK_MAGIC.to_be_bytes(), *b"SL");
    }

    #[test]
    fn test_filter_index_sizing() {
        // 512 bits, two hashes: documented false-positive budget.
        assert_eq!(FILTER_INDEX_BYTES * 8, 512);
        assert_eq!(FILTER_INDEX_HASHES, 2);
    }

    #[test]
    fn test_defaults_are_sane() {
        assert!(DEFAULT_BATCH_SIZE >= 1);
        assert!(DEFAULT_BATCH_BUFFER_SIZE >= 1024);
        assert!(DEFAULT_BACKOFF_MULTIPLIER >= 1.0);
        assert!(DEFAULT_BACKOFF_MAX_INTERVAL_MS >= DEFAULT_BACKOFF_INITIAL_INTERVAL_MS);
        assert!(DEFAULT_MAX_ATTEMPTS >= 1);
    }
}
