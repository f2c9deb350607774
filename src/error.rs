//! Crate-level error taxonomy.
//!
//! # Error Handling Patterns
//!
//! Errors fall into three behavioral classes:
//!
//! ## Fatal at startup
//!
//! - [`StreamError::Config`]: rejected by validation before any task spawns.
//!
//! ## Fatal for one batch / subscription / chunk
//!
//! - [`StreamError::FilterConflict`]: the batch's messages disagree on the
//!   filter attribute and the conflict policy is `reject`.
//! - [`StreamError::InvalidFilterSyntax`]: reported at subscribe time, never
//!   per message.
//! - [`StreamError::Unroutable`]: the batch can never succeed, so it fails
//!   without retry.
//! - [`StreamError::WireLimitExceeded`]: the data could never be decoded
//!   again, so it is refused on the publish side (at accept or at seal)
//!   before anything reaches the log.
//! - [`StreamError::CorruptChunk`]: surfaced to the consumer stream for that
//!   chunk, never silently skipped.
//! - [`StreamError::PublishFailed`]: retries exhausted; carries the original
//!   messages so nothing is lost.
//!
//! ## Transient
//!
//! - [`StreamError::PoolExhausted`] and [`StreamError::Io`]: governed by the
//!   retry policy until attempts run out.
//!
//! Every publish eventually resolves to a confirmation or one of these
//! errors; there is no fire-and-forget loss path.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use crate::message::Message;
use crate::types::{BatchId, ChunkOffset, PartitionIndex};

/// Result type for stream operations.
pub type Result<T> = std::result::Result<T, StreamError>;

/// Errors produced by the publishing and filtering core.
///
/// The enum is `Clone` so one failure can be fanned out to every publish
/// receipt in the affected batch; IO errors store the [`io::ErrorKind`]
/// rather than the non-cloneable [`io::Error`].
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// Invalid configuration, detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Messages within one batch disagree on the filter attribute.
    #[error(
        "filter conflict in batch {batch}: attribute `{attribute}` has both `{first}` and `{second}`"
    )]
    FilterConflict {
        batch: BatchId,
        attribute: String,
        first: String,
        second: String,
    },

    /// The subscription predicate failed to parse.
    #[error("invalid filter predicate near `{fragment}`: {reason}")]
    InvalidFilterSyntax { fragment: String, reason: String },

    /// No route exists for the target partition; never retried.
    #[error("no route for partition {partition}")]
    Unroutable { partition: PartitionIndex },

    /// Strict routing is on and the message lacks the routing attribute.
    #[error("message missing routing attribute `{attribute}`")]
    MissingRoutingKey { attribute: String },

    /// A wire-format limit would be exceeded; encoding this would produce a
    /// chunk no decoder accepts.
    #[error("wire limit exceeded: {reason}")]
    WireLimitExceeded { reason: String },

    /// A chunk could not be decoded or decompressed.
    #[error("corrupt chunk at {partition}/{offset}: {reason}")]
    CorruptChunk {
        partition: PartitionIndex,
        offset: ChunkOffset,
        reason: String,
    },

    /// Connection acquisition exceeded its bounded wait.
    #[error("connection pool exhausted after {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    /// Retry attempts exhausted; the original messages ride along so the
    /// caller loses nothing.
    #[error("publish failed for batch {batch} after {attempts} attempts: {last_failure}")]
    PublishFailed {
        batch: BatchId,
        attempts: u32,
        last_failure: String,
        messages: Arc<[Message]>,
    },

    /// The producer shut down before this batch reached a terminal outcome.
    #[error("shutdown timed out with batch {batch} unresolved")]
    ShutdownTimeout { batch: BatchId },

    /// The producer has been closed; no new messages are accepted.
    #[error("producer is closed")]
    ProducerClosed,

    /// An error in the network.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),
}

impl StreamError {
    /// Whether the retry policy may act on this error.
    ///
    /// Structural failures (unroutable, corrupt data, bad configuration) are
    /// surfaced immediately; only transient transport-class failures retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StreamError::PoolExhausted { .. } | StreamError::Io(_)
        )
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        StreamError::Io(e.kind())
    }
}
