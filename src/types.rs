//! Type-safe wrappers for stream primitives.
//!
//! These newtypes prevent mixing up different integer types that share an
//! underlying representation but carry different semantic meanings, such as
//! a partition index versus a chunk offset.

use std::fmt;

/// Index of a partition within a stream.
///
/// Partition count is fixed at stream configuration time; indices are dense
/// in `0..partition_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PartitionIndex(pub u32);

impl PartitionIndex {
    /// Create a new partition index from a raw value.
    #[inline]
    pub const fn new(value: u32) -> Self {
        PartitionIndex(value)
    }

    /// Get the raw u32 value.
    #[inline]
    pub const fn value(self) -> u32 {
        self.0
    }
}

impl From<u32> for PartitionIndex {
    fn from(value: u32) -> Self {
        PartitionIndex(value)
    }
}

impl From<PartitionIndex> for u32 {
    fn from(idx: PartitionIndex) -> Self {
        idx.0
    }
}

impl fmt::Display for PartitionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Offset of a chunk within its partition's append-only log.
///
/// Offsets are assigned by the broker on append, increase monotonically per
/// partition, and are the unit of consumer acknowledgment and resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ChunkOffset(pub u64);

impl ChunkOffset {
    /// Create a new chunk offset from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        ChunkOffset(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// The offset immediately after this one.
    #[inline]
    pub const fn next(self) -> Self {
        ChunkOffset(self.0 + 1)
    }
}

impl From<u64> for ChunkOffset {
    fn from(value: u64) -> Self {
        ChunkOffset(value)
    }
}

impl From<ChunkOffset> for u64 {
    fn from(offset: ChunkOffset) -> Self {
        offset.0
    }
}

impl fmt::Display for ChunkOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a batch, unique within one producer.
///
/// Batch ids are allocated when a batch is opened and key the timer and
/// confirmation bookkeeping for that batch until its terminal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BatchId(pub u64);

impl BatchId {
    /// Create a new batch id from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        BatchId(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Producer-assigned sequence number of a message.
///
/// Assigned once when the producer accepts the message; unique per producer
/// and strictly increasing in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceNumber(pub u64);

impl SequenceNumber {
    /// Create a new sequence number from a raw value.
    #[inline]
    pub const fn new(value: u64) -> Self {
        SequenceNumber(value)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl From<u64> for SequenceNumber {
    fn from(value: u64) -> Self {
        SequenceNumber(value)
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse per-chunk filter tag.
///
/// Derived deterministically from a batch's messages by the configured
/// filter-value expression. The empty string is reserved as the wildcard:
/// a wildcard-tagged chunk is unfiltered and admitted by every subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct FilterValue(String);

impl FilterValue {
    /// Create a filter value from a string.
    pub fn new(value: impl Into<String>) -> Self {
        FilterValue(value.into())
    }

    /// The wildcard value: disables chunk-level filtering for its chunk.
    pub fn wildcard() -> Self {
        FilterValue(String::new())
    }

    /// Whether this is the wildcard value.
    #[inline]
    pub fn is_wildcard(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the raw string value.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        FilterValue(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        FilterValue(value)
    }
}

impl fmt::Display for FilterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            write!(f, "<wildcard>")
        } else {
            write!(f, "{}", self.0)
        }
    }
}
