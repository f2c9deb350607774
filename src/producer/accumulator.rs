//! Per-partition batch accumulation.
//!
//! Messages routed to a partition collect in one open batch until a seal
//! trigger fires: the message-count cap, the byte budget, the publishing
//! delay, or a drain on shutdown. Sealed batches are immutable; their
//! messages live in an `Arc<[Message]>` so retries and failure reporting
//! share the same allocation.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::message::Message;
use crate::metrics;
use crate::types::{BatchId, PartitionIndex};

/// What sealed a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealReason {
    /// The batch reached the message-count cap.
    Count,
    /// The batch reached its byte budget.
    Bytes,
    /// The publishing delay elapsed with the batch under-filled.
    Delay,
    /// The producer is draining on shutdown.
    Drain,
}

impl SealReason {
    /// Metric/log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            SealReason::Count => "count",
            SealReason::Bytes => "bytes",
            SealReason::Delay => "delay",
            SealReason::Drain => "drain",
        }
    }
}

/// An immutable sealed batch awaiting dispatch.
#[derive(Debug, Clone)]
pub struct SealedBatch {
    pub id: BatchId,
    pub partition: PartitionIndex,
    pub messages: Arc<[Message]>,
    pub byte_size: usize,
    pub reason: SealReason,
}

/// Accumulates messages for one partition.
///
/// Not shared across tasks; each partition's accumulator lives inside that
/// partition's producer task, so no interior locking is needed. Batch ids
/// come from a counter shared across partitions so they are unique within
/// the producer.
pub struct BatchAccumulator {
    partition: PartitionIndex,
    batch_size: usize,
    byte_budget: usize,
    ids: Arc<AtomicU64>,
    open: Option<OpenBatch>,
}

struct OpenBatch {
    id: BatchId,
    messages: Vec<Message>,
    byte_size: usize,
}

impl BatchAccumulator {
    pub fn new(
        partition: PartitionIndex,
        batch_size: usize,
        byte_budget: usize,
        ids: Arc<AtomicU64>,
    ) -> Self {
        Self {
            partition,
            batch_size,
            byte_budget,
            ids,
            open: None,
        }
    }

    /// Add one message, sealing as needed.
    ///
    /// Returns every batch sealed by this offer: at most the previously open
    /// batch (when the new message would blow its byte budget) and the batch
    /// holding the new message (when it fills the count cap or is oversized
    /// by itself).
    pub fn offer(&mut self, message: Message) -> Vec<SealedBatch> {
        let mut sealed = Vec::new();
        let size = message.encoded_len();

        if let Some(open) = &self.open {
            if !open.messages.is_empty() && open.byte_size + size > self.byte_budget {
                if let Some(batch) = self.seal(SealReason::Bytes) {
                    sealed.push(batch);
                }
            }
        }

        let open = self.open.get_or_insert_with(|| OpenBatch {
            id: BatchId::new(self.ids.fetch_add(1, Ordering::Relaxed)),
            messages: Vec::with_capacity(self.batch_size),
            byte_size: 0,
        });
        open.messages.push(message);
        open.byte_size += size;

        if open.messages.len() >= self.batch_size || open.byte_size >= self.byte_budget {
            let reason = if open.messages.len() >= self.batch_size {
                SealReason::Count
            } else {
                SealReason::Bytes
            };
            if let Some(batch) = self.seal(reason) {
                sealed.push(batch);
            }
        }
        sealed
    }

    /// Seal the open batch unconditionally.
    pub fn seal(&mut self, reason: SealReason) -> Option<SealedBatch> {
        let open = self.open.take()?;
        if open.messages.is_empty() {
            return None;
        }
        metrics::record_batch_sealed(reason.as_str());
        Some(SealedBatch {
            id: open.id,
            partition: self.partition,
            messages: open.messages.into(),
            byte_size: open.byte_size,
            reason,
        })
    }

    /// Seal only if `batch` is still the open batch; a timer that fires
    /// after its batch already sealed is a no-op.
    pub fn seal_if(&mut self, batch: BatchId, reason: SealReason) -> Option<SealedBatch> {
        if self.open.as_ref().map(|open| open.id) == Some(batch) {
            self.seal(reason)
        } else {
            None
        }
    }

    /// Id of the currently open batch, if any.
    pub fn open_batch_id(&self) -> Option<BatchId> {
        self.open.as_ref().map(|open| open.id)
    }

    /// Number of messages waiting in the open batch.
    pub fn pending_len(&self) -> usize {
        self.open.as_ref().map_or(0, |open| open.messages.len())
    }
}
