//! The broker seam: an append-only, partitioned chunk log.
//!
//! The producer and consumer talk to storage only through [`StreamBroker`].
//! The in-memory implementation backs the test suite and doubles as the
//! reference semantics: appends are atomic per partition, offsets are dense
//! and monotonic, and subscribers replay from any offset before tailing
//! live appends.

use std::future::pending;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{Notify, RwLock, mpsc};
use tracing::debug;

use crate::chunk::Chunk;
use crate::constants::DELIVERY_QUEUE_DEPTH;
use crate::error::{Result, StreamError};
use crate::types::{ChunkOffset, PartitionIndex};

/// Why the broker refused an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The partition has no route; the append can never succeed.
    Unroutable,
    /// The stream is over its quota; may succeed later.
    OverQuota,
    /// The broker could not parse the chunk.
    Malformed,
}

impl RejectReason {
    /// Metric/log label.
    pub const fn as_str(self) -> &'static str {
        match self {
            RejectReason::Unroutable => "unroutable",
            RejectReason::OverQuota => "over_quota",
            RejectReason::Malformed => "malformed",
        }
    }
}

/// Terminal broker response to one append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The chunk is durable at this offset.
    Accepted(ChunkOffset),
    /// The broker refused the chunk.
    Rejected(RejectReason),
}

/// Where a subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OffsetPolicy {
    /// Replay the partition from its first chunk.
    First,
    /// Skip history; deliver only chunks appended after subscribing.
    #[default]
    Last,
    /// Resume from a specific chunk offset.
    Offset(ChunkOffset),
}

/// Storage-side contract for a partitioned chunk log.
#[async_trait]
pub trait StreamBroker: Send + Sync + 'static {
    /// Append one chunk to a partition. Resolves to a terminal outcome; a
    /// transport failure is an `Err` and may be retried by the caller.
    async fn append(&self, partition: PartitionIndex, chunk: Chunk) -> Result<AppendOutcome>;

    /// Open a chunk feed over one partition starting per `policy`.
    async fn subscribe(
        &self,
        partition: PartitionIndex,
        policy: OffsetPolicy,
    ) -> Result<mpsc::Receiver<Chunk>>;

    /// Whether the partition currently has a route.
    async fn has_route(&self, partition: PartitionIndex) -> bool;
}

struct PartitionLog {
    chunks: RwLock<Vec<Chunk>>,
    appended: Notify,
}

impl PartitionLog {
    fn new() -> Self {
        Self {
            chunks: RwLock::new(Vec::new()),
            appended: Notify::new(),
        }
    }
}

/// In-memory [`StreamBroker`] with fault injection hooks for tests.
///
/// Fault counters are consumed per append in hook order: drops (the append
/// future never resolves, simulating a lost confirmation), then transport
/// failures, then rejections. A partition marked unroutable rejects every
/// append until restored.
pub struct InMemoryBroker {
    partitions: DashMap<u32, Arc<PartitionLog>>,
    unroutable: DashMap<u32, ()>,
    drop_appends: AtomicU32,
    fail_appends: AtomicU32,
    reject_appends: AtomicU32,
}

impl InMemoryBroker {
    /// A broker with `partition_count` empty partitions.
    pub fn new(partition_count: u32) -> Arc<Self> {
        let partitions = DashMap::new();
        for index in 0..partition_count {
            partitions.insert(index, Arc::new(PartitionLog::new()));
        }
        Arc::new(Self {
            partitions,
            unroutable: DashMap::new(),
            drop_appends: AtomicU32::new(0),
            fail_appends: AtomicU32::new(0),
            reject_appends: AtomicU32::new(0),
        })
    }

    /// The next `n` appends never resolve, as if the confirmation was lost
    /// in flight.
    pub fn drop_next_appends(&self, n: u32) {
        self.drop_appends.store(n, Ordering::SeqCst);
    }

    /// The next `n` appends fail with a transport error.
    pub fn fail_next_appends(&self, n: u32) {
        self.fail_appends.store(n, Ordering::SeqCst);
    }

    /// The broker rejects the next `n` appends as over quota.
    pub fn reject_next_appends(&self, n: u32) {
        self.reject_appends.store(n, Ordering::SeqCst);
    }

    /// Remove (or restore) the route for a partition.
    pub fn set_routable(&self, partition: PartitionIndex, routable: bool) {
        if routable {
            self.unroutable.remove(&partition.value());
        } else {
            self.unroutable.insert(partition.value(), ());
        }
    }

    /// Chunks currently in one partition's log.
    pub async fn chunk_count(&self, partition: PartitionIndex) -> usize {
        match self.partitions.get(&partition.value()) {
            Some(log) => log.chunks.read().await.len(),
            None => 0,
        }
    }

    /// Snapshot one partition's log.
    pub async fn chunks(&self, partition: PartitionIndex) -> Vec<Chunk> {
        match self.partitions.get(&partition.value()) {
            Some(log) => log.chunks.read().await.clone(),
            None => Vec::new(),
        }
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn log(&self, partition: PartitionIndex) -> Result<Arc<PartitionLog>> {
        self.partitions
            .get(&partition.value())
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(StreamError::Unroutable { partition })
    }
}

#[async_trait]
impl StreamBroker for InMemoryBroker {
    async fn append(&self, partition: PartitionIndex, chunk: Chunk) -> Result<AppendOutcome> {
        if Self::take_fault(&self.drop_appends) {
            pending::<()>().await;
            unreachable!();
        }
        if Self::take_fault(&self.fail_appends) {
            return Err(StreamError::Io(std::io::ErrorKind::ConnectionReset));
        }
        if self.unroutable.contains_key(&partition.value()) {
            return Ok(AppendOutcome::Rejected(RejectReason::Unroutable));
        }
        if Self::take_fault(&self.reject_appends) {
            return Ok(AppendOutcome::Rejected(RejectReason::OverQuota));
        }

        let log = self.log(partition)?;
        let mut chunks = log.chunks.write().await;
        let offset = ChunkOffset::new(chunks.len() as u64);
        chunks.push(chunk.with_offset(offset));
        drop(chunks);
        log.appended.notify_waiters();
        debug!(partition = partition.value(), offset = offset.value(), "chunk appended");
        Ok(AppendOutcome::Accepted(offset))
    }

    async fn subscribe(
        &self,
        partition: PartitionIndex,
        policy: OffsetPolicy,
    ) -> Result<mpsc::Receiver<Chunk>> {
        let log = self.log(partition)?;
        let mut cursor = match policy {
            OffsetPolicy::First => 0,
            OffsetPolicy::Last => log.chunks.read().await.len(),
            OffsetPolicy::Offset(offset) => offset.value() as usize,
        };

        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);
        tokio::spawn(async move {
            loop {
                let next = {
                    let chunks = log.chunks.read().await;
                    chunks.get(cursor).cloned()
                };
                match next {
                    Some(chunk) => {
                        cursor += 1;
                        if tx.send(chunk).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        // Arm the notification before re-checking so an
                        // append between the check and the wait is not lost.
                        let appended = log.appended.notified();
                        if log.chunks.read().await.len() > cursor {
                            continue;
                        }
                        tokio::select! {
                            _ = appended => {}
                            _ = tx.closed() => return,
                        }
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn has_route(&self, partition: PartitionIndex) -> bool {
        self.partitions.contains_key(&partition.value())
            && !self.unroutable.contains_key(&partition.value())
    }
}
