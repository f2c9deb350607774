//! Confirmation tracking and batch dispatch.
//!
//! Every sealed batch is pending until the broker confirms it, rejects it,
//! or the producer gives up. The [`ConfirmationTracker`] holds the publish
//! waiters for each pending batch and resolves all of them with one terminal
//! outcome. The [`Dispatcher`] owns the transport side: one batch in flight
//! per partition, confirmations awaited under a timeout, transient failures
//! retried on the backoff schedule with the same chunk (same batch id, same
//! messages).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Notify, OwnedSemaphorePermit, mpsc, oneshot};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::broker::{AppendOutcome, RejectReason, StreamBroker};
use crate::chunk::Chunk;
use crate::error::{Result, StreamError};
use crate::metrics;
use crate::pool::ConnectionPool;
use crate::types::{BatchId, ChunkOffset, PartitionIndex};

use super::accumulator::SealedBatch;
use super::retry::RetryPolicy;

/// One pooled broker session. The transport itself lives behind the broker
/// trait; this token bounds how many appends run concurrently.
pub(crate) struct BrokerLink;

pub(crate) type Waiter = oneshot::Sender<Result<ChunkOffset>>;

struct PendingBatch {
    partition: PartitionIndex,
    waiters: Vec<Waiter>,
}

/// Tracks batches between seal and terminal outcome.
pub struct ConfirmationTracker {
    pending: DashMap<u64, PendingBatch>,
    resolved: Notify,
}

impl ConfirmationTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
            resolved: Notify::new(),
        })
    }

    /// Register a sealed batch and the receipts waiting on it.
    pub(crate) fn begin(&self, batch: &SealedBatch, waiters: Vec<Waiter>) {
        metrics::PENDING_CONFIRMATIONS.inc();
        self.pending.insert(
            batch.id.value(),
            PendingBatch {
                partition: batch.partition,
                waiters,
            },
        );
    }

    /// Resolve a batch as confirmed at `offset`.
    pub(crate) fn resolve_ok(&self, batch: BatchId, offset: ChunkOffset) {
        if let Some((_, pending)) = self.pending.remove(&batch.value()) {
            metrics::PENDING_CONFIRMATIONS.dec();
            for waiter in pending.waiters {
                let _ = waiter.send(Ok(offset));
            }
            self.resolved.notify_waiters();
        }
    }

    /// Resolve a batch with a terminal error, fanned out to every waiter.
    pub(crate) fn resolve_err(&self, batch: BatchId, error: StreamError) {
        if let Some((_, pending)) = self.pending.remove(&batch.value()) {
            metrics::PENDING_CONFIRMATIONS.dec();
            warn!(
                batch = batch.value(),
                partition = pending.partition.value(),
                error = %error,
                "batch resolved with error"
            );
            for waiter in pending.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
            self.resolved.notify_waiters();
        }
    }

    /// Batches still awaiting a terminal outcome.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// One still-pending batch id, if any.
    pub fn first_pending(&self) -> Option<BatchId> {
        self.pending
            .iter()
            .next()
            .map(|entry| BatchId::new(*entry.key()))
    }

    /// Future that completes when some batch resolves. Callers should
    /// `enable` it before re-checking the pending count so a resolution in
    /// between is not missed.
    pub fn resolution(&self) -> tokio::sync::futures::Notified<'_> {
        self.resolved.notified()
    }

    /// Fail every pending batch, used when shutdown gives up on stragglers.
    pub(crate) fn fail_all(&self) {
        let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            let batch = BatchId::new(id);
            self.resolve_err(batch, StreamError::ShutdownTimeout { batch });
        }
    }
}

/// A sealed batch handed to the dispatcher, carrying its backpressure
/// permit until it resolves.
pub(crate) struct InFlight {
    pub batch: SealedBatch,
    pub chunk: Chunk,
    pub _permit: OwnedSemaphorePermit,
}

enum AttemptError {
    /// Can never succeed; resolve immediately.
    Terminal(StreamError),
    /// May succeed on redelivery.
    Transient { outcome: &'static str, detail: String },
}

/// Sends sealed batches for one partition, strictly one at a time.
///
/// Sequential dispatch is what keeps per-partition order: batch `k+1` is not
/// sent until batch `k` reached a terminal outcome, even across retries.
pub(crate) struct Dispatcher {
    partition: PartitionIndex,
    broker: Arc<dyn StreamBroker>,
    pool: ConnectionPool<BrokerLink>,
    tracker: Arc<ConfirmationTracker>,
    policy: RetryPolicy,
    confirm_timeout: Duration,
    mandatory: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        partition: PartitionIndex,
        broker: Arc<dyn StreamBroker>,
        pool: ConnectionPool<BrokerLink>,
        tracker: Arc<ConfirmationTracker>,
        policy: RetryPolicy,
        confirm_timeout: Duration,
        mandatory: bool,
    ) -> Self {
        Self {
            partition,
            broker,
            pool,
            tracker,
            policy,
            confirm_timeout,
            mandatory,
        }
    }

    /// Drain the dispatch queue until the producer closes it.
    pub(crate) async fn run(self, mut queue: mpsc::Receiver<InFlight>) {
        while let Some(inflight) = queue.recv().await {
            self.dispatch(inflight).await;
        }
        debug!(partition = self.partition.value(), "dispatcher stopped");
    }

    async fn dispatch(&self, inflight: InFlight) {
        let batch = &inflight.batch;

        // Mandatory publishing fails fast: no route means no attempt and no
        // retries.
        if self.mandatory && !self.broker.has_route(self.partition).await {
            metrics::record_confirmation("unroutable");
            self.tracker.resolve_err(
                batch.id,
                StreamError::Unroutable {
                    partition: self.partition,
                },
            );
            return;
        }

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let (outcome, detail) = match self.attempt(&inflight.chunk).await {
                Ok(offset) => {
                    metrics::record_confirmation("confirmed");
                    if attempts > 1 {
                        metrics::record_retry("success");
                    }
                    self.tracker.resolve_ok(batch.id, offset);
                    return;
                }
                Err(AttemptError::Terminal(error)) => {
                    metrics::record_confirmation("rejected");
                    self.tracker.resolve_err(batch.id, error);
                    return;
                }
                Err(AttemptError::Transient { outcome, detail }) => {
                    metrics::record_confirmation(outcome);
                    (outcome, detail)
                }
            };

            if !self.policy.allows_retry(attempts) {
                metrics::record_retry("exhausted");
                self.tracker.resolve_err(
                    batch.id,
                    StreamError::PublishFailed {
                        batch: batch.id,
                        attempts,
                        last_failure: detail,
                        messages: Arc::clone(&batch.messages),
                    },
                );
                return;
            }

            let delay = self.policy.next_delay(attempts);
            metrics::record_retry("attempt");
            debug!(
                batch = batch.id.value(),
                partition = self.partition.value(),
                attempt = attempts,
                outcome,
                delay_ms = delay.as_millis() as u64,
                "retrying batch"
            );
            sleep(delay).await;
        }
    }

    /// One delivery attempt: connection, append, confirmation wait.
    async fn attempt(&self, chunk: &Chunk) -> std::result::Result<ChunkOffset, AttemptError> {
        let _link = self.pool.acquire().await.map_err(|error| {
            if error.is_retryable() {
                AttemptError::Transient {
                    outcome: "failed",
                    detail: error.to_string(),
                }
            } else {
                AttemptError::Terminal(error)
            }
        })?;

        let appended = timeout(
            self.confirm_timeout,
            self.broker.append(self.partition, chunk.clone()),
        )
        .await;

        match appended {
            Ok(Ok(AppendOutcome::Accepted(offset))) => Ok(offset),
            Ok(Ok(AppendOutcome::Rejected(RejectReason::Unroutable))) => {
                Err(AttemptError::Terminal(StreamError::Unroutable {
                    partition: self.partition,
                }))
            }
            // Other rejections may clear up; retry them.
            Ok(Ok(AppendOutcome::Rejected(reason))) => Err(AttemptError::Transient {
                outcome: "rejected_retryable",
                detail: format!("broker rejected append: {}", reason.as_str()),
            }),
            Ok(Err(error)) if error.is_retryable() => Err(AttemptError::Transient {
                outcome: "failed",
                detail: error.to_string(),
            }),
            Ok(Err(error)) => Err(AttemptError::Terminal(error)),
            Err(_) => Err(AttemptError::Transient {
                outcome: "expired",
                detail: format!(
                    "no confirmation within {} ms",
                    self.confirm_timeout.as_millis()
                ),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::compression::Compression;
    use crate::filter::FilterIndex;
    use crate::message::Message;
    use crate::producer::accumulator::SealReason;
    use crate::types::FilterValue;
    use tokio::sync::Semaphore;

    fn sealed_batch(id: u64) -> (SealedBatch, Chunk) {
        let messages: Arc<[Message]> = vec![Message::builder().payload("m").build()].into();
        let chunk = Chunk::build(
            &messages,
            FilterValue::wildcard(),
            FilterIndex::empty(),
            true,
            Compression::None,
        )
        .unwrap();
        let batch = SealedBatch {
            id: BatchId::new(id),
            partition: PartitionIndex::new(0),
            byte_size: messages.iter().map(Message::encoded_len).sum(),
            messages,
            reason: SealReason::Count,
        };
        (batch, chunk)
    }

    fn dispatcher(
        broker: Arc<InMemoryBroker>,
        tracker: Arc<ConfirmationTracker>,
        policy: RetryPolicy,
        confirm_timeout: Duration,
        mandatory: bool,
    ) -> Dispatcher {
        let pool = ConnectionPool::new(
            2,
            Duration::from_secs(5),
            Duration::from_secs(60),
            || BrokerLink,
        );
        Dispatcher::new(
            PartitionIndex::new(0),
            broker,
            pool,
            tracker,
            policy,
            confirm_timeout,
            mandatory,
        )
    }

    async fn permit() -> OwnedSemaphorePermit {
        Arc::new(Semaphore::new(1)).acquire_owned().await.unwrap()
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(10),
            Duration::from_millis(100),
            2.0,
            max_attempts,
        )
    }

    #[tokio::test]
    async fn test_confirmed_batch_resolves_waiters_with_offset() {
        let broker = InMemoryBroker::new(1);
        let tracker = ConfirmationTracker::new();
        let d = dispatcher(
            broker,
            Arc::clone(&tracker),
            policy(3),
            Duration::from_secs(5),
            false,
        );

        let (batch, chunk) = sealed_batch(1);
        let (tx, rx) = oneshot::channel();
        tracker.begin(&batch, vec![tx]);
        d.dispatch(InFlight {
            batch,
            chunk,
            _permit: permit().await,
        })
        .await;

        let offset = rx.await.unwrap().unwrap();
        assert_eq!(offset.value(), 0);
        assert_eq!(tracker.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_mandatory_unroutable_fails_without_any_attempt() {
        let broker = InMemoryBroker::new(1);
        broker.set_routable(PartitionIndex::new(0), false);
        let tracker = ConfirmationTracker::new();
        let d = dispatcher(
            Arc::clone(&broker),
            Arc::clone(&tracker),
            policy(5),
            Duration::from_secs(5),
            true,
        );

        let (batch, chunk) = sealed_batch(2);
        let (tx, rx) = oneshot::channel();
        tracker.begin(&batch, vec![tx]);
        d.dispatch(InFlight {
            batch,
            chunk,
            _permit: permit().await,
        })
        .await;

        assert!(matches!(
            rx.await.unwrap(),
            Err(StreamError::Unroutable { .. })
        ));
        // No append ever reached the log.
        assert_eq!(broker.chunk_count(PartitionIndex::new(0)).await, 0);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_to_success() {
        let broker = InMemoryBroker::new(1);
        broker.fail_next_appends(2);
        let tracker = ConfirmationTracker::new();
        let d = dispatcher(
            Arc::clone(&broker),
            Arc::clone(&tracker),
            policy(5),
            Duration::from_secs(5),
            false,
        );

        let (batch, chunk) = sealed_batch(3);
        let (tx, rx) = oneshot::channel();
        tracker.begin(&batch, vec![tx]);
        d.dispatch(InFlight {
            batch,
            chunk,
            _permit: permit().await,
        })
        .await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(broker.chunk_count(PartitionIndex::new(0)).await, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_carry_original_messages() {
        let broker = InMemoryBroker::new(1);
        broker.fail_next_appends(10);
        let tracker = ConfirmationTracker::new();
        let d = dispatcher(
            broker,
            Arc::clone(&tracker),
            policy(3),
            Duration::from_secs(5),
            false,
        );

        let (batch, chunk) = sealed_batch(4);
        let expected = Arc::clone(&batch.messages);
        let (tx, rx) = oneshot::channel();
        tracker.begin(&batch, vec![tx]);
        d.dispatch(InFlight {
            batch,
            chunk,
            _permit: permit().await,
        })
        .await;

        match rx.await.unwrap() {
            Err(StreamError::PublishFailed {
                attempts, messages, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(messages.len(), expected.len());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_confirmation_expires_and_retries() {
        let broker = InMemoryBroker::new(1);
        broker.drop_next_appends(1);
        let tracker = ConfirmationTracker::new();
        let d = dispatcher(
            Arc::clone(&broker),
            Arc::clone(&tracker),
            policy(3),
            Duration::from_secs(30),
            false,
        );

        let (batch, chunk) = sealed_batch(5);
        let (tx, rx) = oneshot::channel();
        tracker.begin(&batch, vec![tx]);
        d.dispatch(InFlight {
            batch,
            chunk,
            _permit: permit().await,
        })
        .await;

        assert!(rx.await.unwrap().is_ok());
        assert_eq!(broker.chunk_count(PartitionIndex::new(0)).await, 1);
    }

    #[tokio::test]
    async fn test_fail_all_resolves_stragglers_with_shutdown_timeout() {
        let tracker = ConfirmationTracker::new();
        let (batch, _) = sealed_batch(6);
        let (tx, rx) = oneshot::channel();
        tracker.begin(&batch, vec![tx]);

        tracker.fail_all();
        assert!(matches!(
            rx.await.unwrap(),
            Err(StreamError::ShutdownTimeout { .. })
        ));
        assert_eq!(tracker.pending_count(), 0);
    }
}
