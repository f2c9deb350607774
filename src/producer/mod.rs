//! The publish pipeline.
//!
//! One [`StreamProducer`] owns a pair of tasks per partition:
//!
//! - a partition worker that accumulates messages into batches, handles the
//!   publishing-delay timer, tags sealed batches and renders them to chunks
//! - a dispatcher that sends chunks to the broker strictly one at a time,
//!   retrying on the backoff schedule
//!
//! The two are joined by a small bounded queue, and a producer-wide
//! semaphore caps sealed-but-unresolved batches; when the broker lags,
//! `publish` backpressures instead of buffering without bound.
//!
//! Every accepted message resolves: the [`PublishReceipt`] completes with
//! the confirmed chunk offset or the batch's terminal error. There is no
//! fire-and-forget loss path.

pub mod accumulator;
pub mod confirm;
pub mod retry;
pub mod router;
pub mod tagger;

pub use accumulator::{BatchAccumulator, SealReason, SealedBatch};
pub use confirm::ConfirmationTracker;
pub use retry::RetryPolicy;
pub use router::{KeyExpression, PartitionRouter};
pub use tagger::{FilterTagger, TagOutcome};

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::time::sleep;
use tracing::{debug, info};

use crate::broker::StreamBroker;
use crate::chunk::Chunk;
use crate::compression::Compression;
use crate::config::StreamConfig;
use crate::constants::{DISPATCH_QUEUE_DEPTH, PUBLISH_QUEUE_DEPTH};
use crate::error::{Result, StreamError};
use crate::message::Message;
use crate::metrics;
use crate::pool::ConnectionPool;
use crate::types::{BatchId, ChunkOffset, PartitionIndex, SequenceNumber};

use confirm::{BrokerLink, Dispatcher, InFlight, Waiter};

/// Resolves once the message's batch reaches a terminal outcome.
#[derive(Debug)]
pub struct PublishReceipt {
    rx: oneshot::Receiver<Result<ChunkOffset>>,
}

impl PublishReceipt {
    /// Wait for the confirmed chunk offset or the batch's error.
    pub async fn wait(self) -> Result<ChunkOffset> {
        self.rx.await.map_err(|_| StreamError::ProducerClosed)?
    }
}

enum Command {
    Publish { message: Message, reply: Waiter },
    TimerFired { batch: BatchId },
    Drain { done: oneshot::Sender<()> },
}

/// The stream publishing engine.
pub struct StreamProducer {
    router: PartitionRouter,
    commands: Vec<mpsc::Sender<Command>>,
    tracker: Arc<ConfirmationTracker>,
    sequences: AtomicU64,
    closed: AtomicBool,
    shutdown_timeout: Duration,
}

impl StreamProducer {
    /// Validate the configuration and spawn the per-partition pipeline.
    pub fn new(config: StreamConfig, broker: Arc<dyn StreamBroker>) -> Result<Self> {
        config.validate()?;
        metrics::init_metrics();

        let router = PartitionRouter::from_config(&config)?;
        let tagger = FilterTagger::from_config(&config)?;
        let policy = RetryPolicy::from_config(&config);
        let tracker = ConfirmationTracker::new();
        let permits = Arc::new(Semaphore::new(config.pending_high_water));
        let batch_ids = Arc::new(AtomicU64::new(1));
        let pool = ConnectionPool::new(
            config.max_connections,
            config.pool_acquire_timeout(),
            config.max_idle_time(),
            || BrokerLink,
        );

        let mut commands = Vec::with_capacity(config.partition_count as usize);
        for index in 0..config.partition_count {
            let partition = PartitionIndex::new(index);
            let (cmd_tx, cmd_rx) = mpsc::channel(PUBLISH_QUEUE_DEPTH);
            let (dispatch_tx, dispatch_rx) = mpsc::channel(DISPATCH_QUEUE_DEPTH);

            let dispatcher = Dispatcher::new(
                partition,
                Arc::clone(&broker),
                pool.clone(),
                Arc::clone(&tracker),
                policy.clone(),
                config.confirm_timeout(),
                config.mandatory,
            );
            tokio::spawn(dispatcher.run(dispatch_rx));

            let worker = PartitionWorker {
                partition,
                accumulator: BatchAccumulator::new(
                    partition,
                    config.batch_size,
                    config.batch_buffer_size,
                    Arc::clone(&batch_ids),
                ),
                tagger: tagger.clone(),
                compression: config.compression,
                delay: config.batch_publishing_delay(),
                timer: cmd_tx.downgrade(),
                timed: None,
                waiters: HashMap::new(),
                tracker: Arc::clone(&tracker),
                permits: Arc::clone(&permits),
                dispatch: dispatch_tx,
            };
            tokio::spawn(worker.run(cmd_rx));

            commands.push(cmd_tx);
        }

        info!(
            partitions = config.partition_count,
            batch_size = config.batch_size,
            compression = %config.compression,
            "stream producer started"
        );

        Ok(Self {
            router,
            commands,
            tracker,
            sequences: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown_timeout: config.shutdown_timeout(),
        })
    }

    /// Accept one message for publication.
    ///
    /// Refuses messages that exceed a wire-format limit, then routes, stamps
    /// the sequence number and hands the message to the partition worker.
    /// Backpressures when the pipeline is full. The returned receipt
    /// resolves when the message's batch does.
    pub async fn publish(&self, message: Message) -> Result<PublishReceipt> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::ProducerClosed);
        }
        message.check_wire_limits()?;
        let sequence = SequenceNumber::new(self.sequences.fetch_add(1, Ordering::Relaxed) + 1);
        let message = message.with_sequence(sequence);
        let partition = self.router.route(&message)?;

        let (reply, rx) = oneshot::channel();
        self.commands[partition.value() as usize]
            .send(Command::Publish { message, reply })
            .await
            .map_err(|_| StreamError::ProducerClosed)?;
        metrics::MESSAGES_PUBLISHED.inc();
        Ok(PublishReceipt { rx })
    }

    /// Batches currently sealed but not yet resolved.
    pub fn pending_batches(&self) -> usize {
        self.tracker.pending_count()
    }

    /// Drain and shut down.
    ///
    /// Seals every open batch, then waits up to the shutdown timeout for all
    /// pending confirmations. Stragglers past the deadline are failed with a
    /// shutdown-timeout error (their receipts resolve; nothing hangs).
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for command in &self.commands {
            let (done, done_rx) = oneshot::channel();
            if command.send(Command::Drain { done }).await.is_ok() {
                let _ = done_rx.await;
            }
        }

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        while self.tracker.pending_count() > 0 {
            let resolution = self.tracker.resolution();
            tokio::pin!(resolution);
            resolution.as_mut().enable();
            if self.tracker.pending_count() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, resolution).await.is_err() {
                let straggler = self.tracker.first_pending();
                self.tracker.fail_all();
                if let Some(batch) = straggler {
                    return Err(StreamError::ShutdownTimeout { batch });
                }
                break;
            }
        }
        info!("stream producer closed");
        Ok(())
    }
}

/// Accumulation side of one partition's pipeline.
struct PartitionWorker {
    partition: PartitionIndex,
    accumulator: BatchAccumulator,
    tagger: FilterTagger,
    compression: Compression,
    delay: Duration,
    timer: mpsc::WeakSender<Command>,
    timed: Option<BatchId>,
    waiters: HashMap<u64, Vec<Waiter>>,
    tracker: Arc<ConfirmationTracker>,
    permits: Arc<Semaphore>,
    dispatch: mpsc::Sender<InFlight>,
}

impl PartitionWorker {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            match commands.recv().await {
                Some(Command::Publish { message, reply }) => {
                    self.accept(message, reply).await;
                }
                Some(Command::TimerFired { batch }) => {
                    if let Some(sealed) = self.accumulator.seal_if(batch, SealReason::Delay) {
                        self.hand_off(sealed).await;
                    }
                }
                Some(Command::Drain { done }) => {
                    if let Some(sealed) = self.accumulator.seal(SealReason::Drain) {
                        self.hand_off(sealed).await;
                    }
                    let _ = done.send(());
                    break;
                }
                // All publish handles dropped without an explicit close.
                None => {
                    if let Some(sealed) = self.accumulator.seal(SealReason::Drain) {
                        self.hand_off(sealed).await;
                    }
                    break;
                }
            }
        }
        debug!(partition = self.partition.value(), "partition worker stopped");
    }

    async fn accept(&mut self, message: Message, reply: Waiter) {
        let sealed = self.accumulator.offer(message);

        // The new message sits either in the still-open batch or in the last
        // batch this offer sealed; its waiter follows it.
        let target = self
            .accumulator
            .open_batch_id()
            .or_else(|| sealed.last().map(|batch| batch.id));
        if let Some(id) = target {
            self.waiters.entry(id.value()).or_default().push(reply);
        }

        for batch in sealed {
            self.hand_off(batch).await;
        }

        // A freshly opened batch gets a delay timer; a stale timer firing
        // after its batch sealed is filtered out by id.
        if let Some(open) = self.accumulator.open_batch_id() {
            if self.timed != Some(open) {
                self.timed = Some(open);
                let timer = self.timer.clone();
                let delay = self.delay;
                tokio::spawn(async move {
                    sleep(delay).await;
                    if let Some(commands) = timer.upgrade() {
                        let _ = commands.send(Command::TimerFired { batch: open }).await;
                    }
                });
            }
        }
    }

    /// Tag, render and queue one sealed batch for dispatch.
    async fn hand_off(&mut self, batch: SealedBatch) {
        let waiters = self.waiters.remove(&batch.id.value()).unwrap_or_default();

        let built = self
            .tagger
            .tag(batch.id, &batch.messages)
            .and_then(|tag| {
                Chunk::build(
                    &batch.messages,
                    tag.value,
                    tag.index,
                    tag.unfiltered,
                    self.compression,
                )
            });
        let chunk = match built {
            Ok(chunk) => chunk,
            Err(error) => {
                // The batch never dispatches; every waiter gets the error.
                metrics::record_confirmation("failed");
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
                return;
            }
        };

        // Backpressure: held from seal until the batch resolves.
        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                for waiter in waiters {
                    let _ = waiter.send(Err(StreamError::ProducerClosed));
                }
                return;
            }
        };

        self.tracker.begin(&batch, waiters);
        let id = batch.id;
        if self
            .dispatch
            .send(InFlight {
                batch,
                chunk,
                _permit: permit,
            })
            .await
            .is_err()
        {
            self.tracker.resolve_err(id, StreamError::ProducerClosed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;

    fn config() -> StreamConfig {
        StreamConfig {
            batch_size: 2,
            batch_publishing_delay_ms: 50,
            ..Default::default()
        }
    }

    fn message(tag: &str) -> Message {
        Message::builder().payload(tag.to_string()).build()
    }

    #[tokio::test]
    async fn test_full_batch_publishes_and_confirms() {
        let broker = InMemoryBroker::new(1);
        let producer = StreamProducer::new(config(), broker.clone()).unwrap();

        let first = producer.publish(message("a")).await.unwrap();
        let second = producer.publish(message("b")).await.unwrap();

        let offset_a = first.wait().await.unwrap();
        let offset_b = second.wait().await.unwrap();
        assert_eq!(offset_a, offset_b, "both messages share one chunk");
        assert_eq!(broker.chunk_count(PartitionIndex::new(0)).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_seals_underfilled_batch() {
        let broker = InMemoryBroker::new(1);
        let producer = StreamProducer::new(config(), broker.clone()).unwrap();

        let receipt = producer.publish(message("lonely")).await.unwrap();
        // Only the 50ms publishing delay can seal this batch.
        let offset = receipt.wait().await.unwrap();
        assert_eq!(offset.value(), 0);
    }

    #[tokio::test]
    async fn test_sequences_are_monotonic() {
        let broker = InMemoryBroker::new(1);
        let producer = StreamProducer::new(config(), broker.clone()).unwrap();

        producer.publish(message("a")).await.unwrap();
        producer.publish(message("b")).await.unwrap();
        producer.close().await.unwrap();

        let chunks = broker.chunks(PartitionIndex::new(0)).await;
        let messages = chunks[0].open().unwrap();
        assert_eq!(messages[0].sequence().value(), 1);
        assert_eq!(messages[1].sequence().value(), 2);
    }

    #[tokio::test]
    async fn test_close_drains_open_batch() {
        let broker = InMemoryBroker::new(1);
        let producer = StreamProducer::new(
            StreamConfig {
                batch_size: 100,
                batch_publishing_delay_ms: 60_000,
                ..Default::default()
            },
            broker.clone(),
        )
        .unwrap();

        let receipt = producer.publish(message("a")).await.unwrap();
        producer.close().await.unwrap();
        assert!(receipt.wait().await.is_ok());
        assert_eq!(broker.chunk_count(PartitionIndex::new(0)).await, 1);
    }

    #[tokio::test]
    async fn test_publish_after_close_is_rejected() {
        let broker = InMemoryBroker::new(1);
        let producer = StreamProducer::new(config(), broker).unwrap();
        producer.close().await.unwrap();
        assert!(matches!(
            producer.publish(message("late")).await,
            Err(StreamError::ProducerClosed)
        ));
    }
}
