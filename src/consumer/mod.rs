//! The consume pipeline: chunk admission, then per-message evaluation.
//!
//! A subscription pulls chunks from every partition and filters in two
//! tiers. Tier one probes the chunk header's filter index against the
//! subscriber's value set and skips whole chunks without opening them; it
//! may admit a chunk with no matching message, never the reverse. Tier two
//! opens admitted chunks and checks each message exactly: its filter value
//! against the value set, then the optional attribute predicate. Tier one
//! is bandwidth, tier two is correctness.
//!
//! A corrupt chunk surfaces as an error item on the stream for that chunk;
//! delivery then continues with the next one. Nothing is skipped silently.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

use crate::broker::{OffsetPolicy, StreamBroker};
use crate::chunk::Chunk;
use crate::config::StreamConfig;
use crate::constants::DELIVERY_QUEUE_DEPTH;
use crate::error::{Result, StreamError};
use crate::filter::{FilterSet, Predicate};
use crate::message::Message;
use crate::metrics;
use crate::producer::KeyExpression;
use crate::types::{ChunkOffset, FilterValue, PartitionIndex};

/// One message delivered to a subscriber, with its provenance.
#[derive(Debug, Clone)]
pub struct DeliveredMessage {
    pub partition: PartitionIndex,
    pub offset: ChunkOffset,
    pub message: Message,
}

/// A live subscription across all partitions.
#[derive(Debug)]
pub struct MessageStream {
    rx: mpsc::Receiver<Result<DeliveredMessage>>,
}

impl MessageStream {
    /// Next delivery, or `None` once the subscription ends.
    pub async fn recv(&mut self) -> Option<Result<DeliveredMessage>> {
        self.rx.recv().await
    }

    /// Adapt into a [`tokio_stream::Stream`].
    pub fn into_stream(self) -> ReceiverStream<Result<DeliveredMessage>> {
        ReceiverStream::new(self.rx)
    }
}

/// The stream consumption engine.
pub struct StreamConsumer {
    broker: Arc<dyn StreamBroker>,
    partition_count: u32,
    value_expression: KeyExpression,
}

impl StreamConsumer {
    /// Build a consumer for the stream described by `config`.
    pub fn new(config: &StreamConfig, broker: Arc<dyn StreamBroker>) -> Result<Self> {
        Ok(Self {
            broker,
            partition_count: config.partition_count,
            value_expression: KeyExpression::parse(&config.filter_value_expression)?,
        })
    }

    /// Open a filtered subscription over every partition.
    ///
    /// `filter` drives chunk admission and the exact per-message value
    /// check; `predicate` is an optional attribute expression evaluated on
    /// top. Predicate syntax errors are reported here, never per message.
    pub async fn subscribe(
        &self,
        filter: FilterSet,
        predicate: Option<&str>,
        policy: OffsetPolicy,
    ) -> Result<MessageStream> {
        let predicate = Predicate::parse(predicate)?;
        let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_DEPTH);

        for index in 0..self.partition_count {
            let partition = PartitionIndex::new(index);
            let chunks = self.broker.subscribe(partition, policy).await?;
            let pump = PartitionPump {
                partition,
                filter: filter.clone(),
                predicate: predicate.clone(),
                value_expression: self.value_expression.clone(),
                deliveries: tx.clone(),
            };
            tokio::spawn(pump.run(chunks));
        }

        info!(
            partitions = self.partition_count,
            values = filter.values().len(),
            "subscription opened"
        );
        Ok(MessageStream { rx })
    }
}

/// Per-partition delivery task.
struct PartitionPump {
    partition: PartitionIndex,
    filter: FilterSet,
    predicate: Predicate,
    value_expression: KeyExpression,
    deliveries: mpsc::Sender<Result<DeliveredMessage>>,
}

impl PartitionPump {
    async fn run(self, mut chunks: mpsc::Receiver<Chunk>) {
        while let Some(chunk) = chunks.recv().await {
            if !self.filter.admits(&chunk.header().meta()) {
                metrics::CHUNKS_SKIPPED.inc();
                debug!(
                    partition = self.partition.value(),
                    offset = chunk.offset().value(),
                    "chunk skipped by filter index"
                );
                continue;
            }
            metrics::CHUNKS_ADMITTED.inc();
            if self.deliver(&chunk).await.is_err() {
                // Subscriber hung up.
                return;
            }
        }
    }

    async fn deliver(
        &self,
        chunk: &Chunk,
    ) -> std::result::Result<(), mpsc::error::SendError<Result<DeliveredMessage>>> {
        let offset = chunk.offset();
        let messages = match chunk.open() {
            Ok(messages) => messages,
            Err(error) => {
                return self
                    .deliveries
                    .send(Err(StreamError::CorruptChunk {
                        partition: self.partition,
                        offset,
                        reason: error.to_string(),
                    }))
                    .await;
            }
        };

        for message in messages {
            if self.matches(&message) {
                metrics::MESSAGES_DELIVERED.inc();
                self.deliveries
                    .send(Ok(DeliveredMessage {
                        partition: self.partition,
                        offset,
                        message,
                    }))
                    .await?;
            } else {
                metrics::MESSAGES_FILTERED.inc();
            }
        }
        Ok(())
    }

    /// Exact second-tier check; this is where admission false positives and
    /// wildcard-chunk strays are dropped.
    fn matches(&self, message: &Message) -> bool {
        if !self.filter.is_empty() {
            let admitted = self
                .value_expression
                .evaluate(message)
                .map(FilterValue::new)
                .is_some_and(|value| self.filter.values().contains(&value));
            if !admitted {
                return false;
            }
        }
        self.predicate.matches(message.attributes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::compression::Compression;
    use crate::types::BatchId;
    use crate::producer::{FilterTagger, KeyExpression};
    use crate::config::FilterConflictPolicy;

    fn test_config() -> StreamConfig {
        StreamConfig {
            filter_value_expression: "attributes['region']".to_string(),
            ..Default::default()
        }
    }

    fn message(region: &str, kind: &str) -> Message {
        Message::builder()
            .payload(format!("{region}/{kind}"))
            .attribute("region", region)
            .attribute("kind", kind)
            .build()
    }

    fn tagged_chunk(messages: &[Message]) -> Chunk {
        let tagger = FilterTagger::new(
            KeyExpression::parse("attributes['region']").unwrap(),
            FilterConflictPolicy::Wildcard,
        );
        let tag = tagger.tag(BatchId::new(1), messages).unwrap();
        Chunk::build(messages, tag.value, tag.index, tag.unfiltered, Compression::None).unwrap()
    }

    async fn seed(broker: &InMemoryBroker, messages: &[Message]) {
        broker
            .append(PartitionIndex::new(0), tagged_chunk(messages))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_matching_chunk_delivered() {
        let broker = InMemoryBroker::new(1);
        seed(&broker, &[message("eu", "order"), message("eu", "refund")]).await;

        let consumer = StreamConsumer::new(&test_config(), broker.clone()).unwrap();
        let mut stream = consumer
            .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
            .await
            .unwrap();

        let first = stream.recv().await.unwrap().unwrap();
        assert_eq!(first.message.attribute("region"), Some("eu"));
        let second = stream.recv().await.unwrap().unwrap();
        assert_eq!(second.message.attribute("kind"), Some("refund"));
    }

    #[tokio::test]
    async fn test_mismatched_chunk_skipped_entirely() {
        let broker = InMemoryBroker::new(1);
        seed(&broker, &[message("us", "order")]).await;
        seed(&broker, &[message("eu", "order")]).await;

        let consumer = StreamConsumer::new(&test_config(), broker.clone()).unwrap();
        let mut stream = consumer
            .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
            .await
            .unwrap();

        // Only the eu chunk's message arrives; the us chunk never opens.
        let delivered = stream.recv().await.unwrap().unwrap();
        assert_eq!(delivered.message.attribute("region"), Some("eu"));
        assert_eq!(delivered.offset.value(), 1);
    }

    #[tokio::test]
    async fn test_wildcard_chunk_strays_dropped_by_second_tier() {
        let broker = InMemoryBroker::new(1);
        // Mixed batch: wildcard-tagged chunk that every subscriber must open.
        seed(&broker, &[message("eu", "order"), message("us", "order")]).await;

        let consumer = StreamConsumer::new(&test_config(), broker.clone()).unwrap();
        let mut stream = consumer
            .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
            .await
            .unwrap();

        let delivered = stream.recv().await.unwrap().unwrap();
        assert_eq!(delivered.message.attribute("region"), Some("eu"));
    }

    #[tokio::test]
    async fn test_predicate_filters_messages() {
        let broker = InMemoryBroker::new(1);
        seed(&broker, &[message("eu", "order"), message("eu", "refund")]).await;

        let consumer = StreamConsumer::new(&test_config(), broker.clone()).unwrap();
        let mut stream = consumer
            .subscribe(
                FilterSet::all(),
                Some("kind = 'refund'"),
                OffsetPolicy::First,
            )
            .await
            .unwrap();

        let delivered = stream.recv().await.unwrap().unwrap();
        assert_eq!(delivered.message.attribute("kind"), Some("refund"));
    }

    #[tokio::test]
    async fn test_bad_predicate_fails_at_subscribe() {
        let broker = InMemoryBroker::new(1);
        let consumer = StreamConsumer::new(&test_config(), broker).unwrap();
        let err = consumer
            .subscribe(FilterSet::all(), Some("region ="), OffsetPolicy::First)
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidFilterSyntax { .. }));
    }

    #[tokio::test]
    async fn test_corrupt_chunk_surfaces_then_stream_continues() {
        let broker = InMemoryBroker::new(1);

        // Flip one byte inside a gzip body: the frame still decodes (all
        // length prefixes intact) but open() fails the gzip checksum.
        let messages = [message("eu", "order")];
        let tagger = FilterTagger::new(
            KeyExpression::parse("attributes['region']").unwrap(),
            FilterConflictPolicy::Wildcard,
        );
        let tag = tagger.tag(BatchId::new(1), &messages).unwrap();
        let chunk = Chunk::build(
            &messages,
            tag.value,
            tag.index,
            tag.unfiltered,
            Compression::Gzip,
        )
        .unwrap();
        let mut frame = chunk.encode().unwrap().to_vec();
        let len = frame.len();
        frame[len - 1] ^= 0xFF;
        let corrupt = Chunk::decode(&frame).unwrap();

        broker.append(PartitionIndex::new(0), corrupt).await.unwrap();
        seed(&broker, &[message("eu", "order")]).await;

        let consumer = StreamConsumer::new(&test_config(), broker.clone()).unwrap();
        let mut stream = consumer
            .subscribe(FilterSet::all(), None, OffsetPolicy::First)
            .await
            .unwrap();

        match stream.recv().await.unwrap() {
            Err(StreamError::CorruptChunk { partition, offset, .. }) => {
                assert_eq!(partition.value(), 0);
                assert_eq!(offset.value(), 0);
            }
            other => panic!("expected corrupt chunk error, got {other:?}"),
        }
        // Delivery continues with the next chunk.
        let delivered = stream.recv().await.unwrap().unwrap();
        assert_eq!(delivered.offset.value(), 1);
    }

    #[tokio::test]
    async fn test_offset_policy_last_skips_history() {
        let broker = InMemoryBroker::new(1);
        seed(&broker, &[message("eu", "old")]).await;

        let consumer = StreamConsumer::new(&test_config(), broker.clone()).unwrap();
        let mut stream = consumer
            .subscribe(FilterSet::all(), None, OffsetPolicy::Last)
            .await
            .unwrap();

        seed(&broker, &[message("eu", "new")]).await;
        let delivered = stream.recv().await.unwrap().unwrap();
        assert_eq!(delivered.message.attribute("kind"), Some("new"));
    }
}
