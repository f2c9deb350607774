//! Producer tagging and consumer filtering, exercised end to end.

use streamlet::prelude::*;

fn message(region: &str, kind: &str) -> Message {
    Message::builder()
        .payload(format!("{region}/{kind}"))
        .attribute("region", region)
        .attribute("kind", kind)
        .build()
}

fn filtered_config(batch_size: usize) -> StreamConfig {
    StreamConfig {
        batch_size,
        filter_value_expression: "attributes['region']".to_string(),
        ..Default::default()
    }
}

async fn publish_batch(producer: &StreamProducer, messages: Vec<Message>) {
    let mut receipts = Vec::new();
    for msg in messages {
        receipts.push(producer.publish(msg).await.unwrap());
    }
    for receipt in receipts {
        receipt.wait().await.unwrap();
    }
}

#[tokio::test]
async fn test_subscriber_sees_only_its_filter_values() {
    let broker = InMemoryBroker::new(1);
    let config = filtered_config(2);
    let producer = StreamProducer::new(config.clone(), broker.clone()).unwrap();

    publish_batch(&producer, vec![message("us", "order"), message("us", "order")]).await;
    publish_batch(&producer, vec![message("eu", "order"), message("eu", "refund")]).await;
    producer.close().await.unwrap();

    let consumer = StreamConsumer::new(&config, broker.clone()).unwrap();
    let mut stream = consumer
        .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
        .await
        .unwrap();

    // The us chunk (offset 0) is skipped without opening; both eu messages
    // arrive from offset 1.
    let first = stream.recv().await.unwrap().unwrap();
    assert_eq!(first.offset.value(), 1);
    assert_eq!(first.message.attribute("region"), Some("eu"));
    let second = stream.recv().await.unwrap().unwrap();
    assert_eq!(second.message.attribute("kind"), Some("refund"));
}

#[tokio::test]
async fn test_mixed_batch_goes_wildcard_and_is_filtered_per_message() {
    let broker = InMemoryBroker::new(1);
    let config = filtered_config(2);
    let producer = StreamProducer::new(config.clone(), broker.clone()).unwrap();

    // Divergent filter values in one batch; the default policy publishes the
    // chunk unfiltered rather than failing it.
    publish_batch(&producer, vec![message("eu", "order"), message("us", "order")]).await;
    producer.close().await.unwrap();

    let chunks = broker.chunks(PartitionIndex::new(0)).await;
    assert!(chunks[0].header().unfiltered);

    let consumer = StreamConsumer::new(&config, broker.clone()).unwrap();
    let mut stream = consumer
        .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
        .await
        .unwrap();

    // The wildcard chunk is always admitted; the us message is dropped by
    // the exact per-message check.
    let delivered = stream.recv().await.unwrap().unwrap();
    assert_eq!(delivered.message.attribute("region"), Some("eu"));
}

#[tokio::test]
async fn test_untagged_messages_reach_unfiltered_subscribers() {
    let broker = InMemoryBroker::new(1);
    let config = filtered_config(1);
    let producer = StreamProducer::new(config.clone(), broker.clone()).unwrap();

    // No region attribute at all: the chunk publishes unfiltered.
    let bare = Message::builder().payload("untagged").build();
    producer.publish(bare).await.unwrap().wait().await.unwrap();
    producer.close().await.unwrap();

    let consumer = StreamConsumer::new(&config, broker.clone()).unwrap();

    // An unfiltered subscription sees it.
    let mut all = consumer
        .subscribe(FilterSet::all(), None, OffsetPolicy::First)
        .await
        .unwrap();
    assert!(all.recv().await.unwrap().is_ok());

    // A value-filtered subscription does not: the chunk is admitted as
    // wildcard but the message has no value to match.
    let mut eu = consumer
        .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
        .await
        .unwrap();
    tokio::select! {
        delivered = eu.recv() => panic!("unexpected delivery: {delivered:?}"),
        _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
    }
}

#[tokio::test]
async fn test_multi_value_filter_set() {
    let broker = InMemoryBroker::new(1);
    let config = filtered_config(1);
    let producer = StreamProducer::new(config.clone(), broker.clone()).unwrap();

    for region in ["us", "eu", "apac", "eu"] {
        publish_batch(&producer, vec![message(region, "order")]).await;
    }
    producer.close().await.unwrap();

    let consumer = StreamConsumer::new(&config, broker.clone()).unwrap();
    let mut stream = consumer
        .subscribe(FilterSet::of(["eu", "apac"]), None, OffsetPolicy::First)
        .await
        .unwrap();

    let mut regions = Vec::new();
    for _ in 0..3 {
        let delivered = stream.recv().await.unwrap().unwrap();
        regions.push(delivered.message.attribute("region").unwrap().to_string());
    }
    assert_eq!(regions, ["eu", "apac", "eu"]);
}

#[tokio::test]
async fn test_predicate_composes_with_value_filter() {
    let broker = InMemoryBroker::new(1);
    let config = filtered_config(1);
    let producer = StreamProducer::new(config.clone(), broker.clone()).unwrap();

    for (region, kind) in [("eu", "order"), ("eu", "refund"), ("us", "refund")] {
        publish_batch(&producer, vec![message(region, kind)]).await;
    }
    producer.close().await.unwrap();

    let consumer = StreamConsumer::new(&config, broker.clone()).unwrap();
    let mut stream = consumer
        .subscribe(
            FilterSet::of(["eu"]),
            Some("kind = 'refund' OR kind IN ('cancel', 'chargeback')"),
            OffsetPolicy::First,
        )
        .await
        .unwrap();

    let delivered = stream.recv().await.unwrap().unwrap();
    assert_eq!(delivered.message.attribute("region"), Some("eu"));
    assert_eq!(delivered.message.attribute("kind"), Some("refund"));
}

#[tokio::test]
async fn test_filtering_spans_partitions() {
    let broker = InMemoryBroker::new(4);
    let config = StreamConfig {
        partition_count: 4,
        partition_key_expression: "attributes['kind']".to_string(),
        ..filtered_config(1)
    };
    let producer = StreamProducer::new(config.clone(), broker.clone()).unwrap();

    for kind in ["order", "refund", "cancel", "chargeback"] {
        publish_batch(&producer, vec![message("eu", kind)]).await;
        publish_batch(&producer, vec![message("us", kind)]).await;
    }
    producer.close().await.unwrap();

    let consumer = StreamConsumer::new(&config, broker.clone()).unwrap();
    let mut stream = consumer
        .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
        .await
        .unwrap();

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let delivered = stream.recv().await.unwrap().unwrap();
        assert_eq!(delivered.message.attribute("region"), Some("eu"));
        kinds.push(delivered.message.attribute("kind").unwrap().to_string());
    }
    kinds.sort();
    assert_eq!(kinds, ["cancel", "chargeback", "order", "refund"]);
}
