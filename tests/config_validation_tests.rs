//! Configuration loading from serialized documents.

use streamlet::prelude::*;

#[test]
fn test_full_document_loads_and_validates() {
    let config: StreamConfig = serde_json::from_str(
        r#"{
            "batch_size": 50,
            "batch_buffer_size": 262144,
            "batch_publishing_delay_ms": 250,
            "compression": "snappy",
            "partition_count": 8,
            "partition_key_expression": "attributes['order-id']",
            "filter_value_expression": "attributes['region']",
            "max_attempts": 5,
            "backoff_initial_interval_ms": 500,
            "backoff_max_interval_ms": 8000,
            "backoff_multiplier": 2.0,
            "confirm_timeout_ms": 10000,
            "mandatory": true,
            "max_connections": 10,
            "pending_high_water": 128,
            "strict_routing": true,
            "filter_conflict_policy": "reject"
        }"#,
    )
    .unwrap();
    config.validate().unwrap();

    assert_eq!(config.batch_size, 50);
    assert_eq!(config.compression, Compression::Snappy);
    assert_eq!(config.partition_count, 8);
    assert_eq!(config.filter_conflict_policy, FilterConflictPolicy::Reject);
    assert!(config.mandatory);
    assert!(config.strict_routing);
    // Fields absent from the document keep their defaults.
    assert_eq!(config.max_idle_time_secs, 60);
    assert_eq!(config.shutdown_timeout_ms, 10_000);
}

#[test]
fn test_unknown_compression_rejected() {
    assert!(serde_json::from_str::<StreamConfig>(r#"{"compression": "zstd"}"#).is_err());
}

#[test]
fn test_unknown_conflict_policy_rejected() {
    assert!(serde_json::from_str::<StreamConfig>(r#"{"filter_conflict_policy": "drop"}"#).is_err());
}

#[test]
fn test_loaded_document_still_subject_to_validation() {
    // Deserialization accepts any numbers; validate() is the gate.
    let config: StreamConfig = serde_json::from_str(r#"{"batch_size": 0}"#).unwrap();
    assert!(matches!(config.validate(), Err(StreamError::Config(_))));
}

#[test]
fn test_zero_confirm_timeout_rejected() {
    let config = StreamConfig {
        confirm_timeout_ms: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_pending_high_water_rejected() {
    let config = StreamConfig {
        pending_high_water: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[test]
fn test_zero_connections_rejected() {
    let config = StreamConfig {
        max_connections: 0,
        ..Default::default()
    };
    assert!(config.validate().is_err());
}

#[tokio::test]
async fn test_producer_rejects_invalid_config_up_front() {
    let broker = InMemoryBroker::new(1);
    let config = StreamConfig {
        partition_count: 2,
        ..Default::default()
    };
    assert!(matches!(
        StreamProducer::new(config, broker),
        Err(StreamError::Config(_))
    ));
}
