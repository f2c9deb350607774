//! # Streamlet
//! Client-side publishing and filtering core for partitioned message
//! streams.
//!
//! This crate implements the producer and consumer engines that sit between
//! an application and an append-only chunked stream log: message batching
//! with count/byte/delay sealing, deterministic partition routing, chunk
//! compression, broker confirmation tracking with bounded retries, and
//! two-tier consumer-side filtering (a probabilistic chunk index plus exact
//! per-message evaluation).
//!
//! # Goals
//! - Easy to understand code
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/), [Nom](https://docs.rs/nom/latest/nom/)
//! - Guarantee that every accepted message resolves to a confirmation or an
//!   error; no fire-and-forget loss path
//! - Be a building block for stream-binder style messaging clients
//!
//! ## Getting started
//! Install `streamlet` to your rust project with `cargo add streamlet` or include the following snippet in your `Cargo.toml` dependencies:
//! ```toml
//! streamlet = "0.1"
//! ```
//!
//! ### Publishing and consuming
//! The [`StreamProducer`](producer::StreamProducer) batches, routes and
//! publishes messages against any [`StreamBroker`](broker::StreamBroker)
//! implementation; the [`StreamConsumer`](consumer::StreamConsumer) opens
//! filtered subscriptions over the same log.
//!
//! ```rust,no_run
//! use streamlet::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = StreamConfig {
//!         partition_count: 4,
//!         partition_key_expression: "attributes['order-id']".to_string(),
//!         filter_value_expression: "attributes['region']".to_string(),
//!         ..Default::default()
//!     };
//!     let broker = InMemoryBroker::new(config.partition_count);
//!
//!     let producer = StreamProducer::new(config.clone(), broker.clone())?;
//!     let receipt = producer
//!         .publish(
//!             Message::builder()
//!                 .payload("order placed")
//!                 .attribute("order-id", "o-42")
//!                 .attribute("region", "eu")
//!                 .build(),
//!         )
//!         .await?;
//!     let offset = receipt.wait().await?;
//!     println!("confirmed at {offset}");
//!
//!     let consumer = StreamConsumer::new(&config, broker)?;
//!     let mut stream = consumer
//!         .subscribe(FilterSet::of(["eu"]), None, OffsetPolicy::First)
//!         .await?;
//!     while let Some(delivered) = stream.recv().await {
//!         println!("{:?}", delivered?);
//!     }
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]

pub mod broker;
pub mod chunk;
mod codec;
pub mod compression;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod error;
pub mod filter;
pub mod message;
pub mod metrics;
pub mod pool;
pub mod producer;
pub mod telemetry;
pub mod types;

pub mod prelude {
    //! Main exports for the publish and consume paths.
    pub use crate::broker::{
        AppendOutcome, InMemoryBroker, OffsetPolicy, RejectReason, StreamBroker,
    };
    pub use crate::compression::Compression;
    pub use crate::config::{FilterConflictPolicy, StreamConfig};
    pub use crate::consumer::{DeliveredMessage, MessageStream, StreamConsumer};
    pub use crate::error::{Result, StreamError};
    pub use crate::filter::{FilterIndex, FilterSet, Predicate};
    pub use crate::message::Message;
    pub use crate::producer::{PublishReceipt, StreamProducer};
    pub use crate::types::{BatchId, ChunkOffset, FilterValue, PartitionIndex, SequenceNumber};

    pub use bytes;
}
