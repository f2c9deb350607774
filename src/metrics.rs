//! Prometheus metrics for the publishing and filtering core.
//!
//! Covers the publish path (messages accepted, batches sealed, confirmation
//! outcomes, retries), the consume path (chunk admission, message delivery)
//! and the connection pool.
//!
//! # Safety
//!
//! All metrics are registered to a custom registry with the "streamlet"
//! prefix to avoid name collisions with other libraries using the default
//! Prometheus registry. Registration errors are handled gracefully: if a
//! metric fails to register, an unregistered fallback is used instead of
//! panicking.

use once_cell::sync::Lazy;
use prometheus::{
    Encoder, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder, opts,
};
use tracing::warn;

/// Custom Prometheus registry for streamlet metrics.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    Registry::new_custom(Some("streamlet".to_string()), None).unwrap_or_else(|_| Registry::new())
});

/// Declare an IntCounter metric (no labels).
macro_rules! define_counter {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounter> =
            Lazy::new(|| register_int_counter_safe(&REGISTRY, $metric_name, $help));
    };
}

/// Declare an IntCounterVec metric with labels.
macro_rules! define_counter_vec {
    ($name:ident, $metric_name:expr, $help:expr, [$($label:expr),+ $(,)?]) => {
        #[doc = $help]
        pub static $name: Lazy<IntCounterVec> = Lazy::new(|| {
            register_int_counter_vec_safe(&REGISTRY, $metric_name, $help, &[$($label),+])
        });
    };
}

/// Declare an IntGauge metric.
macro_rules! define_gauge {
    ($name:ident, $metric_name:expr, $help:expr) => {
        #[doc = $help]
        pub static $name: Lazy<IntGauge> =
            Lazy::new(|| register_int_gauge_safe(&REGISTRY, $metric_name, $help));
    };
}

// =============================================================================
// Publish path
// =============================================================================

define_counter!(
    MESSAGES_PUBLISHED,
    "messages_published_total",
    "Total messages accepted by the producer"
);
define_counter_vec!(
    BATCHES_SEALED,
    "batches_sealed_total",
    "Total batches sealed, by trigger",
    ["reason"]
);
define_counter_vec!(
    CONFIRMATIONS,
    "confirmations_total",
    "Terminal confirmation outcomes per batch attempt",
    ["outcome"]
);
define_counter_vec!(
    RETRY_ATTEMPTS,
    "retry_attempts_total",
    "Retry attempts by outcome",
    ["outcome"]
);
define_gauge!(
    PENDING_CONFIRMATIONS,
    "pending_confirmations",
    "Batches currently sealed but not yet resolved"
);

// =============================================================================
// Consume path
// =============================================================================

define_counter!(
    CHUNKS_ADMITTED,
    "chunks_admitted_total",
    "Chunks that passed first-tier admission"
);
define_counter!(
    CHUNKS_SKIPPED,
    "chunks_skipped_total",
    "Chunks skipped by the filter index without being opened"
);
define_counter!(
    MESSAGES_DELIVERED,
    "messages_delivered_total",
    "Messages that matched the subscription predicate"
);
define_counter!(
    MESSAGES_FILTERED,
    "messages_filtered_total",
    "Messages from admitted chunks dropped by the predicate"
);

// =============================================================================
// Connection pool
// =============================================================================

define_counter!(
    POOL_EXHAUSTED,
    "pool_exhausted_total",
    "Connection acquisitions that timed out waiting for a permit"
);

// ============================================================================
// Safe metric registration helpers
// ============================================================================

fn register_int_counter_safe(registry: &Registry, name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "failed to register IntCounter, using unregistered fallback");
            counter
        }
    }
}

fn register_int_counter_vec_safe(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> IntCounterVec {
    let counter =
        IntCounterVec::new(opts!(name, help), labels).expect("metric opts should be valid");
    match registry.register(Box::new(counter.clone())) {
        Ok(()) => counter,
        Err(e) => {
            warn!(name, error = %e, "failed to register IntCounterVec, using unregistered fallback");
            counter
        }
    }
}

fn register_int_gauge_safe(registry: &Registry, name: &str, help: &str) -> IntGauge {
    let gauge = IntGauge::new(name, help).expect("metric name/help should be valid");
    match registry.register(Box::new(gauge.clone())) {
        Ok(()) => gauge,
        Err(e) => {
            warn!(name, error = %e, "failed to register IntGauge, using unregistered fallback");
            gauge
        }
    }
}

/// Force initialization of every metric so the first scrape sees them all
/// at zero. Idempotent.
pub fn init_metrics() {
    let _ = &*MESSAGES_PUBLISHED;
    let _ = &*BATCHES_SEALED;
    let _ = &*CONFIRMATIONS;
    let _ = &*RETRY_ATTEMPTS;
    let _ = &*PENDING_CONFIRMATIONS;
    let _ = &*CHUNKS_ADMITTED;
    let _ = &*CHUNKS_SKIPPED;
    let _ = &*MESSAGES_DELIVERED;
    let _ = &*MESSAGES_FILTERED;
    let _ = &*POOL_EXHAUSTED;
}

/// Encode all metrics in Prometheus text format.
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record a terminal confirmation outcome.
pub fn record_confirmation(outcome: &str) {
    CONFIRMATIONS.with_label_values(&[outcome]).inc();
}

/// Record one retry attempt, or its resolution.
pub fn record_retry(outcome: &str) {
    RETRY_ATTEMPTS.with_label_values(&[outcome]).inc();
}

/// Record a batch seal with its trigger.
pub fn record_batch_sealed(reason: &str) {
    BATCHES_SEALED.with_label_values(&[reason]).inc();
}
