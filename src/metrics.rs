//! Metric helpers for `wireline`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. With the
//! `metrics` feature disabled the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Name of the gauge tracking active connections.
pub const CONNECTIONS_ACTIVE: &str = "wireline_connections_active";
/// Name of the counter tracking settled write records, labelled by outcome.
pub const WRITES_SETTLED: &str = "wireline_writes_settled_total";
/// Name of the counter tracking transitions into write-queue overload.
pub const WRITE_QUEUE_OVERLOADS: &str = "wireline_write_queue_overloads_total";
/// Name of the counter tracking resource cache events, labelled by event.
pub const CACHE_EVENTS: &str = "wireline_cache_events_total";
/// Name of the gauge tracking bytes resident in resource caches.
pub const CACHE_HEAP_BYTES: &str = "wireline_cache_heap_bytes";
/// Name of the counter tracking pipeline stage failures.
pub const STAGE_ERRORS: &str = "wireline_stage_errors_total";
/// Name of the counter tracking panics in connection tasks.
pub const CONNECTION_PANICS: &str = "wireline_connection_panics_total";

/// Final state of a write record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteSettlement {
    /// The write was transmitted.
    Completed,
    /// The transport reported a failure.
    Failed,
    /// The write was cancelled before transmission.
    Cancelled,
}

impl WriteSettlement {
    fn as_str(self) -> &'static str {
        match self {
            WriteSettlement::Completed => "completed",
            WriteSettlement::Failed => "failed",
            WriteSettlement::Cancelled => "cancelled",
        }
    }
}

/// Kind of resource cache event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheEvent {
    Added,
    Removed,
    Hit,
    Missed,
    Updated,
    Error,
}

impl CacheEvent {
    fn as_str(self) -> &'static str {
        match self {
            CacheEvent::Added => "added",
            CacheEvent::Removed => "removed",
            CacheEvent::Hit => "hit",
            CacheEvent::Missed => "missed",
            CacheEvent::Updated => "updated",
            CacheEvent::Error => "error",
        }
    }
}

/// Increment the active connections gauge.
pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

/// Decrement the active connections gauge.
pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a settled write.
pub fn inc_writes(settlement: WriteSettlement) {
    #[cfg(feature = "metrics")]
    counter!(WRITES_SETTLED, "outcome" => settlement.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = settlement.as_str();
}

/// Record a write queue crossing its pending limit.
pub fn inc_write_overloads() {
    #[cfg(feature = "metrics")]
    counter!(WRITE_QUEUE_OVERLOADS).increment(1);
}

/// Record a resource cache event.
pub fn inc_cache_event(event: CacheEvent) {
    #[cfg(feature = "metrics")]
    counter!(CACHE_EVENTS, "event" => event.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = event.as_str();
}

/// Publish the resident byte count of a named cache.
#[expect(
    clippy::cast_precision_loss,
    reason = "gauges are f64; byte counts stay well below 2^52"
)]
pub fn set_cache_heap_bytes(cache: &str, bytes: u64) {
    #[cfg(feature = "metrics")]
    gauge!(CACHE_HEAP_BYTES, "cache" => cache.to_owned()).set(bytes as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = (cache, bytes as f64);
}

/// Record a failing pipeline stage.
pub fn inc_stage_errors(stage: &str) {
    #[cfg(feature = "metrics")]
    counter!(STAGE_ERRORS, "stage" => stage.to_owned()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = stage;
}

/// Record a panic in a connection task.
pub fn inc_connection_panics() {
    #[cfg(feature = "metrics")]
    counter!(CONNECTION_PANICS).increment(1);
}
