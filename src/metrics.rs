// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the CRM data layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `crm_data_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `collection`: leads, users, ...
//! - `operation`: get, list, aggregate, create, update, delete, batch_write
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record a completed data operation
pub fn record_operation(collection: &str, operation: &str, status: &str) {
    counter!(
        "crm_data_operations_total",
        "collection" => collection.to_string(),
        "operation" => operation.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record operation latency
pub fn record_latency(collection: &str, operation: &str, duration: Duration) {
    histogram!(
        "crm_data_operation_seconds",
        "collection" => collection.to_string(),
        "operation" => operation.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a failed operation by error kind
pub fn record_error(collection: &str, operation: &str, kind: &str) {
    counter!(
        "crm_data_errors_total",
        "collection" => collection.to_string(),
        "operation" => operation.to_string(),
        "kind" => kind.to_string()
    )
    .increment(1);
}

/// Record a store call that hit the request timeout
pub fn record_timeout(operation: &str) {
    counter!(
        "crm_data_timeouts_total",
        "operation" => operation.to_string()
    )
    .increment(1);
}

/// Record batch size
pub fn record_batch_size(count: usize) {
    histogram!("crm_data_batch_size").record(count as f64);
}

/// Record cache hit or miss
pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "crm_data_cache_lookups_total",
        "result" => result
    )
    .increment(1);
}

/// Record a capacity eviction
pub fn record_cache_eviction() {
    counter!("crm_data_cache_evictions_total").increment(1);
}

/// Set current cache entry count
pub fn set_cache_entries(count: usize) {
    gauge!("crm_data_cache_entries").set(count as f64);
}

/// Record a retry attempt outcome (success, requeued, exhausted, failed)
pub fn record_retry(operation: &str, outcome: &str) {
    counter!(
        "crm_data_retries_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// Set retry queue depth
pub fn set_retry_queue_depth(depth: usize) {
    gauge!("crm_data_retry_queue_depth").set(depth as f64);
}

/// Set connection state (0 = Disconnected, 1 = Connected, 2 = Error, 3 = Reconnecting, 4 = Failed)
pub fn set_connection_state(state: u8) {
    gauge!("crm_data_connection_state").set(state as f64);
}

/// Record a scheduled listener reconnect
pub fn record_reconnect(collection: &str) {
    counter!(
        "crm_data_reconnects_total",
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Set active subscription count
pub fn set_subscriptions(count: usize) {
    gauge!("crm_data_subscriptions").set(count as f64);
}

/// Record a write rejected by validation
pub fn record_validation_failure(collection: &str) {
    counter!(
        "crm_data_validation_failures_total",
        "collection" => collection.to_string()
    )
    .increment(1);
}

/// Record an activity log write that failed
pub fn record_activity_log_failure() {
    counter!("crm_data_activity_log_failures_total").increment(1);
}

/// A timing guard that records latency on drop
pub struct LatencyTimer {
    collection: String,
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(collection: &str, operation: &'static str) -> Self {
        Self {
            collection: collection.to_string(),
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_latency(&self.collection, self.operation, self.start.elapsed());
    }
}

/// Convenience macro for timing operations
#[macro_export]
macro_rules! time_operation {
    ($collection:expr, $op:expr) => {
        $crate::metrics::LatencyTimer::new($collection, $op)
    };
}
