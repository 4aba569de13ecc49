// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for the request layer.
//!
//! Uses the `metrics` crate for backend-agnostic metrics collection.
//! The host application is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `resilient_request_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `kind`: network, timeout, driver, http, generic, circuit_open, no_data
//! - `code`: error code (`TIMEOUT`, `08006`, ...) or `none`
//! - `outcome`: success, failure, rejected
//! - `operation`: hashed operation part of a breaker key, never the tenant
//! - `query`: a fixed query name (`operation_key`), never a cache key

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Record one attempt of an operation
pub fn record_attempt() {
    counter!("resilient_request_attempts_total").increment(1);
}

/// Record a retry scheduled after a transient failure
pub fn record_retry(code: &str) {
    counter!(
        "resilient_request_retries_total",
        "code" => code.to_string()
    )
    .increment(1);
}

/// Record a failure that was returned to the caller
pub fn record_terminal_failure(kind: &str, code: &str) {
    counter!(
        "resilient_request_failures_total",
        "kind" => kind.to_string(),
        "code" => code.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// CIRCUIT BREAKER - Resilience metrics
// ═══════════════════════════════════════════════════════════════════════════

/// Set the number of breakers per state. Unlabelled: the set of keys grows
/// with tenants, the set of states does not.
pub fn set_circuit_breakers(open: usize, half_open: usize, tracked: usize) {
    gauge!("resilient_request_circuit_breakers_open").set(open as f64);
    gauge!("resilient_request_circuit_breakers_half_open").set(half_open as f64);
    gauge!("resilient_request_circuit_breakers_tracked").set(tracked as f64);
}

/// Record circuit breaker call outcome
pub fn record_circuit_call(operation: &str, outcome: &str) {
    counter!(
        "resilient_request_circuit_breaker_calls_total",
        "operation" => operation.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

// ═══════════════════════════════════════════════════════════════════════════
// DEDUPLICATION / BATCH - Fan-in and fan-out
// ═══════════════════════════════════════════════════════════════════════════

/// Record a deduplicated call (`leader` started the work, `joined` shared it)
pub fn record_dedupe(role: &'static str) {
    counter!(
        "resilient_request_dedupe_total",
        "role" => role
    )
    .increment(1);
}

/// Set number of in-flight deduplicated requests
pub fn set_in_flight(count: usize) {
    gauge!("resilient_request_in_flight").set(count as f64);
}

/// Record a batch run
pub fn record_batch(size: usize, failures: usize) {
    histogram!("resilient_request_batch_size").record(size as f64);
    counter!("resilient_request_batch_failures_total").increment(failures as u64);
}

// ═══════════════════════════════════════════════════════════════════════════
// CACHE / QUERIES
// ═══════════════════════════════════════════════════════════════════════════

/// Record response cache hit/miss
pub fn record_cache(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!(
        "resilient_request_cache_total",
        "outcome" => outcome
    )
    .increment(1);
}

/// Set response cache entry count
pub fn set_cache_entries(entries: usize) {
    gauge!("resilient_request_cache_entries").set(entries as f64);
}

/// Record query latency
pub fn record_query_latency(query: &str, duration: Duration) {
    histogram!(
        "resilient_request_query_seconds",
        "query" => query.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record a query slower than the configured threshold
pub fn record_slow_query(query: &str) {
    counter!(
        "resilient_request_slow_queries_total",
        "query" => query.to_string()
    )
    .increment(1);
}

/// A timing guard that records query latency on drop
pub struct LatencyTimer {
    query: String,
    start: Instant,
}

impl LatencyTimer {
    /// Start a new latency timer
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            start: Instant::now(),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_query_latency(&self.query, self.start.elapsed());
    }
}
