// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyed circuit breakers.
//!
//! Protects the data service from a pile-up of doomed retries. Each
//! operation key gets its own breaker, created lazily on the first failure
//! and held in a [`BreakerRegistry`] owned by the client.
//!
//! States:
//! - Closed: Normal operation, requests pass through
//! - Open: Dependency unhealthy, requests fail fast without attempting
//! - HalfOpen: Recovery timeout elapsed, the next call is let through as a trial
//!
//! ```text
//!            failures >= threshold
//!   Closed ─────────────────────────▶ Open
//!     ▲                                │ recovery_timeout elapsed
//!     │ success                        ▼ (checked lazily on next call)
//!     └──────────────────────────── HalfOpen
//!                                      │ failure
//!                                      └──────▶ Open (timer restarted)
//! ```

use dashmap::DashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, RequestError};

/// Circuit breaker state for metrics/monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed = 0,
    HalfOpen = 1,
    Open = 2,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::HalfOpen => write!(f, "half_open"),
            Self::Open => write!(f, "open"),
        }
    }
}

/// Configuration shared by every breaker in a registry
#[derive(Debug, Clone)]
pub struct CircuitConfig {
    /// Number of failures that trips the circuit
    pub failure_threshold: u32,
    /// How long an open circuit waits before letting a trial call through
    pub recovery_timeout: Duration,
    /// Max number of keys tracked at once
    pub capacity: usize,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
            capacity: 10_000,
        }
    }
}

impl CircuitConfig {
    /// Aggressive config for writes (trips faster, recovers cautiously)
    #[must_use]
    pub fn aggressive() -> Self {
        Self {
            failure_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
            ..Self::default()
        }
    }

    /// Lenient config for dashboard reads (tolerates more failures)
    #[must_use]
    pub fn lenient() -> Self {
        Self {
            failure_threshold: 10,
            recovery_timeout: Duration::from_secs(15),
            ..Self::default()
        }
    }

    /// Fast recovery for testing
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            failure_threshold: 2,
            recovery_timeout: Duration::from_millis(50),
            capacity: 16,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero { field: "failure_threshold" });
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::Zero { field: "recovery_timeout" });
        }
        if self.capacity == 0 {
            return Err(ConfigError::Zero { field: "capacity" });
        }
        Ok(())
    }
}

/// Per-key breaker bookkeeping.
#[derive(Debug, Clone, Copy)]
struct BreakerEntry {
    failure_count: u32,
    last_failure: Instant,
    state: CircuitState,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub failure_count: u32,
    pub state: CircuitState,
    /// Time since the last recorded failure
    pub since_last_failure: Duration,
}

/// Derive a breaker key from an operation's identity, salted with a tenant.
///
/// Identical call shapes for the same tenant share one breaker.
///
/// ```
/// use resilient_request::breaker_key;
///
/// let a = breaker_key("objectives.list", Some("tenant-a"));
/// assert_eq!(a, breaker_key("objectives.list", Some("tenant-a")));
/// assert_ne!(a, breaker_key("objectives.list", Some("tenant-b")));
/// ```
#[must_use]
pub fn breaker_key(operation: &str, tenant: Option<&str>) -> String {
    let mut hasher = DefaultHasher::new();
    operation.hash(&mut hasher);
    let hash = hasher.finish();
    match tenant {
        Some(t) => format!("{t}:{hash:016x}"),
        None => format!("{hash:016x}"),
    }
}

/// Registry of keyed circuit breakers.
///
/// Explicitly constructed and owned by the client; never a global. All
/// read-modify-write sequences on one key happen under that key's shard
/// lock, so concurrent callers cannot lose updates.
pub struct BreakerRegistry {
    config: CircuitConfig,
    breakers: DashMap<String, BreakerEntry>,

    // Metrics
    rejections: AtomicU64,
    trips: AtomicU64,
    evictions: AtomicU64,
}

impl BreakerRegistry {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
            rejections: AtomicU64::new(0),
            trips: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Create with default config
    pub fn with_defaults() -> Self {
        Self::new(CircuitConfig::default())
    }

    #[must_use]
    pub fn config(&self) -> &CircuitConfig {
        &self.config
    }

    /// Gate a call. `Err` means the breaker is open and the call must not run.
    ///
    /// An open breaker whose recovery timeout has elapsed moves to half-open
    /// here and lets the call through as a trial.
    pub fn check(&self, key: &str) -> Result<(), RequestError> {
        let Some(mut entry) = self.breakers.get_mut(key) else {
            return Ok(());
        };
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                if entry.last_failure.elapsed() >= self.config.recovery_timeout {
                    entry.state = CircuitState::HalfOpen;
                    drop(entry);
                    info!(breaker = %key, "Circuit breaker half-open, letting trial call through");
                    self.publish_gauges();
                    Ok(())
                } else {
                    drop(entry);
                    self.rejections.fetch_add(1, Ordering::Relaxed);
                    debug!(breaker = %key, "Circuit breaker rejected call (open)");
                    crate::metrics::record_circuit_call(metric_label(key), "rejected");
                    Err(RequestError::circuit_open(key))
                }
            }
        }
    }

    /// Record a successful call. Closes the breaker and zeroes its count.
    pub fn record_success(&self, key: &str) {
        let previous = self.breakers.get_mut(key).map(|mut entry| {
            let previous = entry.state;
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            previous
        });
        if let Some(from) = previous.filter(|s| *s != CircuitState::Closed) {
            info!(breaker = %key, %from, "Circuit breaker closed");
            self.publish_gauges();
        }
        crate::metrics::record_circuit_call(metric_label(key), "success");
    }

    /// Record a failed call. Returns the breaker state afterwards.
    pub fn record_failure(&self, key: &str) -> CircuitState {
        let is_new = !self.breakers.contains_key(key);
        if is_new {
            self.make_room();
        }
        let now = Instant::now();
        let mut entry = self.breakers.entry(key.to_string()).or_insert(BreakerEntry {
            failure_count: 0,
            last_failure: now,
            state: CircuitState::Closed,
        });
        entry.failure_count = entry.failure_count.saturating_add(1);
        entry.last_failure = now;

        let previous = entry.state;
        let tripped = previous == CircuitState::HalfOpen
            || entry.failure_count >= self.config.failure_threshold;
        if tripped {
            entry.state = CircuitState::Open;
        }
        let state = entry.state;
        let failures = entry.failure_count;
        drop(entry);

        crate::metrics::record_circuit_call(metric_label(key), "failure");
        if tripped && previous != CircuitState::Open {
            self.trips.fetch_add(1, Ordering::Relaxed);
            warn!(
                breaker = %key,
                failures,
                from = %previous,
                recovery_ms = self.config.recovery_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
        }
        if is_new || (tripped && previous != CircuitState::Open) {
            self.publish_gauges();
        }
        state
    }

    /// Current view of a breaker, if the key has ever failed.
    #[must_use]
    pub fn snapshot(&self, key: &str) -> Option<BreakerSnapshot> {
        self.breakers.get(key).map(|e| BreakerSnapshot {
            failure_count: e.failure_count,
            state: e.state,
            since_last_failure: e.last_failure.elapsed(),
        })
    }

    /// Keys whose breaker is currently open.
    #[must_use]
    pub fn open_keys(&self) -> Vec<String> {
        self.breakers
            .iter()
            .filter(|e| e.state == CircuitState::Open)
            .map(|e| e.key().clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Forget every breaker.
    pub fn clear(&self) {
        self.breakers.clear();
        self.publish_gauges();
    }

    /// Calls rejected because a breaker was open
    #[must_use]
    pub fn rejections(&self) -> u64 {
        self.rejections.load(Ordering::Relaxed)
    }

    /// Closed/HalfOpen → Open transitions
    #[must_use]
    pub fn trips(&self) -> u64 {
        self.trips.load(Ordering::Relaxed)
    }

    /// Keys dropped to stay under capacity
    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Evict until there is room for one more key.
    ///
    /// Non-open breakers go first, oldest failure first. An open breaker is
    /// only evicted when every tracked breaker is open.
    fn make_room(&self) {
        while self.breakers.len() >= self.config.capacity {
            let victim = self
                .breakers
                .iter()
                .min_by_key(|e| (e.state == CircuitState::Open, e.last_failure))
                .map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    self.breakers.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(breaker = %key, "Evicted circuit breaker to stay under capacity");
                }
                None => break,
            }
        }
    }

    fn count(&self, state: CircuitState) -> usize {
        self.breakers.iter().filter(|e| e.state == state).count()
    }

    /// Must not be called while holding an entry of `breakers`.
    fn publish_gauges(&self) {
        crate::metrics::set_circuit_breakers(
            self.count(CircuitState::Open),
            self.count(CircuitState::HalfOpen),
            self.breakers.len(),
        );
    }
}

/// Metric label for a breaker key: the hashed operation without the tenant.
fn metric_label(key: &str) -> &str {
    key.rsplit_once(':').map_or(key, |(_, operation)| operation)
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
