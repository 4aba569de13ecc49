// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the request layer.
//!
//! # Example
//!
//! ```
//! use resilient_request::ResilienceConfig;
//!
//! // Minimal config (uses defaults)
//! let config = ResilienceConfig::default();
//! assert_eq!(config.max_retries, 3);
//! assert_eq!(config.failure_threshold, 5);
//!
//! // Tuned for a slow reporting endpoint
//! let config = ResilienceConfig {
//!     request_timeout_ms: Some(15_000),
//!     batch_concurrency: 2,
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use serde::Deserialize;
use std::time::Duration;

use crate::error::ConfigError;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::resilience::retry::RetryConfig;

/// Configuration for the request layer.
///
/// All fields have defaults matching the behaviour the OKR front end relied
/// on. Call [`validate`](Self::validate) (or build a
/// [`ResilientClient`](crate::ResilientClient), which does) before use.
#[derive(Debug, Clone, Deserialize)]
pub struct ResilienceConfig {
    /// Retries after the first attempt (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    /// First backoff delay (default: 1000 ms)
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling (default: 10000 ms)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Backoff multiplier (default: 2.0)
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    /// Per-attempt deadline (default: none)
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,

    /// Failures before a breaker opens (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Time an open breaker waits before letting a trial call through (default: 30 s)
    #[serde(default = "default_recovery_timeout_ms")]
    pub recovery_timeout_ms: u64,
    /// Max tracked breaker keys (default: 10000)
    #[serde(default = "default_breaker_capacity")]
    pub breaker_capacity: usize,

    /// Operations in flight per batch chunk (default: 5)
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,

    /// Response cache size (default: 1000 entries)
    #[serde(default = "default_cache_max_entries")]
    pub cache_max_entries: usize,
    /// Response cache TTL (default: 300 s)
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Queries slower than this are logged (default: 1000 ms)
    #[serde(default = "default_slow_query_threshold_ms")]
    pub slow_query_threshold_ms: u64,
}

fn default_max_retries() -> usize { 3 }
fn default_base_delay_ms() -> u64 { 1000 }
fn default_max_delay_ms() -> u64 { 10_000 }
fn default_backoff_factor() -> f64 { 2.0 }
fn default_failure_threshold() -> u32 { 5 }
fn default_recovery_timeout_ms() -> u64 { 30_000 }
fn default_breaker_capacity() -> usize { 10_000 }
fn default_batch_concurrency() -> usize { 5 }
fn default_cache_max_entries() -> usize { 1000 }
fn default_cache_ttl_secs() -> u64 { 300 }
fn default_slow_query_threshold_ms() -> u64 { 1000 }

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            request_timeout_ms: None,
            failure_threshold: default_failure_threshold(),
            recovery_timeout_ms: default_recovery_timeout_ms(),
            breaker_capacity: default_breaker_capacity(),
            batch_concurrency: default_batch_concurrency(),
            cache_max_entries: default_cache_max_entries(),
            cache_ttl_secs: default_cache_ttl_secs(),
            slow_query_threshold_ms: default_slow_query_threshold_ms(),
        }
    }
}

impl ResilienceConfig {
    /// Reject values that would make the layer misbehave silently.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Zero { field: "failure_threshold" });
        }
        if self.recovery_timeout_ms == 0 {
            return Err(ConfigError::Zero { field: "recovery_timeout_ms" });
        }
        if self.breaker_capacity == 0 {
            return Err(ConfigError::Zero { field: "breaker_capacity" });
        }
        if self.batch_concurrency == 0 {
            return Err(ConfigError::Zero { field: "batch_concurrency" });
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::Zero { field: "cache_max_entries" });
        }
        if self.request_timeout_ms == Some(0) {
            return Err(ConfigError::Zero { field: "request_timeout_ms" });
        }
        self.circuit_config().validate()?;
        self.retry_config().validate()
    }

    /// Retry settings as a [`RetryConfig`].
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
        }
    }

    /// Breaker settings as a [`CircuitConfig`].
    #[must_use]
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_millis(self.recovery_timeout_ms),
            capacity: self.breaker_capacity,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    #[must_use]
    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_threshold_ms)
    }
}
