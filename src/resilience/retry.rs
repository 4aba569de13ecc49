// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! [`RetryExecutor`] runs an operation, classifies each failure and retries
//! transient ones with capped exponential backoff. It is also where the
//! circuit breaker is consulted and where terminal failures are logged and
//! surfaced to the user.
//!
//! # Example
//!
//! ```
//! use resilient_request::RetryConfig;
//! use std::time::Duration;
//!
//! // Default: 3 retries, 1s → 2s → 4s, capped at 10s
//! let config = RetryConfig::default();
//! assert_eq!(config.delay_for_attempt(0), Duration::from_secs(1));
//! assert_eq!(config.delay_for_attempt(4), Duration::from_secs(10));
//!
//! // Query: quick retry, then fail
//! let query = RetryConfig::query();
//! assert_eq!(query.max_retries, 3);
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::call_options::CallOptions;
use crate::classify::{classify, RawError};
use crate::error::{ConfigError, RequestError, Result, Severity};
use crate::notify::ErrorNotifier;
use crate::resilience::circuit_breaker::BreakerRegistry;

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::default()`] - Interactive reads and writes
/// - [`RetryConfig::query()`] - Quick retry for individual queries
/// - [`RetryConfig::startup()`] - Initial connection checks
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts never exceed `max_retries + 1`
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            backoff_factor: 2.0,
        }
    }
}

impl RetryConfig {
    /// Quick retry for individual queries (don't block the page).
    /// 3 retries with fast backoff - if it fails, let the caller handle it.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }

    /// Fast-fail retry for startup health checks.
    /// 5 retries, failing after a few seconds so bad configuration surfaces quickly.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_factor: 2.0,
        }
    }

    /// Delay before the retry that follows 0-indexed attempt `attempt`:
    /// `min(base_delay * backoff_factor^attempt, max_delay)`.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exp = attempt.min(i32::MAX as usize) as i32;
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::BackoffFactor(self.backoff_factor.to_string()));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::DelayOrder {
                base_ms: self.base_delay.as_millis() as u64,
                max_ms: self.max_delay.as_millis() as u64,
            });
        }
        Ok(())
    }
}

/// Runs operations with timeout, retry, circuit breaking and failure reporting.
pub struct RetryExecutor {
    defaults: RetryConfig,
    default_timeout: Option<Duration>,
    breakers: Arc<BreakerRegistry>,
    notifier: Arc<dyn ErrorNotifier>,
}

impl RetryExecutor {
    pub fn new(
        defaults: RetryConfig,
        default_timeout: Option<Duration>,
        breakers: Arc<BreakerRegistry>,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Self {
        Self {
            defaults,
            default_timeout,
            breakers,
            notifier,
        }
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Run `operation` until it succeeds, fails terminally, or the retry
    /// budget is spent.
    ///
    /// Attempts are strictly sequential. Each attempt is raced against the
    /// per-attempt timeout; a timed-out attempt is dropped, which cancels it.
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F, options: &CallOptions) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawError>,
    {
        let retries = options.retries.as_ref().unwrap_or(&self.defaults);
        if let Err(invalid) = retries.validate() {
            warn!(error = %invalid, "Rejected call with invalid retry settings");
            return Err(RequestError::generic(invalid.to_string()));
        }
        let timeout = options.timeout.or(self.default_timeout);
        let breaker_key = options
            .circuit_breaker
            .then(|| options.breaker_key(std::any::type_name::<F>()));

        if let Some(key) = breaker_key.as_deref() {
            if let Err(rejected) = self.breakers.check(key) {
                self.report_terminal(&rejected, 0, options);
                return Err(rejected);
            }
        }

        let mut attempt: usize = 0;
        loop {
            crate::metrics::record_attempt();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, operation()).await {
                    Ok(result) => result.map_err(|e| classify(e.into())),
                    Err(_) => Err(RequestError::timeout(Some(limit))),
                },
                None => operation().await.map_err(|e| classify(e.into())),
            };

            match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        info!(attempts = attempt + 1, "Operation succeeded after retries");
                    }
                    if let Some(key) = breaker_key.as_deref() {
                        self.breakers.record_success(key);
                    }
                    return Ok(value);
                }
                Err(err) => {
                    let wants_retry = match &options.retry_condition {
                        Some(condition) => condition.should_retry(&err, attempt),
                        None => err.retryable,
                    };
                    if !wants_retry || attempt >= retries.max_retries {
                        if wants_retry {
                            warn!(
                                max_retries = retries.max_retries,
                                error = %err,
                                "Max retries exceeded"
                            );
                        } else {
                            debug!(error = %err, code = err.code_label(), "Non-retryable error");
                        }
                        if let Some(key) = breaker_key.as_deref() {
                            self.breakers.record_failure(key);
                        }
                        self.report_terminal(&err, attempt + 1, options);
                        return Err(err);
                    }

                    let delay = retries.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = retries.max_retries,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    crate::metrics::record_retry(err.code_label());
                    sleep(delay).await;
                }
            }
        }
    }

    fn report_terminal(&self, err: &RequestError, attempts: usize, options: &CallOptions) {
        let status = err.status.unwrap_or_default();
        let code = err.code_label();
        match err.severity() {
            Severity::Error => {
                error!(status, code, kind = %err.kind, attempts, error = %err, "Request failed")
            }
            Severity::Warning => {
                warn!(status, code, kind = %err.kind, attempts, error = %err, "Request failed")
            }
            Severity::Info => {
                info!(status, code, kind = %err.kind, attempts, error = %err, "Request failed")
            }
        }
        crate::metrics::record_terminal_failure(&err.kind.to_string(), code);
        if !options.skip_error_notification {
            self.notifier.notify(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call_options::RetryCondition;
    use crate::notify::NoopNotifier;
    use crate::resilience::circuit_breaker::CircuitConfig;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn executor() -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::test(),
            None,
            Arc::new(BreakerRegistry::new(CircuitConfig::test())),
            Arc::new(NoopNotifier),
        )
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(8000));
        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(10_000));
        assert_eq!(config.delay_for_attempt(usize::MAX), Duration::from_millis(10_000));
    }

    #[test]
    fn test_retry_config_presets() {
        assert_eq!(RetryConfig::query().max_retries, 3);
        assert_eq!(RetryConfig::startup().max_retries, 5);
        assert!(RetryConfig::query().validate().is_ok());
        assert!(RetryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_delay_never_negative_for_unvalidated_config() {
        let config = RetryConfig {
            backoff_factor: -2.0,
            ..RetryConfig::default()
        };
        assert_eq!(config.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn test_invalid_per_call_retries_rejected_before_any_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let opts = CallOptions::default().retries(RetryConfig {
            backoff_factor: -2.0,
            ..RetryConfig::test()
        });

        let result: Result<()> = executor()
            .execute(
                || {
                    let a = counter.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        Err(RawError::http(503, "unavailable"))
                    }
                },
                &opts,
            )
            .await;

        let err = result.unwrap_err();
        assert!(err.message.contains("backoff_factor"));
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_backoff_schedule_between_sequential_attempts() {
        let exec = RetryExecutor::new(
            RetryConfig::default(),
            None,
            Arc::new(BreakerRegistry::new(CircuitConfig::test())),
            Arc::new(NoopNotifier),
        );
        let spans = Arc::new(Mutex::new(Vec::<(tokio::time::Instant, tokio::time::Instant)>::new()));
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let result: Result<()> = exec
            .execute(
                || {
                    let (spans, live, peak) = (spans.clone(), live.clone(), peak.clone());
                    async move {
                        let started = tokio::time::Instant::now();
                        let now_live = live.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now_live, Ordering::SeqCst);
                        sleep(Duration::from_millis(5)).await;
                        live.fetch_sub(1, Ordering::SeqCst);
                        spans.lock().push((started, tokio::time::Instant::now()));
                        Err(RawError::http(503, "unavailable"))
                    }
                },
                &CallOptions::default().silent(),
            )
            .await;

        assert_eq!(result.unwrap_err().status, Some(503));
        assert_eq!(peak.load(Ordering::SeqCst), 1);

        let spans = spans.lock();
        assert_eq!(spans.len(), 4);
        let gaps: Vec<Duration> = spans.windows(2).map(|w| w[1].0 - w[0].1).collect();
        for (gap, expected_ms) in gaps.iter().zip([1000u64, 2000, 4000]) {
            let expected = Duration::from_millis(expected_ms);
            assert!(
                *gap >= expected && *gap <= expected + Duration::from_millis(5),
                "gap {gap:?}, expected {expected:?}"
            );
        }
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let result: Result<i32> = executor()
            .execute(|| async { Ok::<_, RawError>(42) }, &CallOptions::default())
            .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_retryable_error_exhausts_budget() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<()> = executor()
            .execute(
                || {
                    let a = counter.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        Err(RawError::http(503, "unavailable"))
                    }
                },
                &CallOptions::default(),
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.status, Some(503));
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_makes_one_attempt() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result: Result<()> = executor()
            .execute(
                || {
                    let a = counter.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        Err(RawError::http(422, "title too long"))
                    }
                },
                &CallOptions::default(),
            )
            .await;

        assert!(!result.unwrap_err().retryable);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();

        let result = executor()
            .execute(
                || {
                    let a = counter.clone();
                    async move {
                        let n = a.fetch_add(1, Ordering::SeqCst) + 1;
                        if n < 3 {
                            Err(RawError::Network(format!("reset {n}")))
                        } else {
                            Ok(n)
                        }
                    }
                },
                &CallOptions::default(),
            )
            .await;

        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_timeout_is_classified_and_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let opts = CallOptions::default()
            .timeout(Duration::from_millis(5))
            .retries(RetryConfig {
                max_retries: 1,
                ..RetryConfig::test()
            });

        let result: Result<()> = executor()
            .execute(
                || {
                    let a = counter.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        sleep(Duration::from_millis(200)).await;
                        Ok::<_, RawError>(())
                    }
                },
                &opts,
            )
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.code.as_deref(), Some(crate::error::CODE_TIMEOUT));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_retry_condition_overrides_classifier() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let opts = CallOptions::default()
            .retry_condition(RetryCondition::new(|err, _| err.status == Some(409)));

        let result: Result<()> = executor()
            .execute(
                || {
                    let a = counter.clone();
                    async move {
                        a.fetch_add(1, Ordering::SeqCst);
                        Err(RawError::http(409, "conflict"))
                    }
                },
                &opts,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_notifier_called_unless_silent() {
        let seen = Arc::new(Mutex::new(Vec::<String>::new()));
        let sink = seen.clone();
        let exec = RetryExecutor::new(
            RetryConfig::test(),
            None,
            Arc::new(BreakerRegistry::new(CircuitConfig::test())),
            Arc::new(move |e: &RequestError| sink.lock().push(e.message.clone())),
        );

        let _ = exec
            .execute(|| async { Err::<(), _>(RawError::from("loud")) }, &CallOptions::default())
            .await;
        let _ = exec
            .execute(
                || async { Err::<(), _>(RawError::from("quiet")) },
                &CallOptions::default().silent(),
            )
            .await;

        assert_eq!(*seen.lock(), vec!["loud".to_string()]);
    }

    #[tokio::test]
    async fn test_breaker_records_terminal_failures_and_success() {
        let exec = executor();
        let opts = CallOptions::default()
            .operation_key("areas.list")
            .with_circuit_breaker()
            .no_retries();
        let key = opts.breaker_key("");

        let _ = exec
            .execute(|| async { Err::<(), _>(RawError::http(500, "x")) }, &opts)
            .await;
        assert_eq!(exec.breakers().snapshot(&key).unwrap().failure_count, 1);

        let ok = exec.execute(|| async { Ok::<_, RawError>(1) }, &opts).await;
        assert_eq!(ok.unwrap(), 1);
        assert_eq!(exec.breakers().snapshot(&key).unwrap().failure_count, 0);
    }
}
