// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-call options.
//!
//! The request layer is a **thin wrapper**: the caller supplies the
//! operation and decides, per call, how hard to try. Anything left unset
//! falls back to the client's [`ResilienceConfig`](crate::ResilienceConfig).
//!
//! # Example
//!
//! ```
//! use resilient_request::{CallOptions, RetryConfig};
//! use std::time::Duration;
//!
//! // Dashboard read: breaker on, scoped to the tenant
//! let opts = CallOptions::default()
//!     .tenant("acme")
//!     .operation_key("objectives.list")
//!     .with_circuit_breaker();
//!
//! // Background write: quick timeout, no toast on failure
//! let opts = CallOptions::default()
//!     .timeout(Duration::from_secs(5))
//!     .retries(RetryConfig::query())
//!     .silent();
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::RequestError;
use crate::resilience::circuit_breaker::breaker_key;
use crate::resilience::retry::RetryConfig;

/// Caller-supplied retry predicate: `(error, attempt) -> retry?`.
///
/// Replaces the classifier's `retryable` verdict when set. `attempt` is
/// 0-indexed. The retry budget still applies.
#[derive(Clone)]
pub struct RetryCondition(Arc<dyn Fn(&RequestError, usize) -> bool + Send + Sync>);

impl RetryCondition {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&RequestError, usize) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    #[must_use]
    pub fn should_retry(&self, error: &RequestError, attempt: usize) -> bool {
        (self.0)(error, attempt)
    }
}

impl fmt::Debug for RetryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RetryCondition(..)")
    }
}

/// Options for one logical call.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Per-attempt deadline; `None` uses the client default
    pub timeout: Option<Duration>,
    /// Retry policy; `None` uses the client default
    pub retries: Option<RetryConfig>,
    /// Overrides the classifier's retry verdict
    pub retry_condition: Option<RetryCondition>,
    /// Route the call through a circuit breaker
    pub circuit_breaker: bool,
    /// Salts the breaker key so tenants do not trip each other's breakers
    pub tenant_id: Option<String>,
    /// Explicit breaker identity; the operation's type name is used otherwise
    pub operation_key: Option<String>,
    /// Do not invoke the user-facing notifier on terminal failure
    pub skip_error_notification: bool,
}

impl CallOptions {
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn retries(mut self, retries: RetryConfig) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Single attempt, no retries.
    #[must_use]
    pub fn no_retries(mut self) -> Self {
        let mut retries = self.retries.take().unwrap_or_default();
        retries.max_retries = 0;
        self.retries = Some(retries);
        self
    }

    #[must_use]
    pub fn retry_condition(mut self, condition: RetryCondition) -> Self {
        self.retry_condition = Some(condition);
        self
    }

    #[must_use]
    pub fn with_circuit_breaker(mut self) -> Self {
        self.circuit_breaker = true;
        self
    }

    #[must_use]
    pub fn tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    #[must_use]
    pub fn operation_key(mut self, key: impl Into<String>) -> Self {
        self.operation_key = Some(key.into());
        self
    }

    /// Suppress the user-facing notification on terminal failure.
    #[must_use]
    pub fn silent(mut self) -> Self {
        self.skip_error_notification = true;
        self
    }

    /// Breaker key for this call.
    ///
    /// `fallback` identifies the operation when no explicit key was given;
    /// the executor passes the operation's type name, which is unique per
    /// closure call site.
    #[must_use]
    pub fn breaker_key(&self, fallback: &str) -> String {
        let op = self.operation_key.as_deref().unwrap_or(fallback);
        breaker_key(op, self.tenant_id.as_deref())
    }
}
