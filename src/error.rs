// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Typed errors produced by the request layer.
//!
//! Every failure that leaves this crate is a [`RequestError`]. Raw failures
//! from the data service are turned into one exactly once, at the boundary,
//! by [`crate::classify::classify`].

use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RequestError>;

/// Error code for an attempt that exceeded its deadline.
pub const CODE_TIMEOUT: &str = "TIMEOUT";
/// Error code for a transport-level failure.
pub const CODE_NETWORK_ERROR: &str = "NETWORK_ERROR";
/// Error code for a call rejected by an open circuit breaker.
pub const CODE_CIRCUIT_BREAKER_OPEN: &str = "CIRCUIT_BREAKER_OPEN";
/// Error code for a successful response that carried no payload.
pub const CODE_NO_DATA: &str = "NO_DATA";
/// Error code for a deduplication key shared by calls of different response types.
pub const CODE_DEDUP_TYPE_MISMATCH: &str = "DEDUP_TYPE_MISMATCH";

/// Fallback message when a raw failure carries none.
pub const FALLBACK_MESSAGE: &str = "An unexpected error occurred";

/// Which family a [`RequestError`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport failure before any response arrived
    Network,
    /// Attempt exceeded its deadline or was aborted
    Timeout,
    /// Database driver error carrying a driver code
    Driver,
    /// HTTP-like error carrying a status
    Http,
    /// Anything else
    Generic,
    /// Rejected by an open circuit breaker
    CircuitOpen,
    /// Success response with a missing payload
    NoData,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Driver => write!(f, "driver"),
            Self::Http => write!(f, "http"),
            Self::Generic => write!(f, "generic"),
            Self::CircuitOpen => write!(f, "circuit_open"),
            Self::NoData => write!(f, "no_data"),
        }
    }
}

/// Log severity bucket for a terminal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Status >= 500
    Error,
    /// Status 4xx
    Warning,
    /// Everything else (no status, status 0, 1xx-3xx)
    Info,
}

impl Severity {
    /// Bucket an optional status code.
    #[must_use]
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(s) if s >= 500 => Self::Error,
            Some(s) if (400..500).contains(&s) => Self::Warning,
            _ => Self::Info,
        }
    }
}

/// A classified failure.
///
/// Immutable once built. `Clone` because deduplicated callers all receive
/// the same rejection.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[error("{message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    /// Rendered form of the underlying error, if there was one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_error: Option<String>,
}

impl RequestError {
    /// Build an error with only kind, message and retryability set.
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            code: None,
            retryable,
            details: None,
            original_error: None,
        }
    }

    /// Non-retryable catch-all error.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Generic, message, false)
    }

    /// Attempt timed out (or was aborted). Always retryable.
    pub fn timeout(after: Option<Duration>) -> Self {
        let message = match after {
            Some(d) => format!("Request timed out after {}ms", d.as_millis()),
            None => "Request was aborted".to_string(),
        };
        Self::new(ErrorKind::Timeout, message, true)
            .with_status(408)
            .with_code(CODE_TIMEOUT)
    }

    /// Transport-level failure. Always retryable.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message, true)
            .with_status(0)
            .with_code(CODE_NETWORK_ERROR)
    }

    /// Fast-fail from an open breaker. Never retryable.
    pub fn circuit_open(key: &str) -> Self {
        Self::new(
            ErrorKind::CircuitOpen,
            "Service temporarily unavailable (circuit breaker open)",
            false,
        )
        .with_status(503)
        .with_code(CODE_CIRCUIT_BREAKER_OPEN)
        .with_details(serde_json::json!({ "breaker_key": key }))
    }

    /// A success response that was required to carry data but did not.
    pub fn no_data(what: &str) -> Self {
        Self::new(ErrorKind::NoData, format!("No data returned for {what}"), false)
            .with_status(404)
            .with_code(CODE_NO_DATA)
    }

    #[must_use]
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn with_original(mut self, original: impl Into<String>) -> Self {
        self.original_error = Some(original.into());
        self
    }

    /// Log severity derived from the status.
    #[must_use]
    pub fn severity(&self) -> Severity {
        Severity::from_status(self.status)
    }

    /// Code as a metrics label (`"none"` when absent).
    #[must_use]
    pub fn code_label(&self) -> &str {
        self.code.as_deref().unwrap_or("none")
    }

    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.kind == ErrorKind::CircuitOpen
    }
}

/// Rejects a missing payload on a success path with a `NO_DATA` error.
///
/// ```
/// use resilient_request::require_data;
///
/// assert_eq!(require_data(Some(3), "objective").unwrap(), 3);
/// let err = require_data::<u32>(None, "objective").unwrap_err();
/// assert_eq!(err.code.as_deref(), Some("NO_DATA"));
/// ```
pub fn require_data<T>(value: Option<T>, what: &str) -> Result<T> {
    value.ok_or_else(|| RequestError::no_data(what))
}

/// Invalid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("backoff_factor must be >= 1.0, got {0}")]
    BackoffFactor(String),
    #[error("base delay ({base_ms}ms) exceeds max delay ({max_ms}ms)")]
    DelayOrder { base_ms: u64, max_ms: u64 },
}
