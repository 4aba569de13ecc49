// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error classification at the data-service boundary.
//!
//! Operations fail with a [`RawError`]: whatever shape the underlying client
//! produced. [`classify`] turns that into a [`RequestError`] with a
//! `retryable` verdict. It is a pure function and idempotent on values that
//! are already classified.
//!
//! # Retryability
//!
//! | Input                               | status | code            | retryable        |
//! |-------------------------------------|--------|-----------------|------------------|
//! | already typed                       | as-is  | as-is           | as-is            |
//! | aborted                             | 408    | `TIMEOUT`       | yes              |
//! | network / "failed to fetch"         | 0      | `NETWORK_ERROR` | yes              |
//! | plain string                        | -      | -               | no               |
//! | HTTP status                         | as-is  | as-is           | >=500, 408, 429  |
//! | driver code                         | -      | as-is           | allow-listed     |

use crate::error::{ErrorKind, RequestError, FALLBACK_MESSAGE};
use serde_json::Value;
use std::io;

/// Driver error codes treated as transient (connection/timeout class).
pub const RETRYABLE_DRIVER_CODES: &[&str] = &[
    "08000", // connection_exception
    "08001", // sqlclient_unable_to_establish_sqlconnection
    "08003", // connection_does_not_exist
    "08004", // sqlserver_rejected_establishment_of_sqlconnection
    "08006", // connection_failure
    "57014", // query_canceled (statement timeout)
    "57P01", // admin_shutdown
    "57P03", // cannot_connect_now
    "53300", // too_many_connections
    "ECONNRESET",
    "ECONNREFUSED",
    "ETIMEDOUT",
];

const NETWORK_MESSAGE_MARKERS: &[&str] = &["failed to fetch", "fetch failed", "network error"];

/// A failure as produced by the underlying client, before classification.
#[derive(Debug)]
pub enum RawError {
    /// Already classified; passes through unchanged
    Typed(RequestError),
    /// The attempt was aborted/cancelled
    Aborted,
    /// Transport-level failure
    Network(String),
    /// Bare string thrown by the callee
    Message(String),
    /// HTTP-like error with a status
    Http {
        status: u16,
        message: Option<String>,
        code: Option<String>,
        details: Option<Value>,
    },
    /// Database driver error
    Driver {
        code: String,
        message: Option<String>,
        details: Option<Value>,
    },
    /// Generic error that may carry a status and/or code
    Other {
        message: Option<String>,
        status: Option<u16>,
        code: Option<String>,
    },
    /// I/O error from a socket or file
    Io(io::Error),
}

impl RawError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: Some(message.into()),
            code: None,
            details: None,
        }
    }

    pub fn driver(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Driver {
            code: code.into(),
            message: Some(message.into()),
            details: None,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: Some(message.into()),
            status: None,
            code: None,
        }
    }
}

impl From<RequestError> for RawError {
    fn from(err: RequestError) -> Self {
        Self::Typed(err)
    }
}

impl From<String> for RawError {
    fn from(msg: String) -> Self {
        Self::Message(msg)
    }
}

impl From<&str> for RawError {
    fn from(msg: &str) -> Self {
        Self::Message(msg.to_string())
    }
}

impl From<io::Error> for RawError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for RawError {
    fn from(err: serde_json::Error) -> Self {
        Self::other(format!("Malformed response: {err}"))
    }
}

/// HTTP statuses worth retrying.
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Driver codes worth retrying.
#[must_use]
pub fn is_retryable_code(code: &str) -> bool {
    RETRYABLE_DRIVER_CODES.contains(&code)
}

fn looks_like_network_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    NETWORK_MESSAGE_MARKERS.iter().any(|m| lower.contains(m))
}

/// Classify a raw failure.
///
/// ```
/// use resilient_request::classify::{classify, RawError};
///
/// let err = classify(RawError::http(503, "upstream unavailable"));
/// assert!(err.retryable);
/// assert_eq!(err.status, Some(503));
///
/// let err = classify(RawError::from("title too long"));
/// assert!(!err.retryable);
/// ```
pub fn classify(raw: RawError) -> RequestError {
    match raw {
        RawError::Typed(err) => err,

        RawError::Aborted => RequestError::timeout(None),

        RawError::Network(message) => RequestError::network(message),

        RawError::Message(message) => RequestError::generic(message),

        RawError::Http {
            status,
            message,
            code,
            details,
        } => {
            let retryable = is_retryable_status(status)
                || code.as_deref().is_some_and(is_retryable_code);
            RequestError {
                kind: ErrorKind::Http,
                message: message.unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
                status: Some(status),
                code,
                retryable,
                details,
                original_error: None,
            }
        }

        RawError::Driver {
            code,
            message,
            details,
        } => RequestError {
            kind: ErrorKind::Driver,
            message: message.unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
            status: None,
            retryable: is_retryable_code(&code),
            code: Some(code),
            details,
            original_error: None,
        },

        RawError::Other {
            message,
            status,
            code,
        } => {
            if let Some(msg) = message.as_deref() {
                if looks_like_network_failure(msg) {
                    return RequestError::network(msg).with_original(msg);
                }
            }
            let retryable = status.is_some_and(is_retryable_status)
                || code.as_deref().is_some_and(is_retryable_code);
            RequestError {
                kind: ErrorKind::Generic,
                message: message.unwrap_or_else(|| FALLBACK_MESSAGE.to_string()),
                status,
                code,
                retryable,
                details: None,
                original_error: None,
            }
        }

        RawError::Io(err) => classify_io(err),
    }
}

fn classify_io(err: io::Error) -> RequestError {
    let rendered = err.to_string();
    match err.kind() {
        io::ErrorKind::TimedOut => RequestError::timeout(None).with_original(rendered),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => {
            RequestError::network(rendered.clone()).with_original(rendered)
        }
        _ => RequestError::generic(rendered.clone()).with_original(rendered),
    }
}
