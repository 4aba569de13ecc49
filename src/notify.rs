// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! User-facing failure notification.
//!
//! Logging happens on every terminal failure. Showing the user something
//! (a toast, a banner) is a separate side effect behind [`ErrorNotifier`],
//! suppressible per call with [`CallOptions::silent`](crate::CallOptions::silent).

use crate::error::{ErrorKind, RequestError};

/// Hook invoked with every terminal failure that is not suppressed.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, error: &RequestError);
}

impl<F> ErrorNotifier for F
where
    F: Fn(&RequestError) + Send + Sync,
{
    fn notify(&self, error: &RequestError) {
        self(error)
    }
}

/// Notifier that does nothing. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl ErrorNotifier for NoopNotifier {
    fn notify(&self, _error: &RequestError) {}
}

/// Short message suitable for showing to an end user.
///
/// ```
/// use resilient_request::{user_message, RequestError};
///
/// let err = RequestError::network("connection reset by peer");
/// assert_eq!(user_message(&err), "Network error. Please check your connection and try again.");
/// ```
#[must_use]
pub fn user_message(error: &RequestError) -> String {
    match error.kind {
        ErrorKind::Timeout => return "The request timed out. Please try again.".into(),
        ErrorKind::Network => {
            return "Network error. Please check your connection and try again.".into()
        }
        ErrorKind::CircuitOpen => {
            return "This service is temporarily unavailable. Please try again shortly.".into()
        }
        ErrorKind::NoData => return "The requested data could not be found.".into(),
        _ => {}
    }
    match error.status {
        Some(401) => "Your session has expired. Please sign in again.".into(),
        Some(403) => "You do not have permission to perform this action.".into(),
        Some(404) => "The requested resource was not found.".into(),
        Some(409) => "This record was changed by someone else. Please refresh and try again.".into(),
        Some(429) => "Too many requests. Please wait a moment and try again.".into(),
        Some(s) if s >= 500 => "Something went wrong on our side. Please try again later.".into(),
        _ => error.message.clone(),
    }
}
