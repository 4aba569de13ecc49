// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded-concurrency batch fan-out.
//!
//! The [`BatchRunner`] splits a list of operations into sequential chunks of
//! `concurrency` and runs each chunk concurrently through the
//! [`RetryExecutor`]. Output order always matches input order, whatever the
//! completion order.
//!
//! # Example
//!
//! ```
//! use resilient_request::{BatchOptions, BatchOutcome, RequestError};
//!
//! let opts = BatchOptions::default();
//! assert_eq!(opts.concurrency, 5);
//! assert!(!opts.fail_fast);
//!
//! let outcome: BatchOutcome<u32> = Err(RequestError::generic("bad row")).into();
//! assert!(!outcome.is_success());
//! ```

use futures::future::{join_all, try_join_all};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::call_options::CallOptions;
use crate::classify::RawError;
use crate::error::{ConfigError, RequestError, Result};
use crate::resilience::retry::RetryExecutor;

/// Options for a batch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Operations in flight at once (chunk size)
    pub concurrency: usize,
    /// Abort the whole batch on the first failure
    pub fail_fast: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: 5,
            fail_fast: false,
        }
    }
}

impl BatchOptions {
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    #[must_use]
    pub fn fail_fast(mut self) -> Self {
        self.fail_fast = true;
        self
    }
}

/// Outcome of one operation in a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome<T> {
    Success { data: T },
    Failure { error: RequestError },
}

impl<T> BatchOutcome<T> {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    #[must_use]
    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    #[must_use]
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error } => Some(error),
        }
    }

    pub fn into_result(self) -> Result<T> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Failure { error } => Err(error),
        }
    }
}

impl<T> From<Result<T>> for BatchOutcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::Success { data },
            Err(error) => Self::Failure { error },
        }
    }
}

/// Runs operations in bounded-concurrency chunks.
pub struct BatchRunner {
    executor: Arc<RetryExecutor>,
}

impl BatchRunner {
    pub fn new(executor: Arc<RetryExecutor>) -> Self {
        Self { executor }
    }

    /// Run every operation and return one outcome per input, in input order.
    ///
    /// With `fail_fast` the first failure is returned as `Err` and no later
    /// chunk is started; the other operations of the failing chunk are
    /// dropped.
    pub async fn run<T, F, Fut, E>(
        &self,
        operations: Vec<F>,
        batch: BatchOptions,
        options: &CallOptions,
    ) -> Result<Vec<BatchOutcome<T>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawError>,
    {
        if batch.concurrency == 0 {
            let err = ConfigError::Zero { field: "concurrency" };
            return Err(RequestError::generic(err.to_string()));
        }

        let total = operations.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut remaining = operations.into_iter();
        let mut chunk_index = 0usize;

        loop {
            let chunk: Vec<F> = remaining.by_ref().take(batch.concurrency).collect();
            if chunk.is_empty() {
                break;
            }
            let size = chunk.len();
            let calls = chunk
                .into_iter()
                .map(|op| self.executor.execute(op, options));

            if batch.fail_fast {
                match try_join_all(calls).await {
                    Ok(values) => {
                        outcomes.extend(values.into_iter().map(|data| BatchOutcome::Success { data }))
                    }
                    Err(error) => {
                        debug!(chunk = chunk_index, total, error = %error, "Batch aborted (fail-fast)");
                        crate::metrics::record_batch(total, 1);
                        return Err(error);
                    }
                }
            } else {
                outcomes.extend(join_all(calls).await.into_iter().map(BatchOutcome::from));
            }
            debug!(chunk = chunk_index, size, "Batch chunk finished");
            chunk_index += 1;
        }

        let failures = outcomes.iter().filter(|o| !o.is_success()).count();
        debug!(total, failures, chunks = chunk_index, "Batch finished");
        crate::metrics::record_batch(total, failures);
        Ok(outcomes)
    }
}
