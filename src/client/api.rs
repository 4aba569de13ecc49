// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request API: single calls, deduplicated calls, batches and cached reads.

use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::batching::batch_runner::{BatchOptions, BatchOutcome};
use crate::call_options::CallOptions;
use crate::classify::RawError;
use crate::dedup::SharedValue;
use crate::error::Result;

use super::ResilientClient;

/// Query name for cached reads issued without an `operation_key`.
pub const UNNAMED_QUERY: &str = "fetch_cached";

impl ResilientClient {
    // ═══════════════════════════════════════════════════════════════════════════
    // API: Single calls
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run `operation` with timeout, retry and (if enabled in `options`)
    /// circuit breaking. Failures come back classified.
    pub async fn execute<F, Fut, T, E>(&self, operation: F, options: &CallOptions) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawError>,
    {
        self.inner.executor.execute(operation, options).await
    }

    /// Like [`execute`](Self::execute), but concurrent calls with the same
    /// `key` share a single execution and its result.
    ///
    /// The caller that starts the work decides its options; joiners' options
    /// are ignored.
    pub async fn dedupe<F, Fut, T, E>(&self, key: &str, operation: F, options: CallOptions) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<RawError> + Send + 'static,
    {
        let executor = Arc::clone(&self.inner.executor);
        self.inner
            .dedup
            .dedupe(key, move || async move { executor.execute(operation, &options).await })
            .await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Batches
    // ═══════════════════════════════════════════════════════════════════════════

    /// Run `operations` in chunks of the configured `batch_concurrency`,
    /// collecting every outcome in input order.
    pub async fn batch<F, Fut, T, E>(
        &self,
        operations: Vec<F>,
        options: &CallOptions,
    ) -> Result<Vec<BatchOutcome<T>>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<RawError>,
    {
        let batch = BatchOptions::default().concurrency(self.inner.config.batch_concurrency);
        self.batch_with(operations, batch, options).await
    }

    pub async fn batch_with<F, Fut, T, E>(
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
        self.inner.batch.run(operations, batch, options).await
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // API: Cached reads
    // ═══════════════════════════════════════════════════════════════════════════

    /// Cache-aside read.
    ///
    /// Order: response cache → in-flight call for the same key → tracked,
    /// retried execution. A successful result fills the cache under `key`;
    /// failures are never cached. The query is timed under the call's
    /// `operation_key`, or under [`UNNAMED_QUERY`] when none is set; cache
    /// keys carry tenant and record ids and never become query names.
    pub async fn fetch_cached<F, Fut, T, E>(
        &self,
        key: &str,
        operation: F,
        options: CallOptions,
    ) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<T, E>> + Send + 'static,
        E: Into<RawError> + Send + 'static,
    {
        if let Some(hit) = self.inner.cache.get(key) {
            if let Some(value) = hit.downcast_ref::<T>() {
                debug!(key, "Response cache hit");
                return Ok(value.clone());
            }
            debug!(key, "Cached response has a different type, refetching");
        }

        let executor = Arc::clone(&self.inner.executor);
        let tracker = Arc::clone(&self.inner.tracker);
        let cache = Arc::clone(&self.inner.cache);
        let query = options
            .operation_key
            .clone()
            .unwrap_or_else(|| UNNAMED_QUERY.to_string());
        let cache_key = key.to_string();

        self.inner
            .dedup
            .dedupe(key, move || async move {
                let value = tracker
                    .track(&query, executor.execute(operation, &options))
                    .await?;
                cache.insert(cache_key, Arc::new(value.clone()) as SharedValue);
                Ok(value)
            })
            .await
    }

    /// Drop cached responses whose key starts with `prefix`
    /// (e.g. `"acme:"` after a write for tenant `acme`).
    pub fn invalidate(&self, prefix: &str) -> usize {
        self.inner.cache.invalidate_prefix(prefix)
    }

    /// Drop the cached response for exactly `key`.
    pub fn invalidate_key(&self, key: &str) -> bool {
        self.inner.cache.invalidate(key)
    }
}
