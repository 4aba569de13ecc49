// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilient client.
//!
//! The [`ResilientClient`] ties the request layer together:
//! - Retry executor with per-attempt timeouts
//! - Circuit breaker registry keyed by operation and tenant
//! - Request deduplicator for concurrent identical reads
//! - Response cache and query timing for the data-fetching path
//!
//! It is cheap to clone; clones share all state.
//!
//! # Example
//!
//! ```rust,no_run
//! use resilient_request::{CallOptions, RawError, ResilienceConfig, ResilientClient};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let client = ResilientClient::new(ResilienceConfig::default()).expect("valid config");
//!
//! let options = CallOptions::default()
//!     .tenant("acme")
//!     .operation_key("objectives.list")
//!     .with_circuit_breaker();
//!
//! let objectives: Vec<String> = client
//!     .execute(|| async { Ok::<_, RawError>(vec!["Grow ARR".to_string()]) }, &options)
//!     .await
//!     .expect("fetch failed");
//! assert_eq!(objectives.len(), 1);
//! # }
//! ```

mod api;
mod types;

pub use api::UNNAMED_QUERY;
pub use types::ClientHealth;

use std::sync::Arc;
use tracing::info;

use crate::batching::batch_runner::BatchRunner;
use crate::cache::ResponseCache;
use crate::config::ResilienceConfig;
use crate::dedup::{RequestDeduplicator, SharedValue};
use crate::error::ConfigError;
use crate::notify::{ErrorNotifier, NoopNotifier};
use crate::query_tracker::QueryTracker;
use crate::resilience::circuit_breaker::BreakerRegistry;
use crate::resilience::retry::RetryExecutor;

pub(super) struct ClientInner {
    pub(super) config: ResilienceConfig,
    pub(super) executor: Arc<RetryExecutor>,
    pub(super) breakers: Arc<BreakerRegistry>,
    pub(super) dedup: RequestDeduplicator,
    pub(super) batch: BatchRunner,
    pub(super) cache: Arc<ResponseCache<SharedValue>>,
    pub(super) tracker: Arc<QueryTracker>,
}

/// Composition root for resilient data access.
#[derive(Clone)]
pub struct ResilientClient {
    pub(super) inner: Arc<ClientInner>,
}

impl ResilientClient {
    /// Create a client that reports failures to nobody but the log.
    pub fn new(config: ResilienceConfig) -> Result<Self, ConfigError> {
        Self::with_notifier(config, Arc::new(NoopNotifier))
    }

    /// Create a client that also hands terminal failures to `notifier`.
    pub fn with_notifier(
        config: ResilienceConfig,
        notifier: Arc<dyn ErrorNotifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let breakers = Arc::new(BreakerRegistry::new(config.circuit_config()));
        let executor = Arc::new(RetryExecutor::new(
            config.retry_config(),
            config.request_timeout(),
            Arc::clone(&breakers),
            notifier,
        ));

        info!(
            max_retries = config.max_retries,
            failure_threshold = config.failure_threshold,
            recovery_timeout_ms = config.recovery_timeout_ms,
            "Resilient client initialized"
        );

        let inner = ClientInner {
            batch: BatchRunner::new(Arc::clone(&executor)),
            cache: Arc::new(ResponseCache::new(config.cache_max_entries, config.cache_ttl())),
            tracker: Arc::new(QueryTracker::new(config.slow_query_threshold())),
            dedup: RequestDeduplicator::new(),
            executor,
            breakers,
            config,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    #[must_use]
    pub fn config(&self) -> &ResilienceConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.inner.breakers
    }

    #[must_use]
    pub fn deduplicator(&self) -> &RequestDeduplicator {
        &self.inner.dedup
    }

    #[must_use]
    pub fn query_tracker(&self) -> &QueryTracker {
        &self.inner.tracker
    }

    /// Snapshot of breaker, dedupe and cache state.
    #[must_use]
    pub fn health(&self) -> ClientHealth {
        let open_breakers = self.inner.breakers.open_keys();
        ClientHealth {
            healthy: open_breakers.is_empty(),
            open_breakers,
            tracked_breakers: self.inner.breakers.len(),
            breaker_rejections: self.inner.breakers.rejections(),
            in_flight: self.inner.dedup.in_flight(),
            cache: self.inner.cache.stats(),
        }
    }
}

impl std::fmt::Debug for ResilientClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientClient")
            .field("config", &self.inner.config)
            .field("breakers", &self.inner.breakers.len())
            .field("in_flight", &self.inner.dedup.in_flight())
            .finish()
    }
}
