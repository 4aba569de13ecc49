// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Resilient Request
//!
//! Fault-tolerant request layer for a multi-tenant OKR application's data
//! access: every read and write against the hosted database goes through it.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     ResilientClient                         │
//! │  • execute / dedupe / batch / fetch_cached                 │
//! │  • Response cache + query timing on the read path          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Request Deduplicator                      │
//! │  • One in-flight call per key, result shared by joiners    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     Retry Executor                          │
//! │  • Circuit breaker check (per operation + tenant)          │
//! │  • Per-attempt timeout, capped exponential backoff         │
//! │  • Error classification, logging, user notification        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                      data-access operation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use resilient_request::{require_data, CallOptions, RawError, ResilienceConfig, ResilientClient};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = ResilientClient::new(ResilienceConfig::default()).expect("valid config");
//!
//!     let options = CallOptions::default()
//!         .tenant("acme")
//!         .operation_key("objectives.get")
//!         .with_circuit_breaker();
//!
//!     let objective = client
//!         .fetch_cached(
//!             "acme:objective:42",
//!             || async {
//!                 let row: Option<String> = Some("Grow ARR".into());
//!                 require_data(row, "objective 42").map_err(RawError::from)
//!             },
//!             options,
//!         )
//!         .await;
//!
//!     match objective {
//!         Ok(title) => println!("{title}"),
//!         Err(err) => eprintln!("{}", resilient_request::user_message(&err)),
//!     }
//! }
//! ```
//!
//! ## Features
//!
//! - **Error Classification**: Any failure becomes a typed [`RequestError`] with a retry verdict
//! - **Retry Logic**: Capped exponential backoff with per-call overrides
//! - **Circuit Breakers**: Per-operation, per-tenant breakers with lazy recovery
//! - **Deduplication**: Concurrent identical reads share one call
//! - **Batching**: Bounded-concurrency fan-out with ordered results
//! - **Response Cache**: TTL cache with prefix invalidation after writes
//!
//! ## Configuration
//!
//! See [`ResilienceConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`client`]: The [`ResilientClient`] composing all components
//! - [`classify`]: Raw failure → [`RequestError`]
//! - [`resilience`]: Circuit breakers and retry logic
//! - [`dedup`]: In-flight request sharing
//! - [`batching`]: Chunked batch runner
//! - [`cache`]: Response cache
//! - [`query_tracker`]: Per-query timings

pub mod batching;
pub mod cache;
pub mod call_options;
pub mod classify;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod metrics;
pub mod notify;
pub mod query_tracker;
pub mod resilience;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use batching::batch_runner::{BatchOptions, BatchOutcome, BatchRunner};
pub use cache::{CacheStats, ResponseCache};
pub use call_options::{CallOptions, RetryCondition};
pub use classify::{classify, RawError};
pub use client::{ClientHealth, ResilientClient};
pub use config::ResilienceConfig;
pub use dedup::RequestDeduplicator;
pub use error::{require_data, ConfigError, ErrorKind, RequestError, Result, Severity};
pub use metrics::LatencyTimer;
pub use notify::{user_message, ErrorNotifier, NoopNotifier};
pub use query_tracker::{QueryStats, QueryTracker};
pub use resilience::circuit_breaker::{
    breaker_key, BreakerRegistry, BreakerSnapshot, CircuitConfig, CircuitState,
};
pub use resilience::retry::{RetryConfig, RetryExecutor};
