// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration Tests for the Resilient Request layer
//!
//! End-to-end flows through [`ResilientClient`] against in-process fake
//! operations. No external services are needed.
//!
//! # Running Tests
//! ```bash
//! cargo test --test integration
//!
//! # Only breaker scenarios
//! cargo test --test integration breaker
//! ```
//!
//! # Test Organization
//! - `happy_*` - Normal operation: retries recover, dedupe, batches, cache
//! - `breaker_*` - Circuit breaker lifecycle
//! - `failure_*` - Terminal failures: classification, notification, timeouts

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::time::sleep;

use resilient_request::{
    BatchOptions, BatchOutcome, CallOptions, CircuitState, ErrorKind, RawError, RequestError,
    ResilienceConfig, ResilientClient, RetryCondition,
};

// =============================================================================
// Helpers
// =============================================================================

type Op = Box<dyn FnMut() -> BoxFuture<'static, Result<u32, RawError>> + Send>;

/// Config with millisecond delays so retry paths run fast
fn fast_config() -> ResilienceConfig {
    ResilienceConfig {
        base_delay_ms: 1,
        max_delay_ms: 4,
        recovery_timeout_ms: 50,
        ..Default::default()
    }
}

fn client() -> ResilientClient {
    ResilientClient::new(fast_config()).expect("valid config")
}

fn breaker_opts(tenant: &str) -> CallOptions {
    CallOptions::default()
        .tenant(tenant)
        .operation_key("objectives.list")
        .with_circuit_breaker()
        .no_retries()
        .silent()
}

// =============================================================================
// Happy path
// =============================================================================

#[tokio::test]
async fn happy_transient_failures_recover() {
    let client = client();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let result = client
        .execute(
            || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(RawError::driver("08006", "connection failure"))
                    } else {
                        Ok("objectives")
                    }
                }
            },
            &CallOptions::default(),
        )
        .await;

    assert_eq!(result.unwrap(), "objectives");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn happy_dedupe_invokes_once() {
    let client = client();
    let calls = Arc::new(AtomicUsize::new(0));

    let fetch = |calls: Arc<AtomicUsize>| {
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(20)).await;
                Ok::<_, RawError>(vec!["Q1 revenue".to_string()])
            }
        }
    };

    let (a, b, c) = tokio::join!(
        client.dedupe("acme:objectives", fetch(calls.clone()), CallOptions::default()),
        client.dedupe("acme:objectives", fetch(calls.clone()), CallOptions::default()),
        client.dedupe("acme:objectives", fetch(calls.clone()), CallOptions::default()),
    );

    assert_eq!(a.unwrap(), vec!["Q1 revenue".to_string()]);
    assert_eq!(b.unwrap(), c.unwrap());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.deduplicator().joined(), 2);
}

#[tokio::test]
async fn happy_dedupe_survives_cancelled_leader() {
    let client = client();
    let calls = Arc::new(AtomicUsize::new(0));

    let fetch = |calls: Arc<AtomicUsize>, value: u32| {
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_millis(50)).await;
                Ok::<_, RawError>(value)
            }
        }
    };

    let leader = {
        let (client, op) = (client.clone(), fetch(calls.clone(), 1));
        tokio::spawn(async move { client.dedupe("k", op, CallOptions::default()).await })
    };
    sleep(Duration::from_millis(5)).await;
    let joiner = {
        let (client, op) = (client.clone(), fetch(calls.clone(), 2));
        tokio::spawn(async move { client.dedupe("k", op, CallOptions::default()).await })
    };
    sleep(Duration::from_millis(5)).await;
    leader.abort();
    let _ = leader.await;

    let third = client
        .dedupe("k", fetch(calls.clone(), 3), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(third, 1);
    assert_eq!(joiner.await.unwrap().unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.deduplicator().in_flight(), 0);
}

#[tokio::test]
async fn happy_batch_keeps_input_order() {
    let client = client();
    let ops: Vec<Op> = vec![
        Box::new(|| {
            async {
                sleep(Duration::from_millis(15)).await;
                Ok(1)
            }
            .boxed()
        }),
        Box::new(|| async { Err(RawError::http(422, "invalid key result")) }.boxed()),
        Box::new(|| async { Ok(3) }.boxed()),
    ];

    let outcomes = client
        .batch(ops, &CallOptions::default().silent())
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], BatchOutcome::Success { data: 1 });
    assert_eq!(outcomes[1].error().map(|e| e.status), Some(Some(422)));
    assert_eq!(outcomes[2], BatchOutcome::Success { data: 3 });
}

#[tokio::test]
async fn happy_fail_fast_batch() {
    let client = client();
    let ops: Vec<Op> = vec![
        Box::new(|| async { Ok(1) }.boxed()),
        Box::new(|| async { Err(RawError::http(400, "bad input")) }.boxed()),
    ];

    let err = client
        .batch_with(ops, BatchOptions::default().fail_fast(), &CallOptions::default().silent())
        .await
        .unwrap_err();
    assert_eq!(err.status, Some(400));
}

#[tokio::test]
async fn happy_cached_reads_per_tenant() {
    let client = client();
    let calls = Arc::new(AtomicUsize::new(0));
    let fetch = |tenant: &'static str, calls: Arc<AtomicUsize>| {
        move || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RawError>(format!("{tenant} areas"))
            }
        }
    };

    for _ in 0..3 {
        let acme = client
            .fetch_cached("acme:areas", fetch("acme", calls.clone()), CallOptions::default())
            .await
            .unwrap();
        assert_eq!(acme, "acme areas");
    }
    let globex = client
        .fetch_cached("globex:areas", fetch("globex", calls.clone()), CallOptions::default())
        .await
        .unwrap();

    assert_eq!(globex, "globex areas");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert_eq!(client.invalidate("acme:"), 1);
    assert_eq!(client.health().cache.entry_count, 1);
}

// =============================================================================
// Circuit breaker
// =============================================================================

#[tokio::test]
async fn breaker_opens_after_threshold_and_rejects_without_invoking() {
    let client = client();
    let invoked = Arc::new(AtomicUsize::new(0));
    let opts = breaker_opts("acme");

    for _ in 0..5 {
        let counter = invoked.clone();
        let result: resilient_request::Result<()> = client
            .execute(
                move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { Err(RawError::http(500, "internal error")) }
                },
                &opts,
            )
            .await;
        assert_eq!(result.unwrap_err().status, Some(500));
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 5);

    let counter = invoked.clone();
    let rejected: resilient_request::Result<()> = client
        .execute(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RawError>(()) }
            },
            &opts,
        )
        .await;

    let err = rejected.unwrap_err();
    assert_eq!(err.kind, ErrorKind::CircuitOpen);
    assert_eq!(err.status, Some(503));
    assert!(!err.retryable);
    assert_eq!(invoked.load(Ordering::SeqCst), 5);

    let health = client.health();
    assert!(!health.healthy);
    assert_eq!(health.open_breakers.len(), 1);
    assert_eq!(health.breaker_rejections, 1);
}

#[tokio::test]
async fn breaker_half_open_trial_call_closes_circuit() {
    let client = client();
    let opts = breaker_opts("acme");
    let key = opts.breaker_key("unused");

    for _ in 0..5 {
        let _ = client
            .execute(|| async { Err::<(), _>(RawError::http(503, "unavailable")) }, &opts)
            .await;
    }
    assert_eq!(client.breakers().snapshot(&key).unwrap().state, CircuitState::Open);

    sleep(Duration::from_millis(60)).await;

    let trial = client.execute(|| async { Ok::<_, RawError>(7) }, &opts).await;
    assert_eq!(trial.unwrap(), 7);

    let snapshot = client.breakers().snapshot(&key).unwrap();
    assert_eq!(snapshot.state, CircuitState::Closed);
    assert_eq!(snapshot.failure_count, 0);
    assert!(client.health().healthy);
}

#[tokio::test]
async fn breaker_half_open_failure_reopens() {
    let client = client();
    let opts = breaker_opts("acme");
    let key = opts.breaker_key("unused");

    for _ in 0..5 {
        let _ = client
            .execute(|| async { Err::<(), _>(RawError::http(500, "down")) }, &opts)
            .await;
    }
    sleep(Duration::from_millis(60)).await;

    let trial = client
        .execute(|| async { Err::<(), _>(RawError::http(500, "still down")) }, &opts)
        .await;
    assert_eq!(trial.unwrap_err().status, Some(500));
    assert_eq!(client.breakers().snapshot(&key).unwrap().state, CircuitState::Open);

    let rejected = client.execute(|| async { Ok::<_, RawError>(()) }, &opts).await;
    assert!(rejected.unwrap_err().is_circuit_open());
}

#[tokio::test]
async fn breaker_tenants_are_isolated() {
    let client = client();
    let acme = breaker_opts("acme");
    let globex = breaker_opts("globex");

    for _ in 0..5 {
        let _ = client
            .execute(|| async { Err::<(), _>(RawError::http(500, "down")) }, &acme)
            .await;
    }

    let other = client.execute(|| async { Ok::<_, RawError>(1) }, &globex).await;
    assert_eq!(other.unwrap(), 1);
    let blocked = client.execute(|| async { Ok::<_, RawError>(1) }, &acme).await;
    assert!(blocked.unwrap_err().is_circuit_open());
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn failure_notifier_sees_terminal_errors_unless_silent() {
    let seen: Arc<Mutex<Vec<RequestError>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let client = ResilientClient::with_notifier(
        fast_config(),
        Arc::new(move |e: &RequestError| sink.lock().push(e.clone())),
    )
    .unwrap();

    let _ = client
        .execute(|| async { Err::<(), _>(RawError::http(403, "forbidden")) }, &CallOptions::default())
        .await;
    let _ = client
        .execute(
            || async { Err::<(), _>(RawError::http(404, "missing")) },
            &CallOptions::default().silent(),
        )
        .await;

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].status, Some(403));
}

#[tokio::test]
async fn failure_timeout_is_retried_then_reported() {
    let client = client();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let result: resilient_request::Result<()> = client
        .execute(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async {
                    sleep(Duration::from_millis(200)).await;
                    Ok::<_, RawError>(())
                }
            },
            &CallOptions::default().timeout(Duration::from_millis(10)).silent(),
        )
        .await;

    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Timeout);
    assert_eq!(err.status, Some(408));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn failure_retry_condition_overrides_classifier() {
    let client = client();
    let attempts = Arc::new(AtomicUsize::new(0));
    let counter = attempts.clone();

    let options = CallOptions::default()
        .retry_condition(RetryCondition::new(|err, _attempt| err.status == Some(409)))
        .silent();
    let result: resilient_request::Result<()> = client
        .execute(
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(RawError::http(409, "version conflict")) }
            },
            &options,
        )
        .await;

    assert_eq!(result.unwrap_err().status, Some(409));
    assert_eq!(attempts.load(Ordering::SeqCst), 4);
}

#[test]
fn failure_invalid_config_is_rejected() {
    let config = ResilienceConfig {
        failure_threshold: 0,
        ..Default::default()
    };
    assert!(ResilientClient::new(config).is_err());

    let config = ResilienceConfig {
        base_delay_ms: 20_000,
        ..Default::default()
    };
    assert!(ResilientClient::new(config).is_err());
}
