// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request deduplication.
//!
//! Collapses concurrent identical requests (several dashboard widgets asking
//! for the same objective list at once) into one underlying call. Every
//! caller sharing a key receives a clone of the same value or the same
//! error.
//!
//! # Flow
//!
//! ```text
//! dedupe(key, op)
//!       │
//!       ├─→ key in flight → join the shared future
//!       │
//!       └─→ not in flight → start op, register shared future under key
//!                            │
//!                            └─→ settles (ok or err) → key removed
//! ```
//!
//! If every caller waiting on a key is dropped before the call settles, the
//! entry is removed and the call is cancelled. While any caller still waits,
//! the call keeps running and later callers keep joining it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::any::Any;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::{ErrorKind, RequestError, Result, CODE_DEDUP_TYPE_MISMATCH};

/// Type-erased response shared between joined callers.
pub(crate) type SharedValue = Arc<dyn Any + Send + Sync>;

type SharedOutcome = std::result::Result<SharedValue, RequestError>;
type InFlight = Shared<BoxFuture<'static, SharedOutcome>>;

struct Slot {
    id: u64,
    future: InFlight,
}

/// In-flight request registry.
///
/// At most one in-flight future exists per key at any instant.
pub struct RequestDeduplicator {
    in_flight: Arc<DashMap<String, Slot>>,
    next_id: AtomicU64,
    started: AtomicU64,
    joined: AtomicU64,
}

/// One caller's handle on a shared in-flight call.
///
/// Dropping it before the call settles removes the slot only when no other
/// caller is still waiting on it, so a cancelled request never pins its
/// key and never orphans the callers that joined it.
struct Waiter {
    in_flight: Arc<DashMap<String, Slot>>,
    key: String,
    id: u64,
    future: InFlight,
}

impl Drop for Waiter {
    fn drop(&mut self) {
        let id = self.id;
        // Held by the slot and by this waiter only: nobody else is listening.
        self.in_flight.remove_if(&self.key, |_, slot| {
            slot.id == id && slot.future.strong_count().map_or(true, |n| n <= 2)
        });
        crate::metrics::set_in_flight(self.in_flight.len());
    }
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            in_flight: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            started: AtomicU64::new(0),
            joined: AtomicU64::new(0),
        }
    }

    /// Run `operation` unless a call with the same key is already in flight,
    /// in which case wait for that one and share its result.
    ///
    /// Reusing a key concurrently for a different response type yields a
    /// `DEDUP_TYPE_MISMATCH` error for the mismatched caller.
    pub async fn dedupe<T, F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut waiter = match self.join(key) {
            Some(existing) => existing,
            None => self.start(key, operation),
        };

        let outcome = (&mut waiter.future).await;
        drop(waiter);

        let value = outcome?;
        value.downcast_ref::<T>().cloned().ok_or_else(|| {
            RequestError::new(
                ErrorKind::Generic,
                format!("Deduplication key '{key}' is in use for a different response type"),
                false,
            )
            .with_code(CODE_DEDUP_TYPE_MISMATCH)
        })
    }

    fn join(&self, key: &str) -> Option<Waiter> {
        let (id, future) = self
            .in_flight
            .get(key)
            .map(|slot| (slot.id, slot.future.clone()))?;
        self.joined.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_dedupe("joined");
        debug!(key, "Joined in-flight request");
        Some(self.waiter(key, id, future))
    }

    fn start<T, F, Fut>(&self, key: &str, operation: F) -> Waiter
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let in_flight = Arc::clone(&self.in_flight);
        let owned_key = key.to_string();
        let call = operation();
        let future = async move {
            let outcome = call.await.map(|v| Arc::new(v) as SharedValue);
            in_flight.remove_if(&owned_key, |_, slot| slot.id == id);
            outcome
        }
        .boxed()
        .shared();

        // The operation was built outside the map lock; another caller may
        // have registered the key meanwhile, in which case ours is never polled.
        match self.in_flight.entry(key.to_string()) {
            Entry::Occupied(existing) => {
                let winner = (existing.get().id, existing.get().future.clone());
                drop(existing);
                self.joined.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_dedupe("joined");
                self.waiter(key, winner.0, winner.1)
            }
            Entry::Vacant(slot) => {
                slot.insert(Slot {
                    id,
                    future: future.clone(),
                });
                self.started.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_dedupe("leader");
                crate::metrics::set_in_flight(self.in_flight.len());
                self.waiter(key, id, future)
            }
        }
    }

    fn waiter(&self, key: &str, id: u64, future: InFlight) -> Waiter {
        Waiter {
            in_flight: Arc::clone(&self.in_flight),
            key: key.to_string(),
            id,
            future,
        }
    }

    /// Number of keys with a call in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    #[must_use]
    pub fn is_in_flight(&self, key: &str) -> bool {
        self.in_flight.contains_key(key)
    }

    /// Calls that started underlying work
    #[must_use]
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }

    /// Calls that shared another call's work
    #[must_use]
    pub fn joined(&self) -> u64 {
        self.joined.load(Ordering::Relaxed)
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::time::sleep;

    fn slow_counted(
        counter: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = Result<u32>> + Send + 'static {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            Ok(value)
        }
    }

    #[tokio::test]
    async fn test_concurrent_calls_share_one_execution() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.dedupe("objectives:acme", || slow_counted(&calls, 7)),
            dedup.dedupe("objectives:acme", || slow_counted(&calls, 99)),
        );

        assert_eq!(a.unwrap(), 7);
        assert_eq!(b.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dedup.started(), 1);
        assert_eq!(dedup.joined(), 1);
        assert_eq!(dedup.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_the_error() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let op = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            sleep(Duration::from_millis(20)).await;
            Err::<u32, _>(RequestError::generic("denied").with_status(403))
        };

        let (a, b) = tokio::join!(
            dedup.dedupe("k", || op(calls.clone())),
            dedup.dedupe("k", || op(calls.clone())),
        );

        assert_eq!(a.unwrap_err(), b.unwrap_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dedup.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_sequential_calls_are_not_merged() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dedup.dedupe("k", || slow_counted(&calls, 1)).await.unwrap();
        dedup.dedupe("k", || slow_counted(&calls, 2)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.dedupe("a", || slow_counted(&calls, 1)),
            dedup.dedupe("b", || slow_counted(&calls, 2)),
        );

        assert_eq!((a.unwrap(), b.unwrap()), (1, 2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_dropped_leader_releases_key() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let cancelled = tokio::time::timeout(
            Duration::from_millis(5),
            dedup.dedupe("k", || slow_counted(&calls, 1)),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!dedup.is_in_flight("k"));

        assert_eq!(dedup.dedupe("k", || slow_counted(&calls, 2)).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_leader_keeps_call_for_waiting_joiner() {
        let dedup = Arc::new(RequestDeduplicator::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let leader = {
            let (dedup, calls) = (dedup.clone(), calls.clone());
            tokio::spawn(async move { dedup.dedupe("k", || slow_counted(&calls, 1)).await })
        };
        sleep(Duration::from_millis(2)).await;
        let joiner = {
            let (dedup, calls) = (dedup.clone(), calls.clone());
            tokio::spawn(async move { dedup.dedupe("k", || slow_counted(&calls, 2)).await })
        };
        sleep(Duration::from_millis(2)).await;

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());
        assert!(dedup.is_in_flight("k"));

        let late = dedup.dedupe("k", || slow_counted(&calls, 3)).await.unwrap();
        assert_eq!(late, 1);
        assert_eq!(joiner.await.unwrap().unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dedup.is_in_flight("k"));
    }

    #[tokio::test]
    async fn test_all_callers_dropped_releases_key() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let both = tokio::time::timeout(Duration::from_millis(5), async {
            tokio::join!(
                dedup.dedupe("k", || slow_counted(&calls, 1)),
                dedup.dedupe("k", || slow_counted(&calls, 2)),
            )
        })
        .await;
        assert!(both.is_err());
        assert!(!dedup.is_in_flight("k"));

        assert_eq!(dedup.dedupe("k", || slow_counted(&calls, 3)).await.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_type_mismatch_is_an_error() {
        let dedup = RequestDeduplicator::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let (a, b) = tokio::join!(
            dedup.dedupe("k", || slow_counted(&calls, 1)),
            dedup.dedupe("k", || async { Ok::<String, RequestError>("text".into()) }),
        );

        assert_eq!(a.unwrap(), 1);
        let err = b.unwrap_err();
        assert_eq!(err.code.as_deref(), Some(CODE_DEDUP_TYPE_MISMATCH));
        assert!(!err.retryable);
    }
}
