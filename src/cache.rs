// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Response Cache
//!
//! Short-lived in-memory cache for read responses (objective lists, area
//! summaries). Entries expire after a TTL and are dropped eagerly after writes
//! through [`ResponseCache::invalidate_prefix`].
//!
//! # Flow
//!
//! ```text
//! get(key)
//!       │
//!       ├─→ present + fresh → hit, return clone
//!       │
//!       ├─→ present + expired → remove, miss
//!       │
//!       └─→ absent → miss
//! ```
//!
//! Bounded by max entries with oldest-eviction.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Clone, Debug)]
struct CacheEntry<V> {
    value: V,
    /// `None` when the TTL reaches past what `Instant` can represent
    expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// TTL-bounded response cache keyed by string
pub struct ResponseCache<V> {
    cache: DashMap<String, CacheEntry<V>>,
    /// Insertion order for eviction (oldest first)
    order: Mutex<VecDeque<String>>,
    max_entries: usize,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Entries found past their TTL
    pub expired: u64,
    pub entry_count: usize,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            cache: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_entries,
            ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
        }
    }

    /// Returns a clone of the cached value if present and not expired.
    pub fn get(&self, key: &str) -> Option<V> {
        if let Some(entry) = self.cache.get(key) {
            if entry.is_fresh(Instant::now()) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                crate::metrics::record_cache(true);
                return Some(entry.value.clone());
            }
            self.expired.fetch_add(1, Ordering::Relaxed);
            drop(entry); // Release read lock before removing
            self.remove(key);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        crate::metrics::record_cache(false);
        None
    }

    /// Cache a value with the default TTL
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.insert_with_ttl(key, value, self.ttl);
    }

    pub fn insert_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        if self.max_entries == 0 {
            return;
        }
        let key = key.into();

        if self.cache.len() >= self.max_entries && !self.cache.contains_key(&key) {
            let mut order = self.order.lock();
            while self.cache.len() >= self.max_entries {
                if let Some(old_key) = order.pop_front() {
                    self.cache.remove(&old_key);
                } else {
                    break;
                }
            }
        }

        let entry = CacheEntry {
            value,
            expires_at: Instant::now().checked_add(ttl),
        };
        if self.cache.insert(key.clone(), entry).is_none() {
            self.order.lock().push_back(key);
        }
        crate::metrics::set_cache_entries(self.cache.len());
    }

    /// Drop a single entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        let existed = self.remove(key);
        if existed {
            debug!(key, "Cache entry invalidated");
        }
        existed
    }

    /// Drop every entry whose key starts with `prefix`. Returns the count removed.
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let before = self.cache.len();
        self.cache.retain(|key, _| !key.starts_with(prefix));
        self.order.lock().retain(|key| !key.starts_with(prefix));
        let removed = before.saturating_sub(self.cache.len());
        debug!(prefix, removed, "Cache prefix invalidated");
        crate::metrics::set_cache_entries(self.cache.len());
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            expired: self.expired.load(Ordering::Relaxed),
            entry_count: self.cache.len(),
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Clear all cached entries
    pub fn clear(&self) {
        self.cache.clear();
        self.order.lock().clear();
        crate::metrics::set_cache_entries(0);
    }

    fn remove(&self, key: &str) -> bool {
        let existed = self.cache.remove(key).is_some();
        if existed {
            self.order.lock().retain(|k| k != key);
            crate::metrics::set_cache_entries(self.cache.len());
        }
        existed
    }
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        // 1000 responses for five minutes
        Self::new(1000, Duration::from_secs(300))
    }
}
