// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query performance tracking.
//!
//! Wraps data-access futures under a stable query name (`objectives.list`,
//! `areas.by_tenant`), aggregates timings per name and warns when a query
//! runs past the slow threshold.

use dashmap::DashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::metrics::LatencyTimer;

/// Aggregated timings for one query name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryStats {
    pub count: u64,
    pub failures: u64,
    pub slow: u64,
    pub total: Duration,
    pub max: Duration,
}

impl QueryStats {
    #[must_use]
    pub fn average(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        match u32::try_from(self.count) {
            Ok(count) => self.total / count,
            Err(_) => Duration::from_secs_f64(self.total.as_secs_f64() / self.count as f64),
        }
    }

    fn record(&mut self, elapsed: Duration, failed: bool, slow: bool) {
        self.count += 1;
        self.total += elapsed;
        self.max = self.max.max(elapsed);
        if failed {
            self.failures += 1;
        }
        if slow {
            self.slow += 1;
        }
    }
}

pub struct QueryTracker {
    stats: DashMap<String, QueryStats>,
    slow_threshold: Duration,
}

impl QueryTracker {
    pub fn new(slow_threshold: Duration) -> Self {
        Self {
            stats: DashMap::new(),
            slow_threshold,
        }
    }

    #[must_use]
    pub fn slow_threshold(&self) -> Duration {
        self.slow_threshold
    }

    /// Await `query`, recording its duration and outcome under `name`.
    ///
    /// `name` is also a metrics label: use a fixed query name, not a key
    /// carrying tenant or record ids.
    pub async fn track<T, E, Fut>(&self, name: &str, query: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        let timer = LatencyTimer::new(name);
        let result = query.await;
        let elapsed = timer.elapsed();
        drop(timer);

        let slow = elapsed > self.slow_threshold;
        if slow {
            warn!(
                query = name,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = self.slow_threshold.as_millis() as u64,
                "Slow query"
            );
            crate::metrics::record_slow_query(name);
        } else {
            debug!(query = name, elapsed_ms = elapsed.as_millis() as u64, "Query finished");
        }

        self.stats
            .entry(name.to_string())
            .or_default()
            .record(elapsed, result.is_err(), slow);
        result
    }

    #[must_use]
    pub fn stats(&self, name: &str) -> Option<QueryStats> {
        self.stats.get(name).map(|s| s.clone())
    }

    /// The `n` query names with the highest average duration, slowest first.
    #[must_use]
    pub fn slowest(&self, n: usize) -> Vec<(String, QueryStats)> {
        let mut all: Vec<(String, QueryStats)> = self
            .stats
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        all.sort_by(|a, b| b.1.average().cmp(&a.1.average()));
        all.truncate(n);
        all
    }

    pub fn reset(&self) {
        self.stats.clear();
    }
}

impl Default for QueryTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(1))
    }
}
