// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the resilient client.

use crate::cache::CacheStats;

/// Point-in-time health of the request layer.
///
/// Cheap to build: reads counters and the breaker registry only, no I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientHealth {
    /// No breaker is currently open
    pub healthy: bool,
    /// Keys of breakers in the Open state
    pub open_breakers: Vec<String>,
    /// Breakers currently tracked by the registry
    pub tracked_breakers: usize,
    /// Calls rejected by an open breaker since start
    pub breaker_rejections: u64,
    /// Deduplicated calls currently in flight
    pub in_flight: usize,
    pub cache: CacheStats,
}

impl std::fmt::Display for ClientHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "healthy={} open_breakers={} in_flight={} cache_entries={}",
            self.healthy,
            self.open_breakers.len(),
            self.in_flight,
            self.cache.entry_count
        )
    }
}
