//! Statistics for the two-level cache

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    /// In-process map
    Memory,

    /// On-disk store
    Durable,
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheTier::Memory => write!(f, "memory"),
            CacheTier::Durable => write!(f, "durable"),
        }
    }
}

/// Counters for cache performance monitoring
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CacheStats {
    /// Reads answered by the in-memory map
    pub memory_hits: u64,

    /// Reads answered by the durable store (and repopulated into memory)
    pub durable_hits: u64,

    /// Reads that found nothing live
    pub misses: u64,

    /// Entries dropped because their TTL elapsed
    pub expirations: u64,

    /// Successful `set` calls
    pub writes: u64,

    /// Durable writes that failed and were swallowed
    pub durable_write_failures: u64,

    /// Unreadable blobs treated as misses
    pub corrupt_blobs: u64,

    /// Explicit deletions
    pub deletions: u64,

    /// Entries currently in the in-memory map
    pub entries: usize,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.memory_hits + self.durable_hits
    }

    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits() as f64 / total as f64) * 100.0
        }
    }

    /// Calculate miss rate as a percentage
    pub fn miss_rate(&self) -> f64 {
        100.0 - self.hit_rate()
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {} (memory {}, durable {}), misses: {}, hit_rate: {:.2}%, entries: {}, expirations: {} }}",
            self.hits(),
            self.memory_hits,
            self.durable_hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.expirations
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            memory_hits: 60,
            durable_hits: 20,
            misses: 20,
            ..Default::default()
        };

        assert_eq!(stats.hits(), 80);
        assert_eq!(stats.hit_rate(), 80.0);
        assert_eq!(stats.miss_rate(), 20.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.miss_rate(), 100.0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            memory_hits: 100,
            misses: 50,
            entries: 75,
            ..Default::default()
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("misses: 50"));
    }

    #[test]
    fn test_cache_tier_display() {
        assert_eq!(CacheTier::Memory.to_string(), "memory");
        assert_eq!(CacheTier::Durable.to_string(), "durable");
    }
}
