//! Two-level cache: in-process map over a durable store

use crate::cache::{
    durable::{DurableStore, FsStore},
    entry::{CacheEntry, StoredBlob},
    types::{CacheStats, CacheTier},
};
use crate::clock::{Clock, SystemClock};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// TTL-aware cache spanning an in-memory map and a durable store
///
/// This implementation provides:
/// - Memory-first reads, falling back to the durable store and repopulating memory
/// - Lazy expiry: an expired entry seen by a reader is removed from both tiers
/// - Best-effort persistence: durable write failures are logged, never returned
/// - Same-process read-your-writes through the in-memory map
pub struct TwoLevelCache {
    scope: String,

    default_ttl: Duration,

    config: MemoryConfig,

    memory: RwLock<MemoryStore>,

    durable: Arc<dyn DurableStore>,

    clock: Arc<dyn Clock>,
}

struct MemoryStore {
    entries: HashMap<String, CacheEntry>,
    stats: CacheStats,
}

/// Result of an explicit cleanup pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Expired entries removed from the in-memory map
    pub memory_removed: usize,

    /// Expired or unreadable blobs removed from the durable store
    pub durable_removed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.memory_removed + self.durable_removed
    }
}

impl TwoLevelCache {
    /// Create a cache over explicit collaborators
    pub fn new(
        scope: impl Into<String>,
        durable: Arc<dyn DurableStore>,
        clock: Arc<dyn Clock>,
        config: MemoryConfig,
    ) -> Self {
        let scope = scope.into();
        info!(
            "Initializing two-level cache for scope '{}' (default ttl {:?})",
            scope, config.default_ttl
        );

        Self {
            scope,
            default_ttl: config.default_ttl,
            config,
            memory: RwLock::new(MemoryStore {
                entries: HashMap::new(),
                stats: CacheStats::default(),
            }),
            durable,
            clock,
        }
    }

    /// Create a cache owning `<cache_root>/<scope>` on disk, using the wall clock
    pub fn for_scope(config: MemoryConfig, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        let durable = Arc::new(FsStore::new(config.scope_dir(&scope)));
        Self::new(scope, durable, Arc::new(SystemClock), config)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn durable(&self) -> &Arc<dyn DurableStore> {
        &self.durable
    }

    /// Get a live value, looking in memory first, then in the durable store
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.get_with_tier(key).await?.map(|(value, _)| value))
    }

    /// Like [`get`](Self::get), also reporting which tier answered
    pub async fn get_with_tier(&self, key: &str) -> Result<Option<(Value, CacheTier)>> {
        let now = self.clock.now_millis();

        {
            let mut memory = self.memory.write().await;
            if let Some(entry) = memory.entries.get(key) {
                if !entry.is_expired(now) {
                    let value = entry.value.clone();
                    memory.stats.memory_hits += 1;
                    debug!("Memory cache hit: {}", key);
                    return Ok(Some((value, CacheTier::Memory)));
                }

                debug!("Memory cache entry expired: {}", key);
                memory.entries.remove(key);
                memory.stats.expirations += 1;
            }
        }

        let raw = match self.durable.read(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("Cache miss: {}", key);
                self.memory.write().await.stats.misses += 1;
                return Ok(None);
            }
            Err(e) => {
                warn!("Durable cache read failed for {}: {}", key, e);
                self.memory.write().await.stats.misses += 1;
                return Ok(None);
            }
        };

        // The lock was released across the read, so a set may have landed since.
        // Decide under the write lock and keep holding it through any durable
        // delete: a later set then inserts and writes only after the delete.
        let mut memory = self.memory.write().await;
        let now = self.clock.now_millis();
        if let Some(entry) = memory.entries.get(key) {
            if !entry.is_expired(now) {
                let value = entry.value.clone();
                memory.stats.memory_hits += 1;
                debug!("Memory cache hit after concurrent write: {}", key);
                return Ok(Some((value, CacheTier::Memory)));
            }
            memory.entries.remove(key);
            memory.stats.expirations += 1;
        }

        let blob = match StoredBlob::decode(&raw) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Discarding unreadable cache blob for {}: {}", key, e);
                self.delete_durable_quietly(key).await;
                memory.stats.corrupt_blobs += 1;
                memory.stats.misses += 1;
                return Ok(None);
            }
        };

        if crate::clock::is_expired(blob.expiry, now) {
            debug!("Durable cache entry expired: {}", key);
            self.delete_durable_quietly(key).await;
            memory.stats.expirations += 1;
            memory.stats.misses += 1;
            return Ok(None);
        }

        let value = blob.value.clone();
        memory
            .entries
            .insert(key.to_string(), CacheEntry::from_blob(key, blob));
        memory.stats.durable_hits += 1;
        debug!("Durable cache hit, repopulated memory: {}", key);
        Ok(Some((value, CacheTier::Durable)))
    }

    /// Get and deserialize a live value
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Store a value in both tiers.
    ///
    /// `ttl` of `None` uses the default TTL; `Some(Duration::ZERO)` never expires.
    /// The in-memory write happens before the durable write is attempted, and a
    /// durable failure is logged and swallowed.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<bool> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let ttl = (!ttl.is_zero()).then(|| self.config.jittered(ttl));
        let entry = CacheEntry::new(key, value, self.clock.now_millis(), ttl);
        let blob = entry.to_blob();

        {
            let mut memory = self.memory.write().await;
            memory.entries.insert(key.to_string(), entry);
            memory.stats.writes += 1;
        }

        let persisted = match blob.encode() {
            Ok(raw) => self.durable.write(key, &raw).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            warn!("Durable cache write failed for {} (kept in memory): {}", key, e);
            self.memory.write().await.stats.durable_write_failures += 1;
        } else {
            debug!("Stored cache entry: {}", key);
        }

        Ok(true)
    }

    /// Store a value with the default TTL
    pub async fn set_default(&self, key: &str, value: Value) -> Result<bool> {
        self.set(key, value, None).await
    }

    /// Store a value that only explicit deletion removes
    pub async fn set_forever(&self, key: &str, value: Value) -> Result<bool> {
        self.set(key, value, Some(Duration::ZERO)).await
    }

    /// Serialize and store a value
    pub async fn set_as<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<bool> {
        let value = serde_json::to_value(value)?;
        self.set(key, value, ttl).await
    }

    /// Remove a key from both tiers. Absent keys are fine.
    pub async fn delete(&self, key: &str) -> Result<()> {
        {
            let mut memory = self.memory.write().await;
            if memory.entries.remove(key).is_some() {
                memory.stats.deletions += 1;
            }
        }
        self.durable.delete(key).await?;
        debug!("Deleted cache entry: {}", key);
        Ok(())
    }

    /// Remove every entry from both tiers
    pub async fn clear(&self) -> Result<()> {
        let count = {
            let mut memory = self.memory.write().await;
            let count = memory.entries.len();
            memory.entries.clear();
            count
        };
        self.durable.clear().await?;

        info!("Cleared {} in-memory entries for scope '{}'", count, self.scope);
        Ok(())
    }

    /// Whether the in-memory map holds `key`, expired or not
    pub async fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.read().await.entries.contains_key(key)
    }

    /// Whether the durable store holds a blob for `key`, expired or not
    pub async fn contains_durable(&self, key: &str) -> bool {
        matches!(self.durable.read(key).await, Ok(Some(_)))
    }

    /// Remove all expired entries from both tiers
    pub async fn cleanup_expired(&self) -> Result<SweepReport> {
        let now = self.clock.now_millis();
        let mut report = SweepReport::default();

        {
            let mut memory = self.memory.write().await;
            let before = memory.entries.len();
            memory.entries.retain(|_, entry| !entry.is_expired(now));
            report.memory_removed = before - memory.entries.len();
            memory.stats.expirations += report.memory_removed as u64;
        }

        for entry in self.durable.list_entries().await? {
            let stale = match self.durable.read_entry(&entry).await {
                Ok(Some(raw)) => match StoredBlob::decode(&raw) {
                    Ok(blob) => crate::clock::is_expired(blob.expiry, now),
                    Err(_) => true,
                },
                Ok(None) => false,
                Err(e) => {
                    warn!("Skipping unreadable cache file {}: {}", entry, e);
                    false
                }
            };

            if !stale {
                continue;
            }

            // Re-read under the write lock so a set racing the sweep survives
            let _memory = self.memory.write().await;
            let still_stale = match self.durable.read_entry(&entry).await {
                Ok(Some(raw)) => match StoredBlob::decode(&raw) {
                    Ok(blob) => crate::clock::is_expired(blob.expiry, now),
                    Err(_) => true,
                },
                _ => false,
            };
            if still_stale {
                self.durable.delete_entry(&entry).await?;
                report.durable_removed += 1;
            }
        }

        if report.total() > 0 {
            info!(
                "Cleaned up {} expired entries in scope '{}' (memory {}, durable {})",
                report.total(),
                self.scope,
                report.memory_removed,
                report.durable_removed
            );
        }

        Ok(report)
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let memory = self.memory.read().await;
        let mut stats = memory.stats.clone();
        stats.entries = memory.entries.len();
        stats
    }

    /// Number of entries in the in-memory map
    pub async fn len(&self) -> usize {
        self.memory.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.memory.read().await.entries.is_empty()
    }

    async fn delete_durable_quietly(&self, key: &str) {
        if let Err(e) = self.durable.delete(key).await {
            warn!("Failed to remove stale cache blob for {}: {}", key, e);
        }
    }
}

/// Handle to a background sweep task; the task stops when the handle drops
#[derive(Debug)]
pub struct SweepHandle {
    task: JoinHandle<()>,
}

impl SweepHandle {
    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for SweepHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Background task for periodic cleanup of expired entries.
///
/// The task holds only a weak reference and exits once the cache is dropped.
pub fn start_auto_cleanup(cache: &Arc<TwoLevelCache>, interval: Duration) -> Result<SweepHandle> {
    if interval.is_zero() {
        return Err(MemoryError::ConfigError(
            "sweep interval must be greater than 0".to_string(),
        ));
    }

    let weak: Weak<TwoLevelCache> = Arc::downgrade(cache);
    info!(
        "Starting automatic cache cleanup for scope '{}' (interval: {:?})",
        cache.scope(),
        interval
    );

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(cache) = weak.upgrade() else {
                break;
            };
            if let Err(e) = cache.cleanup_expired().await {
                warn!("Auto cleanup failed: {}", e);
            }
        }
    });

    Ok(SweepHandle { task })
}
