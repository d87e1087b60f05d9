//! Fast tier: short-TTL, size-bounded in-process memory with LRU eviction

use crate::clock::{self, Clock};
use crate::key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Statistics for the fast tier
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FastTierStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,

    /// Entries evicted to respect `max_entries`
    pub evictions_lru: u64,

    /// Entries dropped because their TTL elapsed
    pub evictions_ttl: u64,

    pub entries: usize,
    pub max_entries: usize,
}

#[derive(Debug, Clone)]
struct FastEntry {
    value: Value,
    expiry: Option<i64>,
}

struct FastStore {
    entries: HashMap<String, FastEntry>,
    lru_queue: VecDeque<String>,
    stats: FastTierStats,
}

impl FastStore {
    fn remove(&mut self, key: &str) -> Option<FastEntry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.lru_queue.retain(|k| k != key);
        }
        removed
    }

    fn touch(&mut self, key: &str) {
        self.lru_queue.retain(|k| k != key);
        self.lru_queue.push_back(key.to_string());
    }
}

/// In-process accelerator keyed by `(session, agent, scope)`.
///
/// Entries expire after their TTL and the least recently used entry is evicted
/// once `max_entries` is reached. Nothing here survives a restart.
pub struct FastTier {
    default_ttl: Duration,
    max_entries: usize,
    store: RwLock<FastStore>,
    clock: Arc<dyn Clock>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl FastTier {
    pub fn new(default_ttl: Duration, max_entries: usize, clock: Arc<dyn Clock>) -> Self {
        let max_entries = max_entries.max(1);
        info!(
            "Initializing fast memory tier (ttl {:?}, max {} entries)",
            default_ttl, max_entries
        );

        Self {
            default_ttl,
            max_entries,
            store: RwLock::new(FastStore {
                entries: HashMap::new(),
                lru_queue: VecDeque::new(),
                stats: FastTierStats {
                    max_entries,
                    ..Default::default()
                },
            }),
            clock,
            sweeper: Mutex::new(None),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store a value; `ttl` of `None` uses the tier default
    pub async fn set(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        value: Value,
        ttl: Option<Duration>,
    ) {
        let key = key::composite_key(session_id, agent_id, scope);
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = FastEntry {
            value,
            expiry: clock::expiry_from_ttl(self.clock.now_millis(), Some(ttl)),
        };

        let mut store = self.store.write().await;
        self.insert(&mut store, key, entry);
    }

    /// Store a value read from a slower tier unless a live entry already
    /// exists. Returns the live value that was kept instead, if any.
    pub async fn fill(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        value: Value,
        ttl: Option<Duration>,
    ) -> Option<Value> {
        let key = key::composite_key(session_id, agent_id, scope);
        let now = self.clock.now_millis();
        let ttl = ttl.unwrap_or(self.default_ttl);

        let mut store = self.store.write().await;
        if let Some(entry) = store.entries.get(&key) {
            if !clock::is_expired(entry.expiry, now) {
                let kept = entry.value.clone();
                store.touch(&key);
                debug!("Fast tier already holds a newer value: {}", key);
                return Some(kept);
            }
        }

        let entry = FastEntry {
            value,
            expiry: clock::expiry_from_ttl(now, Some(ttl)),
        };
        self.insert(&mut store, key, entry);
        None
    }

    fn insert(&self, store: &mut FastStore, key: String, entry: FastEntry) {
        if !store.entries.contains_key(&key) {
            while store.entries.len() >= self.max_entries {
                let Some(oldest) = store.lru_queue.pop_front() else {
                    break;
                };
                debug!("Evicting fast tier entry due to max_entries limit: {}", oldest);
                store.entries.remove(&oldest);
                store.stats.evictions_lru += 1;
            }
        }

        store.entries.insert(key.clone(), entry);
        store.touch(&key);
        store.stats.writes += 1;
    }

    /// Get a live value; an expired entry is removed and reported as a miss
    pub async fn get(&self, session_id: &str, agent_id: &str, scope: &str) -> Option<Value> {
        let key = key::composite_key(session_id, agent_id, scope);
        let now = self.clock.now_millis();
        let mut store = self.store.write().await;

        let hit = match store.entries.get(&key) {
            Some(entry) if !clock::is_expired(entry.expiry, now) => Some(entry.value.clone()),
            Some(_) => {
                debug!("Fast tier entry expired: {}", key);
                store.remove(&key);
                store.stats.evictions_ttl += 1;
                None
            }
            None => None,
        };

        match hit {
            Some(value) => {
                store.touch(&key);
                store.stats.hits += 1;
                Some(value)
            }
            None => {
                store.stats.misses += 1;
                None
            }
        }
    }

    /// Whether a live entry exists, without touching LRU order or counters
    pub async fn contains(&self, session_id: &str, agent_id: &str, scope: &str) -> bool {
        let key = key::composite_key(session_id, agent_id, scope);
        let now = self.clock.now_millis();
        let store = self.store.read().await;
        matches!(store.entries.get(&key), Some(entry) if !clock::is_expired(entry.expiry, now))
    }

    pub async fn delete(&self, session_id: &str, agent_id: &str, scope: &str) -> bool {
        let key = key::composite_key(session_id, agent_id, scope);
        self.store.write().await.remove(&key).is_some()
    }

    /// Purge expired entries, returning how many were removed
    pub async fn cleanup(&self) -> usize {
        let now = self.clock.now_millis();
        let mut store = self.store.write().await;

        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, entry)| clock::is_expired(entry.expiry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            store.remove(key);
        }
        store.stats.evictions_ttl += expired.len() as u64;

        if !expired.is_empty() {
            debug!("Fast tier cleaned up {} expired entries", expired.len());
        }
        expired.len()
    }

    pub async fn stats(&self) -> FastTierStats {
        let store = self.store.read().await;
        let mut stats = store.stats;
        stats.entries = store.entries.len();
        stats
    }

    pub async fn len(&self) -> usize {
        self.store.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.store.read().await.entries.is_empty()
    }

    /// Start a periodic purge of expired entries. Replaces a running sweeper.
    pub async fn start_sweeper(self: &Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            warn!("Ignoring zero fast tier sweep interval");
            return;
        }

        let weak: Weak<FastTier> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(tier) = weak.upgrade() else {
                    break;
                };
                tier.cleanup().await;
            }
        });

        if let Some(previous) = self.sweeper.lock().await.replace(task) {
            previous.abort();
        }
        info!("Fast tier sweeper started (interval: {:?})", interval);
    }

    /// Stop the sweeper and drop all entries. Safe to call repeatedly.
    pub async fn destroy(&self) {
        if let Some(task) = self.sweeper.lock().await.take() {
            task.abort();
            debug!("Fast tier sweeper stopped");
        }

        let mut store = self.store.write().await;
        store.entries.clear();
        store.lru_queue.clear();
    }
}

impl Drop for FastTier {
    fn drop(&mut self) {
        if let Ok(mut sweeper) = self.sweeper.try_lock() {
            if let Some(task) = sweeper.take() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    fn tier(max_entries: usize) -> (FastTier, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (
            FastTier::new(Duration::from_millis(100), max_entries, clock.clone()),
            clock,
        )
    }

    #[tokio::test]
    async fn test_basic_set_and_get() {
        let (tier, _clock) = tier(10);
        tier.set("s1", "a1", "conversation", json!({"msg": "hi"}), None).await;

        assert_eq!(
            tier.get("s1", "a1", "conversation").await,
            Some(json!({"msg": "hi"}))
        );
        assert_eq!(tier.get("s1", "a1", "other").await, None);

        let stats = tier.stats().await;
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let (tier, clock) = tier(10);
        tier.set("s1", "a1", "temp", json!(1), None).await;

        clock.advance(Duration::from_millis(150));
        assert_eq!(tier.get("s1", "a1", "temp").await, None);
        assert_eq!(tier.len().await, 0);
        assert_eq!(tier.stats().await.evictions_ttl, 1);
    }

    #[tokio::test]
    async fn test_custom_ttl() {
        let (tier, clock) = tier(10);
        tier.set("s", "a", "long", json!(1), Some(Duration::from_secs(10))).await;

        clock.advance(Duration::from_secs(5));
        assert!(tier.get("s", "a", "long").await.is_some());
    }

    #[tokio::test]
    async fn test_huge_ttl_does_not_wrap() {
        let (tier, clock) = tier(10);
        tier.set("s", "a", "max", json!("kept"), Some(Duration::from_millis(u64::MAX))).await;
        tier.set("s", "a", "dur", json!("kept"), Some(Duration::MAX)).await;

        assert_eq!(tier.get("s", "a", "max").await, Some(json!("kept")));
        clock.advance(Duration::from_secs(10 * 365 * 24 * 3600));
        assert_eq!(tier.get("s", "a", "dur").await, Some(json!("kept")));
        assert_eq!(tier.stats().await.evictions_ttl, 0);
    }

    #[tokio::test]
    async fn test_fill_keeps_live_entry() {
        let (tier, clock) = tier(10);

        assert_eq!(tier.fill("s", "a", "x", json!("old"), None).await, None);
        assert_eq!(tier.get("s", "a", "x").await, Some(json!("old")));

        tier.set("s", "a", "x", json!("new"), None).await;
        assert_eq!(tier.fill("s", "a", "x", json!("old"), None).await, Some(json!("new")));
        assert_eq!(tier.get("s", "a", "x").await, Some(json!("new")));

        // an expired entry is replaced
        clock.advance(Duration::from_millis(150));
        assert_eq!(tier.fill("s", "a", "x", json!("old"), None).await, None);
        assert_eq!(tier.get("s", "a", "x").await, Some(json!("old")));
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let (tier, _clock) = tier(3);
        tier.set("s1", "a", "x", json!(1), None).await;
        tier.set("s2", "a", "x", json!(2), None).await;
        tier.set("s3", "a", "x", json!(3), None).await;

        // s1 becomes most recently used
        tier.get("s1", "a", "x").await;
        tier.set("s4", "a", "x", json!(4), None).await;

        assert!(tier.get("s2", "a", "x").await.is_none());
        assert!(tier.get("s1", "a", "x").await.is_some());
        assert!(tier.get("s4", "a", "x").await.is_some());
        assert_eq!(tier.stats().await.evictions_lru, 1);
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let (tier, _clock) = tier(2);
        tier.set("s1", "a", "x", json!(1), None).await;
        tier.set("s2", "a", "x", json!(2), None).await;
        tier.set("s2", "a", "x", json!(3), None).await;

        assert_eq!(tier.len().await, 2);
        assert_eq!(tier.get("s2", "a", "x").await, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_context_isolation() {
        let (tier, _clock) = tier(10);
        tier.set("session_1", "indii", "test_scope", json!("one"), None).await;
        tier.set("session_2", "indii", "test_scope", json!("two"), None).await;

        assert_eq!(tier.get("session_1", "indii", "test_scope").await, Some(json!("one")));
        assert_eq!(tier.get("session_2", "indii", "test_scope").await, Some(json!("two")));
    }

    #[tokio::test]
    async fn test_cleanup_and_destroy() {
        let (tier, clock) = tier(10);
        tier.set("s", "a", "short", json!(1), None).await;
        tier.set("s", "a", "long", json!(2), Some(Duration::from_secs(60))).await;

        clock.advance(Duration::from_millis(200));
        assert_eq!(tier.cleanup().await, 1);
        assert_eq!(tier.len().await, 1);

        tier.destroy().await;
        tier.destroy().await;
        assert!(tier.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweeper_purges_expired_entries() {
        let clock = Arc::new(ManualClock::new(0));
        let tier = Arc::new(FastTier::new(Duration::from_millis(10), 10, clock.clone()));
        tier.set("s", "a", "x", json!(1), None).await;
        clock.advance(Duration::from_millis(20));

        tier.start_sweeper(Duration::from_millis(10)).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(tier.len().await, 0);
        tier.destroy().await;
    }
}
