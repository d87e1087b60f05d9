//! Coordinator layering the fast tier over the persistent tier

use crate::cache::{self, CacheStats, SweepHandle, SweepReport};
use crate::clock::{Clock, SystemClock};
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::mapper::{ContextMapper, ContextObject, MapperStats, Persona, SemanticSearch};
use crate::tiered::embedding::Embedder;
use crate::tiered::fast::{FastTier, FastTierStats};
use crate::tiered::persistent::{
    PersistentStats, PersistentTier, PruneOutcome, PrunePolicy, SaveMetadata, SearchHit,
    StoredMemory,
};
use crate::tiered::sqlite::SqliteMemory;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which tier answered a retrieve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemorySource {
    Fast,
    Persistent,
}

impl fmt::Display for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemorySource::Fast => write!(f, "fast"),
            MemorySource::Persistent => write!(f, "persistent"),
        }
    }
}

/// Outcome of a save
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReceipt {
    /// Id of the persistent record
    pub memory_id: String,

    /// TTL applied to the fast tier copy
    pub fast_ttl: Duration,
}

/// Statistics of every tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieredStats {
    pub fast: FastTierStats,
    pub persistent: PersistentStats,
    pub mapper: MapperStats,
    pub mapper_cache: CacheStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub fast_removed: usize,
    pub persistent_removed: usize,
    pub mapper_cache: SweepReport,
}

/// Tiered memory keyed by `(session, agent, scope)`.
///
/// Saves go to both tiers. Reads try the fast tier, fall back to the
/// persistent tier and copy a persistent hit back into the fast tier before
/// returning. Semantic search is served by the persistent tier only.
pub struct TieredMemory {
    fast: Arc<FastTier>,
    persistent: Arc<dyn PersistentTier>,
    mapper: ContextMapper,
    cache_sweep: Mutex<Option<SweepHandle>>,
    persistent_sweep: Mutex<Option<JoinHandle<()>>>,
    destroyed: AtomicBool,
}

impl TieredMemory {
    pub fn builder() -> TieredMemoryBuilder {
        TieredMemoryBuilder::new()
    }

    pub fn fast(&self) -> &Arc<FastTier> {
        &self.fast
    }

    pub fn persistent(&self) -> &Arc<dyn PersistentTier> {
        &self.persistent
    }

    pub fn mapper(&self) -> &ContextMapper {
        &self.mapper
    }

    /// Write to both tiers.
    ///
    /// The fast tier copy is written first and kept even when the persistent
    /// write fails; that failure is returned.
    pub async fn save(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        data: Value,
        metadata: SaveMetadata,
    ) -> Result<SaveReceipt> {
        let fast_ttl = self.fast_ttl(&metadata);
        self.fast
            .set(session_id, agent_id, scope, data.clone(), Some(fast_ttl))
            .await;

        let memory_id = self
            .persistent
            .save(session_id, agent_id, scope, &data, &metadata)
            .await
            .map_err(|e| {
                warn!(
                    "Persistent save failed for {}/{}/{}: {}",
                    session_id, agent_id, scope, e
                );
                e
            })?;

        debug!("Saved memory {} for {}/{}/{}", memory_id, session_id, agent_id, scope);
        Ok(SaveReceipt { memory_id, fast_ttl })
    }

    /// Latest value for the key, `None` when neither tier has it
    pub async fn retrieve(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
    ) -> Result<Option<Value>> {
        Ok(self
            .retrieve_with_source(session_id, agent_id, scope)
            .await?
            .map(|(value, _)| value))
    }

    pub async fn retrieve_with_source(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
    ) -> Result<Option<(Value, MemorySource)>> {
        if let Some(value) = self.fast.get(session_id, agent_id, scope).await {
            debug!("Fast tier hit for {}/{}/{}", session_id, agent_id, scope);
            return Ok(Some((value, MemorySource::Fast)));
        }

        let Some(stored) = self.persistent.retrieve(session_id, agent_id, scope).await? else {
            debug!("Memory miss for {}/{}/{}", session_id, agent_id, scope);
            return Ok(None);
        };

        // a save may have refreshed the fast tier while the persistent read ran
        let fast_ttl = self.fast_ttl(&stored.metadata);
        if let Some(newer) = self
            .fast
            .fill(session_id, agent_id, scope, stored.data.clone(), Some(fast_ttl))
            .await
        {
            return Ok(Some((newer, MemorySource::Fast)));
        }
        debug!(
            "Persistent hit for {}/{}/{}, fast tier repopulated",
            session_id, agent_id, scope
        );

        Ok(Some((stored.data, MemorySource::Persistent)))
    }

    /// Semantic search over the persistent tier
    pub async fn search(
        &self,
        query: &str,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.persistent
            .search(query, session_id, agent_id, scope, limit)
            .await
    }

    /// Records of one session and agent under a scope, newest first
    pub async fn get_by_scope(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<StoredMemory>> {
        self.persistent
            .get_by_scope(session_id, agent_id, scope, limit)
            .await
    }

    /// Records of one session and agent saved with `tag`, newest first
    pub async fn get_by_tag(
        &self,
        session_id: &str,
        agent_id: &str,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<StoredMemory>> {
        self.persistent
            .get_by_tag(session_id, agent_id, tag, limit)
            .await
    }

    /// Prune old, low-importance records and drop the fast copies of the
    /// affected keys, so the next read sees what the persistent tier kept
    pub async fn prune(
        &self,
        session_id: &str,
        agent_id: &str,
        policy: &PrunePolicy,
    ) -> Result<PruneOutcome> {
        let outcome = self.persistent.prune(session_id, agent_id, policy).await?;
        for scope in &outcome.scopes {
            self.fast.delete(session_id, agent_id, scope).await;
        }
        Ok(outcome)
    }

    /// Remove the key from both tiers, returning the persistent records removed
    pub async fn delete(&self, session_id: &str, agent_id: &str, scope: &str) -> Result<usize> {
        self.fast.delete(session_id, agent_id, scope).await;
        self.persistent.delete(session_id, agent_id, scope).await
    }

    /// Agent context for a query, served by the embedded context mapper
    pub async fn map_memory(
        &self,
        query: &str,
        current_context: Value,
        persona: &Persona,
        capabilities: &[String],
    ) -> Result<ContextObject> {
        self.mapper
            .map_memory(query, current_context, persona, capabilities)
            .await
    }

    pub async fn get_stats(&self) -> Result<TieredStats> {
        Ok(TieredStats {
            fast: self.fast.stats().await,
            persistent: self.persistent.stats().await?,
            mapper: self.mapper.stats(),
            mapper_cache: self.mapper.cache().stats().await,
        })
    }

    /// Purge expired entries from every tier
    pub async fn cleanup(&self) -> Result<CleanupReport> {
        let fast_removed = self.fast.cleanup().await;
        let persistent_removed = self.persistent.cleanup().await?;
        let mapper_cache = self.mapper.cache().cleanup_expired().await?;

        Ok(CleanupReport {
            fast_removed,
            persistent_removed,
            mapper_cache,
        })
    }

    /// Stop background sweeps and drop the fast tier. Safe to call repeatedly.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.cache_sweep.lock().await.take() {
            handle.stop();
        }
        if let Some(task) = self.persistent_sweep.lock().await.take() {
            task.abort();
        }
        self.fast.destroy().await;

        info!("Tiered memory destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn fast_ttl(&self, metadata: &SaveMetadata) -> Duration {
        metadata
            .fast_ttl()
            .filter(|ttl| !ttl.is_zero())
            .unwrap_or_else(|| self.fast.default_ttl())
    }

    async fn start_sweepers(&self, interval: Duration) -> Result<()> {
        self.fast.start_sweeper(interval).await;

        let handle = cache::start_auto_cleanup(self.mapper.cache(), interval)?;
        *self.cache_sweep.lock().await = Some(handle);

        let weak: Weak<dyn PersistentTier> = Arc::downgrade(&self.persistent);
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(persistent) = weak.upgrade() else {
                    break;
                };
                if let Err(e) = persistent.cleanup().await {
                    warn!("Persistent cleanup failed: {}", e);
                }
            }
        });
        *self.persistent_sweep.lock().await = Some(task);

        Ok(())
    }
}

impl Drop for TieredMemory {
    fn drop(&mut self) {
        if let Ok(mut task) = self.persistent_sweep.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// Builder for [`TieredMemory`].
///
/// Needs a persistent tier (or an embedder to open one from the config) and
/// a context mapper (or a search backend to build one).
pub struct TieredMemoryBuilder {
    config: MemoryConfig,
    clock: Option<Arc<dyn Clock>>,
    persistent: Option<Arc<dyn PersistentTier>>,
    embedder: Option<Arc<dyn Embedder>>,
    mapper: Option<ContextMapper>,
    search: Option<Arc<dyn SemanticSearch>>,
    mapper_scope: String,
}

impl Default for TieredMemoryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TieredMemoryBuilder {
    pub fn new() -> Self {
        Self {
            config: MemoryConfig::default(),
            clock: None,
            persistent: None,
            embedder: None,
            mapper: None,
            search: None,
            mapper_scope: "tiered".to_string(),
        }
    }

    pub fn config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn persistent(mut self, persistent: Arc<dyn PersistentTier>) -> Self {
        self.persistent = Some(persistent);
        self
    }

    /// Open a [`SqliteMemory`] from the config using this embedder
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn mapper(mut self, mapper: ContextMapper) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Build a context mapper over this search backend
    pub fn search(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Scope of the mapper built from [`search`](Self::search)
    pub fn mapper_scope(mut self, scope: impl Into<String>) -> Self {
        self.mapper_scope = scope.into();
        self
    }

    pub async fn build(self) -> Result<TieredMemory> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };

        let persistent: Arc<dyn PersistentTier> = match (self.persistent, self.embedder) {
            (Some(persistent), _) => persistent,
            (None, Some(embedder)) => {
                Arc::new(SqliteMemory::from_config(&self.config, embedder, clock.clone())?)
            }
            (None, None) => {
                return Err(MemoryError::MissingCollaborator(
                    "persistent tier or embedder",
                ))
            }
        };

        let mapper = match (self.mapper, self.search) {
            (Some(mapper), _) => mapper,
            (None, Some(search)) => ContextMapper::builder(self.mapper_scope)
                .config(self.config.clone())
                .search(search)
                .clock(clock.clone())
                .build()?,
            (None, None) => {
                return Err(MemoryError::MissingCollaborator(
                    "context mapper or semantic search backend",
                ))
            }
        };

        let fast = Arc::new(FastTier::new(
            self.config.fast_tier_ttl,
            self.config.fast_tier_max_entries,
            clock,
        ));

        let memory = TieredMemory {
            fast,
            persistent,
            mapper,
            cache_sweep: Mutex::new(None),
            persistent_sweep: Mutex::new(None),
            destroyed: AtomicBool::new(false),
        };

        if let Some(interval) = self.config.sweep_interval {
            memory.start_sweepers(interval).await?;
        }

        info!("Tiered memory ready");
        Ok(memory)
    }
}
