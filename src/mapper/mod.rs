//! # Context Mapper
//!
//! Builds the [`ContextObject`] an agent works with for a query: persona,
//! capabilities, the caller's current context and the memory fragments a
//! semantic search returns. Results are cached per `(query, scope)` in a
//! [`TwoLevelCache`], so repeating a query within the TTL window performs no
//! search at all.
//!
//! Search failures and timeouts are returned to the caller. An empty context
//! is never substituted for a failed search.

pub mod context;
pub mod search;

pub use context::{ContextObject, MemoryFragment, Persona};
pub use search::SemanticSearch;

use crate::cache::{DurableStore, FsStore, TwoLevelCache};
use crate::clock::{Clock, SystemClock};
use crate::config::{KeyPolicy, MemoryConfig};
use crate::error::{MemoryError, Result};
use crate::key;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Counters for mapper activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperStats {
    /// Requests answered from cache
    pub cache_hits: u64,

    /// Calls made to the search backend
    pub searches: u64,

    /// Search calls that failed or timed out
    pub search_failures: u64,
}

#[derive(Default)]
struct Counters {
    cache_hits: AtomicU64,
    searches: AtomicU64,
    search_failures: AtomicU64,
}

/// Cache-first context retrieval for one scope (agent type)
pub struct ContextMapper {
    scope: String,
    cache: Arc<TwoLevelCache>,
    search: Arc<dyn SemanticSearch>,
    search_timeout: Duration,
    key_policy: KeyPolicy,
    counters: Counters,
}

impl ContextMapper {
    pub fn builder(scope: impl Into<String>) -> ContextMapperBuilder {
        ContextMapperBuilder::new(scope)
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn cache(&self) -> &Arc<TwoLevelCache> {
        &self.cache
    }

    pub fn key_policy(&self) -> KeyPolicy {
        self.key_policy
    }

    /// Cache key for a request under the configured policy
    pub fn cache_key(
        &self,
        query: &str,
        current_context: &Value,
        persona: &Persona,
        capabilities: &[String],
    ) -> Result<String> {
        match self.key_policy {
            KeyPolicy::QueryAndScope => key::context_key(query, &self.scope),
            KeyPolicy::FullRequest => key::context_key_full(
                query,
                &self.scope,
                current_context,
                persona,
                capabilities,
            ),
        }
    }

    /// Map a query to an agent context, consulting the cache first.
    ///
    /// On a miss the search backend is called (bounded by the configured
    /// timeout), the context is built and cached with the default TTL.
    pub async fn map_memory(
        &self,
        query: &str,
        current_context: Value,
        persona: &Persona,
        capabilities: &[String],
    ) -> Result<ContextObject> {
        let cache_key = self.cache_key(query, &current_context, persona, capabilities)?;

        if let Some(cached) = self.cache.get(&cache_key).await? {
            match serde_json::from_value::<ContextObject>(cached) {
                Ok(context) => {
                    debug!("MemoryMapper cache hit for query {:?} in '{}'", query, self.scope);
                    self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(context);
                }
                Err(e) => {
                    warn!("Discarding cached context with unexpected shape for {:?}: {}", query, e);
                    if let Err(e) = self.cache.delete(&cache_key).await {
                        warn!("Failed to drop malformed cached context: {}", e);
                    }
                }
            }
        }

        let fragments = self.search(query).await?;
        let context = Self::build_context(
            fragments,
            current_context,
            persona.clone(),
            capabilities.to_vec(),
        );

        self.cache
            .set_default(&cache_key, serde_json::to_value(&context)?)
            .await?;
        debug!(
            "MemoryMapper stored context for query {:?} ({} fragments)",
            query,
            context.knowledge().len()
        );

        Ok(context)
    }

    /// Combine retrieved fragments with request state
    pub fn build_context(
        fragments: Vec<MemoryFragment>,
        current_context: Value,
        persona: Persona,
        capabilities: Vec<String>,
    ) -> ContextObject {
        ContextObject::new(fragments, current_context, persona, capabilities)
    }

    /// Drop the cached context for a request
    pub async fn invalidate(
        &self,
        query: &str,
        current_context: &Value,
        persona: &Persona,
        capabilities: &[String],
    ) -> Result<()> {
        let cache_key = self.cache_key(query, current_context, persona, capabilities)?;
        self.cache.delete(&cache_key).await
    }

    /// Drop every cached context of this scope
    pub async fn clear(&self) -> Result<()> {
        self.cache.clear().await
    }

    pub fn stats(&self) -> MapperStats {
        MapperStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            searches: self.counters.searches.load(Ordering::Relaxed),
            search_failures: self.counters.search_failures.load(Ordering::Relaxed),
        }
    }

    async fn search(&self, query: &str) -> Result<Vec<MemoryFragment>> {
        self.counters.searches.fetch_add(1, Ordering::Relaxed);

        let outcome = tokio::time::timeout(self.search_timeout, self.search.search(query)).await;
        let result = match outcome {
            Ok(Ok(fragments)) => Ok(fragments),
            Ok(Err(e)) if e.is_search_failure() => Err(e),
            Ok(Err(e)) => Err(MemoryError::SearchError(e.to_string())),
            Err(_) => Err(MemoryError::SearchTimeout {
                timeout_ms: u64::try_from(self.search_timeout.as_millis()).unwrap_or(u64::MAX),
                query: query.to_string(),
            }),
        };

        if let Err(e) = &result {
            warn!("Semantic search failed for {:?} in '{}': {}", query, self.scope, e);
            self.counters.search_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }
}

/// Builder for [`ContextMapper`]; the search backend is mandatory
pub struct ContextMapperBuilder {
    scope: String,
    config: MemoryConfig,
    search: Option<Arc<dyn SemanticSearch>>,
    cache: Option<Arc<TwoLevelCache>>,
    durable: Option<Arc<dyn DurableStore>>,
    clock: Option<Arc<dyn Clock>>,
}

impl ContextMapperBuilder {
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            config: MemoryConfig::default(),
            search: None,
            cache: None,
            durable: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: MemoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn search(mut self, search: Arc<dyn SemanticSearch>) -> Self {
        self.search = Some(search);
        self
    }

    /// Use an existing cache instead of creating one for the scope
    pub fn cache(mut self, cache: Arc<TwoLevelCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn durable_store(mut self, durable: Arc<dyn DurableStore>) -> Self {
        self.durable = Some(durable);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ContextMapper> {
        let search = self
            .search
            .ok_or(MemoryError::MissingCollaborator("semantic search backend"))?;

        if self.scope.trim().is_empty() {
            return Err(MemoryError::ConfigError(
                "context mapper scope must not be empty".to_string(),
            ));
        }
        self.config.validate()?;

        let cache = match self.cache {
            Some(cache) => cache,
            None => {
                let durable: Arc<dyn DurableStore> = match self.durable {
                    Some(durable) => durable,
                    None => Arc::new(FsStore::new(self.config.scope_dir(&self.scope))),
                };
                let clock: Arc<dyn Clock> = match self.clock {
                    Some(clock) => clock,
                    None => Arc::new(SystemClock),
                };
                Arc::new(TwoLevelCache::new(
                    self.scope.clone(),
                    durable,
                    clock,
                    self.config.clone(),
                ))
            }
        };

        info!(
            "Context mapper ready for scope '{}' (key policy {:?})",
            self.scope, self.config.key_policy
        );

        Ok(ContextMapper {
            scope: self.scope,
            cache,
            search,
            search_timeout: self.config.search_timeout,
            key_policy: self.config.key_policy,
            counters: Counters::default(),
        })
    }
}
