//! Persistent tier contract and the types it exchanges

use crate::error::{MemoryError, Result};
use crate::mapper::{MemoryFragment, SemanticSearch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

/// Metadata accompanying a save.
///
/// `ttl` (milliseconds) only bounds the fast tier copy. The persistent copy
/// lives until deleted, or until `expires_at` when that is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub importance: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Caller-defined fields, kept verbatim
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SaveMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_importance(mut self, importance: f64) -> Self {
        self.importance = Some(importance);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Fast tier TTL requested by the caller
    pub fn fast_ttl(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_millis)
    }
}

/// A record read back from the persistent tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMemory {
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    pub scope: String,
    pub data: Value,
    pub metadata: SaveMetadata,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// One ranked search result: the best matching chunk of a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub memory_id: String,
    pub session_id: String,
    pub agent_id: String,
    pub scope: String,
    pub chunk: String,
    pub score: f32,
    pub data: Value,
}

/// Which records [`PersistentTier::prune`] removes: those created at least
/// `older_than` ago whose importance is below `min_importance`. A record
/// saved without an importance counts as 0.5.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrunePolicy {
    pub min_importance: f64,
    pub older_than: Duration,
}

impl Default for PrunePolicy {
    fn default() -> Self {
        Self {
            min_importance: 0.3,
            older_than: Duration::from_secs(30 * 24 * 3600),
        }
    }
}

/// Result of a prune
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub removed: usize,

    /// Distinct scopes that lost at least one record
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentStats {
    pub records: u64,
    pub chunks: u64,
    pub reads: u64,
    pub writes: u64,
    pub searches: u64,
}

/// Durable source of truth behind the fast tier
#[async_trait]
pub trait PersistentTier: Send + Sync {
    /// Store a record, returning its id
    async fn save(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        data: &Value,
        metadata: &SaveMetadata,
    ) -> Result<String>;

    /// Newest live record stored under the exact key
    async fn retrieve(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
    ) -> Result<Option<StoredMemory>>;

    /// Semantic search over the records of a session/agent under a scope.
    ///
    /// A scope covers itself and its `/` children, so `"project"` matches
    /// `"project/tour"` but not `"projectX"`. An empty scope covers everything.
    async fn search(
        &self,
        query: &str,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>>;

    /// Live records of one session and agent under a scope, newest first
    async fn get_by_scope(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<StoredMemory>>;

    /// Live records of one session and agent carrying `tag`, newest first
    async fn get_by_tag(
        &self,
        session_id: &str,
        agent_id: &str,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<StoredMemory>>;

    /// Remove old, low-importance records of one session and agent
    async fn prune(
        &self,
        session_id: &str,
        agent_id: &str,
        policy: &PrunePolicy,
    ) -> Result<PruneOutcome>;

    async fn stats(&self) -> Result<PersistentStats>;

    /// Remove expired records, returning how many were removed
    async fn cleanup(&self) -> Result<usize>;

    /// Remove every record stored under the key, returning how many were removed
    async fn delete(&self, session_id: &str, agent_id: &str, scope: &str) -> Result<usize>;
}

/// Exposes a persistent tier as a [`SemanticSearch`] backend for one
/// session, agent and scope prefix.
pub struct PersistentSearch {
    tier: Arc<dyn PersistentTier>,
    session_id: String,
    agent_id: String,
    scope: String,
    limit: usize,
}

impl PersistentSearch {
    pub fn new(
        tier: Arc<dyn PersistentTier>,
        session_id: impl Into<String>,
        agent_id: impl Into<String>,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            tier,
            session_id: session_id.into(),
            agent_id: agent_id.into(),
            scope: scope.into(),
            limit: 5,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

#[async_trait]
impl SemanticSearch for PersistentSearch {
    async fn search(&self, query: &str) -> Result<Vec<MemoryFragment>> {
        let hits = self
            .tier
            .search(query, &self.session_id, &self.agent_id, &self.scope, self.limit)
            .await
            .map_err(|e| MemoryError::SearchError(e.to_string()))?;

        Ok(hits
            .into_iter()
            .map(|hit| MemoryFragment::new(hit.memory_id, hit.chunk).with_score(f64::from(hit.score)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_metadata_ttl_in_millis() {
        let metadata = SaveMetadata::new().with_ttl(Duration::from_millis(100));
        assert_eq!(metadata.ttl, Some(100));
        assert_eq!(metadata.fast_ttl(), Some(Duration::from_millis(100)));
        assert_eq!(SaveMetadata::default().fast_ttl(), None);
    }

    #[test]
    fn test_metadata_keeps_extra_fields() {
        let metadata: SaveMetadata =
            serde_json::from_value(json!({"ttl": 100, "tags": ["a"], "source": "chat"})).unwrap();

        assert_eq!(metadata.ttl, Some(100));
        assert_eq!(metadata.tags, vec!["a".to_string()]);
        assert_eq!(metadata.extra.get("source"), Some(&json!("chat")));

        let back = serde_json::to_value(&metadata).unwrap();
        assert_eq!(back["source"], json!("chat"));
    }

    #[test]
    fn test_huge_ttl_is_clamped() {
        let metadata = SaveMetadata::new().with_ttl(Duration::MAX);
        assert_eq!(metadata.ttl, Some(u64::MAX));
        assert_eq!(metadata.fast_ttl(), Some(Duration::from_millis(u64::MAX)));
    }

    #[test]
    fn test_default_prune_policy() {
        let policy = PrunePolicy::default();
        assert_eq!(policy.min_importance, 0.3);
        assert_eq!(policy.older_than, Duration::from_secs(30 * 24 * 3600));
    }
}
