//! # Tiered Memory
//!
//! Memory keyed by `(session, agent, scope)` held in two tiers:
//!
//! - [`FastTier`]: in-process, short TTL, LRU bounded
//! - [`PersistentTier`]: durable source of truth with semantic search,
//!   implemented by [`SqliteMemory`]
//!
//! [`TieredMemory`] writes through to both and reads fast-first. A value
//! whose fast copy expired is served from the persistent tier and copied
//! back into the fast tier.
//!
//! ## Example
//!
//! ```no_run
//! use ouroboros_memory::tiered::{HashEmbedder, SaveMetadata, TieredMemory};
//! use ouroboros_memory::mapper::{MemoryFragment, SemanticSearch};
//! use ouroboros_memory::MemoryConfig;
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! struct NoSearch;
//!
//! #[async_trait::async_trait]
//! impl SemanticSearch for NoSearch {
//!     async fn search(&self, _query: &str) -> ouroboros_memory::Result<Vec<MemoryFragment>> {
//!         Ok(Vec::new())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let memory = TieredMemory::builder()
//!         .config(MemoryConfig::default())
//!         .embedder(Arc::new(HashEmbedder::default()))
//!         .search(Arc::new(NoSearch))
//!         .build()
//!         .await?;
//!
//!     let metadata = SaveMetadata::new().with_ttl(Duration::from_millis(100));
//!     memory.save("s1", "a1", "scope1", json!({"x": 1}), metadata).await?;
//!
//!     assert_eq!(memory.retrieve("s1", "a1", "scope1").await?, Some(json!({"x": 1})));
//!     memory.destroy().await;
//!     Ok(())
//! }
//! ```

pub mod chunker;
pub mod coordinator;
pub mod embedding;
pub mod fast;
pub mod persistent;
pub mod sqlite;

pub use chunker::TextSplitter;
pub use coordinator::{
    CleanupReport, MemorySource, SaveReceipt, TieredMemory, TieredMemoryBuilder, TieredStats,
};
pub use embedding::{cosine_similarity, Embedder, HashEmbedder, HASH_EMBEDDING_DIM};
pub use fast::{FastTier, FastTierStats};
pub use persistent::{
    PersistentSearch, PersistentStats, PersistentTier, PruneOutcome, PrunePolicy, SaveMetadata,
    SearchHit, StoredMemory,
};
pub use sqlite::SqliteMemory;
