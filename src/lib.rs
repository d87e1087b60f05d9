//! # Ouroboros Memory (ouroboros-memory)
//!
//! Tiered memory and caching for agent runtimes.
//!
//! ## Features
//!
//! - Two-level cache: in-process map over one JSON file per key, lazy TTL expiry
//! - Context mapper: cache-first semantic search producing agent contexts
//! - Tiered memory: short-TTL fast tier over a SQLite persistent tier with
//!   embedding search
//! - Injectable clock, durable store and search backend
//! - Optional background sweep of expired entries
//!
//! ## Two-Level Cache
//!
//! A `set` is visible to the next `get` in the same process before the
//! durable write has finished. Expired entries read as misses and are removed
//! from both levels.
//!
//! ```no_run
//! use ouroboros_memory::{MemoryConfig, TwoLevelCache};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cache = TwoLevelCache::for_scope(MemoryConfig::default(), "apiCache");
//!
//!     cache.set("k1", json!({"data": "v"}), Some(Duration::from_secs(1))).await?;
//!     assert_eq!(cache.get("k1").await?, Some(json!({"data": "v"})));
//!
//!     tokio::time::sleep(Duration::from_millis(1100)).await;
//!     assert_eq!(cache.get("k1").await?, None);
//!     Ok(())
//! }
//! ```
//!
//! ## Context Mapper
//!
//! ```no_run
//! use ouroboros_memory::mapper::{ContextMapper, MemoryFragment, Persona, SemanticSearch};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct VectorStore;
//!
//! #[async_trait::async_trait]
//! impl SemanticSearch for VectorStore {
//!     async fn search(&self, _query: &str) -> ouroboros_memory::Result<Vec<MemoryFragment>> {
//!         Ok(vec![MemoryFragment::new("mem1", "Relevant memory 1")])
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mapper = ContextMapper::builder("testAgent")
//!         .search(Arc::new(VectorStore))
//!         .build()?;
//!
//!     let persona = Persona::new("testPersona");
//!     let context = mapper.map_memory("q1", json!({}), &persona, &[]).await?;
//!     println!("{} fragments", context.knowledge().len());
//!     Ok(())
//! }
//! ```
//!
//! See [`tiered`] for the tiered memory coordinator.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod key;
pub mod mapper;
pub mod tiered;

// Re-export main types for convenience
pub use cache::{
    CacheEntry, CacheStats, CacheTier, DurableStore, FsStore, SweepHandle, SweepReport,
    TwoLevelCache,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KeyPolicy, MemoryConfig, MemoryConfigBuilder};
pub use error::{MemoryError, Result};
pub use key::MemoryKeyBuilder;
pub use mapper::{ContextMapper, ContextMapperBuilder, ContextObject, MapperStats, MemoryFragment, Persona, SemanticSearch};
pub use tiered::{
    FastTier, HashEmbedder, MemorySource, PersistentSearch, PersistentTier, PrunePolicy,
    SaveMetadata, SqliteMemory, TieredMemory, TieredStats,
};
