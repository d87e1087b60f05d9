//! # Two-Level Cache
//!
//! A TTL cache that keeps hot values in an in-process map and persists every
//! write to a durable store (by default a directory of JSON files), so cached
//! values survive a restart.
//!
//! ## Semantics
//!
//! - **Memory first**: reads consult the in-process map, then the durable store;
//!   a durable hit repopulates the map.
//! - **Lazy expiry**: there is no background sweep unless one is started with
//!   [`start_auto_cleanup`]; a reader that finds an expired entry removes it from
//!   both tiers and reports a miss.
//! - **Best-effort persistence**: a failed durable write is logged and swallowed;
//!   the in-memory write has already happened, so the current process still
//!   sees the value.
//! - **Corruption is a miss**: an unreadable blob is discarded, never surfaced
//!   as an error.
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_memory::cache::TwoLevelCache;
//! use ouroboros_memory::MemoryConfig;
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> ouroboros_memory::Result<()> {
//! let config = MemoryConfig::builder().cache_root(".api_cache").build();
//! let cache = TwoLevelCache::for_scope(config, "api");
//!
//! cache.set("k1", json!({"data": "v"}), Some(Duration::from_secs(1))).await?;
//! assert_eq!(cache.get("k1").await?, Some(json!({"data": "v"})));
//! # Ok(())
//! # }
//! ```

pub mod durable;
pub mod entry;
pub mod store;
pub mod types;

pub use durable::{DurableStore, FsStore};
pub use entry::{CacheEntry, StoredBlob};
pub use store::{start_auto_cleanup, SweepHandle, SweepReport, TwoLevelCache};
pub use types::{CacheStats, CacheTier};
