//! Semantic search backend contract

use crate::error::Result;
use crate::mapper::context::MemoryFragment;
use async_trait::async_trait;
use std::sync::Arc;

/// Ranked retrieval of memory fragments for a free-text query.
///
/// Implementations report backend failures as errors; an empty result means
/// "nothing relevant", never "the backend is down".
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<MemoryFragment>>;
}

#[async_trait]
impl<T: SemanticSearch + ?Sized> SemanticSearch for Arc<T> {
    async fn search(&self, query: &str) -> Result<Vec<MemoryFragment>> {
        (**self).search(query).await
    }
}
