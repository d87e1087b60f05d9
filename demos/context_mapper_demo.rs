//! Context Mapper Demo
//!
//! Maps the same query twice and shows that the second call is served from
//! the cache without a second search.
//!
//! Usage:
//!   cargo run --example context_mapper_demo

use async_trait::async_trait;
use ouroboros_memory::mapper::{ContextMapper, MemoryFragment, Persona, SemanticSearch};
use ouroboros_memory::MemoryConfig;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Stand-in vector store with a fixed answer
#[derive(Default)]
struct DemoVectorStore {
    calls: AtomicUsize,
}

#[async_trait]
impl SemanticSearch for DemoVectorStore {
    async fn search(&self, query: &str) -> ouroboros_memory::Result<Vec<MemoryFragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        info!("Searching vector store for {:?}", query);
        Ok(vec![
            MemoryFragment::new("mem1", "Relevant memory 1").with_score(0.92),
            MemoryFragment::new("mem2", "Relevant memory 2").with_score(0.71),
        ])
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Context Mapper Demo ===");

    let store = Arc::new(DemoVectorStore::default());
    let mapper = ContextMapper::builder("demoAgent")
        .config(MemoryConfig::from_env()?)
        .search(store.clone())
        .build()?;

    let persona = Persona::new("demoPersona")
        .with_description("Keeps track of tour logistics")
        .with_tone("concise");
    let capabilities = vec!["scheduling".to_string()];

    mapper.clear().await?;
    let first = mapper.map_memory("q1", json!({}), &persona, &capabilities).await?;
    let second = mapper.map_memory("q1", json!({}), &persona, &capabilities).await?;

    info!("Fragments: {}", first.knowledge().len());
    info!("Same context on both calls: {}", first == second);
    info!("Search calls: {}", store.calls.load(Ordering::SeqCst));
    info!("Mapper stats: {:?}", mapper.stats());
    info!("Cache stats: {}", mapper.cache().stats().await);

    Ok(())
}
