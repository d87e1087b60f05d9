//! Integration tests for the context mapper

use async_trait::async_trait;
use ouroboros_memory::mapper::{ContextMapper, MemoryFragment, Persona, SemanticSearch};
use ouroboros_memory::{KeyPolicy, ManualClock, MemoryConfig, MemoryError, Result};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Vector store double returning one fixed fragment
#[derive(Default)]
struct MockVectorStore {
    calls: AtomicUsize,
}

impl MockVectorStore {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SemanticSearch for MockVectorStore {
    async fn search(&self, _query: &str) -> Result<Vec<MemoryFragment>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![MemoryFragment::new("mem1", "Relevant memory 1")])
    }
}

struct SlowSearch;

#[async_trait]
impl SemanticSearch for SlowSearch {
    async fn search(&self, _query: &str) -> Result<Vec<MemoryFragment>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Vec::new())
    }
}

fn persona() -> Persona {
    Persona::new("testPersona")
        .with_role("tour manager")
        .with_traits(vec!["organized".to_string()])
}

fn capabilities() -> Vec<String> {
    vec!["scheduling".to_string(), "booking".to_string()]
}

#[tokio::test]
async fn test_repeat_query_hits_cache() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MockVectorStore::default());
    let mapper = ContextMapper::builder("testAgent")
        .config(MemoryConfig::builder().cache_root(tmp.path()).build())
        .search(store.clone())
        .build()
        .unwrap();

    let first = mapper
        .map_memory("q1", json!({}), &persona(), &capabilities())
        .await
        .unwrap();
    let second = mapper
        .map_memory("q1", json!({}), &persona(), &capabilities())
        .await
        .unwrap();

    assert_eq!(store.calls(), 1);
    assert_eq!(first, second);
    assert_eq!(first.knowledge(), &[MemoryFragment::new("mem1", "Relevant memory 1")]);
    assert_eq!(first.persona().name, "testPersona");
    assert!(first.has_capability("booking"));
}

#[tokio::test]
async fn test_expired_context_triggers_new_search() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(0));
    let store = Arc::new(MockVectorStore::default());
    let mapper = ContextMapper::builder("testAgent")
        .config(MemoryConfig::builder().cache_root(tmp.path()).build())
        .search(store.clone())
        .clock(clock.clone())
        .build()
        .unwrap();

    mapper.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();
    clock.advance(Duration::from_secs(299));
    mapper.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();
    assert_eq!(store.calls(), 1);

    clock.advance(Duration::from_secs(2));
    mapper.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();
    assert_eq!(store.calls(), 2);
}

#[tokio::test]
async fn test_cached_context_survives_restart() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MockVectorStore::default());
    let config = MemoryConfig::builder().cache_root(tmp.path()).build();

    let first = ContextMapper::builder("testAgent")
        .config(config.clone())
        .search(store.clone())
        .build()
        .unwrap();
    first.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();
    drop(first);

    let restarted = ContextMapper::builder("testAgent")
        .config(config)
        .search(store.clone())
        .build()
        .unwrap();
    restarted.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();

    assert_eq!(store.calls(), 1);
    assert!(tmp.path().join("testAgent").is_dir());
}

#[tokio::test]
async fn test_default_key_ignores_request_context() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MockVectorStore::default());
    let mapper = ContextMapper::builder("testAgent")
        .config(MemoryConfig::builder().cache_root(tmp.path()).build())
        .search(store.clone())
        .build()
        .unwrap();

    mapper
        .map_memory("q1", json!({"venue": "A"}), &persona(), &[])
        .await
        .unwrap();
    let reused = mapper
        .map_memory("q1", json!({"venue": "B"}), &persona(), &[])
        .await
        .unwrap();

    assert_eq!(store.calls(), 1);
    assert_eq!(reused.current_context(), &json!({"venue": "A"}));
}

#[tokio::test]
async fn test_full_request_key_keeps_contexts_apart() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MockVectorStore::default());
    let mapper = ContextMapper::builder("testAgent")
        .config(
            MemoryConfig::builder()
                .cache_root(tmp.path())
                .key_policy(KeyPolicy::FullRequest)
                .build(),
        )
        .search(store.clone())
        .build()
        .unwrap();

    mapper
        .map_memory("q1", json!({"venue": "A"}), &persona(), &[])
        .await
        .unwrap();
    let fresh = mapper
        .map_memory("q1", json!({"venue": "B"}), &persona(), &[])
        .await
        .unwrap();

    assert_eq!(store.calls(), 2);
    assert_eq!(fresh.current_context(), &json!({"venue": "B"}));
}

#[tokio::test]
async fn test_search_timeout_is_reported() {
    let tmp = TempDir::new().unwrap();
    let mapper = ContextMapper::builder("testAgent")
        .config(
            MemoryConfig::builder()
                .cache_root(tmp.path())
                .search_timeout(Duration::from_millis(50))
                .build(),
        )
        .search(Arc::new(SlowSearch))
        .build()
        .unwrap();

    let err = mapper
        .map_memory("slow", json!({}), &persona(), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::SearchTimeout { timeout_ms: 50, .. }));
    assert!(mapper.cache().is_empty().await);
}

#[tokio::test]
async fn test_invalidate_forces_new_search() {
    let tmp = TempDir::new().unwrap();
    let store = Arc::new(MockVectorStore::default());
    let mapper = ContextMapper::builder("testAgent")
        .config(MemoryConfig::builder().cache_root(tmp.path()).build())
        .search(store.clone())
        .build()
        .unwrap();

    mapper.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();
    mapper.invalidate("q1", &json!({}), &persona(), &[]).await.unwrap();
    mapper.invalidate("q1", &json!({}), &persona(), &[]).await.unwrap();
    mapper.map_memory("q1", json!({}), &persona(), &[]).await.unwrap();

    assert_eq!(store.calls(), 2);
}
