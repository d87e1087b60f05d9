//! Tiered Memory Demo
//!
//! Saves a memory, lets its fast tier copy expire and reads it back from the
//! persistent tier.
//!
//! Usage:
//!   cargo run --example tiered_memory_demo
//!
//! Environment variables (also read from `.env`):
//!   MEMORY_CACHE_DIR      - context cache root (default: .memory_cache)
//!   MEMORY_DATABASE_PATH  - SQLite file (default: in-memory database)
//!   RUST_LOG              - log filter (default: info)

use ouroboros_memory::tiered::{HashEmbedder, PersistentSearch, PersistentTier, SqliteMemory};
use ouroboros_memory::{
    MemoryConfig, MemorySource, Persona, SaveMetadata, SystemClock, TieredMemory,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("=== Tiered Memory Demo ===");

    let config = MemoryConfig::from_env()?;
    let clock = Arc::new(SystemClock);
    let persistent: Arc<dyn PersistentTier> = Arc::new(SqliteMemory::from_config(
        &config,
        Arc::new(HashEmbedder::default()),
        clock.clone(),
    )?);

    let memory = TieredMemory::builder()
        .config(config)
        .clock(clock)
        .persistent(persistent.clone())
        .search(Arc::new(PersistentSearch::new(persistent, "demo-session", "indii", "tour")))
        .mapper_scope("indii")
        .build()
        .await?;

    info!("\n--- Save ---");
    let receipt = memory
        .save(
            "demo-session",
            "indii",
            "tour/berlin",
            json!("Soundcheck in Berlin starts at 4pm, doors open at 7pm"),
            SaveMetadata::new()
                .with_ttl(Duration::from_millis(100))
                .with_tags(vec!["schedule".to_string()]),
        )
        .await?;
    info!("Saved memory {} (fast tier ttl {:?})", receipt.memory_id, receipt.fast_ttl);

    info!("\n--- Retrieve ---");
    report(&memory, "immediately").await?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    report(&memory, "after fast tier expiry").await?;
    report(&memory, "after repopulation").await?;

    info!("\n--- Search ---");
    for hit in memory.search("when is soundcheck", "demo-session", "indii", "tour", 3).await? {
        info!("  {:.3} [{}] {}", hit.score, hit.scope, hit.chunk);
    }

    info!("\n--- Context ---");
    let persona = Persona::new("indii").with_role("tour manager");
    let context = memory
        .map_memory("soundcheck time", json!({"city": "Berlin"}), &persona, &["scheduling".to_string()])
        .await?;
    info!("Context carries {} fragments", context.knowledge().len());

    let stats = memory.get_stats().await?;
    info!("\n--- Stats ---\n{}", serde_json::to_string_pretty(&stats)?);

    memory.destroy().await;
    Ok(())
}

async fn report(memory: &TieredMemory, label: &str) -> anyhow::Result<()> {
    match memory.retrieve_with_source("demo-session", "indii", "tour/berlin").await? {
        Some((value, MemorySource::Fast)) => info!("✓ {}: fast tier -> {}", label, value),
        Some((value, MemorySource::Persistent)) => info!("✓ {}: persistent tier -> {}", label, value),
        None => info!("✗ {}: not found", label),
    }
    Ok(())
}
