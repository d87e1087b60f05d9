//! SQLite-backed persistent tier

use crate::clock::Clock;
use crate::config::MemoryConfig;
use crate::error::{MemoryError, Result};
use crate::tiered::chunker::TextSplitter;
use crate::tiered::embedding::{cosine_similarity, Embedder};
use crate::tiered::persistent::{
    PersistentStats, PersistentTier, PruneOutcome, PrunePolicy, SaveMetadata, SearchHit,
    StoredMemory,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

const SCHEMA: &str = include_str!("./migrations/001_memory_tables.sql");

const RECORD_COLUMNS: &str =
    "id, session_id, agent_id, scope, content, metadata, created_at, expires_at";

/// Importance of a record whose metadata carries none
const DEFAULT_IMPORTANCE: f64 = 0.5;

/// `scope` matches itself and its `/` children; an empty scope matches all
fn scope_filter(column: &str, param: &str) -> String {
    format!(
        "({p} = '' OR {c} = {p} OR substr({c}, 1, length({p}) + 1) = {p} || '/')",
        c = column,
        p = param
    )
}

fn scope_prefix(scope: &str) -> &str {
    scope.trim_end_matches('/')
}

#[derive(Default)]
struct Counters {
    reads: AtomicU64,
    writes: AtomicU64,
    searches: AtomicU64,
}

/// Persistent memory in a SQLite database.
///
/// Every save appends one record plus one embedded row per text chunk.
/// Records never expire unless their metadata carries `expires_at`.
pub struct SqliteMemory {
    conn: Mutex<Connection>,
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl SqliteMemory {
    pub fn open(
        path: impl AsRef<Path>,
        embedder: Arc<dyn Embedder>,
        splitter: TextSplitter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        info!("Opening persistent memory at {}", path.display());
        Self::with_connection(Connection::open(path)?, embedder, splitter, clock)
    }

    pub fn open_in_memory(
        embedder: Arc<dyn Embedder>,
        splitter: TextSplitter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        debug!("Opening in-memory persistent memory");
        Self::with_connection(Connection::open_in_memory()?, embedder, splitter, clock)
    }

    /// Open the database named by `database_path`, or an in-memory one
    pub fn from_config(
        config: &MemoryConfig,
        embedder: Arc<dyn Embedder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap);
        match &config.database_path {
            Some(path) => Self::open(path, embedder, splitter, clock),
            None => Self::open_in_memory(embedder, splitter, clock),
        }
    }

    fn with_connection(
        conn: Connection,
        embedder: Arc<dyn Embedder>,
        splitter: TextSplitter,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            embedder,
            splitter,
            clock,
            counters: Counters::default(),
        })
    }
}

#[async_trait]
impl PersistentTier for SqliteMemory {
    async fn save(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        data: &Value,
        metadata: &SaveMetadata,
    ) -> Result<String> {
        let mut chunks = Vec::new();
        for chunk in self.splitter.split_text(&record_text(data)?) {
            let embedding = self.embedder.embed(&chunk).await?;
            chunks.push((chunk, encode_embedding(&embedding)));
        }

        let record = NewRecord {
            id: Uuid::new_v4().to_string(),
            session_id,
            agent_id,
            scope,
            content: serde_json::to_string(data)?,
            metadata: serde_json::to_string(metadata)?,
            created_at: self.clock.now_millis(),
            expires_at: metadata.expires_at.map(|at| at.timestamp_millis()),
        };

        let mut conn = self.conn.lock().await;
        insert_record(&mut conn, &record, &chunks)?;
        drop(conn);

        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Persisted memory {} for {}/{}/{} ({} chunks)",
            record.id,
            session_id,
            agent_id,
            scope,
            chunks.len()
        );
        Ok(record.id)
    }

    async fn retrieve(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
    ) -> Result<Option<StoredMemory>> {
        let now = self.clock.now_millis();
        let conn = self.conn.lock().await;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {} FROM memory_records
                     WHERE session_id = ?1 AND agent_id = ?2 AND scope = ?3
                       AND (expires_at IS NULL OR expires_at > ?4)
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT 1",
                    RECORD_COLUMNS
                ),
                params![session_id, agent_id, scope, now],
                RawRecord::from_row,
            )
            .optional()?;
        drop(conn);

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        raw.map(RawRecord::into_memory).transpose()
    }

    async fn search(
        &self,
        query: &str,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>> {
        self.counters.searches.fetch_add(1, Ordering::Relaxed);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embedder.embed(query).await?;
        let now = self.clock.now_millis();

        let conn = self.conn.lock().await;
        let candidates = load_chunks(&conn, session_id, agent_id, scope, now)?;
        drop(conn);

        let mut best: HashMap<String, SearchHit> = HashMap::new();
        for candidate in candidates {
            let score = cosine_similarity(&query_embedding, &decode_embedding(&candidate.embedding));
            let replace = best
                .get(&candidate.memory_id)
                .map_or(true, |hit| score > hit.score);
            if replace {
                let data = serde_json::from_str(&candidate.data)?;
                best.insert(
                    candidate.memory_id.clone(),
                    SearchHit {
                        memory_id: candidate.memory_id,
                        session_id: candidate.session_id,
                        agent_id: candidate.agent_id,
                        scope: candidate.scope,
                        chunk: candidate.chunk,
                        score,
                        data,
                    },
                );
            }
        }

        let mut hits: Vec<SearchHit> = best.into_values().collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(limit);

        debug!("Search {:?} in {}/{} returned {} hits", query, session_id, scope, hits.len());
        Ok(hits)
    }

    async fn get_by_scope(
        &self,
        session_id: &str,
        agent_id: &str,
        scope: &str,
        limit: usize,
    ) -> Result<Vec<StoredMemory>> {
        let now = self.clock.now_millis();
        let conn = self.conn.lock().await;
        let raws = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_records
                 WHERE session_id = ?1 AND agent_id = ?2 AND {}
                   AND (expires_at IS NULL OR expires_at > ?4)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?5",
                RECORD_COLUMNS,
                scope_filter("scope", "?3")
            ))?;
            let rows = stmt.query_map(
                params![session_id, agent_id, scope_prefix(scope), now, sql_limit(limit)],
                RawRecord::from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        drop(conn);

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        raws.into_iter().map(RawRecord::into_memory).collect()
    }

    async fn get_by_tag(
        &self,
        session_id: &str,
        agent_id: &str,
        tag: &str,
        limit: usize,
    ) -> Result<Vec<StoredMemory>> {
        let now = self.clock.now_millis();
        let conn = self.conn.lock().await;
        let raws = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM memory_records
                 WHERE session_id = ?1 AND agent_id = ?2
                   AND EXISTS (SELECT 1 FROM json_each(metadata, '$.tags') WHERE value = ?3)
                   AND (expires_at IS NULL OR expires_at > ?4)
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT ?5",
                RECORD_COLUMNS
            ))?;
            let rows = stmt.query_map(
                params![session_id, agent_id, tag, now, sql_limit(limit)],
                RawRecord::from_row,
            )?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        drop(conn);

        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        raws.into_iter().map(RawRecord::into_memory).collect()
    }

    async fn prune(
        &self,
        session_id: &str,
        agent_id: &str,
        policy: &PrunePolicy,
    ) -> Result<PruneOutcome> {
        let cutoff = self
            .clock
            .now_millis()
            .saturating_sub(crate::clock::duration_millis(policy.older_than));

        let mut conn = self.conn.lock().await;
        let outcome = prune_records(&mut conn, session_id, agent_id, policy.min_importance, cutoff)?;
        drop(conn);

        if outcome.removed > 0 {
            info!(
                "Pruned {} low-importance memories for {}/{}",
                outcome.removed, session_id, agent_id
            );
        }
        Ok(outcome)
    }

    async fn stats(&self) -> Result<PersistentStats> {
        let conn = self.conn.lock().await;
        let records: i64 = conn.query_row("SELECT COUNT(*) FROM memory_records", [], |row| row.get(0))?;
        let chunks: i64 = conn.query_row("SELECT COUNT(*) FROM memory_chunks", [], |row| row.get(0))?;
        drop(conn);

        Ok(PersistentStats {
            records: records as u64,
            chunks: chunks as u64,
            reads: self.counters.reads.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            searches: self.counters.searches.load(Ordering::Relaxed),
        })
    }

    async fn cleanup(&self) -> Result<usize> {
        let now = self.clock.now_millis();
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM memory_chunks WHERE memory_id IN
             (SELECT id FROM memory_records WHERE expires_at IS NOT NULL AND expires_at <= ?1)",
            params![now],
        )?;
        let removed = tx.execute(
            "DELETE FROM memory_records WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![now],
        )?;
        tx.commit()?;

        if removed > 0 {
            info!("Removed {} expired persistent memories", removed);
        }
        Ok(removed)
    }

    async fn delete(&self, session_id: &str, agent_id: &str, scope: &str) -> Result<usize> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM memory_chunks WHERE memory_id IN
             (SELECT id FROM memory_records
              WHERE session_id = ?1 AND agent_id = ?2 AND scope = ?3)",
            params![session_id, agent_id, scope],
        )?;
        let removed = tx.execute(
            "DELETE FROM memory_records WHERE session_id = ?1 AND agent_id = ?2 AND scope = ?3",
            params![session_id, agent_id, scope],
        )?;
        tx.commit()?;
        Ok(removed)
    }
}

struct NewRecord<'a> {
    id: String,
    session_id: &'a str,
    agent_id: &'a str,
    scope: &'a str,
    content: String,
    metadata: String,
    created_at: i64,
    expires_at: Option<i64>,
}

fn insert_record(
    conn: &mut Connection,
    record: &NewRecord<'_>,
    chunks: &[(String, Vec<u8>)],
) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO memory_records
         (id, session_id, agent_id, scope, content, metadata, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.session_id,
            record.agent_id,
            record.scope,
            record.content,
            record.metadata,
            record.created_at,
            record.expires_at,
        ],
    )?;
    for (index, (chunk, embedding)) in chunks.iter().enumerate() {
        tx.execute(
            "INSERT INTO memory_chunks (memory_id, chunk_index, content, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.id, index as i64, chunk, embedding],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn prune_records(
    conn: &mut Connection,
    session_id: &str,
    agent_id: &str,
    min_importance: f64,
    cutoff: i64,
) -> Result<PruneOutcome> {
    let tx = conn.transaction()?;
    let victims = {
        let mut stmt = tx.prepare(
            "SELECT id, scope FROM memory_records
             WHERE session_id = ?1 AND agent_id = ?2 AND created_at <= ?3
               AND COALESCE(json_extract(metadata, '$.importance'), ?4) < ?5",
        )?;
        let rows = stmt.query_map(
            params![session_id, agent_id, cutoff, DEFAULT_IMPORTANCE, min_importance],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()?
    };

    for (id, _) in &victims {
        tx.execute("DELETE FROM memory_chunks WHERE memory_id = ?1", params![id])?;
        tx.execute("DELETE FROM memory_records WHERE id = ?1", params![id])?;
    }
    tx.commit()?;

    let scopes: BTreeSet<String> = victims.iter().map(|(_, scope)| scope.clone()).collect();
    Ok(PruneOutcome {
        removed: victims.len(),
        scopes: scopes.into_iter().collect(),
    })
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

struct ChunkCandidate {
    memory_id: String,
    chunk: String,
    embedding: Vec<u8>,
    session_id: String,
    agent_id: String,
    scope: String,
    data: String,
}

fn load_chunks(
    conn: &Connection,
    session_id: &str,
    agent_id: &str,
    scope: &str,
    now: i64,
) -> Result<Vec<ChunkCandidate>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT c.memory_id, c.content, c.embedding, r.session_id, r.agent_id, r.scope, r.content
         FROM memory_chunks c
         JOIN memory_records r ON r.id = c.memory_id
         WHERE r.session_id = ?1 AND r.agent_id = ?2 AND {}
           AND (r.expires_at IS NULL OR r.expires_at > ?4)",
        scope_filter("r.scope", "?3")
    ))?;
    let rows = stmt.query_map(params![session_id, agent_id, scope_prefix(scope), now], |row| {
        Ok(ChunkCandidate {
            memory_id: row.get(0)?,
            chunk: row.get(1)?,
            embedding: row.get(2)?,
            session_id: row.get(3)?,
            agent_id: row.get(4)?,
            scope: row.get(5)?,
            data: row.get(6)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

struct RawRecord {
    id: String,
    session_id: String,
    agent_id: String,
    scope: String,
    content: String,
    metadata: String,
    created_at: i64,
    expires_at: Option<i64>,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            agent_id: row.get(2)?,
            scope: row.get(3)?,
            content: row.get(4)?,
            metadata: row.get(5)?,
            created_at: row.get(6)?,
            expires_at: row.get(7)?,
        })
    }

    fn into_memory(self) -> Result<StoredMemory> {
        Ok(StoredMemory {
            data: serde_json::from_str(&self.content)?,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: timestamp(self.created_at)?,
            expires_at: self.expires_at.map(timestamp).transpose()?,
            id: self.id,
            session_id: self.session_id,
            agent_id: self.agent_id,
            scope: self.scope,
        })
    }
}

fn timestamp(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| MemoryError::Other(format!("Invalid timestamp: {}", millis)))
}

/// Text that gets chunked and embedded for a record
fn record_text(data: &Value) -> Result<String> {
    match data {
        Value::String(text) => Ok(text.clone()),
        other => Ok(serde_json::to_string(other)?),
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}
