//! Durable SQLite storage for cache entries and aggregate statistics.
//!
//! The store owns entry lifecycle exclusively: rows are created by atomic
//! insert-or-reinforce upserts, touched by hit-path reinforcement, and
//! removed only by an explicit maintenance sweep. Two concurrent misses for
//! the same new hash resolve to a single logical row because the upsert is
//! one conditional statement, not a select followed by an insert.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use recall_embeddings::Embedding;

use crate::entry::{GenerationEntry, RetrievalEntry};
use crate::error::{CacheError, Result};

const SCHEMA_SQL: &str = r"
CREATE TABLE IF NOT EXISTS retrieval_cache (
    query_hash TEXT PRIMARY KEY,
    query_text TEXT NOT NULL,
    query_embedding BLOB NOT NULL,
    results TEXT NOT NULL,
    usage_count INTEGER NOT NULL DEFAULT 1,
    success_rate REAL NOT NULL DEFAULT 1.0,
    avg_response_time REAL NOT NULL DEFAULT 0.0,
    created_at INTEGER NOT NULL,
    last_used INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_retrieval_last_used
    ON retrieval_cache(last_used);

CREATE TABLE IF NOT EXISTS generation_cache (
    prompt_hash TEXT PRIMARY KEY,
    prompt_text TEXT NOT NULL,
    prompt_embedding BLOB NOT NULL,
    context_hash TEXT NOT NULL DEFAULT '',
    generated_artifact TEXT NOT NULL,
    temperature REAL NOT NULL,
    quality_score REAL NOT NULL DEFAULT 0.0,
    usage_count INTEGER NOT NULL DEFAULT 1,
    user_feedback REAL NOT NULL DEFAULT 0.0,
    created_at INTEGER NOT NULL,
    last_used INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_generation_last_used
    ON generation_cache(last_used);

CREATE TABLE IF NOT EXISTS cache_stats (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    hits INTEGER NOT NULL DEFAULT 0,
    misses INTEGER NOT NULL DEFAULT 0,
    total_requests INTEGER NOT NULL DEFAULT 0,
    avg_response_time REAL NOT NULL DEFAULT 0.0
);
";

/// New retrieval row to insert or reinforce.
#[derive(Debug)]
pub struct NewRetrieval<'a> {
    pub query_hash: &'a str,
    pub query_text: &'a str,
    pub query_embedding: &'a [f32],
    pub results_json: &'a str,
    /// Upstream search time for this sample, in seconds.
    pub response_time: f64,
}

/// New generation row to insert or reinforce.
#[derive(Debug)]
pub struct NewGeneration<'a> {
    pub prompt_hash: &'a str,
    pub prompt_text: &'a str,
    pub prompt_embedding: &'a [f32],
    pub context_hash: &'a str,
    pub generated_artifact: &'a str,
    pub temperature: f64,
    pub quality_score: f64,
}

/// Aggregate hit/miss counters, persisted across restarts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    /// Running mean of lookup latencies, in seconds.
    pub avg_response_time: f64,
}

/// Derived per-table summary for `stats()` reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSummary {
    /// Total rows in the table.
    pub entries: u64,

    /// Mean usage count.
    pub avg_usage: f64,

    /// Mean success rate (retrieval) or quality score (generation).
    pub avg_score: f64,

    /// Rows touched within the recency window (24 hours).
    pub recent: u64,
}

/// Durable row storage for the two cache entry families.
///
/// A single connection guarded by a mutex serializes writers; every mutation
/// is a single statement, so concurrent callers cannot observe a torn
/// insert-or-reinforce.
pub struct CacheStore {
    conn: Mutex<Connection>,
}

impl CacheStore {
    /// Open or create the store at the given SQLite path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        Self::initialize(conn)
    }

    /// Open an in-memory store. Used by tests and ephemeral deployments.
    pub fn in_memory() -> Result<Self> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO cache_stats (id, hits, misses, total_requests, avg_response_time)
             VALUES (1, 0, 0, 0, 0.0)",
            [],
        )?;
        debug!("cache store initialized");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Exact lookup of a retrieval entry by query hash.
    pub fn get_retrieval(&self, hash: &str) -> Result<Option<RetrievalEntry>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT query_hash, query_text, query_embedding, results,
                        usage_count, success_rate, avg_response_time, created_at, last_used
                 FROM retrieval_cache
                 WHERE query_hash = ?1",
                params![hash],
                read_retrieval_raw,
            )
            .optional()?;

        row.map(RawRetrieval::decode).transpose()
    }

    /// Exact lookup of a generation entry by prompt hash.
    pub fn get_generation(&self, hash: &str) -> Result<Option<GenerationEntry>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT prompt_hash, prompt_text, prompt_embedding, context_hash,
                        generated_artifact, temperature, quality_score, usage_count,
                        user_feedback, created_at, last_used
                 FROM generation_cache
                 WHERE prompt_hash = ?1",
                params![hash],
                read_generation_raw,
            )
            .optional()?;

        row.map(RawGeneration::decode).transpose()
    }

    /// Insert a fresh retrieval row, or reinforce the existing one.
    ///
    /// On reinforcement the usage count increments, the running mean
    /// response time folds in the new sample, the payload is refreshed (so
    /// a corrupt payload heals on the next write), and `last_used` moves
    /// forward. Returns the row's usage count after the upsert.
    pub fn upsert_retrieval(&self, new: &NewRetrieval<'_>) -> Result<i64> {
        let now = now_epoch();
        let blob = encode_embedding(new.query_embedding);
        let conn = self.conn();
        let usage_count = conn.query_row(
            "INSERT INTO retrieval_cache (
                query_hash, query_text, query_embedding, results,
                usage_count, success_rate, avg_response_time, created_at, last_used
             ) VALUES (?1, ?2, ?3, ?4, 1, 1.0, ?5, ?6, ?6)
             ON CONFLICT(query_hash) DO UPDATE SET
                usage_count = retrieval_cache.usage_count + 1,
                avg_response_time = (retrieval_cache.avg_response_time * retrieval_cache.usage_count
                                     + excluded.avg_response_time)
                                    / (retrieval_cache.usage_count + 1),
                results = excluded.results,
                query_embedding = excluded.query_embedding,
                last_used = excluded.last_used
             RETURNING usage_count",
            params![
                new.query_hash,
                new.query_text,
                blob,
                new.results_json,
                new.response_time,
                now
            ],
            |row| row.get(0),
        )?;
        Ok(usage_count)
    }

    /// Insert a fresh generation row, or reinforce the existing one.
    ///
    /// Reinforcement increments usage, raises the quality score via max
    /// (it never decreases), refreshes the embedding blob (so a corrupt
    /// vector heals on the next write), and moves `last_used` forward. The
    /// cached artifact itself is kept, since `quality_score` describes the
    /// stored artifact. Returns the row's usage count after the upsert.
    pub fn upsert_generation(&self, new: &NewGeneration<'_>) -> Result<i64> {
        let now = now_epoch();
        let blob = encode_embedding(new.prompt_embedding);
        let conn = self.conn();
        let usage_count = conn.query_row(
            "INSERT INTO generation_cache (
                prompt_hash, prompt_text, prompt_embedding, context_hash,
                generated_artifact, temperature, quality_score, usage_count,
                user_feedback, created_at, last_used
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, 0.0, ?8, ?8)
             ON CONFLICT(prompt_hash) DO UPDATE SET
                usage_count = generation_cache.usage_count + 1,
                quality_score = MAX(generation_cache.quality_score, excluded.quality_score),
                prompt_embedding = excluded.prompt_embedding,
                last_used = excluded.last_used
             RETURNING usage_count",
            params![
                new.prompt_hash,
                new.prompt_text,
                blob,
                new.context_hash,
                new.generated_artifact,
                new.temperature,
                new.quality_score,
                now
            ],
            |row| row.get(0),
        )?;
        Ok(usage_count)
    }

    /// Hit-path reinforcement: bump usage and recency, touch nothing else.
    pub fn reinforce_retrieval(&self, hash: &str) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE retrieval_cache
             SET usage_count = usage_count + 1, last_used = ?2
             WHERE query_hash = ?1",
            params![hash, now_epoch()],
        )?;
        Ok(updated > 0)
    }

    /// Hit-path reinforcement for a generation entry.
    pub fn reinforce_generation(&self, hash: &str) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE generation_cache
             SET usage_count = usage_count + 1, last_used = ?2
             WHERE prompt_hash = ?1",
            params![hash, now_epoch()],
        )?;
        Ok(updated > 0)
    }

    /// Bounded candidate pool for semantic matching over retrieval entries.
    ///
    /// Only the most-reinforced entries are considered, which bounds
    /// per-request cost at the expense of recall over rarely-used entries.
    /// Rows with undecodable vectors are skipped, not fatal.
    pub fn scan_retrieval_candidates(&self, limit: usize) -> Result<Vec<RetrievalEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT query_hash, query_text, query_embedding, results,
                    usage_count, success_rate, avg_response_time, created_at, last_used
             FROM retrieval_cache
             ORDER BY usage_count DESC, success_rate DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![usize_to_i64(limit, "limit")?], read_retrieval_raw)?;

        let mut entries = Vec::new();
        for row in rows {
            match row?.decode() {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("skipping retrieval candidate with corrupt row: {err}"),
            }
        }
        Ok(entries)
    }

    /// Bounded candidate pool for semantic matching over generation entries.
    pub fn scan_generation_candidates(&self, limit: usize) -> Result<Vec<GenerationEntry>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT prompt_hash, prompt_text, prompt_embedding, context_hash,
                    generated_artifact, temperature, quality_score, usage_count,
                    user_feedback, created_at, last_used
             FROM generation_cache
             ORDER BY usage_count DESC, quality_score DESC
             LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![usize_to_i64(limit, "limit")?], read_generation_raw)?;

        let mut entries = Vec::new();
        for row in rows {
            match row?.decode() {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!("skipping generation candidate with corrupt row: {err}"),
            }
        }
        Ok(entries)
    }

    /// Blend new user feedback into a generation entry:
    /// `user_feedback = (user_feedback + score) / 2`, favoring recent
    /// feedback over history. Returns whether the row existed.
    pub fn add_feedback(&self, hash: &str, score: f64) -> Result<bool> {
        let updated = self.conn().execute(
            "UPDATE generation_cache
             SET user_feedback = (user_feedback + ?2) / 2.0
             WHERE prompt_hash = ?1",
            params![hash, score],
        )?;
        Ok(updated > 0)
    }

    /// Maintenance sweep over retrieval entries: delete rows last used
    /// before the cutoff whose usage never reached `usage_below`.
    pub fn delete_retrieval_older_than(&self, cutoff: i64, usage_below: i64) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM retrieval_cache
             WHERE last_used < ?1 AND usage_count < ?2",
            params![cutoff, usage_below],
        )?;
        Ok(deleted)
    }

    /// Maintenance sweep over generation entries: conjunctive policy, so a
    /// row survives if it is either heavily reused or demonstrably high
    /// quality regardless of age.
    pub fn delete_generation_older_than(
        &self,
        cutoff: i64,
        usage_below: i64,
        quality_below: f64,
    ) -> Result<usize> {
        let deleted = self.conn().execute(
            "DELETE FROM generation_cache
             WHERE last_used < ?1 AND usage_count < ?2 AND quality_score < ?3",
            params![cutoff, usage_below, quality_below],
        )?;
        Ok(deleted)
    }

    /// Derived summary of the retrieval table.
    pub fn retrieval_summary(&self, recent_cutoff: i64) -> Result<TableSummary> {
        self.table_summary(
            "SELECT COUNT(*), COALESCE(AVG(usage_count), 0.0), COALESCE(AVG(success_rate), 0.0)
             FROM retrieval_cache",
            "SELECT COUNT(*) FROM retrieval_cache WHERE last_used > ?1",
            recent_cutoff,
        )
    }

    /// Derived summary of the generation table.
    pub fn generation_summary(&self, recent_cutoff: i64) -> Result<TableSummary> {
        self.table_summary(
            "SELECT COUNT(*), COALESCE(AVG(usage_count), 0.0), COALESCE(AVG(quality_score), 0.0)
             FROM generation_cache",
            "SELECT COUNT(*) FROM generation_cache WHERE last_used > ?1",
            recent_cutoff,
        )
    }

    fn table_summary(
        &self,
        totals_sql: &str,
        recent_sql: &str,
        recent_cutoff: i64,
    ) -> Result<TableSummary> {
        let conn = self.conn();
        let (entries, avg_usage, avg_score): (i64, f64, f64) =
            conn.query_row(totals_sql, [], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
        let recent: i64 = conn.query_row(recent_sql, params![recent_cutoff], |row| row.get(0))?;

        Ok(TableSummary {
            entries: i64_to_u64(entries, "entries")?,
            avg_usage,
            avg_score,
            recent: i64_to_u64(recent, "recent")?,
        })
    }

    /// Load the persisted aggregate counters.
    pub fn load_stats(&self) -> Result<StatsSnapshot> {
        let conn = self.conn();
        let (hits, misses, total_requests, avg_response_time): (i64, i64, i64, f64) = conn
            .query_row(
                "SELECT hits, misses, total_requests, avg_response_time
                 FROM cache_stats WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        Ok(StatsSnapshot {
            hits: i64_to_u64(hits, "hits")?,
            misses: i64_to_u64(misses, "misses")?,
            total_requests: i64_to_u64(total_requests, "total_requests")?,
            avg_response_time,
        })
    }

    /// Persist the aggregate counters.
    pub fn save_stats(&self, stats: &StatsSnapshot) -> Result<()> {
        self.conn().execute(
            "UPDATE cache_stats
             SET hits = ?1, misses = ?2, total_requests = ?3, avg_response_time = ?4
             WHERE id = 1",
            params![
                u64_to_i64(stats.hits, "hits")?,
                u64_to_i64(stats.misses, "misses")?,
                u64_to_i64(stats.total_requests, "total_requests")?,
                stats.avg_response_time
            ],
        )?;
        Ok(())
    }
}

struct RawRetrieval {
    entry: RetrievalEntry,
    embedding_blob: Vec<u8>,
}

impl RawRetrieval {
    fn decode(mut self) -> Result<RetrievalEntry> {
        self.entry.query_embedding = decode_embedding(&self.embedding_blob)?;
        Ok(self.entry)
    }
}

fn read_retrieval_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRetrieval> {
    Ok(RawRetrieval {
        entry: RetrievalEntry {
            query_hash: row.get(0)?,
            query_text: row.get(1)?,
            query_embedding: Vec::new(),
            results_json: row.get(3)?,
            usage_count: row.get(4)?,
            success_rate: row.get(5)?,
            avg_response_time: row.get(6)?,
            created_at: row.get(7)?,
            last_used: row.get(8)?,
        },
        embedding_blob: row.get(2)?,
    })
}

struct RawGeneration {
    entry: GenerationEntry,
    embedding_blob: Vec<u8>,
}

impl RawGeneration {
    fn decode(mut self) -> Result<GenerationEntry> {
        self.entry.prompt_embedding = decode_embedding(&self.embedding_blob)?;
        Ok(self.entry)
    }
}

fn read_generation_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawGeneration> {
    Ok(RawGeneration {
        entry: GenerationEntry {
            prompt_hash: row.get(0)?,
            prompt_text: row.get(1)?,
            prompt_embedding: Vec::new(),
            context_hash: row.get(3)?,
            generated_artifact: row.get(4)?,
            temperature: row.get(5)?,
            quality_score: row.get(6)?,
            usage_count: row.get(7)?,
            user_feedback: row.get(8)?,
            created_at: row.get(9)?,
            last_used: row.get(10)?,
        },
        embedding_blob: row.get(2)?,
    })
}

/// Encode an embedding as a little-endian f32 blob.
pub(crate) fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(std::mem::size_of_val(vector));
    for &value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode a little-endian f32 blob back into an embedding.
pub(crate) fn decode_embedding(blob: &[u8]) -> Result<Embedding> {
    if blob.len() % 4 != 0 {
        return Err(CacheError::CorruptEntry(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }

    let mut out = Vec::with_capacity(blob.len() / 4);
    for chunk in blob.chunks_exact(4) {
        let value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        if !value.is_finite() {
            return Err(CacheError::CorruptEntry(
                "embedding contains non-finite values".to_string(),
            ));
        }
        out.push(value);
    }
    Ok(out)
}

pub(crate) fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn usize_to_i64(value: usize, field: &'static str) -> Result<i64> {
    i64::try_from(value).map_err(|_| CacheError::Overflow(field))
}

fn u64_to_i64(value: u64, field: &'static str) -> Result<i64> {
    i64::try_from(value).map_err(|_| CacheError::Overflow(field))
}

fn i64_to_u64(value: i64, field: &'static str) -> Result<u64> {
    u64::try_from(value).map_err(|_| CacheError::Overflow(field))
}
