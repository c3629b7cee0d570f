//! Durable local record of chunks, their embeddings and per-chunk sync state.
//!
//! A chunk, its embedding and its sync record share one row in `chunks`, so a
//! reader can never observe one without the others. Every write runs in an
//! IMMEDIATE transaction, which serializes concurrent writers for the same
//! fingerprint (ingestion upserts against sync status transitions).

pub mod codec;

use crate::db::{migrate, Db};
use crate::error::{RagsyncError, Result};
use crate::ingest::{Chunk, Metadata};
use codec::{decode_embedding, encode_embedding, now};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Remote synchronization state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Pending,
    Synced,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Pending => "pending",
            SyncStatus::Synced => "synced",
            SyncStatus::Failed => "failed",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(SyncStatus::Pending),
            "synced" => Some(SyncStatus::Synced),
            "failed" => Some(SyncStatus::Failed),
            _ => None,
        }
    }
}

/// Per-chunk sync bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    pub status: SyncStatus,
    pub retry_count: u32,
    /// Bumped whenever the stored content changes; guards `mark_synced`.
    pub revision: i64,
    pub last_error: Option<String>,
    pub synced_at: Option<String>,
}

/// A chunk together with its embedding and sync record.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    pub sync: SyncRecord,
}

/// Result of a single upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New fingerprint, stored as Pending
    Created,
    /// Content changed, reset to Pending
    Updated,
    /// Identical content, sync state left untouched
    Unchanged,
}

/// Ingestion status of a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Ingested,
    Failed,
    Removed,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Pending => "pending",
            SourceStatus::Ingested => "ingested",
            SourceStatus::Failed => "failed",
            SourceStatus::Removed => "removed",
        }
    }

    fn parse(value: &str) -> SourceStatus {
        match value {
            "ingested" => SourceStatus::Ingested,
            "failed" => SourceStatus::Failed,
            "removed" => SourceStatus::Removed,
            _ => SourceStatus::Pending,
        }
    }
}

/// Latest known state of one source file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRecord {
    pub source_id: String,
    pub name: String,
    pub fingerprint: String,
    pub modified_at: Option<String>,
    pub status: SourceStatus,
    pub chunk_count: usize,
    pub failed_chunks: usize,
    pub last_error: Option<String>,
    pub metadata: Metadata,
}

/// A fingerprint retired locally that may still be present remotely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone {
    pub fingerprint: String,
    pub source_id: String,
}

/// Counts by status, as reported by `get_stats`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub pending: usize,
    pub synced: usize,
    pub failed: usize,
    pub quarantined: usize,
    pub sources: usize,
    pub sources_failed: usize,
    pub tombstones: usize,
}

const CHUNK_COLUMNS: &str = "fingerprint, source_id, source_fingerprint, chunk_index, chunk_text, \
     char_start, char_end, metadata_json, embedding, sync_status, retry_count, revision, \
     last_error, synced_at";

/// Row as read from SQLite, before the embedding is decoded.
struct RawChunkRow {
    chunk: Chunk,
    blob: Vec<u8>,
    status: String,
    retry_count: u32,
    revision: i64,
    last_error: Option<String>,
    synced_at: Option<String>,
}

fn read_chunk_row(row: &Row<'_>) -> rusqlite::Result<RawChunkRow> {
    let metadata_json: String = row.get(7)?;
    let metadata = serde_json::from_str::<Metadata>(&metadata_json).unwrap_or_default();
    Ok(RawChunkRow {
        chunk: Chunk {
            fingerprint: row.get(0)?,
            source_id: row.get(1)?,
            source_fingerprint: row.get(2)?,
            index: row.get::<_, i64>(3)? as usize,
            text: row.get(4)?,
            char_start: row.get::<_, i64>(5)? as usize,
            char_end: row.get::<_, i64>(6)? as usize,
            metadata,
        },
        blob: row.get(8)?,
        status: row.get(9)?,
        retry_count: row.get(10)?,
        revision: row.get(11)?,
        last_error: row.get(12)?,
        synced_at: row.get(13)?,
    })
}

impl RawChunkRow {
    fn decode(self, dimensions: usize) -> std::result::Result<StoredChunk, RagsyncError> {
        let fingerprint = self.chunk.fingerprint.clone();
        let embedding = decode_embedding(&self.blob, dimensions).ok_or_else(|| {
            RagsyncError::StorageCorruption {
                fingerprint: fingerprint.clone(),
                reason: format!(
                    "embedding blob of {} bytes does not decode to {} dimensions",
                    self.blob.len(),
                    dimensions
                ),
            }
        })?;
        let status = SyncStatus::parse(&self.status).ok_or_else(|| RagsyncError::StorageCorruption {
            fingerprint,
            reason: format!("unknown sync status {:?}", self.status),
        })?;
        Ok(StoredChunk {
            chunk: self.chunk,
            embedding,
            sync: SyncRecord {
                status,
                retry_count: self.retry_count,
                revision: self.revision,
                last_error: self.last_error,
                synced_at: self.synced_at,
            },
        })
    }
}

/// Decode rows, flagging undecodable ones as quarantined so they leave the read path.
fn decode_or_quarantine(
    conn: &Connection,
    rows: Vec<RawChunkRow>,
    dimensions: usize,
) -> Result<(Vec<StoredChunk>, usize)> {
    let mut decoded = Vec::with_capacity(rows.len());
    let mut quarantined = 0;
    for raw in rows {
        match raw.decode(dimensions) {
            Ok(stored) => decoded.push(stored),
            Err(e) => {
                let fingerprint = match &e {
                    RagsyncError::StorageCorruption { fingerprint, .. } => fingerprint.clone(),
                    _ => continue,
                };
                log::error!("store: quarantining {}: {}", fingerprint, e);
                conn.execute(
                    "UPDATE chunks SET quarantined = 1, last_error = ?1, updated_at = ?2 WHERE fingerprint = ?3",
                    params![e.to_string(), now(), fingerprint],
                )?;
                quarantined += 1;
            }
        }
    }
    Ok((decoded, quarantined))
}

/// Handle to the local store. Cheap to clone; clones share the write generation.
#[derive(Debug, Clone)]
pub struct LocalStore {
    db: Db,
    dimensions: usize,
    generation: Arc<AtomicU64>,
}

impl LocalStore {
    /// Open (creating if needed) the store at `path` and apply migrations.
    pub async fn open<P: AsRef<Path>>(path: P, dimensions: usize) -> Result<Self> {
        if dimensions == 0 {
            return Err(RagsyncError::Config("embedding dimensions must be greater than 0".into()));
        }
        let db = Db::new(path);
        db.with_connection(migrate::run_migrations).await?;
        Ok(Self {
            db,
            dimensions,
            generation: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Monotonic counter bumped after every write that changes retrievable content.
    pub fn write_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn bump_generation(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Store a chunk and its embedding as one unit.
    pub async fn upsert(&self, chunk: Chunk, embedding: Vec<f32>) -> Result<UpsertOutcome> {
        let mut outcomes = self.upsert_many(vec![(chunk, embedding)]).await?;
        outcomes
            .pop()
            .ok_or_else(|| RagsyncError::InvalidInput("upsert produced no outcome".into()))
    }

    /// Store several chunk/embedding pairs in one transaction.
    ///
    /// New fingerprints are created Pending. Existing fingerprints whose text,
    /// embedding and metadata are unchanged keep their sync record; anything else
    /// is rewritten, reset to Pending and gets a new revision.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if any vector has the wrong length; nothing is written.
    pub async fn upsert_many(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<Vec<UpsertOutcome>> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for (_, embedding) in &items {
            if embedding.len() != self.dimensions {
                return Err(RagsyncError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: embedding.len(),
                });
            }
        }

        let dimensions = self.dimensions;
        let outcomes = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut outcomes = Vec::with_capacity(items.len());
                for (chunk, embedding) in items {
                    let blob = encode_embedding(&embedding);
                    let metadata_json = serde_json::to_string(&chunk.metadata)?;
                    let existing: Option<(String, Vec<u8>, String)> = tx
                        .query_row(
                            "SELECT chunk_text, embedding, metadata_json FROM chunks WHERE fingerprint = ?1",
                            params![chunk.fingerprint],
                            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                        )
                        .optional()?;
                    let timestamp = now();

                    let outcome = match existing {
                        None => {
                            tx.execute(
                                "INSERT INTO chunks (fingerprint, source_id, source_fingerprint, chunk_index,
                                    chunk_text, char_start, char_end, metadata_json, embedding, dimensions,
                                    sync_status, retry_count, revision, created_at, updated_at)
                                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 'pending', 0, 1, ?11, ?11)",
                                params![
                                    chunk.fingerprint,
                                    chunk.source_id,
                                    chunk.source_fingerprint,
                                    chunk.index as i64,
                                    chunk.text,
                                    chunk.char_start as i64,
                                    chunk.char_end as i64,
                                    metadata_json,
                                    blob,
                                    dimensions as i64,
                                    timestamp,
                                ],
                            )?;
                            UpsertOutcome::Created
                        }
                        Some((text, stored_blob, stored_metadata))
                            if text == chunk.text && stored_blob == blob && stored_metadata == metadata_json =>
                        {
                            UpsertOutcome::Unchanged
                        }
                        Some(_) => {
                            tx.execute(
                                "UPDATE chunks SET source_id = ?2, source_fingerprint = ?3, chunk_index = ?4,
                                    chunk_text = ?5, char_start = ?6, char_end = ?7, metadata_json = ?8,
                                    embedding = ?9, dimensions = ?10, sync_status = 'pending', retry_count = 0,
                                    revision = revision + 1, last_error = NULL, quarantined = 0,
                                    synced_at = NULL, updated_at = ?11
                                 WHERE fingerprint = ?1",
                                params![
                                    chunk.fingerprint,
                                    chunk.source_id,
                                    chunk.source_fingerprint,
                                    chunk.index as i64,
                                    chunk.text,
                                    chunk.char_start as i64,
                                    chunk.char_end as i64,
                                    metadata_json,
                                    blob,
                                    dimensions as i64,
                                    timestamp,
                                ],
                            )?;
                            UpsertOutcome::Updated
                        }
                    };

                    if outcome != UpsertOutcome::Unchanged {
                        // A re-created fingerprint must not be deleted remotely by a stale tombstone
                        tx.execute("DELETE FROM tombstones WHERE fingerprint = ?1", params![chunk.fingerprint])?;
                    }
                    outcomes.push(outcome);
                }
                tx.commit()?;
                Ok::<Vec<UpsertOutcome>, RagsyncError>(outcomes)
            })
            .await?;

        if outcomes.iter().any(|o| *o != UpsertOutcome::Unchanged) {
            self.bump_generation();
        }
        Ok(outcomes)
    }

    /// Return the subset of `fingerprints` already stored (quarantined rows excluded).
    pub async fn existing_fingerprints(&self, fingerprints: Vec<String>) -> Result<HashSet<String>> {
        if fingerprints.is_empty() {
            return Ok(HashSet::new());
        }
        self.db
            .with_connection(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT 1 FROM chunks WHERE fingerprint = ?1 AND quarantined = 0")?;
                let mut found = HashSet::new();
                for fingerprint in fingerprints {
                    if stmt.exists(params![fingerprint])? {
                        found.insert(fingerprint);
                    }
                }
                Ok::<HashSet<String>, RagsyncError>(found)
            })
            .await
    }

    /// Fetch one record by fingerprint.
    pub async fn get(&self, fingerprint: &str) -> Result<Option<StoredChunk>> {
        let fingerprint = fingerprint.to_string();
        let dimensions = self.dimensions;
        self.db
            .with_connection(move |conn| {
                let raw = conn
                    .query_row(
                        &format!(
                            "SELECT {} FROM chunks WHERE fingerprint = ?1 AND quarantined = 0",
                            CHUNK_COLUMNS
                        ),
                        params![fingerprint],
                        read_chunk_row,
                    )
                    .optional()?;
                match raw {
                    Some(raw) => Ok(Some(raw.decode(dimensions)?)),
                    None => Ok(None),
                }
            })
            .await
    }

    /// Pending, non-quarantined records in insertion order, at most `limit`.
    pub async fn list_pending(&self, limit: usize) -> Result<Vec<StoredChunk>> {
        let dimensions = self.dimensions;
        let (pending, quarantined) = self
            .db
            .with_connection(move |conn| {
                let rows = {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM chunks WHERE sync_status = 'pending' AND quarantined = 0
                         ORDER BY created_at, source_id, chunk_index LIMIT ?1",
                        CHUNK_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map(params![limit as i64], read_chunk_row)?
                        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                    rows
                };
                decode_or_quarantine(conn, rows, dimensions)
            })
            .await?;
        if quarantined > 0 {
            self.bump_generation();
        }
        Ok(pending)
    }

    /// Mark a record Synced if it is still at the uploaded `revision`.
    ///
    /// Returns false when the content changed after the upload started; the
    /// record then stays Pending and is uploaded again next cycle.
    pub async fn mark_synced(&self, fingerprint: &str, revision: i64) -> Result<bool> {
        let fingerprint = fingerprint.to_string();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let timestamp = now();
                let updated = tx.execute(
                    "UPDATE chunks SET sync_status = 'synced', last_error = NULL, synced_at = ?1, updated_at = ?1
                     WHERE fingerprint = ?2 AND revision = ?3 AND sync_status = 'pending'",
                    params![timestamp, fingerprint, revision],
                )?;
                tx.commit()?;
                Ok::<bool, RagsyncError>(updated == 1)
            })
            .await
    }

    /// Count one failed upload attempt against a Pending record.
    ///
    /// The record moves to Failed once its retry counter reaches `max_attempts`.
    /// Returns the resulting status, or `None` if the record changed revision or
    /// left Pending in the meantime.
    pub async fn record_failure(
        &self,
        fingerprint: &str,
        revision: i64,
        error: &str,
        max_attempts: u32,
    ) -> Result<Option<SyncStatus>> {
        let fingerprint = fingerprint.to_string();
        let error = error.to_string();
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let timestamp = now();
                let updated = tx.execute(
                    "UPDATE chunks SET retry_count = retry_count + 1, last_error = ?1, updated_at = ?2,
                        sync_status = CASE WHEN retry_count + 1 >= ?3 THEN 'failed' ELSE 'pending' END
                     WHERE fingerprint = ?4 AND revision = ?5 AND sync_status = 'pending'",
                    params![error, timestamp, max_attempts, fingerprint, revision],
                )?;
                let status = if updated == 1 {
                    let status: String = tx.query_row(
                        "SELECT sync_status FROM chunks WHERE fingerprint = ?1",
                        params![fingerprint],
                        |row| row.get(0),
                    )?;
                    SyncStatus::parse(&status)
                } else {
                    None
                };
                tx.commit()?;
                Ok::<Option<SyncStatus>, RagsyncError>(status)
            })
            .await
    }

    /// Move a record straight to Failed, bypassing the retry counter.
    pub async fn mark_failed(&self, fingerprint: &str, error: &str) -> Result<()> {
        let fingerprint = fingerprint.to_string();
        let error = error.to_string();
        self.db
            .with_connection(move |conn| {
                let updated = conn.execute(
                    "UPDATE chunks SET sync_status = 'failed', last_error = ?1, updated_at = ?2
                     WHERE fingerprint = ?3",
                    params![error, now(), fingerprint],
                )?;
                if updated == 0 {
                    return Err(RagsyncError::ChunkNotFound(fingerprint));
                }
                Ok(())
            })
            .await
    }

    /// Return Failed records to Pending with a zeroed retry counter.
    ///
    /// With `Some(fingerprint)` only that record is reset. Returns the number reset.
    pub async fn reset_failed(&self, fingerprint: Option<String>) -> Result<usize> {
        self.db
            .with_connection(move |conn| {
                let timestamp = now();
                let count = match fingerprint {
                    Some(fp) => conn.execute(
                        "UPDATE chunks SET sync_status = 'pending', retry_count = 0, updated_at = ?1
                         WHERE sync_status = 'failed' AND fingerprint = ?2",
                        params![timestamp, fp],
                    )?,
                    None => conn.execute(
                        "UPDATE chunks SET sync_status = 'pending', retry_count = 0, updated_at = ?1
                         WHERE sync_status = 'failed'",
                        params![timestamp],
                    )?,
                };
                Ok::<usize, RagsyncError>(count)
            })
            .await
    }

    /// Every retrievable record. Rows that no longer decode are quarantined and skipped.
    pub async fn all(&self) -> Result<Vec<StoredChunk>> {
        let dimensions = self.dimensions;
        let (records, quarantined) = self
            .db
            .with_connection(move |conn| {
                let rows = {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {} FROM chunks WHERE quarantined = 0 ORDER BY fingerprint",
                        CHUNK_COLUMNS
                    ))?;
                    let rows = stmt
                        .query_map([], read_chunk_row)?
                        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                    rows
                };
                decode_or_quarantine(conn, rows, dimensions)
            })
            .await?;
        if quarantined > 0 {
            self.bump_generation();
        }
        Ok(records)
    }

    /// Counts by sync status plus source and tombstone totals.
    pub async fn stats(&self) -> Result<StoreStats> {
        self.db
            .with_connection(|conn| {
                let mut stats = StoreStats::default();
                {
                    let mut stmt = conn.prepare(
                        "SELECT sync_status, quarantined, COUNT(*) FROM chunks GROUP BY sync_status, quarantined",
                    )?;
                    let mut rows = stmt.query([])?;
                    while let Some(row) = rows.next()? {
                        let status: String = row.get(0)?;
                        let quarantined: bool = row.get(1)?;
                        let count = row.get::<_, i64>(2)? as usize;
                        stats.total_chunks += count;
                        if quarantined {
                            stats.quarantined += count;
                            continue;
                        }
                        match SyncStatus::parse(&status) {
                            Some(SyncStatus::Pending) => stats.pending += count,
                            Some(SyncStatus::Synced) => stats.synced += count,
                            Some(SyncStatus::Failed) => stats.failed += count,
                            None => stats.quarantined += count,
                        }
                    }
                }
                stats.sources = conn.query_row(
                    "SELECT COUNT(*) FROM source_files WHERE status != 'removed'",
                    [],
                    |row| row.get::<_, i64>(0),
                )? as usize;
                stats.sources_failed = conn.query_row(
                    "SELECT COUNT(*) FROM source_files WHERE status = 'failed'",
                    [],
                    |row| row.get::<_, i64>(0),
                )? as usize;
                stats.tombstones =
                    conn.query_row("SELECT COUNT(*) FROM tombstones", [], |row| row.get::<_, i64>(0))? as usize;
                Ok::<StoreStats, RagsyncError>(stats)
            })
            .await
    }

    /// Insert or replace the status row of a source file.
    pub async fn record_source(&self, record: SourceRecord) -> Result<()> {
        self.db
            .with_connection(move |conn| {
                let metadata_json = serde_json::to_string(&record.metadata)?;
                conn.execute(
                    "INSERT INTO source_files (source_id, name, fingerprint, modified_at, status,
                        chunk_count, failed_chunks, last_error, metadata_json, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT(source_id) DO UPDATE SET
                        name = excluded.name, fingerprint = excluded.fingerprint,
                        modified_at = excluded.modified_at, status = excluded.status,
                        chunk_count = excluded.chunk_count, failed_chunks = excluded.failed_chunks,
                        last_error = excluded.last_error, metadata_json = excluded.metadata_json,
                        updated_at = excluded.updated_at",
                    params![
                        record.source_id,
                        record.name,
                        record.fingerprint,
                        record.modified_at,
                        record.status.as_str(),
                        record.chunk_count as i64,
                        record.failed_chunks as i64,
                        record.last_error,
                        metadata_json,
                        now(),
                    ],
                )?;
                Ok::<(), RagsyncError>(())
            })
            .await
    }

    /// Status row of one source file.
    pub async fn source(&self, source_id: &str) -> Result<Option<SourceRecord>> {
        let source_id = source_id.to_string();
        self.db
            .with_connection(move |conn| {
                let record = conn
                    .query_row(
                        "SELECT source_id, name, fingerprint, modified_at, status, chunk_count,
                            failed_chunks, last_error, metadata_json
                         FROM source_files WHERE source_id = ?1",
                        params![source_id],
                        |row| {
                            let status: String = row.get(4)?;
                            let metadata_json: String = row.get(8)?;
                            Ok(SourceRecord {
                                source_id: row.get(0)?,
                                name: row.get(1)?,
                                fingerprint: row.get(2)?,
                                modified_at: row.get(3)?,
                                status: SourceStatus::parse(&status),
                                chunk_count: row.get::<_, i64>(5)? as usize,
                                failed_chunks: row.get::<_, i64>(6)? as usize,
                                last_error: row.get(7)?,
                                metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                            })
                        },
                    )
                    .optional()?;
                Ok::<Option<SourceRecord>, RagsyncError>(record)
            })
            .await
    }

    /// Delete chunks of `source_id` that belong to any generation other than
    /// `keep_fingerprint`. Returns the number of chunks retired.
    pub async fn retire_stale(&self, source_id: &str, keep_fingerprint: &str) -> Result<usize> {
        let source_id = source_id.to_string();
        let keep = keep_fingerprint.to_string();
        let retired = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let retired = retire_chunks(&tx, &source_id, Some(&keep))?;
                tx.commit()?;
                Ok::<usize, RagsyncError>(retired)
            })
            .await?;
        if retired > 0 {
            self.bump_generation();
        }
        Ok(retired)
    }

    /// Delete every chunk of a source that disappeared and mark the source removed.
    pub async fn remove_source(&self, source_id: &str) -> Result<usize> {
        let source_id = source_id.to_string();
        let removed = self
            .db
            .with_connection(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let removed = retire_chunks(&tx, &source_id, None)?;
                tx.execute(
                    "UPDATE source_files SET status = 'removed', chunk_count = 0, failed_chunks = 0,
                        updated_at = ?1 WHERE source_id = ?2",
                    params![now(), source_id],
                )?;
                tx.commit()?;
                Ok::<usize, RagsyncError>(removed)
            })
            .await?;
        if removed > 0 {
            self.bump_generation();
        }
        Ok(removed)
    }

    /// Tombstones awaiting a remote delete, oldest first.
    pub async fn list_tombstones(&self, limit: usize) -> Result<Vec<Tombstone>> {
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT fingerprint, source_id FROM tombstones ORDER BY created_at, fingerprint LIMIT ?1",
                )?;
                let tombstones = stmt
                    .query_map(params![limit as i64], |row| {
                        Ok(Tombstone {
                            fingerprint: row.get(0)?,
                            source_id: row.get(1)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
                Ok::<Vec<Tombstone>, RagsyncError>(tombstones)
            })
            .await
    }

    /// Every tombstoned fingerprint, used to filter stale remote hits.
    pub async fn tombstoned(&self) -> Result<HashSet<String>> {
        self.db
            .with_connection(|conn| {
                let mut stmt = conn.prepare("SELECT fingerprint FROM tombstones")?;
                let set = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<HashSet<_>, rusqlite::Error>>()?;
                Ok::<HashSet<String>, RagsyncError>(set)
            })
            .await
    }

    /// Drop tombstones whose remote delete succeeded.
    pub async fn clear_tombstones(&self, fingerprints: Vec<String>) -> Result<usize> {
        if fingerprints.is_empty() {
            return Ok(0);
        }
        self.db
            .with_connection(move |conn| {
                let tx = conn.transaction()?;
                let mut cleared = 0;
                for fingerprint in fingerprints {
                    cleared += tx.execute("DELETE FROM tombstones WHERE fingerprint = ?1", params![fingerprint])?;
                }
                tx.commit()?;
                Ok::<usize, RagsyncError>(cleared)
            })
            .await
    }
}

/// Delete chunks of a source (optionally keeping one generation), tombstoning any
/// that may already exist remotely.
fn retire_chunks(conn: &Connection, source_id: &str, keep: Option<&str>) -> Result<usize> {
    let keep = keep.unwrap_or("");
    let timestamp = now();
    conn.execute(
        "INSERT OR IGNORE INTO tombstones (fingerprint, source_id, created_at)
         SELECT fingerprint, source_id, ?3 FROM chunks
         WHERE source_id = ?1 AND source_fingerprint != ?2
           AND (sync_status != 'pending' OR retry_count > 0 OR synced_at IS NOT NULL)",
        params![source_id, keep, timestamp],
    )?;
    let deleted = conn.execute(
        "DELETE FROM chunks WHERE source_id = ?1 AND source_fingerprint != ?2",
        params![source_id, keep],
    )?;
    Ok(deleted)
}
