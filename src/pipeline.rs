//! Consumer-facing facade: `ingest_now`, `sync_now`, `retrieve`, `get_stats`.
//!
//! Wires the watcher, processor, embedding generator, local store, sync engine
//! and retrieval engine together. Each of the four entry points is safe to call
//! concurrently with the others; scans serialize on the watcher and sync cycles
//! serialize on their own lock.

use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cache::CacheStats;
use crate::config::{Config, RemoteConfig, RetrievalConfig};
use crate::embeddings::{model_from_config, EmbeddingGenerator};
use crate::error::{RagsyncError, Result};
use crate::ingest::{DocumentProcessor, Metadata};
use crate::remote::{remote_from_config, RemoteStore};
use crate::search::{RetrievalEngine, ScoredChunk};
use crate::source::{LocalFolder, SourceFolder};
use crate::store::{LocalStore, SourceRecord, SourceStatus, StoreStats, UpsertOutcome};
use crate::sync::{SyncEngine, SyncReport};
use crate::watch::{ChangeEvent, ChangeKind, SourceWatcher};

/// Outcome of one `ingest_now` scan.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub run_id: String,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_removed: usize,
    /// Files whose extraction failed; not retried until they change
    pub files_failed: usize,
    /// Files left for the next scan (transient error or chunks not embedded)
    pub files_deferred: usize,
    /// Chunks written (new or changed)
    pub chunks_stored: usize,
    /// Chunks already present with identical content
    pub chunks_unchanged: usize,
    /// Chunks that could not be embedded
    pub chunks_failed: usize,
    /// Chunks of older generations or removed files deleted locally
    pub chunks_retired: usize,
}

/// Counts reported by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub store: StoreStats,
    pub known_files: usize,
    pub query_cache: Option<CacheStats>,
    pub remote_enabled: bool,
}

/// Collaborators a [`Pipeline`] is assembled from.
pub struct PipelineParts {
    pub watcher: SourceWatcher,
    pub processor: DocumentProcessor,
    pub generator: EmbeddingGenerator,
    pub store: LocalStore,
    pub remote: Option<Arc<dyn RemoteStore>>,
    pub remote_config: RemoteConfig,
    pub retrieval: RetrievalConfig,
    pub workers: usize,
}

pub struct Pipeline {
    watcher: Mutex<SourceWatcher>,
    processor: DocumentProcessor,
    generator: Arc<EmbeddingGenerator>,
    store: LocalStore,
    sync: SyncEngine,
    sync_lock: Mutex<()>,
    retrieval: RetrievalEngine,
    default_k: usize,
    workers: usize,
}

/// How one change event ended.
enum FileOutcome {
    /// Processed; `failed > 0` leaves the event uncommitted so the missing
    /// chunks are embedded on the next scan
    Ingested {
        event: ChangeEvent,
        stored: usize,
        unchanged: usize,
        failed: usize,
        retired: usize,
    },
    Removed {
        event: ChangeEvent,
        retired: usize,
    },
    /// Extraction failed; committed so it is not retried until the file changes
    Rejected { event: ChangeEvent },
    /// Transient error; delivered again on the next scan
    Deferred,
}

impl Pipeline {
    pub fn new(parts: PipelineParts) -> Result<Self> {
        if parts.generator.dimensions() != parts.store.dimensions() {
            return Err(RagsyncError::DimensionMismatch {
                expected: parts.store.dimensions(),
                actual: parts.generator.dimensions(),
            });
        }
        let retrieval = RetrievalEngine::new(
            parts.store.clone(),
            parts.remote.clone(),
            parts.retrieval.mode,
            parts.retrieval.min_score,
        )?;
        let sync = SyncEngine::from_config(parts.store.clone(), parts.remote, &parts.remote_config);
        Ok(Self {
            watcher: Mutex::new(parts.watcher),
            processor: parts.processor,
            generator: Arc::new(parts.generator),
            store: parts.store,
            sync,
            sync_lock: Mutex::new(()),
            retrieval,
            default_k: parts.retrieval.default_k,
            workers: parts.workers.max(1),
        })
    }

    /// Build the production pipeline described by `config`.
    ///
    /// # Errors
    ///
    /// `Config` if a collaborator cannot be built or the remote store is
    /// unreachable or mis-dimensioned at startup.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let dimensions = config.embeddings.dimensions;
        let store = LocalStore::open(config.db_path(), dimensions).await?;
        let source = Arc::new(LocalFolder::new(config.source_folder(), &config.source.extensions));
        let watcher = SourceWatcher::new(source, config.storage.cursor_path.clone())?;
        let model = model_from_config(&config.embeddings)?;
        let generator = EmbeddingGenerator::from_config(model, &config.embeddings);

        let remote = remote_from_config(config)?;
        if let Some(remote) = &remote {
            remote.ensure_ready(dimensions).await.map_err(|e| match e {
                RagsyncError::Config(_) => e,
                other => RagsyncError::Config(format!(
                    "remote store {} unreachable at startup: {}",
                    remote.name(),
                    other
                )),
            })?;
            log::info!("pipeline: remote store {} ready", remote.name());
        }

        Self::new(PipelineParts {
            watcher,
            processor: DocumentProcessor::from_config(config),
            generator,
            store,
            remote,
            remote_config: config.remote.clone(),
            retrieval: config.retrieval.clone(),
            workers: config.source.workers,
        })
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Scan the source folder once and ingest every change.
    ///
    /// Files are processed concurrently up to the worker limit. Per-file and
    /// per-chunk failures are counted in the report. The cursor advances past
    /// every event that was fully handled, including rejected files.
    ///
    /// # Errors
    ///
    /// Fatal errors (dimension mismatch, configuration) stop the scan after the
    /// events handled so far are committed.
    pub async fn ingest_now(&self) -> Result<IngestReport> {
        let mut watcher = self.watcher.lock().await;
        let mut report = IngestReport {
            run_id: Uuid::new_v4().to_string(),
            ..IngestReport::default()
        };
        let start = std::time::Instant::now();

        let events = watcher.scan().await?;
        if events.is_empty() {
            log::debug!("ingest: run {} found no changes", report.run_id);
            return Ok(report);
        }
        log::info!("ingest: run {} handling {} changes", report.run_id, events.len());

        let source = watcher.source();
        let mut outcomes = stream::iter(events)
            .map(|event| {
                let source = Arc::clone(&source);
                async move { self.ingest_event(source, event).await }
            })
            .buffer_unordered(self.workers);

        let mut delivered = Vec::new();
        let mut fatal = None;
        while let Some(outcome) = outcomes.next().await {
            match outcome {
                Ok(outcome) => {
                    if let Some(event) = tally(&mut report, outcome) {
                        delivered.push(event);
                    }
                }
                Err(e) => {
                    log::error!("ingest: run {} aborted: {}", report.run_id, e);
                    fatal = Some(e);
                    break;
                }
            }
        }
        drop(outcomes);

        watcher.commit(&delivered)?;
        if let Some(e) = fatal {
            return Err(e);
        }

        log::info!(
            "ingest: run {} added={} modified={} removed={} failed={} deferred={} chunks stored={} unchanged={} failed={} retired={} in {:?}",
            report.run_id,
            report.files_added,
            report.files_modified,
            report.files_removed,
            report.files_failed,
            report.files_deferred,
            report.chunks_stored,
            report.chunks_unchanged,
            report.chunks_failed,
            report.chunks_retired,
            start.elapsed()
        );
        Ok(report)
    }

    /// Handle one change event. Only fatal errors are returned.
    async fn ingest_event(&self, source: Arc<dyn SourceFolder>, event: ChangeEvent) -> Result<FileOutcome> {
        let file_id = event.file.id.clone();
        let result = match event.kind {
            ChangeKind::Removed => self.remove_file(event).await,
            ChangeKind::Added | ChangeKind::Modified => self.ingest_file(source, event).await,
        };
        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                log::warn!("ingest: {} deferred to next scan: {}", file_id, e);
                Ok(FileOutcome::Deferred)
            }
        }
    }

    async fn remove_file(&self, event: ChangeEvent) -> Result<FileOutcome> {
        let retired = self.store.remove_source(&event.file.id).await?;
        log::info!("ingest: {} removed, {} chunks retired", event.file.id, retired);
        Ok(FileOutcome::Removed { event, retired })
    }

    async fn ingest_file(&self, source: Arc<dyn SourceFolder>, event: ChangeEvent) -> Result<FileOutcome> {
        let file = &event.file;
        self.store
            .record_source(SourceRecord {
                source_id: file.id.clone(),
                name: file.name.clone(),
                fingerprint: file.fingerprint.clone(),
                modified_at: file.modified_at.clone(),
                status: SourceStatus::Pending,
                chunk_count: 0,
                failed_chunks: 0,
                last_error: None,
                metadata: Metadata::new(),
            })
            .await?;

        let bytes = source.fetch(&file.id).await?;
        let doc = match self.processor.process(file, bytes).await {
            Ok(doc) => doc,
            Err(e @ RagsyncError::Extraction { .. }) => {
                log::warn!("ingest: {} rejected: {}", file.id, e);
                self.store
                    .record_source(SourceRecord {
                        source_id: file.id.clone(),
                        name: file.name.clone(),
                        fingerprint: file.fingerprint.clone(),
                        modified_at: file.modified_at.clone(),
                        status: SourceStatus::Failed,
                        chunk_count: 0,
                        failed_chunks: 0,
                        last_error: Some(e.to_string()),
                        metadata: Metadata::new(),
                    })
                    .await?;
                return Ok(FileOutcome::Rejected { event });
            }
            Err(e) => return Err(e),
        };

        // Fingerprints cover content, so anything already stored needs no new embedding
        let fingerprints: Vec<String> = doc.chunks.iter().map(|c| c.fingerprint.clone()).collect();
        let existing = self.store.existing_fingerprints(fingerprints).await?;
        let fresh: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| !existing.contains(&c.fingerprint))
            .cloned()
            .collect();

        let embedded = self.generator.embed_batch(&fresh).await?;
        let failed = embedded.failed.len();
        let mut vectors: HashMap<String, Vec<f32>> = embedded.embedded.into_iter().collect();
        let items: Vec<_> = fresh
            .into_iter()
            .filter_map(|chunk| vectors.remove(&chunk.fingerprint).map(|v| (chunk, v)))
            .collect();

        let outcomes = self.store.upsert_many(items).await?;
        let stored = outcomes.iter().filter(|o| **o != UpsertOutcome::Unchanged).count();
        let unchanged = existing.len() + outcomes.len() - stored;
        let retired = self.store.retire_stale(&file.id, &doc.file.fingerprint).await?;

        let last_error = embedded.failed.first().map(|f| f.error.clone());
        self.store
            .record_source(SourceRecord {
                source_id: doc.file.id.clone(),
                name: doc.file.name.clone(),
                fingerprint: doc.file.fingerprint.clone(),
                modified_at: doc.file.modified_at.clone(),
                status: SourceStatus::Ingested,
                chunk_count: doc.chunks.len(),
                failed_chunks: failed,
                last_error,
                metadata: doc.metadata.clone(),
            })
            .await?;

        log::info!(
            "ingest: {} -> {} chunks ({} stored, {} unchanged, {} failed, {} retired)",
            file.id,
            doc.chunks.len(),
            stored,
            unchanged,
            failed,
            retired
        );

        Ok(FileOutcome::Ingested {
            event: ChangeEvent {
                kind: event.kind,
                file: doc.file,
            },
            stored,
            unchanged,
            failed,
            retired,
        })
    }

    /// Run one sync cycle now.
    pub async fn sync_now(&self) -> Result<SyncReport> {
        let _guard = self.sync_lock.lock().await;
        self.sync.sync_once().await
    }

    /// Top `k` chunks for an already-embedded query.
    pub async fn retrieve(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        self.retrieval.query(vector, k).await
    }

    /// Embed `text` (through the query cache) and retrieve the top `k` chunks.
    pub async fn retrieve_text(&self, text: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(RagsyncError::InvalidInput("query text is empty".into()));
        }
        let vector = self.generator.embed_query(text).await?;
        self.retrieve(&vector, k).await
    }

    pub async fn get_stats(&self) -> Result<PipelineStats> {
        let store = self.store.stats().await?;
        let known_files = self.watcher.lock().await.cursor().len();
        Ok(PipelineStats {
            store,
            known_files,
            query_cache: self.generator.cache().map(|c| c.stats()),
            remote_enabled: self.sync.has_remote(),
        })
    }

    /// Return Failed records to Pending; `None` resets all of them.
    pub async fn reset_failed(&self, fingerprint: Option<String>) -> Result<usize> {
        let count = self.store.reset_failed(fingerprint).await?;
        log::info!("pipeline: {} failed records reset to pending", count);
        Ok(count)
    }
}

/// Fold one outcome into the report; returns the event to commit, if any.
fn tally(report: &mut IngestReport, outcome: FileOutcome) -> Option<ChangeEvent> {
    match outcome {
        FileOutcome::Ingested {
            event,
            stored,
            unchanged,
            failed,
            retired,
        } => {
            report.chunks_stored += stored;
            report.chunks_unchanged += unchanged;
            report.chunks_failed += failed;
            report.chunks_retired += retired;
            if failed > 0 {
                report.files_deferred += 1;
                return None;
            }
            match event.kind {
                ChangeKind::Added => report.files_added += 1,
                _ => report.files_modified += 1,
            }
            Some(event)
        }
        FileOutcome::Removed { event, retired } => {
            report.files_removed += 1;
            report.chunks_retired += retired;
            Some(event)
        }
        FileOutcome::Rejected { event } => {
            report.files_failed += 1;
            Some(event)
        }
        FileOutcome::Deferred => {
            report.files_deferred += 1;
            None
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::RetrievalMode;
    use crate::embeddings::generator::tests::ScriptedModel;
    use crate::embeddings::HashEmbedder;
    use crate::extract::ExtractorRegistry;
    use crate::ingest::MetadataExtractor;
    use crate::remote::MemoryRemoteStore;
    use crate::source::StaticSource;
    use crate::store::tests::DIMS;
    use crate::store::SyncStatus;
    use crate::watch::IngestionCursor;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tempfile::TempDir;

    pub(crate) struct Harness {
        pub pipeline: Pipeline,
        pub source: Arc<StaticSource>,
        pub remote: Arc<MemoryRemoteStore>,
        _dir: TempDir,
    }

    pub(crate) async fn harness_with(model: Arc<dyn crate::embeddings::EmbeddingModel>, mode: RetrievalMode) -> Harness {
        let dir = TempDir::new().unwrap();
        let store = LocalStore::open(dir.path().join("store.db"), DIMS).await.unwrap();
        let source = Arc::new(StaticSource::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let watcher = SourceWatcher::with_cursor(source.clone(), IngestionCursor::default());
        let processor = DocumentProcessor::new(
            ExtractorRegistry::new(),
            MetadataExtractor::new(BTreeMap::new()),
            60,
            10,
        );
        let generator = EmbeddingGenerator::new(model, DIMS, 4, 2, Duration::from_millis(1));
        let pipeline = Pipeline::new(PipelineParts {
            watcher,
            processor,
            generator,
            store,
            remote: Some(remote.clone() as Arc<dyn RemoteStore>),
            remote_config: RemoteConfig {
                max_sync_attempts: 2,
                ..RemoteConfig::default()
            },
            retrieval: RetrievalConfig {
                mode,
                ..RetrievalConfig::default()
            },
            workers: 2,
        })
        .unwrap();
        Harness {
            pipeline,
            source,
            remote,
            _dir: dir,
        }
    }

    pub(crate) async fn harness() -> Harness {
        harness_with(Arc::new(HashEmbedder::new(DIMS)), RetrievalMode::Local).await
    }

    #[tokio::test]
    async fn test_ingest_sync_retrieve_end_to_end() {
        let h = harness().await;
        h.source.put("acts/contract.txt", "Offers and acceptance.\n\nConsideration is required.");
        h.source.put("notes/readme.md", "# Notes\n\nNothing here yet.");

        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_added, 2);
        assert_eq!(report.files_failed, 0);
        assert!(report.chunks_stored >= 2);

        let stats = h.pipeline.get_stats().await.unwrap();
        assert_eq!(stats.store.pending, report.chunks_stored);
        assert_eq!(stats.known_files, 2);

        let sync = h.pipeline.sync_now().await.unwrap();
        assert_eq!(sync.uploaded, report.chunks_stored);
        assert_eq!(h.remote.len(), report.chunks_stored);
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.synced, report.chunks_stored);

        let all = h.pipeline.store().all().await.unwrap();
        let target = &all[0];
        let results = h.pipeline.retrieve(&target.embedding, 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert!((results[0].score - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_rescan_without_changes_is_noop() {
        let h = harness().await;
        h.source.put("a.txt", "alpha beta gamma");
        h.pipeline.ingest_now().await.unwrap();
        h.pipeline.sync_now().await.unwrap();

        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_added + report.files_modified, 0);
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.pending, 0);
    }

    #[tokio::test]
    async fn test_modified_file_replaces_generation() {
        let h = harness().await;
        h.source.put("a.txt", "first version");
        h.pipeline.ingest_now().await.unwrap();
        h.pipeline.sync_now().await.unwrap();
        let old: Vec<String> = h
            .pipeline
            .store()
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.chunk.fingerprint)
            .collect();

        h.source.put("a.txt", "second version");
        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_modified, 1);
        assert_eq!(report.chunks_retired, old.len());

        let current = h.pipeline.store().all().await.unwrap();
        assert!(current.iter().all(|s| s.chunk.text == "second version"));
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.tombstones, old.len());

        let sync = h.pipeline.sync_now().await.unwrap();
        assert_eq!(sync.deleted, old.len());
        for fingerprint in &old {
            assert!(!h.remote.contains(fingerprint));
        }
    }

    #[tokio::test]
    async fn test_removed_file_is_retired() {
        let h = harness().await;
        h.source.put("a.txt", "to be removed");
        h.pipeline.ingest_now().await.unwrap();

        h.source.remove("a.txt");
        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.chunks_retired, 1);

        let stats = h.pipeline.get_stats().await.unwrap();
        assert_eq!(stats.store.total_chunks, 0);
        assert_eq!(stats.known_files, 0);
        let record = h.pipeline.store().source("a.txt").await.unwrap().unwrap();
        assert_eq!(record.status, SourceStatus::Removed);
    }

    #[tokio::test]
    async fn test_extraction_failure_is_isolated_and_committed() {
        let h = harness().await;
        h.source.put("broken.pdf", "not really a pdf");
        h.source.put("ok.txt", "fine content");

        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.files_added, 1);

        let record = h.pipeline.store().source("broken.pdf").await.unwrap().unwrap();
        assert_eq!(record.status, SourceStatus::Failed);
        assert!(record.last_error.is_some());

        // Unchanged broken file is not retried
        let again = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(again.files_failed, 0);
    }

    #[tokio::test]
    async fn test_poisoned_chunk_is_excluded_and_retried_next_scan() {
        let h = harness_with(Arc::new(ScriptedModel::new(DIMS)), RetrievalMode::Local).await;
        h.source.put(
            "a.txt",
            "first block of plain text goes right here\n\nthe poison block is right in the middle\n\nlast block of plain text sits down here",
        );

        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_deferred, 1);
        assert_eq!(report.chunks_failed, 1);

        let stats = h.pipeline.get_stats().await.unwrap();
        assert_eq!(stats.store.total_chunks, 2);
        assert_eq!(stats.known_files, 0);
        let record = h.pipeline.store().source("a.txt").await.unwrap().unwrap();
        assert_eq!(record.failed_chunks, 1);

        // Only the missing chunk is attempted again
        let again = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(again.chunks_failed, 1);
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.total_chunks, 2);
    }

    #[tokio::test]
    async fn test_identical_copies_keep_their_own_chunks() {
        let h = harness().await;
        h.source.put("a.txt", "identical statute text");
        h.pipeline.ingest_now().await.unwrap();

        h.source.put("b.txt", "identical statute text");
        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_added, 1);
        assert_eq!(report.chunks_stored, 1);

        h.source.remove("a.txt");
        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert_eq!(report.chunks_retired, 1);

        let remaining = h.pipeline.store().all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].chunk.source_id, "b.txt");
        assert_eq!(remaining[0].chunk.text, "identical statute text");
        let record = h.pipeline.store().source("b.txt").await.unwrap().unwrap();
        assert_eq!(record.status, SourceStatus::Ingested);
        assert_eq!(record.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_unreadable_file_keeps_its_chunks() {
        let h = harness().await;
        h.source.put("a.txt", "content under edit");
        h.pipeline.ingest_now().await.unwrap();

        h.source.set_unreadable("a.txt", true);
        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.chunks_retired, 0);

        let stats = h.pipeline.get_stats().await.unwrap();
        assert_eq!(stats.store.total_chunks, 1);
        assert_eq!(stats.store.tombstones, 0);
        assert_eq!(stats.known_files, 1);
        let record = h.pipeline.store().source("a.txt").await.unwrap().unwrap();
        assert_eq!(record.status, SourceStatus::Ingested);
    }

    #[tokio::test]
    async fn test_one_failed_chunk_of_five_leaves_four_complete_records() {
        let h = harness_with(Arc::new(ScriptedModel::new(DIMS)), RetrievalMode::Local).await;
        h.source.put(
            "a.txt",
            [
                "first block of plain text goes right here",
                "second block of plain text follows along",
                "the poison block is right in the middle",
                "fourth block of plain text comes after it",
                "last block of plain text sits down here",
            ]
            .join("\n\n"),
        );

        let report = h.pipeline.ingest_now().await.unwrap();
        assert_eq!(report.chunks_stored, 4);
        assert_eq!(report.chunks_failed, 1);

        let stored = h.pipeline.store().all().await.unwrap();
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.total_chunks, 4);
        let mut indices: Vec<usize> = stored.iter().map(|s| s.chunk.index).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 3, 4]);
        for record in &stored {
            assert_eq!(record.embedding.len(), DIMS);
            assert!(!record.chunk.text.contains("poison"));
        }
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_fatal() {
        let h = harness_with(Arc::new(ScriptedModel::new(DIMS + 1)), RetrievalMode::Local).await;
        h.source.put("a.txt", "anything");
        let err = h.pipeline.ingest_now().await.unwrap_err();
        assert!(matches!(err, RagsyncError::DimensionMismatch { .. }));
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.total_chunks, 0);
    }

    #[tokio::test]
    async fn test_sync_failures_surface_in_stats_and_reset() {
        let h = harness().await;
        h.source.put("a.txt", "content");
        h.pipeline.ingest_now().await.unwrap();
        h.remote.set_available(false);

        h.pipeline.sync_now().await.unwrap();
        h.pipeline.sync_now().await.unwrap();
        assert_eq!(h.pipeline.get_stats().await.unwrap().store.failed, 1);

        h.remote.set_available(true);
        assert_eq!(h.pipeline.reset_failed(None).await.unwrap(), 1);
        assert_eq!(h.pipeline.sync_now().await.unwrap().uploaded, 1);
        let all = h.pipeline.store().all().await.unwrap();
        assert_eq!(all[0].sync.status, SyncStatus::Synced);
    }

    #[tokio::test]
    async fn test_retrieve_text_uses_remote_copy_in_both_mode() {
        let h = harness_with(Arc::new(HashEmbedder::new(DIMS)), RetrievalMode::Both).await;
        h.source.put("a.txt", "contract law");
        h.pipeline.ingest_now().await.unwrap();
        h.pipeline.sync_now().await.unwrap();

        let results = h.pipeline.retrieve_text("contract law", 3).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].origin, crate::search::Origin::Remote);
        assert!(h.pipeline.retrieve_text("   ", 3).await.is_err());
    }
}
