//! Reconciles the local store with the remote vector store.

use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::RemoteConfig;
use crate::error::Result;
use crate::remote::{RemotePoint, RemoteStore};
use crate::store::{LocalStore, SyncStatus};

/// Outcome of one `sync_once` cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub run_id: String,
    /// Records uploaded and marked Synced
    pub uploaded: usize,
    /// Upload attempts that failed (record left Pending or moved to Failed)
    pub failed: usize,
    /// Records that moved to Failed during this cycle
    pub exhausted: usize,
    /// Pending records not attempted (no remote store, or changed mid-upload)
    pub skipped: usize,
    /// Remote points removed for retired chunks
    pub deleted: usize,
}

/// Drains pending records to the remote store.
///
/// Without a remote store every cycle is a no-op that reports the pending
/// backlog as skipped.
pub struct SyncEngine {
    store: LocalStore,
    remote: Option<Arc<dyn RemoteStore>>,
    max_attempts: u32,
    batch_limit: usize,
}

impl SyncEngine {
    pub fn new(
        store: LocalStore,
        remote: Option<Arc<dyn RemoteStore>>,
        max_attempts: u32,
        batch_limit: usize,
    ) -> Self {
        Self {
            store,
            remote,
            max_attempts: max_attempts.max(1),
            batch_limit: batch_limit.max(1),
        }
    }

    pub fn from_config(store: LocalStore, remote: Option<Arc<dyn RemoteStore>>, config: &RemoteConfig) -> Self {
        Self::new(store, remote, config.max_sync_attempts, config.batch_limit)
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    /// One reconciliation pass: delete tombstoned points, then upload pending records.
    ///
    /// Per-record failures are counted, never returned. Only local store errors
    /// abort the cycle.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        let mut report = SyncReport {
            run_id: Uuid::new_v4().to_string(),
            ..SyncReport::default()
        };

        let Some(remote) = &self.remote else {
            report.skipped = self.store.stats().await?.pending;
            log::debug!("sync: no remote store, {} pending records skipped", report.skipped);
            return Ok(report);
        };

        let start = std::time::Instant::now();
        report.deleted = self.drain_tombstones(remote.as_ref()).await?;

        let pending = self.store.list_pending(self.batch_limit).await?;
        for record in pending {
            let fingerprint = record.chunk.fingerprint.clone();
            let revision = record.sync.revision;
            let point = RemotePoint {
                chunk: record.chunk,
                vector: record.embedding,
            };

            match remote.upsert(&point).await {
                Ok(()) => {
                    if self.store.mark_synced(&fingerprint, revision).await? {
                        report.uploaded += 1;
                    } else {
                        log::debug!("sync: {} changed during upload; left pending", fingerprint);
                        report.skipped += 1;
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    let status = self
                        .store
                        .record_failure(&fingerprint, revision, &e.to_string(), self.max_attempts)
                        .await?;
                    if status == Some(SyncStatus::Failed) {
                        report.exhausted += 1;
                        log::warn!(
                            "sync: {} failed {} times, parked as failed: {}",
                            fingerprint,
                            self.max_attempts,
                            e
                        );
                    } else {
                        log::warn!("sync: upload of {} failed: {}", fingerprint, e);
                    }
                }
            }
        }

        log::info!(
            "sync: run {} uploaded={} failed={} exhausted={} skipped={} deleted={} in {:?}",
            report.run_id,
            report.uploaded,
            report.failed,
            report.exhausted,
            report.skipped,
            report.deleted,
            start.elapsed()
        );
        Ok(report)
    }

    async fn drain_tombstones(&self, remote: &dyn RemoteStore) -> Result<usize> {
        let tombstones = self.store.list_tombstones(self.batch_limit).await?;
        if tombstones.is_empty() {
            return Ok(0);
        }
        let fingerprints: Vec<String> = tombstones.into_iter().map(|t| t.fingerprint).collect();
        match remote.delete(&fingerprints).await {
            Ok(()) => self.store.clear_tombstones(fingerprints).await,
            Err(e) => {
                log::warn!(
                    "sync: remote delete of {} retired chunks failed: {}",
                    fingerprints.len(),
                    e
                );
                Ok(0)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryRemoteStore;
    use crate::store::tests::{setup_test_store, test_chunk};

    fn engine(store: &LocalStore, remote: &Arc<MemoryRemoteStore>, max_attempts: u32) -> SyncEngine {
        SyncEngine::new(
            store.clone(),
            Some(remote.clone() as Arc<dyn RemoteStore>),
            max_attempts,
            100,
        )
    }

    async fn seed(store: &LocalStore, count: usize) {
        let items = (0..count)
            .map(|i| (test_chunk("a", "g1", i, &format!("text {}", i)), vec![1.0, 0.0, 0.0]))
            .collect();
        store.upsert_many(items).await.unwrap();
    }

    #[tokio::test]
    async fn test_sync_uploads_and_marks_synced() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 3).await;
        let remote = Arc::new(MemoryRemoteStore::new());

        let report = engine(&store, &remote, 3).sync_once().await.unwrap();
        assert_eq!(report.uploaded, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(remote.len(), 3);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.synced, 3);
        assert_eq!(stats.pending, 0);

        // Nothing left to do
        let report = engine(&store, &remote, 3).sync_once().await.unwrap();
        assert_eq!(report.uploaded, 0);
        assert_eq!(remote.upsert_count(), 3);
    }

    #[tokio::test]
    async fn test_retryable_failure_stays_pending() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 1).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_available(false);

        let report = engine(&store, &remote, 3).sync_once().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.exhausted, 0);

        let stored = store.get("a-g1-0").await.unwrap().unwrap();
        assert_eq!(stored.sync.status, SyncStatus::Pending);
        assert_eq!(stored.sync.retry_count, 1);
        assert!(stored.sync.last_error.is_some());

        remote.set_available(true);
        let report = engine(&store, &remote, 3).sync_once().await.unwrap();
        assert_eq!(report.uploaded, 1);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_moves_to_failed() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 2).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.fail_fingerprint("a-g1-1");
        let sync = engine(&store, &remote, 2);

        let first = sync.sync_once().await.unwrap();
        assert_eq!((first.uploaded, first.failed, first.exhausted), (1, 1, 0));
        let second = sync.sync_once().await.unwrap();
        assert_eq!((second.uploaded, second.failed, second.exhausted), (0, 1, 1));

        // Failed records are excluded from the next cycle
        let third = sync.sync_once().await.unwrap();
        assert_eq!((third.uploaded, third.failed), (0, 0));
        let stored = store.get("a-g1-1").await.unwrap().unwrap();
        assert_eq!(stored.sync.status, SyncStatus::Failed);

        // Explicit reset puts it back in the candidate set
        assert_eq!(store.reset_failed(Some("a-g1-1".into())).await.unwrap(), 1);
        let fourth = sync.sync_once().await.unwrap();
        assert_eq!(fourth.failed, 1);
    }

    #[tokio::test]
    async fn test_synced_record_not_reuploaded_until_content_changes() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 1).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        let sync = engine(&store, &remote, 3);
        sync.sync_once().await.unwrap();

        store
            .upsert(test_chunk("a", "g1", 0, "text 0"), vec![1.0, 0.0, 0.0])
            .await
            .unwrap();
        assert_eq!(sync.sync_once().await.unwrap().uploaded, 0);

        store
            .upsert(test_chunk("a", "g1", 0, "text 0"), vec![0.0, 1.0, 0.0])
            .await
            .unwrap();
        assert_eq!(sync.sync_once().await.unwrap().uploaded, 1);
        assert_eq!(remote.upsert_count(), 2);
    }

    #[tokio::test]
    async fn test_tombstones_are_deleted_remotely() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 2).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        let sync = engine(&store, &remote, 3);
        sync.sync_once().await.unwrap();
        assert_eq!(remote.len(), 2);

        store.remove_source("a").await.unwrap();
        let report = sync.sync_once().await.unwrap();
        assert_eq!(report.deleted, 2);
        assert!(remote.is_empty());
        assert_eq!(store.stats().await.unwrap().tombstones, 0);
    }

    #[tokio::test]
    async fn test_tombstones_kept_while_remote_down() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 1).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        let sync = engine(&store, &remote, 3);
        sync.sync_once().await.unwrap();
        store.remove_source("a").await.unwrap();

        remote.set_available(false);
        assert_eq!(sync.sync_once().await.unwrap().deleted, 0);
        assert_eq!(store.stats().await.unwrap().tombstones, 1);
    }

    #[tokio::test]
    async fn test_without_remote_everything_is_skipped() {
        let (store, _dir) = setup_test_store().await;
        seed(&store, 2).await;
        let sync = SyncEngine::new(store.clone(), None, 3, 100);
        let report = sync.sync_once().await.unwrap();
        assert_eq!(report.skipped, 2);
        assert_eq!(report.uploaded, 0);
        assert!(!report.run_id.is_empty());
    }
}
