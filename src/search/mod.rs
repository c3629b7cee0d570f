//! Read path: ranks chunks from the local store, the remote store, or both.

pub mod index;
pub mod vector;

pub use index::LocalIndex;
pub use vector::{cosine_similarity, rank, Origin, ScoredChunk};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::RetrievalMode;
use crate::error::{RagsyncError, Result};
use crate::remote::RemoteStore;
use crate::store::LocalStore;

/// Answers `query(vector, k)` against the configured active store(s).
///
/// In `Both` mode results are merged by fingerprint and the remote copy wins,
/// since a synced remote record is authoritative. Remote hits for fingerprints
/// tombstoned locally are dropped so retired content is never served. A remote
/// outage in `Both` mode degrades to local results with a warning; in `Remote`
/// mode it is returned to the caller.
pub struct RetrievalEngine {
    store: LocalStore,
    index: LocalIndex,
    remote: Option<Arc<dyn RemoteStore>>,
    mode: RetrievalMode,
    min_score: Option<f32>,
}

impl RetrievalEngine {
    pub fn new(
        store: LocalStore,
        remote: Option<Arc<dyn RemoteStore>>,
        mode: RetrievalMode,
        min_score: Option<f32>,
    ) -> Result<Self> {
        if mode != RetrievalMode::Local && remote.is_none() {
            return Err(RagsyncError::Config(format!(
                "retrieval mode {:?} needs a remote store",
                mode
            )));
        }
        Ok(Self {
            store,
            index: LocalIndex::new(),
            remote,
            mode,
            min_score,
        })
    }

    /// Top `k` chunks by cosine similarity, score descending, ties by fingerprint.
    ///
    /// An empty store yields an empty result; `k` beyond the candidate count
    /// returns every candidate.
    ///
    /// # Errors
    ///
    /// `DimensionMismatch` if `vector` does not have the configured length.
    pub async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if vector.len() != self.store.dimensions() {
            return Err(RagsyncError::DimensionMismatch {
                expected: self.store.dimensions(),
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let start = std::time::Instant::now();
        let candidates = match self.mode {
            RetrievalMode::Local => self.index.score_all(&self.store, vector).await?,
            RetrievalMode::Remote => self.remote_candidates(vector, k).await?,
            RetrievalMode::Both => {
                let local = self.index.score_all(&self.store, vector).await?;
                match self.remote_candidates(vector, k).await {
                    Ok(remote) => merge_prefer_remote(local, remote),
                    Err(e) => {
                        log::warn!("search: remote query failed, serving local results: {}", e);
                        local
                    }
                }
            }
        };

        let results = rank(candidates, k, self.min_score);
        log::debug!(
            "search: {:?} query returned {} results in {:?}",
            self.mode,
            results.len(),
            start.elapsed()
        );
        Ok(results)
    }

    async fn remote_candidates(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let Some(remote) = &self.remote else {
            return Ok(Vec::new());
        };
        let tombstoned = self.store.tombstoned().await?;
        // Over-fetch so filtered tombstones do not shrink the result below k
        let hits = remote.query(vector, k + tombstoned.len()).await?;
        Ok(hits
            .into_iter()
            .filter(|hit| !tombstoned.contains(&hit.chunk.fingerprint))
            .map(|hit| ScoredChunk {
                chunk: hit.chunk,
                score: hit.score,
                origin: Origin::Remote,
            })
            .collect())
    }
}

/// De-duplicate by fingerprint; a remote result replaces the local one.
fn merge_prefer_remote(local: Vec<ScoredChunk>, remote: Vec<ScoredChunk>) -> Vec<ScoredChunk> {
    let mut merged: HashMap<String, ScoredChunk> = HashMap::with_capacity(local.len() + remote.len());
    for result in local.into_iter().chain(remote) {
        merged.insert(result.chunk.fingerprint.clone(), result);
    }
    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{MemoryRemoteStore, RemotePoint};
    use crate::store::tests::{setup_test_store, test_chunk};

    async fn seed(store: &LocalStore) {
        store
            .upsert_many(vec![
                (test_chunk("a", "g1", 0, "alpha"), vec![1.0, 0.0, 0.0]),
                (test_chunk("a", "g1", 1, "beta"), vec![0.0, 1.0, 0.0]),
                (test_chunk("a", "g1", 2, "gamma"), vec![0.0, 0.0, 1.0]),
            ])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_query_returns_exact_match_first() {
        let (store, _dir) = setup_test_store().await;
        seed(&store).await;
        let engine = RetrievalEngine::new(store, None, RetrievalMode::Local, None).unwrap();

        let results = engine.query(&[0.0, 1.0, 0.0], 1).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.fingerprint, "a-g1-1");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[0].origin, Origin::Local);
    }

    #[tokio::test]
    async fn test_empty_store_and_large_k() {
        let (store, _dir) = setup_test_store().await;
        let engine = RetrievalEngine::new(store.clone(), None, RetrievalMode::Local, None).unwrap();
        assert!(engine.query(&[1.0, 0.0, 0.0], 10).await.unwrap().is_empty());

        seed(&store).await;
        assert_eq!(engine.query(&[1.0, 0.0, 0.0], 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_ties_break_by_fingerprint() {
        let (store, _dir) = setup_test_store().await;
        store
            .upsert_many(vec![
                (test_chunk("b", "g1", 0, "two"), vec![1.0, 1.0, 0.0]),
                (test_chunk("a", "g1", 0, "one"), vec![1.0, 1.0, 0.0]),
            ])
            .await
            .unwrap();
        let engine = RetrievalEngine::new(store, None, RetrievalMode::Local, None).unwrap();

        let results = engine.query(&[1.0, 0.0, 0.0], 2).await.unwrap();
        assert_eq!(results[0].chunk.fingerprint, "a-g1-0");
        assert_eq!(results[1].chunk.fingerprint, "b-g1-0");
    }

    #[tokio::test]
    async fn test_wrong_query_dimensions() {
        let (store, _dir) = setup_test_store().await;
        let engine = RetrievalEngine::new(store, None, RetrievalMode::Local, None).unwrap();
        let err = engine.query(&[1.0, 0.0], 3).await.unwrap_err();
        assert!(matches!(err, RagsyncError::DimensionMismatch { expected: 3, actual: 2 }));
    }

    #[tokio::test]
    async fn test_min_score_filters() {
        let (store, _dir) = setup_test_store().await;
        seed(&store).await;
        let engine = RetrievalEngine::new(store, None, RetrievalMode::Local, Some(0.5)).unwrap();
        let results = engine.query(&[1.0, 0.2, 0.0], 5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk.fingerprint, "a-g1-0");
    }

    #[tokio::test]
    async fn test_both_mode_prefers_remote_and_dedupes() {
        let (store, _dir) = setup_test_store().await;
        seed(&store).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        let mut remote_copy = test_chunk("a", "g1", 0, "alpha (remote)");
        remote_copy.metadata.insert("copy".into(), serde_json::json!("remote"));
        remote
            .upsert(&RemotePoint {
                chunk: remote_copy,
                vector: vec![1.0, 0.0, 0.0],
            })
            .await
            .unwrap();

        let engine =
            RetrievalEngine::new(store, Some(remote.clone() as Arc<dyn RemoteStore>), RetrievalMode::Both, None)
                .unwrap();
        let results = engine.query(&[1.0, 0.0, 0.0], 5).await.unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].chunk.fingerprint, "a-g1-0");
        assert_eq!(results[0].origin, Origin::Remote);
        assert_eq!(results[0].chunk.text, "alpha (remote)");
    }

    #[tokio::test]
    async fn test_both_mode_degrades_when_remote_down() {
        let (store, _dir) = setup_test_store().await;
        seed(&store).await;
        let remote = Arc::new(MemoryRemoteStore::new());
        remote.set_available(false);
        let engine =
            RetrievalEngine::new(store, Some(remote.clone() as Arc<dyn RemoteStore>), RetrievalMode::Both, None)
                .unwrap();
        assert_eq!(engine.query(&[1.0, 0.0, 0.0], 5).await.unwrap().len(), 3);

        let (store, _dir2) = setup_test_store().await;
        let remote_only =
            RetrievalEngine::new(store, Some(remote as Arc<dyn RemoteStore>), RetrievalMode::Remote, None).unwrap();
        assert!(remote_only.query(&[1.0, 0.0, 0.0], 5).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_tombstoned_remote_hits_are_filtered() {
        let (store, _dir) = setup_test_store().await;
        let chunk = test_chunk("a", "g1", 0, "old");
        store.upsert(chunk.clone(), vec![1.0, 0.0, 0.0]).await.unwrap();
        store.mark_synced("a-g1-0", 1).await.unwrap();

        let remote = Arc::new(MemoryRemoteStore::new());
        remote
            .upsert(&RemotePoint {
                chunk,
                vector: vec![1.0, 0.0, 0.0],
            })
            .await
            .unwrap();

        // New generation replaces the synced one; remote delete has not run yet
        store.retire_stale("a", "g2").await.unwrap();

        let engine =
            RetrievalEngine::new(store, Some(remote as Arc<dyn RemoteStore>), RetrievalMode::Remote, None).unwrap();
        assert!(engine.query(&[1.0, 0.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[test]
    fn test_remote_mode_requires_remote() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let (store, _dir) = rt.block_on(setup_test_store());
        assert!(RetrievalEngine::new(store, None, RetrievalMode::Both, None).is_err());
    }
}
