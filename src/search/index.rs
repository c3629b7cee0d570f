//! In-memory snapshot of the local store for brute-force vector search.
//!
//! The snapshot is tagged with the store's write generation and reloaded on the
//! next query after any write, so results never lag a completed upsert.

use std::sync::{Arc, RwLock};

use super::vector::{cosine_similarity, Origin, ScoredChunk};
use crate::error::Result;
use crate::ingest::Chunk;
use crate::store::LocalStore;

struct Snapshot {
    generation: u64,
    entries: Arc<Vec<(Chunk, Vec<f32>)>>,
}

pub struct LocalIndex {
    inner: RwLock<Option<Snapshot>>,
}

impl Default for LocalIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalIndex {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(None),
        }
    }

    /// Number of indexed chunks (0 if never loaded).
    #[cfg(test)]
    fn len(&self) -> usize {
        self.read_snapshot().map(|(_, entries)| entries.len()).unwrap_or(0)
    }

    /// Drop the snapshot; the next query reloads.
    #[cfg(test)]
    fn clear(&self) {
        *self.inner.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    fn read_snapshot(&self) -> Option<(u64, Arc<Vec<(Chunk, Vec<f32>)>>)> {
        self.inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .map(|s| (s.generation, s.entries.clone()))
    }

    /// Current entries, reloading from `store` if it has been written since.
    async fn entries(&self, store: &LocalStore) -> Result<Arc<Vec<(Chunk, Vec<f32>)>>> {
        let generation = store.write_generation();
        if let Some((loaded, entries)) = self.read_snapshot() {
            if loaded == generation {
                return Ok(entries);
            }
        }

        let records = store.all().await?;
        let entries: Arc<Vec<(Chunk, Vec<f32>)>> = Arc::new(
            records
                .into_iter()
                .map(|stored| (stored.chunk, stored.embedding))
                .collect(),
        );
        log::debug!(
            "search: local index loaded {} chunks at generation {}",
            entries.len(),
            generation
        );
        *self.inner.write().unwrap_or_else(|p| p.into_inner()) = Some(Snapshot {
            generation,
            entries: entries.clone(),
        });
        Ok(entries)
    }

    /// Score every indexed chunk against `query`, unsorted.
    pub async fn score_all(&self, store: &LocalStore, query: &[f32]) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries(store).await?;
        Ok(entries
            .iter()
            .map(|(chunk, embedding)| ScoredChunk {
                chunk: chunk.clone(),
                score: cosine_similarity(query, embedding),
                origin: Origin::Local,
            })
            .collect())
    }
}
