//! Remote vector store collaborator.
//!
//! Points are keyed by chunk fingerprint, so re-uploading a chunk overwrites
//! it in place and never creates a duplicate.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryRemoteStore;
pub use qdrant::QdrantStore;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::ingest::Chunk;

/// A chunk and its vector as uploaded.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePoint {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A scored chunk returned by a remote query.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Make sure the target collection exists with `dimensions`-sized vectors.
    async fn ensure_ready(&self, dimensions: usize) -> Result<()>;

    /// Insert or overwrite one point, keyed by chunk fingerprint.
    async fn upsert(&self, point: &RemotePoint) -> Result<()>;

    /// Remove points by chunk fingerprint. Unknown fingerprints are ignored.
    async fn delete(&self, fingerprints: &[String]) -> Result<()>;

    /// Top `k` points by similarity to `vector`.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<RemoteHit>>;
}

/// Build the remote store when `[remote] enabled = true`.
pub fn remote_from_config(config: &Config) -> Result<Option<Arc<dyn RemoteStore>>> {
    if !config.remote.enabled {
        return Ok(None);
    }
    let store = QdrantStore::new(
        &config.remote.url,
        &config.remote.collection,
        config.remote_api_key(),
        Duration::from_secs(config.remote.timeout_secs),
    )?;
    Ok(Some(Arc::new(store)))
}
