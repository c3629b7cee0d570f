use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use super::EmbeddingModel;
use crate::cache::EmbeddingCache;
use crate::config::EmbeddingsConfig;
use crate::error::{RagsyncError, Result};
use crate::ingest::Chunk;

/// A chunk that could not be embedded even on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct FailedChunk {
    pub fingerprint: String,
    pub error: String,
}

/// Result of embedding one document's chunks.
#[derive(Debug, Clone, Default)]
pub struct EmbedOutcome {
    /// (fingerprint, vector) in input order, failed chunks omitted
    pub embedded: Vec<(String, Vec<f32>)>,
    pub failed: Vec<FailedChunk>,
}

/// Batches chunk texts through an [`EmbeddingModel`].
///
/// Each batch is retried with exponential backoff while the model reports
/// transient errors. A batch that still fails is split in half and each half
/// retried, down to single chunks; a single chunk that fails is reported in
/// [`EmbedOutcome::failed`] and the rest of the document carries on. Vectors of
/// the wrong length abort the whole call with `DimensionMismatch`.
pub struct EmbeddingGenerator {
    model: Arc<dyn EmbeddingModel>,
    dimensions: usize,
    batch_size: usize,
    max_attempts: usize,
    initial_backoff: Duration,
    cache: Option<Arc<EmbeddingCache>>,
}

impl EmbeddingGenerator {
    pub fn new(
        model: Arc<dyn EmbeddingModel>,
        dimensions: usize,
        batch_size: usize,
        max_attempts: usize,
        initial_backoff: Duration,
    ) -> Self {
        Self {
            model,
            dimensions,
            batch_size: batch_size.max(1),
            max_attempts: max_attempts.max(1),
            initial_backoff,
            cache: None,
        }
    }

    pub fn from_config(model: Arc<dyn EmbeddingModel>, config: &EmbeddingsConfig) -> Self {
        Self::new(
            model,
            config.dimensions,
            config.batch_size,
            config.max_attempts,
            Duration::from_millis(config.initial_backoff_ms),
        )
        .with_cache(Arc::new(EmbeddingCache::new(config.cache_capacity)))
    }

    /// Enable caching of query embeddings
    pub fn with_cache(mut self, cache: Arc<EmbeddingCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.cache.as_ref()
    }

    /// Embed `chunks`, sequentially batch by batch.
    ///
    /// # Errors
    ///
    /// Only configuration-level failures (`DimensionMismatch`, `Config`) are
    /// returned; everything else is isolated per chunk.
    pub async fn embed_batch(&self, chunks: &[Chunk]) -> Result<EmbedOutcome> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        let mut errors: Vec<Option<String>> = vec![None; chunks.len()];

        let mut work: VecDeque<Range<usize>> = (0..chunks.len())
            .step_by(self.batch_size)
            .map(|start| start..(start + self.batch_size).min(chunks.len()))
            .collect();

        while let Some(range) = work.pop_front() {
            match self.call_with_retry(&texts[range.clone()]).await {
                Ok(batch) => {
                    for (offset, vector) in batch.into_iter().enumerate() {
                        vectors[range.start + offset] = Some(vector);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if range.len() == 1 => {
                    log::warn!(
                        "embeddings: chunk {} failed: {}",
                        chunks[range.start].fingerprint,
                        e
                    );
                    errors[range.start] = Some(e.to_string());
                }
                Err(e) => {
                    let mid = range.start + range.len() / 2;
                    log::debug!(
                        "embeddings: batch {:?} failed ({}); splitting at {}",
                        range,
                        e,
                        mid
                    );
                    work.push_front(mid..range.end);
                    work.push_front(range.start..mid);
                }
            }
        }

        let mut outcome = EmbedOutcome::default();
        for ((chunk, vector), error) in chunks.iter().zip(vectors).zip(errors) {
            match (vector, error) {
                (Some(vector), _) => outcome.embedded.push((chunk.fingerprint.clone(), vector)),
                (None, error) => outcome.failed.push(FailedChunk {
                    fingerprint: chunk.fingerprint.clone(),
                    error: error.unwrap_or_else(|| "not embedded".to_string()),
                }),
            }
        }
        Ok(outcome)
    }

    /// Embed a single query text, consulting the cache first.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.cache {
            if let Some(cached) = cache.get(text) {
                log::debug!("embeddings: cache hit for query");
                return Ok(cached);
            }
        }

        let mut batch = self.call_with_retry(&[text.to_string()]).await?;
        let embedding = batch
            .pop()
            .ok_or_else(|| RagsyncError::Embedding("Empty response from embedding model".to_string()))?;

        if let Some(cache) = &self.cache {
            cache.put(text, embedding.clone());
        }
        Ok(embedding)
    }

    /// One model call with transient-error retries; validates count and dimensionality.
    async fn call_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 1;
        let mut delay = self.initial_backoff;

        loop {
            match self.model.embed(texts).await {
                Ok(vectors) => {
                    if vectors.len() != texts.len() {
                        return Err(RagsyncError::Embedding(format!(
                            "{} returned {} vectors for {} texts",
                            self.model.name(),
                            vectors.len(),
                            texts.len()
                        )));
                    }
                    if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimensions) {
                        log::error!(
                            "embeddings: {} returned {}-dimensional vectors, configured {}",
                            self.model.name(),
                            bad.len(),
                            self.dimensions
                        );
                        return Err(RagsyncError::DimensionMismatch {
                            expected: self.dimensions,
                            actual: bad.len(),
                        });
                    }
                    return Ok(vectors);
                }
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    log::warn!(
                        "embeddings: retry {}/{} after error: {}",
                        attempt,
                        self.max_attempts - 1,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
