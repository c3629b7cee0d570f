//! Embedding-model collaborator and the batching generator built on it.

pub mod generator;
pub mod hashing;
pub mod openai;

pub use generator::{EmbedOutcome, EmbeddingGenerator, FailedChunk};
pub use hashing::HashEmbedder;
pub use openai::OpenAIEmbedder;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingsConfig;
use crate::error::{RagsyncError, Result};

/// External embedding model: one vector per input text, in input order.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the model selected by `[embeddings] provider`.
pub fn model_from_config(config: &EmbeddingsConfig) -> Result<Arc<dyn EmbeddingModel>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = std::env::var(&config.api_key_env).map_err(|_| {
                RagsyncError::Config(format!("environment variable {} not set", config.api_key_env))
            })?;
            let embedder = OpenAIEmbedder::new(
                &config.base_url,
                api_key,
                config.model.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Ok(Arc::new(embedder))
        }
        "hash" => Ok(Arc::new(HashEmbedder::new(config.dimensions))),
        other => Err(RagsyncError::Config(format!("unknown embeddings provider: {}", other))),
    }
}
