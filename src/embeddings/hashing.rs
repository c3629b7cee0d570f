use async_trait::async_trait;

use super::EmbeddingModel;
use crate::error::Result;

/// Deterministic offline model: bytes hashed into slots, then L2-normalised.
///
/// Identical texts always map to identical vectors, which is all local-only
/// deployments and tests need. Similarity is lexical at best.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimensions: usize,
}

impl HashEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn encode(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; self.dimensions];
        for (idx, byte) in text.bytes().enumerate() {
            // Mix position into the slot so anagrams differ
            let slot = (idx.wrapping_mul(31) ^ usize::from(byte)) % self.dimensions;
            embedding[slot] += f32::from(byte) / 255.0;
        }

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingModel for HashEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.encode(t)).collect())
    }
}
