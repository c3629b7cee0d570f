use serde::Serialize;
use std::cmp::Ordering;

use crate::ingest::Chunk;

/// Which store a result was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Local,
    Remote,
}

/// A chunk with its similarity to the query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
    pub origin: Origin,
}

/// Compute cosine similarity between two vectors
///
/// # Returns
///
/// Similarity in [-1.0, 1.0]; 0.0 if either vector has zero magnitude or the
/// lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

/// Score descending, ties broken by fingerprint ascending.
pub fn compare_ranked(a: &ScoredChunk, b: &ScoredChunk) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.chunk.fingerprint.cmp(&b.chunk.fingerprint))
}

/// Sort deterministically, drop results under `min_score`, keep the top `k`.
pub fn rank(mut results: Vec<ScoredChunk>, k: usize, min_score: Option<f32>) -> Vec<ScoredChunk> {
    if let Some(min) = min_score {
        results.retain(|r| r.score >= min);
    }
    results.sort_by(compare_ranked);
    results.truncate(k);
    results
}
