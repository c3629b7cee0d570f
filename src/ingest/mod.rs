pub mod chunker;
pub mod metadata;

pub use chunker::{chunk_fingerprint, pack_blocks, PackedChunk};
pub use metadata::{compute_fingerprint, MetadataExtractor};

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{RagsyncError, Result};
use crate::extract::ExtractorRegistry;
use crate::source::SourceFile;

/// Free-form metadata attached to documents and chunks
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Unit of retrievable text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// SHA-256 over (source id, source fingerprint, index, text); unique within the store
    pub fingerprint: String,
    pub source_id: String,
    /// Fingerprint of the source file generation this chunk came from
    pub source_fingerprint: String,
    pub index: usize,
    pub text: String,
    pub char_start: usize,
    pub char_end: usize,
    pub metadata: Metadata,
}

/// Output of processing one source file generation
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    /// The file as processed; `fingerprint` is recomputed from the fetched bytes
    pub file: SourceFile,
    pub chunks: Vec<Chunk>,
    pub metadata: Metadata,
}

/// Turns a source file's bytes into ordered, fingerprinted chunks.
#[derive(Clone)]
pub struct DocumentProcessor {
    registry: Arc<ExtractorRegistry>,
    metadata: Arc<MetadataExtractor>,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl DocumentProcessor {
    pub fn new(
        registry: ExtractorRegistry,
        metadata: MetadataExtractor,
        chunk_size: usize,
        chunk_overlap: usize,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            metadata: Arc::new(metadata),
            chunk_size,
            chunk_overlap,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ExtractorRegistry::new(),
            MetadataExtractor::new(config.metadata.categories.clone()),
            config.chunking.chunk_size_chars,
            config.chunking.chunk_overlap_chars,
        )
    }

    /// Extract and chunk on the blocking pool.
    ///
    /// # Errors
    ///
    /// `Extraction` if the bytes cannot be turned into text blocks.
    pub async fn process(&self, file: &SourceFile, bytes: Vec<u8>) -> Result<ProcessedDocument> {
        let processor = self.clone();
        let file = file.clone();
        tokio::task::spawn_blocking(move || processor.process_bytes(&file, &bytes))
            .await
            .map_err(|e| RagsyncError::Extraction {
                source_name: "extraction task".into(),
                reason: e.to_string(),
            })?
    }

    /// Synchronous core of [`process`](Self::process).
    pub fn process_bytes(&self, file: &SourceFile, bytes: &[u8]) -> Result<ProcessedDocument> {
        let fingerprint = compute_fingerprint(bytes);
        if fingerprint != file.fingerprint {
            log::debug!(
                "ingest: {} changed between listing and fetch; using fetched content",
                file.id
            );
        }

        let blocks = self.registry.extract(&file.name, bytes)?;
        let metadata = self.metadata.extract(&file.name, &blocks.join("\n\n"));

        let chunks: Vec<Chunk> = pack_blocks(&blocks, self.chunk_size, self.chunk_overlap)
            .into_iter()
            .map(|packed| Chunk {
                fingerprint: chunk_fingerprint(&file.id, &fingerprint, packed.index, &packed.text),
                source_id: file.id.clone(),
                source_fingerprint: fingerprint.clone(),
                index: packed.index,
                text: packed.text,
                char_start: packed.char_start,
                char_end: packed.char_end,
                metadata: metadata.clone(),
            })
            .collect();

        log::debug!(
            "ingest: {} -> {} blocks, {} chunks",
            file.id,
            blocks.len(),
            chunks.len()
        );

        Ok(ProcessedDocument {
            file: SourceFile {
                fingerprint,
                ..file.clone()
            },
            chunks,
            metadata,
        })
    }
}
