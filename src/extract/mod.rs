//! Extraction collaborator: raw file bytes to an ordered sequence of text blocks.

pub mod markdown;
pub mod pdf;
pub mod plaintext;

use crate::error::{RagsyncError, Result};

/// Trait for block extractors
pub trait Extractor: Send + Sync {
    /// Check if this extractor handles the given lowercase file extension
    fn can_extract(&self, extension: &str) -> bool;

    /// Produce text blocks in document order. `name` is used in error messages.
    fn extract(&self, bytes: &[u8], name: &str) -> Result<Vec<String>>;
}

pub(crate) fn extraction_error(name: &str, reason: impl Into<String>) -> RagsyncError {
    RagsyncError::Extraction {
        source_name: name.to_string(),
        reason: reason.into(),
    }
}

/// Decode bytes as UTF-8, reporting invalid input as an extraction failure.
pub(crate) fn decode_utf8<'a>(bytes: &'a [u8], name: &str) -> Result<&'a str> {
    let text = std::str::from_utf8(bytes).map_err(|e| extraction_error(name, format!("not valid UTF-8: {}", e)))?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

/// Extractor registry that selects the extractor by file extension
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn Extractor>>,
}

impl ExtractorRegistry {
    /// Registry with the built-in Markdown, plain-text and PDF extractors
    pub fn new() -> Self {
        let mut registry = Self { extractors: Vec::new() };
        registry.register(Box::new(markdown::MarkdownExtractor));
        registry.register(Box::new(plaintext::PlainTextExtractor));
        registry.register(Box::new(pdf::PdfExtractor));
        registry
    }

    /// Register an extractor; earlier registrations take precedence.
    pub fn register(&mut self, extractor: Box<dyn Extractor>) {
        self.extractors.push(extractor);
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.extractors.iter().any(|e| e.can_extract(extension))
    }

    /// Extract the blocks of `name`, choosing the extractor from its extension.
    ///
    /// # Errors
    ///
    /// `Extraction` when no extractor handles the extension, the bytes are
    /// malformed, or the document contains no text at all.
    pub fn extract(&self, name: &str, bytes: &[u8]) -> Result<Vec<String>> {
        let extension = std::path::Path::new(name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        let extractor = self
            .extractors
            .iter()
            .find(|e| e.can_extract(&extension))
            .ok_or_else(|| extraction_error(name, format!("no extractor for extension {:?}", extension)))?;

        let blocks: Vec<String> = extractor
            .extract(bytes, name)?
            .into_iter()
            .filter(|b| !b.trim().is_empty())
            .collect();
        if blocks.is_empty() {
            return Err(extraction_error(name, "no extractable text"));
        }
        Ok(blocks)
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::new()
    }
}
