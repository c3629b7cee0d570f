use super::plaintext::split_paragraphs;
use super::{extraction_error, Extractor};
use crate::error::Result;

/// PDF extractor backed by `pdf-extract`; pages and paragraphs become blocks
pub struct PdfExtractor;

impl Extractor for PdfExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "pdf"
    }

    fn extract(&self, bytes: &[u8], name: &str) -> Result<Vec<String>> {
        if !bytes.starts_with(b"%PDF") {
            return Err(extraction_error(name, "missing %PDF header"));
        }

        // pdf-extract panics on some malformed inputs instead of returning an error
        let text = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(bytes))
            .map_err(|_| extraction_error(name, "PDF parser panicked"))?
            .map_err(|e| extraction_error(name, format!("PDF extraction failed: {}", e)))?;

        Ok(text.split('\u{c}').flat_map(split_paragraphs).collect())
    }
}
