use regex::Regex;
use std::sync::OnceLock;

use super::{decode_utf8, Extractor};
use crate::error::Result;

static PARAGRAPH_BREAK: OnceLock<Regex> = OnceLock::new();

/// Plain text extractor: one block per blank-line separated paragraph
pub struct PlainTextExtractor;

/// Collapse runs of whitespace to single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split on blank lines (lines holding only whitespace count as blank).
pub fn split_paragraphs(text: &str) -> Vec<String> {
    let pattern = PARAGRAPH_BREAK.get_or_init(|| Regex::new(r"\n[ \t\r\f]*\n").expect("Invalid regex pattern"));
    pattern
        .split(&text.replace("\r\n", "\n"))
        .map(clean_text)
        .filter(|p| !p.is_empty())
        .collect()
}

impl Extractor for PlainTextExtractor {
    fn can_extract(&self, extension: &str) -> bool {
        extension == "txt" || extension == "text"
    }

    fn extract(&self, bytes: &[u8], name: &str) -> Result<Vec<String>> {
        let text = decode_utf8(bytes, name)?;
        Ok(split_paragraphs(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RagsyncError;

    #[test]
    fn test_paragraphs_are_cleaned() {
        let blocks = PlainTextExtractor
            .extract(b"  First   line\nwraps here.\r\n\r\nSecond\t para.\n \n\nThird", "a.txt")
            .unwrap();
        assert_eq!(blocks, vec!["First line wraps here.", "Second para.", "Third"]);
    }

    #[test]
    fn test_invalid_utf8() {
        let err = PlainTextExtractor.extract(&[0xff, 0xfe, 0x00], "bad.txt").unwrap_err();
        assert!(matches!(err, RagsyncError::Extraction { .. }));
    }

    #[test]
    fn test_clean_text() {
        assert_eq!(clean_text("  a \n\t b  "), "a b");
    }
}
