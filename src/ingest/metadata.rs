use regex::Regex;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::OnceLock;

use super::Metadata;

/// Category assigned when no configured keyword matches the file name.
pub const DEFAULT_CATEGORY: &str = "General";

static YEAR_PATTERN: OnceLock<Regex> = OnceLock::new();
static SECTION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn year_regex() -> &'static Regex {
    YEAR_PATTERN.get_or_init(|| Regex::new(r"(\d{4})").expect("Invalid regex pattern"))
}

fn section_regex() -> &'static Regex {
    SECTION_PATTERN.get_or_init(|| Regex::new(r"Section\s+\d+").expect("Invalid regex pattern"))
}

/// SHA-256 hex digest of raw bytes
pub fn compute_fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Derives document-level metadata from a file name and its extracted text.
#[derive(Debug, Clone, Default)]
pub struct MetadataExtractor {
    /// Lowercase keyword -> category label; first match in key order wins.
    categories: BTreeMap<String, String>,
}

impl MetadataExtractor {
    pub fn new(categories: BTreeMap<String, String>) -> Self {
        let categories = categories
            .into_iter()
            .map(|(keyword, label)| (keyword.to_lowercase(), label))
            .collect();
        Self { categories }
    }

    /// Year (first 4-digit run) and category guessed from the file name.
    pub fn from_name(&self, name: &str) -> Metadata {
        let lower = name.to_lowercase();
        let year = year_regex()
            .captures(name)
            .and_then(|cap| cap.get(1))
            .and_then(|m| m.as_str().parse::<u32>().ok());
        let category = self
            .categories
            .iter()
            .find(|(keyword, _)| lower.contains(keyword.as_str()))
            .map(|(_, label)| label.as_str())
            .unwrap_or(DEFAULT_CATEGORY);

        let mut metadata = Metadata::new();
        metadata.insert("source_name".into(), json!(name));
        metadata.insert("year".into(), year.map(Value::from).unwrap_or(Value::Null));
        metadata.insert("category".into(), json!(category));
        metadata
    }

    /// Structural counts over the extracted text.
    pub fn from_content(&self, text: &str) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert("total_sections".into(), json!(section_regex().find_iter(text).count()));
        metadata.insert("total_words".into(), json!(text.split_whitespace().count()));
        metadata
    }

    /// Both name and content metadata merged into one map.
    pub fn extract(&self, name: &str, text: &str) -> Metadata {
        let mut metadata = self.from_name(name);
        metadata.extend(self.from_content(text));
        metadata
    }
}
