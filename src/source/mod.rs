//! Source collaborator: lists the external drop folder and fetches file bytes.

mod local;

pub use local::LocalFolder;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::error::{RagsyncError, Result};
use crate::ingest::metadata::compute_fingerprint;

/// One file as seen in the external folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Stable identifier (path relative to the folder root, `/`-separated)
    pub id: String,
    pub name: String,
    /// SHA-256 of the file bytes
    pub fingerprint: String,
    pub modified_at: Option<String>,
}

impl SourceFile {
    /// Lowercased extension of the display name, empty if none.
    pub fn extension(&self) -> String {
        std::path::Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }
}

/// One pass over the folder.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub files: Vec<SourceFile>,
    /// Paths (files or whole directories, relative to the root) that exist but
    /// could not be read during this pass
    pub unreadable: Vec<String>,
}

impl Listing {
    /// Whether `id` was hidden from this pass by a read error rather than absent.
    pub fn is_unreadable(&self, id: &str) -> bool {
        self.unreadable.iter().any(|path| {
            id == path
                || id
                    .strip_prefix(path.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

/// External folder listing and fetch.
#[async_trait]
pub trait SourceFolder: Send + Sync {
    /// Current listing with content fingerprints.
    async fn list(&self) -> Result<Listing>;

    /// Raw bytes of a listed file.
    async fn fetch(&self, id: &str) -> Result<Vec<u8>>;
}

/// In-memory folder, mutated directly by callers.
#[derive(Debug, Default)]
pub struct StaticSource {
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    unreadable: Mutex<BTreeSet<String>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file.
    pub fn put(&self, id: &str, bytes: impl Into<Vec<u8>>) {
        if let Ok(mut files) = self.files.lock() {
            files.insert(id.to_string(), bytes.into());
        }
    }

    pub fn remove(&self, id: &str) {
        if let Ok(mut files) = self.files.lock() {
            files.remove(id);
        }
    }

    /// Keep `id` in the folder but fail every read of it, like a locked file.
    pub fn set_unreadable(&self, id: &str, unreadable: bool) {
        if let Ok(mut set) = self.unreadable.lock() {
            if unreadable {
                set.insert(id.to_string());
            } else {
                set.remove(id);
            }
        }
    }

    fn snapshot(&self) -> Result<(BTreeMap<String, Vec<u8>>, BTreeSet<String>)> {
        let files = self
            .files
            .lock()
            .map(|files| files.clone())
            .map_err(|_| RagsyncError::TransientIo("static source lock poisoned".into()))?;
        let unreadable = self
            .unreadable
            .lock()
            .map(|set| set.clone())
            .map_err(|_| RagsyncError::TransientIo("static source lock poisoned".into()))?;
        Ok((files, unreadable))
    }
}

#[async_trait]
impl SourceFolder for StaticSource {
    async fn list(&self) -> Result<Listing> {
        let (files, unreadable) = self.snapshot()?;
        Ok(Listing {
            files: files
                .into_iter()
                .filter(|(id, _)| !unreadable.contains(id))
                .map(|(id, bytes)| SourceFile {
                    name: id.rsplit('/').next().unwrap_or(&id).to_string(),
                    fingerprint: compute_fingerprint(&bytes),
                    modified_at: None,
                    id,
                })
                .collect(),
            unreadable: unreadable.into_iter().collect(),
        })
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let (mut files, unreadable) = self.snapshot()?;
        if unreadable.contains(id) {
            return Err(RagsyncError::TransientIo(format!("{} is locked", id)));
        }
        files
            .remove(id)
            .ok_or_else(|| RagsyncError::TransientIo(format!("{} disappeared before fetch", id)))
    }
}
