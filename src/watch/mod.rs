//! Polling change detection over the source folder.
//!
//! `scan` diffs the current listing against the persisted cursor and has no side
//! effects. The cursor only advances through `commit`, called with the events
//! that were actually handed off, so a crash in between re-delivers them.

pub mod cursor;

pub use cursor::{CursorEntry, IngestionCursor};

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;
use crate::source::{Listing, SourceFile, SourceFolder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// A detected difference between the folder and the cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub file: SourceFile,
}

/// Owns the ingestion cursor for one source folder.
pub struct SourceWatcher {
    source: Arc<dyn SourceFolder>,
    cursor_path: Option<PathBuf>,
    cursor: IngestionCursor,
}

impl SourceWatcher {
    /// Watcher whose cursor is loaded from and persisted to `cursor_path`.
    pub fn new(source: Arc<dyn SourceFolder>, cursor_path: PathBuf) -> Result<Self> {
        let cursor = IngestionCursor::load(&cursor_path)?;
        log::info!(
            "watch: loaded cursor {} ({} known files)",
            cursor_path.display(),
            cursor.len()
        );
        Ok(Self {
            source,
            cursor_path: Some(cursor_path),
            cursor,
        })
    }

    /// Watcher with a caller-supplied cursor that is never written to disk.
    pub fn with_cursor(source: Arc<dyn SourceFolder>, cursor: IngestionCursor) -> Self {
        Self {
            source,
            cursor_path: None,
            cursor,
        }
    }

    pub fn source(&self) -> Arc<dyn SourceFolder> {
        Arc::clone(&self.source)
    }

    pub fn cursor(&self) -> &IngestionCursor {
        &self.cursor
    }

    /// List the folder and report Added, Modified and Removed files.
    pub async fn scan(&self) -> Result<Vec<ChangeEvent>> {
        let listing = self.source.list().await?;
        Ok(diff(&self.cursor, listing))
    }

    /// Advance the cursor past `delivered` events and persist it.
    pub fn commit(&mut self, delivered: &[ChangeEvent]) -> Result<()> {
        if delivered.is_empty() {
            return Ok(());
        }

        let mut next = self.cursor.clone();
        for event in delivered {
            match event.kind {
                ChangeKind::Added | ChangeKind::Modified => {
                    next.files.insert(
                        event.file.id.clone(),
                        CursorEntry {
                            name: event.file.name.clone(),
                            fingerprint: event.file.fingerprint.clone(),
                        },
                    );
                }
                ChangeKind::Removed => {
                    next.files.remove(&event.file.id);
                }
            }
        }
        next.updated_at = Some(chrono::Utc::now().to_rfc3339());

        if let Some(path) = &self.cursor_path {
            next.persist(path)?;
        }
        self.cursor = next;
        Ok(())
    }
}

/// Known files missing from the listing are Removed unless the listing marks
/// them unreadable; those keep their last generation until the next scan.
fn diff(cursor: &IngestionCursor, listing: Listing) -> Vec<ChangeEvent> {
    let mut current: BTreeMap<String, SourceFile> = BTreeMap::new();
    for file in listing.files.iter().cloned() {
        current.entry(file.id.clone()).or_insert(file);
    }

    let mut events = Vec::new();
    for file in current.values() {
        let kind = match cursor.get(&file.id) {
            None => ChangeKind::Added,
            Some(known) if known.fingerprint != file.fingerprint => ChangeKind::Modified,
            Some(_) => continue,
        };
        events.push(ChangeEvent {
            kind,
            file: file.clone(),
        });
    }

    let present: HashSet<&String> = current.keys().collect();
    for (id, entry) in &cursor.files {
        if present.contains(id) {
            continue;
        }
        if listing.is_unreadable(id) {
            log::debug!("watch: {} unreadable this scan, not treated as removed", id);
            continue;
        }
        events.push(ChangeEvent {
            kind: ChangeKind::Removed,
            file: SourceFile {
                id: id.clone(),
                name: entry.name.clone(),
                fingerprint: entry.fingerprint.clone(),
                modified_at: None,
            },
        });
    }
    events
}
