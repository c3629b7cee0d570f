//! Persisted record of the last-seen folder listing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// What the cursor remembers about one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorEntry {
    pub name: String,
    pub fingerprint: String,
}

/// Last-seen fingerprint per source id.
///
/// Loaded once when the watcher starts and rewritten with write-temp, fsync,
/// rename after every commit, so a crash leaves either the old or the new file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionCursor {
    #[serde(default)]
    pub files: BTreeMap<String, CursorEntry>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl IngestionCursor {
    /// Read the cursor at `path`. A missing file is an empty cursor; an unreadable
    /// one is logged and also treated as empty, which re-delivers every file once.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(cursor) => Ok(cursor),
            Err(e) => {
                log::warn!(
                    "watch: cursor {} is corrupt ({}); starting from an empty cursor",
                    path.display(),
                    e
                );
                Ok(Self::default())
            }
        }
    }

    /// Atomically replace the file at `path` with this cursor.
    pub fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = temp_path(path);
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(self)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&CursorEntry> {
        self.files.get(id)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "cursor".into());
    name.push(".tmp");
    path.with_file_name(name)
}
