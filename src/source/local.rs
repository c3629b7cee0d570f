use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{Listing, SourceFile, SourceFolder};
use crate::error::{RagsyncError, Result};
use crate::ingest::metadata::compute_fingerprint;

/// Drop folder on the local filesystem.
///
/// Recursively walks the folder and keeps files whose extension is in the
/// configured allow-list (case-insensitive).
#[derive(Debug, Clone)]
pub struct LocalFolder {
    root: PathBuf,
    extensions: Vec<String>,
}

impl LocalFolder {
    pub fn new<P: AsRef<Path>>(root: P, extensions: &[String]) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            extensions: extensions.iter().map(|e| e.trim_start_matches('.').to_lowercase()).collect(),
        }
    }

    /// Walk the folder. Entries that cannot be read are reported in
    /// [`Listing::unreadable`] so they are not mistaken for deletions.
    fn discover(root: &Path, extensions: &[String]) -> Result<Listing> {
        if !root.is_dir() {
            return Err(RagsyncError::TransientIo(format!(
                "source folder unavailable: {}",
                root.display()
            )));
        }

        let mut listing = Listing::default();
        for entry in WalkDir::new(root).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let relative = e
                        .path()
                        .and_then(|p| p.strip_prefix(root).ok())
                        .map(|p| p.to_string_lossy().replace('\\', "/"))
                        .filter(|p| !p.is_empty());
                    match relative {
                        Some(relative) => {
                            log::warn!("source: cannot read {}: {}", relative, e);
                            listing.unreadable.push(relative);
                            continue;
                        }
                        None => {
                            return Err(RagsyncError::TransientIo(format!(
                                "cannot walk source folder {}: {}",
                                root.display(),
                                e
                            )))
                        }
                    }
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }

            let extension = path
                .extension()
                .and_then(|s| s.to_str())
                .unwrap_or("")
                .to_lowercase();
            if !extensions.iter().any(|e| *e == extension) {
                continue;
            }

            let relative = match path.strip_prefix(root) {
                Ok(relative) => relative.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };

            // Locked or mid-write; keep the previous generation until it reads again
            let bytes = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::warn!("source: skipping unreadable {}: {}", relative, e);
                    listing.unreadable.push(relative);
                    continue;
                }
            };
            let modified_at = std::fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .map(|t| DateTime::<Utc>::from(t).to_rfc3339());

            listing.files.push(SourceFile {
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| relative.clone()),
                fingerprint: compute_fingerprint(&bytes),
                modified_at,
                id: relative,
            });
        }

        log::debug!(
            "source: discovered {} files ({} unreadable) in {}",
            listing.files.len(),
            listing.unreadable.len(),
            root.display()
        );
        Ok(listing)
    }
}

#[async_trait]
impl SourceFolder for LocalFolder {
    async fn list(&self) -> Result<Listing> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        tokio::task::spawn_blocking(move || Self::discover(&root, &extensions))
            .await
            .map_err(|e| RagsyncError::TransientIo(format!("listing task failed: {}", e)))?
    }

    async fn fetch(&self, id: &str) -> Result<Vec<u8>> {
        let relative = Path::new(id);
        if relative.is_absolute() || relative.components().any(|c| matches!(c, std::path::Component::ParentDir)) {
            return Err(RagsyncError::InvalidInput(format!("source id escapes folder: {}", id)));
        }
        tokio::fs::read(self.root.join(relative))
            .await
            .map_err(|e| RagsyncError::TransientIo(format!("fetch {}: {}", id, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn extensions() -> Vec<String> {
        vec!["md".to_string(), "txt".to_string(), "PDF".to_string()]
    }

    #[tokio::test]
    async fn test_list_filters_extensions() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("acts/2020")).unwrap();
        fs::write(root.join("README.md"), "# Docs").unwrap();
        fs::write(root.join("notes.txt"), "plain text note").unwrap();
        fs::write(root.join("acts/2020/Cyber_Act.pdf"), b"%PDF-1.4").unwrap();
        fs::write(root.join("image.png"), b"\x89PNG\r\n\x1a\n").unwrap();

        let folder = LocalFolder::new(root, &extensions());
        let listing = folder.list().await.unwrap();
        assert!(listing.unreadable.is_empty());
        let files = listing.files;

        assert_eq!(files.len(), 3);
        let pdf = files.iter().find(|f| f.id == "acts/2020/Cyber_Act.pdf").unwrap();
        assert_eq!(pdf.name, "Cyber_Act.pdf");
        assert_eq!(pdf.fingerprint, compute_fingerprint(b"%PDF-1.4"));
        assert!(pdf.modified_at.is_some());
        assert!(!files.iter().any(|f| f.id.contains("image.png")));
    }

    #[tokio::test]
    async fn test_fetch_reads_bytes_and_rejects_escape() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "alpha").unwrap();
        let folder = LocalFolder::new(temp_dir.path(), &extensions());

        assert_eq!(folder.fetch("a.txt").await.unwrap(), b"alpha".to_vec());
        assert!(folder.fetch("missing.txt").await.unwrap_err().is_transient());
        assert!(matches!(
            folder.fetch("../etc/passwd").await,
            Err(RagsyncError::InvalidInput(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_broken_entry_is_reported_unreadable() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("a.txt"), "alpha").unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("nowhere.txt"), temp_dir.path().join("b.txt")).unwrap();

        let listing = LocalFolder::new(temp_dir.path(), &extensions()).list().await.unwrap();
        assert_eq!(listing.files.len(), 1);
        assert_eq!(listing.files[0].id, "a.txt");
        assert!(listing.is_unreadable("b.txt"));
    }

    #[tokio::test]
    async fn test_missing_root_is_transient() {
        let temp_dir = TempDir::new().unwrap();
        let folder = LocalFolder::new(temp_dir.path().join("gone"), &extensions());
        assert!(folder.list().await.unwrap_err().is_transient());
    }
}
