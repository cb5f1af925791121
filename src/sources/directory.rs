use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use walkdir::WalkDir;

use crate::error::SourceError;
use crate::models::FileRecord;
use crate::security::path_validator::validate_relative_path;
use crate::sources::index::{build_blocking, EntryIndex, IndexedEntry, LazyIndex};
use crate::sources::{search_index, EvidenceSource, SourceKind};

/// An extracted evidence tree on local disk.
///
/// Files are served in place; nothing is copied to the staging area.
/// Symlinks are listed when they resolve to a regular file inside the
/// root and skipped otherwise; linked directories are not descended into.
pub struct DirectorySource {
    root: PathBuf,
    index: LazyIndex,
    closed: AtomicBool,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: LazyIndex::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::SourceUnavailable(format!(
                "{} has been closed",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn index(&self) -> Result<std::sync::Arc<EntryIndex>, SourceError> {
        let root = self.root.clone();
        self.index
            .get_or_build(|| build_blocking(move || enumerate(&root)))
            .await
    }
}

/// Resolved target of `link`, when it is a regular file under `canonical_root`.
fn contained_link_target(canonical_root: &Path, link: &Path) -> Option<PathBuf> {
    let target = fs::canonicalize(link).ok()?;
    (target.starts_with(canonical_root) && target.is_file()).then_some(target)
}

fn enumerate(root: &Path) -> Result<EntryIndex, SourceError> {
    if !root.is_dir() {
        return Err(SourceError::SourceUnavailable(format!(
            "{} is not a readable directory",
            root.display()
        )));
    }
    let canonical_root = fs::canonicalize(root).map_err(|e| {
        SourceError::SourceUnavailable(format!("cannot resolve {}: {}", root.display(), e))
    })?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        let metadata = if entry.file_type().is_file() {
            entry.metadata().map_err(io::Error::from)
        } else if entry.file_type().is_symlink() {
            match contained_link_target(&canonical_root, entry.path()) {
                Some(target) => fs::metadata(target),
                None => {
                    debug!("Skipping symlink {}: target is not a file under the root", entry.path().display());
                    continue;
                }
            }
        } else {
            continue;
        };

        let relative = match entry.path().strip_prefix(root) {
            Ok(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => continue,
        };
        let path = match validate_relative_path(&relative) {
            Ok(path) => path,
            Err(e) => {
                debug!("Ignoring {}: {}", relative, e);
                continue;
            }
        };

        let record = match metadata {
            Ok(meta) => FileRecord::new(path.clone())
                .with_size(meta.len())
                .with_modified(meta.modified().ok().map(DateTime::<Utc>::from))
                .with_created(meta.created().ok().map(DateTime::<Utc>::from)),
            Err(e) => {
                warn!("Could not read metadata for {}: {}", entry.path().display(), e);
                FileRecord::new(path.clone())
            }
        };

        entries.push(IndexedEntry {
            record,
            member: relative,
            ordinal: entries.len(),
        });
    }

    Ok(EntryIndex::from_entries(entries))
}

#[async_trait]
impl EvidenceSource for DirectorySource {
    fn kind(&self) -> SourceKind {
        SourceKind::Directory
    }

    fn describe(&self) -> String {
        format!("directory {}", self.root.display())
    }

    async fn prepare(&self) -> Result<(), SourceError> {
        self.ensure_open()?;
        self.index().await.map(|_| ())
    }

    async fn search(&self, pattern: &str) -> Result<Vec<FileRecord>, SourceError> {
        self.ensure_open()?;
        let index = self.index().await?;
        search_index(&index, pattern)
    }

    async fn fetch(&self, path: &str) -> Result<PathBuf, SourceError> {
        self.ensure_open()?;
        let normalized = validate_relative_path(path)?;
        let index = self.index().await?;
        let entry = index
            .get(&normalized)
            .ok_or_else(|| SourceError::NotFound(path.to_string()))?;

        let local = entry
            .member
            .split('/')
            .fold(self.root.clone(), |acc, segment| acc.join(segment));
        if !local.is_file() {
            return Err(SourceError::fetch_failed(path, "file no longer exists on disk"));
        }
        if local.is_symlink() {
            let contained = fs::canonicalize(&self.root)
                .ok()
                .and_then(|root| contained_link_target(&root, &local));
            if contained.is_none() {
                return Err(SourceError::invalid_path(path, "symlink resolves outside the evidence root"));
            }
        }
        Ok(local)
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        self.index.reset().await;
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_evidence_tree;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_search_and_fetch_in_place() {
        let temp_dir = TempDir::new().unwrap();
        create_test_evidence_tree(temp_dir.path()).unwrap();
        let source = DirectorySource::new(temp_dir.path());

        let dbs = source.search("*.db").await.unwrap();
        let paths: Vec<_> = dbs.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "data/com.android.chrome/History.db",
                "private/var/mobile/Library/SMS/sms.db"
            ]
        );
        assert!(dbs.iter().all(|r| r.size.is_some() && r.modified_time.is_some()));

        let local = source.fetch("private/var/mobile/Library/SMS/sms.db").await.unwrap();
        assert!(local.starts_with(temp_dir.path()));
    }

    #[tokio::test]
    async fn test_fetch_unknown_and_traversal() {
        let temp_dir = TempDir::new().unwrap();
        create_test_evidence_tree(temp_dir.path()).unwrap();
        let source = DirectorySource::new(temp_dir.path());

        assert!(matches!(
            source.fetch("missing.db").await,
            Err(SourceError::NotFound(_))
        ));
        assert!(matches!(
            source.fetch("../outside.txt").await,
            Err(SourceError::InvalidPath { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_inside_root_are_listed() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("evidence");
        create_test_evidence_tree(&root).unwrap();
        fs::write(temp_dir.path().join("outside.txt"), b"host file").unwrap();
        std::os::unix::fs::symlink(root.join("notes.txt"), root.join("notes-link.txt")).unwrap();
        std::os::unix::fs::symlink(temp_dir.path().join("outside.txt"), root.join("escape.txt")).unwrap();
        std::os::unix::fs::symlink(root.join("data"), root.join("data-link")).unwrap();

        let source = DirectorySource::new(&root);
        let txt: Vec<_> = source
            .search("*.txt")
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(txt, vec!["notes-link.txt", "notes.txt"]);
        assert!(source.search("data-link/*").await.unwrap().is_empty());

        let local = source.fetch("notes-link.txt").await.unwrap();
        assert_eq!(fs::read(local).unwrap(), b"examiner notes");
        assert!(matches!(
            source.fetch("escape.txt").await,
            Err(SourceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let source = DirectorySource::new("/nonexistent/evidence/root");
        assert!(matches!(
            source.search("*").await,
            Err(SourceError::SourceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_operations_after_close_fail() {
        let temp_dir = TempDir::new().unwrap();
        let source = DirectorySource::new(temp_dir.path());
        source.close().await.unwrap();
        source.close().await.unwrap();
        assert!(matches!(
            source.search("*").await,
            Err(SourceError::SourceUnavailable(_))
        ));
    }
}
