//! Local staging area for files materialized out of archives and remote
//! stores.
//!
//! The staging directory is removed when the area is purged or dropped,
//! unless the run was configured to keep it.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::constants::PARTIAL_DOWNLOAD_SUFFIX;
use crate::error::SourceError;
use crate::security::path_validator::staging_destination;

#[derive(Debug)]
pub struct StagingArea {
    root: PathBuf,
    keep: bool,
    purged: AtomicBool,
}

impl StagingArea {
    /// Creates the staging directory.
    ///
    /// An existing directory is only accepted when it is empty, since
    /// purging removes everything under it.
    pub fn create(root: impl Into<PathBuf>, keep: bool) -> io::Result<Self> {
        let root = root.into();
        if root.exists() && fs::read_dir(&root)?.next().is_some() {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("staging directory {} is not empty", root.display()),
            ));
        }
        fs::create_dir_all(&root)?;
        debug!("Staging area ready at {}", root.display());
        Ok(Self {
            root,
            keep,
            purged: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn keeps_files(&self) -> bool {
        self.keep
    }

    /// Destination for a bundle-relative path; rejects traversal attempts.
    pub fn destination(&self, path: &str) -> Result<PathBuf, SourceError> {
        staging_destination(&self.root, path)
    }

    /// Copies `reader` to the staged location of `path`.
    ///
    /// Bytes land in a `.part` sibling first and are renamed into place once
    /// complete; the modification time is applied when known.
    pub fn materialize<R: Read>(
        &self,
        path: &str,
        reader: &mut R,
        modified: Option<DateTime<Utc>>,
    ) -> Result<PathBuf, SourceError> {
        let dest = self.destination(path)?;
        let partial = partial_path(&dest);

        let mut write = || -> io::Result<()> {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&partial)?;
            io::copy(reader, &mut out)?;
            out.sync_all()?;
            drop(out);
            fs::rename(&partial, &dest)
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&partial);
            return Err(SourceError::fetch_failed(path, e));
        }

        apply_mtime(&dest, modified);
        Ok(dest)
    }

    /// Removes the staging directory unless configured to keep it. Runs once.
    pub fn purge(&self) -> io::Result<()> {
        if self.purged.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.keep {
            debug!("Keeping staging area at {}", self.root.display());
            return Ok(());
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {
                debug!("Removed staging area {}", self.root.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = self.purge() {
            warn!("Failed to remove staging area {}: {}", self.root.display(), e);
        }
    }
}

/// `<dest>.part`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name: OsString = dest.as_os_str().to_os_string();
    name.push(PARTIAL_DOWNLOAD_SUFFIX);
    PathBuf::from(name)
}

/// Best effort; a staged file with the wrong mtime is still usable.
pub fn apply_mtime(path: &Path, modified: Option<DateTime<Utc>>) {
    let Some(modified) = modified else {
        return;
    };
    let result = OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| file.set_modified(SystemTime::from(modified)));
    if let Err(e) = result {
        debug!("Could not set mtime on {}: {}", path.display(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Cursor;
    use tempfile::TempDir;

    #[test]
    fn test_materialize_preserves_layout_and_mtime() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::create(temp_dir.path().join("data"), false).unwrap();
        let mtime = Utc.timestamp_opt(1_600_000_000, 0).unwrap();

        let dest = staging
            .materialize("a/b/c.txt", &mut Cursor::new(b"hello".to_vec()), Some(mtime))
            .unwrap();

        assert_eq!(dest, staging.root().join("a/b/c.txt"));
        assert_eq!(fs::read(&dest).unwrap(), b"hello");
        assert!(!partial_path(&dest).exists());

        let on_disk: DateTime<Utc> = fs::metadata(&dest).unwrap().modified().unwrap().into();
        assert_eq!(on_disk.timestamp(), mtime.timestamp());
    }

    #[test]
    fn test_materialize_rejects_traversal() {
        let temp_dir = TempDir::new().unwrap();
        let staging = StagingArea::create(temp_dir.path().join("data"), false).unwrap();

        let err = staging
            .materialize("../../etc/passwd", &mut Cursor::new(Vec::new()), None)
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidPath { .. }));
        assert!(!temp_dir.path().join("etc").exists());
    }

    #[test]
    fn test_drop_purges_unless_kept() {
        let temp_dir = TempDir::new().unwrap();
        let purged_root = temp_dir.path().join("purged");
        let kept_root = temp_dir.path().join("kept");

        {
            let purged = StagingArea::create(&purged_root, false).unwrap();
            purged
                .materialize("x.bin", &mut Cursor::new(vec![1, 2, 3]), None)
                .unwrap();
            let _kept = StagingArea::create(&kept_root, true).unwrap();
        }

        assert!(!purged_root.exists());
        assert!(kept_root.exists());
    }

    #[test]
    fn test_create_refuses_populated_directory() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("evidence");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("keepme.txt"), b"original").unwrap();

        let err = StagingArea::create(&root, false).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read(root.join("keepme.txt")).unwrap(), b"original");

        let empty = temp_dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();
        assert!(StagingArea::create(&empty, false).is_ok());
    }

    #[test]
    fn test_partial_path_suffix() {
        assert_eq!(
            partial_path(Path::new("/s/a/b.db")),
            PathBuf::from("/s/a/b.db.part")
        );
    }
}
