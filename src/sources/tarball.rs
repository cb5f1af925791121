use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use flate2::read::GzDecoder;
use log::{debug, warn};
use tar::Archive;
use tokio::sync::Mutex;

use crate::error::SourceError;
use crate::models::FileRecord;
use crate::security::path_validator::validate_relative_path;
use crate::sources::cache::OnceMap;
use crate::sources::index::{build_blocking, EntryIndex, IndexedEntry, LazyIndex};
use crate::sources::staging::StagingArea;
use crate::sources::{search_index, EvidenceSource, SourceKind};

/// A tar archive, plain or gzip-compressed.
///
/// Tar has no central directory, so extraction streams the archive from
/// the start. `prefetch` stages a whole batch in one pass; extractions run
/// one at a time. When several members share a path the last one wins, as
/// it would when unpacking the archive.
pub struct TarSource {
    archive_path: PathBuf,
    gzip: bool,
    staging: Arc<StagingArea>,
    index: LazyIndex,
    staged: OnceMap<PathBuf>,
    /// Members staged by `prefetch` and not yet claimed by `fetch`. The
    /// lock is held for the duration of every extraction.
    extracted: Mutex<HashMap<String, PathBuf>>,
    closed: AtomicBool,
}

impl TarSource {
    pub fn new(archive_path: impl Into<PathBuf>, staging: Arc<StagingArea>, gzip: bool) -> Self {
        Self {
            archive_path: archive_path.into(),
            gzip,
            staging,
            index: LazyIndex::new(),
            staged: OnceMap::new(),
            extracted: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::SourceUnavailable(format!(
                "{} has been closed",
                self.archive_path.display()
            )));
        }
        Ok(())
    }

    async fn index(&self) -> Result<Arc<EntryIndex>, SourceError> {
        let path = self.archive_path.clone();
        let gzip = self.gzip;
        self.index
            .get_or_build(|| build_blocking(move || enumerate(&path, gzip)))
            .await
    }

    /// Streams the archive once on the blocking pool, staging `wanted`.
    async fn extract_batch(
        &self,
        wanted: BTreeMap<usize, IndexedEntry>,
    ) -> io::Result<Vec<(String, Result<PathBuf, SourceError>)>> {
        let archive_path = self.archive_path.clone();
        let gzip = self.gzip;
        let staging = Arc::clone(&self.staging);
        tokio::task::spawn_blocking(move || extract_members(&archive_path, gzip, &staging, &wanted))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }

    /// Number of members handed out by `fetch` so far.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}

fn open_archive(path: &Path, gzip: bool) -> io::Result<Archive<Box<dyn Read>>> {
    let reader = BufReader::new(File::open(path)?);
    let stream: Box<dyn Read> = if gzip {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };
    Ok(Archive::new(stream))
}

fn unavailable(archive: &Path, reason: impl std::fmt::Display) -> SourceError {
    SourceError::SourceUnavailable(format!("cannot read tar {}: {}", archive.display(), reason))
}

fn enumerate(archive_path: &Path, gzip: bool) -> Result<EntryIndex, SourceError> {
    let mut archive = open_archive(archive_path, gzip).map_err(|e| unavailable(archive_path, e))?;
    let members = archive.entries().map_err(|e| unavailable(archive_path, e))?;

    let mut entries = Vec::new();
    for (ordinal, member) in members.enumerate() {
        let member = member.map_err(|e| unavailable(archive_path, e))?;
        let header = member.header();
        if !header.entry_type().is_file() {
            continue;
        }

        let name = match member.path() {
            Ok(p) => p.to_string_lossy().to_string(),
            Err(e) => {
                warn!("Skipping tar member with unreadable name: {}", e);
                continue;
            }
        };
        let path = match validate_relative_path(&name) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping tar member {}: {}", name, e);
                continue;
            }
        };

        let modified = header
            .mtime()
            .ok()
            .and_then(|secs| Utc.timestamp_opt(secs as i64, 0).single());

        entries.push(IndexedEntry {
            record: FileRecord::new(path)
                .with_size(header.size().unwrap_or(0))
                .with_modified(modified),
            member: name,
            ordinal,
        });
    }

    // The index keeps the first entry per path; reversed, that is the
    // member written last.
    entries.reverse();
    Ok(EntryIndex::from_entries(entries))
}

/// Stages every member in `wanted` (keyed by ordinal) and stops reading
/// after the last one.
///
/// Per-member failures are returned alongside the successes; an error
/// reading the stream itself fails the whole batch.
fn extract_members(
    archive_path: &Path,
    gzip: bool,
    staging: &StagingArea,
    wanted: &BTreeMap<usize, IndexedEntry>,
) -> io::Result<Vec<(String, Result<PathBuf, SourceError>)>> {
    let Some(&last) = wanted.keys().next_back() else {
        return Ok(Vec::new());
    };

    let mut archive = open_archive(archive_path, gzip)?;
    let mut staged = Vec::with_capacity(wanted.len());
    for (ordinal, member) in archive.entries()?.enumerate() {
        let mut member = member?;
        if let Some(entry) = wanted.get(&ordinal) {
            let path = entry.record.path.clone();
            let result = staging.materialize(&path, &mut member, entry.record.modified_time);
            staged.push((path, result));
        }
        if ordinal >= last {
            break;
        }
    }
    Ok(staged)
}

#[async_trait]
impl EvidenceSource for TarSource {
    fn kind(&self) -> SourceKind {
        if self.gzip {
            SourceKind::GzipTar
        } else {
            SourceKind::Tar
        }
    }

    fn describe(&self) -> String {
        let label = if self.gzip { "gzip tar archive" } else { "tar archive" };
        format!("{} {}", label, self.archive_path.display())
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
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))?;

        self.staged
            .get_or_try_init(&normalized, || async {
                let mut extracted = self.extracted.lock().await;
                if let Some(local) = extracted.remove(&normalized) {
                    return Ok(local);
                }

                debug!("Extracting {} from tar", entry.record.path);
                let path = entry.record.path.clone();
                let wanted = BTreeMap::from([(entry.ordinal, entry)]);
                let staged = self
                    .extract_batch(wanted)
                    .await
                    .map_err(|e| SourceError::fetch_failed(&path, e))?;
                drop(extracted);

                staged
                    .into_iter()
                    .next()
                    .map(|(_, result)| result)
                    .unwrap_or_else(|| Err(SourceError::fetch_failed(&path, "member disappeared from archive")))
            })
            .await
    }

    async fn prefetch(&self, paths: &[String]) -> Result<(), SourceError> {
        self.ensure_open()?;
        let index = self.index().await?;
        let mut extracted = self.extracted.lock().await;

        let wanted: BTreeMap<usize, IndexedEntry> = paths
            .iter()
            .filter_map(|p| validate_relative_path(p).ok())
            .filter(|p| self.staged.get(p).is_none() && !extracted.contains_key(p))
            .filter_map(|p| index.get(&p).cloned())
            .map(|entry| (entry.ordinal, entry))
            .collect();
        if wanted.len() < 2 {
            return Ok(());
        }

        debug!("Extracting {} members from tar in one pass", wanted.len());
        let staged = match self.extract_batch(wanted).await {
            Ok(staged) => staged,
            Err(e) => {
                warn!("Batch extraction from {} failed: {}", self.archive_path.display(), e);
                return Ok(());
            }
        };
        for (path, result) in staged {
            match result {
                Ok(local) => {
                    extracted.insert(path, local);
                }
                Err(e) => debug!("Leaving {} for a later fetch: {}", path, e),
            }
        }
        Ok(())
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        self.index.reset().await;
        self.staged.clear();
        self.extracted.lock().await.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.staged.clear();
        self.extracted.lock().await.clear();
        self.staging
            .purge()
            .map_err(|e| SourceError::SourceUnavailable(format!("failed to purge staging area: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{create_test_tar, EVIDENCE_FILES};
    use tempfile::TempDir;

    async fn fixture(gzip: bool) -> (TempDir, TarSource) {
        let temp_dir = TempDir::new().unwrap();
        let name = if gzip { "evidence.tar.gz" } else { "evidence.tar" };
        let archive = temp_dir.path().join(name);
        create_test_tar(&archive, EVIDENCE_FILES, gzip).unwrap();
        let staging = Arc::new(StagingArea::create(temp_dir.path().join("data"), false).unwrap());
        let source = TarSource::new(&archive, staging, gzip);
        (temp_dir, source)
    }

    #[tokio::test]
    async fn test_tar_search_reports_header_metadata() {
        let (_dir, source) = fixture(false).await;
        let hits = source.search("*/SMS/sms.db").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].size, Some(19));
        assert_eq!(hits[0].modified_time.unwrap().timestamp(), 1_623_760_200);
        assert_eq!(source.kind(), SourceKind::Tar);
    }

    #[tokio::test]
    async fn test_gzip_tar_fetch_is_idempotent() {
        let (_dir, source) = fixture(true).await;
        assert_eq!(source.kind(), SourceKind::GzipTar);

        let first = source.fetch("notes.txt").await.unwrap();
        let second = source.fetch("notes.txt").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(&first).unwrap(), b"examiner notes");
        assert_eq!(source.staged_count(), 1);

        let mtime: chrono::DateTime<Utc> = std::fs::metadata(&first).unwrap().modified().unwrap().into();
        assert_eq!(mtime.timestamp(), 1_623_760_200);
    }

    #[tokio::test]
    async fn test_truncated_gzip_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.tar.gz");
        std::fs::write(&archive, b"this is not gzip data at all").unwrap();
        let staging = Arc::new(StagingArea::create(temp_dir.path().join("data"), false).unwrap());
        let source = TarSource::new(&archive, staging, true);

        assert!(matches!(
            source.search("*").await,
            Err(SourceError::SourceUnavailable(_))
        ));
    }
}
