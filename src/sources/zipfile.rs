use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use log::{debug, warn};
use zip::ZipArchive;

use crate::constants::{ZIP_EXTENDED_TIMESTAMP_ID, ZIP_MACOSX_PREFIX};
use crate::error::SourceError;
use crate::models::FileRecord;
use crate::security::path_validator::validate_relative_path;
use crate::sources::cache::OnceMap;
use crate::sources::index::{build_blocking, EntryIndex, IndexedEntry, LazyIndex};
use crate::sources::staging::StagingArea;
use crate::sources::{search_index, EvidenceSource, SourceKind};

type SharedArchive = Arc<Mutex<Option<ZipArchive<BufReader<File>>>>>;

/// A zip archive of evidence; members are extracted on demand.
pub struct ZipSource {
    archive_path: PathBuf,
    archive: SharedArchive,
    staging: Arc<StagingArea>,
    index: LazyIndex,
    staged: OnceMap<PathBuf>,
    closed: AtomicBool,
}

impl ZipSource {
    pub fn new(archive_path: impl Into<PathBuf>, staging: Arc<StagingArea>) -> Self {
        Self {
            archive_path: archive_path.into(),
            archive: Arc::new(Mutex::new(None)),
            staging,
            index: LazyIndex::new(),
            staged: OnceMap::new(),
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
        let slot = Arc::clone(&self.archive);
        self.index
            .get_or_build(|| build_blocking(move || enumerate(&path, &slot)))
            .await
    }

    /// Number of members extracted so far.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }
}

fn unavailable(archive: &std::path::Path, reason: impl std::fmt::Display) -> SourceError {
    SourceError::SourceUnavailable(format!("cannot read zip {}: {}", archive.display(), reason))
}

fn enumerate(archive_path: &std::path::Path, slot: &SharedArchive) -> Result<EntryIndex, SourceError> {
    let file = File::open(archive_path).map_err(|e| unavailable(archive_path, e))?;
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| unavailable(archive_path, e))?;

    let mut entries = Vec::with_capacity(archive.len());
    for i in 0..archive.len() {
        let member = archive.by_index(i).map_err(|e| unavailable(archive_path, e))?;
        if member.is_dir() || member.name().starts_with(ZIP_MACOSX_PREFIX) {
            continue;
        }

        let name = member.name().to_string();
        let path = match validate_relative_path(&name) {
            Ok(path) => path,
            Err(e) => {
                warn!("Skipping zip member {}: {}", name, e);
                continue;
            }
        };

        let stamps = parse_extended_timestamp(member.extra_data());
        let modified = stamps.modified.or_else(|| dos_time_to_utc(member.last_modified()));

        entries.push(IndexedEntry {
            record: FileRecord::new(path)
                .with_size(member.size())
                .with_modified(modified)
                .with_created(stamps.created),
            member: name,
            ordinal: i,
        });
    }

    *slot.lock().unwrap_or_else(|p| p.into_inner()) = Some(archive);
    Ok(EntryIndex::from_entries(entries))
}

fn extract(
    slot: &SharedArchive,
    staging: &StagingArea,
    entry: &IndexedEntry,
) -> Result<PathBuf, SourceError> {
    let path = entry.record.path.as_str();
    let mut guard = slot.lock().unwrap_or_else(|p| p.into_inner());
    let archive = guard
        .as_mut()
        .ok_or_else(|| SourceError::SourceUnavailable("zip archive is closed".to_string()))?;
    let mut member = archive
        .by_index(entry.ordinal)
        .map_err(|e| SourceError::fetch_failed(path, e))?;
    staging.materialize(path, &mut member, entry.record.modified_time)
}

#[derive(Debug, Default, PartialEq)]
struct ExtendedTimestamp {
    modified: Option<DateTime<Utc>>,
    created: Option<DateTime<Utc>>,
}

/// Decodes the Info-ZIP extended timestamp (0x5455) from a zip extra field.
///
/// Layout: flags byte, then little-endian u32 epoch seconds for mtime (bit 0),
/// atime (bit 1) and ctime (bit 2), each only present while the block has
/// bytes left.
fn parse_extended_timestamp(extra: &[u8]) -> ExtendedTimestamp {
    let mut stamps = ExtendedTimestamp::default();
    let mut offset = 0;

    while offset + 4 <= extra.len() {
        let id = u16::from_le_bytes([extra[offset], extra[offset + 1]]);
        let size = u16::from_le_bytes([extra[offset + 2], extra[offset + 3]]) as usize;
        let start = offset + 4;
        let end = (start + size).min(extra.len());
        offset = start + size;

        if id != ZIP_EXTENDED_TIMESTAMP_ID || start >= end {
            continue;
        }

        let block = &extra[start..end];
        let flags = block[0];
        let mut cursor = 1;
        let mut next = |present: bool| -> Option<DateTime<Utc>> {
            if !present || cursor + 4 > block.len() {
                return None;
            }
            let secs = u32::from_le_bytes([
                block[cursor],
                block[cursor + 1],
                block[cursor + 2],
                block[cursor + 3],
            ]);
            cursor += 4;
            Utc.timestamp_opt(secs as i64, 0).single()
        };

        stamps.modified = next(flags & 0x01 != 0);
        let _accessed = next(flags & 0x02 != 0);
        stamps.created = next(flags & 0x04 != 0);
        break;
    }

    stamps
}

/// DOS timestamps carry no zone; they are read as UTC.
fn dos_time_to_utc(dt: zip::DateTime) -> Option<DateTime<Utc>> {
    let naive = NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)?
        .and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32)?;
    Some(Utc.from_utc_datetime(&naive))
}

#[async_trait]
impl EvidenceSource for ZipSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Zip
    }

    fn describe(&self) -> String {
        format!("zip archive {}", self.archive_path.display())
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
            .get_or_try_init(&normalized, || {
                let slot = Arc::clone(&self.archive);
                let staging = Arc::clone(&self.staging);
                async move {
                    debug!("Extracting {} from zip", entry.record.path);
                    let path = entry.record.path.clone();
                    tokio::task::spawn_blocking(move || extract(&slot, &staging, &entry))
                        .await
                        .map_err(|e| SourceError::fetch_failed(&path, e))?
                }
            })
            .await
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        self.index.reset().await;
        self.staged.clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.archive.lock().unwrap_or_else(|p| p.into_inner()).take();
        self.staged.clear();
        self.staging
            .purge()
            .map_err(|e| SourceError::SourceUnavailable(format!("failed to purge staging area: {}", e)))
    }
}
