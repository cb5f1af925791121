//! Evidence sources: one search/fetch contract over directories, archives
//! and remote evidence servers.

pub mod cache;
pub mod directory;
pub mod glob;
pub mod index;
pub mod remote;
pub mod staging;
pub mod tarball;
pub mod zipfile;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use clap::ValueEnum;
use log::info;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::models::FileRecord;

pub use directory::DirectorySource;
pub use glob::{PathPattern, PatternSet};
pub use remote::{RemoteOptions, RemoteSource};
pub use staging::StagingArea;
pub use tarball::TarSource;
pub use zipfile::ZipSource;

/// A bundle of evidence files addressed by relative path.
///
/// Implementations are shared across concurrently running plugins and must
/// be safe to call from many tasks at once.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human readable location, safe to log.
    fn describe(&self) -> String;

    /// Enumerates or probes the bundle before any plugin runs.
    async fn prepare(&self) -> Result<(), SourceError>;

    /// Files whose relative path matches the glob `pattern`, sorted by path.
    async fn search(&self, pattern: &str) -> Result<Vec<FileRecord>, SourceError>;

    /// Local path of a fully materialized copy of `path`.
    async fn fetch(&self, path: &str) -> Result<PathBuf, SourceError>;

    /// Hint that `paths` are about to be fetched.
    ///
    /// Backends that can materialize several files more cheaply together
    /// than one at a time override this. Paths that cannot be staged are
    /// left for `fetch` to report.
    async fn prefetch(&self, _paths: &[String]) -> Result<(), SourceError> {
        Ok(())
    }

    /// Drops cached enumeration and search state.
    async fn refresh(&self) -> Result<(), SourceError>;

    /// Releases handles and the staging area. Calling it twice is harmless.
    async fn close(&self) -> Result<(), SourceError>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Auto,
    Directory,
    Zip,
    Tar,
    GzipTar,
    Remote,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Auto => "auto",
            SourceKind::Directory => "directory",
            SourceKind::Zip => "zip",
            SourceKind::Tar => "tar",
            SourceKind::GzipTar => "gzip_tar",
            SourceKind::Remote => "remote",
        };
        write!(f, "{}", name)
    }
}

impl SourceKind {
    /// Picks a backend from the shape of `input`.
    pub fn detect(input: &str) -> Option<SourceKind> {
        let lower = input.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Some(SourceKind::Remote);
        }
        if Path::new(input).is_dir() {
            return Some(SourceKind::Directory);
        }
        if lower.ends_with(".zip") {
            Some(SourceKind::Zip)
        } else if lower.ends_with(".tar") {
            Some(SourceKind::Tar)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") || lower.ends_with(".gz") {
            Some(SourceKind::GzipTar)
        } else {
            None
        }
    }
}

/// Constructs the backend for `input`.
///
/// `kind` may be [`SourceKind::Auto`], in which case the backend is detected
/// from the input. Nothing is enumerated until `prepare` or the first search.
pub fn open_source(
    input: &str,
    kind: SourceKind,
    staging: Arc<StagingArea>,
    remote: RemoteOptions,
    cancel: CancellationToken,
) -> Result<Arc<dyn EvidenceSource>, SourceError> {
    let kind = match kind {
        SourceKind::Auto => SourceKind::detect(input).unwrap_or(SourceKind::Auto),
        other => other,
    };

    let source: Arc<dyn EvidenceSource> = match kind {
        SourceKind::Auto => {
            return Err(SourceError::SourceUnavailable(format!(
                "cannot determine evidence type of {}",
                input
            )))
        }
        SourceKind::Directory => Arc::new(DirectorySource::new(input)),
        SourceKind::Zip => Arc::new(ZipSource::new(input, staging)),
        SourceKind::Tar => Arc::new(TarSource::new(input, staging, false)),
        SourceKind::GzipTar => Arc::new(TarSource::new(input, staging, true)),
        SourceKind::Remote => {
            let options = RemoteOptions {
                base_url: input.to_string(),
                ..remote
            };
            Arc::new(RemoteSource::new(options, staging, cancel)?)
        }
    };
    info!("Opened {} evidence source: {}", kind, source.describe());
    Ok(source)
}

/// Shared search over an indexed backend.
pub(crate) fn search_index(
    index: &index::EntryIndex,
    pattern: &str,
) -> Result<Vec<FileRecord>, SourceError> {
    let compiled = PathPattern::compile(pattern)?;
    Ok(index.search(&compiled))
}
