//! Evidence served by a remote HTTP evidence server.
//!
//! Search results are memoized per pattern and downloads per path for the
//! life of the source; [`EvidenceSource::refresh`] forgets both.

pub mod client;
pub mod retry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_REQUEST_TIMEOUT_SECS, REMOTE_PROBE_PATTERN};
use crate::error::SourceError;
use crate::models::FileRecord;
use crate::security::path_validator::validate_relative_path;
use crate::sources::cache::OnceMap;
use crate::sources::staging::{apply_mtime, partial_path, StagingArea};
use crate::sources::{EvidenceSource, SourceKind};

pub use client::{epoch_to_datetime, HealthStatus, RemoteClient, RemoteFileEntry};
pub use retry::{RequestError, RetryPolicy};

/// Connection settings for a remote evidence server.
#[derive(Debug, Clone)]
pub struct RemoteOptions {
    pub base_url: String,
    pub token: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Probe `/health` and the search endpoint in `prepare`.
    pub verify_connection: bool,
}

impl Default for RemoteOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            verify_connection: true,
        }
    }
}

/// A search hit: the path as the server knows it, and its record.
#[derive(Debug, Clone)]
struct KnownFile {
    remote_path: String,
    record: FileRecord,
}

pub struct RemoteSource {
    client: RemoteClient,
    staging: Arc<StagingArea>,
    verify_connection: bool,
    searches: OnceMap<Arc<Vec<FileRecord>>>,
    known: Mutex<HashMap<String, KnownFile>>,
    staged: OnceMap<PathBuf>,
    closed: AtomicBool,
}

impl RemoteSource {
    pub fn new(
        options: RemoteOptions,
        staging: Arc<StagingArea>,
        cancel: CancellationToken,
    ) -> Result<Self, SourceError> {
        if options.base_url.trim().is_empty() {
            return Err(SourceError::SourceUnavailable("remote base URL is empty".to_string()));
        }
        Ok(Self {
            client: RemoteClient::new(&options, cancel)?,
            staging,
            verify_connection: options.verify_connection,
            searches: OnceMap::new(),
            known: Mutex::new(HashMap::new()),
            staged: OnceMap::new(),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> Result<(), SourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SourceError::SourceUnavailable(format!(
                "{} has been closed",
                self.client.base_url()
            )));
        }
        Ok(())
    }

    fn known(&self) -> std::sync::MutexGuard<'_, HashMap<String, KnownFile>> {
        self.known.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<HealthStatus, SourceError> {
        self.client
            .health()
            .await
            .map_err(|e| self.search_error("health check", e))
    }

    /// Number of patterns with a cached result.
    pub fn cached_searches(&self) -> usize {
        self.searches.len()
    }

    /// Number of downloaded files.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    fn search_error(&self, what: &str, err: RequestError) -> SourceError {
        match err {
            RequestError::Unauthorized(msg) => SourceError::AuthenticationFailed(msg),
            RequestError::Cancelled => SourceError::Cancelled,
            RequestError::NotFound => SourceError::SourceUnavailable(format!(
                "{} endpoint not found at {}, verify the base URL",
                what,
                self.client.base_url()
            )),
            RequestError::Exhausted { attempts, last } => SourceError::SourceUnavailable(format!(
                "{} failed after {} attempts: {}",
                what, attempts, last
            )),
            RequestError::Rejected(msg) | RequestError::Local(msg) => {
                SourceError::SourceUnavailable(format!("{} failed: {}", what, msg))
            }
        }
    }

    fn download_error(path: &str, err: RequestError) -> SourceError {
        match err {
            RequestError::Unauthorized(msg) => SourceError::AuthenticationFailed(msg),
            RequestError::Cancelled => SourceError::Cancelled,
            RequestError::NotFound => SourceError::NotFound(path.to_string()),
            RequestError::Exhausted { attempts, last } => {
                SourceError::fetch_failed(path, format!("gave up after {} attempts: {}", attempts, last))
            }
            RequestError::Rejected(msg) | RequestError::Local(msg) => SourceError::fetch_failed(path, msg),
        }
    }

    async fn search_remote(&self, pattern: &str) -> Result<Arc<Vec<FileRecord>>, SourceError> {
        let entries = self
            .client
            .search(pattern)
            .await
            .map_err(|e| self.search_error("search", e))?;

        let mut hits: Vec<KnownFile> = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.path.is_empty() {
                continue;
            }
            let path = match validate_relative_path(&entry.path) {
                Ok(path) => path,
                Err(e) => {
                    warn!("Ignoring remote search result: {}", e);
                    continue;
                }
            };
            let mut record = FileRecord::new(path)
                .with_modified(entry.mtime.and_then(epoch_to_datetime))
                .with_created(entry.ctime.and_then(epoch_to_datetime));
            record.size = entry.size;
            hits.push(KnownFile {
                remote_path: entry.path,
                record,
            });
        }
        hits.sort_by(|a, b| a.record.path.cmp(&b.record.path));
        hits.dedup_by(|a, b| a.record.path == b.record.path);

        let records: Vec<FileRecord> = hits.iter().map(|h| h.record.clone()).collect();
        {
            let mut known = self.known();
            for hit in hits {
                known.entry(hit.record.path.clone()).or_insert(hit);
            }
        }
        debug!("Remote search {} returned {} files", pattern, records.len());
        Ok(Arc::new(records))
    }

    async fn download(&self, file: KnownFile) -> Result<PathBuf, SourceError> {
        let path = file.record.path.as_str();
        let dest = self.staging.destination(path)?;
        let partial = partial_path(&dest);

        let meta = self
            .client
            .download(&file.remote_path, &partial)
            .await
            .map_err(|e| Self::download_error(path, e))?;

        tokio::fs::rename(&partial, &dest)
            .await
            .map_err(|e| SourceError::fetch_failed(path, e))?;

        // search metadata wins over download headers
        let modified = file.record.modified_time.or(meta.modified);
        apply_mtime(&dest, modified);
        debug!("Downloaded {} ({} bytes)", path, meta.bytes);
        Ok(dest)
    }
}

#[async_trait]
impl EvidenceSource for RemoteSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Remote
    }

    fn describe(&self) -> String {
        format!("remote evidence API {}", self.client.base_url())
    }

    async fn prepare(&self) -> Result<(), SourceError> {
        self.ensure_open()?;
        if !self.verify_connection {
            return Ok(());
        }

        match self.client.health().await {
            Ok(health) => info!(
                "Remote evidence server status {} (root: {}, auth: {})",
                health.status,
                health.evidence_root.as_deref().unwrap_or("unknown"),
                health.auth_enabled.unwrap_or(false)
            ),
            Err(RequestError::Cancelled) => return Err(SourceError::Cancelled),
            Err(e) => warn!("Could not query remote health endpoint: {:?}", e),
        }

        self.client
            .search(REMOTE_PROBE_PATTERN)
            .await
            .map_err(|e| self.search_error("connection test", e))?;
        info!("Connected to {}", self.client.base_url());
        Ok(())
    }

    async fn search(&self, pattern: &str) -> Result<Vec<FileRecord>, SourceError> {
        self.ensure_open()?;
        let records = self
            .searches
            .get_or_try_init(pattern, || self.search_remote(pattern))
            .await?;
        Ok(records.as_ref().clone())
    }

    async fn fetch(&self, path: &str) -> Result<PathBuf, SourceError> {
        self.ensure_open()?;
        let normalized = validate_relative_path(path)?;
        let file = self
            .known()
            .get(&normalized)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(path.to_string()))?;

        self.staged
            .get_or_try_init(&normalized, || self.download(file))
            .await
    }

    async fn refresh(&self) -> Result<(), SourceError> {
        self.searches.clear();
        self.staged.clear();
        self.known().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), SourceError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.searches.clear();
        self.staged.clear();
        self.staging
            .purge()
            .map_err(|e| SourceError::SourceUnavailable(format!("failed to purge staging area: {}", e)))
    }
}
