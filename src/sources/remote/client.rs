//! HTTP client for the remote evidence API.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use log::debug;
use reqwest::header::HeaderMap;
use reqwest::{Client, Response};
use serde::Deserialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::constants::{
    HEADER_FILE_CTIME, HEADER_FILE_MTIME, REMOTE_DOWNLOAD_ENDPOINT, REMOTE_HEALTH_ENDPOINT,
    REMOTE_SEARCH_ENDPOINT,
};
use crate::error::SourceError;
use crate::security::credential_scrubber::redact_secret;
use crate::sources::remote::retry::{classify_status, AttemptError, RequestError, RetryPolicy, StatusClass};
use crate::sources::remote::RemoteOptions;

/// One entry of a search response.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct RemoteFileEntry {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub mtime: Option<f64>,
    #[serde(default)]
    pub ctime: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    files: Vec<RemoteFileEntry>,
}

/// Body of `GET /health`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct HealthStatus {
    pub status: String,
    #[serde(default)]
    pub evidence_root: Option<String>,
    #[serde(default)]
    pub auth_enabled: Option<bool>,
}

/// Timestamps reported by the download endpoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DownloadMeta {
    pub bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

/// Epoch seconds as sent by the server; zero and negative mean "unknown".
pub fn epoch_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() || secs <= 0.0 {
        return None;
    }
    let whole = secs.trunc();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    Utc.timestamp_opt(whole as i64, nanos).single()
}

fn header_time(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(epoch_to_datetime)
}

pub struct RemoteClient {
    http: Client,
    base_url: String,
    token: Option<String>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl RemoteClient {
    pub fn new(options: &RemoteOptions, cancel: CancellationToken) -> Result<Self, SourceError> {
        let http = Client::builder()
            .timeout(options.timeout)
            .build()
            .map_err(|e| SourceError::SourceUnavailable(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            token: options.token.clone().filter(|t| !t.is_empty()),
            retry: options.retry.clone(),
            cancel,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Removes the bearer token and other credentials from a message.
    pub fn scrub(&self, message: &str) -> String {
        redact_secret(message, self.token.as_deref())
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn send(&self, endpoint: &str, query: &[(&str, &str)]) -> Result<Response, AttemptError> {
        let mut request = self.http.get(self.url(endpoint)).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_builder() {
                AttemptError::Fatal(RequestError::Rejected(self.scrub(&e.to_string())))
            } else {
                AttemptError::Transient(self.scrub(&e.to_string()))
            }
        })?;

        let status = response.status();
        match classify_status(status) {
            StatusClass::Success => Ok(response),
            StatusClass::Transient => Err(AttemptError::Transient(format!("HTTP {}", status))),
            StatusClass::Unauthorized => Err(AttemptError::Fatal(RequestError::Unauthorized(
                format!("HTTP {}", status),
            ))),
            StatusClass::NotFound => Err(AttemptError::Fatal(RequestError::NotFound)),
            StatusClass::Rejected => Err(AttemptError::Fatal(RequestError::Rejected(format!(
                "HTTP {}",
                status
            )))),
        }
    }

    async fn search_once(&self, pattern: &str) -> Result<Vec<RemoteFileEntry>, AttemptError> {
        let response = self.send(REMOTE_SEARCH_ENDPOINT, &[("pattern", pattern)]).await?;
        let body: SearchResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                AttemptError::Fatal(RequestError::Rejected(format!(
                    "malformed search response: {}",
                    e
                )))
            } else {
                AttemptError::Transient(self.scrub(&e.to_string()))
            }
        })?;
        Ok(body.files)
    }

    /// `GET /files/search?pattern=`
    pub async fn search(&self, pattern: &str) -> Result<Vec<RemoteFileEntry>, RequestError> {
        debug!("Remote search for {}", pattern);
        self.retry
            .execute("Remote search", &self.cancel, || self.search_once(pattern))
            .await
    }

    async fn download_once(&self, remote_path: &str, partial: &Path) -> Result<DownloadMeta, AttemptError> {
        let mut response = self.send(REMOTE_DOWNLOAD_ENDPOINT, &[("path", remote_path)]).await?;
        let mut meta = DownloadMeta {
            bytes: 0,
            modified: header_time(response.headers(), HEADER_FILE_MTIME),
            created: header_time(response.headers(), HEADER_FILE_CTIME),
        };

        let local = |e: std::io::Error| AttemptError::Fatal(RequestError::Local(e.to_string()));
        if let Some(parent) = partial.parent() {
            fs::create_dir_all(parent).await.map_err(local)?;
        }
        let mut file = fs::File::create(partial).await.map_err(local)?;

        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AttemptError::Transient(self.scrub(&e.to_string())))?
        {
            file.write_all(&chunk).await.map_err(local)?;
            meta.bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(local)?;
        file.sync_all().await.map_err(local)?;

        Ok(meta)
    }

    /// `GET /files/download?path=`, streamed into `partial`.
    ///
    /// The caller renames `partial` into place; on failure it is removed.
    pub async fn download(&self, remote_path: &str, partial: &Path) -> Result<DownloadMeta, RequestError> {
        debug!("Remote download of {}", remote_path);
        let result = self
            .retry
            .execute("Remote download", &self.cancel, || {
                self.download_once(remote_path, partial)
            })
            .await;
        if result.is_err() {
            let _ = fs::remove_file(partial).await;
        }
        result
    }

    /// `GET /health`, single attempt.
    pub async fn health(&self) -> Result<HealthStatus, RequestError> {
        RetryPolicy::no_retries()
            .execute("Health check", &self.cancel, || async move {
                let response = self.send(REMOTE_HEALTH_ENDPOINT, &[]).await?;
                response.json::<HealthStatus>().await.map_err(|e| {
                    AttemptError::Fatal(RequestError::Rejected(format!("malformed health response: {}", e)))
                })
            })
            .await
    }
}
