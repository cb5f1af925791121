//! Error taxonomy shared by evidence sources, the plugin registry and the
//! dispatcher.
//!
//! Failures local to one file or one plugin are contained at that boundary;
//! only the variants of [`DispatchError`] abort a run.

use thiserror::Error;

/// Errors raised by an [`EvidenceSource`](crate::sources::EvidenceSource).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// The bundle cannot be opened or enumerated.
    #[error("evidence source unavailable: {0}")]
    SourceUnavailable(String),

    /// The requested path is not part of the bundle.
    #[error("file not found in evidence source: {0}")]
    NotFound(String),

    /// Materializing a file failed (after retries, where applicable).
    #[error("failed to fetch {path}: {reason}")]
    FetchFailed { path: String, reason: String },

    /// The remote evidence server rejected our credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A path tried to escape the bundle or the staging area.
    #[error("invalid evidence path {path}: {reason}")]
    InvalidPath { path: String, reason: String },

    /// A glob pattern could not be compiled.
    #[error("invalid search pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// The run was cancelled while the operation was in flight.
    #[error("operation cancelled")]
    Cancelled,
}

impl SourceError {
    pub fn fetch_failed(path: &str, reason: impl ToString) -> Self {
        SourceError::FetchFailed {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_path(path: &str, reason: impl ToString) -> Self {
        SourceError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors after which no further request to the same source can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SourceError::AuthenticationFailed(_) | SourceError::Cancelled
        )
    }
}

/// A plugin descriptor that failed validation and was excluded from the run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PluginLoadError {
    #[error("plugin descriptor has an empty id")]
    EmptyId,

    #[error("duplicate plugin id '{0}', keeping the first definition")]
    DuplicateId(String),

    #[error("plugin '{0}' declares no file patterns")]
    NoPatterns(String),

    #[error("plugin '{id}' has an invalid pattern {pattern}: {reason}")]
    InvalidPattern {
        id: String,
        pattern: String,
        reason: String,
    },

    #[error("plugin '{id}' references unknown entry point '{entry_point}'")]
    UnresolvedEntryPoint { id: String, entry_point: String },

    #[error("profile references unknown plugin '{0}'")]
    UnknownProfileEntry(String),
}

/// Failure reported by a plugin body.
#[derive(Debug, Error)]
pub enum PluginFailure {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Message(String),
}

impl PluginFailure {
    pub fn msg(message: impl Into<String>) -> Self {
        PluginFailure::Message(message.into())
    }
}

/// Run-level failures: the only conditions that abort a dispatch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("evidence source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("run cancelled")]
    Cancelled,
}

impl From<SourceError> for DispatchError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::AuthenticationFailed(msg) => DispatchError::AuthenticationFailed(msg),
            SourceError::Cancelled => DispatchError::Cancelled,
            SourceError::SourceUnavailable(msg) => DispatchError::SourceUnavailable(msg),
            other => DispatchError::SourceUnavailable(other.to_string()),
        }
    }
}
