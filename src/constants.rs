//! Global constants for the evidence-seeker application.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Remote evidence API constants
/// Default per-request timeout in seconds
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default number of retries after the first attempt of a remote request
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base retry delay in milliseconds
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Maximum retry delay in seconds
pub const RETRY_MAX_DELAY_SECS: u64 = 30;

/// Search endpoint, relative to the remote base URL
pub const REMOTE_SEARCH_ENDPOINT: &str = "files/search";

/// Download endpoint, relative to the remote base URL
pub const REMOTE_DOWNLOAD_ENDPOINT: &str = "files/download";

/// Health endpoint, relative to the remote base URL
pub const REMOTE_HEALTH_ENDPOINT: &str = "health";

/// Pattern used to probe search connectivity when a run starts
pub const REMOTE_PROBE_PATTERN: &str = "__connection_test__";

/// Response header carrying the modification time (epoch seconds)
pub const HEADER_FILE_MTIME: &str = "X-File-Mtime";

/// Response header carrying the creation time (epoch seconds)
pub const HEADER_FILE_CTIME: &str = "X-File-Ctime";

/// Environment variable overriding the configured bearer token
pub const TOKEN_ENV_VAR: &str = "EVIDENCE_SEEKER_TOKEN";

// Evidence layout constants
/// Virtual prefix prepended to bundle paths so `*/name` also matches top-level entries
pub const VIRTUAL_ROOT_PREFIX: &str = "root/";

/// macOS resource-fork folder found in zips created by Finder
pub const ZIP_MACOSX_PREFIX: &str = "__MACOSX";

/// Zip extra field id for the extended timestamp block
pub const ZIP_EXTENDED_TIMESTAMP_ID: u16 = 0x5455;

/// Suffix for downloads that have not been fully written yet
pub const PARTIAL_DOWNLOAD_SUFFIX: &str = ".part";

/// Prefix of the per-run staging folder; the run id follows it
pub const STAGING_DIR_PREFIX: &str = "evidence_seeker_";

// Dispatch constants
/// Upper bound on the default worker pool size
pub const MAX_DEFAULT_WORKERS: usize = 16;

/// Maximum file size hashed by the built-in hash plugin (MB)
pub const DEFAULT_HASH_MAX_SIZE_MB: u64 = 1024;

// Default file names
pub const DEFAULT_CONFIG_NAME: &str = "evidence_seeker.yaml";
pub const DEFAULT_TIMELINE_DB_NAME: &str = "timeline.db";
pub const DEFAULT_SUMMARY_NAME: &str = "run_summary.json";

/// Default worker count: twice the CPU count, capped.
pub fn default_worker_count() -> usize {
    std::cmp::min(num_cpus::get() * 2, MAX_DEFAULT_WORKERS).max(1)
}
