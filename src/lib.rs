//! # evidence_seeker
//!
//! Locates files in a forensic evidence bundle and runs artifact plugins
//! over them.
//!
//! ## Overview
//!
//! An evidence bundle may be an extracted directory tree, a zip or tar
//! archive (optionally gzip-compressed), or a remote evidence server
//! reachable over HTTP. Every kind is exposed through the same
//! [`EvidenceSource`](sources::EvidenceSource) contract: search by glob
//! pattern, then fetch a local copy of a match.
//!
//! On top of that, the [`Dispatcher`](dispatch::Dispatcher) runs each
//! registered [`ArtifactPlugin`](plugins::ArtifactPlugin) against the files
//! its patterns match, isolating failures per plugin, and collects output
//! into a shared timeline and per-plugin reports.
//!
//! ## Usage
//!
//! ```no_run
//! use evidence_seeker::config::RunConfig;
//! use evidence_seeker::run::RunContext;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let mut config = RunConfig::default();
//! config.evidence.input = Some("/cases/phone-extraction.zip".to_string());
//!
//! let context = RunContext::open(config, CancellationToken::new())?;
//! let outcome = context.execute().await?;
//! println!("{} plugins ran", outcome.report.results.len());
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`sources`]: evidence backends and the search/fetch contract
//! - [`plugins`]: plugin contract, manifests and the registry
//! - [`dispatch`]: concurrent plugin execution
//! - [`sinks`]: timeline and report stores
//! - [`run`]: run context and teardown
//! - [`config`]: YAML configuration
//! - [`security`]: path containment and credential scrubbing

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Configuration management
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Concurrent plugin execution
pub mod dispatch;

/// Error types shared across components
pub mod error;

/// Core data models and structures used throughout the application
pub mod models;

/// Artifact plugin contract and registry
pub mod plugins;

/// Run context
pub mod run;

/// Security utilities for path validation and credential protection
pub mod security;

/// Timeline and report sinks
pub mod sinks;

/// Evidence sources
pub mod sources;

/// Hashing and run summary helpers
pub mod utils;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
