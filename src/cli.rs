use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RunConfig;
use crate::sources::SourceKind;

/// Command-line arguments for evidence-seeker.
///
/// Flags override the values loaded from the configuration file.
#[derive(Parser, Debug)]
#[clap(
    name = "evidence-seeker",
    about = "Run artifact plugins over a forensic evidence bundle"
)]
pub struct Args {
    /// Evidence directory, archive (.zip, .tar, .tar.gz) or http(s):// evidence server
    pub input: Option<String>,

    /// Evidence type; detected from the input when omitted
    #[clap(short = 'k', long, value_enum)]
    pub kind: Option<SourceKind>,

    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Output directory for the timeline database and run summary
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Only run these plugin ids (comma-separated)
    #[clap(short = 'p', long)]
    pub profile: Option<String>,

    /// Plugin manifest YAML files (repeatable)
    #[clap(short = 'm', long = "manifest")]
    pub manifests: Vec<PathBuf>,

    /// Number of plugins run concurrently
    #[clap(short, long)]
    pub workers: Option<usize>,

    /// Bearer token for the remote evidence server
    #[clap(long)]
    pub token: Option<String>,

    /// Per-request timeout for the remote evidence server, in seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Retries after the first attempt of a remote request
    #[clap(long)]
    pub max_retries: Option<u32>,

    /// Skip the remote health and connectivity probe
    #[clap(long)]
    pub no_verify: bool,

    /// Directory under which staged files are written
    #[clap(long)]
    pub staging_dir: Option<PathBuf>,

    /// Keep staged files after the run
    #[clap(long)]
    pub keep_staging: bool,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a default configuration file
    InitConfig {
        /// Path to output configuration file
        #[clap(default_value = crate::constants::DEFAULT_CONFIG_NAME)]
        path: PathBuf,
    },

    /// List the plugins that would run, with their patterns
    ListPlugins,
}

impl Args {
    /// Layers the command-line flags over `config`.
    pub fn apply_to(&self, config: &mut RunConfig) {
        if let Some(input) = &self.input {
            config.evidence.input = Some(input.clone());
        }
        if let Some(kind) = self.kind {
            config.evidence.kind = kind;
        }
        if let Some(output) = &self.output {
            config.output.dir = output.clone();
        }
        if let Some(profile) = &self.profile {
            let ids: Vec<String> = profile
                .split(',')
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect();
            config.plugins.profile = Some(ids);
        }
        if !self.manifests.is_empty() {
            config.plugins.manifests = self.manifests.clone();
        }
        if let Some(workers) = self.workers {
            config.dispatch.workers = Some(workers);
        }
        if self.token.is_some() {
            config.apply_token_override(self.token.clone());
        }
        if let Some(timeout) = self.timeout {
            config.remote.timeout_secs = timeout;
        }
        if let Some(max_retries) = self.max_retries {
            config.remote.max_retries = max_retries;
        }
        if self.no_verify {
            config.remote.verify_connection = false;
        }
        if let Some(staging_dir) = &self.staging_dir {
            config.staging.root = Some(staging_dir.clone());
        }
        if self.keep_staging {
            config.staging.keep = true;
        }
    }
}
