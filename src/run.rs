//! One run over one evidence bundle.
//!
//! [`RunContext`] owns everything a run needs (configuration, cancellation
//! token, staging area, source, registry, sinks) and tears it down on every
//! exit path: the source is closed after dispatch whatever the outcome, and
//! the staging area is removed when the last reference is dropped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use log::{info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::dispatch::{Dispatcher, RunReport};
use crate::plugins::manifest::load_manifests;
use crate::plugins::{builtin, PluginRegistry};
use crate::sinks::{ReportSink, TimelineSink};
use crate::sources::{open_source, EvidenceSource, StagingArea};
use crate::utils::summary::{create_run_summary, examiner_hostname, write_run_summary, RunMetadata};

/// What a finished run produced.
#[derive(Debug)]
pub struct RunOutcome {
    pub report: RunReport,
    pub timeline_db: Option<PathBuf>,
    pub summary: Option<PathBuf>,
}

pub struct RunContext {
    run_id: String,
    config: RunConfig,
    cancel: CancellationToken,
    staging: Arc<StagingArea>,
    source: Arc<dyn EvidenceSource>,
    registry: Arc<PluginRegistry>,
    timeline: Arc<TimelineSink>,
    reports: Arc<ReportSink>,
}

/// Builds the registry from configured manifests, or the built-ins when
/// none are configured.
pub fn load_registry(config: &RunConfig) -> Result<PluginRegistry> {
    let profile = config.plugins.profile.as_deref();
    if config.plugins.manifests.is_empty() {
        return Ok(PluginRegistry::builtin(profile));
    }
    let candidates = load_manifests(&config.plugins.manifests)?;
    Ok(PluginRegistry::load(candidates, &builtin::entry_points(), profile))
}

impl RunContext {
    /// Validates the configuration and opens the evidence source.
    pub fn open(config: RunConfig, cancel: CancellationToken) -> Result<Self> {
        config.validate()?;
        let (input, kind) = config
            .evidence_input()
            .ok_or_else(|| anyhow!("No evidence input configured (set evidence.input or remote.base_url)"))?;

        let run_id = Uuid::new_v4().to_string();
        let staging_dir = config.staging_dir(&run_id);
        let staging = Arc::new(
            StagingArea::create(&staging_dir, config.staging.keep)
                .context(format!("Failed to create staging area {}", staging_dir.display()))?,
        );

        let source = open_source(
            &input,
            kind,
            Arc::clone(&staging),
            config.remote_options(),
            cancel.clone(),
        )
        .context(format!("Failed to open evidence source {}", input))?;

        let registry = load_registry(&config)?;
        Ok(Self::from_parts(run_id, config, cancel, staging, source, registry))
    }

    /// Assembles a context around an already opened source.
    pub fn from_parts(
        run_id: String,
        config: RunConfig,
        cancel: CancellationToken,
        staging: Arc<StagingArea>,
        source: Arc<dyn EvidenceSource>,
        registry: PluginRegistry,
    ) -> Self {
        info!("Run {} over {}", run_id, source.describe());
        Self {
            run_id,
            config,
            cancel,
            staging,
            source,
            registry: Arc::new(registry),
            timeline: Arc::new(TimelineSink::new()),
            reports: Arc::new(ReportSink::new()),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn source(&self) -> &Arc<dyn EvidenceSource> {
        &self.source
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn timeline(&self) -> &TimelineSink {
        &self.timeline
    }

    pub fn reports(&self) -> &ReportSink {
        &self.reports
    }

    /// Dispatches every plugin, then closes the source and writes the
    /// timeline database and run summary.
    ///
    /// Errors only when the source could not be prepared or an output
    /// could not be written; plugin failures are part of the report.
    pub async fn execute(&self) -> Result<RunOutcome> {
        let started = Utc::now();
        let dispatcher = Dispatcher::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.source),
            Arc::clone(&self.timeline),
            Arc::clone(&self.reports),
            self.cancel.clone(),
        )
        .with_workers(self.config.worker_count());

        let dispatched = dispatcher.run().await;
        if let Err(e) = self.source.close().await {
            warn!("Failed to close evidence source: {}", e);
        }
        let report = dispatched.context("Run aborted before any plugin ran")?;
        if let Some(reason) = &report.aborted {
            warn!("Run {} ended early: {}", self.run_id, reason);
        }

        let timeline_db = match self.config.timeline_db_path() {
            Some(path) => {
                self.timeline.persist_sqlite(&path)?;
                Some(path)
            }
            None => None,
        };

        let summary = match self.config.summary_path() {
            Some(path) => {
                let meta = RunMetadata {
                    run_id: self.run_id.clone(),
                    hostname: examiner_hostname(),
                    source: self.source.describe(),
                    started,
                    finished: Utc::now(),
                    timeline_events: self.timeline.len(),
                    timeline_db: timeline_db.as_ref().map(|p| p.display().to_string()),
                };
                let json = create_run_summary(&meta, &report, self.registry.load_warnings())?;
                write_run_summary(&path, &json)?;
                Some(path)
            }
            None => None,
        };

        Ok(RunOutcome {
            report,
            timeline_db,
            summary,
        })
    }
}
