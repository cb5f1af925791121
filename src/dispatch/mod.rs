//! Runs every registered plugin against one evidence source.
//!
//! Plugins run concurrently on a bounded pool. Each plugin's patterns are
//! resolved through [`EvidenceSource::search`]; a plugin with no matching
//! files is skipped. A plugin that errors, panics or is cancelled is marked
//! failed and the run carries on. Only authentication failure and explicit
//! cancellation stop the remaining plugins.

pub mod state;

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::{self, FutureExt};
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::constants::default_worker_count;
use crate::error::{DispatchError, PluginFailure, SourceError};
use crate::models::{ExecutionResult, ExecutionStatus, FileRecord};
use crate::plugins::{PluginContext, PluginDescriptor, PluginOutput, PluginRegistry};
use crate::sinks::{PluginReport, ReportSink, TimelineSink};
use crate::sources::EvidenceSource;

pub use state::{InvalidTransition, PluginState};

/// Outcome of a dispatch: one result per plugin, in registry order.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub results: Vec<ExecutionResult>,
    /// Set when the run was cut short by authentication failure or
    /// cancellation.
    pub aborted: Option<DispatchError>,
}

impl RunReport {
    pub fn count(&self, status: ExecutionStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn result_for(&self, plugin_id: &str) -> Option<&ExecutionResult> {
        self.results.iter().find(|r| r.plugin_id == plugin_id)
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

/// State shared by the per-plugin tasks of one run.
struct RunShared {
    source: Arc<dyn EvidenceSource>,
    timeline: Arc<TimelineSink>,
    reports: Arc<ReportSink>,
    cancel: CancellationToken,
    abort: Mutex<Option<DispatchError>>,
}

impl RunShared {
    /// Records the first run-level failure and stops the remaining plugins.
    fn abort(&self, reason: DispatchError) {
        let mut abort = self.abort.lock().unwrap_or_else(|p| p.into_inner());
        if abort.is_none() {
            error!("Aborting run: {}", reason);
            *abort = Some(reason);
        }
        self.cancel.cancel();
    }

    fn take_abort(&self) -> Option<DispatchError> {
        self.abort.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}

pub struct Dispatcher {
    registry: Arc<PluginRegistry>,
    source: Arc<dyn EvidenceSource>,
    timeline: Arc<TimelineSink>,
    reports: Arc<ReportSink>,
    workers: usize,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<PluginRegistry>,
        source: Arc<dyn EvidenceSource>,
        timeline: Arc<TimelineSink>,
        reports: Arc<ReportSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            registry,
            source,
            timeline,
            reports,
            workers: default_worker_count(),
            cancel,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Prepares the source and runs every plugin.
    ///
    /// Fails only when the source cannot be prepared or the run was
    /// cancelled before it started; plugin failures are reported in the
    /// returned [`RunReport`].
    pub async fn run(&self) -> Result<RunReport, DispatchError> {
        if self.cancel.is_cancelled() {
            return Err(DispatchError::Cancelled);
        }

        info!("Preparing {}", self.source.describe());
        self.source.prepare().await.map_err(DispatchError::from)?;

        let shared = Arc::new(RunShared {
            source: Arc::clone(&self.source),
            timeline: Arc::clone(&self.timeline),
            reports: Arc::clone(&self.reports),
            cancel: self.cancel.child_token(),
            abort: Mutex::new(None),
        });
        let semaphore = Arc::new(Semaphore::new(self.workers));
        info!(
            "Dispatching {} plugins with {} workers",
            self.registry.len(),
            self.workers
        );

        let futures = self.registry.all().iter().map(|plugin| {
            let plugin = Arc::clone(plugin);
            let shared = Arc::clone(&shared);
            let semaphore = Arc::clone(&semaphore);

            async move {
                let permit = tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => None,
                    permit = semaphore.acquire_owned() => permit.ok(),
                };
                match permit {
                    Some(_permit) => execute_plugin(&plugin, &shared).await,
                    None => {
                        let mut state = PluginState::Pending;
                        transition(&mut state, PluginState::Failed, &plugin.id);
                        finished(&plugin, state, 0, Instant::now(), Some(SourceError::Cancelled.to_string()))
                    }
                }
            }
            .boxed()
        });

        let results = future::join_all(futures).await;

        let order: Vec<&str> = self.registry.all().iter().map(|p| p.id.as_str()).collect();
        self.reports.reorder(&order);

        let mut aborted = shared.take_abort();
        if aborted.is_none() && self.cancel.is_cancelled() {
            aborted = Some(DispatchError::Cancelled);
        }

        let report = RunReport { results, aborted };
        info!(
            "Dispatch finished: {} succeeded, {} failed, {} skipped",
            report.count(ExecutionStatus::Succeeded),
            report.count(ExecutionStatus::Failed),
            report.count(ExecutionStatus::Skipped)
        );
        Ok(report)
    }
}

fn transition(state: &mut PluginState, to: PluginState, plugin_id: &str) {
    if let Err(e) = state.advance(to) {
        warn!("{}: {}", plugin_id, e);
    }
}

fn finished(
    plugin: &PluginDescriptor,
    state: PluginState,
    matched_files: usize,
    started: Instant,
    error: Option<String>,
) -> ExecutionResult {
    ExecutionResult {
        plugin_id: plugin.id.clone(),
        category: plugin.category.clone(),
        status: state.status().unwrap_or(ExecutionStatus::Failed),
        matched_files,
        rows: Vec::new(),
        timeline_events: Vec::new(),
        error,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Union of the plugin's pattern matches, de-duplicated and sorted by path.
async fn resolve(
    plugin: &PluginDescriptor,
    source: &dyn EvidenceSource,
) -> Result<Vec<FileRecord>, SourceError> {
    let mut by_path: BTreeMap<String, FileRecord> = BTreeMap::new();
    for pattern in &plugin.patterns {
        for record in source.search(pattern).await? {
            by_path.entry(record.path.clone()).or_insert(record);
        }
    }
    Ok(by_path.into_values().collect())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

async fn execute_plugin(plugin: &Arc<PluginDescriptor>, shared: &RunShared) -> ExecutionResult {
    let started = Instant::now();
    let mut state = PluginState::Pending;
    transition(&mut state, PluginState::Resolving, &plugin.id);

    let resolved = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => Err(SourceError::Cancelled),
        resolved = resolve(plugin, shared.source.as_ref()) => resolved,
    };
    let files = match resolved {
        Ok(files) => files,
        Err(e) => {
            if let SourceError::AuthenticationFailed(msg) = &e {
                shared.abort(DispatchError::AuthenticationFailed(msg.clone()));
            }
            warn!("{}: could not resolve files: {}", plugin.id, e);
            transition(&mut state, PluginState::Failed, &plugin.id);
            return finished(plugin, state, 0, started, Some(format!("resolution failed: {}", e)));
        }
    };

    if files.is_empty() {
        info!("{}: no matching files, skipping", plugin.id);
        transition(&mut state, PluginState::Skipped, &plugin.id);
        return finished(plugin, state, 0, started, None);
    }

    let matched_files = files.len();
    debug!("{}: running against {} files", plugin.id, matched_files);
    transition(&mut state, PluginState::Running, &plugin.id);

    let ctx = PluginContext {
        plugin_id: plugin.id.clone(),
        category: plugin.category.clone(),
        files,
        source: Arc::clone(&shared.source),
        cancel: shared.cancel.clone(),
    };
    let entry_point = Arc::clone(&plugin.entry_point);
    let mut handle = tokio::spawn(async move {
        let mut out = PluginOutput::new();
        entry_point.run(&ctx, &mut out).await.map(|()| out)
    });

    let outcome: Result<PluginOutput, String> = tokio::select! {
        biased;
        _ = shared.cancel.cancelled() => {
            handle.abort();
            Err(SourceError::Cancelled.to_string())
        }
        joined = &mut handle => match joined {
            Ok(Ok(out)) => Ok(out),
            Ok(Err(failure)) => {
                if let PluginFailure::Source(SourceError::AuthenticationFailed(msg)) = &failure {
                    shared.abort(DispatchError::AuthenticationFailed(msg.clone()));
                }
                Err(failure.to_string())
            }
            Err(join_error) if join_error.is_panic() => {
                Err(format!("plugin panicked: {}", panic_message(join_error.into_panic())))
            }
            Err(join_error) => Err(format!("plugin task did not complete: {}", join_error)),
        }
    };

    match outcome {
        Ok(out) => {
            transition(&mut state, PluginState::Succeeded, &plugin.id);
            let PluginOutput {
                rows,
                events,
                narrative,
                locations,
            } = out;

            shared
                .timeline
                .append_batch(&plugin.id, &plugin.category, events.iter().cloned());
            shared.reports.append(PluginReport {
                plugin_id: plugin.id.clone(),
                category: plugin.category.clone(),
                rows: rows.clone(),
                narrative,
                locations,
            });

            info!(
                "{}: succeeded with {} rows and {} events",
                plugin.id,
                rows.len(),
                events.len()
            );
            let mut result = finished(plugin, state, matched_files, started, None);
            result.rows = rows;
            result.timeline_events = events;
            result
        }
        Err(cause) => {
            warn!("{}: failed: {}", plugin.id, cause);
            transition(&mut state, PluginState::Failed, &plugin.id);
            finished(plugin, state, matched_files, started, Some(cause))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::{ArtifactPlugin, EntryPoints, PluginCandidate};
    use crate::sources::DirectorySource;
    use crate::test_utils::create_test_evidence_tree;
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct CountFiles;

    #[async_trait]
    impl ArtifactPlugin for CountFiles {
        async fn run(&self, ctx: &PluginContext, out: &mut PluginOutput) -> Result<(), PluginFailure> {
            out.note(format!("{} files", ctx.files.len()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resolution_unions_patterns() {
        let temp_dir = TempDir::new().unwrap();
        create_test_evidence_tree(temp_dir.path()).unwrap();
        let source = DirectorySource::new(temp_dir.path());

        let registry = PluginRegistry::load(
            vec![PluginCandidate::new(
                "chrome",
                "Browser",
                &["*/History.db*", "*/com.android.chrome/*"],
                Arc::new(CountFiles),
            )],
            &EntryPoints::new(),
            None,
        );
        let files = resolve(&registry.all()[0], &source).await.unwrap();
        let paths: Vec<_> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "data/com.android.chrome/History.db",
                "data/com.android.chrome/History.db-wal"
            ]
        );
    }

    #[tokio::test]
    async fn test_run_reports_in_registry_order() {
        let temp_dir = TempDir::new().unwrap();
        create_test_evidence_tree(temp_dir.path()).unwrap();

        let registry = Arc::new(PluginRegistry::load(
            vec![
                PluginCandidate::new("z_notes", "Notes", &["*.txt"], Arc::new(CountFiles)),
                PluginCandidate::new("a_none", "None", &["*.nothing"], Arc::new(CountFiles)),
                PluginCandidate::new("m_sms", "Messages", &["*/SMS/*"], Arc::new(CountFiles)),
            ],
            &EntryPoints::new(),
            None,
        ));
        let reports = Arc::new(ReportSink::new());
        let dispatcher = Dispatcher::new(
            registry,
            Arc::new(DirectorySource::new(temp_dir.path())),
            Arc::new(TimelineSink::new()),
            Arc::clone(&reports),
            CancellationToken::new(),
        )
        .with_workers(1);

        let report = dispatcher.run().await.unwrap();
        let ids: Vec<_> = report.results.iter().map(|r| r.plugin_id.as_str()).collect();
        assert_eq!(ids, vec!["z_notes", "a_none", "m_sms"]);
        assert_eq!(report.result_for("a_none").unwrap().status, ExecutionStatus::Skipped);
        assert_eq!(report.count(ExecutionStatus::Succeeded), 2);
        assert!(!report.is_aborted());

        let report_ids: Vec<_> = reports.reports().into_iter().map(|r| r.plugin_id).collect();
        assert_eq!(report_ids, vec!["z_notes", "m_sms"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let temp_dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let dispatcher = Dispatcher::new(
            Arc::new(PluginRegistry::default()),
            Arc::new(DirectorySource::new(temp_dir.path())),
            Arc::new(TimelineSink::new()),
            Arc::new(ReportSink::new()),
            cancel,
        );
        assert_eq!(dispatcher.run().await.unwrap_err(), DispatchError::Cancelled);
    }

    #[test]
    fn test_panic_message() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "unknown panic payload");
    }
}
