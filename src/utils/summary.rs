use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde_json::json;

use crate::dispatch::RunReport;
use crate::error::PluginLoadError;
use crate::models::ExecutionStatus;

/// Run-level facts recorded next to the per-plugin results.
#[derive(Debug, Clone)]
pub struct RunMetadata {
    pub run_id: String,
    pub hostname: String,
    pub source: String,
    pub started: DateTime<Utc>,
    pub finished: DateTime<Utc>,
    pub timeline_events: usize,
    pub timeline_db: Option<String>,
}

/// Name of the machine the examiner runs on; "unknown" when unavailable.
pub fn examiner_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Create a JSON summary of the run.
///
/// The summary is what the report renderer reads to list plugin outcomes,
/// so every plugin appears exactly once with its status and counts.
///
/// # Example Output
///
/// ```json
/// {
///   "run_id": "550e8400-e29b-41d4-a716-446655440000",
///   "hostname": "examiner-01",
///   "source": "zip archive /cases/phone.zip",
///   "status": "completed",
///   "plugins": [...],
///   "load_warnings": [...]
/// }
/// ```
pub fn create_run_summary(
    meta: &RunMetadata,
    report: &RunReport,
    load_warnings: &[PluginLoadError],
) -> Result<String> {
    let plugins: Vec<_> = report
        .results
        .iter()
        .map(|result| {
            json!({
                "plugin_id": result.plugin_id,
                "category": result.category,
                "status": result.status.to_string(),
                "matched_files": result.matched_files,
                "rows": result.rows.len(),
                "timeline_events": result.timeline_events.len(),
                "error": result.error,
                "duration_ms": result.duration_ms
            })
        })
        .collect();

    let warnings: Vec<String> = load_warnings.iter().map(|w| w.to_string()).collect();
    let status = match &report.aborted {
        Some(reason) => format!("aborted: {}", reason),
        None => "completed".to_string(),
    };
    let duration_seconds = (meta.finished - meta.started).num_milliseconds() as f64 / 1000.0;

    let summary = json!({
        "run_id": meta.run_id,
        "hostname": meta.hostname,
        "source": meta.source,
        "started": meta.started.to_rfc3339(),
        "finished": meta.finished.to_rfc3339(),
        "duration_seconds": duration_seconds,
        "os": std::env::consts::OS,
        "tool_version": env!("CARGO_PKG_VERSION"),
        "status": status,
        "counts": {
            "succeeded": report.count(ExecutionStatus::Succeeded),
            "failed": report.count(ExecutionStatus::Failed),
            "skipped": report.count(ExecutionStatus::Skipped)
        },
        "timeline_events": meta.timeline_events,
        "timeline_db": meta.timeline_db,
        "plugins": plugins,
        "load_warnings": warnings
    });

    serde_json::to_string_pretty(&summary).context("Failed to serialize run summary to JSON")
}

pub fn write_run_summary(path: &Path, summary_json: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .context(format!("Failed to create directory {}", parent.display()))?;
    }
    fs::write(path, summary_json).context("Failed to write run summary")?;
    info!("Run summary written to {}", path.display());
    Ok(())
}
