use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::models::{GeoPoint, ReportRow};

/// Everything one plugin produced for the rendering layer.
#[derive(Serialize, Debug, Clone, PartialEq, Default)]
pub struct PluginReport {
    pub plugin_id: String,
    pub category: String,
    pub rows: Vec<ReportRow>,
    pub narrative: Vec<String>,
    pub locations: Vec<GeoPoint>,
}

/// Per-plugin reports, one contiguous entry per plugin.
#[derive(Default)]
pub struct ReportSink {
    reports: Mutex<Vec<PluginReport>>,
}

impl ReportSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PluginReport>> {
        self.reports.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Adds a report; output for a plugin that already reported is merged
    /// into its existing entry.
    pub fn append(&self, report: PluginReport) {
        let mut reports = self.lock();
        match reports.iter_mut().find(|r| r.plugin_id == report.plugin_id) {
            Some(existing) => {
                existing.rows.extend(report.rows);
                existing.narrative.extend(report.narrative);
                existing.locations.extend(report.locations);
            }
            None => reports.push(report),
        }
    }

    pub fn reports(&self) -> Vec<PluginReport> {
        self.lock().clone()
    }

    pub fn report_for(&self, plugin_id: &str) -> Option<PluginReport> {
        self.lock().iter().find(|r| r.plugin_id == plugin_id).cloned()
    }

    pub fn by_category(&self) -> BTreeMap<String, Vec<PluginReport>> {
        let mut grouped: BTreeMap<String, Vec<PluginReport>> = BTreeMap::new();
        for report in self.lock().iter() {
            grouped
                .entry(report.category.clone())
                .or_default()
                .push(report.clone());
        }
        grouped
    }

    /// All geolocation points, in report order, for KML export.
    pub fn locations(&self) -> Vec<GeoPoint> {
        self.lock()
            .iter()
            .flat_map(|r| r.locations.iter().cloned())
            .collect()
    }

    /// Puts reports in the order of `plugin_ids`; unknown ids go last.
    pub fn reorder(&self, plugin_ids: &[&str]) {
        let mut reports = self.lock();
        reports.sort_by_key(|r| {
            plugin_ids
                .iter()
                .position(|id| *id == r.plugin_id)
                .unwrap_or(usize::MAX)
        });
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
