//! Artifact plugins and the registry that validates them.
//!
//! A plugin declares the glob patterns it needs; the dispatcher resolves
//! those patterns against the active [`EvidenceSource`] and hands the
//! matching [`FileRecord`]s to [`ArtifactPlugin::run`]. Everything a plugin
//! produces is buffered in a [`PluginOutput`] and only reaches the sinks
//! when the plugin succeeds.

pub mod builtin;
pub mod manifest;
pub mod registry;

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::{PluginFailure, SourceError};
use crate::models::{FileRecord, GeoPoint, ReportRow, TimelineEvent};
use crate::sources::EvidenceSource;

pub use registry::PluginRegistry;

/// Contract every artifact parser implements.
#[async_trait]
pub trait ArtifactPlugin: Send + Sync {
    async fn run(&self, ctx: &PluginContext, out: &mut PluginOutput) -> Result<(), PluginFailure>;
}

/// Descriptive metadata carried through to reports.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct PluginInfo {
    pub description: String,
    pub author: String,
    pub version: String,
    pub date: String,
    pub notes: String,
}

/// A validated plugin, immutable once loaded.
#[derive(Clone)]
pub struct PluginDescriptor {
    pub id: String,
    pub name: String,
    /// Ordered, de-duplicated glob patterns.
    pub patterns: Vec<String>,
    pub category: String,
    pub entry_point: Arc<dyn ArtifactPlugin>,
    pub requirements: Vec<String>,
    pub info: PluginInfo,
}

impl fmt::Debug for PluginDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("patterns", &self.patterns)
            .field("category", &self.category)
            .field("requirements", &self.requirements)
            .finish()
    }
}

/// How a candidate names its implementation.
#[derive(Clone)]
pub enum EntryPointRef {
    /// Looked up in [`EntryPoints`] at load time.
    Named(String),
    Resolved(Arc<dyn ArtifactPlugin>),
}

impl fmt::Debug for EntryPointRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryPointRef::Named(name) => write!(f, "Named({})", name),
            EntryPointRef::Resolved(_) => write!(f, "Resolved(..)"),
        }
    }
}

/// An unvalidated descriptor, as read from a manifest or built in code.
#[derive(Debug, Clone)]
pub struct PluginCandidate {
    pub id: String,
    pub name: String,
    pub patterns: Vec<String>,
    pub category: String,
    pub entry_point: EntryPointRef,
    pub requirements: Vec<String>,
    pub info: PluginInfo,
}

impl PluginCandidate {
    pub fn new(
        id: impl Into<String>,
        category: impl Into<String>,
        patterns: &[&str],
        plugin: Arc<dyn ArtifactPlugin>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            category: category.into(),
            entry_point: EntryPointRef::Resolved(plugin),
            requirements: Vec::new(),
            info: PluginInfo::default(),
        }
    }

    pub fn named(
        id: impl Into<String>,
        category: impl Into<String>,
        patterns: &[&str],
        entry_point: impl Into<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            category: category.into(),
            entry_point: EntryPointRef::Named(entry_point.into()),
            requirements: Vec::new(),
            info: PluginInfo::default(),
        }
    }
}

/// Compiled-in plugin implementations addressable by name from manifests.
#[derive(Clone, Default)]
pub struct EntryPoints {
    entries: HashMap<String, Arc<dyn ArtifactPlugin>>,
}

impl EntryPoints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn ArtifactPlugin>) -> &mut Self {
        self.entries.insert(name.into(), plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ArtifactPlugin>> {
        self.entries.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// What a plugin sees while it runs.
pub struct PluginContext {
    pub plugin_id: String,
    pub category: String,
    /// Union of the plugin's pattern matches, sorted by path.
    pub files: Vec<FileRecord>,
    pub source: Arc<dyn EvidenceSource>,
    pub cancel: CancellationToken,
}

impl PluginContext {
    /// Materializes one of the matched files locally.
    pub async fn fetch(&self, record: &FileRecord) -> Result<PathBuf, SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        self.source.fetch(&record.path).await
    }

    /// Lets the source stage every matched file ahead of the `fetch` calls.
    pub async fn prefetch_all(&self) -> Result<(), SourceError> {
        if self.cancel.is_cancelled() {
            return Err(SourceError::Cancelled);
        }
        let paths: Vec<String> = self.files.iter().map(|r| r.path.clone()).collect();
        self.source.prefetch(&paths).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Buffered plugin output; discarded if the plugin fails.
#[derive(Debug, Clone, Default)]
pub struct PluginOutput {
    pub rows: Vec<ReportRow>,
    pub events: Vec<TimelineEvent>,
    pub narrative: Vec<String>,
    pub locations: Vec<GeoPoint>,
}

impl PluginOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit_row(&mut self, row: ReportRow) {
        self.rows.push(row);
    }

    pub fn emit_event(&mut self, event: TimelineEvent) {
        self.events.push(event);
    }

    pub fn note(&mut self, line: impl Into<String>) {
        self.narrative.push(line.into());
    }

    pub fn emit_location(&mut self, point: GeoPoint) {
        self.locations.push(point);
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
            && self.events.is_empty()
            && self.narrative.is_empty()
            && self.locations.is_empty()
    }
}
