use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A file located inside an evidence bundle.
///
/// Identity is the bundle-relative `path` ('/'-separated). Records are
/// produced by a search and never modified afterwards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub size: Option<u64>,
    pub modified_time: Option<DateTime<Utc>>,
    pub created_time: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            size: None,
            modified_time: None,
            created_time: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_modified(mut self, modified: Option<DateTime<Utc>>) -> Self {
        self.modified_time = modified;
        self
    }

    pub fn with_created(mut self, created: Option<DateTime<Utc>>) -> Self {
        self.created_time = created;
        self
    }

    /// Final path component, used for display in reports.
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// A single value in a report row or timeline event.
///
/// Serialized untagged. Timestamps are written as ISO 8601 strings and read
/// back as `Text`, so a string value never changes variant.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Timestamp(DateTime<Utc>),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => write!(f, ""),
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Integer(i) => write!(f, "{}", i),
            FieldValue::Float(x) => write!(f, "{}", x),
            FieldValue::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
            FieldValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<u64> for FieldValue {
    fn from(value: u64) -> Self {
        i64::try_from(value)
            .map(FieldValue::Integer)
            .unwrap_or(FieldValue::Float(value as f64))
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(value: DateTime<Utc>) -> Self {
        FieldValue::Timestamp(value)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(FieldValue::Null)
    }
}

/// A timestamped event contributed to the shared timeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,
    pub source_artifact_id: String,
    pub fields: BTreeMap<String, FieldValue>,
}

impl TimelineEvent {
    pub fn new(timestamp: DateTime<Utc>, source_artifact_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            source_artifact_id: source_artifact_id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// One tabular report row; columns keep the order the plugin emitted them in.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ReportRow {
    pub columns: Vec<(String, FieldValue)>,
}

impl ReportRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.columns.push((name.into(), value.into()));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.columns.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

/// A geolocation point destined for KML export.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GeoPoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub latitude: f64,
    pub longitude: f64,
    pub label: String,
}

/// Terminal status of a plugin in one run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionStatus {
    Succeeded,
    Failed,
    Skipped,
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStatus::Succeeded => write!(f, "Succeeded"),
            ExecutionStatus::Failed => write!(f, "Failed"),
            ExecutionStatus::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Outcome of one plugin, produced exactly once per plugin per run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecutionResult {
    pub plugin_id: String,
    pub category: String,
    pub status: ExecutionStatus,
    pub matched_files: usize,
    pub rows: Vec<ReportRow>,
    pub timeline_events: Vec<TimelineEvent>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }
}
