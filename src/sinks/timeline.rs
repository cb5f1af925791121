use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::models::TimelineEvent;

/// An event as stored: tagged with its producer and an insertion sequence.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TimelineEntry {
    pub sequence: u64,
    pub plugin_id: String,
    pub category: String,
    pub event: TimelineEvent,
}

#[derive(Default)]
struct TimelineState {
    next_sequence: u64,
    entries: Vec<TimelineEntry>,
}

/// Append-only timeline ordered by timestamp, ties broken by sequence.
#[derive(Default)]
pub struct TimelineSink {
    state: Mutex<TimelineState>,
}

impl TimelineSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, TimelineState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Appends one event and returns its sequence number.
    pub fn append(&self, plugin_id: &str, category: &str, event: TimelineEvent) -> u64 {
        let mut state = self.lock();
        let sequence = state.next_sequence;
        state.next_sequence += 1;
        state.entries.push(TimelineEntry {
            sequence,
            plugin_id: plugin_id.to_string(),
            category: category.to_string(),
            event,
        });
        sequence
    }

    /// Appends `events` under a single lock so their sequence numbers are
    /// consecutive. Returns how many were appended.
    pub fn append_batch<I>(&self, plugin_id: &str, category: &str, events: I) -> usize
    where
        I: IntoIterator<Item = TimelineEvent>,
    {
        let mut state = self.lock();
        let mut appended = 0;
        for event in events {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            state.entries.push(TimelineEntry {
                sequence,
                plugin_id: plugin_id.to_string(),
                category: category.to_string(),
                event,
            });
            appended += 1;
        }
        appended
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot sorted by (timestamp, sequence).
    pub fn events(&self) -> Vec<TimelineEntry> {
        let mut entries = self.lock().entries.clone();
        entries.sort_by(|a, b| {
            a.event
                .timestamp
                .cmp(&b.event.timestamp)
                .then(a.sequence.cmp(&b.sequence))
        });
        entries
    }

    /// Writes the ordered timeline to a `timeline` table in `path`,
    /// replacing any previous contents, in one transaction.
    pub fn persist_sqlite(&self, path: &Path) -> Result<usize> {
        let entries = self.events();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory {}", parent.display()))?;
        }
        let mut conn = Connection::open(path)
            .context(format!("Failed to open timeline database {}", path.display()))?;
        conn.execute_batch(
            "
            DROP TABLE IF EXISTS timeline;
            CREATE TABLE timeline (
                position INTEGER PRIMARY KEY,
                timestamp TEXT NOT NULL,
                unix_time INTEGER NOT NULL,
                plugin_id TEXT NOT NULL,
                category TEXT NOT NULL,
                source_artifact_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                fields TEXT NOT NULL
            );
            ",
        )
        .context("Failed to create timeline table")?;

        let tx = conn.transaction().context("Failed to start timeline transaction")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO timeline
                 (position, timestamp, unix_time, plugin_id, category, source_artifact_id, sequence, fields)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, entry) in entries.iter().enumerate() {
                let fields = serde_json::to_string(&entry.event.fields)
                    .context("Failed to serialize timeline fields")?;
                stmt.execute(params![
                    position as i64,
                    entry.event.timestamp.to_rfc3339(),
                    entry.event.timestamp.timestamp(),
                    entry.plugin_id,
                    entry.category,
                    entry.event.source_artifact_id,
                    entry.sequence as i64,
                    fields,
                ])?;
            }
        }
        tx.commit().context("Failed to commit timeline")?;

        info!("Wrote {} timeline events to {}", entries.len(), path.display());
        Ok(entries.len())
    }
}
