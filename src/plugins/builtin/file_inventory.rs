use async_trait::async_trait;

use crate::error::PluginFailure;
use crate::models::{ReportRow, TimelineEvent};
use crate::plugins::{ArtifactPlugin, PluginContext, PluginOutput};

/// Lists matched files with their timestamps, in the spirit of a bodyfile.
///
/// Works from search metadata alone; nothing is fetched.
pub struct FileInventory;

#[async_trait]
impl ArtifactPlugin for FileInventory {
    async fn run(&self, ctx: &PluginContext, out: &mut PluginOutput) -> Result<(), PluginFailure> {
        let mut undated = 0usize;
        for record in &ctx.files {
            if ctx.is_cancelled() {
                return Err(crate::error::SourceError::Cancelled.into());
            }

            out.emit_row(
                ReportRow::new()
                    .column("path", record.path.as_str())
                    .column("name", record.file_name())
                    .column("size", record.size)
                    .column("modified", record.modified_time)
                    .column("created", record.created_time),
            );

            if record.modified_time.is_none() && record.created_time.is_none() {
                undated += 1;
            }
            if let Some(modified) = record.modified_time {
                out.emit_event(
                    TimelineEvent::new(modified, record.path.as_str())
                        .field("activity", "File Modified")
                        .field("size", record.size),
                );
            }
            if let Some(created) = record.created_time {
                out.emit_event(
                    TimelineEvent::new(created, record.path.as_str())
                        .field("activity", "File Created")
                        .field("size", record.size),
                );
            }
        }

        out.note(format!("{} files inventoried", ctx.files.len()));
        if undated > 0 {
            out.note(format!("{} files carry no timestamps", undated));
        }
        Ok(())
    }
}
