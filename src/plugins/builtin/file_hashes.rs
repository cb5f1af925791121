use async_trait::async_trait;
use log::{debug, warn};

use crate::constants::DEFAULT_HASH_MAX_SIZE_MB;
use crate::error::{PluginFailure, SourceError};
use crate::models::ReportRow;
use crate::plugins::{ArtifactPlugin, PluginContext, PluginOutput};
use crate::utils::hash::sha256_file;

/// SHA-256 manifest of matched files.
///
/// Files that cannot be fetched or read are listed in the narrative and
/// skipped; only authentication failure or cancellation fails the plugin.
pub struct FileHashes {
    pub max_size_mb: u64,
}

impl Default for FileHashes {
    fn default() -> Self {
        Self {
            max_size_mb: DEFAULT_HASH_MAX_SIZE_MB,
        }
    }
}

#[async_trait]
impl ArtifactPlugin for FileHashes {
    async fn run(&self, ctx: &PluginContext, out: &mut PluginOutput) -> Result<(), PluginFailure> {
        let mut hashed = 0usize;
        match ctx.prefetch_all().await {
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => warn!("{}: prefetch failed, fetching one by one: {}", ctx.plugin_id, e),
            Ok(()) => {}
        }

        for record in &ctx.files {
            let local = match ctx.fetch(record).await {
                Ok(local) => local,
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    warn!("{}: could not fetch {}: {}", ctx.plugin_id, record.path, e);
                    out.note(format!("{}: {}", record.path, e));
                    continue;
                }
            };

            let max_size_mb = self.max_size_mb;
            let digest = tokio::task::spawn_blocking(move || sha256_file(&local, max_size_mb))
                .await
                .map_err(|e| PluginFailure::msg(format!("hash task failed: {}", e)))?;

            match digest {
                Err(e) => {
                    warn!("{}: could not read {}: {}", ctx.plugin_id, record.path, e);
                    out.note(format!("{}: unreadable: {}", record.path, e));
                }
                Ok(Some(digest)) => {
                    out.emit_row(
                        ReportRow::new()
                            .column("path", record.path.as_str())
                            .column("sha256", digest.sha256)
                            .column("size", digest.size),
                    );
                    hashed += 1;
                }
                Ok(None) => {
                    debug!("Not hashing {} (over {} MB)", record.path, max_size_mb);
                    out.note(format!("{}: larger than {} MB, not hashed", record.path, max_size_mb));
                }
            }
        }

        if ctx.is_cancelled() {
            return Err(SourceError::Cancelled.into());
        }
        out.note(format!("{} of {} files hashed", hashed, ctx.files.len()));
        Ok(())
    }
}
