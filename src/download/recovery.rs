//! Crash recovery on startup.
//!
//! The engine does not survive a host restart with usable state, so every
//! incomplete job is resubmitted from its source reference. The fresh
//! submission gets a new engine handle; the stale record is retired so ids
//! and handles never diverge.

use tracing::{info, warn};

use crate::retry::with_rate_limit_retry;
use crate::store::{DownloadJob, DownloadUpdate, NewDownloadJob};
use crate::types::DownloadStatus;
use crate::Result;

use super::DownloadManager;

impl DownloadManager {
    /// Recover persisted jobs after a process restart
    pub async fn recover(&self) -> Result<usize> {
        // A folder that never finished enumerating has an unknown file set;
        // it cannot be resumed, only retried from scratch
        for folder in self.store.list_enumerating_folders().await? {
            warn!(folder = %folder.id, "folder enumeration was interrupted");
            self.store
                .update_download(
                    &folder.id,
                    &DownloadUpdate {
                        status: Some(DownloadStatus::Error),
                        is_enumerating: Some(false),
                        error_message: Some(Some(
                            "folder enumeration was interrupted".to_string(),
                        )),
                        completed_at: Some(Some(chrono::Utc::now().timestamp())),
                        ..Default::default()
                    },
                )
                .await?;
        }

        let stale = self.store.list_incomplete_downloads().await?;
        if stale.is_empty() {
            self.aggregate_folders().await?;
            self.emit_changed();
            return Ok(0);
        }

        info!(count = stale.len(), "resubmitting incomplete downloads");
        let mut recovered = 0usize;
        for job in stale {
            match self.resubmit(&job).await {
                Ok(new_handle) => {
                    info!(old = %job.id, new = %new_handle, "download resubmitted");
                    recovered += 1;
                }
                Err(e) => {
                    warn!(id = %job.id, error = %e, "resubmission failed");
                    self.store
                        .update_download(
                            &job.id,
                            &DownloadUpdate {
                                status: Some(DownloadStatus::Error),
                                speed: Some(0),
                                eta: Some(None),
                                error_message: Some(Some(format!(
                                    "recovery failed: {e}"
                                ))),
                                completed_at: Some(Some(chrono::Utc::now().timestamp())),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
            }
            tokio::time::sleep(self.config.queue.submit_delay).await;
        }

        self.aggregate_folders().await?;
        self.ensure_polling();
        self.emit_changed();
        Ok(recovered)
    }

    /// Resolve a fresh URL and resubmit one stale job under a new handle
    async fn resubmit(&self, job: &DownloadJob) -> Result<String> {
        let drive = self.drive.clone();
        let source_ref = job.source_ref.clone();
        let link = with_rate_limit_retry(&self.config.queue, || {
            let drive = drive.clone();
            let source_ref = source_ref.clone();
            async move { drive.fetch_url(&source_ref).await }
        })
        .await?;

        let dest_dir = std::path::PathBuf::from(&job.dest_path);
        let handle = self.engine.submit(&link.url, &dest_dir, &job.name).await?;

        let was_paused = job.status == DownloadStatus::Paused;
        if was_paused {
            if let Err(e) = self.engine.pause(&handle).await {
                warn!(handle = %handle, error = %e, "failed to re-pause recovered job");
            }
        }

        self.store.delete_download(&job.id).await?;
        self.store
            .upsert_download(&NewDownloadJob {
                id: handle.clone(),
                name: job.name.clone(),
                source_ref: job.source_ref.clone(),
                dest_path: job.dest_path.clone(),
                status: if was_paused {
                    DownloadStatus::Paused
                } else {
                    DownloadStatus::Active
                },
                size: job.size,
                parent_id: job.parent_id.clone(),
                error_message: None,
            })
            .await?;

        Ok(handle)
    }
}
