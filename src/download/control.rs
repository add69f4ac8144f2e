//! Job lifecycle control: pause, resume, retry, remove.
//!
//! Engine calls made on behalf of a folder's children are best-effort; a
//! child the engine has already forgotten must not block the rest of the
//! folder, so per-child failures are logged and skipped.

use tracing::{info, warn};

use crate::store::{DownloadJob, DownloadUpdate};
use crate::types::{DownloadStatus, FAILED_ID_PREFIX, is_synthetic_id};
use crate::{Error, Result};

use super::{DownloadManager, QueueItem};

impl DownloadManager {
    /// Pause a job; folders pause every non-terminal child
    pub async fn pause(&self, id: &str) -> Result<()> {
        let job = self.require_download(id).await?;

        // The row is marked first; an engine report racing this pause is
        // then discarded as stale instead of reviving the job
        if job.is_folder() {
            for child in self.store.list_download_children(id).await? {
                if child.status.is_terminal() || is_synthetic_id(&child.id) {
                    continue;
                }
                self.mark_paused(&child.id).await?;
                if let Err(e) = self.engine.pause(&child.id).await {
                    warn!(child = %child.id, error = %e, "engine pause failed");
                }
            }
            self.mark_paused(id).await?;
        } else {
            self.mark_paused(id).await?;
            if !is_synthetic_id(id) {
                if let Err(e) = self.engine.pause(id).await {
                    warn!(id = %id, error = %e, "engine pause failed");
                }
            }
        }

        self.emit_changed();
        Ok(())
    }

    /// Resume a paused job; folders resume every paused child
    pub async fn resume(&self, id: &str) -> Result<()> {
        let job = self.require_download(id).await?;

        if job.is_folder() {
            for child in self.store.list_download_children(id).await? {
                if child.status != DownloadStatus::Paused || is_synthetic_id(&child.id) {
                    continue;
                }
                if let Err(e) = self.engine.unpause(&child.id).await {
                    warn!(child = %child.id, error = %e, "engine unpause failed");
                }
                self.mark_resumed(&child.id).await?;
            }
            self.mark_resumed(id).await?;
        } else {
            if !is_synthetic_id(id) {
                self.engine.unpause(id).await?;
            }
            self.mark_resumed(id).await?;
        }

        self.ensure_polling();
        self.emit_changed();
        Ok(())
    }

    /// Retry a failed leaf job.
    ///
    /// The old record is retired and the file goes back through the queue;
    /// a successful resubmission produces a fresh engine handle and row.
    pub async fn retry(&self, id: &str) -> Result<()> {
        let job = self.require_download(id).await?;
        if job.is_folder() {
            return self.retry_folder(id).await;
        }

        self.retry_leaf(&job).await?;
        self.emit_changed();
        self.kick_queue();
        Ok(())
    }

    /// Retry every failed child of a folder
    pub async fn retry_folder(&self, folder_id: &str) -> Result<()> {
        let folder = self.require_download(folder_id).await?;
        if !folder.is_folder() {
            return Err(Error::Other(format!("{folder_id} is not a folder job")));
        }

        let children = self.store.list_download_children(folder_id).await?;
        let mut retried = 0usize;
        for child in children {
            if child.status != DownloadStatus::Error {
                continue;
            }
            self.retry_leaf(&child).await?;
            retried += 1;
        }
        info!(folder = %folder_id, retried, "retrying failed folder children");

        // Failed counters restart from zero; aggregation rebuilds them as
        // the retried children resolve
        self.store
            .update_download(
                folder_id,
                &DownloadUpdate {
                    status: Some(DownloadStatus::Active),
                    failed_files: Some(0),
                    error_message: Some(None),
                    error_code: Some(None),
                    completed_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;

        self.emit_changed();
        self.kick_queue();
        Ok(())
    }

    /// Remove a job. Folders remove their children first, and any children
    /// still waiting in the queue are dropped before they can submit.
    pub async fn remove(&self, id: &str) -> Result<()> {
        let job = self.require_download(id).await?;

        if job.is_folder() {
            self.queue
                .lock()
                .await
                .retain(|item| item.parent_id.as_deref() != Some(id));

            for child in self.store.list_download_children(id).await? {
                self.detach_from_engine(&child).await;
            }
            self.store.delete_download_children(id).await?;
            self.store.delete_download(id).await?;
        } else {
            self.detach_from_engine(&job).await;
            self.store.delete_download(id).await?;
        }

        self.emit_changed();
        Ok(())
    }

    /// Delete all finished top-level jobs and their children
    pub async fn clear_finished(&self) -> Result<u64> {
        let removed = self.store.clear_finished_downloads().await?;
        if removed > 0 {
            self.emit_changed();
        }
        Ok(removed)
    }

    async fn retry_leaf(&self, job: &DownloadJob) -> Result<()> {
        if job.status != DownloadStatus::Error {
            return Err(Error::Other(format!(
                "job {} is not in a failed state",
                job.id
            )));
        }

        if !job.id.starts_with(FAILED_ID_PREFIX) {
            self.detach_from_engine(job).await;
        }
        self.store.delete_download(&job.id).await?;

        self.queue.lock().await.push_back(QueueItem {
            source_ref: job.source_ref.clone(),
            name: job.name.clone(),
            size: job.size.max(0) as u64,
            dest_dir: std::path::PathBuf::from(&job.dest_path),
            retry_count: 0,
            parent_id: job.parent_id.clone(),
        });
        Ok(())
    }

    /// Stop the engine's transfer and drop its history for a leaf job
    async fn detach_from_engine(&self, job: &DownloadJob) {
        if is_synthetic_id(&job.id) {
            return;
        }
        if !job.status.is_terminal() {
            if let Err(e) = self.engine.force_remove(&job.id).await {
                warn!(id = %job.id, error = %e, "engine force_remove failed");
            }
        }
        if let Err(e) = self.engine.purge_history(&job.id).await {
            warn!(id = %job.id, error = %e, "engine purge failed");
        }
    }

    async fn mark_paused(&self, id: &str) -> Result<()> {
        self.store
            .update_download(
                id,
                &DownloadUpdate {
                    status: Some(DownloadStatus::Paused),
                    speed: Some(0),
                    eta: Some(None),
                    ..Default::default()
                },
            )
            .await
    }

    async fn mark_resumed(&self, id: &str) -> Result<()> {
        self.store
            .update_download(
                id,
                &DownloadUpdate {
                    status: Some(DownloadStatus::Active),
                    ..Default::default()
                },
            )
            .await
    }

    async fn require_download(&self, id: &str) -> Result<DownloadJob> {
        self.store
            .get_download(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }
}
