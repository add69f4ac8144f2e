//! User-facing upload controls: pause, resume, retry, remove.

use tracing::{debug, info};

use crate::store::{UploadJob, UploadUpdate};
use crate::types::UploadStatus;
use crate::{Error, Result};

use super::UploadManager;

impl UploadManager {
    /// Pause an upload, or every in-flight child of a folder.
    ///
    /// Cached digests, resume token and session survive a pause; resuming
    /// picks the transfer back up without re-hashing.
    pub async fn pause(&self, id: &str) -> Result<()> {
        let job = self.require_upload(id).await?;
        if job.is_folder() {
            for child in self.store.list_upload_children(id).await? {
                if child.status.is_in_flight() {
                    self.pause_leaf(&child).await?;
                }
            }
            self.store
                .update_upload(
                    id,
                    &UploadUpdate {
                        status: Some(UploadStatus::Paused),
                        speed: Some(0),
                        eta: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            self.pause_leaf(&job).await?;
        }
        self.aggregate_folders().await?;
        self.emit_changed();
        Ok(())
    }

    async fn pause_leaf(&self, job: &UploadJob) -> Result<()> {
        info!(id = %job.id, "pausing upload");
        if let Some(token) = self.active.lock().await.get(&job.id) {
            token.cancel();
        }
        self.store
            .update_upload(
                &job.id,
                &UploadUpdate {
                    status: Some(UploadStatus::Paused),
                    speed: Some(0),
                    eta: Some(None),
                    ..Default::default()
                },
            )
            .await
    }

    /// Resume a paused upload, or every paused child of a folder
    pub async fn resume(&self, id: &str) -> Result<()> {
        let job = self.require_upload(id).await?;
        if job.is_folder() {
            for child in self.store.list_upload_children(id).await? {
                if child.status == UploadStatus::Paused {
                    self.resume_leaf(&child.id).await?;
                }
            }
            self.store
                .update_upload(
                    id,
                    &UploadUpdate {
                        status: Some(UploadStatus::Uploading),
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            if job.status != UploadStatus::Paused {
                debug!(id = %id, status = %job.status.as_str(), "resume ignored");
                return Ok(());
            }
            self.resume_leaf(id).await?;
        }
        self.aggregate_folders().await?;
        self.emit_changed();
        self.kick_queue();
        Ok(())
    }

    async fn resume_leaf(&self, id: &str) -> Result<()> {
        self.store
            .update_upload(
                id,
                &UploadUpdate {
                    status: Some(UploadStatus::Pending),
                    ..Default::default()
                },
            )
            .await?;
        self.queue.lock().await.push_back(id.to_string());
        Ok(())
    }

    /// Retry a failed upload, or every failed child of a folder.
    ///
    /// The job keeps its id and cached digests, so a retry skips straight
    /// past the hashing step.
    pub async fn retry(&self, id: &str) -> Result<()> {
        let job = self.require_upload(id).await?;
        if job.is_folder() {
            for child in self.store.list_upload_children(id).await? {
                if child.status == UploadStatus::Error {
                    self.retry_leaf(&child.id).await?;
                }
            }
            self.store
                .update_upload(
                    id,
                    &UploadUpdate {
                        status: Some(UploadStatus::Uploading),
                        failed_files: Some(0),
                        error_message: Some(None),
                        completed_at: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
        } else {
            if job.status != UploadStatus::Error {
                debug!(id = %id, status = %job.status.as_str(), "retry ignored");
                return Ok(());
            }
            self.retry_leaf(id).await?;
        }
        self.emit_changed();
        self.kick_queue();
        Ok(())
    }

    async fn retry_leaf(&self, id: &str) -> Result<()> {
        info!(id = %id, "retrying failed upload");
        self.store
            .update_upload(
                id,
                &UploadUpdate {
                    status: Some(UploadStatus::Pending),
                    progress: Some(0.0),
                    speed: Some(0),
                    eta: Some(None),
                    error_message: Some(None),
                    completed_at: Some(None),
                    ..Default::default()
                },
            )
            .await?;
        self.queue.lock().await.push_back(id.to_string());
        Ok(())
    }

    /// Cancel an upload and delete its record, cascading over folders
    pub async fn remove(&self, id: &str) -> Result<()> {
        let job = self.require_upload(id).await?;
        if job.is_folder() {
            let children = self.store.list_upload_children(id).await?;
            let child_ids: std::collections::HashSet<String> =
                children.iter().map(|c| c.id.clone()).collect();
            self.queue.lock().await.retain(|qid| !child_ids.contains(qid));
            {
                let active = self.active.lock().await;
                for child in &children {
                    if let Some(token) = active.get(&child.id) {
                        token.cancel();
                    }
                }
            }
            let removed = self.store.delete_upload_children(id).await?;
            self.store.delete_upload(id).await?;
            info!(id = %id, children = removed, "removed upload folder");
        } else {
            self.queue.lock().await.retain(|qid| qid != id);
            if let Some(token) = self.active.lock().await.get(id) {
                token.cancel();
            }
            self.store.delete_upload(id).await?;
            info!(id = %id, "removed upload");
        }
        self.aggregate_folders().await?;
        self.emit_changed();
        Ok(())
    }

    /// Drop every finished top-level upload and its children
    pub async fn clear_finished(&self) -> Result<u64> {
        let removed = self.store.clear_finished_uploads().await?;
        if removed > 0 {
            info!(removed, "cleared finished uploads");
            self.emit_changed();
        }
        Ok(removed)
    }

    async fn require_upload(&self, id: &str) -> Result<UploadJob> {
        self.store
            .get_upload(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("upload job {id} not found")))
    }
}
