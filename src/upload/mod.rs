//! Upload orchestration split into focused submodules.
//!
//! The `UploadManager` struct and its methods are organized by domain:
//! - [`queue`] - Enqueue operations and folder scanning
//! - [`pipeline`] - The per-file pipeline: hash, initialize, transfer
//! - [`control`] - Job lifecycle control (pause/resume/retry/cancel)
//! - [`recovery`] - Crash recovery on startup
//!
//! Each file moves through `pending -> hashing -> uploading -> complete`,
//! short-circuiting at `complete` when the service already knows the
//! content. All pipeline state worth resuming (digests, resume token,
//! multipart session) is persisted as soon as it is learned.

mod control;
mod pipeline;
mod queue;
mod recovery;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;

use crate::aggregate::{ChildSnapshot, ChildState, FolderOutcome, derive_folder};
use crate::config::Config;
use crate::engine::{CloudDrive, MultipartUploader, UploadService};
use crate::store::{TransferStore, UploadJob, UploadUpdate};
use crate::types::{Domain, Event, TransferStats, UploadStatus};
use crate::Result;

/// Upload orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct UploadManager {
    /// Job store (public for integration tests to query job state)
    pub store: Arc<TransferStore>,
    pub(crate) service: Arc<dyn UploadService>,
    pub(crate) drive: Arc<dyn CloudDrive>,
    pub(crate) uploader: Arc<dyn MultipartUploader>,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Job ids waiting for the pipeline, drained strictly in order
    pub(crate) queue: Arc<Mutex<VecDeque<String>>>,
    /// True while a drain pass is running
    pub(crate) processing: Arc<AtomicBool>,
    /// Cancellation tokens for transfers currently in flight
    pub(crate) active: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl UploadManager {
    /// Create an upload manager over an open store and service adapters
    pub fn new(
        store: Arc<TransferStore>,
        service: Arc<dyn UploadService>,
        drive: Arc<dyn CloudDrive>,
        uploader: Arc<dyn MultipartUploader>,
        config: Arc<Config>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            service,
            drive,
            uploader,
            config,
            event_tx,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            processing: Arc::new(AtomicBool::new(false)),
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to job events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn emit_changed(&self) {
        self.emit(Event::JobsChanged {
            domain: Domain::Upload,
        });
    }

    /// Aggregate counts over top-level upload jobs
    pub async fn stats(&self) -> Result<TransferStats> {
        let jobs = self.store.list_top_level_uploads().await?;
        let mut stats = TransferStats {
            total: jobs.len(),
            ..Default::default()
        };
        for job in &jobs {
            match job.status {
                UploadStatus::Uploading | UploadStatus::Hashing => {
                    stats.active += 1;
                    stats.total_speed += job.speed.max(0) as u64;
                }
                UploadStatus::Pending => stats.waiting += 1,
                UploadStatus::Paused => stats.paused += 1,
                UploadStatus::Complete => stats.completed += 1,
                UploadStatus::Error | UploadStatus::Cancelled => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    /// Re-derive every upload folder row from its children
    pub(crate) async fn aggregate_folders(&self) -> Result<()> {
        let folders: Vec<UploadJob> = self
            .store
            .list_top_level_uploads()
            .await?
            .into_iter()
            .filter(UploadJob::is_folder)
            .collect();

        for folder in folders {
            let children = self.store.list_upload_children(&folder.id).await?;
            if children.is_empty() && !folder.status.is_terminal() {
                continue;
            }

            let snapshots: Vec<ChildSnapshot> = children
                .iter()
                .map(|c| ChildSnapshot {
                    state: match c.status {
                        UploadStatus::Complete => ChildState::Complete,
                        UploadStatus::Error | UploadStatus::Cancelled => ChildState::Failed,
                        UploadStatus::Paused => ChildState::Paused,
                        UploadStatus::Uploading => ChildState::Active,
                        UploadStatus::Pending | UploadStatus::Hashing => ChildState::Queued,
                    },
                    size: c.size.max(0) as u64,
                    progress: c.progress,
                    speed: c.speed.max(0) as u64,
                })
                .collect();

            let rollup = derive_folder(&snapshots, folder.total_files.max(0) as u32);
            let (status, error_message) = match rollup.outcome {
                FolderOutcome::Complete => (UploadStatus::Complete, None),
                FolderOutcome::Error => (
                    UploadStatus::Error,
                    Some(format!("{} file(s) failed", rollup.failed_files)),
                ),
                FolderOutcome::Paused => (UploadStatus::Paused, None),
                FolderOutcome::Active => (UploadStatus::Uploading, None),
            };

            let became_terminal = status.is_terminal() && !folder.status.is_terminal();
            self.store
                .update_upload(
                    &folder.id,
                    &UploadUpdate {
                        status: Some(status),
                        size: Some(rollup.size as i64),
                        progress: Some(rollup.progress),
                        speed: Some(rollup.speed as i64),
                        eta: Some(rollup.eta),
                        error_message: Some(error_message.clone()),
                        completed_files: Some(rollup.completed_files as i64),
                        failed_files: Some(rollup.failed_files as i64),
                        completed_at: if became_terminal {
                            Some(Some(chrono::Utc::now().timestamp()))
                        } else if status.is_terminal() {
                            None
                        } else {
                            Some(None)
                        },
                        ..Default::default()
                    },
                )
                .await?;

            if became_terminal {
                match status {
                    UploadStatus::Complete => self.emit(Event::JobComplete {
                        domain: Domain::Upload,
                        id: folder.id.clone(),
                    }),
                    _ => self.emit(Event::JobFailed {
                        domain: Domain::Upload,
                        id: folder.id.clone(),
                        error: error_message.unwrap_or_else(|| "folder failed".to_string()),
                    }),
                }
            }
        }

        Ok(())
    }
}
