//! Download orchestration split into focused submodules.
//!
//! The `DownloadManager` struct and its methods are organized by domain:
//! - [`queue`] - Submission queue and folder enumeration
//! - [`control`] - Job lifecycle control (pause/resume/retry/remove)
//! - [`reconcile`] - Periodic status reconciliation against the engine
//! - [`recovery`] - Crash recovery on startup
//!
//! The engine owns the transfer mechanics; this module owns durable job
//! records, the submission queue, and folder aggregation. A job's engine
//! handle doubles as its store id, so a resubmission always produces a new
//! record and retires the old one.

mod control;
mod queue;
mod reconcile;
mod recovery;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use tokio::sync::{Mutex, broadcast};

use crate::config::Config;
use crate::engine::{CloudDrive, DownloadEngine};
use crate::store::TransferStore;
use crate::types::{Domain, DownloadStatus, Event, TransferStats};

/// One entry of a mixed batch download selection
#[derive(Debug, Clone)]
pub enum DownloadSelection {
    /// A single remote file
    File {
        /// Opaque reference used to resolve a download URL
        source_ref: String,
        /// File name
        name: String,
        /// Size in bytes when known
        size: u64,
    },
    /// A remote folder, enumerated recursively
    Folder {
        /// Remote folder id
        remote_folder_id: String,
        /// Folder name, also the local directory name
        name: String,
    },
}

/// One pending submission in the download queue
#[derive(Debug, Clone)]
pub(crate) struct QueueItem {
    /// Opaque reference used to resolve a fresh download URL
    pub(crate) source_ref: String,
    /// File name
    pub(crate) name: String,
    /// Size in bytes when known
    pub(crate) size: u64,
    /// Local destination directory
    pub(crate) dest_dir: PathBuf,
    /// Submission attempts consumed so far
    pub(crate) retry_count: u32,
    /// Folder job this file belongs to, if any
    pub(crate) parent_id: Option<String>,
}

/// Download orchestrator (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct DownloadManager {
    /// Job store (public for integration tests to query job state)
    pub store: Arc<TransferStore>,
    pub(crate) engine: Arc<dyn DownloadEngine>,
    pub(crate) drive: Arc<dyn CloudDrive>,
    pub(crate) config: Arc<Config>,
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Pending submissions, drained strictly in order
    pub(crate) queue: Arc<Mutex<VecDeque<QueueItem>>>,
    /// True while a drain pass is running; keeps the drain single-flight
    pub(crate) processing: Arc<AtomicBool>,
    /// True while the reconciliation loop is awake
    pub(crate) polling: Arc<AtomicBool>,
}

impl DownloadManager {
    /// Create a download manager over an open store and engine adapters
    pub fn new(
        store: Arc<TransferStore>,
        engine: Arc<dyn DownloadEngine>,
        drive: Arc<dyn CloudDrive>,
        config: Arc<Config>,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            store,
            engine,
            drive,
            config,
            event_tx,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            processing: Arc::new(AtomicBool::new(false)),
            polling: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Subscribe to job events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event, ignoring the no-subscriber case
    pub(crate) fn emit(&self, event: Event) {
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn emit_changed(&self) {
        self.emit(Event::JobsChanged {
            domain: Domain::Download,
        });
    }

    /// Aggregate counts over top-level download jobs
    pub async fn stats(&self) -> crate::Result<TransferStats> {
        let jobs = self.store.list_top_level_downloads().await?;
        let mut stats = TransferStats {
            total: jobs.len(),
            ..Default::default()
        };
        for job in &jobs {
            match job.status {
                DownloadStatus::Active => {
                    stats.active += 1;
                    stats.total_speed += job.speed.max(0) as u64;
                }
                DownloadStatus::Waiting => stats.waiting += 1,
                DownloadStatus::Paused => stats.paused += 1,
                DownloadStatus::Complete => stats.completed += 1,
                DownloadStatus::Error | DownloadStatus::Removed => stats.failed += 1,
            }
        }
        Ok(stats)
    }
}
