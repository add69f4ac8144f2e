//! Periodic status reconciliation against the download engine.
//!
//! The engine report is authoritative for leaves. Folder rows are never
//! reconciled directly; every pass re-derives them from their children so
//! the parent can only drift one interval behind, never permanently.

use std::collections::HashMap;
use std::sync::atomic::Ordering;

use tracing::{debug, warn};

use crate::aggregate::{ChildSnapshot, ChildState, FolderOutcome, derive_folder};
use crate::store::{DownloadJob, DownloadUpdate};
use crate::types::{Domain, DownloadStatus, Event, eta_secs, percent};
use crate::Result;

use super::DownloadManager;

impl DownloadManager {
    /// Wake the reconciliation loop if it is not already running
    pub(crate) fn ensure_polling(&self) {
        if self
            .polling
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.poll_loop().await;
        });
    }

    /// Poll until nothing is left to poll, then suspend.
    ///
    /// The loop re-arms itself via [`ensure_polling`](Self::ensure_polling)
    /// if work appeared in the window between the last pass and suspension.
    async fn poll_loop(&self) {
        debug!("reconciliation loop started");
        loop {
            tokio::time::sleep(self.config.poll.interval).await;

            let active = match self.reconcile_once().await {
                Ok(active) => active,
                Err(e) => {
                    warn!(error = %e, "reconciliation pass failed");
                    continue;
                }
            };

            if active == 0 && self.queue.lock().await.is_empty() {
                break;
            }
        }
        self.polling.store(false, Ordering::SeqCst);
        debug!("reconciliation loop suspended");

        // Work may have arrived while we were suspending
        if let Ok(jobs) = self.store.list_pollable_downloads().await {
            if !jobs.is_empty() {
                self.ensure_polling();
            }
        }
    }

    /// One reconciliation pass; returns the number of still-active jobs
    pub(crate) async fn reconcile_once(&self) -> Result<usize> {
        let jobs = self.store.list_pollable_downloads().await?;
        let mut still_active = 0usize;

        if !jobs.is_empty() {
            let handles: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
            let reports = match self.engine.batch_status(&handles).await {
                Ok(reports) => reports,
                Err(e) => {
                    warn!(error = %e, "engine batch status failed");
                    // Try again next interval; nothing is lost by waiting
                    return Ok(jobs.len());
                }
            };
            let by_handle: HashMap<&str, _> = reports
                .iter()
                .map(|r| (r.handle.as_str(), r))
                .collect();

            for job in &jobs {
                match by_handle.get(job.id.as_str()) {
                    Some(report) => {
                        if self.apply_report(job, report).await? {
                            still_active += 1;
                        }
                    }
                    None => {
                        warn!(id = %job.id, "engine no longer tracks job");
                        self.store
                            .update_download(
                                &job.id,
                                &DownloadUpdate {
                                    status: Some(DownloadStatus::Error),
                                    speed: Some(0),
                                    eta: Some(None),
                                    error_message: Some(Some(
                                        "download engine no longer tracks this job".to_string(),
                                    )),
                                    completed_at: Some(Some(chrono::Utc::now().timestamp())),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        self.emit(Event::JobFailed {
                            domain: Domain::Download,
                            id: job.id.clone(),
                            error: "download engine no longer tracks this job".to_string(),
                        });
                    }
                }
            }
        }

        self.aggregate_folders().await?;
        self.emit_changed();
        Ok(still_active)
    }

    /// Apply one engine report to a leaf row; true if the job is still live
    async fn apply_report(
        &self,
        job: &DownloadJob,
        report: &crate::engine::EngineJobStatus,
    ) -> Result<bool> {
        // A pause or remove may have landed after this pass took its
        // snapshot; the persisted status wins over an in-flight report
        let Some(current) = self.store.get_download(&job.id).await? else {
            return Ok(false);
        };
        if current.status == DownloadStatus::Paused && !report.status.is_terminal() {
            debug!(id = %job.id, "discarding stale report for paused job");
            return Ok(true);
        }

        let total = report.total_length;
        let completed = report.completed_length;
        let terminal = report.status.is_terminal();

        let update = DownloadUpdate {
            status: Some(report.status),
            // Engines report zero until they learn the size; keep ours then
            size: if total > 0 { Some(total as i64) } else { None },
            progress: Some(percent(completed, total)),
            speed: Some(if terminal { 0 } else { report.speed as i64 }),
            eta: Some(if terminal {
                None
            } else {
                eta_secs(total, completed, report.speed)
            }),
            error_message: if terminal {
                Some(report.error_message.clone())
            } else {
                None
            },
            error_code: if terminal {
                Some(report.error_code.clone())
            } else {
                None
            },
            completed_at: if terminal {
                Some(Some(chrono::Utc::now().timestamp()))
            } else {
                None
            },
            ..Default::default()
        };
        self.store.update_download(&job.id, &update).await?;

        match report.status {
            DownloadStatus::Complete => {
                // Done from our side; drop the engine's history entry so it
                // does not grow without bound
                if let Err(e) = self.engine.purge_history(&job.id).await {
                    warn!(id = %job.id, error = %e, "engine purge failed");
                }
                self.emit(Event::JobComplete {
                    domain: Domain::Download,
                    id: job.id.clone(),
                });
                Ok(false)
            }
            DownloadStatus::Error | DownloadStatus::Removed => {
                self.emit(Event::JobFailed {
                    domain: Domain::Download,
                    id: job.id.clone(),
                    error: report
                        .error_message
                        .clone()
                        .unwrap_or_else(|| "download failed".to_string()),
                });
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    /// Re-derive every folder row from its children
    pub(crate) async fn aggregate_folders(&self) -> Result<()> {
        let folders: Vec<DownloadJob> = self
            .store
            .list_top_level_downloads()
            .await?
            .into_iter()
            .filter(|j| j.is_folder() && !j.is_enumerating)
            .collect();

        for folder in folders {
            let children = self.store.list_download_children(&folder.id).await?;
            if children.is_empty() && !folder.status.is_terminal() {
                continue;
            }

            let snapshots: Vec<ChildSnapshot> = children
                .iter()
                .map(|c| ChildSnapshot {
                    state: match c.status {
                        DownloadStatus::Complete => ChildState::Complete,
                        DownloadStatus::Error | DownloadStatus::Removed => ChildState::Failed,
                        DownloadStatus::Paused => ChildState::Paused,
                        DownloadStatus::Active => ChildState::Active,
                        DownloadStatus::Waiting => ChildState::Queued,
                    },
                    size: c.size.max(0) as u64,
                    progress: c.progress,
                    speed: c.speed.max(0) as u64,
                })
                .collect();

            let rollup = derive_folder(&snapshots, folder.total_files.max(0) as u32);
            let (status, error_message) = match rollup.outcome {
                FolderOutcome::Complete => (DownloadStatus::Complete, None),
                FolderOutcome::Error => (
                    DownloadStatus::Error,
                    Some(format!("{} file(s) failed", rollup.failed_files)),
                ),
                FolderOutcome::Paused => (DownloadStatus::Paused, None),
                FolderOutcome::Active => (DownloadStatus::Active, None),
            };

            let became_terminal = status.is_terminal() && !folder.status.is_terminal();
            self.store
                .update_download(
                    &folder.id,
                    &DownloadUpdate {
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
                    DownloadStatus::Complete => self.emit(Event::JobComplete {
                        domain: Domain::Download,
                        id: folder.id.clone(),
                    }),
                    _ => self.emit(Event::JobFailed {
                        domain: Domain::Download,
                        id: folder.id.clone(),
                        error: error_message.unwrap_or_else(|| "folder failed".to_string()),
                    }),
                }
            }
        }

        Ok(())
    }
}
