//! Submission queue and folder enumeration.

use std::path::PathBuf;
use std::sync::atomic::Ordering;

use tracing::{debug, info, warn};

use crate::engine::RemoteEntry;
use crate::error::EngineError;
use crate::retry::backoff_delay;
use crate::store::{DownloadUpdate, NewDownloadJob};
use crate::types::{Domain, DownloadStatus, Event, FAILED_ID_PREFIX, FOLDER_ID_PREFIX, generate_id};
use crate::{Error, Result};

use super::{DownloadManager, DownloadSelection, QueueItem};

/// Standing of a queued item's parent folder at drain time
enum ParentState {
    /// No parent, or the parent is still running
    Live,
    /// Parent folder is paused; submit but pause the engine job
    Paused,
    /// Parent folder was removed; the item is dropped
    Gone,
}

impl DownloadManager {
    /// Queue a single file for download
    pub async fn download_file(&self, source_ref: &str, name: &str, size: u64) -> Result<()> {
        let item = QueueItem {
            source_ref: source_ref.to_string(),
            name: name.to_string(),
            size,
            dest_dir: self.config.download_dir.clone(),
            retry_count: 0,
            parent_id: None,
        };
        self.queue.lock().await.push_back(item);
        self.kick_queue();
        Ok(())
    }

    /// Queue a mixed selection of files and folders.
    ///
    /// Folders are enumerated one at a time with the submission delay
    /// between them; a folder whose enumeration fails is left as a failed
    /// row and the rest of the batch continues. Returns the job ids of the
    /// folder jobs created.
    pub async fn download_batch(&self, selections: &[DownloadSelection]) -> Result<Vec<String>> {
        let mut folder_ids = Vec::new();
        for selection in selections {
            match selection {
                DownloadSelection::File {
                    source_ref,
                    name,
                    size,
                } => {
                    self.download_file(source_ref, name, *size).await?;
                }
                DownloadSelection::Folder {
                    remote_folder_id,
                    name,
                } => {
                    match self.download_folder(remote_folder_id, name).await {
                        Ok(id) => folder_ids.push(id),
                        Err(e) => {
                            warn!(folder = %name, error = %e, "batch folder skipped")
                        }
                    }
                    tokio::time::sleep(self.config.queue.submit_delay).await;
                }
            }
        }
        Ok(folder_ids)
    }

    /// Queue a remote folder: enumerate it fully, then queue every file.
    ///
    /// Enumeration is all-or-nothing. If any page fails or a cap is hit, the
    /// folder job is marked failed and no children are queued.
    pub async fn download_folder(&self, remote_folder_id: &str, folder_name: &str) -> Result<String> {
        let folder_job_id = generate_id(FOLDER_ID_PREFIX);
        let dest_dir = self.config.download_dir.join(folder_name);

        self.store
            .upsert_download(&NewDownloadJob {
                id: folder_job_id.clone(),
                name: folder_name.to_string(),
                source_ref: remote_folder_id.to_string(),
                dest_path: dest_dir.to_string_lossy().into_owned(),
                status: DownloadStatus::Waiting,
                size: 0,
                parent_id: None,
                error_message: None,
            })
            .await?;
        self.store
            .update_download(
                &folder_job_id,
                &DownloadUpdate {
                    is_enumerating: Some(true),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_changed();

        let files = match self.enumerate_folder(remote_folder_id, &dest_dir).await {
            Ok(files) => files,
            Err(e) => {
                warn!(folder = folder_name, error = %e, "folder enumeration failed");
                self.store
                    .update_download(
                        &folder_job_id,
                        &DownloadUpdate {
                            status: Some(DownloadStatus::Error),
                            is_enumerating: Some(false),
                            error_message: Some(Some(e.to_string())),
                            completed_at: Some(Some(chrono::Utc::now().timestamp())),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.emit_changed();
                return Err(e);
            }
        };

        let total_size: u64 = files.iter().map(|(entry, _)| entry.size).sum();
        let total = files.len() as i64;
        info!(folder = folder_name, files = total, "folder enumerated");

        // Empty folders have nothing to aggregate; resolve them directly
        let status = if files.is_empty() {
            Some(DownloadStatus::Complete)
        } else {
            None
        };
        self.store
            .update_download(
                &folder_job_id,
                &DownloadUpdate {
                    status,
                    size: Some(total_size as i64),
                    total_files: Some(total),
                    is_enumerating: Some(false),
                    progress: if files.is_empty() { Some(100.0) } else { None },
                    completed_at: if files.is_empty() {
                        Some(Some(chrono::Utc::now().timestamp()))
                    } else {
                        None
                    },
                    ..Default::default()
                },
            )
            .await?;
        self.emit_changed();

        {
            let mut queue = self.queue.lock().await;
            for (entry, dest_dir) in files {
                queue.push_back(QueueItem {
                    source_ref: entry.source_ref,
                    name: entry.name,
                    size: entry.size,
                    dest_dir,
                    retry_count: 0,
                    parent_id: Some(folder_job_id.clone()),
                });
            }
        }
        self.kick_queue();

        Ok(folder_job_id)
    }

    /// Walk a remote folder tree breadth-first, collecting leaf files and the
    /// local directory each should land in
    async fn enumerate_folder(
        &self,
        remote_folder_id: &str,
        dest_root: &std::path::Path,
    ) -> Result<Vec<(RemoteEntry, PathBuf)>> {
        let limits = &self.config.enumeration;
        let mut files = Vec::new();
        let mut worklist: Vec<(String, PathBuf, usize)> =
            vec![(remote_folder_id.to_string(), dest_root.to_path_buf(), 0)];
        let mut seen_entries: usize = 0;

        while let Some((folder_id, dir, depth)) = worklist.pop() {
            if depth > limits.max_depth {
                return Err(Error::EnumerationCap(format!(
                    "folder nesting exceeds {} levels",
                    limits.max_depth
                )));
            }

            let mut offset = 0u64;
            loop {
                let drive = self.drive.clone();
                let fid = folder_id.clone();
                let page_size = limits.page_size as u64;
                let page = crate::retry::with_rate_limit_retry(&self.config.queue, || {
                    let drive = drive.clone();
                    let fid = fid.clone();
                    async move { drive.list_folder(&fid, offset, page_size).await }
                })
                .await?;

                seen_entries += page.entries.len();
                if seen_entries > limits.max_entries {
                    return Err(Error::EnumerationCap(format!(
                        "folder contains more than {} entries",
                        limits.max_entries
                    )));
                }

                let fetched = page.entries.len() as u64;
                for entry in page.entries {
                    if entry.is_dir {
                        worklist.push((entry.id.clone(), dir.join(&entry.name), depth + 1));
                    } else {
                        files.push((entry, dir.clone()));
                    }
                }

                offset += fetched;
                if fetched == 0 || offset >= page.total_count {
                    break;
                }
                // Page pacing keeps the listing under the provider's rate limit
                tokio::time::sleep(limits.page_delay).await;
            }
        }

        Ok(files)
    }

    /// Start a drain pass unless one is already running
    pub(crate) fn kick_queue(&self) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            manager.drain_queue().await;
            manager.processing.store(false, Ordering::SeqCst);
            // Items queued while we were clearing the flag
            if !manager.queue.lock().await.is_empty() {
                manager.kick_queue();
            }
        });
    }

    /// Drain the queue strictly in order, one submission at a time
    async fn drain_queue(&self) {
        loop {
            let Some(item) = self.queue.lock().await.pop_front() else {
                break;
            };

            let parent_paused = match self.parent_state(&item).await {
                ParentState::Gone => {
                    debug!(name = %item.name, "dropping queued file, parent folder removed");
                    continue;
                }
                ParentState::Paused => true,
                ParentState::Live => false,
            };

            match self.submit_item(&item, parent_paused).await {
                Ok(handle) => {
                    debug!(name = %item.name, handle = %handle, "submitted to engine");
                    self.ensure_polling();
                    self.emit_changed();
                    tokio::time::sleep(self.config.queue.submit_delay).await;
                }
                Err(e) => self.handle_submit_failure(item, e).await,
            }
        }
    }

    /// How the item's parent folder stands right now, if it has one
    async fn parent_state(&self, item: &QueueItem) -> ParentState {
        let Some(parent_id) = &item.parent_id else {
            return ParentState::Live;
        };
        match self.store.get_download(parent_id).await {
            Ok(Some(parent)) => match parent.status {
                DownloadStatus::Paused => ParentState::Paused,
                DownloadStatus::Removed => ParentState::Gone,
                _ => ParentState::Live,
            },
            Ok(None) => ParentState::Gone,
            Err(e) => {
                warn!(error = %e, "parent lookup failed, keeping item");
                ParentState::Live
            }
        }
    }

    /// Resolve a fresh URL and hand the file to the engine.
    ///
    /// URLs are short-lived, so every attempt resolves anew; a URL cached
    /// across a backoff would be stale by the time it is used.
    ///
    /// A file whose folder was paused while it sat in the queue still
    /// submits; the engine job is paused right away and the row persisted
    /// as paused, so a folder resume picks it up with its siblings.
    async fn submit_item(
        &self,
        item: &QueueItem,
        parent_paused: bool,
    ) -> std::result::Result<String, EngineError> {
        let link = self.drive.fetch_url(&item.source_ref).await?;
        let handle = self
            .engine
            .submit(&link.url, &item.dest_dir, &item.name)
            .await?;

        if parent_paused {
            if let Err(e) = self.engine.pause(&handle).await {
                warn!(handle = %handle, error = %e, "engine pause failed");
            }
        }

        let persisted = self
            .store
            .upsert_download(&NewDownloadJob {
                id: handle.clone(),
                name: item.name.clone(),
                source_ref: item.source_ref.clone(),
                dest_path: item.dest_dir.to_string_lossy().into_owned(),
                status: if parent_paused {
                    DownloadStatus::Paused
                } else {
                    DownloadStatus::Active
                },
                size: item.size as i64,
                parent_id: item.parent_id.clone(),
                error_message: None,
            })
            .await;
        if let Err(e) = persisted {
            // The engine already owns the transfer; losing the record would
            // orphan it, so surface the failure loudly
            warn!(handle = %handle, error = %e, "failed to persist submitted job");
        }

        Ok(handle)
    }

    async fn handle_submit_failure(&self, mut item: QueueItem, error: EngineError) {
        if item.retry_count < self.config.queue.max_retries {
            item.retry_count += 1;
            let delay = if error.is_rate_limited() {
                backoff_delay(&self.config.queue, item.retry_count - 1)
            } else {
                self.config.queue.submit_delay
            };
            warn!(
                name = %item.name,
                attempt = item.retry_count,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "submission failed, will retry"
            );
            tokio::time::sleep(delay).await;
            self.queue.lock().await.push_front(item);
            return;
        }

        warn!(name = %item.name, error = %error, "submission retries exhausted");
        let stub_id = generate_id(FAILED_ID_PREFIX);
        let message = if error.is_rate_limited() {
            format!("rate limited: {}", error.message)
        } else {
            error.message.clone()
        };
        let persisted = self
            .store
            .upsert_download(&NewDownloadJob {
                id: stub_id.clone(),
                name: item.name.clone(),
                source_ref: item.source_ref.clone(),
                dest_path: item.dest_dir.to_string_lossy().into_owned(),
                status: DownloadStatus::Error,
                size: item.size as i64,
                parent_id: item.parent_id.clone(),
                error_message: Some(message.clone()),
            })
            .await;
        if let Err(e) = persisted {
            warn!(error = %e, "failed to persist failure stub");
        }
        // Consumers correlate the event with the stub row by id
        self.emit(Event::JobFailed {
            domain: Domain::Download,
            id: stub_id,
            error: message,
        });
        self.emit_changed();
    }
}
