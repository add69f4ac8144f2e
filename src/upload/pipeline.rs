//! The per-file upload pipeline: hash, initialize, transfer.
//!
//! Stale-event rule: a transfer task only learns about a pause or cancel
//! when its token fires, so progress events can keep arriving briefly after
//! control changed the persisted status. Every progress write re-checks the
//! persisted status first and discards the event if the job is no longer
//! in flight.

use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use sha1::{Digest, Sha1};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::{InitOutcome, InitRequest, RemoteTarget, TransferEvent, TransferRequest};
use crate::error::{EngineError, EngineErrorKind};
use crate::retry::with_rate_limit_retry;
use crate::store::{UploadJob, UploadUpdate};
use crate::types::{Domain, Event, UploadStatus, eta_secs, percent};
use crate::{Error, Result};

use super::UploadManager;

impl UploadManager {
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
            if !manager.queue.lock().await.is_empty() {
                manager.kick_queue();
            }
        });
    }

    /// Run queued jobs through the pipeline strictly in order
    async fn drain_queue(&self) {
        loop {
            let Some(job_id) = self.queue.lock().await.pop_front() else {
                break;
            };

            if let Err(e) = self.process_item(&job_id).await {
                warn!(id = %job_id, error = %e, "upload pipeline error");
            }
            if let Err(e) = self.aggregate_folders().await {
                warn!(error = %e, "upload aggregation failed");
            }
            self.emit_changed();
            tokio::time::sleep(self.config.upload.queue_delay).await;
        }
    }

    async fn process_item(&self, job_id: &str) -> Result<()> {
        let Some(job) = self.store.get_upload(job_id).await? else {
            // Removed while it sat in the queue
            return Ok(());
        };
        if job.status != UploadStatus::Pending {
            debug!(id = %job_id, status = %job.status.as_str(), "skipping non-pending job");
            return Ok(());
        }

        let (content_hash, prefix_hash) = self.ensure_hashes(&job).await?;

        // A pause or cancel may have landed while hashing
        let Some(job) = self.store.get_upload(job_id).await? else {
            return Ok(());
        };
        if !job.status.is_in_flight() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        self.active
            .lock()
            .await
            .insert(job_id.to_string(), cancel.clone());
        let result = self
            .run_upload(&job, &content_hash, &prefix_hash, cancel)
            .await;
        self.active.lock().await.remove(job_id);

        match result {
            Ok(()) => Ok(()),
            Err(Error::Engine(e)) if e.kind == EngineErrorKind::Cancelled => {
                // Control already set the job's state; nothing to record
                Ok(())
            }
            Err(e) => {
                self.store
                    .update_upload(
                        job_id,
                        &UploadUpdate {
                            status: Some(UploadStatus::Error),
                            speed: Some(0),
                            eta: Some(None),
                            error_message: Some(Some(e.to_string())),
                            completed_at: Some(Some(chrono::Utc::now().timestamp())),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.emit(Event::JobFailed {
                    domain: Domain::Upload,
                    id: job_id.to_string(),
                    error: e.to_string(),
                });
                Ok(())
            }
        }
    }

    /// Compute (or reuse) the content and prefix digests for a job
    async fn ensure_hashes(&self, job: &UploadJob) -> Result<(String, String)> {
        if let (Some(content), Some(prefix)) = (&job.content_hash, &job.prefix_hash) {
            debug!(id = %job.id, "digests cached, skipping hash step");
            return Ok((content.clone(), prefix.clone()));
        }

        self.store
            .update_upload(
                &job.id,
                &UploadUpdate {
                    status: Some(UploadStatus::Hashing),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_changed();

        let path = PathBuf::from(&job.local_path);
        let prefix_size = self.config.upload.prefix_hash_size;
        let (content_hash, prefix_hash) =
            tokio::task::spawn_blocking(move || hash_file(&path, prefix_size))
                .await
                .map_err(|e| Error::Other(format!("hashing task panicked: {e}")))??;

        self.store
            .update_upload(
                &job.id,
                &UploadUpdate {
                    content_hash: Some(content_hash.clone()),
                    prefix_hash: Some(prefix_hash.clone()),
                    ..Default::default()
                },
            )
            .await?;

        Ok((content_hash, prefix_hash))
    }

    async fn run_upload(
        &self,
        job: &UploadJob,
        content_hash: &str,
        prefix_hash: &str,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut request = InitRequest {
            file_name: job.name.clone(),
            file_size: job.size.max(0) as u64,
            content_hash: content_hash.to_string(),
            prefix_hash: prefix_hash.to_string(),
            target_dir_id: job.target_dir_id.clone(),
            range_hash: None,
            sign_key: None,
        };

        let mut response = match &job.resume_token {
            Some(token) => match self.service.resume(token, &request).await {
                Ok(response) => response,
                Err(e) if e.is_rate_limited() => return Err(e.into()),
                Err(e) => {
                    // The token went stale server-side; start over
                    warn!(id = %job.id, error = %e, "resume rejected, reinitializing");
                    self.store
                        .update_upload(
                            &job.id,
                            &UploadUpdate {
                                resume_token: Some(None),
                                ..Default::default()
                            },
                        )
                        .await?;
                    self.init_with_retry(&request).await?
                }
            },
            None => self.init_with_retry(&request).await?,
        };

        let challenge = match &response.outcome {
            InitOutcome::SecondFactor {
                sign_key,
                check_range,
            } => Some((sign_key.clone(), check_range.clone())),
            _ => None,
        };
        if let Some((sign_key, check_range)) = challenge {
            // Prove possession by hashing the server-chosen byte range
            let (start, end) = parse_check_range(&check_range)?;
            let path = PathBuf::from(&job.local_path);
            let range_hash = tokio::task::spawn_blocking(move || hash_range(&path, start, end))
                .await
                .map_err(|e| Error::Other(format!("hashing task panicked: {e}")))??;
            request.sign_key = Some(sign_key);
            request.range_hash = Some(range_hash);
            response = self.init_with_retry(&request).await?;
        }

        self.store
            .update_upload(
                &job.id,
                &UploadUpdate {
                    resume_token: Some(Some(response.resume_token.clone())),
                    ..Default::default()
                },
            )
            .await?;

        match response.outcome {
            InitOutcome::Instant { file_id } => {
                info!(id = %job.id, "content known server-side, instant completion");
                self.complete(&job.id, Some(file_id)).await
            }
            InitOutcome::SecondFactor { .. } => Err(Error::Other(
                "upload service repeated its possession challenge".to_string(),
            )),
            InitOutcome::NeedsTransfer { target } => {
                self.transfer_with_refresh(&job.id, target, cancel).await
            }
        }
    }

    async fn init_with_retry(
        &self,
        request: &InitRequest,
    ) -> std::result::Result<crate::engine::InitResponse, EngineError> {
        let service = self.service.clone();
        with_rate_limit_retry(&self.config.queue, || {
            let service = service.clone();
            let request = request.clone();
            async move { service.initialize(&request).await }
        })
        .await
    }

    /// Run the multipart transfer, refreshing expired credentials in place.
    ///
    /// A credential refresh reuses the multipart session already uploaded
    /// to; only a changed destination or an invalid session starts over.
    async fn transfer_with_refresh(
        &self,
        job_id: &str,
        target: RemoteTarget,
        cancel: CancellationToken,
    ) -> Result<()> {
        let Some(job) = self.store.get_upload(job_id).await? else {
            return Ok(());
        };

        // A recorded session is only valid against the destination it was
        // opened for
        let destination_changed = match (&job.remote_bucket, &job.remote_object) {
            (Some(bucket), Some(object)) => *bucket != target.bucket || *object != target.object,
            _ => false,
        };
        self.store
            .update_upload(
                job_id,
                &UploadUpdate {
                    status: Some(UploadStatus::Uploading),
                    session_id: if destination_changed { Some(None) } else { None },
                    remote_bucket: Some(Some(target.bucket.clone())),
                    remote_object: Some(Some(target.object.clone())),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_changed();

        let local_path = PathBuf::from(&job.local_path);
        let mut refreshes = 0u32;
        let mut session_reset = false;
        loop {
            if cancel.is_cancelled() {
                return Err(EngineError::cancelled().into());
            }

            let credentials = self.service.get_credentials().await.map_err(Error::from)?;

            // Session id is re-read each attempt; an attempt that got far
            // enough to open a session leaves it behind for the next one
            let session_id = self
                .store
                .get_upload(job_id)
                .await?
                .and_then(|j| j.session_id);

            let (event_tx, event_rx) = mpsc::channel(64);
            let consumer = tokio::spawn({
                let manager = self.clone();
                let job_id = job_id.to_string();
                async move { manager.consume_events(&job_id, event_rx).await }
            });

            let request = TransferRequest {
                local_path: local_path.clone(),
                target: target.clone(),
                session_id,
            };
            let result = self
                .uploader
                .transfer(&credentials, &request, event_tx, cancel.clone())
                .await;
            let _ = consumer.await;

            match result {
                Ok(()) => return self.complete(job_id, None).await,
                Err(e)
                    if e.kind == EngineErrorKind::CredentialsExpired
                        && refreshes < self.config.upload.max_credential_refreshes =>
                {
                    refreshes += 1;
                    warn!(
                        id = %job_id,
                        attempt = refreshes,
                        "storage credentials expired, refreshing"
                    );
                }
                Err(e) if e.kind == EngineErrorKind::SessionInvalid && !session_reset => {
                    warn!(id = %job_id, "multipart session rejected, restarting transfer");
                    session_reset = true;
                    self.store
                        .update_upload(
                            job_id,
                            &UploadUpdate {
                                session_id: Some(None),
                                ..Default::default()
                            },
                        )
                        .await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Apply transfer events to the job row as they arrive
    async fn consume_events(&self, job_id: &str, mut events: mpsc::Receiver<TransferEvent>) {
        while let Some(event) = events.recv().await {
            let result = match event {
                TransferEvent::SessionEstablished { session_id } => {
                    // Persisted immediately so an interruption can resume
                    self.store
                        .update_upload(
                            job_id,
                            &UploadUpdate {
                                session_id: Some(Some(session_id)),
                                ..Default::default()
                            },
                        )
                        .await
                }
                TransferEvent::Progress {
                    uploaded,
                    total,
                    speed,
                } => {
                    let current = match self.store.get_upload(job_id).await {
                        Ok(Some(job)) => job,
                        _ => continue,
                    };
                    if current.status != UploadStatus::Uploading {
                        debug!(id = %job_id, "discarding stale progress event");
                        continue;
                    }
                    let update = UploadUpdate {
                        progress: Some(percent(uploaded, total)),
                        speed: Some(speed as i64),
                        eta: Some(eta_secs(total, uploaded, speed)),
                        ..Default::default()
                    };
                    let result = self.store.update_upload(job_id, &update).await;
                    self.emit_changed();
                    result
                }
                TransferEvent::Completed => Ok(()),
            };
            if let Err(e) = result {
                warn!(id = %job_id, error = %e, "failed to persist transfer event");
            }
        }
    }

    /// Mark a job complete and clear its session state
    async fn complete(&self, job_id: &str, remote_file_id: Option<String>) -> Result<()> {
        self.store
            .update_upload(
                job_id,
                &UploadUpdate {
                    status: Some(UploadStatus::Complete),
                    progress: Some(100.0),
                    speed: Some(0),
                    eta: Some(None),
                    session_id: Some(None),
                    remote_bucket: Some(None),
                    remote_object: Some(None),
                    remote_file_id,
                    completed_at: Some(Some(chrono::Utc::now().timestamp())),
                    ..Default::default()
                },
            )
            .await?;
        self.emit(Event::JobComplete {
            domain: Domain::Upload,
            id: job_id.to_string(),
        });
        Ok(())
    }
}

/// Digest a whole file and its leading window in one pass
fn hash_file(path: &Path, prefix_size: u64) -> std::io::Result<(String, String)> {
    let mut file = std::fs::File::open(path)?;
    let mut full = Sha1::new();
    let mut prefix = Sha1::new();
    let mut remaining_prefix = prefix_size;
    let mut buf = vec![0u8; 1024 * 1024];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        full.update(&buf[..n]);
        if remaining_prefix > 0 {
            let take = remaining_prefix.min(n as u64) as usize;
            prefix.update(&buf[..take]);
            remaining_prefix -= take as u64;
        }
    }

    Ok((hex_upper(&full.finalize()), hex_upper(&prefix.finalize())))
}

/// Digest an inclusive byte range of a file
fn hash_range(path: &Path, start: u64, end: u64) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(start))?;
    let mut remaining = end.saturating_sub(start) + 1;
    let mut hasher = Sha1::new();
    let mut buf = vec![0u8; 1024 * 1024];

    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let n = file.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        remaining -= n as u64;
    }

    Ok(hex_upper(&hasher.finalize()))
}

fn hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Parse a possession-check range of the form `start-end` (inclusive)
fn parse_check_range(range: &str) -> Result<(u64, u64)> {
    let (start, end) = range
        .split_once('-')
        .ok_or_else(|| Error::Other(format!("malformed check range: {range}")))?;
    let start: u64 = start
        .trim()
        .parse()
        .map_err(|_| Error::Other(format!("malformed check range: {range}")))?;
    let end: u64 = end
        .trim()
        .parse()
        .map_err(|_| Error::Other(format!("malformed check range: {range}")))?;
    if end < start {
        return Err(Error::Other(format!("malformed check range: {range}")));
    }
    Ok((start, end))
}
