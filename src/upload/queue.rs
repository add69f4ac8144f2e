//! Enqueue operations and local folder scanning.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use walkdir::WalkDir;

use crate::retry::with_rate_limit_retry;
use crate::store::{NewUploadJob, UploadUpdate};
use crate::types::{FOLDER_ID_PREFIX, UPLOAD_ID_PREFIX, UploadStatus, generate_id};
use crate::{Error, Result};

use super::UploadManager;

impl UploadManager {
    /// Queue a single local file for upload into a remote directory
    pub async fn upload_file(&self, path: &Path, target_dir_id: &str) -> Result<String> {
        let job_id = self
            .insert_pending_file(path, target_dir_id, None)
            .await?;
        self.queue.lock().await.push_back(job_id.clone());
        self.emit_changed();
        self.kick_queue();
        Ok(job_id)
    }

    /// Queue several files into the same remote directory
    pub async fn upload_files(&self, paths: &[PathBuf], target_dir_id: &str) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            ids.push(self.insert_pending_file(path, target_dir_id, None).await?);
        }
        {
            let mut queue = self.queue.lock().await;
            for id in &ids {
                queue.push_back(id.clone());
            }
        }
        self.emit_changed();
        self.kick_queue();
        Ok(ids)
    }

    /// Queue a local folder: scan it, mirror its directory tree remotely,
    /// then queue every file into its mirrored directory.
    ///
    /// Children are persisted as `pending` before any transfer starts, so
    /// the folder's file set is durable from the outset.
    pub async fn upload_folder(&self, path: &Path, target_dir_id: &str) -> Result<String> {
        let folder_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Other(format!("{} has no folder name", path.display())))?;

        let (files, dirs) = scan_folder(path)?;
        let total_size: u64 = files.iter().map(|(_, size)| *size).sum();
        info!(
            folder = %folder_name,
            files = files.len(),
            dirs = dirs.len(),
            "local folder scanned"
        );

        let folder_job_id = generate_id(FOLDER_ID_PREFIX);
        self.store
            .upsert_upload(&NewUploadJob {
                id: folder_job_id.clone(),
                name: folder_name.clone(),
                local_path: path.to_string_lossy().into_owned(),
                target_dir_id: target_dir_id.to_string(),
                status: UploadStatus::Uploading,
                size: total_size as i64,
                parent_id: None,
            })
            .await?;
        self.store
            .update_upload(
                &folder_job_id,
                &UploadUpdate {
                    total_files: Some(files.len() as i64),
                    ..Default::default()
                },
            )
            .await?;
        self.emit_changed();

        // Mirror the directory tree remotely before any file needs it
        let dir_ids = match self
            .create_remote_dirs(target_dir_id, &folder_name, &dirs)
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                warn!(folder = %folder_name, error = %e, "remote directory creation failed");
                self.store
                    .update_upload(
                        &folder_job_id,
                        &UploadUpdate {
                            status: Some(UploadStatus::Error),
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

        let mut child_ids = Vec::with_capacity(files.len());
        for (file_path, _) in &files {
            let rel_dir = file_path
                .strip_prefix(path)
                .map_err(|e| Error::Other(e.to_string()))?
                .parent()
                .unwrap_or_else(|| Path::new(""));
            let remote_dir = dir_ids
                .get(rel_dir)
                .ok_or_else(|| Error::Other(format!("missing remote dir for {rel_dir:?}")))?;
            let id = self
                .insert_pending_file(file_path, remote_dir, Some(&folder_job_id))
                .await?;
            child_ids.push(id);
        }

        if files.is_empty() {
            self.store
                .update_upload(
                    &folder_job_id,
                    &UploadUpdate {
                        status: Some(UploadStatus::Complete),
                        progress: Some(100.0),
                        completed_at: Some(Some(chrono::Utc::now().timestamp())),
                        ..Default::default()
                    },
                )
                .await?;
        }

        {
            let mut queue = self.queue.lock().await;
            for id in child_ids {
                queue.push_back(id);
            }
        }
        self.emit_changed();
        self.kick_queue();

        Ok(folder_job_id)
    }

    async fn insert_pending_file(
        &self,
        path: &Path,
        target_dir_id: &str,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(Error::Other(format!("{} is not a file", path.display())));
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Other(format!("{} has no file name", path.display())))?;

        let job_id = generate_id(UPLOAD_ID_PREFIX);
        self.store
            .upsert_upload(&NewUploadJob {
                id: job_id.clone(),
                name,
                local_path: path.to_string_lossy().into_owned(),
                target_dir_id: target_dir_id.to_string(),
                status: UploadStatus::Pending,
                size: metadata.len() as i64,
                parent_id: parent_id.map(str::to_string),
            })
            .await?;
        Ok(job_id)
    }

    /// Create the remote directory tree, parents strictly before children.
    ///
    /// Directories are created shallowest first, lexically within a depth,
    /// so every `create_folder` call can name an already-created parent.
    /// Returns the remote id for each relative directory, keyed by the path
    /// relative to the folder root (the root itself is the empty path).
    async fn create_remote_dirs(
        &self,
        target_dir_id: &str,
        folder_name: &str,
        dirs: &[PathBuf],
    ) -> Result<HashMap<PathBuf, String>> {
        let mut ordered: Vec<&PathBuf> = dirs.iter().collect();
        ordered.sort_by_key(|d| (d.components().count(), d.to_path_buf()));

        let mut ids: HashMap<PathBuf, String> = HashMap::new();
        let root_id = self
            .create_remote_dir(target_dir_id, folder_name)
            .await?;
        ids.insert(PathBuf::new(), root_id);

        for dir in ordered {
            let parent_rel = dir.parent().unwrap_or_else(|| Path::new(""));
            let parent_id = ids
                .get(parent_rel)
                .ok_or_else(|| Error::Other(format!("missing parent dir for {dir:?}")))?
                .clone();
            let name = dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| Error::Other(format!("bad directory name in {dir:?}")))?;
            let id = self.create_remote_dir(&parent_id, &name).await?;
            ids.insert(dir.clone(), id);
            tokio::time::sleep(self.config.upload.queue_delay).await;
        }

        Ok(ids)
    }

    async fn create_remote_dir(&self, parent_id: &str, name: &str) -> Result<String> {
        let drive = self.drive.clone();
        let parent = parent_id.to_string();
        let name = name.to_string();
        let id = with_rate_limit_retry(&self.config.queue, || {
            let drive = drive.clone();
            let parent = parent.clone();
            let name = name.clone();
            async move { drive.create_folder(&parent, &name).await }
        })
        .await?;
        Ok(id)
    }
}

/// Collect files (with sizes) and relative subdirectories under a root
fn scan_folder(root: &Path) -> Result<(Vec<(PathBuf, u64)>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| Error::Other(e.to_string()))?;
        if entry.path() == root {
            continue;
        }
        if entry.file_type().is_dir() {
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| Error::Other(e.to_string()))?
                .to_path_buf();
            dirs.push(rel);
        } else if entry.file_type().is_file() {
            let size = entry.metadata().map_err(|e| Error::Other(e.to_string()))?.len();
            files.push((entry.path().to_path_buf(), size));
        }
    }
    files.sort();
    dirs.sort();
    Ok((files, dirs))
}
