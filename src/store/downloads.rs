//! Download job CRUD operations.

use crate::error::StoreError;
use crate::types::{DownloadStatus, FAILED_ID_PREFIX, FOLDER_ID_PREFIX};
use crate::{Error, Result};

use super::{DownloadJob, DownloadUpdate, NewDownloadJob, TransferStore};

const DOWNLOAD_COLUMNS: &str = r#"
    id, name, source_ref, dest_path, status, size, progress, speed, eta,
    error_message, error_code, parent_id, total_files, completed_files,
    failed_files, is_enumerating, created_at, completed_at
"#;

impl TransferStore {
    /// Insert a download job, replacing any existing row with the same id.
    ///
    /// Replacement keeps recovery idempotent: re-persisting a job after a
    /// crash never duplicates it.
    pub async fn upsert_download(&self, job: &NewDownloadJob) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO downloads (
                id, name, source_ref, dest_path, status, size,
                progress, speed, error_message, parent_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.source_ref)
        .bind(&job.dest_path)
        .bind(job.status)
        .bind(job.size)
        .bind(0.0f64) // progress
        .bind(0i64) // speed
        .bind(&job.error_message)
        .bind(&job.parent_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to insert download: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Apply a partial update to a download job
    pub async fn update_download(&self, id: &str, update: &DownloadUpdate) -> Result<()> {
        if update_is_empty(update) {
            return Ok(());
        }

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE downloads SET ");
        let mut fields = qb.separated(", ");

        if let Some(status) = update.status {
            fields.push("status = ").push_bind_unseparated(status);
        }
        if let Some(size) = update.size {
            fields.push("size = ").push_bind_unseparated(size);
        }
        if let Some(progress) = update.progress {
            fields.push("progress = ").push_bind_unseparated(progress);
        }
        if let Some(speed) = update.speed {
            fields.push("speed = ").push_bind_unseparated(speed);
        }
        if let Some(eta) = &update.eta {
            fields.push("eta = ").push_bind_unseparated(*eta);
        }
        if let Some(message) = &update.error_message {
            fields
                .push("error_message = ")
                .push_bind_unseparated(message.clone());
        }
        if let Some(code) = &update.error_code {
            fields
                .push("error_code = ")
                .push_bind_unseparated(code.clone());
        }
        if let Some(total) = update.total_files {
            fields.push("total_files = ").push_bind_unseparated(total);
        }
        if let Some(completed) = update.completed_files {
            fields
                .push("completed_files = ")
                .push_bind_unseparated(completed);
        }
        if let Some(failed) = update.failed_files {
            fields.push("failed_files = ").push_bind_unseparated(failed);
        }
        if let Some(flag) = update.is_enumerating {
            fields.push("is_enumerating = ").push_bind_unseparated(flag);
        }
        if let Some(completed_at) = &update.completed_at {
            fields
                .push("completed_at = ")
                .push_bind_unseparated(*completed_at);
        }

        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to update download: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get a download job by id
    pub async fn get_download(&self, id: &str) -> Result<Option<DownloadJob>> {
        let row = sqlx::query_as::<_, DownloadJob>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to get download: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all download jobs, newest first
    pub async fn list_downloads(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query_as::<_, DownloadJob>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list downloads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List top-level download jobs (folders and standalone files)
    pub async fn list_top_level_downloads(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query_as::<_, DownloadJob>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE parent_id IS NULL ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list top-level downloads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List the children of a folder job
    pub async fn list_download_children(&self, parent_id: &str) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query_as::<_, DownloadJob>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE parent_id = ? ORDER BY created_at ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list download children: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List folder jobs still flagged as enumerating
    pub async fn list_enumerating_folders(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query_as::<_, DownloadJob>(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE is_enumerating = 1"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list enumerating folders: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List jobs the engine is currently responsible for.
    ///
    /// Paused jobs stay in the set; the engine may still finish or fail
    /// them while they are paused locally. Synthetic ids never reach the
    /// engine, so they are excluded here.
    pub async fn list_pollable_downloads(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query_as::<_, DownloadJob>(&format!(
            r#"
            SELECT {DOWNLOAD_COLUMNS} FROM downloads
            WHERE status IN (?, ?, ?)
              AND id NOT LIKE ? AND id NOT LIKE ?
            "#
        ))
        .bind(DownloadStatus::Active)
        .bind(DownloadStatus::Waiting)
        .bind(DownloadStatus::Paused)
        .bind(format!("{FOLDER_ID_PREFIX}%"))
        .bind(format!("{FAILED_ID_PREFIX}%"))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list pollable downloads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List non-terminal engine jobs for crash recovery
    pub async fn list_incomplete_downloads(&self) -> Result<Vec<DownloadJob>> {
        let rows = sqlx::query_as::<_, DownloadJob>(&format!(
            r#"
            SELECT {DOWNLOAD_COLUMNS} FROM downloads
            WHERE status IN (?, ?, ?)
              AND id NOT LIKE ? AND id NOT LIKE ?
            ORDER BY created_at ASC
            "#
        ))
        .bind(DownloadStatus::Active)
        .bind(DownloadStatus::Waiting)
        .bind(DownloadStatus::Paused)
        .bind(format!("{FOLDER_ID_PREFIX}%"))
        .bind(format!("{FAILED_ID_PREFIX}%"))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list incomplete downloads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete a download job by id
    pub async fn delete_download(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM downloads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to delete download: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete all children of a folder job
    pub async fn delete_download_children(&self, parent_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM downloads WHERE parent_id = ?")
            .bind(parent_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to delete download children: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Delete all terminal top-level download jobs and their children.
    ///
    /// Returns the number of top-level rows removed.
    pub async fn clear_finished_downloads(&self) -> Result<u64> {
        sqlx::query(
            r#"
            DELETE FROM downloads WHERE parent_id IN (
                SELECT id FROM downloads
                WHERE parent_id IS NULL AND status IN (?, ?, ?)
            )
            "#,
        )
        .bind(DownloadStatus::Complete)
        .bind(DownloadStatus::Error)
        .bind(DownloadStatus::Removed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to clear finished download children: {}",
                e
            )))
        })?;

        let result = sqlx::query(
            "DELETE FROM downloads WHERE parent_id IS NULL AND status IN (?, ?, ?)",
        )
        .bind(DownloadStatus::Complete)
        .bind(DownloadStatus::Error)
        .bind(DownloadStatus::Removed)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to clear finished downloads: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}

fn update_is_empty(update: &DownloadUpdate) -> bool {
    update.status.is_none()
        && update.size.is_none()
        && update.progress.is_none()
        && update.speed.is_none()
        && update.eta.is_none()
        && update.error_message.is_none()
        && update.error_code.is_none()
        && update.total_files.is_none()
        && update.completed_files.is_none()
        && update.failed_files.is_none()
        && update.is_enumerating.is_none()
        && update.completed_at.is_none()
}
