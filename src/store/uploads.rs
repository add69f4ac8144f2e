//! Upload job CRUD operations.

use crate::error::StoreError;
use crate::types::{FOLDER_ID_PREFIX, UploadStatus};
use crate::{Error, Result};

use super::{NewUploadJob, TransferStore, UploadJob, UploadUpdate};

const UPLOAD_COLUMNS: &str = r#"
    id, name, local_path, target_dir_id, status, size, progress, speed, eta,
    error_message, content_hash, prefix_hash, resume_token, session_id,
    remote_bucket, remote_object, remote_file_id, parent_id, total_files,
    completed_files, failed_files, created_at, completed_at
"#;

impl TransferStore {
    /// Insert an upload job, replacing any existing row with the same id
    pub async fn upsert_upload(&self, job: &NewUploadJob) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT OR REPLACE INTO uploads (
                id, name, local_path, target_dir_id, status, size,
                progress, speed, parent_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(&job.name)
        .bind(&job.local_path)
        .bind(&job.target_dir_id)
        .bind(job.status)
        .bind(job.size)
        .bind(0.0f64) // progress
        .bind(0i64) // speed
        .bind(&job.parent_id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to insert upload: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Apply a partial update to an upload job
    pub async fn update_upload(&self, id: &str, update: &UploadUpdate) -> Result<()> {
        if update_is_empty(update) {
            return Ok(());
        }

        let mut qb = sqlx::QueryBuilder::<sqlx::Sqlite>::new("UPDATE uploads SET ");
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
        if let Some(hash) = &update.content_hash {
            fields
                .push("content_hash = ")
                .push_bind_unseparated(hash.clone());
        }
        if let Some(hash) = &update.prefix_hash {
            fields
                .push("prefix_hash = ")
                .push_bind_unseparated(hash.clone());
        }
        if let Some(token) = &update.resume_token {
            fields
                .push("resume_token = ")
                .push_bind_unseparated(token.clone());
        }
        if let Some(session) = &update.session_id {
            fields
                .push("session_id = ")
                .push_bind_unseparated(session.clone());
        }
        if let Some(bucket) = &update.remote_bucket {
            fields
                .push("remote_bucket = ")
                .push_bind_unseparated(bucket.clone());
        }
        if let Some(object) = &update.remote_object {
            fields
                .push("remote_object = ")
                .push_bind_unseparated(object.clone());
        }
        if let Some(file_id) = &update.remote_file_id {
            fields
                .push("remote_file_id = ")
                .push_bind_unseparated(file_id.clone());
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
        if let Some(completed_at) = &update.completed_at {
            fields
                .push("completed_at = ")
                .push_bind_unseparated(*completed_at);
        }

        qb.push(" WHERE id = ").push_bind(id);
        qb.build().execute(&self.pool).await.map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to update upload: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Get an upload job by id
    pub async fn get_upload(&self, id: &str) -> Result<Option<UploadJob>> {
        let row = sqlx::query_as::<_, UploadJob>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to get upload: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// List all upload jobs, newest first
    pub async fn list_uploads(&self) -> Result<Vec<UploadJob>> {
        let rows = sqlx::query_as::<_, UploadJob>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list uploads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List top-level upload jobs (folders and standalone files)
    pub async fn list_top_level_uploads(&self) -> Result<Vec<UploadJob>> {
        let rows = sqlx::query_as::<_, UploadJob>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE parent_id IS NULL ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list top-level uploads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List the children of a folder job
    pub async fn list_upload_children(&self, parent_id: &str) -> Result<Vec<UploadJob>> {
        let rows = sqlx::query_as::<_, UploadJob>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE parent_id = ? ORDER BY created_at ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list upload children: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// List leaf uploads still in flight, for crash recovery
    pub async fn list_in_flight_uploads(&self) -> Result<Vec<UploadJob>> {
        let rows = sqlx::query_as::<_, UploadJob>(&format!(
            r#"
            SELECT {UPLOAD_COLUMNS} FROM uploads
            WHERE status IN (?, ?, ?)
              AND id NOT LIKE ?
            ORDER BY created_at ASC
            "#
        ))
        .bind(UploadStatus::Pending)
        .bind(UploadStatus::Hashing)
        .bind(UploadStatus::Uploading)
        .bind(format!("{FOLDER_ID_PREFIX}%"))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to list in-flight uploads: {}",
                e
            )))
        })?;

        Ok(rows)
    }

    /// Delete an upload job by id
    pub async fn delete_upload(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM uploads WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to delete upload: {}",
                    e
                )))
            })?;

        Ok(())
    }

    /// Delete all children of a folder job
    pub async fn delete_upload_children(&self, parent_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM uploads WHERE parent_id = ?")
            .bind(parent_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Store(StoreError::QueryFailed(format!(
                    "Failed to delete upload children: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Delete all terminal top-level upload jobs and their children.
    ///
    /// Returns the number of top-level rows removed.
    pub async fn clear_finished_uploads(&self) -> Result<u64> {
        sqlx::query(
            r#"
            DELETE FROM uploads WHERE parent_id IN (
                SELECT id FROM uploads
                WHERE parent_id IS NULL AND status IN (?, ?, ?)
            )
            "#,
        )
        .bind(UploadStatus::Complete)
        .bind(UploadStatus::Error)
        .bind(UploadStatus::Cancelled)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Store(StoreError::QueryFailed(format!(
                "Failed to clear finished upload children: {}",
                e
            )))
        })?;

        let result =
            sqlx::query("DELETE FROM uploads WHERE parent_id IS NULL AND status IN (?, ?, ?)")
                .bind(UploadStatus::Complete)
                .bind(UploadStatus::Error)
                .bind(UploadStatus::Cancelled)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    Error::Store(StoreError::QueryFailed(format!(
                        "Failed to clear finished uploads: {}",
                        e
                    )))
                })?;

        Ok(result.rows_affected())
    }
}

fn update_is_empty(update: &UploadUpdate) -> bool {
    update.status.is_none()
        && update.size.is_none()
        && update.progress.is_none()
        && update.speed.is_none()
        && update.eta.is_none()
        && update.error_message.is_none()
        && update.content_hash.is_none()
        && update.prefix_hash.is_none()
        && update.resume_token.is_none()
        && update.session_id.is_none()
        && update.remote_bucket.is_none()
        && update.remote_object.is_none()
        && update.remote_file_id.is_none()
        && update.total_files.is_none()
        && update.completed_files.is_none()
        && update.failed_files.is_none()
        && update.completed_at.is_none()
}
