//! Persistent job store for drive-transfer
//!
//! Handles SQLite persistence for download and upload jobs. The store is the
//! source of truth: queue state and engine handles live here so an
//! interrupted process can recover on the next start.
//!
//! ## Submodules
//!
//! Methods on [`TransferStore`] are organized by domain:
//! - [`migrations`] — Store lifecycle, schema migrations
//! - [`downloads`] — Download job CRUD
//! - [`uploads`] — Upload job CRUD

use crate::types::{DownloadStatus, UploadStatus};
use sqlx::{FromRow, sqlite::SqlitePool};

mod downloads;
mod migrations;
mod uploads;

/// New download job to be inserted into the store
#[derive(Debug, Clone)]
pub struct NewDownloadJob {
    /// Job id; the engine handle for leaves, a synthetic id for folders
    /// and failed submissions
    pub id: String,
    /// Display name
    pub name: String,
    /// Opaque reference used to re-resolve the download URL
    pub source_ref: String,
    /// Local destination path
    pub dest_path: String,
    /// Initial status
    pub status: DownloadStatus,
    /// Size in bytes when known
    pub size: i64,
    /// Parent folder job id, if this is a folder child
    pub parent_id: Option<String>,
    /// Error message for stub rows recording a failed submission
    pub error_message: Option<String>,
}

/// Download job record from the store
#[derive(Debug, Clone, FromRow)]
pub struct DownloadJob {
    /// Job id
    pub id: String,
    /// Display name
    pub name: String,
    /// Opaque reference used to re-resolve the download URL
    pub source_ref: String,
    /// Local destination path
    pub dest_path: String,
    /// Current status
    pub status: DownloadStatus,
    /// Size in bytes
    pub size: i64,
    /// Progress percentage, 0–100 with two decimals
    pub progress: f64,
    /// Instantaneous speed in bytes/sec
    pub speed: i64,
    /// Estimated seconds to completion
    pub eta: Option<i64>,
    /// Error message when failed
    pub error_message: Option<String>,
    /// Engine or provider error code when failed
    pub error_code: Option<String>,
    /// Parent folder job id
    pub parent_id: Option<String>,
    /// Number of files fixed at enumeration time (folders only)
    pub total_files: i64,
    /// Children in terminal success (folders only)
    pub completed_files: i64,
    /// Children in terminal failure (folders only)
    pub failed_files: i64,
    /// Whether folder enumeration is still in flight (folders only)
    pub is_enumerating: bool,
    /// Unix timestamp when the job was created
    pub created_at: i64,
    /// Unix timestamp when the job reached a terminal state
    pub completed_at: Option<i64>,
}

impl DownloadJob {
    /// Whether this record represents a folder job
    pub fn is_folder(&self) -> bool {
        self.id.starts_with(crate::types::FOLDER_ID_PREFIX)
    }
}

/// Partial update for a download job; `None` fields are left untouched.
///
/// Nullable columns take a double `Option`: `Some(None)` clears the column,
/// `None` leaves it alone.
#[derive(Debug, Clone, Default)]
pub struct DownloadUpdate {
    /// New status
    pub status: Option<DownloadStatus>,
    /// New size
    pub size: Option<i64>,
    /// New progress percentage
    pub progress: Option<f64>,
    /// New speed
    pub speed: Option<i64>,
    /// New eta, `Some(None)` clears it
    pub eta: Option<Option<i64>>,
    /// New error message, `Some(None)` clears it
    pub error_message: Option<Option<String>>,
    /// New error code, `Some(None)` clears it
    pub error_code: Option<Option<String>>,
    /// New enumeration-time file count
    pub total_files: Option<i64>,
    /// New completed-children count
    pub completed_files: Option<i64>,
    /// New failed-children count
    pub failed_files: Option<i64>,
    /// New enumeration flag
    pub is_enumerating: Option<bool>,
    /// New completion timestamp, `Some(None)` clears it
    pub completed_at: Option<Option<i64>>,
}

/// New upload job to be inserted into the store
#[derive(Debug, Clone)]
pub struct NewUploadJob {
    /// Job id, always synthetic
    pub id: String,
    /// Display name
    pub name: String,
    /// Local source path
    pub local_path: String,
    /// Remote directory to upload into
    pub target_dir_id: String,
    /// Initial status
    pub status: UploadStatus,
    /// Size in bytes
    pub size: i64,
    /// Parent folder job id, if this is a folder child
    pub parent_id: Option<String>,
}

/// Upload job record from the store
#[derive(Debug, Clone, FromRow)]
pub struct UploadJob {
    /// Job id
    pub id: String,
    /// Display name
    pub name: String,
    /// Local source path
    pub local_path: String,
    /// Remote directory to upload into
    pub target_dir_id: String,
    /// Current status
    pub status: UploadStatus,
    /// Size in bytes
    pub size: i64,
    /// Progress percentage, 0–100 with two decimals
    pub progress: f64,
    /// Instantaneous speed in bytes/sec
    pub speed: i64,
    /// Estimated seconds to completion
    pub eta: Option<i64>,
    /// Error message when failed
    pub error_message: Option<String>,
    /// Full-content digest, cached so retries skip hashing
    pub content_hash: Option<String>,
    /// Prefix-window digest, cached alongside the content hash
    pub prefix_hash: Option<String>,
    /// Server-side resume token from initialization
    pub resume_token: Option<String>,
    /// Multipart session id when a transfer is in flight
    pub session_id: Option<String>,
    /// Object-storage bucket the session targets
    pub remote_bucket: Option<String>,
    /// Object key the session targets
    pub remote_object: Option<String>,
    /// Remote file id assigned on completion
    pub remote_file_id: Option<String>,
    /// Parent folder job id
    pub parent_id: Option<String>,
    /// Number of files fixed at scan time (folders only)
    pub total_files: i64,
    /// Children in terminal success (folders only)
    pub completed_files: i64,
    /// Children in terminal failure (folders only)
    pub failed_files: i64,
    /// Unix timestamp when the job was created
    pub created_at: i64,
    /// Unix timestamp when the job reached a terminal state
    pub completed_at: Option<i64>,
}

impl UploadJob {
    /// Whether this record represents a folder job
    pub fn is_folder(&self) -> bool {
        self.id.starts_with(crate::types::FOLDER_ID_PREFIX)
    }
}

/// Partial update for an upload job; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct UploadUpdate {
    /// New status
    pub status: Option<UploadStatus>,
    /// New size
    pub size: Option<i64>,
    /// New progress percentage
    pub progress: Option<f64>,
    /// New speed
    pub speed: Option<i64>,
    /// New eta, `Some(None)` clears it
    pub eta: Option<Option<i64>>,
    /// New error message, `Some(None)` clears it
    pub error_message: Option<Option<String>>,
    /// New content hash
    pub content_hash: Option<String>,
    /// New prefix hash
    pub prefix_hash: Option<String>,
    /// New resume token, `Some(None)` clears it
    pub resume_token: Option<Option<String>>,
    /// New session id, `Some(None)` clears it
    pub session_id: Option<Option<String>>,
    /// New session bucket, `Some(None)` clears it
    pub remote_bucket: Option<Option<String>>,
    /// New session object key, `Some(None)` clears it
    pub remote_object: Option<Option<String>>,
    /// Remote file id assigned on completion
    pub remote_file_id: Option<String>,
    /// New scan-time file count
    pub total_files: Option<i64>,
    /// New completed-children count
    pub completed_files: Option<i64>,
    /// New failed-children count
    pub failed_files: Option<i64>,
    /// New completion timestamp, `Some(None)` clears it
    pub completed_at: Option<Option<i64>>,
}

/// Store handle for drive-transfer
pub struct TransferStore {
    pool: SqlitePool,
}
