//! Core types for drive-transfer

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Prefix for synthetic folder job ids (never submitted to the engine)
pub const FOLDER_ID_PREFIX: &str = "folder-";
/// Prefix for synthetic terminal-error stubs left by exhausted submissions
pub const FAILED_ID_PREFIX: &str = "failed-";
/// Prefix for internally generated upload job ids
pub const UPLOAD_ID_PREFIX: &str = "upload-";

/// Download job status, mirroring the download engine's own vocabulary.
///
/// Folder jobs reuse the same set; their value is always derived from
/// children by aggregation, never written from engine polling.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Transfer in progress on the engine
    Active,
    /// Accepted by the engine, not yet started
    Waiting,
    /// Paused on the engine
    Paused,
    /// Finished successfully
    Complete,
    /// Failed
    Error,
    /// Removed on the engine side
    Removed,
}

impl DownloadStatus {
    /// True for states that no reconciliation or submission will change
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DownloadStatus::Complete | DownloadStatus::Error | DownloadStatus::Removed
        )
    }

    /// Parse an engine-reported status string, defaulting unknown values
    /// to `Error`
    pub fn from_engine_str(s: &str) -> Self {
        match s {
            "active" => DownloadStatus::Active,
            "waiting" => DownloadStatus::Waiting,
            "paused" => DownloadStatus::Paused,
            "complete" => DownloadStatus::Complete,
            "error" => DownloadStatus::Error,
            "removed" => DownloadStatus::Removed,
            _ => DownloadStatus::Error,
        }
    }

    /// Status as stored in the database / reported over the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Active => "active",
            DownloadStatus::Waiting => "waiting",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Complete => "complete",
            DownloadStatus::Error => "error",
            DownloadStatus::Removed => "removed",
        }
    }
}

/// Upload job status (per-file pipeline states plus terminals)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum UploadStatus {
    /// Queued, pipeline not yet started
    Pending,
    /// Computing content digests
    Hashing,
    /// Multipart transfer in flight
    Uploading,
    /// Paused by the user
    Paused,
    /// Finished successfully (including dedup instant-complete)
    Complete,
    /// Failed
    Error,
    /// Cancelled by the user
    Cancelled,
}

impl UploadStatus {
    /// True for states that the pipeline will not change further
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadStatus::Complete | UploadStatus::Error | UploadStatus::Cancelled
        )
    }

    /// True while the pipeline considers the job in progress
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            UploadStatus::Pending | UploadStatus::Hashing | UploadStatus::Uploading
        )
    }

    /// Status as stored in the database
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Hashing => "hashing",
            UploadStatus::Uploading => "uploading",
            UploadStatus::Paused => "paused",
            UploadStatus::Complete => "complete",
            UploadStatus::Error => "error",
            UploadStatus::Cancelled => "cancelled",
        }
    }
}

/// Which job table an event refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Download jobs
    Download,
    /// Upload jobs
    Upload,
}

/// Event emitted on the broadcast channel.
///
/// Events are notifications only; consumers pull fresh snapshots through the
/// store queries rather than carrying state in the event payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// The persisted job set changed (insert/update/delete); re-query to
    /// refresh any display list
    JobsChanged {
        /// Affected domain
        domain: Domain,
    },

    /// A leaf job reached `complete`
    JobComplete {
        /// Affected domain
        domain: Domain,
        /// Job id
        id: String,
    },

    /// A leaf job reached a terminal error
    JobFailed {
        /// Affected domain
        domain: Domain,
        /// Job id
        id: String,
        /// Human-readable error
        error: String,
    },
}

/// Aggregate counts over top-level jobs, for dashboards
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Jobs currently transferring
    pub active: usize,
    /// Sum of active jobs' speeds in bytes/sec
    pub total_speed: u64,
    /// Completed jobs
    pub completed: usize,
    /// Failed jobs
    pub failed: usize,
    /// Paused jobs
    pub paused: usize,
    /// Jobs waiting to start
    pub waiting: usize,
    /// All top-level jobs
    pub total: usize,
}

/// Generate a unique job id with the given prefix (`upload-`, `folder-`,
/// `failed-`). Millisecond timestamp plus a random suffix keeps ids unique
/// without coordination.
pub fn generate_id(prefix: &str) -> String {
    let ts = chrono::Utc::now().timestamp_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{prefix}{ts}-{suffix}")
}

/// True for ids in the synthetic namespaces, which must never be sent to
/// the download engine or picked up by incomplete-job scans
pub fn is_synthetic_id(id: &str) -> bool {
    id.starts_with(FAILED_ID_PREFIX) || id.starts_with(FOLDER_ID_PREFIX)
}

/// Progress percentage with two-decimal precision
pub fn percent(completed: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((completed as f64 / total as f64) * 10_000.0).round() / 100.0
}

/// Estimated seconds to completion, absent when the job is stalled or done
pub fn eta_secs(total: u64, completed: u64, speed: u64) -> Option<i64> {
    if speed > 0 && total > completed {
        Some(((total - completed) as f64 / speed as f64).ceil() as i64)
    } else {
        None
    }
}
