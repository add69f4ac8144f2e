//! External service seams for the transfer orchestrators
//!
//! The managers never talk to the download engine, the cloud drive API, or
//! the object-storage service directly. Everything external sits behind the
//! traits in this module so orchestration logic can be exercised against
//! in-memory fakes and so engine quirks stay confined to one adapter each.

mod rpc;

pub use rpc::RpcDownloadEngine;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::types::DownloadStatus;

/// Engine-side view of a single download job
#[derive(Debug, Clone)]
pub struct EngineJobStatus {
    /// Engine job handle the report belongs to
    pub handle: String,
    /// Status mapped into the orchestrator's vocabulary
    pub status: DownloadStatus,
    /// Total size in bytes, 0 when the engine does not know yet
    pub total_length: u64,
    /// Bytes completed so far
    pub completed_length: u64,
    /// Instantaneous speed in bytes/sec
    pub speed: u64,
    /// Engine error code when the job failed
    pub error_code: Option<String>,
    /// Engine error message when the job failed
    pub error_message: Option<String>,
}

/// Source URL resolved for a remote file, valid for a short window only
#[derive(Debug, Clone)]
pub struct ResolvedLink {
    /// Direct download URL
    pub url: String,
    /// File name the provider reports for the link
    pub file_name: String,
}

/// One entry of a remote folder listing
#[derive(Debug, Clone)]
pub struct RemoteEntry {
    /// Remote identifier (folder id or file id)
    pub id: String,
    /// Opaque reference used to resolve a download URL for files
    pub source_ref: String,
    /// Display name
    pub name: String,
    /// Size in bytes, 0 for directories
    pub size: u64,
    /// Whether the entry is a directory
    pub is_dir: bool,
}

/// One page of a remote folder listing
#[derive(Debug, Clone)]
pub struct FolderPage {
    /// Entries in this page
    pub entries: Vec<RemoteEntry>,
    /// Total entry count across all pages
    pub total_count: u64,
}

/// Destination descriptor for a multipart transfer session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    /// Object-storage bucket
    pub bucket: String,
    /// Object key within the bucket
    pub object: String,
    /// Callback URL the storage service invokes on completion
    pub callback: String,
    /// Callback variables forwarded verbatim
    pub callback_var: String,
}

/// Outcome of an upload initialization exchange
#[derive(Debug, Clone)]
pub enum InitOutcome {
    /// Content already known server-side; the upload is complete
    Instant {
        /// Remote file id assigned to the deduplicated content
        file_id: String,
    },
    /// Bytes must actually be transferred to object storage
    NeedsTransfer {
        /// Where the bytes go
        target: RemoteTarget,
    },
    /// The service demands proof of possession before deciding
    SecondFactor {
        /// Key echoed back in the follow-up request
        sign_key: String,
        /// Byte range to hash, formatted `start-end` inclusive
        check_range: String,
    },
}

/// Response from upload initialization or resumption
#[derive(Debug, Clone)]
pub struct InitResponse {
    /// Resume token identifying the logical upload server-side
    pub resume_token: String,
    /// What to do next
    pub outcome: InitOutcome,
}

/// Temporary object-storage credentials
#[derive(Debug, Clone)]
pub struct StorageCredentials {
    /// Storage endpoint URL
    pub endpoint: String,
    /// Access key id
    pub key_id: String,
    /// Access key secret
    pub key_secret: String,
    /// Session token
    pub security_token: String,
    /// When the credentials stop working
    pub expires_at: DateTime<Utc>,
}

/// Parameters describing one file to initialize for upload
#[derive(Debug, Clone)]
pub struct InitRequest {
    /// File name as it should appear remotely
    pub file_name: String,
    /// File size in bytes
    pub file_size: u64,
    /// Full-content digest, uppercase hex
    pub content_hash: String,
    /// Digest of the first prefix window, uppercase hex
    pub prefix_hash: String,
    /// Remote directory to upload into
    pub target_dir_id: String,
    /// Digest of the server-chosen range for a second-factor follow-up
    pub range_hash: Option<String>,
    /// Sign key returned by a prior second-factor challenge
    pub sign_key: Option<String>,
}

/// Events emitted by a running multipart transfer
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// A multipart session was established or resumed; persist its id so an
    /// interrupted transfer can continue later
    SessionEstablished {
        /// Storage-side multipart session id
        session_id: String,
    },
    /// Bytes moved
    Progress {
        /// Bytes uploaded so far
        uploaded: u64,
        /// Total bytes
        total: u64,
        /// Instantaneous speed in bytes/sec
        speed: u64,
    },
    /// All parts uploaded and the completion callback accepted
    Completed,
}

/// Work order for a multipart transfer
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Local file to read
    pub local_path: std::path::PathBuf,
    /// Destination target from initialization
    pub target: RemoteTarget,
    /// Existing multipart session to resume, if any
    pub session_id: Option<String>,
}

/// Download engine control surface (RPC-polled)
#[async_trait]
pub trait DownloadEngine: Send + Sync {
    /// Submit a URL for download, returning the engine's job handle
    ///
    /// # Errors
    ///
    /// Returns an error if the engine rejects the submission or is
    /// unreachable.
    async fn submit(&self, url: &str, dir: &Path, file_name: &str) -> Result<String, EngineError>;

    /// Fetch the status of a single job
    async fn status(&self, handle: &str) -> Result<EngineJobStatus, EngineError>;

    /// Fetch the status of many jobs in one round trip
    ///
    /// Handles the engine no longer knows about are absent from the result.
    async fn batch_status(&self, handles: &[String]) -> Result<Vec<EngineJobStatus>, EngineError>;

    /// Stop a job, letting the engine finish bookkeeping
    async fn remove(&self, handle: &str) -> Result<(), EngineError>;

    /// Stop a job immediately
    async fn force_remove(&self, handle: &str) -> Result<(), EngineError>;

    /// Drop the engine's record of a finished or removed job
    async fn purge_history(&self, handle: &str) -> Result<(), EngineError>;

    /// Pause a job in place
    async fn pause(&self, handle: &str) -> Result<(), EngineError>;

    /// Resume a paused job
    async fn unpause(&self, handle: &str) -> Result<(), EngineError>;
}

/// Cloud drive metadata operations
#[async_trait]
pub trait CloudDrive: Send + Sync {
    /// Resolve a short-lived direct download URL for a file
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] with kind `RateLimited` when the provider is
    /// throttling; callers back off and retry those.
    async fn fetch_url(&self, source_ref: &str) -> Result<ResolvedLink, EngineError>;

    /// List one page of a remote folder
    async fn list_folder(
        &self,
        folder_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<FolderPage, EngineError>;

    /// Create a remote directory, returning its id
    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, EngineError>;
}

/// Upload control-plane operations against the drive service
#[async_trait]
pub trait UploadService: Send + Sync {
    /// Initialize an upload, possibly completing it instantly via dedup
    async fn initialize(&self, request: &InitRequest) -> Result<InitResponse, EngineError>;

    /// Resume a previously initialized upload by its resume token
    async fn resume(
        &self,
        resume_token: &str,
        request: &InitRequest,
    ) -> Result<InitResponse, EngineError>;

    /// Fetch temporary object-storage credentials
    async fn get_credentials(&self) -> Result<StorageCredentials, EngineError>;
}

/// Object-storage multipart data plane
#[async_trait]
pub trait MultipartUploader: Send + Sync {
    /// Run a multipart transfer to completion, reporting through `events`.
    ///
    /// Cancellation via `cancel` aborts between parts; the session remains
    /// resumable server-side.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] with kind `CredentialsExpired` when the
    /// temporary credentials lapse mid-transfer, and `SessionInvalid` when
    /// the storage service no longer recognizes the multipart session.
    async fn transfer(
        &self,
        credentials: &StorageCredentials,
        request: &TransferRequest,
        events: mpsc::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError>;
}
