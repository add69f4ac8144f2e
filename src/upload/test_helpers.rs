//! In-memory fakes for the upload service and the multipart data plane.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use crate::download::test_helpers::MockDrive;
use crate::engine::{
    InitOutcome, InitRequest, InitResponse, MultipartUploader, RemoteTarget, StorageCredentials,
    TransferEvent, TransferRequest, UploadService,
};
use crate::error::EngineError;
use crate::store::TransferStore;
use crate::upload::UploadManager;

pub(crate) fn test_target() -> RemoteTarget {
    RemoteTarget {
        bucket: "bucket-a".to_string(),
        object: "objects/abc123".to_string(),
        callback: "https://drive.example.com/callback".to_string(),
        callback_var: "{}".to_string(),
    }
}

pub(crate) fn needs_transfer(token: &str) -> InitResponse {
    InitResponse {
        resume_token: token.to_string(),
        outcome: InitOutcome::NeedsTransfer {
            target: test_target(),
        },
    }
}

pub(crate) fn instant(token: &str, file_id: &str) -> InitResponse {
    InitResponse {
        resume_token: token.to_string(),
        outcome: InitOutcome::Instant {
            file_id: file_id.to_string(),
        },
    }
}

pub(crate) fn second_factor(token: &str, sign_key: &str, check_range: &str) -> InitResponse {
    InitResponse {
        resume_token: token.to_string(),
        outcome: InitOutcome::SecondFactor {
            sign_key: sign_key.to_string(),
            check_range: check_range.to_string(),
        },
    }
}

/// Scriptable fake of the drive's upload control plane
#[derive(Default)]
pub(crate) struct MockUploadService {
    /// Responses handed out by `initialize`, in order; empty means
    /// `NeedsTransfer` with a generated token
    pub(crate) init_responses: Mutex<VecDeque<Result<InitResponse, EngineError>>>,
    /// Every request `initialize` received
    pub(crate) init_requests: Mutex<Vec<InitRequest>>,
    /// Responses handed out by `resume`, in order; empty means an error so
    /// callers fall back to `initialize`
    pub(crate) resume_responses: Mutex<VecDeque<Result<InitResponse, EngineError>>>,
    /// Tokens `resume` was called with
    pub(crate) resumed_tokens: Mutex<Vec<String>>,
    /// Number of credential fetches served
    pub(crate) credential_fetches: AtomicU32,
    token_counter: AtomicU64,
}

impl MockUploadService {
    pub(crate) async fn script_init(&self, response: Result<InitResponse, EngineError>) {
        self.init_responses.lock().await.push_back(response);
    }

    pub(crate) async fn script_resume(&self, response: Result<InitResponse, EngineError>) {
        self.resume_responses.lock().await.push_back(response);
    }
}

#[async_trait]
impl UploadService for MockUploadService {
    async fn initialize(&self, request: &InitRequest) -> Result<InitResponse, EngineError> {
        self.init_requests.lock().await.push(request.clone());
        if let Some(response) = self.init_responses.lock().await.pop_front() {
            return response;
        }
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(needs_transfer(&format!("token-{n}")))
    }

    async fn resume(
        &self,
        resume_token: &str,
        request: &InitRequest,
    ) -> Result<InitResponse, EngineError> {
        self.resumed_tokens.lock().await.push(resume_token.to_string());
        self.init_requests.lock().await.push(request.clone());
        if let Some(response) = self.resume_responses.lock().await.pop_front() {
            return response;
        }
        Err(EngineError::rejected("resume token unknown"))
    }

    async fn get_credentials(&self) -> Result<StorageCredentials, EngineError> {
        let n = self.credential_fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StorageCredentials {
            endpoint: "https://storage.example.com".to_string(),
            key_id: format!("key-{n}"),
            key_secret: "secret".to_string(),
            security_token: "sts".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::minutes(15),
        })
    }
}

/// Scriptable fake of the multipart data plane.
///
/// Each call announces a session, emits one progress event, then returns
/// the next scripted result (or success). With `block_until_cancelled` set
/// it instead idles after the progress event until its token fires.
#[derive(Default)]
pub(crate) struct MockUploader {
    /// Results handed out per transfer attempt, in order; empty means Ok
    pub(crate) results: Mutex<VecDeque<Result<(), EngineError>>>,
    /// Every transfer request received
    pub(crate) transfers: Mutex<Vec<TransferRequest>>,
    /// Key ids of the credentials each attempt ran under
    pub(crate) credentials_seen: Mutex<Vec<String>>,
    /// When true, attempts hang after their first progress event until
    /// cancelled
    pub(crate) block_until_cancelled: AtomicBool,
    session_counter: AtomicU64,
}

impl MockUploader {
    pub(crate) async fn script_result(&self, result: Result<(), EngineError>) {
        self.results.lock().await.push_back(result);
    }
}

#[async_trait]
impl MultipartUploader for MockUploader {
    async fn transfer(
        &self,
        credentials: &StorageCredentials,
        request: &TransferRequest,
        events: mpsc::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Result<(), EngineError> {
        self.transfers.lock().await.push(request.clone());
        self.credentials_seen
            .lock()
            .await
            .push(credentials.key_id.clone());

        let session_id = match &request.session_id {
            Some(existing) => existing.clone(),
            None => {
                let n = self.session_counter.fetch_add(1, Ordering::SeqCst) + 1;
                format!("sess-{n}")
            }
        };
        let _ = events
            .send(TransferEvent::SessionEstablished {
                session_id: session_id.clone(),
            })
            .await;
        let _ = events
            .send(TransferEvent::Progress {
                uploaded: 512,
                total: 1024,
                speed: 256,
            })
            .await;

        if self.block_until_cancelled.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return Err(EngineError::cancelled());
        }
        if cancel.is_cancelled() {
            return Err(EngineError::cancelled());
        }

        if let Some(result) = self.results.lock().await.pop_front() {
            result?;
        }
        let _ = events
            .send(TransferEvent::Progress {
                uploaded: 1024,
                total: 1024,
                speed: 256,
            })
            .await;
        let _ = events.send(TransferEvent::Completed).await;
        // Give the event consumer a tick to persist before the row flips
        tokio::time::sleep(Duration::from_millis(2)).await;
        Ok(())
    }
}

/// Create an upload manager over fakes; the tempdir must outlive the test
pub(crate) async fn create_test_upload_manager() -> (
    UploadManager,
    Arc<MockUploadService>,
    Arc<MockUploader>,
    Arc<MockDrive>,
    tempfile::TempDir,
) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = crate::download::test_helpers::fast_config(&temp_dir.path().join("downloads"));
    let store = Arc::new(
        TransferStore::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap(),
    );
    let service = Arc::new(MockUploadService::default());
    let uploader = Arc::new(MockUploader::default());
    let drive = Arc::new(MockDrive::default());
    let manager = UploadManager::new(
        store,
        service.clone(),
        drive.clone(),
        uploader.clone(),
        Arc::new(config),
    );
    (manager, service, uploader, drive, temp_dir)
}

/// Poll until the job reaches `status` or two seconds elapse
pub(crate) async fn wait_for_status(
    manager: &UploadManager,
    id: &str,
    status: crate::types::UploadStatus,
) {
    for _ in 0..200 {
        let current = manager.store.get_upload(id).await.unwrap();
        if current.as_ref().is_some_and(|j| j.status == status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("upload {id} did not reach {status:?} within timeout");
}

/// Write `content` to `dir/name` and return its path
pub(crate) fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
}
