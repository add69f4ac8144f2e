//! Shared test helpers: in-memory engine and drive fakes plus a
//! `DownloadManager` wired to a temp-file store.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::Config;
use crate::engine::{
    CloudDrive, DownloadEngine, EngineJobStatus, FolderPage, RemoteEntry, ResolvedLink,
};
use crate::error::EngineError;
use crate::store::TransferStore;
use crate::types::DownloadStatus;

use super::DownloadManager;

/// Scriptable in-memory download engine
#[derive(Default)]
pub(crate) struct MockEngine {
    next_handle: AtomicU64,
    /// Every accepted submission: (url, dir, file_name)
    pub(crate) submitted: Mutex<Vec<(String, String, String)>>,
    /// Errors to return from `submit` before accepting, in order
    pub(crate) submit_failures: Mutex<VecDeque<EngineError>>,
    /// Status reports served by `status`/`batch_status`
    pub(crate) statuses: Mutex<HashMap<String, EngineJobStatus>>,
    pub(crate) paused: Mutex<Vec<String>>,
    pub(crate) unpaused: Mutex<Vec<String>>,
    pub(crate) removed: Mutex<Vec<String>>,
    pub(crate) purged: Mutex<Vec<String>>,
}

impl MockEngine {
    pub(crate) async fn set_status(
        &self,
        handle: &str,
        status: DownloadStatus,
        total: u64,
        completed: u64,
        speed: u64,
    ) {
        self.statuses.lock().await.insert(
            handle.to_string(),
            EngineJobStatus {
                handle: handle.to_string(),
                status,
                total_length: total,
                completed_length: completed,
                speed,
                error_code: None,
                error_message: None,
            },
        );
    }

    pub(crate) async fn set_failed(&self, handle: &str, message: &str) {
        self.statuses.lock().await.insert(
            handle.to_string(),
            EngineJobStatus {
                handle: handle.to_string(),
                status: DownloadStatus::Error,
                total_length: 0,
                completed_length: 0,
                speed: 0,
                error_code: Some("1".to_string()),
                error_message: Some(message.to_string()),
            },
        );
    }
}

#[async_trait]
impl DownloadEngine for MockEngine {
    async fn submit(&self, url: &str, dir: &Path, file_name: &str) -> Result<String, EngineError> {
        if let Some(err) = self.submit_failures.lock().await.pop_front() {
            return Err(err);
        }
        let handle = format!("gid-{}", self.next_handle.fetch_add(1, Ordering::SeqCst) + 1);
        self.submitted.lock().await.push((
            url.to_string(),
            dir.to_string_lossy().into_owned(),
            file_name.to_string(),
        ));
        self.set_status(&handle, DownloadStatus::Active, 0, 0, 0)
            .await;
        Ok(handle)
    }

    async fn status(&self, handle: &str) -> Result<EngineJobStatus, EngineError> {
        self.statuses
            .lock()
            .await
            .get(handle)
            .cloned()
            .ok_or_else(|| EngineError::rejected(format!("GID {handle} is not found")))
    }

    async fn batch_status(&self, handles: &[String]) -> Result<Vec<EngineJobStatus>, EngineError> {
        let statuses = self.statuses.lock().await;
        Ok(handles
            .iter()
            .filter_map(|h| statuses.get(h).cloned())
            .collect())
    }

    async fn remove(&self, handle: &str) -> Result<(), EngineError> {
        self.removed.lock().await.push(handle.to_string());
        Ok(())
    }

    async fn force_remove(&self, handle: &str) -> Result<(), EngineError> {
        self.removed.lock().await.push(handle.to_string());
        Ok(())
    }

    async fn purge_history(&self, handle: &str) -> Result<(), EngineError> {
        self.purged.lock().await.push(handle.to_string());
        Ok(())
    }

    async fn pause(&self, handle: &str) -> Result<(), EngineError> {
        self.paused.lock().await.push(handle.to_string());
        Ok(())
    }

    async fn unpause(&self, handle: &str) -> Result<(), EngineError> {
        self.unpaused.lock().await.push(handle.to_string());
        Ok(())
    }
}

/// Scriptable in-memory cloud drive
#[derive(Default)]
pub(crate) struct MockDrive {
    /// Errors to return from `fetch_url` before succeeding, in order
    pub(crate) fetch_failures: Mutex<VecDeque<EngineError>>,
    /// Successful `fetch_url` calls
    pub(crate) fetched: Mutex<Vec<String>>,
    /// Folder listings by remote folder id
    pub(crate) folders: Mutex<HashMap<String, Vec<RemoteEntry>>>,
    /// Created remote directories: (parent_id, name)
    pub(crate) created: Mutex<Vec<(String, String)>>,
}

impl MockDrive {
    pub(crate) async fn add_folder(&self, id: &str, entries: Vec<RemoteEntry>) {
        self.folders.lock().await.insert(id.to_string(), entries);
    }
}

pub(crate) fn file_entry(source_ref: &str, name: &str, size: u64) -> RemoteEntry {
    RemoteEntry {
        id: format!("id-{source_ref}"),
        source_ref: source_ref.to_string(),
        name: name.to_string(),
        size,
        is_dir: false,
    }
}

pub(crate) fn dir_entry(id: &str, name: &str) -> RemoteEntry {
    RemoteEntry {
        id: id.to_string(),
        source_ref: String::new(),
        name: name.to_string(),
        size: 0,
        is_dir: true,
    }
}

#[async_trait]
impl CloudDrive for MockDrive {
    async fn fetch_url(&self, source_ref: &str) -> Result<ResolvedLink, EngineError> {
        if let Some(err) = self.fetch_failures.lock().await.pop_front() {
            return Err(err);
        }
        self.fetched.lock().await.push(source_ref.to_string());
        Ok(ResolvedLink {
            url: format!("https://cdn.example.com/{source_ref}"),
            file_name: format!("{source_ref}.bin"),
        })
    }

    async fn list_folder(
        &self,
        folder_id: &str,
        offset: u64,
        limit: u64,
    ) -> Result<FolderPage, EngineError> {
        let folders = self.folders.lock().await;
        let entries = folders
            .get(folder_id)
            .ok_or_else(|| EngineError::rejected(format!("no such folder {folder_id}")))?;
        let page: Vec<RemoteEntry> = entries
            .iter()
            .skip(offset as usize)
            .take(limit as usize)
            .cloned()
            .collect();
        Ok(FolderPage {
            entries: page,
            total_count: entries.len() as u64,
        })
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String, EngineError> {
        self.created
            .lock()
            .await
            .push((parent_id.to_string(), name.to_string()));
        Ok(format!("dir-{name}"))
    }
}

/// Config with delays collapsed so queue drains run instantly in tests
pub(crate) fn fast_config(download_dir: &Path) -> Config {
    let mut config = Config::default();
    config.download_dir = download_dir.to_path_buf();
    config.queue.submit_delay = Duration::from_millis(1);
    config.queue.backoff_base = Duration::from_millis(2);
    config.queue.backoff_max = Duration::from_millis(10);
    config.poll.interval = Duration::from_millis(5);
    config.enumeration.page_delay = Duration::from_millis(1);
    config.upload.queue_delay = Duration::from_millis(1);
    config
}

/// Create a manager over fakes; the tempdir must be kept alive by the caller
pub(crate) async fn create_test_manager() -> (
    DownloadManager,
    Arc<MockEngine>,
    Arc<MockDrive>,
    tempfile::TempDir,
) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = fast_config(&temp_dir.path().join("downloads"));
    let store = Arc::new(
        TransferStore::new(&temp_dir.path().join("test.db"))
            .await
            .unwrap(),
    );
    let engine = Arc::new(MockEngine::default());
    let drive = Arc::new(MockDrive::default());
    let manager = DownloadManager::new(
        store,
        engine.clone(),
        drive.clone(),
        Arc::new(config),
    );
    (manager, engine, drive, temp_dir)
}

/// Poll an async condition until it holds or two seconds elapse
pub(crate) async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met within timeout");
}
