//! # drive-transfer
//!
//! Backend library for cloud-drive transfer applications: durable download
//! and upload job orchestration over an external RPC download engine and a
//! provider's drive API.
//!
//! ## Design Philosophy
//!
//! drive-transfer is designed to be:
//! - **Durable** - Every job lives in SQLite; a crash loses no work
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Event-driven** - Consumers subscribe to events, no polling required
//! - **Engine-agnostic** - Provider APIs sit behind traits; the shipped
//!   adapter speaks the aria2 JSON-RPC dialect
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use drive_transfer::{Config, DownloadManager, RpcDownloadEngine, TransferStore};
//! # use drive_transfer::engine::{CloudDrive, FolderPage, ResolvedLink};
//! # use drive_transfer::EngineError;
//! # struct MyDrive;
//! # #[async_trait::async_trait]
//! # impl CloudDrive for MyDrive {
//! #     async fn fetch_url(&self, _: &str) -> Result<ResolvedLink, EngineError> { todo!() }
//! #     async fn list_folder(&self, _: &str, _: u64, _: u64) -> Result<FolderPage, EngineError> { todo!() }
//! #     async fn create_folder(&self, _: &str, _: &str) -> Result<String, EngineError> { todo!() }
//! # }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(Config::default());
//!     let store = Arc::new(TransferStore::new(&config.store.database_path).await?);
//!     let engine = Arc::new(RpcDownloadEngine::new("http://localhost:6800/jsonrpc", None));
//!     let drive = Arc::new(MyDrive); // your provider's drive API adapter
//!
//!     let manager = DownloadManager::new(store, engine, drive, config);
//!
//!     // Resubmit whatever a previous run left unfinished
//!     manager.recover().await?;
//!
//!     // Subscribe to events
//!     let mut events = manager.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     manager.download_file("ref-abc", "report.pdf", 1024).await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Folder rollup derivation shared by both transfer directions
pub mod aggregate;
/// Configuration types
pub mod config;
/// Download orchestration (decomposed into focused submodules)
pub mod download;
/// External service seams and the RPC engine adapter
pub mod engine;
/// Error types
pub mod error;
/// Retry logic with exponential backoff
pub mod retry;
/// SQLite persistence layer
pub mod store;
/// Core types and events
pub mod types;
/// Upload orchestration (decomposed into focused submodules)
pub mod upload;

// Re-export commonly used types
pub use config::{Config, EnumerationConfig, PollConfig, QueueConfig, StoreConfig, UploadConfig};
pub use download::{DownloadManager, DownloadSelection};
pub use engine::{
    CloudDrive, DownloadEngine, MultipartUploader, RpcDownloadEngine, UploadService,
};
pub use error::{EngineError, EngineErrorKind, Error, Result, StoreError};
pub use store::{DownloadJob, TransferStore, UploadJob};
pub use types::{Domain, DownloadStatus, Event, TransferStats, UploadStatus};
pub use upload::UploadManager;
