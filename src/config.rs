//! Configuration types for drive-transfer

use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Top-level configuration
///
/// Every field has a sensible default; `Config::default()` yields a working
/// setup with the job database under `./drive-transfer.db`.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Job store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Submission queue settings (shared by both orchestrators)
    #[serde(default)]
    pub queue: QueueConfig,

    /// Status reconciler settings
    #[serde(default)]
    pub poll: PollConfig,

    /// Remote folder enumeration settings
    #[serde(default)]
    pub enumeration: EnumerationConfig,

    /// Upload pipeline settings
    #[serde(default)]
    pub upload: UploadConfig,

    /// Default local directory for downloaded files
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

/// Job store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite job database (default: "./drive-transfer.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Submission queue configuration
///
/// The queue is drained strictly one item at a time; these settings bound
/// how failures are retried and how fast successive submissions go out.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum submission retries before a queue item is demoted to a
    /// terminal error stub (default: 5)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Fixed delay between successive submissions, to stay under the
    /// engines' rate limits (default: 2s)
    #[serde(default = "default_submit_delay", with = "duration_secs")]
    pub submit_delay: Duration,

    /// Base delay for exponential backoff after a failed submission
    /// (default: 3s)
    #[serde(default = "default_backoff_base", with = "duration_secs")]
    pub backoff_base: Duration,

    /// Backoff cap (default: 60s)
    #[serde(default = "default_backoff_max", with = "duration_secs")]
    pub backoff_max: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            submit_delay: default_submit_delay(),
            backoff_base: default_backoff_base(),
            backoff_max: default_backoff_max(),
        }
    }
}

/// Status reconciler configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Interval between reconciliation cycles while jobs are active
    /// (default: 2s)
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub interval: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
        }
    }
}

/// Remote folder enumeration configuration
///
/// Enumeration uses a bounded page cursor with an inter-page delay. The
/// entry and depth caps bound memory on pathological directory trees; a
/// breach aborts the whole folder job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumerationConfig {
    /// Page size for remote directory listings (default: 1000)
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Delay between listing requests (default: 1s)
    #[serde(default = "default_page_delay", with = "duration_secs")]
    pub page_delay: Duration,

    /// Maximum number of files collected for a single folder job
    /// (default: 50_000)
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum directory nesting depth (default: 32)
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            page_delay: default_page_delay(),
            max_entries: default_max_entries(),
            max_depth: default_max_depth(),
        }
    }
}

/// Upload pipeline configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Maximum pipeline retries before an upload is left in error state
    /// (default: 3)
    #[serde(default = "default_upload_max_retries")]
    pub max_retries: u32,

    /// Delay between successive pipeline items (default: 1s)
    #[serde(default = "default_upload_queue_delay", with = "duration_secs")]
    pub queue_delay: Duration,

    /// Number of leading bytes hashed for the dedup prefix digest
    /// (default: 128 KiB)
    #[serde(default = "default_prefix_hash_size")]
    pub prefix_hash_size: u64,

    /// How many times expired multipart credentials are refreshed before
    /// the transfer is treated as failed (default: 3)
    #[serde(default = "default_credential_refreshes")]
    pub max_credential_refreshes: u32,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_retries: default_upload_max_retries(),
            queue_delay: default_upload_queue_delay(),
            prefix_hash_size: default_prefix_hash_size(),
            max_credential_refreshes: default_credential_refreshes(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./drive-transfer.db")
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("./downloads")
}

fn default_max_retries() -> u32 {
    5
}

fn default_submit_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_backoff_base() -> Duration {
    Duration::from_secs(3)
}

fn default_backoff_max() -> Duration {
    Duration::from_secs(60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_page_size() -> u32 {
    1000
}

fn default_page_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_entries() -> usize {
    50_000
}

fn default_max_depth() -> usize {
    32
}

fn default_upload_max_retries() -> u32 {
    3
}

fn default_upload_queue_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_prefix_hash_size() -> u64 {
    128 * 1024
}

fn default_credential_refreshes() -> u32 {
    3
}

/// Serialize durations as whole seconds for config files
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}
