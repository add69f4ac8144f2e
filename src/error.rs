//! Error types for drive-transfer
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error types (Store, Engine, Config)
//! - A closed engine-error classification performed once at the adapter
//!   boundary, so orchestrators branch on [`EngineErrorKind`] instead of
//!   inspecting raw error payloads

use thiserror::Error;

/// Result type alias for drive-transfer operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for drive-transfer
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "queue.max_retries")
        key: Option<String>,
    },

    /// Job store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// External engine error (download engine, drive API, storage service)
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Job not found
    #[error("job not found: {0}")]
    NotFound(String),

    /// Folder enumeration exceeded a configured cap
    #[error("enumeration cap exceeded: {0}")]
    EnumerationCap(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Job store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Record not found
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Closed set of engine error categories.
///
/// Every failure surfaced by an engine adapter is classified into one of
/// these categories before it reaches an orchestrator. This replaces the
/// duck-typed inspection of status codes and message fields the engines
/// themselves report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// The remote service is throttling us; retry with backoff
    RateLimited,
    /// Multipart upload credentials have expired; refresh and retry
    CredentialsExpired,
    /// A recorded multipart session is no longer valid on the remote side
    SessionInvalid,
    /// The operation was cancelled locally (pause/cancel)
    Cancelled,
    /// The engine does not know the referenced handle or task
    NotFound,
    /// Transport-level failure (connect, timeout, protocol)
    Network,
    /// The engine understood the request and refused it
    Rejected,
}

impl std::fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineErrorKind::RateLimited => "rate limited",
            EngineErrorKind::CredentialsExpired => "credentials expired",
            EngineErrorKind::SessionInvalid => "session invalid",
            EngineErrorKind::Cancelled => "cancelled",
            EngineErrorKind::NotFound => "not found",
            EngineErrorKind::Network => "network",
            EngineErrorKind::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// An error reported by (or classified from) an external engine.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct EngineError {
    /// Classified category, decided once at the adapter boundary
    pub kind: EngineErrorKind,
    /// Human-readable description
    pub message: String,
    /// Engine-specific error code, when the engine reported one
    pub code: Option<String>,
}

impl EngineError {
    /// Create an engine error with an explicit kind
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
        }
    }

    /// Attach an engine-specific error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Rate-limit error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::RateLimited, message)
    }

    /// Transport-level error
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Network, message)
    }

    /// Engine rejection
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Rejected, message)
    }

    /// Local cancellation
    pub fn cancelled() -> Self {
        Self::new(EngineErrorKind::Cancelled, "operation cancelled")
    }

    /// True when this error should be handled with rate-limit backoff
    pub fn is_rate_limited(&self) -> bool {
        self.kind == EngineErrorKind::RateLimited
    }

    /// Classify an error payload from an untrusted engine.
    ///
    /// Matches the known throttling signals: HTTP 429, the drive API's
    /// throttle code, and common message patterns. Everything else is a
    /// plain rejection.
    pub fn classify(status: Option<u16>, code: Option<&str>, message: &str) -> Self {
        if status == Some(429) || code == Some("20130827") || message_looks_throttled(message) {
            return Self::rate_limited(message.to_string())
                .with_code(code.unwrap_or("429").to_string());
        }
        let err = Self::rejected(message.to_string());
        match code {
            Some(c) => err.with_code(c.to_string()),
            None => err,
        }
    }
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        if e.status().map(|s| s.as_u16()) == Some(429) {
            Self::rate_limited(e.to_string()).with_code("429")
        } else {
            Self::network(e.to_string())
        }
    }
}

/// Known throttling phrases in engine error messages
fn message_looks_throttled(message: &str) -> bool {
    let msg = message.to_ascii_lowercase();
    msg.contains("rate limit")
        || msg.contains("rate-limit")
        || msg.contains("ratelimit")
        || msg.contains("too many requests")
        || msg.contains("too frequent")
        || msg.contains("throttl")
}
