//! Error kinds and their handling policy.
//!
//! Each component returns its own narrow error enum; [`FeedError`] is the
//! union surfaced by [`FeedEngine`](crate::FeedEngine) operations. The retry
//! policy lives in [`FeedError::is_retryable`] so every frontend (CLI, HTTP)
//! reports it the same way.
//!
//! | Kind | Retryable |
//! |------|-----------|
//! | [`IngestionError`] | no (record is skipped) |
//! | [`EmbeddingError`] | when transient or retries ran out |
//! | [`IndexError`] | yes (a rebuild is triggered on version mismatch) |
//! | `InvalidPrompt` / `InvalidPageToken` / `InvalidRequest` | no |
//! | `ServiceUnavailable` | yes |
//! | `ShareNotFound` / `TribeNotFound` / `ContentNotFound` | no |
//! | [`ConfigError`] | no (startup only) |
//! | `Storage` | yes |

use thiserror::Error;

/// A raw source record that cannot become a [`Content`](crate::models::Content).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestionError {
    #[error("record {source_id:?} has no url")]
    MissingUrl { source_id: String },
    #[error("record {source_id:?} has an invalid url {url:?}: {reason}")]
    InvalidUrl {
        source_id: String,
        url: String,
        reason: String,
    },
    #[error("record {source_id:?} has no text after markup stripping")]
    EmptyText { source_id: String },
    #[error("record has no source_id")]
    MissingSourceId,
    #[error("unknown source type: {0:?}")]
    UnknownSourceType(String),
}

/// Failure to produce an embedding vector.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EmbeddingError {
    #[error("embedding timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("embedding model unavailable: {0}")]
    Unavailable(String),
    #[error("embedder does not serve version {requested:?} (serves {served:?})")]
    UnsupportedVersion { requested: String, served: String },
    #[error("cannot embed empty text")]
    EmptyInput,
    #[error("embeddings are disabled")]
    Disabled,
    /// The backend refused the request for a reason retrying cannot fix.
    #[error("embedding request rejected: {0}")]
    Rejected(String),
    #[error("embedder returned {actual} dims, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding failed after {attempts} attempts: {last}")]
    Exhausted {
        attempts: u32,
        last: Box<EmbeddingError>,
    },
}

impl EmbeddingError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Timeout { .. } | EmbeddingError::Unavailable(_)
        )
    }
}

/// Vector index failures.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndexError {
    #[error("index has not been built")]
    NotReady,
    #[error("index compaction in progress")]
    Compacting,
    #[error("index has been shut down")]
    ShutDown,
    #[error("prompt embedded with version {prompt:?} but index holds {index:?}; rebuild required")]
    VersionMismatch { index: String, prompt: String },
    #[error("vector for {id:?} has {actual} dims, index expects {expected}")]
    DimensionMismatch {
        id: String,
        expected: usize,
        actual: usize,
    },
    #[error("index entry {id:?} is corrupted: {reason}")]
    Corrupted { id: String, reason: String },
}

/// Invalid engine configuration, raised once at startup.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },
    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },
    #[error("{field} must be > 0, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Union of every error an engine operation can surface.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Ingestion(#[from] IngestionError),
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),
    #[error(transparent)]
    Index(IndexError),
    #[error("prompt must contain searchable text")]
    InvalidPrompt,
    #[error("invalid page token: {0}")]
    InvalidPageToken(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("share not found: {0}")]
    ShareNotFound(String),
    #[error("tribe not found: {0}")]
    TribeNotFound(String),
    #[error("content not found: {0}")]
    ContentNotFound(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl From<IndexError> for FeedError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::NotReady | IndexError::Compacting | IndexError::ShutDown => {
                FeedError::ServiceUnavailable(err.to_string())
            }
            other => FeedError::Index(other),
        }
    }
}

impl FeedError {
    /// Whether the caller may retry the same request later.
    pub fn is_retryable(&self) -> bool {
        match self {
            FeedError::Embedding(e) => {
                e.is_transient() || matches!(e, EmbeddingError::Exhausted { .. })
            }
            FeedError::Index(_)
            | FeedError::ServiceUnavailable(_)
            | FeedError::Storage(_) => true,
            FeedError::Ingestion(_)
            | FeedError::InvalidPrompt
            | FeedError::InvalidPageToken(_)
            | FeedError::InvalidRequest(_)
            | FeedError::ShareNotFound(_)
            | FeedError::TribeNotFound(_)
            | FeedError::ContentNotFound(_)
            | FeedError::Config(_) => false,
        }
    }

    /// Stable machine-readable code, used in CLI and HTTP error output.
    pub fn code(&self) -> &'static str {
        match self {
            FeedError::Ingestion(_) => "ingestion_error",
            FeedError::Embedding(_) => "embedding_error",
            FeedError::Index(_) => "index_error",
            FeedError::InvalidPrompt => "invalid_prompt",
            FeedError::InvalidPageToken(_) => "invalid_page_token",
            FeedError::InvalidRequest(_) => "invalid_request",
            FeedError::ServiceUnavailable(_) => "service_unavailable",
            FeedError::ShareNotFound(_) => "share_not_found",
            FeedError::TribeNotFound(_) => "tribe_not_found",
            FeedError::ContentNotFound(_) => "content_not_found",
            FeedError::Config(_) => "config_error",
            FeedError::Storage(_) => "storage_error",
        }
    }
}
