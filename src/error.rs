//! wowstage error types

use std::time::Duration;

use crate::upstream::UpstreamError;

/// wowstage error types
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    // Key errors
    #[error("unsupported data type: {0}")]
    UnsupportedDataType(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    // Admission control
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The request can never fit in the limiter window, however long the
    /// caller waits.
    #[error("request weight {weight} exceeds limiter capacity {max_requests}")]
    WeightExceedsCapacity { weight: u32, max_requests: u32 },

    // Tier errors
    #[error("upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("store error: {0}")]
    Store(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("fast cache error: {0}")]
    FastCache(String),

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StagingError {
    /// Whether waiting and retrying the same operation can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StagingError::RateLimited { .. } => true,
            StagingError::Upstream(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Suggested wait before retrying, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StagingError::RateLimited { retry_after } => Some(*retry_after),
            StagingError::Upstream(e) => e.retry_after(),
            _ => None,
        }
    }
}

/// Result type alias for wowstage operations
pub type Result<T> = std::result::Result<T, StagingError>;
