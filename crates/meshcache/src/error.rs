//! Cache layer error types.

use meshcache_store::StoreError;

/// Errors surfaced by cache write paths and bootstrap.
///
/// Read paths never return these: a failed or unparsable read is a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The backing store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A value could not be serialized to (or parsed from) JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl CacheError {
    /// Creates a new `Config` error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;
