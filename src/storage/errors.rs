//! Storage Error Types
//!
//! Structured error handling for cache storage backends.
//! The cache manager never surfaces these; it logs them and degrades to a miss.

/// Storage backend error types
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Quota exceeded: {needed} bytes needed, {quota} allowed")]
    QuotaExceeded { needed: u64, quota: u64 },

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Schema version mismatch: found {found}, expected {expected}")]
    SchemaMismatch { found: u32, expected: u32 },

    #[error("Corrupt entry for key {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StorageError {
    /// Whether this error comes from the environment (disk, permissions, quota)
    /// rather than from the data itself
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            StorageError::Io(_) | StorageError::QuotaExceeded { .. } | StorageError::Unavailable(_)
        )
    }

    /// Create an error from a failed blocking task
    pub(crate) fn from_join(err: tokio::task::JoinError) -> Self {
        StorageError::Unavailable(format!("storage task failed: {}", err))
    }
}
