//! Merge engine error types

use feedrank_store::StoreError;
use thiserror::Error;

/// Merge engine error
#[derive(Error, Debug)]
pub enum MergeError {
    /// Lock contention outlasted the retry ceiling
    #[error("Failed to acquire lock {path} after {depth} attempts")]
    AcquireLock { path: String, depth: u32 },

    /// Bad input or malformed store reply
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A single sub-batch exceeded the configured ceiling
    #[error("Batch failsafe tripped: batch of {size} items exceeds limit of {limit}")]
    FailsafeTripped { size: usize, limit: usize },

    /// Ranking collaborator failure
    #[error("Ranking error: {0}")]
    Ranking(String),

    /// A spawned ranking task panicked or was cancelled
    #[error("Batch task failed: {0}")]
    BatchJoin(String),

    /// Store I/O error, passed through as-is
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MergeError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Check if the whole job may be retried later (e.g. re-enqueued)
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::AcquireLock { .. } => true,
            Self::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Result type for merge operations
pub type MergeResult<T> = Result<T, MergeError>;
