//! Error types for FeedRank
//!
//! This module defines the common error types shared by the store and
//! merge crates.

use crate::types::KeySegmentError;
use thiserror::Error;

/// Common result type for FeedRank operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for FeedRank
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid key segment: {0}")]
    InvalidKeySegment(#[from] KeySegmentError),

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Check if this is a retryable error
    ///
    /// Bad identifiers and bad configuration never fix themselves.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::from(KeySegmentError::Empty);
        assert!(err.to_string().starts_with("invalid key segment: "));

        let err = Error::configuration("lock.ttl_ms must be positive");
        assert!(err.to_string().contains("lock.ttl_ms"));
    }

    #[test]
    fn test_error_from_key_segment() {
        let err = Error::from(KeySegmentError::Empty);
        assert!(matches!(err, Error::InvalidKeySegment(_)));
        assert!(!err.is_retryable());
    }
}
