//! Ranked cache store contract.
//!
//! A backend executes batches of [`Command`]s atomically and answers with one
//! [`Reply`] per command, in order. Connection setup and reconnection belong to
//! the backend, which is constructed by the process bootstrap and shared as an
//! `Arc<dyn RankedCacheStore>`.

use crate::command::{Command, Reply};
use async_trait::async_trait;
use std::time::Duration;

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("wrong type for key '{key}': expected {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("value of '{key}' field '{field}' is not an integer")]
    NotInteger { key: String, field: String },
    #[error("backend returned {got} replies for {expected} commands")]
    ReplyCount { expected: usize, got: usize },
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Store holding per-(user, mode) pools, metadata records and counters.
#[async_trait]
pub trait RankedCacheStore: Send + Sync {
    /// Execute `commands` as one atomic batch.
    ///
    /// Returns exactly one reply per command, in command order.
    async fn exec(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>>;

    /// Execute a single command
    async fn exec_one(&self, command: Command) -> StoreResult<Reply> {
        let mut replies = self.exec(vec![command]).await?;
        expect_replies(&replies, 1)?;
        replies
            .pop()
            .ok_or(StoreError::ReplyCount {
                expected: 1,
                got: 0,
            })
    }

    /// Read a string value
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        match self.exec_one(Command::get(key)).await? {
            Reply::Bulk(value) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    /// Set `key` to `value` with `ttl` if absent. Returns `true` when this
    /// call created the key.
    async fn set_nx(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let reply = self.exec_one(Command::set_nx(key, value, ttl)).await?;
        Ok(reply.is_created())
    }

    /// Delete a key. Returns `true` when something was removed.
    async fn del(&self, key: &str) -> StoreResult<bool> {
        let reply = self.exec_one(Command::del(key)).await?;
        Ok(reply.as_int().unwrap_or(0) > 0)
    }
}

/// Check that a backend answered every command of a batch
pub fn expect_replies(replies: &[Reply], expected: usize) -> StoreResult<()> {
    if replies.len() == expected {
        Ok(())
    } else {
        Err(StoreError::ReplyCount {
            expected,
            got: replies.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_retryable() {
        assert!(StoreError::Unavailable("timeout".into()).is_retryable());
        assert!(
            !StoreError::WrongType {
                key: "k".into(),
                expected: "hash"
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_expect_replies() {
        assert!(expect_replies(&[Reply::Nil, Reply::Int(1)], 2).is_ok());
        assert!(matches!(
            expect_replies(&[Reply::Nil], 2),
            Err(StoreError::ReplyCount {
                expected: 2,
                got: 1
            })
        ));
    }
}
