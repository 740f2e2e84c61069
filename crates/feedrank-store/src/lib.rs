//! FeedRank Store - ranked cache store contract
//!
//! This crate defines the command/reply contract the merge engine speaks to
//! its backing key-value store, the key namespace for per-user feeds, and an
//! in-memory backend used by the worker and by tests.

pub mod command;
pub mod keys;
pub mod memory;
pub mod store;

// Re-exports
pub use command::{Command, Reply};
pub use memory::MemoryStore;
pub use store::{RankedCacheStore, StoreError, StoreResult, expect_replies};
