//! FeedRank Merge - concurrent ranked-cache merge engine
//!
//! Merges concurrently ranked candidate batches into a bounded, score-ordered
//! pool per `(user, mode)` feed, serialised across processes by a lock held in
//! the shared store.
//!
//! # Architecture
//!
//! ```text
//! candidates ──→ BatchDispatcher ──→ Ranker (one task per batch)
//!                                        │
//!                                        ▼ PendingBatch
//!                               ┌──────────────────┐
//!                               │ MergeCacheEngine │
//!                               │  DistributedMutex│
//!                               │  sort_data       │
//!                               │  diff / reconcile│
//!                               └────────┬─────────┘
//!                                        │
//!                               ┌────────▼─────────┐
//!                               │ RankedCacheStore │
//!                               └──────────────────┘
//! ```

pub mod dispatch;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod mutex;
pub mod reconcile;
pub mod sort_merge;

#[cfg(test)]
mod test_support;

pub use dispatch::{BatchDispatcher, PendingBatch, Ranker, compute_batch_count, partition};
pub use engine::MergeCacheEngine;
pub use error::{MergeError, MergeResult};
pub use metrics::{MergeMetrics, MetricsSnapshot};
pub use mutex::{AcquiredLock, DistributedMutex};
pub use reconcile::{CacheDiff, ClaimOutcome, diff, reconcile_claim_failures};
pub use sort_merge::{parse_current_cached_data, sort_data};
