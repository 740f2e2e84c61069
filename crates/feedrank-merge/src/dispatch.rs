//! Batch dispatcher.
//!
//! Splits a raw candidate pool into sub-batches and hands each one to the
//! ranking collaborator on its own task. Ranking a batch of `i` items costs
//! roughly `i(i+1)/2` comparisons plus a fixed `output_size` overhead, so
//! the total work over `b` batches,
//!
//! ```text
//! W(b) = b * (i(i+1)/2 + output_size),   i = input_size / b
//! ```
//!
//! is smallest at a batch size of `sqrt(2 * output_size)`.

use crate::error::{MergeError, MergeResult};
use async_trait::async_trait;
use feedrank_common::config::DispatchConfig;
use feedrank_common::{Mode, PostId, ScoredPost, UserId};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Ranking collaborator.
///
/// Returns the eligible candidates scored and sorted best first. Seen,
/// muted and otherwise ineligible posts are left out.
#[async_trait]
pub trait Ranker: Send + Sync {
    async fn rank(
        &self,
        user: &UserId,
        mode: &Mode,
        candidates: Vec<PostId>,
    ) -> MergeResult<Vec<ScoredPost>>;
}

/// A ranked sub-batch that may still be in flight
#[derive(Debug)]
pub enum PendingBatch {
    Ready(Vec<ScoredPost>),
    Spawned(JoinHandle<MergeResult<Vec<ScoredPost>>>),
}

impl PendingBatch {
    /// Wait for the batch to finish ranking
    pub async fn resolve(self) -> MergeResult<Vec<ScoredPost>> {
        match self {
            Self::Ready(posts) => Ok(posts),
            Self::Spawned(handle) => handle
                .await
                .map_err(|e| MergeError::BatchJoin(e.to_string()))?,
        }
    }
}

impl From<Vec<ScoredPost>> for PendingBatch {
    fn from(posts: Vec<ScoredPost>) -> Self {
        Self::Ready(posts)
    }
}

/// Number of batches minimising total ranking work, at least 1
pub fn compute_batch_count(input_size: usize, output_size: usize) -> MergeResult<usize> {
    if input_size == 0 || output_size == 0 {
        return Err(MergeError::invalid_argument(format!(
            "batch count needs positive sizes, got input {input_size} output {output_size}"
        )));
    }
    let optimal_batch_size = (2.0 * output_size as f64).sqrt();
    let count = (input_size as f64 / optimal_batch_size).ceil() as usize;
    Ok(count.max(1))
}

/// Split `pool` into `batch_count` batches.
///
/// Every batch takes `len / batch_count` items in pool order. The remaining
/// `len % batch_count` items are taken from the tail of the pool, last item
/// first, one each for the leading batches.
pub fn partition<T>(mut pool: Vec<T>, batch_count: usize) -> Vec<Vec<T>> {
    let batch_count = batch_count.max(1);
    let base = pool.len() / batch_count;
    let leftover = pool.len() % batch_count;

    // Drained tail comes out in pool order; reverse so the last item is first
    let mut tail: Vec<T> = pool.drain(base * batch_count..).collect();
    tail.reverse();
    let mut tail = tail.into_iter();

    let mut items = pool.into_iter();
    let mut batches = Vec::with_capacity(batch_count);
    for index in 0..batch_count {
        let mut batch: Vec<T> = items.by_ref().take(base).collect();
        if index < leftover {
            batch.extend(tail.next());
        }
        batches.push(batch);
    }
    batches
}

/// Partitions candidate pools and spawns one ranking task per batch
pub struct BatchDispatcher {
    ranker: Arc<dyn Ranker>,
    config: DispatchConfig,
}

impl BatchDispatcher {
    pub fn new(ranker: Arc<dyn Ranker>, config: DispatchConfig) -> Self {
        Self { ranker, config }
    }

    pub const fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Partition `pool` and start ranking every batch.
    ///
    /// Does not wait for ranking; the returned handles are in partition
    /// order, which is also merge precedence for equal scores. Must be called
    /// from within a tokio runtime.
    pub fn dispatch(
        &self,
        user: &UserId,
        mode: &Mode,
        pool: Vec<PostId>,
        output_size: usize,
    ) -> MergeResult<Vec<PendingBatch>> {
        if pool.is_empty() {
            debug!("No candidates to dispatch for {}/{}", user, mode);
            return Ok(Vec::new());
        }

        let batch_count = compute_batch_count(pool.len(), output_size)?;
        let batches = partition(pool, batch_count);

        let limit = self.config.max_batch_size;
        if let Some(size) = batches.iter().map(Vec::len).max().filter(|&s| s > limit) {
            error!(
                "Failed to dispatch for {}/{}: batch of {} items exceeds failsafe limit of {}",
                user, mode, size, limit
            );
            return Err(MergeError::FailsafeTripped { size, limit });
        }

        debug!(
            "Dispatching {} batches for {}/{}",
            batches.len(),
            user,
            mode
        );

        Ok(batches
            .into_iter()
            .map(|batch| {
                let ranker = self.ranker.clone();
                let user = user.clone();
                let mode = mode.clone();
                PendingBatch::Spawned(tokio::spawn(async move {
                    let mut ranked = ranker.rank(&user, &mode, batch).await?;
                    if let Some(post) = ranked.iter().find(|p| !p.score.is_finite()) {
                        return Err(MergeError::Ranking(format!(
                            "post {} ranked with non-finite score {}",
                            post.id, post.score
                        )));
                    }
                    // Merge relies on every batch being sorted best first.
                    // Adding 0.0 folds -0.0 into 0.0 so equal zeros keep ranker order.
                    ranked.sort_by(|a, b| (b.score + 0.0).total_cmp(&(a.score + 0.0)));
                    Ok(ranked)
                }))
            })
            .collect())
    }
}
