//! Merge cache engine.
//!
//! Runs one merge of ranked batches into the cached pool of a
//! `(user, mode)` feed:
//!
//! ```text
//! await batches → acquire lock → read cache → merge → diff
//!      → budget check ──(too little lock time left)──→ release, Ok(false)
//!      → claim metadata → reconcile → category bookkeeping → write pool
//!      → release, Ok(true)
//! ```
//!
//! The claim and the final write are separate store batches. The claim sets
//! the metadata TTL along with the fields, so a crash between them leaves
//! records for posts that never reached the pool only until they expire.
//! Every committed write refreshes the metadata TTL of each post in the pool.

use crate::dispatch::PendingBatch;
use crate::error::{MergeError, MergeResult};
use crate::metrics::MergeMetrics;
use crate::mutex::{AcquiredLock, DistributedMutex};
use crate::reconcile::{diff, reconcile_claim_failures};
use crate::sort_merge::{parse_current_cached_data, sort_data};
use feedrank_common::{CacheEntry, CategoryDelta, Config, Mode, PostId, ScoredPost, UserId};
use feedrank_store::keys::{self, CLAIM_FIELDS, FIELD_CATEGORY, FIELD_SCORE};
use feedrank_store::{Command, RankedCacheStore, Reply, expect_replies};
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Merges ranked batches into per-user cached pools
pub struct MergeCacheEngine {
    store: Arc<dyn RankedCacheStore>,
    mutex: DistributedMutex,
    config: Config,
    metrics: Arc<MergeMetrics>,
}

impl MergeCacheEngine {
    pub fn new(store: Arc<dyn RankedCacheStore>, config: Config) -> Self {
        let metrics = Arc::new(MergeMetrics::new());
        let mutex =
            DistributedMutex::new(store.clone(), config.lock.clone()).with_metrics(metrics.clone());
        Self {
            store,
            mutex,
            config,
            metrics,
        }
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MergeMetrics> {
        &self.metrics
    }

    /// Merge `batches` into the cached pool of `user`/`mode`.
    ///
    /// Returns `Ok(true)` once the merge is committed and `Ok(false)` when it
    /// was abandoned before writing because the lock was close to expiry.
    /// Capacity comes from `capacity_override`, else the stored capacity,
    /// else the configured default.
    pub async fn process_batches(
        &self,
        user: &UserId,
        mode: &Mode,
        batches: Vec<PendingBatch>,
        capacity_override: Option<usize>,
    ) -> MergeResult<bool> {
        let started = std::time::Instant::now();

        let batches = join_all(batches.into_iter().map(PendingBatch::resolve))
            .await
            .into_iter()
            .collect::<MergeResult<Vec<_>>>()?;
        if let Some(post) = batches.iter().flatten().find(|p| !p.score.is_finite()) {
            return Err(MergeError::invalid_argument(format!(
                "post {} has non-finite score {}",
                post.id, post.score
            )));
        }

        let lock = self
            .mutex
            .acquire(&keys::lock_key(user, mode), &keys::pool_key(user, mode))
            .await?;

        let result = self
            .merge_locked(user, mode, &lock, &batches, capacity_override)
            .await;

        match result {
            Ok(Some((added, evicted))) => {
                if !self.mutex.release(lock).await? {
                    warn!(
                        "Lock for {}/{} expired before release, merge may have overlapped another writer",
                        user, mode
                    );
                }
                self.metrics.record_commit(added, evicted, started.elapsed());
                Ok(true)
            }
            Ok(None) => {
                self.mutex.release(lock).await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(release_err) = self.mutex.release(lock).await {
                    warn!(
                        "Failed to release lock for {}/{} after error: {}",
                        user, mode, release_err
                    );
                }
                Err(e)
            }
        }
    }

    /// Steps run while holding the lock. `None` means the lock budget ran
    /// out before anything was written.
    async fn merge_locked(
        &self,
        user: &UserId,
        mode: &Mode,
        lock: &AcquiredLock,
        batches: &[Vec<ScoredPost>],
        capacity_override: Option<usize>,
    ) -> MergeResult<Option<(usize, usize)>> {
        let pool_key = keys::pool_key(user, mode);

        let (capacity, current) = self.read_cache(user, mode, capacity_override).await?;
        let proposed = sort_data(capacity, &current, batches);
        let changes = diff(&proposed, &current);

        let remaining = lock.remaining(Instant::now());
        if remaining < self.config.lock.expiry_buffer() {
            warn!(
                "Abandoning merge for {}/{}: lock has {:?} left, need {:?}",
                user,
                mode,
                remaining,
                self.config.lock.expiry_buffer()
            );
            self.metrics.record_abort();
            return Ok(None);
        }

        let candidates = best_candidates(batches);
        let new_posts = changes
            .new_posts
            .iter()
            .map(|id| {
                candidates.get(id.as_str()).copied().ok_or_else(|| {
                    MergeError::invalid_argument(format!("merged post {id} is not a candidate"))
                })
            })
            .collect::<MergeResult<Vec<&ScoredPost>>>()?;

        let ttl = &self.config.ttl;

        // Claim: the create-if-absent fields of each post, then its TTL
        let per_post = CLAIM_FIELDS.len() + 1;
        let claim_reply = if new_posts.is_empty() {
            Vec::new()
        } else {
            let mut commands = Vec::with_capacity(new_posts.len() * per_post);
            for post in &new_posts {
                let meta = keys::meta_key(user, mode, &post.id);
                let values = [
                    post.score.to_string(),
                    post.seen.to_string(),
                    post.vote.to_string(),
                ];
                for (field, value) in CLAIM_FIELDS.into_iter().zip(values) {
                    commands.push(Command::hset_nx(meta.clone(), field, value));
                }
                commands.push(Command::expire(meta, ttl.metadata()));
            }
            let expected = commands.len();
            let replies = self.store.exec(commands).await?;
            expect_replies(&replies, expected)?;
            replies
                .chunks_exact(per_post)
                .flat_map(|chunk| chunk[..CLAIM_FIELDS.len()].iter().cloned())
                .collect::<Vec<Reply>>()
        };

        let outcome = reconcile_claim_failures(&claim_reply, &changes.new_posts, &proposed)?;
        if !outcome.rejected.is_empty() {
            info!(
                "Dropped {} posts for {}/{} already claimed by another writer: {:?}",
                outcome.rejected.len(),
                user,
                mode,
                outcome.rejected
            );
            self.metrics.record_claims_rejected(outcome.rejected.len());
        }

        let removed_categories = self
            .read_categories(user, mode, &changes.removed_posts)
            .await?;

        let mut writes = Vec::new();
        let mut delta = CategoryDelta::new();

        for id in &outcome.claimed {
            if let Some(post) = candidates.get(id.as_str()) {
                let meta = keys::meta_key(user, mode, id);
                writes.push(Command::hset(meta, FIELD_CATEGORY, post.category.clone()));
                delta.increment(&post.category);
            }
        }

        // Incumbents re-scored by a candidate copy, then the TTL of every
        // post that stays in the pool
        let current_scores: HashMap<&str, f64> =
            current.iter().map(|e| (e.id.as_str(), e.score)).collect();
        for entry in &outcome.cache {
            let meta = keys::meta_key(user, mode, &entry.id);
            if current_scores
                .get(entry.id.as_str())
                .is_some_and(|score| *score != entry.score)
            {
                writes.push(Command::hset(meta.clone(), FIELD_SCORE, entry.score.to_string()));
            }
            writes.push(Command::expire(meta, ttl.metadata()));
        }

        if !changes.removed_posts.is_empty() {
            writes.push(Command::Del {
                keys: changes
                    .removed_posts
                    .iter()
                    .map(|id| keys::meta_key(user, mode, id))
                    .collect(),
            });
        }
        for category in removed_categories.iter().flatten() {
            delta.decrement(category);
        }

        if !delta.is_empty() {
            let category_key = keys::category_key(user, mode);
            for (category, change) in delta.changes() {
                writes.push(Command::hincr_by(category_key.clone(), category, change));
            }
            writes.push(Command::expire(category_key, ttl.category()));
        }

        writes.push(Command::del(pool_key.clone()));
        if !outcome.cache.is_empty() {
            writes.push(Command::ranked_push(pool_key.clone(), outcome.cache.clone()));
            writes.push(Command::expire(pool_key, ttl.pool()));
        }

        let expected = writes.len();
        let replies = self.store.exec(writes).await?;
        expect_replies(&replies, expected)?;

        debug!(
            "Merged {}/{}: {} added, {} evicted, {} in pool",
            user,
            mode,
            outcome.claimed.len(),
            changes.removed_posts.len(),
            outcome.cache.len()
        );

        Ok(Some((outcome.claimed.len(), changes.removed_posts.len())))
    }

    /// Read the pool snapshot and the capacity it is bounded by
    async fn read_cache(
        &self,
        user: &UserId,
        mode: &Mode,
        capacity_override: Option<usize>,
    ) -> MergeResult<(usize, Vec<CacheEntry>)> {
        let mut commands = Vec::with_capacity(2);
        if capacity_override.is_none() {
            commands.push(Command::get(keys::capacity_key(user, mode)));
        }
        commands.push(Command::ranked_range(keys::pool_key(user, mode)));

        let expected = commands.len();
        let replies = self.store.exec(commands).await?;
        expect_replies(&replies, expected)?;

        let capacity = match capacity_override {
            Some(capacity) => capacity,
            None => parse_capacity(&replies[0])?.unwrap_or(self.config.cache.default_capacity),
        };
        let header = usize::from(capacity_override.is_none());
        let current = parse_current_cached_data(&replies, header)?;
        Ok((capacity, current))
    }

    /// Category recorded on each post's metadata, `None` when unknown
    async fn read_categories(
        &self,
        user: &UserId,
        mode: &Mode,
        ids: &[PostId],
    ) -> MergeResult<Vec<Option<String>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let commands: Vec<Command> = ids
            .iter()
            .map(|id| Command::hget(keys::meta_key(user, mode, id), FIELD_CATEGORY))
            .collect();
        let replies = self.store.exec(commands).await?;
        expect_replies(&replies, ids.len())?;
        Ok(replies
            .into_iter()
            .map(|reply| match reply {
                Reply::Bulk(category) => Some(category),
                _ => None,
            })
            .collect())
    }

    /// Store the pool capacity used when a merge has no override
    pub async fn set_capacity(&self, user: &UserId, mode: &Mode, capacity: usize) -> MergeResult<()> {
        let key = keys::capacity_key(user, mode);
        let replies = self
            .store
            .exec(vec![
                Command::del(key.clone()),
                Command::set_nx(key, capacity.to_string(), self.config.ttl.capacity()),
            ])
            .await?;
        expect_replies(&replies, 2)?;
        Ok(())
    }

    /// Read the committed pool, best first
    pub async fn read_pool(&self, user: &UserId, mode: &Mode) -> MergeResult<Vec<CacheEntry>> {
        let reply = self
            .store
            .exec_one(Command::ranked_range(keys::pool_key(user, mode)))
            .await?;
        parse_current_cached_data(&[reply], 0)
    }

    /// Read the per-category counters
    pub async fn read_category_counts(
        &self,
        user: &UserId,
        mode: &Mode,
    ) -> MergeResult<BTreeMap<String, i64>> {
        let reply = self
            .store
            .exec_one(Command::hget_all(keys::category_key(user, mode)))
            .await?;
        let items = match reply {
            Reply::Array(items) => items,
            other => {
                return Err(MergeError::invalid_argument(format!(
                    "category counters reply is not an array: {other:?}"
                )));
            }
        };

        items
            .chunks(2)
            .map(|pair| match pair {
                [Reply::Bulk(category), Reply::Bulk(count)] => count
                    .parse::<i64>()
                    .map(|count| (category.clone(), count))
                    .map_err(|_| {
                        MergeError::invalid_argument(format!(
                            "category {category} has a non-integer count {count}"
                        ))
                    }),
                _ => Err(MergeError::invalid_argument(format!(
                    "malformed category counter entry: {pair:?}"
                ))),
            })
            .collect()
    }
}

/// Highest-scored occurrence of every candidate id; ties go to the earlier
/// batch, matching merge precedence
fn best_candidates(batches: &[Vec<ScoredPost>]) -> HashMap<&str, &ScoredPost> {
    let mut best: HashMap<&str, &ScoredPost> = HashMap::new();
    for post in batches.iter().flatten() {
        best.entry(post.id.as_str())
            .and_modify(|kept| {
                if post.score > kept.score {
                    *kept = post;
                }
            })
            .or_insert(post);
    }
    best
}

fn parse_capacity(reply: &Reply) -> MergeResult<Option<usize>> {
    match reply {
        Reply::Nil => Ok(None),
        Reply::Bulk(raw) => raw.parse::<usize>().map(Some).map_err(|_| {
            MergeError::invalid_argument(format!("stored capacity is not a count: {raw}"))
        }),
        Reply::Int(value) => usize::try_from(*value).map(Some).map_err(|_| {
            MergeError::invalid_argument(format!("stored capacity is negative: {value}"))
        }),
        Reply::Array(_) => Err(MergeError::invalid_argument(
            "stored capacity is not a scalar",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingStore;
    use feedrank_common::config::LockConfig;
    use std::time::Duration;

    fn user() -> UserId {
        UserId::new("u1").unwrap()
    }

    fn mode() -> Mode {
        Mode::new("following").unwrap()
    }

    fn test_config() -> Config {
        Config {
            lock: LockConfig {
                ttl_ms: 5_000,
                retry_backoff_ms: 5,
                retry_jitter: 0.5,
                max_depth: 2_000,
                expiry_buffer_ms: 100,
            },
            ..Config::default()
        }
    }

    fn post(id: &str, category: &str, score: f64) -> ScoredPost {
        ScoredPost::new(id, category, score)
    }

    fn pool_ids(pool: &[CacheEntry]) -> Vec<&str> {
        pool.iter().map(|e| e.id.as_str()).collect()
    }

    async fn meta_field(store: &CountingStore, id: &str, field: &str) -> Option<String> {
        let reply = store
            .inner
            .exec_one(Command::hget(keys::meta_key(&user(), &mode(), id), field))
            .await
            .unwrap();
        reply.as_str().map(str::to_string)
    }

    #[tokio::test]
    async fn test_merge_into_empty_cache() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());

        let batch = vec![post("X", "music", 10.0), post("Y", "sports", 5.0)];
        let committed = engine
            .process_batches(&user(), &mode(), vec![batch.into()], Some(3))
            .await
            .unwrap();
        assert!(committed);

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool_ids(&pool), ["X", "Y"]);

        assert_eq!(meta_field(&store, "X", "score").await.as_deref(), Some("10"));
        assert_eq!(meta_field(&store, "X", "seen").await.as_deref(), Some("false"));
        assert_eq!(meta_field(&store, "X", "vote").await.as_deref(), Some("0"));
        assert_eq!(meta_field(&store, "Y", "category").await.as_deref(), Some("sports"));

        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("music"), Some(&1));
        assert_eq!(counts.get("sports"), Some(&1));

        // Lock released
        assert_eq!(
            store.inner.get(&keys::lock_key(&user(), &mode())).await.unwrap(),
            None
        );
        assert_eq!(engine.metrics().snapshot().merges_committed, 1);
        assert_eq!(engine.metrics().snapshot().items_added, 2);
    }

    #[tokio::test]
    async fn test_eviction_updates_metadata_and_counters() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());
        engine.set_capacity(&user(), &mode(), 2).await.unwrap();

        let first = vec![post("A", "a", 10.0), post("B", "b", 5.0)];
        assert!(
            engine
                .process_batches(&user(), &mode(), vec![first.into()], None)
                .await
                .unwrap()
        );

        let second = vec![post("C", "c", 7.0)];
        assert!(
            engine
                .process_batches(&user(), &mode(), vec![second.into()], None)
                .await
                .unwrap()
        );

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool_ids(&pool), ["A", "C"]);
        assert_eq!(meta_field(&store, "B", "score").await, None);

        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("a"), Some(&1));
        assert_eq!(counts.get("b"), Some(&0));
        assert_eq!(counts.get("c"), Some(&1));
        assert_eq!(engine.metrics().snapshot().items_evicted, 1);
    }

    #[tokio::test]
    async fn test_lost_claim_is_dropped() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());

        // Another writer already owns Y
        store
            .inner
            .exec(vec![Command::hset_nx(
                keys::meta_key(&user(), &mode(), "Y"),
                "score",
                "5",
            )])
            .await
            .unwrap();

        let batch = vec![post("X", "music", 10.0), post("Y", "sports", 5.0)];
        assert!(
            engine
                .process_batches(&user(), &mode(), vec![batch.into()], Some(3))
                .await
                .unwrap()
        );

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool_ids(&pool), ["X"]);
        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("music"), Some(&1));
        assert_eq!(counts.get("sports"), None);
        assert_eq!(engine.metrics().snapshot().claims_rejected, 1);
    }

    #[tokio::test]
    async fn test_budget_abort_writes_nothing() {
        let store = CountingStore::new();
        let mut config = test_config();
        config.lock.ttl_ms = 1_000;
        config.lock.expiry_buffer_ms = 2_000;
        let engine = MergeCacheEngine::new(store.clone(), config);

        let batch = vec![post("X", "music", 10.0)];
        let committed = engine
            .process_batches(&user(), &mode(), vec![batch.into()], Some(3))
            .await
            .unwrap();
        assert!(!committed);

        assert!(engine.read_pool(&user(), &mode()).await.unwrap().is_empty());
        assert_eq!(meta_field(&store, "X", "score").await, None);
        assert_eq!(
            store.inner.get(&keys::lock_key(&user(), &mode())).await.unwrap(),
            None
        );
        assert_eq!(engine.metrics().snapshot().merges_aborted, 1);
    }

    #[tokio::test]
    async fn test_default_capacity_applies() {
        let store = CountingStore::new();
        let mut config = test_config();
        config.cache.default_capacity = 2;
        let engine = MergeCacheEngine::new(store, config);

        let batch = vec![
            post("X", "music", 10.0),
            post("Y", "music", 8.0),
            post("Z", "music", 6.0),
        ];
        engine
            .process_batches(&user(), &mode(), vec![batch.into()], None)
            .await
            .unwrap();

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool_ids(&pool), ["X", "Y"]);
        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("music"), Some(&2));
    }

    #[tokio::test]
    async fn test_lock_contention_propagates() {
        let store = CountingStore::new();
        let mut config = test_config();
        config.lock.max_depth = 2;
        config.lock.retry_backoff_ms = 1;
        let engine = MergeCacheEngine::new(store.clone(), config);

        store
            .inner
            .set_nx(
                &keys::lock_key(&user(), &mode()),
                "other-worker",
                Duration::from_secs(5),
            )
            .await
            .unwrap();

        let err = engine
            .process_batches(&user(), &mode(), vec![vec![post("X", "m", 1.0)].into()], Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::AcquireLock { .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_ranking_failure_skips_lock() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());

        let failed = PendingBatch::Spawned(tokio::spawn(async {
            Err(MergeError::Ranking("timeout".into()))
        }));
        let err = engine
            .process_batches(&user(), &mode(), vec![failed], Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Ranking(_)));
        assert_eq!(store.set_nx_calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_merges_serialize() {
        let store = CountingStore::new();
        let engine = Arc::new(MergeCacheEngine::new(store.clone(), test_config()));

        let tasks: Vec<_> = (0..8)
            .map(|worker| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let batch: Vec<ScoredPost> = (0..5)
                        .map(|i| post(&format!("w{worker}-{i}"), "general", f64::from(worker * 10 + i)))
                        .collect();
                    engine
                        .process_batches(&user(), &mode(), vec![batch.into()], Some(100))
                        .await
                })
            })
            .collect();

        for task in join_all(tasks).await {
            assert!(task.unwrap().unwrap());
        }

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool.len(), 40);
        assert!(pool.windows(2).all(|w| w[0].score >= w[1].score));
        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("general"), Some(&40));
    }

    #[tokio::test]
    async fn test_claimed_metadata_expires_when_write_fails() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());
        store.fail_pool_writes(true);

        let batch = vec![post("X", "music", 10.0)];
        let err = engine
            .process_batches(&user(), &mode(), vec![batch.into()], Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::Store(_)));

        // The claim landed with a TTL, the pool never did
        let meta = keys::meta_key(&user(), &mode(), "X");
        assert_eq!(meta_field(&store, "X", "score").await.as_deref(), Some("10"));
        assert!(store.inner.ttl(&meta).is_some());
        assert!(engine.read_pool(&user(), &mode()).await.unwrap().is_empty());
        assert_eq!(
            store.inner.get(&keys::lock_key(&user(), &mode())).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_incumbent_metadata_outlives_its_first_ttl() {
        let store = CountingStore::new();
        let mut config = test_config();
        config.ttl.metadata_secs = 1;
        let engine = MergeCacheEngine::new(store.clone(), config);

        let first = vec![post("A", "a", 10.0), post("B", "b", 5.0)];
        engine
            .process_batches(&user(), &mode(), vec![first.into()], Some(2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(600)).await;
        engine
            .process_batches(&user(), &mode(), Vec::new(), Some(2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        // B was claimed over a second ago but its record was refreshed
        assert_eq!(meta_field(&store, "B", "category").await.as_deref(), Some("b"));
        let second = vec![post("C", "c", 7.0)];
        engine
            .process_batches(&user(), &mode(), vec![second.into()], Some(2))
            .await
            .unwrap();

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool_ids(&pool), ["A", "C"]);
        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("b"), Some(&0));
        assert_eq!(counts.get("c"), Some(&1));
    }

    #[tokio::test]
    async fn test_rescored_incumbent_updates_metadata_score() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());

        let first = vec![post("A", "a", 90.0), post("B", "b", 50.0)];
        engine
            .process_batches(&user(), &mode(), vec![first.into()], Some(3))
            .await
            .unwrap();

        let rescored = vec![post("A", "a", 95.0)];
        engine
            .process_batches(&user(), &mode(), vec![rescored.into()], Some(3))
            .await
            .unwrap();

        let pool = engine.read_pool(&user(), &mode()).await.unwrap();
        assert_eq!(pool_ids(&pool), ["A", "B"]);
        assert_eq!(pool[0].score, 95.0);
        assert_eq!(meta_field(&store, "A", "score").await.as_deref(), Some("95"));
        assert_eq!(meta_field(&store, "B", "score").await.as_deref(), Some("50"));
        let counts = engine.read_category_counts(&user(), &mode()).await.unwrap();
        assert_eq!(counts.get("a"), Some(&1));
    }

    #[tokio::test]
    async fn test_non_finite_score_rejected_before_lock() {
        let store = CountingStore::new();
        let engine = MergeCacheEngine::new(store.clone(), test_config());

        let batch = vec![post("X", "music", f64::INFINITY)];
        let err = engine
            .process_batches(&user(), &mode(), vec![batch.into()], Some(3))
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::InvalidArgument(_)));
        assert_eq!(store.set_nx_calls(), 0);
        assert_eq!(store.commands(), 0);
    }

    #[test]
    fn test_best_candidates_prefers_higher_then_earlier() {
        let batches = vec![
            vec![post("A", "first", 5.0), post("B", "first", 1.0)],
            vec![post("A", "second", 9.0), post("B", "second", 1.0)],
        ];
        let best = best_candidates(&batches);
        assert_eq!(best["A"].category, "second");
        assert_eq!(best["B"].category, "first");
    }

    #[test]
    fn test_parse_capacity() {
        assert_eq!(parse_capacity(&Reply::Nil).unwrap(), None);
        assert_eq!(parse_capacity(&Reply::bulk("40")).unwrap(), Some(40));
        assert!(parse_capacity(&Reply::bulk("-1")).is_err());
        assert!(parse_capacity(&Reply::Int(-1)).is_err());
    }
}
