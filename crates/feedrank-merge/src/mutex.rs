//! Distributed advisory lock.
//!
//! A lock is a store key created with set-if-absent and a TTL. The value is a
//! random signature that lets the holder recognise its own key on release.
//!
//! ```text
//! (free) ── acquire() ──→ AcquiredLock ── release() ──→ (free)
//!    ↑                        │
//!    └──── TTL expiry ────────┘
//! ```
//!
//! Release is read-then-delete and not atomic: another process can take the
//! lock between our read of the signature and our delete, and we would then
//! delete its key. The window is the store round trip; callers that need
//! stronger guarantees must check the lock budget before writing.

use crate::error::{MergeError, MergeResult};
use crate::metrics::MergeMetrics;
use feedrank_common::config::LockConfig;
use feedrank_store::RankedCacheStore;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Proof that `lock_path` was acquired, valid until `expires_at`.
///
/// Consumed by [`DistributedMutex::release`].
#[derive(Debug)]
pub struct AcquiredLock {
    signature: String,
    lock_path: String,
    data_path: String,
    expires_at: Instant,
}

impl AcquiredLock {
    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn lock_path(&self) -> &str {
        &self.lock_path
    }

    /// Resource the lock protects
    pub fn data_path(&self) -> &str {
        &self.data_path
    }

    pub const fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before the lock key expires (zero once expired)
    pub fn remaining(&self, now: Instant) -> Duration {
        self.expires_at.saturating_duration_since(now)
    }
}

/// Named mutex backed by the ranked cache store
pub struct DistributedMutex {
    store: Arc<dyn RankedCacheStore>,
    config: LockConfig,
    metrics: Option<Arc<MergeMetrics>>,
}

impl DistributedMutex {
    pub fn new(store: Arc<dyn RankedCacheStore>, config: LockConfig) -> Self {
        Self {
            store,
            config,
            metrics: None,
        }
    }

    /// Record retries and failures into `metrics`
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MergeMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub const fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Acquire `lock_path`, waiting a jittered backoff between attempts.
    ///
    /// Gives up with [`MergeError::AcquireLock`] after `max_depth` attempts.
    /// Store errors are returned as they occur, without retrying.
    pub async fn acquire(&self, lock_path: &str, data_path: &str) -> MergeResult<AcquiredLock> {
        let ttl = self.config.ttl();
        let mut depth = 0;

        while depth < self.config.max_depth {
            let signature = Uuid::new_v4().to_string();
            // Start the clock before the round trip so expires_at never
            // outlives the key.
            let started = Instant::now();
            if self.store.set_nx(lock_path, &signature, ttl).await? {
                debug!("Acquired lock {} (attempt {})", lock_path, depth + 1);
                return Ok(AcquiredLock {
                    signature,
                    lock_path: lock_path.to_string(),
                    data_path: data_path.to_string(),
                    expires_at: started + ttl,
                });
            }

            depth += 1;
            if let Some(metrics) = &self.metrics {
                metrics.record_lock_retry();
            }
            if depth < self.config.max_depth {
                let wait = self.backoff();
                debug!(
                    "Lock {} is held, retrying in {:?} (attempt {})",
                    lock_path, wait, depth
                );
                tokio::time::sleep(wait).await;
            }
        }

        error!(
            "Failed to acquire lock {} for {} after {} attempts",
            lock_path, data_path, depth
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_lock_failure();
        }
        Err(MergeError::AcquireLock {
            path: lock_path.to_string(),
            depth,
        })
    }

    /// Release a lock acquired by this process.
    ///
    /// Returns `false` without touching the store when the lock has already
    /// expired, and `false` without deleting when the stored signature no
    /// longer matches (the key expired and someone else took it).
    pub async fn release(&self, lock: AcquiredLock) -> MergeResult<bool> {
        if lock.is_expired(Instant::now()) {
            debug!("Lock {} expired before release", lock.lock_path);
            return Ok(false);
        }

        match self.store.get(&lock.lock_path).await? {
            Some(current) if current == lock.signature => {
                self.store.del(&lock.lock_path).await?;
                debug!("Released lock {}", lock.lock_path);
                Ok(true)
            }
            _ => {
                warn!(
                    "Lock {} is no longer ours, leaving it in place",
                    lock.lock_path
                );
                Ok(false)
            }
        }
    }

    /// Base backoff scaled by a uniform factor in `[1 - jitter, 1 + jitter]`
    fn backoff(&self) -> Duration {
        let base = self.config.retry_backoff();
        let jitter = self.config.retry_jitter;
        if jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        base.mul_f64(factor.max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::CountingStore;

    fn config(ttl_ms: u64, backoff_ms: u64, max_depth: u32) -> LockConfig {
        LockConfig {
            ttl_ms,
            retry_backoff_ms: backoff_ms,
            retry_jitter: 0.5,
            max_depth,
            expiry_buffer_ms: 0,
        }
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store = CountingStore::new();
        let mutex = DistributedMutex::new(store.clone(), config(5_000, 10, 5));

        let lock = mutex.acquire("feed:u:m:lock", "feed:u:m:pool").await.unwrap();
        assert_eq!(lock.data_path(), "feed:u:m:pool");
        assert_eq!(
            store.inner.get("feed:u:m:lock").await.unwrap().as_deref(),
            Some(lock.signature())
        );
        assert!(lock.remaining(Instant::now()) > Duration::from_secs(4));

        assert!(mutex.release(lock).await.unwrap());
        assert_eq!(store.inner.get("feed:u:m:lock").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_signatures_are_unique() {
        let store = CountingStore::new();
        let mutex = DistributedMutex::new(store, config(5_000, 10, 5));

        let first = mutex.acquire("lock", "data").await.unwrap();
        let first_sig = first.signature().to_string();
        mutex.release(first).await.unwrap();
        let second = mutex.acquire("lock", "data").await.unwrap();
        assert_ne!(first_sig, second.signature());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_acquire_retries_until_released() {
        let store = CountingStore::new();
        let mutex = Arc::new(DistributedMutex::new(store.clone(), config(5_000, 10, 50)));

        let held = mutex.acquire("lock", "data").await.unwrap();
        store.reset();

        let releaser = {
            let mutex = mutex.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                mutex.release(held).await.unwrap()
            })
        };

        let lock = mutex.acquire("lock", "data").await.unwrap();
        assert!(releaser.await.unwrap());
        assert!(store.set_nx_calls() >= 2);
        assert_eq!(
            store.inner.get("lock").await.unwrap().as_deref(),
            Some(lock.signature())
        );
    }

    #[tokio::test]
    async fn test_acquire_gives_up_at_ceiling() {
        let store = CountingStore::new();
        let metrics = Arc::new(MergeMetrics::new());
        let mutex =
            DistributedMutex::new(store.clone(), config(5_000, 1, 3)).with_metrics(metrics.clone());

        let _held = mutex.acquire("lock", "data").await.unwrap();
        store.reset();

        let err = mutex.acquire("lock", "data").await.unwrap_err();
        assert!(matches!(err, MergeError::AcquireLock { depth: 3, .. }));
        assert_eq!(store.set_nx_calls(), 3);
        assert_eq!(metrics.snapshot().lock_retries, 3);
        assert_eq!(metrics.snapshot().lock_failures, 1);
    }

    #[tokio::test]
    async fn test_give_up_does_not_wait_after_last_attempt() {
        let store = CountingStore::new();
        let mut cfg = config(5_000, 500, 1);
        cfg.retry_jitter = 0.0;
        let mutex = DistributedMutex::new(store.clone(), cfg);

        let _held = mutex.acquire("lock", "data").await.unwrap();
        store.reset();

        let started = Instant::now();
        let err = mutex.acquire("lock", "data").await.unwrap_err();
        assert!(matches!(err, MergeError::AcquireLock { depth: 1, .. }));
        assert_eq!(store.set_nx_calls(), 1);
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_release_expired_lock_skips_store() {
        let store = CountingStore::new();
        let mutex = DistributedMutex::new(store.clone(), config(20, 1, 3));

        let lock = mutex.acquire("lock", "data").await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        store.reset();

        assert!(!mutex.release(lock).await.unwrap());
        assert_eq!(store.commands(), 0);
    }

    #[tokio::test]
    async fn test_release_after_ownership_lost() {
        let store = CountingStore::new();
        let mutex = DistributedMutex::new(store.clone(), config(5_000, 1, 3));

        let lock = mutex.acquire("lock", "data").await.unwrap();
        // Simulate expiry followed by reacquisition elsewhere
        store.inner.del("lock").await.unwrap();
        store
            .inner
            .set_nx("lock", "someone-else", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!mutex.release(lock).await.unwrap());
        assert_eq!(
            store.inner.get("lock").await.unwrap().as_deref(),
            Some("someone-else")
        );
    }

    #[test]
    fn test_backoff_bounds() {
        let store = CountingStore::new();
        let mutex = DistributedMutex::new(store, LockConfig::default());
        for _ in 0..200 {
            let wait = mutex.backoff();
            assert!(wait >= Duration::from_millis(500));
            assert!(wait <= Duration::from_millis(1500));
        }
    }

    #[test]
    fn test_backoff_without_jitter() {
        let store = CountingStore::new();
        let mut cfg = config(1_000, 40, 3);
        cfg.retry_jitter = 0.0;
        let mutex = DistributedMutex::new(store, cfg);
        assert_eq!(mutex.backoff(), Duration::from_millis(40));
    }
}
