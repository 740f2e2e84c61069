//! Merge engine metrics for Prometheus
//!
//! Counters are plain atomics updated on the hot path and read back either as
//! a [`MetricsSnapshot`] or in Prometheus text format.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Merge latency bucket boundaries in milliseconds
const LATENCY_BUCKET_BOUNDARIES_MS: [u64; 8] = [5, 10, 25, 50, 100, 250, 1000, 5000];

/// Counters for one merge engine
#[derive(Debug)]
pub struct MergeMetrics {
    start_time: Instant,
    /// Merges whose writes were committed
    merges_committed: AtomicU64,
    /// Merges abandoned because the lock budget ran out
    merges_aborted: AtomicU64,
    lock_retries: AtomicU64,
    lock_failures: AtomicU64,
    /// New posts whose metadata claim was lost to another writer
    claims_rejected: AtomicU64,
    items_added: AtomicU64,
    items_evicted: AtomicU64,
    latency_sum_us: AtomicU64,
    /// Cumulative counts per bucket
    latency_buckets: [AtomicU64; 8],
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub merges_committed: u64,
    pub merges_aborted: u64,
    pub lock_retries: u64,
    pub lock_failures: u64,
    pub claims_rejected: u64,
    pub items_added: u64,
    pub items_evicted: u64,
}

impl Default for MergeMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            merges_committed: AtomicU64::new(0),
            merges_aborted: AtomicU64::new(0),
            lock_retries: AtomicU64::new(0),
            lock_failures: AtomicU64::new(0),
            claims_rejected: AtomicU64::new(0),
            items_added: AtomicU64::new(0),
            items_evicted: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_buckets: Default::default(),
        }
    }

    /// Record a committed merge and how long it took
    pub fn record_commit(&self, added: usize, evicted: usize, elapsed: Duration) {
        self.merges_committed.fetch_add(1, Ordering::Relaxed);
        self.items_added.fetch_add(added as u64, Ordering::Relaxed);
        self.items_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
        self.latency_sum_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        let ms = elapsed.as_millis() as u64;
        for (i, &boundary) in LATENCY_BUCKET_BOUNDARIES_MS.iter().enumerate() {
            if ms <= boundary {
                self.latency_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_abort(&self) {
        self.merges_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_retry(&self) {
        self.lock_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_failure(&self) {
        self.lock_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_claims_rejected(&self, count: usize) {
        self.claims_rejected
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            merges_committed: self.merges_committed.load(Ordering::Relaxed),
            merges_aborted: self.merges_aborted.load(Ordering::Relaxed),
            lock_retries: self.lock_retries.load(Ordering::Relaxed),
            lock_failures: self.lock_failures.load(Ordering::Relaxed),
            claims_rejected: self.claims_rejected.load(Ordering::Relaxed),
            items_added: self.items_added.load(Ordering::Relaxed),
            items_evicted: self.items_evicted.load(Ordering::Relaxed),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::with_capacity(2 * 1024);
        let snap = self.snapshot();

        write_metric(
            &mut output,
            "feedrank_merge_uptime_seconds",
            "Merge engine uptime in seconds",
            "counter",
            self.start_time.elapsed().as_secs(),
        );
        write_metric(
            &mut output,
            "feedrank_merges_committed_total",
            "Merges whose writes were committed",
            "counter",
            snap.merges_committed,
        );
        write_metric(
            &mut output,
            "feedrank_merges_aborted_total",
            "Merges abandoned because the lock was about to expire",
            "counter",
            snap.merges_aborted,
        );
        write_metric(
            &mut output,
            "feedrank_lock_retries_total",
            "Lock acquisition attempts that found the lock held",
            "counter",
            snap.lock_retries,
        );
        write_metric(
            &mut output,
            "feedrank_lock_failures_total",
            "Lock acquisitions that hit the retry ceiling",
            "counter",
            snap.lock_failures,
        );
        write_metric(
            &mut output,
            "feedrank_claims_rejected_total",
            "New posts dropped because another writer claimed them first",
            "counter",
            snap.claims_rejected,
        );
        write_metric(
            &mut output,
            "feedrank_items_added_total",
            "Posts added to cached pools",
            "counter",
            snap.items_added,
        );
        write_metric(
            &mut output,
            "feedrank_items_evicted_total",
            "Posts evicted from cached pools",
            "counter",
            snap.items_evicted,
        );

        let _ = writeln!(
            output,
            "# HELP feedrank_merge_duration_seconds Committed merge latency"
        );
        let _ = writeln!(output, "# TYPE feedrank_merge_duration_seconds histogram");
        for (i, &boundary) in LATENCY_BUCKET_BOUNDARIES_MS.iter().enumerate() {
            let _ = writeln!(
                output,
                "feedrank_merge_duration_seconds_bucket{{le=\"{}\"}} {}",
                boundary as f64 / 1000.0,
                self.latency_buckets[i].load(Ordering::Relaxed)
            );
        }
        let _ = writeln!(
            output,
            "feedrank_merge_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            snap.merges_committed
        );
        let _ = writeln!(
            output,
            "feedrank_merge_duration_seconds_sum {}",
            self.latency_sum_us.load(Ordering::Relaxed) as f64 / 1_000_000.0
        );
        let _ = writeln!(
            output,
            "feedrank_merge_duration_seconds_count {}",
            snap.merges_committed
        );

        output
    }
}

fn write_metric(output: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {kind}");
    let _ = writeln!(output, "{name} {value}");
}
