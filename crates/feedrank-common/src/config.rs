//! Configuration types for FeedRank
//!
//! This module defines configuration structures used across components.
//! Every section has a `Default` so a partial TOML file is enough.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration for FeedRank
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Distributed lock configuration
    pub lock: LockConfig,
    /// Store key lifetimes
    pub ttl: TtlConfig,
    /// Batch dispatch configuration
    pub dispatch: DispatchConfig,
    /// Cache sizing
    pub cache: CacheConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Config {
    /// Check invariants that serde cannot express
    pub fn validate(&self) -> Result<()> {
        self.lock.validate()?;
        self.ttl.validate()?;
        self.dispatch.validate()?;
        Ok(())
    }
}

/// Distributed lock configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Lifetime of an acquired lock key (milliseconds)
    pub ttl_ms: u64,
    /// Base wait between acquisition attempts (milliseconds)
    pub retry_backoff_ms: u64,
    /// Relative jitter applied to the backoff (0.5 = ±50%)
    pub retry_jitter: f64,
    /// Number of acquisition attempts before giving up
    pub max_depth: u32,
    /// Minimum remaining lock lifetime required before writing (milliseconds)
    pub expiry_buffer_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            ttl_ms: 30_000,
            retry_backoff_ms: 1_000,
            retry_jitter: 0.5,
            max_depth: 75,
            expiry_buffer_ms: 5_000,
        }
    }
}

impl LockConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    #[must_use]
    pub const fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    #[must_use]
    pub const fn expiry_buffer(&self) -> Duration {
        Duration::from_millis(self.expiry_buffer_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.ttl_ms == 0 {
            return Err(Error::configuration("lock.ttl_ms must be positive"));
        }
        if self.max_depth == 0 {
            return Err(Error::configuration("lock.max_depth must be positive"));
        }
        if !(0.0..=1.0).contains(&self.retry_jitter) {
            return Err(Error::configuration(format!(
                "lock.retry_jitter must be within [0, 1], got {}",
                self.retry_jitter
            )));
        }
        if self.expiry_buffer_ms >= self.ttl_ms {
            return Err(Error::configuration(format!(
                "lock.expiry_buffer_ms ({}) must be smaller than lock.ttl_ms ({})",
                self.expiry_buffer_ms, self.ttl_ms
            )));
        }
        Ok(())
    }
}

/// Store key lifetimes
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Per-item metadata records (seconds)
    pub metadata_secs: u64,
    /// Per-category counters (seconds)
    pub category_secs: u64,
    /// Ordered pool list (seconds)
    pub pool_secs: u64,
    /// Stored cache capacity (seconds)
    pub capacity_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            metadata_secs: 20 * 60,
            category_secs: 10 * 60,
            pool_secs: 15 * 60,
            capacity_secs: 60 * 60,
        }
    }
}

impl TtlConfig {
    #[must_use]
    pub const fn metadata(&self) -> Duration {
        Duration::from_secs(self.metadata_secs)
    }

    #[must_use]
    pub const fn category(&self) -> Duration {
        Duration::from_secs(self.category_secs)
    }

    #[must_use]
    pub const fn pool(&self) -> Duration {
        Duration::from_secs(self.pool_secs)
    }

    #[must_use]
    pub const fn capacity(&self) -> Duration {
        Duration::from_secs(self.capacity_secs)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("ttl.metadata_secs", self.metadata_secs),
            ("ttl.category_secs", self.category_secs),
            ("ttl.pool_secs", self.pool_secs),
            ("ttl.capacity_secs", self.capacity_secs),
        ] {
            if value == 0 {
                return Err(Error::configuration(format!("{name} must be positive")));
            }
        }
        Ok(())
    }
}

/// Batch dispatch configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Largest sub-batch allowed before the failsafe trips
    pub max_batch_size: usize,
    /// Desired ranked output size used to size sub-batches
    pub output_size: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1_000,
            output_size: 50,
        }
    }
}

impl DispatchConfig {
    fn validate(&self) -> Result<()> {
        if self.max_batch_size == 0 {
            return Err(Error::configuration(
                "dispatch.max_batch_size must be positive",
            ));
        }
        if self.output_size == 0 {
            return Err(Error::configuration("dispatch.output_size must be positive"));
        }
        Ok(())
    }
}

/// Cache sizing
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Capacity used when neither an override nor a stored capacity exists
    pub default_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_capacity: 300,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default tracing filter when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
