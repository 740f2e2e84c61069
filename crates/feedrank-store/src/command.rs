//! Store commands and replies.
//!
//! Commands are plain data so that a whole batch can be handed to a backend
//! and executed as one atomic multi. Replies mirror the flat reply model of
//! key-value stores: integers, bulk strings, nil and nested arrays.

use feedrank_common::CacheEntry;
use std::time::Duration;

/// A single store operation
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// Read a string value
    Get { key: String },
    /// Set a string value with a TTL only if the key is absent
    SetNx {
        key: String,
        value: String,
        ttl: Duration,
    },
    /// Delete keys of any type
    Del { keys: Vec<String> },
    /// Refresh the TTL of an existing key
    Expire { key: String, ttl: Duration },
    /// Create a hash field only if it does not exist yet
    HSetNx {
        key: String,
        field: String,
        value: String,
    },
    /// Create or overwrite a hash field
    HSet {
        key: String,
        field: String,
        value: String,
    },
    /// Read a hash field
    HGet { key: String, field: String },
    /// Read every field of a hash
    HGetAll { key: String },
    /// Atomically add to an integer hash field
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// Insert entries into a ranked list
    RankedPush {
        key: String,
        entries: Vec<CacheEntry>,
    },
    /// Read a whole ranked list, best first
    RankedRange { key: String },
}

impl Command {
    pub fn get(key: impl Into<String>) -> Self {
        Self::Get { key: key.into() }
    }

    pub fn set_nx(key: impl Into<String>, value: impl Into<String>, ttl: Duration) -> Self {
        Self::SetNx {
            key: key.into(),
            value: value.into(),
            ttl,
        }
    }

    pub fn del(key: impl Into<String>) -> Self {
        Self::Del {
            keys: vec![key.into()],
        }
    }

    pub fn expire(key: impl Into<String>, ttl: Duration) -> Self {
        Self::Expire {
            key: key.into(),
            ttl,
        }
    }

    pub fn hset_nx(
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::HSetNx {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hset(key: impl Into<String>, field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::HSet {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn hget(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self::HGet {
            key: key.into(),
            field: field.into(),
        }
    }

    pub fn hget_all(key: impl Into<String>) -> Self {
        Self::HGetAll { key: key.into() }
    }

    pub fn hincr_by(key: impl Into<String>, field: impl Into<String>, delta: i64) -> Self {
        Self::HIncrBy {
            key: key.into(),
            field: field.into(),
            delta,
        }
    }

    pub fn ranked_push(key: impl Into<String>, entries: Vec<CacheEntry>) -> Self {
        Self::RankedPush {
            key: key.into(),
            entries,
        }
    }

    pub fn ranked_range(key: impl Into<String>) -> Self {
        Self::RankedRange { key: key.into() }
    }

    /// Keys the command reads or writes
    pub fn keys(&self) -> Vec<&str> {
        match self {
            Self::Del { keys } => keys.iter().map(String::as_str).collect(),
            Self::Get { key }
            | Self::SetNx { key, .. }
            | Self::Expire { key, .. }
            | Self::HSetNx { key, .. }
            | Self::HSet { key, .. }
            | Self::HGet { key, .. }
            | Self::HGetAll { key }
            | Self::HIncrBy { key, .. }
            | Self::RankedPush { key, .. }
            | Self::RankedRange { key } => vec![key.as_str()],
        }
    }

    /// Short name used in logs and error messages
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "GET",
            Self::SetNx { .. } => "SETNX",
            Self::Del { .. } => "DEL",
            Self::Expire { .. } => "EXPIRE",
            Self::HSetNx { .. } => "HSETNX",
            Self::HSet { .. } => "HSET",
            Self::HGet { .. } => "HGET",
            Self::HGetAll { .. } => "HGETALL",
            Self::HIncrBy { .. } => "HINCRBY",
            Self::RankedPush { .. } => "RPUSH",
            Self::RankedRange { .. } => "RRANGE",
        }
    }
}

/// A reply to a single command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reply {
    Nil,
    Int(i64),
    Bulk(String),
    Array(Vec<Reply>),
}

impl Reply {
    pub fn bulk(value: impl Into<String>) -> Self {
        Self::Bulk(value.into())
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Bulk(value) => Some(value),
            _ => None,
        }
    }

    /// True for the `Int(1)` a create-if-absent primitive returns when this
    /// call created the key or field
    #[must_use]
    pub const fn is_created(&self) -> bool {
        matches!(self, Self::Int(1))
    }
}
