//! Core type definitions for FeedRank
//!
//! This module defines the identifiers that partition the cache namespace
//! and the records that flow between ranking, merging and the store.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a cached post
pub type PostId = String;

/// Maximum length of a key segment (user id or mode name)
const MAX_SEGMENT_LEN: usize = 128;

/// Errors that can occur when creating a key segment
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeySegmentError {
    #[error("key segment cannot be empty")]
    Empty,
    #[error("key segment must be at most 128 characters")]
    TooLong,
    #[error("key segment contains invalid character: {0:?}")]
    InvalidChar(char),
}

/// Validate a string that will be embedded in a store key.
///
/// `:` separates key segments and whitespace breaks key parsing in most
/// store clients, so both are rejected.
fn validate_segment(segment: &str) -> Result<(), KeySegmentError> {
    if segment.is_empty() {
        return Err(KeySegmentError::Empty);
    }
    if segment.len() > MAX_SEGMENT_LEN {
        return Err(KeySegmentError::TooLong);
    }
    if let Some(c) = segment.chars().find(|c| *c == ':' || c.is_whitespace()) {
        return Err(KeySegmentError::InvalidChar(c));
    }
    Ok(())
}

/// Identifier of the user owning a feed
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct UserId(String);

impl UserId {
    /// Create a new user id
    pub fn new(id: impl Into<String>) -> Result<Self, KeySegmentError> {
        let id = id.into();
        validate_segment(&id)?;
        Ok(Self(id))
    }

    /// Get the user id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({:?})", self.0)
    }
}

/// Discovery strategy partitioning a user's cache namespace
/// (e.g. `following` or `recommended`)
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
pub struct Mode(String);

impl Mode {
    /// Create a new mode
    pub fn new(name: impl Into<String>) -> Result<Self, KeySegmentError> {
        let name = name.into();
        validate_segment(&name)?;
        Ok(Self(name))
    }

    /// Get the mode name as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Mode({:?})", self.0)
    }
}

/// A post scored by the ranking service
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredPost {
    /// Post identifier
    pub id: PostId,
    /// Grouping key used for diversity bookkeeping
    pub category: String,
    /// Relevance score (higher ranks first)
    pub score: f64,
    /// Whether the user has already seen the post
    #[serde(default)]
    pub seen: bool,
    /// The user's vote on the post (-1, 0 or 1)
    #[serde(default)]
    pub vote: i32,
}

impl ScoredPost {
    /// Create a scored post with no seen/vote state
    pub fn new(id: impl Into<PostId>, category: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            category: category.into(),
            score,
            seen: false,
            vote: 0,
        }
    }
}

/// Minimal projection of a cache member
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: PostId,
    pub score: f64,
}

impl CacheEntry {
    pub fn new(id: impl Into<PostId>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Signed per-category count changes
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CategoryDelta(BTreeMap<String, i64>);

impl CategoryDelta {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one item entering `category`
    pub fn increment(&mut self, category: &str) {
        self.apply(category, 1);
    }

    /// Count one item leaving `category`
    pub fn decrement(&mut self, category: &str) {
        self.apply(category, -1);
    }

    fn apply(&mut self, category: &str, change: i64) {
        *self.0.entry(category.to_string()).or_insert(0) += change;
    }

    /// Get the net change for a category
    #[must_use]
    pub fn get(&self, category: &str) -> i64 {
        self.0.get(category).copied().unwrap_or(0)
    }

    /// Iterate over categories whose net change is non-zero
    pub fn changes(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0
            .iter()
            .filter(|(_, change)| **change != 0)
            .map(|(category, change)| (category.as_str(), *change))
    }

    /// True when no category has a net change
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes().next().is_none()
    }
}
