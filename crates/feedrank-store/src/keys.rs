//! Store key namespace.
//!
//! Everything owned by one feed lives under `feed:{user}:{mode}:`.

use feedrank_common::{Mode, UserId};

const PREFIX: &str = "feed";

// Metadata hash fields. The first three form the ownership claim.
pub const FIELD_SCORE: &str = "score";
pub const FIELD_SEEN: &str = "seen";
pub const FIELD_VOTE: &str = "vote";
pub const FIELD_CATEGORY: &str = "category";

/// Fields written by a metadata claim, in claim order
pub const CLAIM_FIELDS: [&str; 3] = [FIELD_SCORE, FIELD_SEEN, FIELD_VOTE];

fn feed_key(user: &UserId, mode: &Mode, suffix: &str) -> String {
    format!("{PREFIX}:{user}:{mode}:{suffix}")
}

/// Ordered id/score list
pub fn pool_key(user: &UserId, mode: &Mode) -> String {
    feed_key(user, mode, "pool")
}

/// Metadata record of one cached post
pub fn meta_key(user: &UserId, mode: &Mode, post_id: &str) -> String {
    feed_key(user, mode, &format!("meta:{post_id}"))
}

/// Per-category counters (one hash field per category)
pub fn category_key(user: &UserId, mode: &Mode) -> String {
    feed_key(user, mode, "categories")
}

/// Advisory lock guarding the pool
pub fn lock_key(user: &UserId, mode: &Mode) -> String {
    feed_key(user, mode, "lock")
}

/// Stored pool capacity
pub fn capacity_key(user: &UserId, mode: &Mode) -> String {
    feed_key(user, mode, "capacity")
}
