//! Metadata reconciliation: what a merge adds and evicts, and which additions
//! survived the ownership claim.

use crate::error::{MergeError, MergeResult};
use feedrank_common::{CacheEntry, PostId};
use feedrank_store::Reply;
use feedrank_store::keys::CLAIM_FIELDS;
use std::collections::HashSet;

/// Ids entering and leaving the cache
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDiff {
    /// In proposed order
    pub new_posts: Vec<PostId>,
    /// In original order
    pub removed_posts: Vec<PostId>,
}

impl CacheDiff {
    pub fn is_empty(&self) -> bool {
        self.new_posts.is_empty() && self.removed_posts.is_empty()
    }
}

/// Result of applying claim replies to a proposed cache
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimOutcome {
    /// Proposed cache without the ids whose claim failed
    pub cache: Vec<CacheEntry>,
    pub claimed: Vec<PostId>,
    pub rejected: Vec<PostId>,
}

/// Compare two snapshots by id
pub fn diff(proposed: &[CacheEntry], original: &[CacheEntry]) -> CacheDiff {
    let proposed_ids: HashSet<&str> = proposed.iter().map(|e| e.id.as_str()).collect();
    let original_ids: HashSet<&str> = original.iter().map(|e| e.id.as_str()).collect();

    CacheDiff {
        new_posts: proposed
            .iter()
            .filter(|e| !original_ids.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect(),
        removed_posts: original
            .iter()
            .filter(|e| !proposed_ids.contains(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect(),
    }
}

/// Drop new ids whose metadata claim was lost to another writer.
///
/// `claim_reply` holds one reply per claimed field, [`CLAIM_FIELDS`] per id,
/// in `new_post_ids` order. A claim succeeded only if this call created
/// every field.
pub fn reconcile_claim_failures(
    claim_reply: &[Reply],
    new_post_ids: &[PostId],
    proposed: &[CacheEntry],
) -> MergeResult<ClaimOutcome> {
    let per_id = CLAIM_FIELDS.len();
    let expected = new_post_ids.len() * per_id;
    if claim_reply.len() != expected {
        return Err(MergeError::invalid_argument(format!(
            "claim reply has {} results for {} posts, expected {}",
            claim_reply.len(),
            new_post_ids.len(),
            expected
        )));
    }

    let mut claimed = Vec::with_capacity(new_post_ids.len());
    let mut rejected = Vec::new();
    for (id, replies) in new_post_ids.iter().zip(claim_reply.chunks_exact(per_id)) {
        if replies.iter().all(Reply::is_created) {
            claimed.push(id.clone());
        } else {
            rejected.push(id.clone());
        }
    }

    let cache = if rejected.is_empty() {
        proposed.to_vec()
    } else {
        let lost: HashSet<&str> = rejected.iter().map(String::as_str).collect();
        proposed
            .iter()
            .filter(|e| !lost.contains(e.id.as_str()))
            .cloned()
            .collect()
    };

    Ok(ClaimOutcome {
        cache,
        claimed,
        rejected,
    })
}
