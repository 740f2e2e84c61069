//! Merge jobs read from a JSON job file, and the table ranker that scores
//! their candidates.

use async_trait::async_trait;
use feedrank_common::{Mode, PostId, ScoredPost, UserId};
use feedrank_merge::{MergeResult, Ranker};
use serde::Deserialize;
use std::collections::HashMap;

/// Job file contents
#[derive(Debug, Deserialize)]
pub struct JobFile {
    pub jobs: Vec<Job>,
}

/// One merge of candidates into a user's feed
#[derive(Debug, Clone, Deserialize)]
pub struct Job {
    pub user: String,
    pub mode: String,
    /// Capacity for this merge only
    #[serde(default)]
    pub capacity: Option<usize>,
    /// Capacity written to the store before merging
    #[serde(default)]
    pub stored_capacity: Option<usize>,
    /// Desired ranked output size, drives the batch count
    #[serde(default)]
    pub output_size: Option<usize>,
    pub candidates: Vec<ScoredPost>,
}

impl Job {
    pub fn user_id(&self) -> feedrank_common::Result<UserId> {
        Ok(UserId::new(self.user.as_str())?)
    }

    pub fn mode(&self) -> feedrank_common::Result<Mode> {
        Ok(Mode::new(self.mode.as_str())?)
    }

    pub fn candidate_ids(&self) -> Vec<PostId> {
        self.candidates.iter().map(|c| c.id.clone()).collect()
    }
}

/// Ranks candidates by looking up precomputed scores.
///
/// Posts already seen by the user are ineligible and left out.
pub struct TableRanker {
    posts: HashMap<PostId, ScoredPost>,
}

impl TableRanker {
    pub fn new(posts: &[ScoredPost]) -> Self {
        Self {
            posts: posts.iter().map(|p| (p.id.clone(), p.clone())).collect(),
        }
    }
}

#[async_trait]
impl Ranker for TableRanker {
    async fn rank(
        &self,
        _user: &UserId,
        _mode: &Mode,
        candidates: Vec<PostId>,
    ) -> MergeResult<Vec<ScoredPost>> {
        let mut ranked: Vec<ScoredPost> = candidates
            .iter()
            .filter_map(|id| self.posts.get(id))
            .filter(|post| !post.seen)
            .cloned()
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }
}
