//! Bounded k-way merge of the cached pool with freshly ranked batches.
//!
//! Source 0 is the current cache, sources `1..=k` are the candidate batches
//! in dispatch order. Every source is already sorted best first, so a heap
//! holding one head per source yields the merged order directly.
//!
//! Ties on score go to the lower source index, which gives the incumbent
//! cache precedence over candidates and earlier batches precedence over
//! later ones. An id is emitted at most once, at its first (best) position.

use crate::error::{MergeError, MergeResult};
use feedrank_common::{CacheEntry, ScoredPost};
use feedrank_store::Reply;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// Next unconsumed item of one source
#[derive(Debug, Clone, Copy)]
struct Head {
    score: f64,
    source: usize,
    position: usize,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher score first, then lower source, then stream order
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.source.cmp(&self.source))
            .then_with(|| other.position.cmp(&self.position))
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Head {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Head {}

struct Sources<'a> {
    current: &'a [CacheEntry],
    batches: &'a [Vec<ScoredPost>],
}

impl Sources<'_> {
    fn get(&self, source: usize, position: usize) -> Option<(&str, f64)> {
        if source == 0 {
            self.current
                .get(position)
                .map(|e| (e.id.as_str(), e.score))
        } else {
            self.batches
                .get(source - 1)?
                .get(position)
                .map(|p| (p.id.as_str(), p.score))
        }
    }

    fn head(&self, source: usize, position: usize) -> Option<Head> {
        // -0.0 + 0.0 is 0.0, so both zeros tie under total_cmp
        self.get(source, position).map(|(_, score)| Head {
            score: score + 0.0,
            source,
            position,
        })
    }
}

/// Merge `current` with `batches` into at most `capacity` entries, best first.
///
/// `current` and every batch must be sorted by descending score, and every
/// score must be finite.
pub fn sort_data(
    capacity: usize,
    current: &[CacheEntry],
    batches: &[Vec<ScoredPost>],
) -> Vec<CacheEntry> {
    if capacity == 0 {
        return Vec::new();
    }

    // Full cache and nothing that can beat its floor: keep it as it is
    if current.len() >= capacity {
        let floor = current[capacity - 1].score;
        let nothing_enters = batches
            .iter()
            .filter_map(|batch| batch.first())
            .all(|best| best.score < floor);
        if nothing_enters {
            return current[..capacity].to_vec();
        }
    }

    let sources = Sources { current, batches };
    let mut heap: BinaryHeap<Head> = (0..=batches.len())
        .filter_map(|source| sources.head(source, 0))
        .collect();

    let mut emitted: HashSet<&str> = HashSet::with_capacity(capacity);
    let mut merged = Vec::with_capacity(capacity);

    while merged.len() < capacity {
        let Some(head) = heap.pop() else {
            break;
        };
        if let Some((id, score)) = sources.get(head.source, head.position) {
            if emitted.insert(id) {
                merged.push(CacheEntry::new(id, score));
            }
        }
        if let Some(next) = sources.head(head.source, head.position + 1) {
            heap.push(next);
        }
    }

    merged
}

/// Parse a cache read reply into entries.
///
/// The reply is `[header..., id1, score1, id2, score2, ...]`, possibly with
/// the id/score pairs nested in an array. `header_fields_to_skip` leading
/// values are dropped before pairing.
pub fn parse_current_cached_data(
    raw: &[Reply],
    header_fields_to_skip: usize,
) -> MergeResult<Vec<CacheEntry>> {
    let mut flat = Vec::with_capacity(raw.len());
    flatten(raw, &mut flat);

    if flat.len() < header_fields_to_skip {
        return Err(MergeError::invalid_argument(format!(
            "cache reply has {} values, expected at least {} header fields",
            flat.len(),
            header_fields_to_skip
        )));
    }
    let body = &flat[header_fields_to_skip..];
    if body.len() % 2 != 0 {
        return Err(MergeError::invalid_argument(format!(
            "cache reply has an odd number of id/score values ({})",
            body.len()
        )));
    }

    body.chunks_exact(2)
        .map(|pair| {
            let id = pair[0].as_str().ok_or_else(|| {
                MergeError::invalid_argument(format!("cache entry id is not a string: {:?}", pair[0]))
            })?;
            let score = match pair[1] {
                Reply::Bulk(raw) => raw.parse::<f64>().ok(),
                Reply::Int(value) => Some(*value as f64),
                _ => None,
            }
            .filter(|score| score.is_finite())
            .ok_or_else(|| {
                MergeError::invalid_argument(format!(
                    "cache entry {} has an invalid score: {:?}",
                    id, pair[1]
                ))
            })?;
            Ok(CacheEntry::new(id, score))
        })
        .collect()
}

fn flatten<'a>(replies: &'a [Reply], out: &mut Vec<&'a Reply>) {
    for reply in replies {
        match reply {
            Reply::Array(items) => flatten(items, out),
            other => out.push(other),
        }
    }
}
