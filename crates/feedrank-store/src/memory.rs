//! In-memory store backend.
//!
//! Keeps every key in a single map behind a mutex, so a whole command batch
//! executes atomically with respect to other callers. A batch that fails
//! part way is rolled back before the error is returned. Expired keys are
//! dropped lazily when touched, or in bulk by [`MemoryStore::purge_expired`].

use crate::command::{Command, Reply};
use crate::store::{RankedCacheStore, StoreError, StoreResult};
use async_trait::async_trait;
use feedrank_common::CacheEntry;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Value stored under a key
#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    /// Sorted by descending score; equal scores keep insertion order
    Ranked(Vec<CacheEntry>),
}

impl Value {
    const fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Hash(_) => "hash",
            Self::Ranked(_) => "ranked list",
        }
    }
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    const fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// In-memory [`RankedCacheStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Slot>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .values()
            .filter(|slot| !slot.is_expired(now))
            .count()
    }

    /// Remaining lifetime of a key, `None` if absent or persistent
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let data = self.data.lock();
        let slot = data.get(key).filter(|slot| !slot.is_expired(now))?;
        slot.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Drop every expired key. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, slot| !slot.is_expired(now));
        let removed = before - data.len();
        if removed > 0 {
            debug!("Purged {} expired keys", removed);
        }
        removed
    }

    fn apply(
        data: &mut HashMap<String, Slot>,
        command: Command,
        now: Instant,
    ) -> StoreResult<Reply> {
        match command {
            Command::Get { key } => match live(data, &key, now) {
                None => Ok(Reply::Nil),
                Some(Slot {
                    value: Value::Str(value),
                    ..
                }) => Ok(Reply::Bulk(value.clone())),
                Some(_) => Err(wrong_type(&key, "string")),
            },
            Command::SetNx { key, value, ttl } => {
                if live(data, &key, now).is_some() {
                    return Ok(Reply::Int(0));
                }
                data.insert(
                    key,
                    Slot {
                        value: Value::Str(value),
                        expires_at: Some(now + ttl),
                    },
                );
                Ok(Reply::Int(1))
            }
            Command::Del { keys } => {
                let mut removed = 0;
                for key in keys {
                    if live(data, &key, now).is_some() {
                        data.remove(&key);
                        removed += 1;
                    }
                }
                Ok(Reply::Int(removed))
            }
            Command::Expire { key, ttl } => match live(data, &key, now) {
                Some(slot) => {
                    slot.expires_at = Some(now + ttl);
                    Ok(Reply::Int(1))
                }
                None => Ok(Reply::Int(0)),
            },
            Command::HSetNx { key, field, value } => {
                let hash = hash_mut(data, &key, now)?;
                if hash.contains_key(&field) {
                    return Ok(Reply::Int(0));
                }
                hash.insert(field, value);
                Ok(Reply::Int(1))
            }
            Command::HSet { key, field, value } => {
                let hash = hash_mut(data, &key, now)?;
                let created = hash.insert(field, value).is_none();
                Ok(Reply::Int(i64::from(created)))
            }
            Command::HGet { key, field } => match live(data, &key, now) {
                None => Ok(Reply::Nil),
                Some(Slot {
                    value: Value::Hash(hash),
                    ..
                }) => Ok(hash.get(&field).map_or(Reply::Nil, |v| Reply::Bulk(v.clone()))),
                Some(_) => Err(wrong_type(&key, "hash")),
            },
            Command::HGetAll { key } => match live(data, &key, now) {
                None => Ok(Reply::Array(Vec::new())),
                Some(Slot {
                    value: Value::Hash(hash),
                    ..
                }) => {
                    let mut fields: Vec<_> = hash.iter().collect();
                    fields.sort();
                    Ok(Reply::Array(
                        fields
                            .into_iter()
                            .flat_map(|(f, v)| [Reply::Bulk(f.clone()), Reply::Bulk(v.clone())])
                            .collect(),
                    ))
                }
                Some(_) => Err(wrong_type(&key, "hash")),
            },
            Command::HIncrBy { key, field, delta } => {
                let hash = hash_mut(data, &key, now)?;
                let current = match hash.get(&field) {
                    Some(raw) => raw.parse::<i64>().map_err(|_| StoreError::NotInteger {
                        key: key.clone(),
                        field: field.clone(),
                    })?,
                    None => 0,
                };
                let updated = current + delta;
                hash.insert(field, updated.to_string());
                Ok(Reply::Int(updated))
            }
            Command::RankedPush { key, entries } => {
                if live(data, &key, now).is_none() {
                    data.insert(key.clone(), Slot::persistent(Value::Ranked(Vec::new())));
                }
                let slot = data.get_mut(&key).ok_or_else(|| wrong_type(&key, "ranked list"))?;
                let Value::Ranked(list) = &mut slot.value else {
                    return Err(wrong_type(&key, "ranked list"));
                };
                for entry in entries {
                    list.retain(|existing| existing.id != entry.id);
                    // Stable among equal scores, with -0.0 and 0.0 equal
                    let position = list.partition_point(|existing| {
                        (existing.score + 0.0).total_cmp(&(entry.score + 0.0)).is_ge()
                    });
                    list.insert(position, entry);
                }
                Ok(Reply::Int(list.len() as i64))
            }
            Command::RankedRange { key } => match live(data, &key, now) {
                None => Ok(Reply::Array(Vec::new())),
                Some(Slot {
                    value: Value::Ranked(list),
                    ..
                }) => Ok(Reply::Array(
                    list.iter()
                        .flat_map(|e| [Reply::Bulk(e.id.clone()), Reply::Bulk(e.score.to_string())])
                        .collect(),
                )),
                Some(_) => Err(wrong_type(&key, "ranked list")),
            },
        }
    }
}

/// Look up a key, dropping it first if it has expired
fn live<'a>(data: &'a mut HashMap<String, Slot>, key: &str, now: Instant) -> Option<&'a mut Slot> {
    if data.get(key).is_some_and(|slot| slot.is_expired(now)) {
        data.remove(key);
    }
    data.get_mut(key)
}

/// Get or create the hash stored at `key`
fn hash_mut<'a>(
    data: &'a mut HashMap<String, Slot>,
    key: &str,
    now: Instant,
) -> StoreResult<&'a mut HashMap<String, String>> {
    if live(data, key, now).is_none() {
        data.insert(key.to_string(), Slot::persistent(Value::Hash(HashMap::new())));
    }
    match data.get_mut(key) {
        Some(Slot {
            value: Value::Hash(hash),
            ..
        }) => Ok(hash),
        Some(slot) => {
            debug!("Key '{}' holds a {}", key, slot.value.type_name());
            Err(wrong_type(key, "hash"))
        }
        None => Err(StoreError::Backend(format!("key '{key}' vanished"))),
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[async_trait]
impl RankedCacheStore for MemoryStore {
    async fn exec(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let mut replies = Vec::with_capacity(commands.len());
        // Prior state of every key the batch touches, for rollback
        let mut undo: HashMap<String, Option<Slot>> = HashMap::new();

        for command in commands {
            for key in command.keys() {
                if !undo.contains_key(key) {
                    undo.insert(key.to_string(), data.get(key).cloned());
                }
            }
            let name = command.name();
            match Self::apply(&mut data, command, now) {
                Ok(reply) => replies.push(reply),
                Err(e) => {
                    debug!("Rolling back batch after failed {}: {}", name, e);
                    for (key, slot) in undo {
                        match slot {
                            Some(slot) => {
                                data.insert(key, slot);
                            }
                            None => {
                                data.remove(&key);
                            }
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(replies)
    }
}
