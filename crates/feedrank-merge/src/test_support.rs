//! Store wrappers shared by the unit tests of this crate.

use async_trait::async_trait;
use feedrank_store::{Command, MemoryStore, RankedCacheStore, Reply, StoreError, StoreResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Counts the commands that reach an inner [`MemoryStore`]
#[derive(Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    commands: AtomicUsize,
    set_nx: AtomicUsize,
    fail_pool_writes: AtomicBool,
}

impl CountingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn commands(&self) -> usize {
        self.commands.load(Ordering::SeqCst)
    }

    pub fn set_nx_calls(&self) -> usize {
        self.set_nx.load(Ordering::SeqCst)
    }

    /// Make every batch that pushes to a ranked list fail as unavailable
    pub fn fail_pool_writes(&self, fail: bool) {
        self.fail_pool_writes.store(fail, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.commands.store(0, Ordering::SeqCst);
        self.set_nx.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl RankedCacheStore for CountingStore {
    async fn exec(&self, commands: Vec<Command>) -> StoreResult<Vec<Reply>> {
        self.commands.fetch_add(commands.len(), Ordering::SeqCst);
        let set_nx = commands
            .iter()
            .filter(|c| matches!(c, Command::SetNx { .. }))
            .count();
        self.set_nx.fetch_add(set_nx, Ordering::SeqCst);
        if self.fail_pool_writes.load(Ordering::SeqCst)
            && commands.iter().any(|c| matches!(c, Command::RankedPush { .. }))
        {
            return Err(StoreError::Unavailable("connection reset".into()));
        }
        self.inner.exec(commands).await
    }
}
