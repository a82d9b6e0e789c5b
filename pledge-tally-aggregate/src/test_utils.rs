//! In-memory stores for tests and examples.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::storage::{PledgeRecord, RecordStore, ShardStore};

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MemStoreError(#[from] pub anyhow::Error);

/// An in-memory shard and pledge-record store.
///
/// This is not suitable for any sort of real world usage outside of testing:
/// nothing here is durable.
#[derive(Debug, Default)]
pub struct MemStore {
    shards: RwLock<HashMap<(String, u16), u64>>,
    pledges: RwLock<Vec<StoredPledge>>,
}

#[derive(Debug, Clone)]
struct StoredPledge {
    team: String,
    record: PledgeRecord,
}

impl MemStore {
    /// Adds one pledge record for the recompute path to find.
    pub fn insert_pledge(&self, team: &str, pledger: Option<&str>, amount_cents: u64) {
        self.pledges.write().push(StoredPledge {
            team: team.to_string(),
            record: PledgeRecord {
                amount_cents,
                pledger: pledger.map(str::to_string),
            },
        });
    }
}

#[async_trait]
impl ShardStore for MemStore {
    type Error = MemStoreError;

    async fn shard_value(&self, counter: &str, shard: u16) -> Result<u64, Self::Error> {
        let shards = self.shards.read();
        Ok(shards
            .get(&(counter.to_string(), shard))
            .copied()
            .unwrap_or(0))
    }

    async fn increment_shard(
        &self,
        counter: &str,
        shard: u16,
        delta: u64,
    ) -> Result<u64, Self::Error> {
        let mut shards = self.shards.write();
        let value = shards.entry((counter.to_string(), shard)).or_insert(0);
        *value += delta;
        Ok(*value)
    }
}

#[async_trait]
impl RecordStore for MemStore {
    type Error = MemStoreError;

    async fn scan_team(&self, team: &str) -> Result<Vec<PledgeRecord>, Self::Error> {
        Ok(self
            .pledges
            .read()
            .iter()
            .filter(|pledge| pledge.team == team)
            .map(|pledge| pledge.record.clone())
            .collect())
    }
}

/// Wraps a [ShardStore] and fails a configured number of operations before
/// letting them through, for exercising retry budgets and read-failure
/// policy.
#[derive(Debug)]
pub struct FlakyShardStore<S> {
    inner: S,
    write_failures_left: AtomicU32,
    read_failures_left: AtomicU32,
}

impl<S> FlakyShardStore<S> {
    /// Fails the first `write_failures` increments with an injected error.
    pub fn new(inner: S, write_failures: u32) -> Self {
        Self {
            inner,
            write_failures_left: AtomicU32::new(write_failures),
            read_failures_left: AtomicU32::new(0),
        }
    }

    /// Additionally fails the first `read_failures` shard reads.
    pub fn with_failing_reads(mut self, read_failures: u32) -> Self {
        self.read_failures_left = AtomicU32::new(read_failures);
        self
    }

    fn take_failure(budget: &AtomicU32) -> bool {
        budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl<S: ShardStore> ShardStore for FlakyShardStore<S> {
    type Error = MemStoreError;

    async fn shard_value(&self, counter: &str, shard: u16) -> Result<u64, Self::Error> {
        if Self::take_failure(&self.read_failures_left) {
            return Err(MemStoreError(anyhow::anyhow!(
                "injected shard read failure"
            )));
        }
        self.inner
            .shard_value(counter, shard)
            .await
            .map_err(|e| MemStoreError(anyhow::anyhow!("{e}")))
    }

    async fn increment_shard(
        &self,
        counter: &str,
        shard: u16,
        delta: u64,
    ) -> Result<u64, Self::Error> {
        if Self::take_failure(&self.write_failures_left) {
            return Err(MemStoreError(anyhow::anyhow!(
                "injected shard write failure"
            )));
        }
        self.inner
            .increment_shard(counter, shard, delta)
            .await
            .map_err(|e| MemStoreError(anyhow::anyhow!("{e}")))
    }
}
