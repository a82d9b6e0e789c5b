use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::CounterError;
use crate::storage::ShardStore;

/// Tuning knobs for a [ShardedCounter].
#[derive(Debug, Clone)]
pub struct CounterConfig {
    /// Number of shard records per counter name.
    ///
    /// Fixed for the lifetime of a name: shrinking it once data exists would
    /// leave the higher-numbered shards out of every future sum. Tens are
    /// fine, thousands are not; reads touch every shard.
    pub shards: u16,
    /// Attempts allowed beyond the first for a failed shard write.
    pub max_retries: u32,
    /// Backoff before the first retry, doubled on each subsequent one.
    pub base_backoff: Duration,
    /// Upper bound on a single storage operation.
    pub op_timeout: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            shards: 5,
            max_retries: 3,
            base_backoff: Duration::from_millis(50),
            op_timeout: Duration::from_secs(2),
        }
    }
}

/// A durable counter split across a fixed set of independently written shard
/// records.
///
/// Writers pick a shard uniformly at random, so concurrent increments land
/// on different records instead of serialising on one hot row. The pick is
/// deliberately random rather than hashed from some request attribute: a
/// correlated attribute would funnel a traffic spike back onto one shard.
///
/// Reads sum every shard. The result is a point-in-time sum, not a snapshot:
/// increments racing the read may or may not be included, but since shard
/// values only ever grow, no increment is ever lost.
pub struct ShardedCounter<S: ShardStore> {
    store: Arc<S>,
    config: CounterConfig,
}

impl<S: ShardStore> Clone for ShardedCounter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S: ShardStore> ShardedCounter<S> {
    pub fn new(store: Arc<S>, config: CounterConfig) -> Self {
        assert!(config.shards > 0, "a counter needs at least one shard");
        Self { store, config }
    }

    pub fn config(&self) -> &CounterConfig {
        &self.config
    }

    /// Durably adds `delta` cents to the named counter.
    ///
    /// Storage failures are retried up to the configured budget with
    /// exponential backoff, drawing a fresh shard on every attempt so one
    /// contended record cannot burn the whole budget. On `Err` the increment
    /// was not applied and the caller decides whether to retry the enclosing
    /// business operation.
    pub async fn increment(&self, name: &str, delta: u64) -> Result<u64, CounterError> {
        if delta == 0 {
            return Err(CounterError::ZeroDelta);
        }

        let mut backoff = self.config.base_backoff;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let shard = rand::thread_rng().gen_range(0..self.config.shards);

            match self.try_increment(name, shard, delta).await {
                Ok(value) => {
                    debug!(
                        counter = name,
                        shard = shard,
                        delta = delta,
                        "shard incremented"
                    );
                    return Ok(value);
                },
                Err(e) if attempts <= self.config.max_retries => {
                    warn!(
                        counter = name,
                        shard = shard,
                        attempt = attempts,
                        error = %e,
                        "shard increment failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                },
                Err(e) => {
                    return Err(CounterError::IncrementFailed {
                        name: name.to_string(),
                        attempts,
                        source: e,
                    })
                },
            }
        }
    }

    async fn try_increment(
        &self,
        name: &str,
        shard: u16,
        delta: u64,
    ) -> Result<u64, anyhow::Error> {
        let fut = self.store.increment_shard(name, shard, delta);
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(anyhow::anyhow!("{e}")),
            Err(_) => Err(anyhow::anyhow!(
                "shard increment timed out after {:?}",
                self.config.op_timeout
            )),
        }
    }

    /// Sums every shard of the named counter.
    ///
    /// Shards are read concurrently; a name that was never incremented sums
    /// to `0`. Any unreadable shard fails the whole call: treating it as
    /// zero would under-report a user-facing money total, which is worse
    /// than failing loudly. Callers may retry.
    pub async fn total(&self, name: &str) -> Result<u64, CounterError> {
        let reads = (0..self.config.shards).map(|shard| {
            let store = self.store.clone();
            let op_timeout = self.config.op_timeout;
            async move {
                let fut = store.shard_value(name, shard);
                match tokio::time::timeout(op_timeout, fut).await {
                    Ok(Ok(value)) => Ok(value),
                    Ok(Err(e)) => Err((shard, anyhow::anyhow!("{e}"))),
                    Err(_) => Err((
                        shard,
                        anyhow::anyhow!("shard read timed out after {op_timeout:?}"),
                    )),
                }
            }
        });

        let values = futures::future::try_join_all(reads).await.map_err(
            |(shard, source)| CounterError::ReadFailed {
                name: name.to_string(),
                shard,
                source,
            },
        )?;

        Ok(values.into_iter().sum())
    }
}
