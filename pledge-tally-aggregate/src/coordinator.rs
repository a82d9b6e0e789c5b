use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::AggregateCache;
use crate::counter::{CounterConfig, ShardedCounter};
use crate::error::{AggregateError, CounterError};
use crate::storage::{RecordStore, ShardStore};

/// Name anonymous pledges are folded under in the pledger listing.
const ANONYMOUS: &str = "Anonymous";

/// Policy knobs for an [AggregateCoordinator].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Name of the durable global counter.
    pub counter_name: String,
    /// How long cached team aggregates stay valid. Bounds the staleness of
    /// a team read at this TTL plus the time to the next read.
    pub cache_ttl: Duration,
    /// Upper bound on a single cache operation. The cache is advisory; a
    /// wedged cache must not stall a request that the durable store already
    /// served.
    pub cache_op_timeout: Duration,
    /// Cents folded into every [AggregateCoordinator::total_query] answer on
    /// top of the sharded counter: totals collected before this system
    /// existed or held in off-system accounts.
    pub baseline_cents: u64,
    /// Tuning passed through to the underlying [ShardedCounter].
    pub counter: CounterConfig,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            counter_name: "pledge-total".to_string(),
            cache_ttl: Duration::from_secs(120),
            cache_op_timeout: Duration::from_millis(250),
            baseline_cents: 0,
            counter: CounterConfig::default(),
        }
    }
}

/// Point-in-time aggregate for one team.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamAggregate {
    pub pledges: u64,
    pub total_cents: u64,
}

/// The policy layer request handlers call into.
///
/// Writes always land on the durable sharded counter first and only then
/// touch the advisory cache; reads of the global total always come from the
/// durable shards while team reads are served from the cache when it holds
/// something sane, recomputed from the records otherwise. Cache failures are
/// logged and swallowed everywhere: the cache buys latency, never
/// correctness.
pub struct AggregateCoordinator<S, R, C>
where
    S: ShardStore,
    R: RecordStore,
    C: AggregateCache,
{
    counter: ShardedCounter<S>,
    records: Arc<R>,
    cache: Arc<C>,
    config: CoordinatorConfig,
}

fn team_count_key(team: &str) -> String {
    format!("team-count:{team}")
}

fn team_total_key(team: &str) -> String {
    format!("team-total:{team}")
}

fn scan_failure(team: &str, e: impl Display) -> AggregateError {
    AggregateError::Recompute {
        team: team.to_string(),
        source: anyhow::anyhow!("{e}"),
    }
}

impl<S, R, C> AggregateCoordinator<S, R, C>
where
    S: ShardStore,
    R: RecordStore,
    C: AggregateCache,
{
    pub fn new(
        shards: Arc<S>,
        records: Arc<R>,
        cache: Arc<C>,
        config: CoordinatorConfig,
    ) -> Self {
        let counter = ShardedCounter::new(shards, config.counter.clone());
        Self {
            counter,
            records,
            cache,
            config,
        }
    }

    /// Books one accepted pledge.
    ///
    /// The durable global counter is always incremented and a failure there
    /// surfaces: the amount must not silently drop out of the headline
    /// total. The team's cached aggregates are then bumped best-effort; a
    /// cold or failing cache key simply stays cold and self-heals on the
    /// next recomputing read.
    pub async fn record_accepted(
        &self,
        amount_cents: u64,
        team: Option<&str>,
    ) -> Result<(), CounterError> {
        self.counter
            .increment(&self.config.counter_name, amount_cents)
            .await?;

        if let Some(team) = team.filter(|team| !team.is_empty()) {
            self.bump_team_cache(team, amount_cents).await;
        }

        Ok(())
    }

    /// The headline number: baseline cents plus the durable global counter.
    ///
    /// Always recomputed from the shard records, never served from cache;
    /// exactness matters more here than the O(shards) read.
    pub async fn total_query(&self) -> Result<u64, CounterError> {
        let counted = self.counter.total(&self.config.counter_name).await?;
        Ok(self.config.baseline_cents + counted)
    }

    /// Pledge count and total for one team.
    ///
    /// Served from the cache when both entries are present and parse as
    /// non-negative integers, recomputed from the durable records otherwise
    /// (which also rewarms the cache). A present, parseable `0` is a valid
    /// fast-path answer.
    pub async fn team_query(&self, team: &str) -> Result<TeamAggregate, AggregateError> {
        if let Some(aggregate) = self.cached_team_aggregate(team).await {
            return Ok(aggregate);
        }

        let aggregate = self.recompute_team(team).await?;
        self.warm_team_cache(team, aggregate).await;
        Ok(aggregate)
    }

    /// Pledger display names for one team, largest combined amount first,
    /// ties broken by name so the listing is stable across reads.
    ///
    /// Anonymous pledges (and pledges with no usable name) are folded into a
    /// single "Anonymous" row. Always recomputed from the records; this is
    /// an infrequent page, not worth a cache entry.
    pub async fn team_pledgers(&self, team: &str) -> Result<Vec<String>, AggregateError> {
        let records = self
            .records
            .scan_team(team)
            .await
            .map_err(|e| scan_failure(team, e))?;

        let mut amounts: HashMap<String, u64> = HashMap::new();
        for record in records {
            let name = match record.pledger.filter(|name| !name.is_empty()) {
                Some(name) => name,
                None => ANONYMOUS.to_string(),
            };
            *amounts.entry(name).or_default() += record.amount_cents;
        }

        let mut by_amount: Vec<(u64, String)> = amounts
            .into_iter()
            .map(|(name, amount)| (amount, name))
            .collect();
        by_amount.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        Ok(by_amount.into_iter().map(|(_, name)| name).collect())
    }

    async fn bump_team_cache(&self, team: &str, amount_cents: u64) {
        self.cache_incr(&team_count_key(team), 1).await;
        self.cache_incr(&team_total_key(team), amount_cents).await;
    }

    /// Best-effort cache add, bounded by the cache op timeout. Failures are
    /// logged and swallowed; the entry self-heals on the next recompute.
    async fn cache_incr(&self, key: &str, delta: u64) {
        let fut = self.cache.incr(key, delta);
        match tokio::time::timeout(self.config.cache_op_timeout, fut).await {
            Ok(Ok(Some(_))) => {},
            Ok(Ok(None)) => debug!(key = key, "aggregate not cached, skipping bump"),
            Ok(Err(e)) => {
                warn!(key = key, error = %e, "failed to bump cached aggregate")
            },
            Err(_) => warn!(key = key, "cache increment timed out"),
        }
    }

    async fn cache_set(&self, key: &str, value: String) {
        let fut = self.cache.set(key, value, self.config.cache_ttl);
        match tokio::time::timeout(self.config.cache_op_timeout, fut).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => warn!(key = key, error = %e, "failed to cache aggregate"),
            Err(_) => warn!(key = key, "cache write timed out"),
        }
    }

    async fn cached_team_aggregate(&self, team: &str) -> Option<TeamAggregate> {
        let pledges = self.cached_integer(&team_count_key(team)).await?;
        let total_cents = self.cached_integer(&team_total_key(team)).await?;
        Some(TeamAggregate {
            pledges,
            total_cents,
        })
    }

    async fn cached_integer(&self, key: &str) -> Option<u64> {
        let fut = self.cache.get(key);
        let raw = match tokio::time::timeout(self.config.cache_op_timeout, fut).await {
            Ok(Ok(found)) => found?,
            Ok(Err(e)) => {
                warn!(key = key, error = %e, "cache read failed, falling back to recompute");
                return None;
            },
            Err(_) => {
                warn!(key = key, "cache read timed out, falling back to recompute");
                return None;
            },
        };

        match raw.parse::<u64>() {
            Ok(value) => Some(value),
            Err(_) => {
                // Recomputing is strictly safer than coercing garbage to a
                // wrong low number.
                warn!(key = key, value = %raw, "cached aggregate is not an integer, falling back to recompute");
                None
            },
        }
    }

    async fn recompute_team(&self, team: &str) -> Result<TeamAggregate, AggregateError> {
        let records = self
            .records
            .scan_team(team)
            .await
            .map_err(|e| scan_failure(team, e))?;

        let mut aggregate = TeamAggregate {
            pledges: 0,
            total_cents: 0,
        };
        for record in &records {
            aggregate.pledges += 1;
            aggregate.total_cents += record.amount_cents;
        }

        debug!(
            team = team,
            pledges = aggregate.pledges,
            total_cents = aggregate.total_cents,
            "recomputed team aggregates from records"
        );
        Ok(aggregate)
    }

    async fn warm_team_cache(&self, team: &str, aggregate: TeamAggregate) {
        self.cache_set(&team_count_key(team), aggregate.pledges.to_string())
            .await;
        self.cache_set(&team_total_key(team), aggregate.total_cents.to_string())
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::test_utils::{FlakyShardStore, MemStore};

    type TestCoordinator =
        AggregateCoordinator<MemStore, MemStore, MemoryCache>;

    fn coordinator() -> (Arc<MemStore>, Arc<MemoryCache>, TestCoordinator) {
        let store = Arc::new(MemStore::default());
        let cache = Arc::new(MemoryCache::default());
        let config = CoordinatorConfig {
            counter: CounterConfig {
                base_backoff: Duration::from_millis(1),
                ..CounterConfig::default()
            },
            ..CoordinatorConfig::default()
        };
        let coordinator =
            AggregateCoordinator::new(store.clone(), store.clone(), cache.clone(), config);
        (store, cache, coordinator)
    }

    #[tokio::test]
    async fn test_cold_cache_recomputes_and_rewarms() {
        let (store, cache, coordinator) = coordinator();
        store.insert_pledge("alpha", Some("Ada"), 100);
        store.insert_pledge("alpha", Some("Grace"), 250);
        store.insert_pledge("alpha", None, 150);

        let aggregate = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(
            aggregate,
            TeamAggregate {
                pledges: 3,
                total_cents: 500
            }
        );

        // The recompute should have warmed both keys.
        assert_eq!(
            cache.get("team-count:alpha").await.unwrap().as_deref(),
            Some("3")
        );
        assert_eq!(
            cache.get("team-total:alpha").await.unwrap().as_deref(),
            Some("500")
        );

        // Clearing the cache must not change the answer.
        cache.clear();
        let again = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(again, aggregate);
    }

    #[tokio::test]
    async fn test_warm_cache_is_served_without_a_scan() {
        let (store, cache, coordinator) = coordinator();
        store.insert_pledge("alpha", Some("Ada"), 100);

        // A warm cache that disagrees with the records proves the fast path
        // was taken.
        cache
            .set("team-count:alpha", "7".into(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("team-total:alpha", "900".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let aggregate = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(
            aggregate,
            TeamAggregate {
                pledges: 7,
                total_cents: 900
            }
        );
    }

    #[tokio::test]
    async fn test_cached_zero_is_a_valid_answer() {
        let (store, cache, coordinator) = coordinator();
        store.insert_pledge("alpha", Some("Ada"), 100);

        cache
            .set("team-count:alpha", "0".into(), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("team-total:alpha", "0".into(), Duration::from_secs(60))
            .await
            .unwrap();

        // A parseable zero is served as-is, not treated as a miss.
        let aggregate = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(
            aggregate,
            TeamAggregate {
                pledges: 0,
                total_cents: 0
            }
        );
    }

    #[tokio::test]
    async fn test_garbage_cache_entry_triggers_recompute() {
        let (store, cache, coordinator) = coordinator();
        store.insert_pledge("alpha", Some("Ada"), 100);
        store.insert_pledge("alpha", Some("Grace"), 250);

        cache
            .set(
                "team-count:alpha",
                "two".into(),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let aggregate = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(
            aggregate,
            TeamAggregate {
                pledges: 2,
                total_cents: 350
            }
        );

        // The garbage entry is overwritten by the recompute.
        assert_eq!(
            cache.get("team-count:alpha").await.unwrap().as_deref(),
            Some("2")
        );
    }

    #[tokio::test]
    async fn test_write_path_bumps_a_warm_cache() {
        let (store, _cache, coordinator) = coordinator();
        store.insert_pledge("alpha", Some("Ada"), 100);

        // Warm the cache, then book a pledge without inserting its record;
        // the fast path reflecting the bump proves incr was applied.
        coordinator.team_query("alpha").await.expect("warm cache");
        coordinator
            .record_accepted(400, Some("alpha"))
            .await
            .expect("record accepted");

        let aggregate = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(
            aggregate,
            TeamAggregate {
                pledges: 2,
                total_cents: 500
            }
        );
    }

    #[tokio::test]
    async fn test_write_path_leaves_a_cold_cache_cold() {
        let (store, cache, coordinator) = coordinator();

        coordinator
            .record_accepted(400, Some("alpha"))
            .await
            .expect("record accepted");

        assert_eq!(cache.get("team-count:alpha").await.unwrap(), None);
        assert_eq!(cache.get("team-total:alpha").await.unwrap(), None);

        // The next read recomputes from the records alone.
        store.insert_pledge("alpha", Some("Ada"), 400);
        let aggregate = coordinator.team_query("alpha").await.expect("team query");
        assert_eq!(
            aggregate,
            TeamAggregate {
                pledges: 1,
                total_cents: 400
            }
        );
    }

    #[tokio::test]
    async fn test_total_query_sums_counter_and_baseline() {
        let store = Arc::new(MemStore::default());
        let cache = Arc::new(MemoryCache::default());
        let config = CoordinatorConfig {
            baseline_cents: 1_000_000,
            ..CoordinatorConfig::default()
        };
        let coordinator =
            AggregateCoordinator::new(store.clone(), store, cache, config);

        coordinator
            .record_accepted(500, None)
            .await
            .expect("record accepted");
        coordinator
            .record_accepted(300, Some("alpha"))
            .await
            .expect("record accepted");

        assert_eq!(coordinator.total_query().await.expect("total"), 1_000_800);
    }

    #[tokio::test]
    async fn test_empty_team_touches_no_team_aggregates() {
        let (_store, cache, coordinator) = coordinator();

        cache
            .set("team-count:", "1".into(), Duration::from_secs(60))
            .await
            .unwrap();
        coordinator
            .record_accepted(500, Some(""))
            .await
            .expect("record accepted");

        // An empty team means "no team"; the oddly-keyed entry is untouched.
        assert_eq!(
            cache.get("team-count:").await.unwrap().as_deref(),
            Some("1")
        );
        assert_eq!(coordinator.total_query().await.expect("total"), 500);
    }

    #[tokio::test]
    async fn test_durable_increment_failure_surfaces() {
        let shards = Arc::new(FlakyShardStore::new(MemStore::default(), u32::MAX));
        let records = Arc::new(MemStore::default());
        let cache = Arc::new(MemoryCache::default());
        let config = CoordinatorConfig {
            counter: CounterConfig {
                base_backoff: Duration::from_millis(1),
                ..CounterConfig::default()
            },
            ..CoordinatorConfig::default()
        };
        let coordinator = AggregateCoordinator::new(shards, records, cache, config);

        let res = coordinator.record_accepted(500, Some("alpha")).await;
        assert!(matches!(res, Err(CounterError::IncrementFailed { .. })));
    }

    #[tokio::test]
    async fn test_team_pledgers_orders_and_folds_anonymous() {
        let (store, _cache, coordinator) = coordinator();
        store.insert_pledge("alpha", Some("Ada"), 100);
        store.insert_pledge("alpha", Some("Ada"), 400);
        store.insert_pledge("alpha", Some("Grace"), 300);
        store.insert_pledge("alpha", None, 150);
        store.insert_pledge("alpha", Some(""), 150);
        store.insert_pledge("alpha", Some("Edsger"), 300);

        let pledgers = coordinator
            .team_pledgers("alpha")
            .await
            .expect("team pledgers");
        assert_eq!(pledgers, vec!["Ada", "Anonymous", "Edsger", "Grace"]);
    }
}
