//! # Pledge Tally
//! Running money totals for a donation-pledge backend that survive write
//! spikes: a durable sharded counter for the headline number, plus an
//! advisory cache of per-team aggregates that self-heals from the records.
//!
//! This is a convenience package re-exporting the sub-projects:
//!
//! ### Features
//! - `pledge-tally-aggregate` - The sharded counter, aggregation cache and
//!   coordinator, over pluggable storage traits.
//! - `pledge-tally-sqlite` - A durable storage implementation backed by
//!   SQLite.
//!
//! ### Example
//! ```rust
//! use std::sync::Arc;
//!
//! use pledge_tally::aggregate::{AggregateCoordinator, CoordinatorConfig, MemoryCache};
//! use pledge_tally::sqlite::SqliteStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> anyhow::Result<()> {
//! let store = Arc::new(SqliteStore::open_in_memory().await?);
//! let cache = Arc::new(MemoryCache::default());
//! let coordinator = AggregateCoordinator::new(
//!     store.clone(),
//!     store.clone(),
//!     cache,
//!     CoordinatorConfig::default(),
//! );
//!
//! // The handler persists the record, then books the pledge.
//! store.insert_pledge(Some("team-karma"), Some("Ada"), 500).await?;
//! coordinator.record_accepted(500, Some("team-karma")).await?;
//!
//! assert_eq!(coordinator.total_query().await?, 500);
//!
//! let team = coordinator.team_query("team-karma").await?;
//! assert_eq!((team.pledges, team.total_cents), (1, 500));
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "pledge-tally-aggregate")]
pub use pledge_tally_aggregate as aggregate;
#[cfg(feature = "pledge-tally-sqlite")]
pub use pledge_tally_sqlite as sqlite;
