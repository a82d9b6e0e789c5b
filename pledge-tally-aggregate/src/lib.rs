//! # Pledge Tally Aggregate
//! Running money totals that survive write spikes.
//!
//! Incrementing a single counter row on every accepted pledge serialises all
//! writers on that row, which is exactly what falls over during a fundraising
//! deadline. This crate splits the problem in two:
//!
//! - [`ShardedCounter`] keeps the headline total in a fixed set of
//!   independently written shard records ([`ShardStore`]). Writers pick a
//!   shard at random, reads sum every shard. No increment is ever lost, at
//!   the price of an O(shards) read.
//! - [`AggregateCoordinator`] layers an advisory cache ([`AggregateCache`])
//!   of per-team pledge counts and totals on top, falling back to a full
//!   scan of the durable records ([`RecordStore`]) whenever the cache is
//!   cold or holds something that does not parse.
//!
//! The global total is always answered from the durable shards; team
//! aggregates are answered cheaply from the cache with bounded staleness.
//! That asymmetry is deliberate: only the global counter sees every write in
//! the system.
//!
//! Durable storage backends implement [`ShardStore`] and [`RecordStore`];
//! see the `pledge-tally-sqlite` crate for a SQLite-backed implementation,
//! or `test_utils::MemStore` (behind the `test-utils` feature) for the
//! in-memory one used in tests.

#[macro_use]
extern crate tracing;

mod cache;
mod coordinator;
mod counter;
mod error;
mod storage;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{AggregateCache, MemoryCache};
pub use coordinator::{AggregateCoordinator, CoordinatorConfig, TeamAggregate};
pub use counter::{CounterConfig, ShardedCounter};
pub use error::{AggregateError, CounterError};
#[cfg(any(test, feature = "test-utils"))]
pub use storage::test_suite;
pub use storage::{PledgeRecord, RecordStore, ShardStore};
