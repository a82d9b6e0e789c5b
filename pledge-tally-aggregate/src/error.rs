use std::fmt::Debug;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CounterError {
    #[error("increment delta must be a positive number of cents")]
    /// Zero-delta increments are rejected rather than silently dropped;
    /// refunds and corrections are outside this subsystem.
    ZeroDelta,

    #[error("increment of counter {name:?} not applied after {attempts} attempts: {source}")]
    /// The retry budget for a durable shard write is exhausted. The delta
    /// was NOT applied; the caller decides whether to retry the enclosing
    /// business operation.
    IncrementFailed {
        name: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to read shard {shard} of counter {name:?}: {source}")]
    /// A shard could not be read while summing a counter. The whole read
    /// fails instead of treating the shard as zero, which would silently
    /// under-report the total.
    ReadFailed {
        name: String,
        shard: u16,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Counter(#[from] CounterError),

    #[error("failed to recompute aggregates for team {team:?}: {source}")]
    /// The cache missed and the fallback scan over the durable pledge
    /// records failed as well. Cache failures alone never surface here.
    Recompute {
        team: String,
        #[source]
        source: anyhow::Error,
    },
}
