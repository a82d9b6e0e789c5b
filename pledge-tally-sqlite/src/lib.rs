//! # Pledge Tally SQLite
//! A SQLite-backed implementation of the `pledge-tally-aggregate` storage
//! traits: counter shard records and pledge records in one database file.
//!
//! All statements are funnelled through a single connection on a dedicated
//! worker thread, so the shard upsert is atomic per `(counter, shard)` row
//! without any further locking.

#[macro_use]
extern crate tracing;

mod db;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use pledge_tally_aggregate::{PledgeRecord, RecordStore, ShardStore};

pub use crate::db::{DbHandle, FromRow};

const CREATE_SHARDS_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS counter_shards (
        counter TEXT NOT NULL,
        shard   INTEGER NOT NULL,
        value   INTEGER NOT NULL DEFAULT 0,
        PRIMARY KEY (counter, shard)
    );
";

const CREATE_PLEDGES_TABLE: &str = "
    CREATE TABLE IF NOT EXISTS pledges (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        team         TEXT NOT NULL DEFAULT '',
        pledger      TEXT,
        amount_cents INTEGER NOT NULL,
        created_at   INTEGER NOT NULL
    );
";

const CREATE_PLEDGES_TEAM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS pledges_team_idx ON pledges (team);";

#[derive(Debug, thiserror::Error)]
pub enum SqliteStoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("shard upsert returned no row")]
    /// The `RETURNING` clause of the shard upsert produced nothing, which a
    /// healthy database cannot do.
    MissingShardRow,
}

/// A [ShardStore] and [RecordStore] implementation based on a SQLite
/// database.
pub struct SqliteStore {
    inner: DbHandle,
}

impl SqliteStore {
    /// Opens the database at the given path, creating it and the schema if
    /// needed.
    ///
    /// ```rust
    /// use pledge_tally_sqlite::SqliteStore;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let path = std::env::temp_dir().join("pledges.db");
    /// let store = SqliteStore::open(&path).await.expect("open database");
    /// # drop(store);
    /// # }
    /// ```
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, SqliteStoreError> {
        let inner = DbHandle::open(path.as_ref()).await?;
        let store = Self { inner };
        store.create_tables().await?;
        info!(path = %path.as_ref().display(), "opened pledge store");
        Ok(store)
    }

    /// Opens a new in-memory database, mostly useful for tests.
    pub async fn open_in_memory() -> Result<Self, SqliteStoreError> {
        let inner = DbHandle::open_in_memory().await?;
        let store = Self { inner };
        store.create_tables().await?;
        Ok(store)
    }

    async fn create_tables(&self) -> Result<(), SqliteStoreError> {
        self.inner.execute(CREATE_SHARDS_TABLE, ()).await?;
        self.inner.execute(CREATE_PLEDGES_TABLE, ()).await?;
        self.inner.execute(CREATE_PLEDGES_TEAM_INDEX, ()).await?;
        Ok(())
    }

    /// Persists one pledge record.
    ///
    /// The aggregate layer only ever scans these; the enclosing application
    /// calls this when it accepts a pledge. `None` (or an empty string) for
    /// `team` means no team, `None` for `pledger` means anonymous.
    pub async fn insert_pledge(
        &self,
        team: Option<&str>,
        pledger: Option<&str>,
        amount_cents: u64,
    ) -> Result<(), SqliteStoreError> {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        self.inner
            .execute(
                "INSERT INTO pledges (team, pledger, amount_cents, created_at)
                 VALUES (?, ?, ?, ?);",
                (
                    team.unwrap_or("").to_string(),
                    pledger.map(str::to_string),
                    amount_cents as i64,
                    created_at,
                ),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ShardStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn shard_value(&self, counter: &str, shard: u16) -> Result<u64, Self::Error> {
        let row = self
            .inner
            .fetch_one::<_, (i64,)>(
                "SELECT value FROM counter_shards WHERE counter = ? AND shard = ?;",
                (counter.to_string(), shard as i64),
            )
            .await?;
        Ok(row.map(|(value,)| value as u64).unwrap_or(0))
    }

    async fn increment_shard(
        &self,
        counter: &str,
        shard: u16,
        delta: u64,
    ) -> Result<u64, Self::Error> {
        // One statement on the single connection thread: the add-and-return
        // cannot interleave with any other writer.
        let row = self
            .inner
            .fetch_one::<_, (i64,)>(
                "INSERT INTO counter_shards (counter, shard, value) VALUES (?, ?, ?)
                 ON CONFLICT (counter, shard) DO UPDATE SET value = value + excluded.value
                 RETURNING value;",
                (counter.to_string(), shard as i64, delta as i64),
            )
            .await?;
        row.map(|(value,)| value as u64)
            .ok_or(SqliteStoreError::MissingShardRow)
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    type Error = SqliteStoreError;

    async fn scan_team(&self, team: &str) -> Result<Vec<PledgeRecord>, Self::Error> {
        let rows = self
            .inner
            .fetch_all::<_, (i64, Option<String>)>(
                "SELECT amount_cents, pledger FROM pledges WHERE team = ?;",
                (team.to_string(),),
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|(amount_cents, pledger)| PledgeRecord {
                amount_cents: amount_cents as u64,
                pledger,
            })
            .collect())
    }
}
