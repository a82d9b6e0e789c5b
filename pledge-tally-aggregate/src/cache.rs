use std::collections::HashMap;
use std::convert::Infallible;
use std::fmt::{Debug, Display};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::RwLock;

/// A short-TTL, best-effort store for derived aggregates.
///
/// Every value held here must be independently reconstructible from the
/// durable records. Entries may vanish at any moment (restart, eviction,
/// expiry); a miss is a slow path, never an error, and callers must not let
/// a cache failure fail the enclosing request.
///
/// Values are strings on the wire. The backing store this models accepted
/// arbitrary payloads, so "present but not an integer" is a state readers
/// have to handle, and [AggregateCache::incr] has to parse before adding.
#[async_trait]
pub trait AggregateCache: Send + Sync + 'static {
    type Error: Display + Debug + Send + Sync;

    /// Returns the live (unexpired) value for `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error>;

    /// Stores `value` under `key` for at most `ttl`.
    async fn set(&self, key: &str, value: String, ttl: Duration)
        -> Result<(), Self::Error>;

    /// Best-effort add on an existing integer entry, returning the new
    /// value.
    ///
    /// Returns `None` when the key is cold, expired or does not parse as an
    /// integer; the entry is left untouched in those cases and the next full
    /// recompute repopulates it. The entry's expiry is not refreshed: a
    /// bumped aggregate still ages out on its original schedule.
    async fn incr(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error>;
}

/// In-process [AggregateCache] backed by a [parking_lot::RwLock] map.
///
/// Entries expire lazily: an expired entry reads as absent and is dropped
/// the next time it is touched. The trait's race window on `incr` does not
/// apply here since the write lock covers the read-modify-write.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, Entry>>,
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Instant,
}

impl MemoryCache {
    /// Drops every entry. Aggregates repopulate on the next cold read.
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[async_trait]
impl AggregateCache for MemoryCache {
    type Error = Infallible;

    async fn get(&self, key: &str) -> Result<Option<String>, Self::Error> {
        let now = Instant::now();
        {
            let entries = self.entries.read();
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => {
                    return Ok(Some(entry.value.clone()))
                },
                Some(_) => {},
                None => return Ok(None),
            }
        }

        // Expired; prune under the write lock.
        self.entries.write().remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), Self::Error> {
        let entry = Entry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    async fn incr(&self, key: &str, delta: u64) -> Result<Option<u64>, Self::Error> {
        let mut entries = self.entries.write();

        let entry = match entries.get_mut(key) {
            Some(entry) => entry,
            None => return Ok(None),
        };
        if entry.expires_at <= Instant::now() {
            entries.remove(key);
            return Ok(None);
        }

        let current = match entry.value.parse::<u64>() {
            Ok(current) => current,
            Err(_) => return Ok(None),
        };
        let next = current.saturating_add(delta);
        entry.value = next.to_string();
        Ok(Some(next))
    }
}
