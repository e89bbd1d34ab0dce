//! Keyed entity store with per-entry fetch time and TTL staleness.
//!
//! Entries are never expired proactively. Staleness is computed on read
//! as `now - fetched_at > ttl`; the caller decides whether to refetch.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::clock::Clock;

/// Default staleness budget: five minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// A cacheable entity with a stable key.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Identifier type.
    type Key: Copy + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync;

    /// Returns this entity's key.
    fn key(&self) -> Self::Key;
}

/// One cached entity and when it was last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<K, T> {
    /// Entity key.
    pub key: K,
    /// Cached entity.
    pub payload: T,
    /// Time of the fetch or mutation response that produced `payload`.
    pub fetched_at: DateTime<Utc>,
}

/// Store of one entity type.
pub struct EntityStore<T: Entity> {
    entries: HashMap<T::Key, CacheEntry<T::Key, T>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<T: Entity + fmt::Debug> fmt::Debug for EntityStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityStore")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .field("clock", &self.clock)
            .finish()
    }
}

impl<T: Entity> EntityStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: HashMap::new(),
            ttl,
            clock,
        }
    }

    /// Staleness budget.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts or overwrites `entity` and stamps it with the current time.
    pub fn set_entity(&mut self, entity: T) {
        let key = entity.key();
        self.entries.insert(
            key,
            CacheEntry {
                key,
                payload: entity,
                fetched_at: self.clock.now(),
            },
        );
    }

    /// Current payload for `key`.
    #[must_use]
    pub fn get_by_id(&self, key: T::Key) -> Option<&T> {
        self.entries.get(&key).map(|entry| &entry.payload)
    }

    /// Full entry for `key`, including its fetch time.
    #[must_use]
    pub fn entry(&self, key: T::Key) -> Option<&CacheEntry<T::Key, T>> {
        self.entries.get(&key)
    }

    /// Time since `key` was last written.
    #[must_use]
    pub fn age(&self, key: T::Key) -> Option<Duration> {
        self.entries.get(&key).map(|entry| self.age_of(entry))
    }

    /// Returns `true` if `key` is older than the TTL or was never fetched.
    #[must_use]
    pub fn is_stale(&self, key: T::Key) -> bool {
        self.entries
            .get(&key)
            .is_none_or(|entry| self.expired(entry))
    }

    /// Keys whose entries are older than the TTL.
    #[must_use]
    pub fn stale_ids(&self) -> Vec<T::Key> {
        self.entries
            .values()
            .filter(|entry| self.expired(entry))
            .map(|entry| entry.key)
            .collect()
    }

    /// Applies `change` to the cached entity and refreshes its fetch time.
    /// Returns `false` if `key` is not cached.
    pub fn update<F>(&mut self, key: T::Key, change: F) -> bool
    where
        F: FnOnce(&mut T),
    {
        let now = self.clock.now();
        match self.entries.get_mut(&key) {
            Some(entry) => {
                change(&mut entry.payload);
                entry.fetched_at = now;
                true
            }
            None => false,
        }
    }

    /// Removes `key`, returning the evicted entity.
    pub fn invalidate(&mut self, key: T::Key) -> Option<T> {
        self.entries.remove(&key).map(|entry| entry.payload)
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of cached entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn age_of(&self, entry: &CacheEntry<T::Key, T>) -> Duration {
        (self.clock.now() - entry.fetched_at)
            .to_std()
            .unwrap_or_default()
    }

    fn expired(&self, entry: &CacheEntry<T::Key, T>) -> bool {
        let ttl = TimeDelta::from_std(self.ttl).unwrap_or(TimeDelta::MAX);
        self.clock.now() - entry.fetched_at > ttl
    }
}
