//! In-process counter store.
//!
//! Mirrors the subset of Redis semantics the gate relies on: `INCR` creates
//! missing keys at 1, `EXPIRE` only applies to existing keys, and an expired
//! key behaves as absent. Expiry is measured with `tokio::time::Instant`, so
//! tests running with paused time can step over a window boundary.
//!
//! Expired entries are swept during `incr`, at most once per purge interval,
//! so memory stays proportional to the keys seen within recent windows.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::CounterStore;
use crate::error::StoreError;

#[derive(Debug, Clone, Copy)]
struct Entry {
    count: u64,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Default time between sweeps of expired entries.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// A counter store held in process memory.
///
/// Only suitable when a single instance serves traffic; counters are not
/// shared with other processes.
#[derive(Debug)]
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    purge_interval: Duration,
    /// When the next sweep is due
    next_purge: Mutex<Instant>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            purge_interval: DEFAULT_PURGE_INTERVAL,
            next_purge: Mutex::new(Instant::now() + DEFAULT_PURGE_INTERVAL),
        }
    }

    /// Override how often expired entries are swept.
    pub fn with_purge_interval(self, interval: Duration) -> Self {
        Self {
            purge_interval: interval,
            next_purge: Mutex::new(Instant::now() + interval),
            ..self
        }
    }

    /// Current value of `key`, if it exists and has not expired.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.count)
    }

    /// Remaining time-to-live of `key`, if it exists and has one.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        debug!(
            purged = before.saturating_sub(self.entries.len()),
            remaining = self.entries.len(),
            "Purged expired in-memory counters"
        );
    }

    /// Sweep if the interval has elapsed. Callers racing for the sweep skip it.
    fn maybe_purge(&self, now: Instant) {
        let Ok(mut next) = self.next_purge.try_lock() else {
            return;
        };

        if now >= *next {
            *next = now + self.purge_interval;
            drop(next);
            self.purge_expired();
        }
    }

    /// Number of entries held, expired ones included until purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn incr(&self, key: &str) -> Result<u64, StoreError> {
        let now = Instant::now();

        // Must run before taking the entry guard: retain locks every shard.
        self.maybe_purge(now);

        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            count: 0,
            expires_at: None,
        });

        if entry.is_expired(now) {
            *entry = Entry {
                count: 0,
                expires_at: None,
            };
        }

        entry.count = entry
            .count
            .checked_add(1)
            .ok_or_else(|| StoreError::Protocol(format!("counter overflow for {}", key)))?;

        trace!(key = %key, count = entry.count, "Incremented in-memory counter");
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool, StoreError> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(now + Duration::from_secs(seconds));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_incr_creates_key_at_one() {
        let store = MemoryStore::new();

        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.incr("k").await.unwrap(), 2);
        assert_eq!(store.get("k"), Some(2));
    }

    #[tokio::test]
    async fn test_expire_missing_key_returns_false() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", 10).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_expires_after_ttl() {
        let store = MemoryStore::new();

        store.incr("k").await.unwrap();
        assert!(store.expire("k", 60).await.unwrap());
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(60)));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(store.get("k"), Some(1));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.get("k"), None);

        // A fresh increment starts a new counter without a TTL.
        assert_eq!(store.incr("k").await.unwrap(), 1);
        assert_eq!(store.ttl("k"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let store = MemoryStore::new();

        store.incr("short").await.unwrap();
        store.expire("short", 1).await.unwrap();
        store.incr("persistent").await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.purge_expired();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("persistent"), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_sweeps_expired_entries() {
        let store = MemoryStore::new();

        for i in 0..10_000 {
            let key = format!("ratelimit:10.0.{}.{}:/test-limit", i / 256, i % 256);
            store.incr(&key).await.unwrap();
            store.expire(&key, 1).await.unwrap();
        }
        assert_eq!(store.len(), 10_000);

        tokio::time::advance(Duration::from_secs(3600)).await;
        store.incr("ratelimit:10.1.0.1:/test-limit").await.unwrap();

        assert_eq!(store.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_waits_for_purge_interval() {
        let store = MemoryStore::new().with_purge_interval(Duration::from_secs(10));

        store.incr("short").await.unwrap();
        store.expire("short", 1).await.unwrap();

        // Expired but not yet swept.
        tokio::time::advance(Duration::from_secs(5)).await;
        store.incr("other").await.unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("short"), None);

        tokio::time::advance(Duration::from_secs(5)).await;
        store.incr("other").await.unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("other"), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_keeps_live_counters() {
        let store = MemoryStore::new().with_purge_interval(Duration::from_secs(1));

        store.incr("live").await.unwrap();
        store.expire("live", 60).await.unwrap();
        store.incr("stale").await.unwrap();
        store.expire("stale", 1).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store.incr("live").await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("live"), Some(2));
        assert_eq!(store.ttl("live"), Some(Duration::from_secs(58)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        let store = std::sync::Arc::new(MemoryStore::new());

        let handles: Vec<_> = (0..100)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.incr("shared").await.unwrap() })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.get("shared"), Some(100));
    }
}
