//! # In-Memory Cache Store
//!
//! DashMap-backed store with TTL expiry and an entry cap. Expired entries are
//! removed lazily on lookup and eagerly by [`CacheStore::purge_expired`]. When the
//! cap is reached, expired entries go first, then the oldest entry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{glob_to_regex, CacheStore};
use crate::caching::CacheResult;
use crate::core::clock::{system_clock, SharedClock};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    stored_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) > self.ttl
    }
}

/// In-memory cache implementation
#[derive(Debug)]
pub struct InMemoryCache {
    entries: DashMap<String, CacheEntry>,
    max_entries: usize,
    clock: SharedClock,
    evictions: AtomicU64,
}

impl InMemoryCache {
    pub fn new(max_entries: usize) -> Self {
        Self::with_clock(max_entries, system_clock())
    }

    pub fn with_clock(max_entries: usize, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
            clock,
            evictions: AtomicU64::new(0),
        }
    }

    /// Number of stored entries, including ones not yet purged
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted to stay under the cap
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn remove_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self, now: Instant) {
        if self.entries.len() < self.max_entries {
            return;
        }
        self.remove_expired(now);

        while self.entries.len() >= self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.stored_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "Evicted cache entry");
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let now = self.clock.now();
        let Some(entry) = self.entries.get(key) else {
            return Ok(None);
        };

        if entry.is_expired(now) {
            drop(entry);
            self.entries.remove_if(key, |_, entry| entry.is_expired(now));
            return Ok(None);
        }

        Ok(Some(entry.value.clone()))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let now = self.clock.now();
        if !self.entries.contains_key(key) {
            self.make_room(now);
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_vec(),
                stored_at: now,
                ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        Ok(self.entries.remove(key).is_some())
    }

    async fn clear_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let matcher = glob_to_regex(pattern)?;
        let before = self.entries.len();
        self.entries.retain(|key, _| !matcher.is_match(key));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(self.remove_expired(self.clock.now()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use std::sync::Arc;

    fn cache(max_entries: usize) -> (InMemoryCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (InMemoryCache::with_clock(max_entries, clock.clone()), clock)
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let (cache, _clock) = cache(10);

        cache.set("k", b"v", Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));

        assert!(cache.delete("k").await.unwrap());
        assert!(!cache.delete("k").await.unwrap());
        assert_eq!(cache.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let (cache, clock) = cache(10);
        cache.set("k", b"v", Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_secs(1));
        assert!(cache.get("k").await.unwrap().is_some());

        clock.advance(Duration::from_millis(1));
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(cache.is_empty(), "expired entry is purged on lookup");
    }

    #[tokio::test]
    async fn test_eviction_prefers_expired_then_oldest() {
        let (cache, clock) = cache(2);
        cache.set("short", b"1", Duration::from_secs(1)).await.unwrap();
        clock.advance(Duration::from_secs(1));
        cache.set("old", b"2", Duration::from_secs(60)).await.unwrap();
        clock.advance(Duration::from_secs(1));

        cache.set("new", b"3", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.evictions(), 0);
        assert!(cache.get("old").await.unwrap().is_some());

        cache.set("newer", b"4", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.evictions(), 1);
        assert!(cache.get("old").await.unwrap().is_none());
        assert!(cache.get("newer").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear_pattern_and_purge() {
        let (cache, clock) = cache(10);
        cache.set("svc:a:1", b"1", Duration::from_secs(60)).await.unwrap();
        cache.set("svc:a:2", b"2", Duration::from_secs(60)).await.unwrap();
        cache.set("svc:b:1", b"3", Duration::from_secs(1)).await.unwrap();

        assert_eq!(cache.clear_pattern("svc:a:*").await.unwrap(), 2);
        assert_eq!(cache.len(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired().await.unwrap(), 1);
        assert!(cache.is_empty());
    }
}
