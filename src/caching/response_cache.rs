//! Response cache on top of a [`CacheStore`].
//!
//! Store keys have the form `{prefix}{service}:{fingerprint}`. The fingerprint is a
//! SHA-256 over method, path and the sorted query parameters only; request IDs,
//! headers and timestamps never contribute, so identical requests always share a
//! key. Keeping the service in the key lets [`ResponseCache::invalidate_service`]
//! clear one service with a single pattern; the service name is glob-escaped and
//! the pattern pins the fingerprint width, so overlapping names stay apart.

use axum::http::Method;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::stores::escape_glob;
use super::CacheStore;

/// Hex length of a SHA-256 fingerprint
const FINGERPRINT_HEX_LEN: usize = 64;

/// Deterministic fingerprint of a request
pub fn cache_fingerprint(method: &Method, path: &str, query: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    for (key, value) in query {
        hasher.update(urlencoding::encode(key).as_bytes());
        hasher.update(b"=");
        hasher.update(urlencoding::encode(value).as_bytes());
        hasher.update(b"&");
    }
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub store_errors: u64,
}

/// Response cache shared by every cacheable route
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    prefix: String,
    hits: AtomicU64,
    misses: AtomicU64,
    store_errors: AtomicU64,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    /// Store key for a request to `service`
    pub fn key(&self, service: &str, method: &Method, path: &str, query: &BTreeMap<String, String>) -> String {
        format!(
            "{}{}:{}",
            self.prefix,
            service,
            cache_fingerprint(method, path, query)
        )
    }

    /// Look up a cached payload. Store failures and undecodable entries are misses.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let cached = match self.store.get(key).await {
            Ok(cached) => cached,
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, store = self.store.name(), error = %e, "Cache lookup failed");
                None
            }
        };

        let value = cached.and_then(|bytes| match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "Discarding undecodable cache entry");
                None
            }
        });

        match value {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Response cache hit");
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Cache a payload for `ttl`. Failures are logged, never returned.
    pub async fn put(&self, key: &str, value: &Value, ttl: Duration) {
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Response not cacheable");
                return;
            }
        };

        if let Err(e) = self.store.set(key, &bytes, ttl).await {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, store = self.store.name(), error = %e, "Cache store failed");
        }
    }

    /// Remove every cached response for a service
    pub async fn invalidate_service(&self, service: &str) -> usize {
        // fixed-width fingerprint so `stock` never matches keys of `stock:eu`
        let pattern = format!(
            "{}{}:{}",
            escape_glob(&self.prefix),
            escape_glob(service),
            "?".repeat(FINGERPRINT_HEX_LEN)
        );
        match self.store.clear_pattern(&pattern).await {
            Ok(count) => count,
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(service = %service, error = %e, "Cache invalidation failed");
                0
            }
        }
    }

    /// Purge expired entries in stores without native expiry
    pub async fn purge_expired(&self) -> usize {
        self.store.purge_expired().await.unwrap_or_else(|e| {
            warn!(store = self.store.name(), error = %e, "Cache purge failed");
            0
        })
    }

    pub fn stats(&self) -> ResponseCacheStats {
        ResponseCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.store.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{CacheError, CacheResult, InMemoryCache};
    use crate::core::clock::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;

    struct FailingStore;

    #[async_trait]
    impl CacheStore for FailingStore {
        async fn get(&self, _key: &str) -> CacheResult<Option<Vec<u8>>> {
            Err(CacheError::Store {
                message: "down".to_string(),
            })
        }
        async fn set(&self, _key: &str, _value: &[u8], _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::Store {
                message: "down".to_string(),
            })
        }
        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            Ok(false)
        }
        async fn clear_pattern(&self, _pattern: &str) -> CacheResult<usize> {
            Ok(0)
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_fingerprint_is_deterministic_and_order_free() {
        let mut a = BTreeMap::new();
        a.insert("b".to_string(), "2".to_string());
        a.insert("a".to_string(), "1".to_string());
        let mut b = BTreeMap::new();
        b.insert("a".to_string(), "1".to_string());
        b.insert("b".to_string(), "2".to_string());

        assert_eq!(
            cache_fingerprint(&Method::GET, "/x", &a),
            cache_fingerprint(&Method::GET, "/x", &b)
        );
        assert_ne!(
            cache_fingerprint(&Method::GET, "/x", &a),
            cache_fingerprint(&Method::POST, "/x", &a)
        );
        assert_ne!(
            cache_fingerprint(&Method::GET, "/x", &a),
            cache_fingerprint(&Method::GET, "/y", &a)
        );
    }

    #[tokio::test]
    async fn test_put_get_and_expiry() {
        let clock = Arc::new(ManualClock::new());
        let cache = ResponseCache::new(Arc::new(InMemoryCache::with_clock(100, clock.clone())), "gw:");
        let key = cache.key("stocks", &Method::GET, "/stock/AAPL", &BTreeMap::new());

        cache.put(&key, &json!({"price": 10}), Duration::from_secs(1)).await;
        assert_eq!(cache.get(&key).await, Some(json!({"price": 10})));

        clock.advance(Duration::from_millis(1500));
        assert_eq!(cache.get(&key).await, None);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_invalidate_service_only_touches_that_service() {
        let cache = ResponseCache::new(Arc::new(InMemoryCache::new(100)), "gw:");
        let query = BTreeMap::new();
        let stocks = cache.key("stocks", &Method::GET, "/a", &query);
        let news = cache.key("news", &Method::GET, "/a", &query);

        cache.put(&stocks, &json!(1), Duration::from_secs(60)).await;
        cache.put(&news, &json!(2), Duration::from_secs(60)).await;

        assert_eq!(cache.invalidate_service("stocks").await, 1);
        assert!(cache.get(&stocks).await.is_none());
        assert!(cache.get(&news).await.is_some());
    }

    #[tokio::test]
    async fn test_invalidation_ignores_overlapping_and_glob_names() {
        let cache = ResponseCache::new(Arc::new(InMemoryCache::new(100)), "gw:");
        let query = BTreeMap::new();
        let stock = cache.key("stock", &Method::GET, "/a", &query);
        let stock_eu = cache.key("stock:eu", &Method::GET, "/a", &query);
        let other = cache.key("other", &Method::GET, "/a", &query);

        for key in [&stock, &stock_eu, &other] {
            cache.put(key, &json!(1), Duration::from_secs(60)).await;
        }

        assert_eq!(cache.invalidate_service("stock").await, 1);
        assert!(cache.get(&stock_eu).await.is_some());

        assert_eq!(cache.invalidate_service("*").await, 0);
        assert!(cache.get(&other).await.is_some());

        assert_eq!(cache.invalidate_service("stock:eu").await, 1);
        assert!(cache.get(&stock_eu).await.is_none());
    }

    #[tokio::test]
    async fn test_store_failures_degrade_to_miss() {
        let cache = ResponseCache::new(Arc::new(FailingStore), "gw:");
        cache.put("k", &json!(1), Duration::from_secs(5)).await;
        assert!(cache.get("k").await.is_none());
        assert_eq!(cache.stats().store_errors, 2);
    }
}
