//! # Redis Cache Store
//!
//! Shared cache store backed by Redis. Expiry is native (`SET EX`), so
//! `purge_expired` keeps the default no-op. `clear_pattern` walks the keyspace with
//! `SCAN MATCH` rather than `KEYS` to avoid blocking the server.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, info};

use super::CacheStore;
use crate::caching::CacheResult;

/// Redis cache implementation
#[derive(Clone)]
pub struct RedisCache {
    /// Multiplexed, auto-reconnecting connection; cheap to clone per call
    connection: ConnectionManager,
}

impl RedisCache {
    /// Connect to Redis at `url`
    pub async fn connect(url: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        info!(url = %url, "Redis cache connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.connection.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection.clone();
        let ttl_seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, value, ttl_seconds).await?;

        debug!(key = %key, ttl_seconds, "Set Redis cache key");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let mut conn = self.connection.clone();
        let deleted: i64 = conn.del(key).await?;
        Ok(deleted > 0)
    }

    async fn clear_pattern(&self, pattern: &str) -> CacheResult<usize> {
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut keys: Vec<String> = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await?;
            keys.extend(batch);

            if next == 0 {
                break;
            }
            cursor = next;
        }

        if keys.is_empty() {
            return Ok(0);
        }

        let deleted: i64 = conn.del(&keys).await?;
        info!(pattern = %pattern, deleted, "Cleared Redis cache keys");
        Ok(deleted.max(0) as usize)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
