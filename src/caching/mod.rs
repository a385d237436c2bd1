//! # Caching Module
//!
//! Response caching for routes that declare a cache TTL.
//!
//! ## Architecture
//! 1. **Cache stores**: the [`CacheStore`] collaborator contract (`get`, `set` with
//!    TTL, `delete`, `clear_pattern`) with in-memory and Redis implementations.
//!    The store may be shared with other subsystems, so the gateway never relies on
//!    its eviction policy.
//! 2. **Response cache**: [`ResponseCache`] derives a deterministic fingerprint from
//!    method, path and sorted query parameters, serializes payloads as JSON, and
//!    turns store failures into misses so caching can never fail a request.

pub mod response_cache;
pub mod stores;

pub use response_cache::{cache_fingerprint, ResponseCache, ResponseCacheStats};
pub use stores::{CacheStore, InMemoryCache, RedisCache};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Invalid key pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}
