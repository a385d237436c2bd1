//! # Cache Stores Module
//!
//! The key-value contract the response cache is written against, plus the
//! in-memory and Redis implementations.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::RedisCache;

use super::{CacheError, CacheResult};
use async_trait::async_trait;
use regex::Regex;
use std::time::Duration;

/// Key-value store with per-entry TTL
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get a live value; expired entries are never returned
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Store a value that expires after `ttl`
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> CacheResult<()>;

    /// Remove a key, returning whether it existed
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key matching a glob pattern (`*` and `?`), returning the count
    async fn clear_pattern(&self, pattern: &str) -> CacheResult<usize>;

    /// Drop expired entries eagerly. Stores with native expiry need not override this.
    async fn purge_expired(&self) -> CacheResult<usize> {
        Ok(0)
    }

    /// Short backend name for logs
    fn name(&self) -> &'static str;
}

/// Escape glob metacharacters so `literal` only matches itself
pub fn escape_glob(literal: &str) -> String {
    let mut escaped = String::with_capacity(literal.len());
    for ch in literal.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Compile a glob pattern into an anchored regex. Supports `*`, `?` and
/// backslash escapes, matching the subset of Redis `MATCH` the cache uses.
pub(crate) fn glob_to_regex(pattern: &str) -> CacheResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut chars = pattern.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '\\' => {
                let literal = chars.next().unwrap_or('\\');
                source.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4])));
            }
            other => source.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');

    Regex::new(&source).map_err(|e| CacheError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_to_regex() {
        let re = glob_to_regex("gateway:stocks:*").unwrap();
        assert!(re.is_match("gateway:stocks:abc"));
        assert!(re.is_match("gateway:stocks:"));
        assert!(!re.is_match("gateway:news:abc"));

        let single = glob_to_regex("a?c").unwrap();
        assert!(single.is_match("abc"));
        assert!(!single.is_match("abbc"));

        let literal = glob_to_regex("a.b").unwrap();
        assert!(!literal.is_match("axb"));
    }

    #[test]
    fn test_escaped_glob_matches_only_itself() {
        let escaped = escape_glob("odd*name?[x]");
        assert_eq!(escaped, r"odd\*name\?\[x\]");

        let re = glob_to_regex(&format!("{}:*", escaped)).unwrap();
        assert!(re.is_match("odd*name?[x]:abc"));
        assert!(!re.is_match("oddXXname![x]:abc"));
    }
}
