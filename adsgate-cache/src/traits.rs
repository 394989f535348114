//! Cache backend trait and usage statistics.
//!
//! Backends store opaque [`CacheEntry`] values under [`CacheKey`]s. Expiry is
//! decided by the layer above against its clock, so every backend honours
//! TTLs identically and switching backend never changes what a caller
//! observes as a hit or a miss.

use async_trait::async_trait;
use serde::Serialize;

use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::key::CacheKey;

/// Predicate over keys, used for bulk invalidation.
pub type KeyPredicate<'a> = &'a (dyn Fn(&CacheKey) -> bool + Send + Sync);

/// Pluggable storage behind the cache layer.
///
/// Implementations must be safe for concurrent readers and writers; a
/// `set` racing another `set` of the same key leaves one complete entry.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>>;

    /// Insert or replace the entry for `key`.
    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()>;

    /// Remove one entry. Returns whether it existed.
    async fn delete(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Remove every entry whose key satisfies `predicate`.
    async fn delete_matching(&self, predicate: KeyPredicate<'_>) -> CacheResult<u64>;

    /// Remove everything.
    async fn clear(&self) -> CacheResult<u64>;

    async fn stats(&self) -> CacheStats;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    /// Backend failures observed.
    pub errors: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
