//! Backend used when caching is disabled: stores nothing, always misses.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::entry::CacheEntry;
use crate::error::CacheResult;
use crate::key::CacheKey;
use crate::traits::{CacheBackend, CacheStats, KeyPredicate};

#[derive(Debug, Default)]
pub struct NoopCacheBackend {
    misses: AtomicU64,
}

impl NoopCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheBackend for NoopCacheBackend {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn get(&self, _key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn set(&self, _key: &CacheKey, _entry: CacheEntry) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> CacheResult<bool> {
        Ok(false)
    }

    async fn delete_matching(&self, _predicate: KeyPredicate<'_>) -> CacheResult<u64> {
        Ok(0)
    }

    async fn clear(&self) -> CacheResult<u64> {
        Ok(0)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            misses: self.misses.load(Ordering::Relaxed),
            ..Default::default()
        }
    }
}
