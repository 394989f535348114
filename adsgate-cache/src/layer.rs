//! Read-through cache layer.
//!
//! [`CacheLayer::fetch`] serves a live entry when one exists and otherwise
//! runs the caller's loader, storing only successful results. Concurrent
//! misses for the same key are coalesced: one caller loads, the others wait
//! for it and then read what it stored.
//!
//! Every invalidation bumps a generation counter. A load that was already
//! running when the counter moved returns its result to its own caller but
//! does not store it, so a read issued after a write never sees data loaded
//! before that write.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adsgate_core::{AdsResult, CacheBackendKind, CacheConfig};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, RwLockWriteGuard};
use tracing::{debug, warn};

use crate::clock::{CacheClock, SystemClock};
use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::key::{CacheKey, InvalidationScope};
use crate::lmdb_backend::LmdbCacheBackend;
use crate::memory::MemoryCacheBackend;
use crate::noop::NoopCacheBackend;
use crate::traits::{CacheBackend, CacheStats};

#[derive(Debug, Default)]
struct LayerCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    errors: AtomicU64,
}

/// Read-through cache over a pluggable backend.
///
/// # Example
///
/// ```ignore
/// let cache = CacheLayer::from_config(&config.cache)?;
/// let rows: Vec<Row> = cache
///     .fetch(&key, config.cache.ttl_for(ResourceClass::Campaign), || async {
///         load_campaigns().await
///     })
///     .await?;
/// ```
pub struct CacheLayer {
    backend: Arc<dyn CacheBackend>,
    clock: Arc<dyn CacheClock>,
    inflight: DashMap<CacheKey, Arc<Mutex<()>>>,
    /// Bumped by every invalidation.
    generation: AtomicU64,
    /// Stores hold it shared, invalidations exclusively.
    write_gate: RwLock<()>,
    counters: LayerCounters,
}

impl CacheLayer {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            clock: Arc::new(SystemClock),
            inflight: DashMap::new(),
            generation: AtomicU64::new(0),
            write_gate: RwLock::new(()),
            counters: LayerCounters::default(),
        }
    }

    /// A layer that never stores anything.
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoopCacheBackend::new()))
    }

    /// Build the backend selected by configuration.
    pub fn from_config(config: &CacheConfig) -> CacheResult<Self> {
        let backend: Arc<dyn CacheBackend> = match config.effective_backend() {
            CacheBackendKind::Memory => Arc::new(MemoryCacheBackend::new(config.max_entries)),
            CacheBackendKind::Lmdb => {
                let path = config.lmdb_path.as_ref().ok_or_else(|| {
                    CacheError::Misconfigured("lmdb backend requires lmdb_path".to_string())
                })?;
                Arc::new(
                    LmdbCacheBackend::new(path, config.lmdb_max_size_mb)?
                        .with_max_entries(config.max_entries),
                )
            }
            CacheBackendKind::None => Arc::new(NoopCacheBackend::new()),
        };
        debug!(backend = backend.name(), "cache layer initialised");
        Ok(Self::new(backend))
    }

    /// Replace the clock used for expiry decisions.
    pub fn with_clock(mut self, clock: Arc<dyn CacheClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Keys with a load running or queued.
    pub fn loads_in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Return the live value for `key`, or run `loader` and cache its result
    /// for `ttl`.
    ///
    /// Loader errors are returned unchanged and nothing is stored. Backend
    /// failures never fail the fetch: a read error is a miss, a write error
    /// only costs the caching.
    pub async fn fetch<T, F, Fut>(&self, key: &CacheKey, ttl: Duration, loader: F) -> AdsResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = AdsResult<T>>,
    {
        if let Some(value) = self.lookup(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache hit");
            return Ok(value);
        }

        let _flight = self.join_flight(key).await;

        // Another caller may have loaded it while we waited.
        if let Some(value) = self.lookup(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "cache hit after coalesced load");
            return Ok(value);
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "cache miss");

        let generation = self.generation.load(Ordering::Acquire);
        let value = loader().await?;
        self.store(key, ttl, &value, generation).await;
        Ok(value)
    }

    /// Remove every entry whose key satisfies `predicate`.
    pub async fn invalidate<P>(&self, predicate: P) -> AdsResult<u64>
    where
        P: Fn(&CacheKey) -> bool + Send + Sync,
    {
        let _gate = self.begin_invalidation().await;
        let removed = self.backend.delete_matching(&predicate).await.map_err(|e| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        debug!(removed, "cache entries invalidated");
        Ok(removed)
    }

    /// Remove the entries a write to `scope` makes stale.
    pub async fn invalidate_scope(&self, scope: &InvalidationScope) -> AdsResult<u64> {
        self.invalidate(|key| scope.matches(key)).await
    }

    pub async fn clear(&self) -> AdsResult<u64> {
        let _gate = self.begin_invalidation().await;
        let cleared = self.backend.clear().await.map_err(|e| {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            e
        })?;
        Ok(cleared)
    }

    /// Backend statistics with hits and misses as seen by callers of
    /// [`CacheLayer::fetch`] (expired entries count as misses).
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.backend.stats().await;
        stats.hits = self.counters.hits.load(Ordering::Relaxed);
        stats.misses = self.counters.misses.load(Ordering::Relaxed);
        stats.errors += self.counters.errors.load(Ordering::Relaxed);
        stats
    }

    async fn lookup<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let entry = match self.backend.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return None,
            Err(e) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, backend = self.backend.name(), error = %e, "cache read failed, treating as miss");
                return None;
            }
        };

        if !entry.is_live_at(self.clock.now()) {
            self.discard(key).await;
            return None;
        }

        match serde_json::from_value(entry.payload) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key = %key, error = %e, "cached payload has unexpected shape, discarding");
                self.discard(key).await;
                None
            }
        }
    }

    /// Exclude stores and move the generation on, so loads already in
    /// flight cannot write back what they read before the invalidation.
    async fn begin_invalidation(&self) -> RwLockWriteGuard<'_, ()> {
        let gate = self.write_gate.write().await;
        self.generation.fetch_add(1, Ordering::AcqRel);
        gate
    }

    async fn store<T: Serialize>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        value: &T,
        generation: u64,
    ) {
        if ttl.is_zero() {
            return;
        }
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "value not cacheable");
                return;
            }
        };
        let _gate = self.write_gate.read().await;
        if self.generation.load(Ordering::Acquire) != generation {
            debug!(key = %key, "invalidated during load, not caching");
            return;
        }
        let entry = CacheEntry::new(payload, key.class(), self.clock.now(), ttl);
        if let Err(e) = self.backend.set(key, entry).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, backend = self.backend.name(), error = %e, "cache write failed");
        }
    }

    async fn discard(&self, key: &CacheKey) {
        if let Err(e) = self.backend.delete(key).await {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, error = %e, "failed to drop stale cache entry");
        }
    }

    /// Wait for exclusive loading rights on `key`.
    async fn join_flight(&self, key: &CacheKey) -> FlightGuard<'_> {
        let lock = self.inflight.entry(key.clone()).or_default().value().clone();
        let permit = lock.lock_owned().await;
        FlightGuard {
            inflight: &self.inflight,
            key: key.clone(),
            _permit: permit,
        }
    }
}

/// Holds the per-key load lock; drops the map slot when nobody else waits.
struct FlightGuard<'a> {
    inflight: &'a DashMap<CacheKey, Arc<Mutex<()>>>,
    key: CacheKey,
    _permit: OwnedMutexGuard<()>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        // The map and our permit hold two references; more means waiters.
        self.inflight
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) <= 2);
    }
}
