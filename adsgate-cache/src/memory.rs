//! In-process cache backend bounded by entry count.
//!
//! When full, the oldest-inserted entry is evicted first. Re-setting an
//! existing key counts as a fresh insertion.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::trace;

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::traits::{CacheBackend, CacheStats, KeyPredicate};

#[derive(Debug, Default)]
struct Store {
    entries: HashMap<CacheKey, (u64, CacheEntry)>,
    /// Insertion sequence -> key, oldest first.
    order: BTreeMap<u64, CacheKey>,
    next_seq: u64,
}

impl Store {
    fn remove(&mut self, key: &CacheKey) -> bool {
        match self.entries.remove(key) {
            Some((seq, _)) => {
                self.order.remove(&seq);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
}

/// Bounded in-memory backend.
#[derive(Debug)]
pub struct MemoryCacheBackend {
    store: RwLock<Store>,
    max_entries: usize,
    counters: Counters,
}

impl MemoryCacheBackend {
    /// Create a backend holding at most `max_entries` entries (minimum 1).
    pub fn new(max_entries: usize) -> Self {
        Self {
            store: RwLock::new(Store::default()),
            max_entries: max_entries.max(1),
            counters: Counters::default(),
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let store = self.store.read().map_err(|_| CacheError::LockPoisoned)?;
        match store.entries.get(key) {
            Some((_, entry)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry.clone()))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let mut store = self.store.write().map_err(|_| CacheError::LockPoisoned)?;
        store.remove(key);

        while store.entries.len() >= self.max_entries {
            let Some((_, oldest)) = store.order.pop_first() else {
                break;
            };
            store.entries.remove(&oldest);
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            trace!(key = %oldest, "evicted oldest cache entry");
        }

        let seq = store.next_seq;
        store.next_seq += 1;
        store.order.insert(seq, key.clone());
        store.entries.insert(key.clone(), (seq, entry));
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let mut store = self.store.write().map_err(|_| CacheError::LockPoisoned)?;
        let removed = store.remove(key);
        if removed {
            self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(removed)
    }

    async fn delete_matching(&self, predicate: KeyPredicate<'_>) -> CacheResult<u64> {
        let mut store = self.store.write().map_err(|_| CacheError::LockPoisoned)?;
        let doomed: Vec<CacheKey> = store
            .entries
            .keys()
            .filter(|k| predicate(k))
            .cloned()
            .collect();
        for key in &doomed {
            store.remove(key);
        }
        let deleted = doomed.len() as u64;
        self.counters.deletes.fetch_add(deleted, Ordering::Relaxed);
        Ok(deleted)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let mut store = self.store.write().map_err(|_| CacheError::LockPoisoned)?;
        let cleared = store.entries.len() as u64;
        store.entries.clear();
        store.order.clear();
        self.counters.deletes.fetch_add(cleared, Ordering::Relaxed);
        Ok(cleared)
    }

    async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            errors: 0,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            entry_count: self.len() as u64,
        }
    }
}
