//! LMDB-backed cache shared between processes.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key-value store. Several processes opening the same directory see the
//! same entries, with the same TTL semantics as the in-memory backend.
//!
//! # Layout
//!
//! Keys are [`CacheKey::encode`] bytes, so one account's entries are
//! contiguous. Values are JSON-encoded [`CacheEntry`] records carrying their
//! own creation time and TTL.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` and key scans
//! - Write transactions for `set`, `delete`, `delete_matching` and `clear`
//! - Statistics are tracked behind a lock local to this process
//!
//! # Capacity
//!
//! The map has a fixed size. When a write no longer fits, entries that are
//! already expired (relative to the incoming entry's creation time) are swept
//! and the write is retried; if it still does not fit, the oldest entries are
//! evicted until it does. [`LmdbCacheBackend::with_max_entries`] bounds the
//! entry count the same way the memory backend does.

use std::path::Path;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use heed::types::Bytes;
use chrono::{DateTime, Utc};
use heed::{Database, Env, EnvOpenOptions, MdbError, RoTxn};
use tracing::{debug, warn};

use crate::entry::CacheEntry;
use crate::error::{CacheError, CacheResult};
use crate::key::CacheKey;
use crate::traits::{CacheBackend, CacheStats, KeyPredicate};

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use adsgate_cache::{CacheBackend, LmdbCacheBackend};
///
/// let backend = LmdbCacheBackend::new("/var/cache/adsgate", 256)?;
/// backend.set(&key, entry).await?;
/// let cached = backend.get(&key).await?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    /// Statistics for this process.
    stats: Arc<RwLock<CacheStats>>,
    /// Entry bound; `None` means limited only by the map size.
    max_entries: Option<u64>,
}

/// Keys deleted per write transaction while reclaiming space.
const RECLAIM_CHUNK: usize = 8;

fn is_map_full(error: &heed::Error) -> bool {
    matches!(error, heed::Error::Mdb(MdbError::MapFull))
}

impl LmdbCacheBackend {
    /// Open (or create) a cache under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> CacheResult<Self> {
        // Ensure directory exists
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb.max(1) * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| CacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| CacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;

        debug!(path = %path.as_ref().display(), max_size_mb, "opened LMDB cache");

        Ok(Self {
            env,
            db,
            stats: Arc::new(RwLock::new(CacheStats::default())),
            max_entries: None,
        })
    }

    /// Hold at most `max_entries` entries (minimum 1), evicting the oldest
    /// first.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1) as u64);
        self
    }

    fn record<F: FnOnce(&mut CacheStats)>(&self, update: F) {
        if let Ok(mut stats) = self.stats.write() {
            update(&mut stats);
        }
    }

    /// Track a failure in the stats before handing it back.
    fn failed(&self, error: CacheError) -> CacheError {
        self.record(|s| s.errors += 1);
        error
    }

    fn entry_count(&self) -> CacheResult<u64> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;
        self.db
            .len(&rtxn)
            .map_err(|e| CacheError::Transaction(e.to_string()))
    }

    /// Collect stored keys whose decoded form satisfies `predicate`.
    /// Keys that do not decode are left alone.
    fn collect_matching(&self, predicate: KeyPredicate<'_>) -> CacheResult<Vec<Vec<u8>>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| CacheError::Transaction(e.to_string()))?;

        for result in iter {
            match result {
                Ok((raw, _)) => {
                    if CacheKey::decode(raw).is_some_and(|key| predicate(&key)) {
                        keys.push(raw.to_vec());
                    }
                }
                Err(_) => continue,
            }
        }

        Ok(keys)
    }

    fn get_sync(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;

        match self.db.get(&rtxn, &key.encode()) {
            Ok(Some(bytes)) => {
                let entry: CacheEntry = serde_json::from_slice(bytes)
                    .map_err(|e| CacheError::Deserialization(e.to_string()))?;
                Ok(Some(entry))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(CacheError::Transaction(e.to_string())),
        }
    }

    /// The `limit` stored keys with the oldest entries, skipping `keep`.
    /// Records that do not decode sort first.
    fn oldest_keys(
        &self,
        txn: &RoTxn<'_>,
        limit: usize,
        keep: &[u8],
    ) -> heed::Result<Vec<Vec<u8>>> {
        let mut aged: Vec<(Option<DateTime<Utc>>, Vec<u8>)> = Vec::new();
        for result in self.db.iter(txn)? {
            let (raw, bytes) = result?;
            if raw == keep {
                continue;
            }
            let created_at = serde_json::from_slice::<CacheEntry>(bytes)
                .ok()
                .map(|entry| entry.created_at);
            aged.push((created_at, raw.to_vec()));
        }
        aged.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(aged.into_iter().take(limit).map(|(_, raw)| raw).collect())
    }

    /// Put one record, first evicting the oldest entries if the entry bound
    /// would be exceeded. Returns how many were evicted.
    fn write_entry(&self, key: &[u8], value: &[u8]) -> heed::Result<u64> {
        let mut wtxn = self.env.write_txn()?;

        let mut evicted = 0u64;
        if let Some(max) = self.max_entries {
            let replacing = self.db.get(&wtxn, key)?.is_some();
            let after_put = self.db.len(&wtxn)? + u64::from(!replacing);
            let excess = after_put.saturating_sub(max) as usize;
            if excess > 0 {
                for raw in self.oldest_keys(&wtxn, excess, key)? {
                    if self.db.delete(&mut wtxn, &raw)? {
                        evicted += 1;
                    }
                }
            }
        }

        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        Ok(evicted)
    }

    /// Delete `keys` a few at a time. A full map has little room for the
    /// copy-on-write pages a delete needs; each committed chunk frees pages
    /// for the next.
    fn delete_in_chunks(&self, mut keys: Vec<Vec<u8>>) -> CacheResult<u64> {
        keys.sort();
        let mut deleted = 0u64;
        for chunk in keys.chunks(RECLAIM_CHUNK) {
            deleted += self.delete_keys(chunk)?;
        }
        Ok(deleted)
    }

    /// Delete every entry that is no longer live at `now`, along with
    /// records that do not decode.
    fn sweep_expired(&self, now: DateTime<Utc>) -> CacheResult<u64> {
        let expired = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| CacheError::Transaction(e.to_string()))?;
            let iter = self
                .db
                .iter(&rtxn)
                .map_err(|e| CacheError::Transaction(e.to_string()))?;

            let mut expired = Vec::new();
            for result in iter {
                let Ok((raw, bytes)) = result else { continue };
                let live = serde_json::from_slice::<CacheEntry>(bytes)
                    .is_ok_and(|entry| entry.is_live_at(now));
                if !live {
                    expired.push(raw.to_vec());
                }
            }
            expired
        };
        self.delete_in_chunks(expired)
    }

    /// Evict the oldest quarter of the store (at least one entry), keeping
    /// `keep`.
    fn evict_oldest_share(&self, keep: &[u8]) -> CacheResult<u64> {
        let doomed = {
            let rtxn = self
                .env
                .read_txn()
                .map_err(|e| CacheError::Transaction(e.to_string()))?;
            let len = self
                .db
                .len(&rtxn)
                .map_err(|e| CacheError::Transaction(e.to_string()))?;
            self.oldest_keys(&rtxn, (len / 4).max(1) as usize, keep)
                .map_err(|e| CacheError::Transaction(e.to_string()))?
        };
        self.delete_in_chunks(doomed)
    }

    /// Store `entry`, reclaiming space when the map is full. Returns the
    /// number of live entries evicted to make room.
    fn set_sync(&self, key: &CacheKey, entry: &CacheEntry) -> CacheResult<u64> {
        let value =
            serde_json::to_vec(entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let raw = key.encode();

        match self.write_entry(&raw, &value) {
            Err(e) if is_map_full(&e) => {}
            other => return other.map_err(|e| CacheError::Transaction(e.to_string())),
        }

        let swept = self.sweep_expired(entry.created_at)?;
        self.record(|s| s.deletes += swept);
        debug!(swept, "LMDB map full, swept expired entries");

        let mut evicted = 0u64;
        loop {
            match self.write_entry(&raw, &value) {
                Ok(bounded) => return Ok(evicted + bounded),
                Err(e) if is_map_full(&e) => {
                    let dropped = self.evict_oldest_share(&raw)?;
                    if dropped == 0 {
                        warn!(bytes = value.len(), "entry does not fit in an empty LMDB map");
                        return Err(CacheError::Transaction(e.to_string()));
                    }
                    evicted += dropped;
                }
                Err(e) => return Err(CacheError::Transaction(e.to_string())),
            }
        }
    }

    fn delete_keys(&self, keys: &[Vec<u8>]) -> CacheResult<u64> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for key in keys {
            if self.db.delete(&mut wtxn, key).unwrap_or(false) {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| CacheError::Transaction(e.to_string()))?;
        Ok(deleted)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
        match self.get_sync(key) {
            Ok(Some(entry)) => {
                self.record(|s| s.hits += 1);
                Ok(Some(entry))
            }
            Ok(None) => {
                self.record(|s| s.misses += 1);
                Ok(None)
            }
            Err(e) => {
                self.record(|s| s.misses += 1);
                Err(self.failed(e))
            }
        }
    }

    async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
        let evicted = self.set_sync(key, &entry).map_err(|e| self.failed(e))?;
        self.record(|s| {
            s.sets += 1;
            s.evictions += evicted;
        });
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> CacheResult<bool> {
        let deleted = self
            .delete_keys(&[key.encode()])
            .map_err(|e| self.failed(e))?;
        if deleted > 0 {
            self.record(|s| s.deletes += 1);
        }
        Ok(deleted > 0)
    }

    async fn delete_matching(&self, predicate: KeyPredicate<'_>) -> CacheResult<u64> {
        let keys = self
            .collect_matching(predicate)
            .map_err(|e| self.failed(e))?;
        let deleted = self.delete_keys(&keys).map_err(|e| self.failed(e))?;
        self.record(|s| s.deletes += deleted);
        Ok(deleted)
    }

    async fn clear(&self) -> CacheResult<u64> {
        let cleared = self.entry_count().map_err(|e| self.failed(e))?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| self.failed(CacheError::Transaction(e.to_string())))?;
        self.db
            .clear(&mut wtxn)
            .map_err(|e| self.failed(CacheError::Transaction(e.to_string())))?;
        wtxn.commit()
            .map_err(|e| self.failed(CacheError::Transaction(e.to_string())))?;

        self.record(|s| s.deletes += cleared);
        Ok(cleared)
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = self
            .stats
            .read()
            .map(|s| s.clone())
            .unwrap_or_default();
        stats.entry_count = self.entry_count().unwrap_or(0);
        stats
    }
}
