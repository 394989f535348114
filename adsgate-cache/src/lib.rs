//! ADSGATE Cache - Read-Through Response Cache
//!
//! Repeat reads of the same account data are served locally until their
//! resource class's TTL runs out.
//!
//! # Backends
//!
//! - [`MemoryCacheBackend`]: in-process, bounded by entry count, FIFO eviction
//! - [`LmdbCacheBackend`]: memory-mapped store shared by several processes
//! - [`NoopCacheBackend`]: caching disabled
//!
//! All three sit behind [`CacheBackend`]; expiry is decided once, in
//! [`CacheLayer`], so hit and miss behavior does not depend on the backend.

pub mod clock;
pub mod entry;
pub mod error;
pub mod key;
pub mod layer;
pub mod lmdb_backend;
pub mod memory;
pub mod noop;
pub mod traits;

pub use clock::{CacheClock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use error::{CacheError, CacheResult};
pub use key::{params_hash, CacheKey, InvalidationScope};
pub use layer::CacheLayer;
pub use lmdb_backend::LmdbCacheBackend;
pub use memory::MemoryCacheBackend;
pub use noop::NoopCacheBackend;
pub use traits::{CacheBackend, CacheStats, KeyPredicate};
