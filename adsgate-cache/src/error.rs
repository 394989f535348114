//! Cache error type.

use adsgate_core::ClassifiedError;

/// Error type for cache backend operations.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// A thread panicked while holding the store lock.
    #[error("Cache lock poisoned")]
    LockPoisoned,

    /// Backend selected by configuration is missing a required setting.
    #[error("Cache misconfigured: {0}")]
    Misconfigured(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cache failures surface as Fatal: they are local and retrying will not help.
impl From<CacheError> for ClassifiedError {
    fn from(e: CacheError) -> Self {
        ClassifiedError::fatal(format!("cache backend failure: {}", e)).with_code("CACHE_ERROR")
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
