//! Configuration types
//!
//! Every recognized option is enumerated here and checked once by
//! [`OrchestratorConfig::validate`]. Durations are written in files as
//! milliseconds under `*_ms` keys.

use crate::error::{ConfigError, ConfigResult};
use crate::resource::ResourceClass;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Serde adapter writing a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// CACHE
// ============================================================================

/// Which store backs the cache layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    /// In-process store.
    Memory,
    /// Memory-mapped store shared between processes on one host.
    Lmdb,
    /// Caching disabled; every read goes to the loader.
    None,
}

/// TTL per resource class.
///
/// Classes missing from a configuration file keep their built-in default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TtlTable(BTreeMap<ResourceClass, Duration>);

impl TtlTable {
    pub fn get(&self, class: ResourceClass) -> Duration {
        self.0
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_ttl(class))
    }

    pub fn set(&mut self, class: ResourceClass, ttl: Duration) {
        self.0.insert(class, ttl);
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceClass, Duration)> + '_ {
        self.0.iter().map(|(class, ttl)| (*class, *ttl))
    }
}

fn default_ttl(class: ResourceClass) -> Duration {
    let secs = match class {
        ResourceClass::Account => 3600,
        ResourceClass::Campaign => 1800,
        ResourceClass::AdGroup => 1800,
        ResourceClass::Ad => 900,
        ResourceClass::Keyword => 900,
        ResourceClass::SearchTerm => 600,
        ResourceClass::Performance => 300,
        ResourceClass::Recommendation => 3600,
        ResourceClass::Audience => 1800,
        ResourceClass::Conversion => 600,
    };
    Duration::from_secs(secs)
}

impl Default for TtlTable {
    fn default() -> Self {
        Self(
            ResourceClass::ALL
                .iter()
                .map(|class| (*class, default_ttl(*class)))
                .collect(),
        )
    }
}

impl Serialize for TtlTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let millis: BTreeMap<ResourceClass, u64> = self
            .0
            .iter()
            .map(|(class, ttl)| (*class, u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)))
            .collect();
        millis.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TtlTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let overrides = BTreeMap::<ResourceClass, u64>::deserialize(deserializer)?;
        let mut table = TtlTable::default();
        for (class, ms) in overrides {
            table.set(class, Duration::from_millis(ms));
        }
        Ok(table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    /// Entry bound for the memory and LMDB backends; oldest evicted first.
    pub max_entries: usize,
    /// Directory of the LMDB environment. Required for the LMDB backend.
    pub lmdb_path: Option<PathBuf>,
    pub lmdb_max_size_mb: usize,
    #[serde(rename = "ttl_ms")]
    pub ttl: TtlTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackendKind::Memory,
            max_entries: 1000,
            lmdb_path: None,
            lmdb_max_size_mb: 256,
            ttl: TtlTable::default(),
        }
    }
}

impl CacheConfig {
    /// Backend actually in effect once `enabled` is taken into account.
    pub fn effective_backend(&self) -> CacheBackendKind {
        if self.enabled {
            self.backend
        } else {
            CacheBackendKind::None
        }
    }

    pub fn ttl_for(&self, class: ResourceClass) -> Duration {
        self.ttl.get(class)
    }
}

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Behavior when a bucket has no token available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Suspend until the next token is projected to arrive, up to `max_wait`.
    Wait,
    /// Fail immediately with a quota error.
    FailFast,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests_per_minute: u32,
    pub burst_size: u32,
    pub mode: AdmissionMode,
    #[serde(rename = "max_wait_ms", with = "duration_ms")]
    pub max_wait: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_minute: 100,
            burst_size: 10,
            mode: AdmissionMode::Wait,
            max_wait: Duration::from_secs(10),
        }
    }
}

impl RateLimitConfig {
    /// Tokens added per second.
    pub fn refill_rate(&self) -> f64 {
        f64::from(self.requests_per_minute) / 60.0
    }
}

// ============================================================================
// RETRY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    Exponential,
}

impl BackoffStrategy {
    /// Growth factor applied to the initial delay before retry `n` (n >= 1).
    pub fn growth(&self, n: u32) -> u32 {
        let n = n.max(1);
        match self {
            BackoffStrategy::Constant => 1,
            BackoffStrategy::Linear => n,
            BackoffStrategy::Exponential => 1u32.checked_shl(n - 1).unwrap_or(u32::MAX),
        }
    }
}

/// Retry policy. Immutable for the duration of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries, including the first one.
    pub max_attempts: u32,
    pub backoff: BackoffStrategy,
    #[serde(rename = "initial_delay_ms", with = "duration_ms")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,
    /// Spread each delay by up to ±20%.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry `n` (n >= 1), without jitter.
    pub fn delay_for(&self, n: u32) -> Duration {
        self.initial_delay
            .saturating_mul(self.backoff.growth(n))
            .min(self.max_delay)
    }
}

// ============================================================================
// BATCH / LOGGING
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Sub-operations in flight at once; 1 means strictly sequential.
    pub concurrency_limit: usize,
    pub max_items: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: 4,
            max_items: 5000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `adsgate_cache=debug,info`.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration for the orchestration layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    /// Deadline wrapped around every remote call.
    #[serde(rename = "request_timeout_ms", with = "duration_ms")]
    pub request_timeout: Duration,
    pub logging: LoggingConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryPolicy::default(),
            batch: BatchConfig::default(),
            request_timeout: Duration::from_secs(30),
            logging: LoggingConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Load from a `.toml`, `.yaml` or `.yml` file, apply `ADSGATE_*`
    /// environment overrides and validate.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        let mut config = match extension.as_deref() {
            Some("toml") => Self::from_toml_str(&contents)?,
            Some("yaml") | Some("yml") => Self::from_yaml_str(&contents)?,
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "config_path".to_string(),
                    value: path.display().to_string(),
                    reason: format!(
                        "unsupported extension {:?}; expected toml, yaml or yml",
                        other.unwrap_or("")
                    ),
                })
            }
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> ConfigResult<Self> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            source_name: "TOML".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn from_yaml_str(contents: &str) -> ConfigResult<Self> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            source_name: "YAML".to_string(),
            reason: e.to_string(),
        })
    }

    /// Apply overrides from `ADSGATE_*` environment variables.
    pub fn apply_env_overrides(&mut self) -> ConfigResult<()> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = get("ADSGATE_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("ADSGATE_CACHE_ENABLED", &v)?;
        }
        if let Some(v) = get("ADSGATE_CACHE_BACKEND") {
            self.cache.backend = match v.to_ascii_lowercase().as_str() {
                "memory" => CacheBackendKind::Memory,
                "lmdb" => CacheBackendKind::Lmdb,
                "none" => CacheBackendKind::None,
                _ => return Err(invalid("ADSGATE_CACHE_BACKEND", &v, "expected memory, lmdb or none")),
            };
        }
        if let Some(v) = get("ADSGATE_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = parse_num("ADSGATE_CACHE_MAX_ENTRIES", &v)?;
        }
        if let Some(v) = get("ADSGATE_CACHE_LMDB_PATH") {
            self.cache.lmdb_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("ADSGATE_RATE_LIMIT_ENABLED") {
            self.rate_limit.enabled = parse_bool("ADSGATE_RATE_LIMIT_ENABLED", &v)?;
        }
        if let Some(v) = get("ADSGATE_RATE_LIMIT_RPM") {
            self.rate_limit.requests_per_minute = parse_num("ADSGATE_RATE_LIMIT_RPM", &v)?;
        }
        if let Some(v) = get("ADSGATE_RATE_LIMIT_BURST") {
            self.rate_limit.burst_size = parse_num("ADSGATE_RATE_LIMIT_BURST", &v)?;
        }
        if let Some(v) = get("ADSGATE_RATE_LIMIT_MODE") {
            self.rate_limit.mode = match v.to_ascii_lowercase().as_str() {
                "wait" => AdmissionMode::Wait,
                "fail_fast" => AdmissionMode::FailFast,
                _ => return Err(invalid("ADSGATE_RATE_LIMIT_MODE", &v, "expected wait or fail_fast")),
            };
        }
        if let Some(v) = get("ADSGATE_RATE_LIMIT_MAX_WAIT_MS") {
            self.rate_limit.max_wait = parse_ms("ADSGATE_RATE_LIMIT_MAX_WAIT_MS", &v)?;
        }
        if let Some(v) = get("ADSGATE_RETRY_MAX_ATTEMPTS") {
            self.retry.max_attempts = parse_num("ADSGATE_RETRY_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = get("ADSGATE_RETRY_BACKOFF") {
            self.retry.backoff = match v.to_ascii_lowercase().as_str() {
                "constant" => BackoffStrategy::Constant,
                "linear" => BackoffStrategy::Linear,
                "exponential" => BackoffStrategy::Exponential,
                _ => {
                    return Err(invalid(
                        "ADSGATE_RETRY_BACKOFF",
                        &v,
                        "expected constant, linear or exponential",
                    ))
                }
            };
        }
        if let Some(v) = get("ADSGATE_RETRY_INITIAL_DELAY_MS") {
            self.retry.initial_delay = parse_ms("ADSGATE_RETRY_INITIAL_DELAY_MS", &v)?;
        }
        if let Some(v) = get("ADSGATE_RETRY_MAX_DELAY_MS") {
            self.retry.max_delay = parse_ms("ADSGATE_RETRY_MAX_DELAY_MS", &v)?;
        }
        if let Some(v) = get("ADSGATE_RETRY_JITTER") {
            self.retry.jitter = parse_bool("ADSGATE_RETRY_JITTER", &v)?;
        }
        if let Some(v) = get("ADSGATE_BATCH_CONCURRENCY") {
            self.batch.concurrency_limit = parse_num("ADSGATE_BATCH_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("ADSGATE_BATCH_MAX_ITEMS") {
            self.batch.max_items = parse_num("ADSGATE_BATCH_MAX_ITEMS", &v)?;
        }
        if let Some(v) = get("ADSGATE_REQUEST_TIMEOUT_MS") {
            self.request_timeout = parse_ms("ADSGATE_REQUEST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("ADSGATE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = get("ADSGATE_LOG_FORMAT") {
            self.logging.format = match v.to_ascii_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                _ => return Err(invalid("ADSGATE_LOG_FORMAT", &v, "expected text or json")),
            };
        }
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        let cache = &self.cache;
        if cache.effective_backend() != CacheBackendKind::None && cache.max_entries == 0 {
            return Err(invalid(
                "cache.max_entries",
                &cache.max_entries.to_string(),
                "max_entries must be greater than 0",
            ));
        }
        if cache.effective_backend() == CacheBackendKind::Lmdb {
            if cache.lmdb_path.is_none() {
                return Err(ConfigError::MissingRequired {
                    field: "cache.lmdb_path".to_string(),
                });
            }
            if cache.lmdb_max_size_mb == 0 {
                return Err(invalid(
                    "cache.lmdb_max_size_mb",
                    "0",
                    "lmdb_max_size_mb must be greater than 0",
                ));
            }
        }
        for (class, ttl) in cache.ttl.iter() {
            if ttl.is_zero() {
                return Err(invalid(
                    &format!("cache.ttl_ms.{}", class),
                    "0",
                    "ttl must be positive",
                ));
            }
        }

        let rl = &self.rate_limit;
        if rl.requests_per_minute == 0 {
            return Err(invalid(
                "rate_limit.requests_per_minute",
                "0",
                "requests_per_minute must be greater than 0",
            ));
        }
        if rl.burst_size == 0 {
            return Err(invalid(
                "rate_limit.burst_size",
                "0",
                "burst_size must be at least 1",
            ));
        }

        let retry = &self.retry;
        if retry.max_attempts == 0 {
            return Err(invalid(
                "retry.max_attempts",
                "0",
                "max_attempts must be at least 1",
            ));
        }
        if retry.initial_delay > retry.max_delay {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("retry.initial_delay_ms={}", retry.initial_delay.as_millis()),
                option_b: format!("retry.max_delay_ms={}", retry.max_delay.as_millis()),
            });
        }

        if self.batch.concurrency_limit == 0 {
            return Err(invalid(
                "batch.concurrency_limit",
                "0",
                "concurrency_limit must be at least 1",
            ));
        }
        if self.batch.max_items == 0 {
            return Err(invalid(
                "batch.max_items",
                "0",
                "max_items must be at least 1",
            ));
        }

        if self.request_timeout.is_zero() {
            return Err(invalid(
                "request_timeout_ms",
                "0",
                "request_timeout must be positive",
            ));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "logging.level".to_string(),
            });
        }

        Ok(())
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_bool(field: &str, value: &str) -> ConfigResult<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(invalid(field, value, "expected a boolean")),
    }
}

fn parse_num<T: std::str::FromStr>(field: &str, value: &str) -> ConfigResult<T> {
    value
        .parse()
        .map_err(|_| invalid(field, value, "expected a non-negative integer"))
}

fn parse_ms(field: &str, value: &str) -> ConfigResult<Duration> {
    parse_num::<u64>(field, value).map(Duration::from_millis)
}
