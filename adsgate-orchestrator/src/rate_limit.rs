//! Client-side admission control.
//!
//! One token bucket per (credential, account) pair. Buckets refill lazily
//! from elapsed time at each acquire; there is no background timer and no
//! persistence, so state resets with the process.
//!
//! A bucket that has refilled completely carries no information, so once
//! the map grows past a threshold such buckets are dropped and recreated
//! full on next use. Rotated credentials therefore do not accumulate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adsgate_core::{
    AccountId, AdmissionMode, AdsResult, ClassifiedError, CredentialId, RateLimitConfig,
};
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Float slack when comparing token counts.
const TOKEN_EPSILON: f64 = 1e-9;

/// Tracked pairs before idle buckets are pruned.
const PRUNE_THRESHOLD: usize = 1024;

type BucketKey = (CredentialId, AccountId);

/// Observable state of one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenBucketState {
    /// Burst size.
    pub capacity: f64,
    /// Tokens available now, `0 <= tokens <= capacity`.
    pub tokens: f64,
    pub last_refill: Instant,
    /// Tokens per second.
    pub refill_rate: f64,
}

#[derive(Debug)]
struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn full(capacity: f64, refill_rate: f64, now: Instant) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_rate,
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is projected to exist.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            return Ok(());
        }
        if self.refill_rate <= 0.0 {
            return Err(Duration::MAX);
        }
        let deficit = 1.0 - self.tokens;
        let nanos = (deficit / self.refill_rate * 1e9).ceil();
        Err(Duration::from_nanos(nanos.min(u64::MAX as f64) as u64))
    }

    fn is_full(&self) -> bool {
        self.tokens + TOKEN_EPSILON >= self.capacity
    }

    fn state(&self) -> TokenBucketState {
        TokenBucketState {
            capacity: self.capacity,
            tokens: self.tokens,
            last_refill: self.last_refill,
            refill_rate: self.refill_rate,
        }
    }
}

/// Proof of admission. Tokens are consumed on acquire, so releasing is a
/// no-op kept for callers that pair acquire with release.
#[derive(Debug)]
pub struct Permit {
    waited: Duration,
}

impl Permit {
    /// How long the caller was held before admission.
    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn release(self) {}
}

/// Token-bucket rate limiter keyed by (credential, account).
pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<BucketKey, Arc<Mutex<TokenBucket>>>,
    /// Map size that triggers the next prune.
    prune_at: AtomicUsize,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
            prune_at: AtomicUsize::new(PRUNE_THRESHOLD),
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn bucket(&self, credential: &CredentialId, account: &AccountId) -> Arc<Mutex<TokenBucket>> {
        self.buckets
            .entry((credential.clone(), account.clone()))
            .or_insert_with(|| {
                Arc::new(Mutex::new(TokenBucket::full(
                    f64::from(self.config.burst_size.max(1)),
                    self.config.refill_rate(),
                    Instant::now(),
                )))
            })
            .clone()
    }

    /// Admit one request for `account` under `credential`.
    ///
    /// In [`AdmissionMode::Wait`] the caller is suspended until a token is
    /// projected to arrive, failing with Quota if that lies beyond
    /// `max_wait`. In [`AdmissionMode::FailFast`] an empty bucket fails at
    /// once. Dropping the returned future while it waits leaves the bucket
    /// untouched.
    pub async fn acquire(&self, credential: &CredentialId, account: &AccountId) -> AdsResult<Permit> {
        if !self.config.enabled {
            return Ok(Permit {
                waited: Duration::ZERO,
            });
        }

        if self.buckets.len() > self.prune_at.load(Ordering::Relaxed) {
            self.prune_idle();
            let next = (self.buckets.len() * 2).max(PRUNE_THRESHOLD);
            self.prune_at.store(next, Ordering::Relaxed);
        }

        let bucket = self.bucket(credential, account);
        let started = Instant::now();

        loop {
            let outcome = {
                let mut guard = bucket
                    .lock()
                    .map_err(|_| ClassifiedError::fatal("rate limiter state poisoned"))?;
                guard.try_take(Instant::now())
            };

            let wait = match outcome {
                Ok(()) => {
                    let waited = started.elapsed();
                    trace!(account = %account, waited_ms = waited.as_millis() as u64, "permit granted");
                    return Ok(Permit { waited });
                }
                Err(wait) => wait,
            };

            let waited = started.elapsed();
            let over_budget = waited.saturating_add(wait) > self.config.max_wait;
            if self.config.mode == AdmissionMode::FailFast || over_budget {
                debug!(
                    account = %account,
                    credential = %credential,
                    retry_after_ms = wait.as_millis() as u64,
                    "local rate limit exhausted"
                );
                return Err(ClassifiedError::quota(format!(
                    "local rate limit of {} requests/minute reached for account {}",
                    self.config.requests_per_minute, account
                ))
                .with_code("LOCAL_RATE_LIMIT")
                .with_retry_after(wait));
            }

            tokio::time::sleep(wait).await;
        }
    }

    /// Current state of a bucket, refilled to now. `None` if the pair has
    /// never been seen.
    pub fn snapshot(&self, credential: &CredentialId, account: &AccountId) -> Option<TokenBucketState> {
        let bucket = self
            .buckets
            .get(&(credential.clone(), account.clone()))?
            .value()
            .clone();
        let mut guard = bucket.lock().ok()?;
        guard.refill(Instant::now());
        Some(guard.state())
    }

    /// Drop buckets that have refilled completely and that no caller is
    /// holding. Returns how many were dropped.
    pub fn prune_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| {
            // The map holds one reference; more means an acquire is using it.
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            match bucket.lock() {
                Ok(mut guard) => {
                    guard.refill(now);
                    !guard.is_full()
                }
                Err(_) => false,
            }
        });
        let pruned = before.saturating_sub(self.buckets.len());
        if pruned > 0 {
            debug!(pruned, remaining = self.buckets.len(), "pruned idle rate limit buckets");
        }
        pruned
    }

    /// Number of tracked (credential, account) pairs.
    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}
