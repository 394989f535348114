//! Failure classification and bounded backoff.
//!
//! Only Quota and Transient failures are retried. Auth, Validation and Fatal
//! propagate on first occurrence. Whatever finally surfaces carries the
//! number of attempts made and the time spent.

use std::future::Future;
use std::time::Duration;

use adsgate_core::{
    AdsResult, ClassifiedError, Credential, CredentialId, CredentialProvider, ErrorClass,
    RetryPolicy,
};
use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, warn};

/// Spread applied to each delay when the policy asks for jitter.
const JITTER_RATIO: f64 = 0.2;

/// A failed attempt and the credential it was made with, if any.
struct AttemptFailure {
    error: ClassifiedError,
    credential: Option<CredentialId>,
}

impl From<ClassifiedError> for AttemptFailure {
    fn from(error: ClassifiedError) -> Self {
        Self {
            error,
            credential: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryCoordinator;

impl RetryCoordinator {
    pub fn new() -> Self {
        Self
    }

    /// Run `operation` under `policy`.
    pub async fn execute<T, F, Fut>(&self, policy: &RetryPolicy, mut operation: F) -> AdsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AdsResult<T>>,
    {
        self.run(policy, None, || {
            let attempt = operation();
            async move { attempt.await.map_err(AttemptFailure::from) }
        })
        .await
    }

    /// Like [`execute`](Self::execute), fetching a credential from
    /// `provider` before every attempt. An Auth failure is reported back to
    /// the provider against the credential that was rejected.
    pub async fn execute_authenticated<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        provider: &dyn CredentialProvider,
        operation: F,
    ) -> AdsResult<T>
    where
        F: Fn(Credential) -> Fut,
        Fut: Future<Output = AdsResult<T>>,
    {
        let operation = &operation;
        self.run(policy, Some(provider), || async move {
            let credential = match provider.valid_credential().await {
                Ok(credential) => credential,
                Err(error) => return Err(AttemptFailure::from(error)),
            };
            let id = credential.id.clone();
            operation(credential).await.map_err(|error| AttemptFailure {
                error,
                credential: Some(id),
            })
        })
        .await
    }

    async fn run<T, F, Fut>(
        &self,
        policy: &RetryPolicy,
        provider: Option<&dyn CredentialProvider>,
        mut attempt_once: F,
    ) -> AdsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptFailure>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let started = Instant::now();
        let mut attempt = 1u32;

        loop {
            let failure = match attempt_once().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(failure) => failure,
            };
            let AttemptFailure { error: err, credential } = failure;

            if err.class == ErrorClass::Auth {
                if let (Some(provider), Some(id)) = (provider, credential.as_ref()) {
                    provider.report_auth_failure(id);
                }
                warn!(credential = ?credential, error = %err, "authentication rejected");
            }

            if !err.is_retryable() {
                return Err(err.with_attempts(attempt, started.elapsed()));
            }

            if attempt >= max_attempts {
                let elapsed = started.elapsed();
                error!(
                    attempts = attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    class = %err.class,
                    error = %err,
                    "retries exhausted"
                );
                return Err(err.with_attempts(attempt, elapsed));
            }

            let delay = self.backoff_delay(policy, attempt, err.retry_after);
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                class = %err.class,
                error = %err,
                "retrying after failure"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Delay before retry `n` (n >= 1).
    ///
    /// `initial * growth(n)` capped at `max_delay`, spread by ±20% when the
    /// policy has jitter. A remote `retry_after` hint raises the delay but
    /// never past `max_delay`.
    pub fn backoff_delay(
        &self,
        policy: &RetryPolicy,
        n: u32,
        retry_after: Option<Duration>,
    ) -> Duration {
        let mut delay = policy.delay_for(n);
        if policy.jitter {
            let factor = 1.0 + rand::rng().random_range(-JITTER_RATIO..=JITTER_RATIO);
            delay = delay.mul_f64(factor);
        }
        if let Some(hint) = retry_after {
            delay = delay.max(hint);
        }
        delay.min(policy.max_delay)
    }
}
