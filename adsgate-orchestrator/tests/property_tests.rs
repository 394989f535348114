//! Property tests for admission control, batch ordering and backoff bounds.

use std::sync::Arc;
use std::time::Duration;

use adsgate_cache::InvalidationScope;
use adsgate_core::{
    AdmissionMode, AdsResult, BatchConfig, ClassifiedError, CredentialId, ErrorClass,
    RateLimitConfig,
};
use adsgate_orchestrator::{
    BatchCoordinator, BatchOperation, BatchOptions, BatchStatus, ItemState, Orchestrator,
    RateLimiter, RetryCoordinator,
};
use adsgate_test_utils::fixtures::{account, test_config};
use adsgate_test_utils::generators::{arb_mutate_operation, arb_retry_policy};
use adsgate_test_utils::{MockCredentialProvider, MockRemoteClient};
use async_trait::async_trait;
use proptest::prelude::*;
use tokio::runtime::{Builder, Runtime};

fn paused_runtime() -> Runtime {
    Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

// ============================================================================
// TOKEN BUCKET
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// C immediate acquires succeed, the next fails; one refill interval
    /// later exactly one more is admitted.
    #[test]
    fn prop_bucket_admits_capacity_then_one_per_interval(
        burst in 1u32..=30,
        rpm in 1u32..=1_200,
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let limiter = RateLimiter::new(RateLimitConfig {
                enabled: true,
                requests_per_minute: rpm,
                burst_size: burst,
                mode: AdmissionMode::FailFast,
                max_wait: Duration::from_secs(60),
            });
            let cred = CredentialId::new("prop");
            let acct = account();

            for _ in 0..burst {
                prop_assert!(limiter.acquire(&cred, &acct).await.is_ok());
            }
            let err = limiter.acquire(&cred, &acct).await.unwrap_err();
            prop_assert_eq!(err.class, ErrorClass::Quota);
            let interval = err.retry_after.unwrap();
            prop_assert!(interval.as_secs_f64() <= 60.0 / f64::from(rpm) + 1e-6);

            let state = limiter.snapshot(&cred, &acct).unwrap();
            prop_assert!(state.tokens >= 0.0 && state.tokens <= state.capacity);
            prop_assert_eq!(state.capacity, f64::from(burst));

            tokio::time::advance(interval).await;
            prop_assert!(limiter.acquire(&cred, &acct).await.is_ok());
            prop_assert!(limiter.acquire(&cred, &acct).await.is_err());
            Ok(())
        })?;
    }

    /// However requests arrive, tokens never exceed capacity.
    #[test]
    fn prop_tokens_never_exceed_capacity(
        burst in 1u32..=20,
        gaps_ms in prop::collection::vec(0u64..5_000, 1..40),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let limiter = RateLimiter::new(RateLimitConfig {
                enabled: true,
                requests_per_minute: 120,
                burst_size: burst,
                mode: AdmissionMode::FailFast,
                max_wait: Duration::ZERO,
            });
            let cred = CredentialId::new("prop");
            let acct = account();

            for gap in gaps_ms {
                tokio::time::advance(Duration::from_millis(gap)).await;
                let _ = limiter.acquire(&cred, &acct).await;
                let state = limiter.snapshot(&cred, &acct).unwrap();
                prop_assert!(state.tokens >= 0.0);
                prop_assert!(state.tokens <= state.capacity);
            }
            Ok(())
        })?;
    }
}

// ============================================================================
// BATCH ORDERING
// ============================================================================

/// Sleeps for the item's delay, then fails if the item is marked.
struct DelayedItems;

#[async_trait]
impl BatchOperation<(u64, bool)> for DelayedItems {
    type Output = u64;

    async fn execute(&self, item: &(u64, bool)) -> AdsResult<u64> {
        let (delay_ms, fail) = *item;
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        if fail {
            Err(ClassifiedError::validation("marked to fail"))
        } else {
            Ok(delay_ms)
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Output order and indices match input order regardless of completion
    /// order and concurrency.
    #[test]
    fn prop_batch_preserves_order(
        items in prop::collection::vec((0u64..500, any::<bool>()), 0..30),
        concurrency in 1usize..8,
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let coordinator = BatchCoordinator::new(&BatchConfig::default());
            let scope = InvalidationScope::account(account());
            let options = BatchOptions::default().with_concurrency(concurrency);

            let result = coordinator
                .run(&scope, items.clone(), &DelayedItems, options)
                .await
                .unwrap();

            prop_assert_eq!(result.len(), items.len());
            prop_assert_eq!(result.succeeded + result.failed, items.len());
            for (position, item) in result.items.iter().enumerate() {
                prop_assert_eq!(item.index, position);
                prop_assert_eq!(item.input, items[position]);
                prop_assert_eq!(item.state.is_success(), !items[position].1);
            }

            let expected_failed: Vec<usize> = items
                .iter()
                .enumerate()
                .filter(|(_, (_, fail))| *fail)
                .map(|(i, _)| i)
                .collect();
            prop_assert_eq!(result.failed_indices(), expected_failed.clone());

            let expected_status = if expected_failed.is_empty() {
                BatchStatus::AllSucceeded
            } else if expected_failed.len() == items.len() {
                BatchStatus::AllFailed
            } else {
                BatchStatus::Partial
            };
            prop_assert_eq!(result.status, expected_status);
            Ok(())
        })?;
    }
}

// ============================================================================
// MUTATION PRE-VALIDATION
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Well-formed mutations all pass local validation in a dry run, and a
    /// dry run never reaches the remote.
    #[test]
    fn prop_well_formed_mutations_would_succeed(
        operations in prop::collection::vec(arb_mutate_operation(), 1..20),
    ) {
        let rt = paused_runtime();
        rt.block_on(async {
            let client = Arc::new(MockRemoteClient::new());
            let orchestrator = Orchestrator::new(
                test_config(),
                client.clone(),
                Arc::new(MockCredentialProvider::new()),
            )
            .unwrap();

            let result = orchestrator
                .mutate(&account(), operations.clone(), true)
                .await
                .unwrap();

            prop_assert!(result.dry_run);
            prop_assert_eq!(result.len(), operations.len());
            prop_assert_eq!(result.status, BatchStatus::AllSucceeded);
            for item in &result.items {
                prop_assert_eq!(&item.state, &ItemState::WouldSucceed);
            }
            prop_assert_eq!(client.mutate_calls(), 0);
            Ok(())
        })?;
    }
}

// ============================================================================
// BACKOFF BOUNDS
// ============================================================================

proptest! {
    /// Delays never exceed `max_delay`, and a remote hint is honored up to
    /// that cap.
    #[test]
    fn prop_backoff_is_bounded(
        policy in arb_retry_policy(),
        n in 1u32..12,
        hint_ms in prop::option::of(0u64..120_000),
    ) {
        let coordinator = RetryCoordinator::new();
        let hint = hint_ms.map(Duration::from_millis);
        let delay = coordinator.backoff_delay(&policy, n, hint);

        prop_assert!(delay <= policy.max_delay);
        if let Some(hint) = hint {
            prop_assert!(delay >= hint.min(policy.max_delay));
        }
        if !policy.jitter {
            let expected = hint
                .map_or(policy.delay_for(n), |h| policy.delay_for(n).max(h))
                .min(policy.max_delay);
            prop_assert_eq!(delay, expected);
        }
    }
}
