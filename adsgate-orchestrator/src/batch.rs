//! Non-transactional bulk execution.
//!
//! Every item runs on its own. A failed item never aborts pending siblings
//! and never undoes completed ones. Output order always matches input order,
//! whatever order the items finish in.

use std::sync::Arc;

use adsgate_cache::{CacheLayer, InvalidationScope};
use adsgate_core::{AdsResult, BatchConfig, ClassifiedError, ErrorClass};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Work applied to each item of a batch.
#[async_trait]
pub trait BatchOperation<I>: Send + Sync
where
    I: Send + Sync,
{
    type Output: Send;

    /// Checks that need no round trip. A dry run stops here.
    fn validate(&self, _item: &I) -> AdsResult<()> {
        Ok(())
    }

    async fn execute(&self, item: &I) -> AdsResult<Self::Output>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Items in flight at once; 1 runs strictly in order.
    pub concurrency_limit: usize,
    /// Validate only; nothing is applied and no quota is spent.
    pub dry_run: bool,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            concurrency_limit: config.concurrency_limit,
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.concurrency_limit = limit;
        self
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self::from_config(&BatchConfig::default())
    }
}

/// Why an item failed, with enough detail to resubmit just that item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub class: ErrorClass,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_path: Option<String>,
    pub attempts: u32,
}

impl From<ClassifiedError> for ItemFailure {
    fn from(e: ClassifiedError) -> Self {
        Self {
            class: e.class,
            message: e.message,
            code: e.code,
            field_path: e.field_path,
            attempts: e.attempts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum ItemState<T> {
    Pending,
    Succeeded(T),
    /// Passed validation in a dry run; not applied.
    WouldSucceed,
    Failed(ItemFailure),
}

impl<T> ItemState<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, ItemState::Succeeded(_) | ItemState::WouldSucceed)
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match self {
            ItemState::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchItem<I, T> {
    /// Position in the caller's input.
    pub index: usize,
    pub input: I,
    pub state: ItemState<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    AllSucceeded,
    Partial,
    AllFailed,
}

impl BatchStatus {
    /// An empty batch counts as all succeeded.
    pub fn derive(succeeded: usize, failed: usize) -> Self {
        if failed == 0 {
            BatchStatus::AllSucceeded
        } else if succeeded == 0 {
            BatchStatus::AllFailed
        } else {
            BatchStatus::Partial
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult<I, T> {
    pub batch_id: Uuid,
    pub dry_run: bool,
    pub status: BatchStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<BatchItem<I, T>>,
}

impl<I, T> BatchResult<I, T> {
    fn new(batch_id: Uuid, dry_run: bool, items: Vec<BatchItem<I, T>>) -> Self {
        let succeeded = items.iter().filter(|i| i.state.is_success()).count();
        let failed = items.len() - succeeded;
        Self {
            batch_id,
            dry_run,
            status: BatchStatus::derive(succeeded, failed),
            succeeded,
            failed,
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn failed_items(&self) -> impl Iterator<Item = &BatchItem<I, T>> {
        self.items.iter().filter(|i| i.state.failure().is_some())
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed_items().map(|i| i.index).collect()
    }

    /// Inputs of the failed items, in order, ready to resubmit.
    pub fn failed_inputs(&self) -> Vec<&I> {
        self.failed_items().map(|i| &i.input).collect()
    }
}

/// Runs batches and invalidates the cache for whatever they changed.
pub struct BatchCoordinator {
    max_items: usize,
    cache: Option<Arc<CacheLayer>>,
}

impl BatchCoordinator {
    pub fn new(config: &BatchConfig) -> Self {
        Self {
            max_items: config.max_items,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<CacheLayer>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run `operation` over every item.
    ///
    /// Only an oversized batch fails as a whole; item failures are reported
    /// in the result. When anything was applied, cache entries within
    /// `scope` are invalidated before returning.
    pub async fn run<I, O>(
        &self,
        scope: &InvalidationScope,
        items: Vec<I>,
        operation: &O,
        options: BatchOptions,
    ) -> AdsResult<BatchResult<I, O::Output>>
    where
        I: Send + Sync,
        O: BatchOperation<I>,
    {
        if items.len() > self.max_items {
            return Err(ClassifiedError::validation(format!(
                "batch of {} items exceeds the limit of {}",
                items.len(),
                self.max_items
            ))
            .with_code("BATCH_TOO_LARGE")
            .with_field_path("items"));
        }

        let batch_id = Uuid::now_v7();
        let dry_run = options.dry_run;

        let pending: Vec<_> = items
            .iter()
            .map(|item| run_item(operation, item, dry_run))
            .collect();
        let states: Vec<ItemState<O::Output>> = stream::iter(pending)
            .buffered(options.concurrency_limit.max(1))
            .collect()
            .await;

        let items = items
            .into_iter()
            .zip(states)
            .enumerate()
            .map(|(index, (input, state))| BatchItem {
                index,
                input,
                state,
            })
            .collect();
        let result = BatchResult::new(batch_id, dry_run, items);

        info!(
            batch_id = %batch_id,
            account = %scope.account,
            total = result.len(),
            succeeded = result.succeeded,
            failed = result.failed,
            status = ?result.status,
            dry_run,
            "batch completed"
        );

        if !dry_run && result.succeeded > 0 {
            self.invalidate(scope).await;
        }

        Ok(result)
    }

    async fn invalidate(&self, scope: &InvalidationScope) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(e) = cache.invalidate_scope(scope).await {
            // Stale entries must not survive a write; drop everything.
            error!(account = %scope.account, error = %e, "scoped invalidation failed, clearing cache");
            if let Err(e) = cache.clear().await {
                warn!(error = %e, "cache clear failed");
            }
        }
    }
}

async fn run_item<I, O>(operation: &O, item: &I, dry_run: bool) -> ItemState<O::Output>
where
    I: Send + Sync,
    O: BatchOperation<I>,
{
    if let Err(e) = operation.validate(item) {
        return ItemState::Failed(e.into());
    }
    if dry_run {
        return ItemState::WouldSucceed;
    }
    match operation.execute(item).await {
        Ok(output) => ItemState::Succeeded(output),
        Err(e) => ItemState::Failed(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_cache::{CacheKey, MemoryCacheBackend};
    use adsgate_core::{AccountId, ResourceClass};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Fails the items whose value is listed, with the given class.
    struct Scripted {
        fail: Vec<(u32, ErrorClass)>,
        executed: AtomicUsize,
    }

    impl Scripted {
        fn new(fail: Vec<(u32, ErrorClass)>) -> Self {
            Self {
                fail,
                executed: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl BatchOperation<u32> for Scripted {
        type Output = u32;

        fn validate(&self, item: &u32) -> AdsResult<()> {
            if *item == 0 {
                return Err(ClassifiedError::validation("zero is not allowed"));
            }
            Ok(())
        }

        async fn execute(&self, item: &u32) -> AdsResult<u32> {
            self.executed.fetch_add(1, Ordering::SeqCst);
            // Later items finish first.
            tokio::time::sleep(Duration::from_millis(u64::from(10u32.saturating_sub(*item)))).await;
            match self.fail.iter().find(|(n, _)| n == item) {
                Some((_, class)) => Err(ClassifiedError::new(*class, format!("item {} failed", item))),
                None => Ok(item * 10),
            }
        }
    }

    /// Records how many items are executing at once.
    #[derive(Default)]
    struct Gauge {
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl BatchOperation<u32> for Gauge {
        type Output = u32;

        async fn execute(&self, item: &u32) -> AdsResult<u32> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(*item)
        }
    }

    fn scope() -> InvalidationScope {
        InvalidationScope::account(AccountId::parse("1234567890").unwrap())
    }

    fn coordinator() -> BatchCoordinator {
        BatchCoordinator::new(&BatchConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_preserves_order() {
        let op = Scripted::new(vec![(2, ErrorClass::Validation), (4, ErrorClass::Fatal)]);
        let result = coordinator()
            .run(&scope(), vec![1, 2, 3, 4, 5], &op, BatchOptions::default().with_concurrency(5))
            .await
            .unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.succeeded, 3);
        assert_eq!(result.failed, 2);
        assert_eq!(result.status, BatchStatus::Partial);
        assert_eq!(result.failed_indices(), vec![1, 3]);
        assert_eq!(result.failed_inputs(), vec![&2, &4]);

        let classes: Vec<ErrorClass> = result
            .failed_items()
            .filter_map(|i| i.state.failure().map(|f| f.class))
            .collect();
        assert_eq!(classes, vec![ErrorClass::Validation, ErrorClass::Fatal]);

        let inputs: Vec<u32> = result.items.iter().map(|i| i.input).collect();
        assert_eq!(inputs, vec![1, 2, 3, 4, 5]);
        assert_eq!(result.items[4].state, ItemState::Succeeded(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_bounds_items_in_flight() {
        let gauge = Gauge::default();
        let result = coordinator()
            .run(&scope(), (1..=12u32).collect(), &gauge, BatchOptions::default().with_concurrency(3))
            .await
            .unwrap();

        assert_eq!(result.succeeded, 12);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 3);
        assert_eq!(gauge.running.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_of_one_runs_sequentially() {
        let gauge = Gauge::default();
        let started = tokio::time::Instant::now();
        let result = coordinator()
            .run(&scope(), (1..=5u32).collect(), &gauge, BatchOptions::default().with_concurrency(1))
            .await
            .unwrap();

        assert_eq!(result.succeeded, 5);
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
        // Five 20ms items back to back.
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_derivation() {
        let all_fail = Scripted::new(vec![(1, ErrorClass::Auth), (2, ErrorClass::Auth)]);
        let result = coordinator()
            .run(&scope(), vec![1, 2], &all_fail, BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, BatchStatus::AllFailed);

        let ok = Scripted::new(vec![]);
        let result = coordinator()
            .run(&scope(), vec![1, 2], &ok, BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.status, BatchStatus::AllSucceeded);

        let empty = coordinator()
            .run(&scope(), Vec::<u32>::new(), &ok, BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(empty.status, BatchStatus::AllSucceeded);
        assert!(empty.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dry_run_executes_nothing() {
        let op = Scripted::new(vec![(3, ErrorClass::Fatal)]);
        let result = coordinator()
            .run(&scope(), vec![0, 3, 5], &op, BatchOptions::default().with_dry_run(true))
            .await
            .unwrap();

        assert_eq!(op.executed.load(Ordering::SeqCst), 0);
        assert!(result.dry_run);
        assert_eq!(result.items[0].state.failure().map(|f| f.class), Some(ErrorClass::Validation));
        assert_eq!(result.items[1].state, ItemState::WouldSucceed);
        assert_eq!(result.items[2].state, ItemState::WouldSucceed);
        assert_eq!(result.status, BatchStatus::Partial);
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_before_running() {
        let op = Scripted::new(vec![]);
        let coordinator = BatchCoordinator::new(&BatchConfig {
            concurrency_limit: 2,
            max_items: 3,
        });
        let err = coordinator
            .run(&scope(), vec![1, 2, 3, 4], &op, BatchOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Validation);
        assert_eq!(err.code.as_deref(), Some("BATCH_TOO_LARGE"));
        assert_eq!(op.executed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_invalidates_scope() {
        let cache = Arc::new(CacheLayer::new(Arc::new(MemoryCacheBackend::new(16))));
        let account = AccountId::parse("1234567890").unwrap();
        let key = CacheKey::new(account.clone(), ResourceClass::Campaign, "list", &json!({}));
        let _: u32 = cache
            .fetch(&key, Duration::from_secs(600), || async { Ok(1) })
            .await
            .unwrap();

        let coordinator = coordinator().with_cache(cache.clone());
        let op = Scripted::new(vec![]);

        // Dry runs leave the cache alone.
        coordinator
            .run(&scope(), vec![1], &op, BatchOptions::default().with_dry_run(true))
            .await
            .unwrap();
        assert_eq!(cache.stats().await.entry_count, 1);

        coordinator
            .run(&scope(), vec![1], &op, BatchOptions::default())
            .await
            .unwrap();
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[test]
    fn test_result_serializes() {
        let result: BatchResult<u32, u32> = BatchResult::new(
            Uuid::now_v7(),
            false,
            vec![
                BatchItem {
                    index: 0,
                    input: 1,
                    state: ItemState::Succeeded(10),
                },
                BatchItem {
                    index: 1,
                    input: 2,
                    state: ItemState::Failed(ClassifiedError::quota("slow down").into()),
                },
            ],
        );
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "PARTIAL");
        assert_eq!(value["items"][0]["state"]["state"], "succeeded");
        assert_eq!(value["items"][1]["state"]["detail"]["class"], "QUOTA");
    }
}
