//! The orchestration context.
//!
//! One [`Orchestrator`] is built per server lifetime and handed to every
//! tool handler. It owns the cache, the rate limiter and the coordinators;
//! nothing here is global.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use adsgate_cache::{CacheKey, CacheLayer, InvalidationScope};
use adsgate_core::{
    AccountId, AdsResult, ClassifiedError, CredentialProvider, MutateOperation, MutateResult,
    OrchestratorConfig, RemoteApiClient, RemoteFailure, ResourceClass, ResourceRequest, Row,
};
use adsgate_query::{QueryComplexity, QueryValidator};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::batch::{BatchCoordinator, BatchOperation, BatchOptions, BatchResult};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryCoordinator;

/// A structured read built by a tool handler. Cached under its account,
/// resource class, operation name and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRequest {
    pub account: AccountId,
    pub class: ResourceClass,
    /// Logical operation name, e.g. `list_campaigns`.
    pub operation: String,
    pub query: String,
    /// Caller parameters that shaped `query`.
    pub params: Value,
}

impl ReadRequest {
    pub fn new(
        account: AccountId,
        class: ResourceClass,
        operation: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            account,
            class,
            operation: operation.into(),
            query: query.into(),
            params: Value::Null,
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(
            self.account.clone(),
            self.class,
            self.operation.clone(),
            &json!({ "query": self.query, "params": self.params }),
        )
    }
}

/// Rows of a validated custom query with the validator's advice.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryOutcome {
    pub rows: Vec<Row>,
    pub complexity: QueryComplexity,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

pub type MutationBatch = BatchResult<MutateOperation, MutateResult>;

pub struct Orchestrator {
    config: OrchestratorConfig,
    client: Arc<dyn RemoteApiClient>,
    credentials: Arc<dyn CredentialProvider>,
    cache: Arc<CacheLayer>,
    limiter: RateLimiter,
    retry: RetryCoordinator,
    batches: BatchCoordinator,
    validator: QueryValidator,
}

impl Orchestrator {
    /// Validate the configuration and build the context, opening the
    /// configured cache backend.
    pub fn new(
        config: OrchestratorConfig,
        client: Arc<dyn RemoteApiClient>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> AdsResult<Self> {
        config.validate()?;
        let cache = Arc::new(CacheLayer::from_config(&config.cache)?);
        Ok(Self::with_cache(config, client, credentials, cache))
    }

    /// Build the context around an existing cache layer.
    pub fn with_cache(
        config: OrchestratorConfig,
        client: Arc<dyn RemoteApiClient>,
        credentials: Arc<dyn CredentialProvider>,
        cache: Arc<CacheLayer>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.clone());
        let batches = BatchCoordinator::new(&config.batch).with_cache(Arc::clone(&cache));
        info!(
            cache_backend = cache.backend_name(),
            requests_per_minute = config.rate_limit.requests_per_minute,
            burst_size = config.rate_limit.burst_size,
            max_attempts = config.retry.max_attempts,
            "orchestrator ready"
        );
        Self {
            config,
            client,
            credentials,
            cache,
            limiter,
            retry: RetryCoordinator::new(),
            batches,
            validator: QueryValidator::new(),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Structured read through the cache.
    pub async fn read(&self, request: &ReadRequest) -> AdsResult<Vec<Row>> {
        if request.query.trim().is_empty() {
            return Err(ClassifiedError::validation("query cannot be empty").with_field_path("query"));
        }
        let key = request.cache_key();
        let ttl = self.config.cache.ttl_for(request.class);
        self.cache
            .fetch(&key, ttl, || self.query_remote(&request.account, &request.query))
            .await
    }

    /// Validated free-form query. Never cached; a rejected query spends no
    /// quota.
    pub async fn run_query(&self, account: &AccountId, text: &str) -> AdsResult<QueryOutcome> {
        let validated = self.validator.validate(text).into_result()?;
        for warning in &validated.warnings {
            debug!(account = %account, warning = %warning, "query warning");
        }

        let rows = self.query_remote(account, &validated.raw).await?;
        Ok(QueryOutcome {
            rows,
            complexity: validated.complexity,
            warnings: validated.warnings,
            suggestions: validated.suggestions,
        })
    }

    /// Apply mutations item by item. See [`BatchCoordinator::run`].
    pub async fn mutate(
        &self,
        account: &AccountId,
        operations: Vec<MutateOperation>,
        dry_run: bool,
    ) -> AdsResult<MutationBatch> {
        let scope =
            InvalidationScope::classes(account.clone(), operations.iter().map(|op| op.resource));
        let item_op = RemoteMutation {
            orchestrator: self,
            account,
        };
        let options = BatchOptions::from_config(&self.config.batch).with_dry_run(dry_run);

        let result = self
            .batches
            .run(&scope, operations, &item_op, options)
            .await?;

        info!(
            target: "adsgate::audit",
            account = %account,
            batch_id = %result.batch_id,
            items = result.len(),
            succeeded = result.succeeded,
            failed = result.failed,
            status = ?result.status,
            dry_run,
            "mutation batch"
        );
        Ok(result)
    }

    async fn query_remote(&self, account: &AccountId, query: &str) -> AdsResult<Vec<Row>> {
        let request = ResourceRequest::new(account.clone(), query);
        let request = &request;
        let timeout = self.config.request_timeout;

        let call = self.retry.execute_authenticated(
            &self.config.retry,
            self.credentials.as_ref(),
            |credential| async move {
                let _permit = self.limiter.acquire(&credential.id, account).await?;
                with_timeout(timeout, self.client.query(&credential, request)).await
            },
        );
        tracked("query", account, call).await
    }

    async fn mutate_remote(
        &self,
        account: &AccountId,
        operation: &MutateOperation,
    ) -> AdsResult<MutateResult> {
        let timeout = self.config.request_timeout;
        let operations = std::slice::from_ref(operation);

        let call = self.retry.execute_authenticated(
            &self.config.retry,
            self.credentials.as_ref(),
            |credential| async move {
                let _permit = self.limiter.acquire(&credential.id, account).await?;
                with_timeout(timeout, self.client.mutate(&credential, account, operations)).await
            },
        );
        let mut results = tracked("mutate", account, call).await?;

        if results.is_empty() {
            warn!(account = %account, resource = %operation.resource, "mutate returned no result");
            return Err(ClassifiedError::fatal("remote accepted the mutation but returned no result")
                .with_code("EMPTY_MUTATE_RESPONSE"));
        }
        Ok(results.swap_remove(0))
    }
}

/// Await a remote operation (retries included) and log how long it took
/// and how it ended. The result passes through untouched.
async fn tracked<T, F>(operation: &'static str, account: &AccountId, call: F) -> AdsResult<T>
where
    F: Future<Output = AdsResult<T>>,
{
    let started = Instant::now();
    let result = call.await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match &result {
        Ok(_) => info!(
            target: "adsgate::perf",
            operation,
            account = %account,
            duration_ms,
            success = true,
            "operation completed"
        ),
        Err(err) => warn!(
            target: "adsgate::perf",
            operation,
            account = %account,
            duration_ms,
            success = false,
            class = err.class.as_str(),
            attempts = err.attempts,
            "operation failed"
        ),
    }
    result
}

/// Bound a remote call; a timeout is a Transient failure.
async fn with_timeout<T, F>(limit: Duration, call: F) -> AdsResult<T>
where
    F: Future<Output = Result<T, RemoteFailure>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(failure)) => Err(failure.into()),
        Err(_) => Err(RemoteFailure::timeout(limit).into()),
    }
}

/// One mutation item applied through the limiter, retry and timeout.
struct RemoteMutation<'a> {
    orchestrator: &'a Orchestrator,
    account: &'a AccountId,
}

#[async_trait]
impl<'a> BatchOperation<MutateOperation> for RemoteMutation<'a> {
    type Output = MutateResult;

    fn validate(&self, item: &MutateOperation) -> AdsResult<()> {
        item.validate()
    }

    async fn execute(&self, item: &MutateOperation) -> AdsResult<MutateResult> {
        self.orchestrator.mutate_remote(self.account, item).await
    }
}
