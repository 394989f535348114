//! ADSGATE Test Utilities
//!
//! Shared test infrastructure for the ADSGATE workspace:
//! - Scripted doubles for the remote API client and the credential provider
//! - Proptest generators for identifiers, policies and mutations
//! - Test fixtures for common scenarios
//! - Custom assertions for classified errors

// Re-export core types for convenience
pub use adsgate_core::{
    AccountId, AdsResult, ClassifiedError, Credential, CredentialId, CredentialProvider,
    ErrorClass, MutateAction, MutateOperation, MutateResult, OrchestratorConfig, RemoteApiClient,
    RemoteFailure, ResourceClass, ResourceRequest, RetryPolicy, Row,
};

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK REMOTE CLIENT
// ============================================================================

/// Decides whether a single mutation is rejected by the mock platform.
pub type MutationRule = Box<dyn Fn(&MutateOperation) -> Option<RemoteFailure> + Send + Sync>;

/// Scripted stand-in for the platform.
///
/// Queued responses are consumed one per call; once the queue is empty,
/// queries return the default rows and mutations succeed unless the
/// mutation rule rejects them.
pub struct MockRemoteClient {
    default_rows: Vec<Row>,
    query_script: Mutex<VecDeque<Result<Vec<Row>, RemoteFailure>>>,
    mutate_script: Mutex<VecDeque<Result<Vec<MutateResult>, RemoteFailure>>>,
    mutation_rule: Option<MutationRule>,
    latency: Option<Duration>,
    query_calls: AtomicUsize,
    mutate_calls: AtomicUsize,
    seen_queries: Mutex<Vec<String>>,
    seen_credentials: Mutex<Vec<CredentialId>>,
}

impl MockRemoteClient {
    pub fn new() -> Self {
        Self {
            default_rows: Vec::new(),
            query_script: Mutex::new(VecDeque::new()),
            mutate_script: Mutex::new(VecDeque::new()),
            mutation_rule: None,
            latency: None,
            query_calls: AtomicUsize::new(0),
            mutate_calls: AtomicUsize::new(0),
            seen_queries: Mutex::new(Vec::new()),
            seen_credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn with_rows(mut self, rows: Vec<Row>) -> Self {
        self.default_rows = rows;
        self
    }

    /// Every call sleeps this long before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn reject_mutations_where<F>(mut self, rule: F) -> Self
    where
        F: Fn(&MutateOperation) -> Option<RemoteFailure> + Send + Sync + 'static,
    {
        self.mutation_rule = Some(Box::new(rule));
        self
    }

    pub fn push_query(&self, response: Result<Vec<Row>, RemoteFailure>) {
        lock(&self.query_script).push_back(response);
    }

    pub fn push_query_failure(&self, failure: RemoteFailure) {
        self.push_query(Err(failure));
    }

    pub fn push_mutate(&self, response: Result<Vec<MutateResult>, RemoteFailure>) {
        lock(&self.mutate_script).push_back(response);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn mutate_calls(&self) -> usize {
        self.mutate_calls.load(Ordering::SeqCst)
    }

    /// Query text of every call, in arrival order.
    pub fn seen_queries(&self) -> Vec<String> {
        lock(&self.seen_queries).clone()
    }

    /// Credential used by every call, in arrival order.
    pub fn seen_credentials(&self) -> Vec<CredentialId> {
        lock(&self.seen_credentials).clone()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl Default for MockRemoteClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteApiClient for MockRemoteClient {
    async fn query(
        &self,
        credential: &Credential,
        request: &ResourceRequest,
    ) -> Result<Vec<Row>, RemoteFailure> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen_queries).push(request.query.clone());
        lock(&self.seen_credentials).push(credential.id.clone());
        self.simulate_latency().await;

        let scripted = lock(&self.query_script).pop_front();
        scripted.unwrap_or_else(|| Ok(self.default_rows.clone()))
    }

    async fn mutate(
        &self,
        credential: &Credential,
        account: &AccountId,
        operations: &[MutateOperation],
    ) -> Result<Vec<MutateResult>, RemoteFailure> {
        let call = self.mutate_calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.seen_credentials).push(credential.id.clone());
        self.simulate_latency().await;

        if let Some(scripted) = lock(&self.mutate_script).pop_front() {
            return scripted;
        }

        let mut results = Vec::with_capacity(operations.len());
        for op in operations {
            if let Some(failure) = self.mutation_rule.as_ref().and_then(|rule| rule(op)) {
                return Err(failure);
            }
            let resource_name = op.resource_name.clone().unwrap_or_else(|| {
                format!("customers/{}/{}s/{}", account, op.resource, call + 1)
            });
            results.push(MutateResult { resource_name });
        }
        Ok(results)
    }
}

// ============================================================================
// MOCK CREDENTIAL PROVIDER
// ============================================================================

/// Issues numbered credentials. An auth-failure report bumps the
/// generation, as a refresh would.
#[derive(Debug, Default)]
pub struct MockCredentialProvider {
    unavailable: AtomicBool,
    generation: AtomicU64,
    issued: AtomicUsize,
    auth_failures: AtomicUsize,
    reported: Mutex<Vec<CredentialId>>,
}

impl MockCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, `valid_credential` fails with an Auth error.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn issued(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn auth_failures(&self) -> usize {
        self.auth_failures.load(Ordering::SeqCst)
    }

    pub fn reported(&self) -> Vec<CredentialId> {
        lock(&self.reported).clone()
    }

    pub fn current_id(&self) -> CredentialId {
        CredentialId::new(format!("mock-cred-{}", self.generation.load(Ordering::SeqCst)))
    }
}

#[async_trait]
impl CredentialProvider for MockCredentialProvider {
    async fn valid_credential(&self) -> AdsResult<Credential> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ClassifiedError::auth("no valid credential available")
                .with_code("CREDENTIAL_UNAVAILABLE"));
        }
        self.issued.fetch_add(1, Ordering::SeqCst);
        let generation = self.generation.load(Ordering::SeqCst);
        Ok(Credential::new(self.current_id(), format!("mock-token-{}", generation)))
    }

    fn report_auth_failure(&self, credential: &CredentialId) {
        self.auth_failures.fetch_add(1, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        lock(&self.reported).push(credential.clone());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for ADSGATE types.

    use super::*;
    use adsgate_core::BackoffStrategy;
    use proptest::prelude::*;
    use serde_json::{json, Value};

    /// Generate a normalized 10-digit account id.
    pub fn arb_account_id() -> impl Strategy<Value = AccountId> {
        "[1-9][0-9]{9}".prop_filter_map("valid account id", |s| AccountId::parse(&s).ok())
    }

    pub fn arb_resource_class() -> impl Strategy<Value = ResourceClass> {
        prop::sample::select(ResourceClass::ALL.to_vec())
    }

    pub fn arb_backoff_strategy() -> impl Strategy<Value = BackoffStrategy> {
        prop_oneof![
            Just(BackoffStrategy::Constant),
            Just(BackoffStrategy::Linear),
            Just(BackoffStrategy::Exponential),
        ]
    }

    /// Generate a retry policy with `initial_delay <= max_delay`.
    pub fn arb_retry_policy() -> impl Strategy<Value = RetryPolicy> {
        (
            1u32..=8,
            arb_backoff_strategy(),
            1u64..=5_000,
            0u64..=60_000,
            any::<bool>(),
        )
            .prop_map(|(max_attempts, backoff, initial_ms, extra_ms, jitter)| RetryPolicy {
                max_attempts,
                backoff,
                initial_delay: Duration::from_millis(initial_ms),
                max_delay: Duration::from_millis(initial_ms + extra_ms),
                jitter,
            })
    }

    /// Generate a JSON object of scalar parameters.
    pub fn arb_params() -> impl Strategy<Value = Value> {
        prop::collection::btree_map(
            "[a-z_]{1,12}",
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                "[a-zA-Z0-9 ]{0,16}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
            ],
            0..6,
        )
        .prop_map(|map| Value::Object(map.into_iter().collect()))
    }

    /// Generate a mutation that passes local pre-validation.
    pub fn arb_mutate_operation() -> impl Strategy<Value = MutateOperation> {
        (arb_resource_class(), 0u8..3, "[a-z]{3,10}", 1u64..1_000_000).prop_map(
            |(resource, action, name, id)| match action {
                0 => MutateOperation::create(resource, json!({ "name": name })),
                1 => MutateOperation::update(
                    resource,
                    format!("customers/1234567890/{}s/{}", resource, id),
                    json!({ "status": "PAUSED" }),
                ),
                _ => MutateOperation::remove(
                    resource,
                    format!("customers/1234567890/{}s/{}", resource, id),
                ),
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;
    use adsgate_core::{AdmissionMode, BackoffStrategy, CacheBackendKind};
    use serde_json::json;

    pub fn account() -> AccountId {
        parse_account("123-456-7890")
    }

    pub fn other_account() -> AccountId {
        parse_account("9876543210")
    }

    fn parse_account(raw: &str) -> AccountId {
        match AccountId::parse(raw) {
            Ok(id) => id,
            Err(err) => panic!("fixture account id rejected: {}", err),
        }
    }

    /// Exponential 1s/2s/4s backoff without jitter, so paused-clock tests
    /// can assert exact delays.
    pub fn deterministic_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff: BackoffStrategy::Exponential,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: false,
        }
    }

    /// Memory cache, deterministic retry, a waiting limiter sized for tests.
    pub fn test_config() -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.cache.backend = CacheBackendKind::Memory;
        config.cache.max_entries = 1_000;
        config.retry = deterministic_retry();
        config.rate_limit.requests_per_minute = 600;
        config.rate_limit.burst_size = 20;
        config.rate_limit.mode = AdmissionMode::Wait;
        config.request_timeout = Duration::from_secs(5);
        config
    }

    pub fn campaign_rows(count: usize) -> Vec<Row> {
        (0..count)
            .map(|i| {
                json!({
                    "campaign.id": 1000 + i,
                    "campaign.name": format!("Campaign {}", i),
                    "campaign.status": "ENABLED",
                })
            })
            .collect()
    }

    pub fn create_campaign(name: &str) -> MutateOperation {
        MutateOperation::create(ResourceClass::Campaign, json!({ "name": name }))
    }

    pub fn pause_ad_group(resource_name: &str) -> MutateOperation {
        MutateOperation::update(
            ResourceClass::AdGroup,
            resource_name,
            json!({ "status": "PAUSED" }),
        )
    }

    /// Fails local pre-validation: update without a resource name.
    pub fn nameless_update() -> MutateOperation {
        let mut op = MutateOperation::update(ResourceClass::Campaign, "x", json!({}));
        op.resource_name = None;
        op
    }

    pub fn transient_failure() -> RemoteFailure {
        RemoteFailure::new("backend unavailable").with_status(503)
    }

    pub fn quota_failure() -> RemoteFailure {
        RemoteFailure::new("quota exhausted").with_code("RESOURCE_EXHAUSTED")
    }

    pub fn auth_failure() -> RemoteFailure {
        RemoteFailure::new("token expired").with_status(401)
    }

    pub fn validation_failure(field: &str) -> RemoteFailure {
        RemoteFailure::new(format!("{} is invalid", field))
            .with_code("INVALID_ARGUMENT")
            .with_field_path(field)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over classified results.

    use super::*;

    /// Assert that a result failed with the given class.
    #[track_caller]
    pub fn assert_class<T: std::fmt::Debug>(result: &AdsResult<T>, class: ErrorClass) {
        match result {
            Err(err) => assert_eq!(err.class, class, "wrong class for error: {:?}", err),
            Ok(value) => panic!("Expected {:?} error, got Ok: {:?}", class, value),
        }
    }

    /// Assert that a result failed with the given platform or local code.
    #[track_caller]
    pub fn assert_code<T: std::fmt::Debug>(result: &AdsResult<T>, code: &str) {
        match result {
            Err(err) => assert_eq!(err.code.as_deref(), Some(code), "wrong code: {:?}", err),
            Ok(value) => panic!("Expected error {}, got Ok: {:?}", code, value),
        }
    }
}
