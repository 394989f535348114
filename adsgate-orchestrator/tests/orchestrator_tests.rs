//! End-to-end tests of the orchestration context against scripted doubles.

use std::sync::Arc;
use std::time::Duration;

use adsgate_cache::{CacheLayer, ManualClock, MemoryCacheBackend};
use adsgate_core::{
    AdmissionMode, CacheBackendKind, ErrorClass, OrchestratorConfig, ResourceClass, RetryPolicy,
};
use adsgate_orchestrator::{BatchStatus, ItemState, Orchestrator, ReadRequest, ToolRegistry};
use adsgate_test_utils::assertions::{assert_class, assert_code};
use adsgate_test_utils::fixtures::*;
use adsgate_test_utils::{MockCredentialProvider, MockRemoteClient};
use chrono::Utc;
use serde_json::json;
use tempfile::TempDir;

struct Harness {
    client: Arc<MockRemoteClient>,
    provider: Arc<MockCredentialProvider>,
    orchestrator: Orchestrator,
}

fn harness(config: OrchestratorConfig, client: MockRemoteClient) -> Harness {
    let client = Arc::new(client);
    let provider = Arc::new(MockCredentialProvider::new());
    let orchestrator = match Orchestrator::new(config, client.clone(), provider.clone()) {
        Ok(orchestrator) => orchestrator,
        Err(e) => panic!("orchestrator failed to start: {}", e),
    };
    Harness {
        client,
        provider,
        orchestrator,
    }
}

fn campaign_read() -> ReadRequest {
    ReadRequest::new(
        account(),
        ResourceClass::Campaign,
        "list_campaigns",
        "SELECT campaign.id, campaign.name FROM campaign",
    )
}

// ============================================================================
// READS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_repeat_read_is_served_from_cache() {
    let h = harness(test_config(), MockRemoteClient::new().with_rows(campaign_rows(3)));

    let first = h.orchestrator.read(&campaign_read()).await.unwrap();
    let second = h.orchestrator.read(&campaign_read()).await.unwrap();

    assert_eq!(first, campaign_rows(3));
    assert_eq!(first, second);
    assert_eq!(h.client.query_calls(), 1);

    let stats = h.orchestrator.cache().stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_different_params_are_different_entries() {
    let h = harness(test_config(), MockRemoteClient::new());

    let base = campaign_read();
    h.orchestrator.read(&base.clone().with_params(json!({"status": "ENABLED"}))).await.unwrap();
    h.orchestrator.read(&base.clone().with_params(json!({"status": "PAUSED"}))).await.unwrap();
    h.orchestrator.read(&base.with_params(json!({"status": "ENABLED"}))).await.unwrap();

    assert_eq!(h.client.query_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_read_reloads_after_ttl() {
    let client = Arc::new(MockRemoteClient::new().with_rows(campaign_rows(1)));
    let provider = Arc::new(MockCredentialProvider::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let cache = Arc::new(
        CacheLayer::new(Arc::new(MemoryCacheBackend::new(100))).with_clock(clock.clone()),
    );
    let config = test_config();
    let ttl = config.cache.ttl_for(ResourceClass::Campaign);
    let orchestrator = Orchestrator::with_cache(config, client.clone(), provider, cache);

    orchestrator.read(&campaign_read()).await.unwrap();
    clock.advance(ttl - Duration::from_secs(1));
    orchestrator.read(&campaign_read()).await.unwrap();
    assert_eq!(client.query_calls(), 1);

    clock.advance(Duration::from_secs(1));
    orchestrator.read(&campaign_read()).await.unwrap();
    assert_eq!(client.query_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_read_is_not_cached() {
    let h = harness(test_config(), MockRemoteClient::new().with_rows(campaign_rows(2)));
    h.client.push_query_failure(validation_failure("campaign.name"));

    let failed = h.orchestrator.read(&campaign_read()).await;
    assert_class(&failed, ErrorClass::Validation);

    let rows = h.orchestrator.read(&campaign_read()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(h.client.query_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_empty_read_query_is_rejected_locally() {
    let h = harness(test_config(), MockRemoteClient::new());
    let request = ReadRequest::new(account(), ResourceClass::Campaign, "list_campaigns", "  ");

    let result = h.orchestrator.read(&request).await;
    assert_class(&result, ErrorClass::Validation);
    assert_eq!(h.client.query_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_lmdb_backed_reads() {
    let dir = TempDir::new().unwrap();
    let mut config = test_config();
    config.cache.backend = CacheBackendKind::Lmdb;
    config.cache.lmdb_path = Some(dir.path().to_path_buf());
    config.cache.lmdb_max_size_mb = 16;

    let h = harness(config, MockRemoteClient::new().with_rows(campaign_rows(2)));
    assert_eq!(h.orchestrator.cache().backend_name(), "lmdb");

    h.orchestrator.read(&campaign_read()).await.unwrap();
    let rows = h.orchestrator.read(&campaign_read()).await.unwrap();
    assert_eq!(rows, campaign_rows(2));
    assert_eq!(h.client.query_calls(), 1);
}

#[test]
fn test_lmdb_without_path_fails_to_start() {
    let mut config = test_config();
    config.cache.backend = CacheBackendKind::Lmdb;
    config.cache.lmdb_path = None;

    let client = Arc::new(MockRemoteClient::new());
    let provider = Arc::new(MockCredentialProvider::new());
    let Err(err) = Orchestrator::new(config, client, provider) else {
        panic!("expected a configuration failure");
    };
    assert_eq!(err.class, ErrorClass::Validation);
    assert_eq!(err.field_path.as_deref(), Some("cache.lmdb_path"));
}

#[test]
fn test_unvalidated_config_is_rejected_at_startup() {
    let mut config = test_config();
    config.rate_limit.requests_per_minute = 0;

    let client = Arc::new(MockRemoteClient::new());
    let provider = Arc::new(MockCredentialProvider::new());
    let Err(err) = Orchestrator::new(config, client, provider) else {
        panic!("a limiter that never refills must not start");
    };
    assert_eq!(err.class, ErrorClass::Validation);
    assert_eq!(err.code.as_deref(), Some("INVALID_CONFIG"));
    assert_eq!(
        err.field_path.as_deref(),
        Some("rate_limit.requests_per_minute")
    );
}

// ============================================================================
// RETRY, TIMEOUT, AUTH
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried_transparently() {
    let h = harness(test_config(), MockRemoteClient::new().with_rows(campaign_rows(1)));
    h.client.push_query_failure(transient_failure());

    let started = tokio::time::Instant::now();
    let rows = h.orchestrator.read(&campaign_read()).await.unwrap();

    assert_eq!(rows.len(), 1);
    assert_eq!(h.client.query_calls(), 2);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1050), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_remote_retry_after_raises_backoff() {
    let h = harness(test_config(), MockRemoteClient::new());
    h.client
        .push_query_failure(quota_failure().with_retry_after(Duration::from_secs(3)));

    let started = tokio::time::Instant::now();
    h.orchestrator.read(&campaign_read()).await.unwrap();

    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_millis(3050), "{:?}", elapsed);
    assert_eq!(h.client.query_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_transient_and_retried() {
    let client = MockRemoteClient::new().with_latency(Duration::from_secs(10));
    let h = harness(test_config(), client);

    let result = h.orchestrator.read(&campaign_read()).await;

    assert_class(&result, ErrorClass::Transient);
    assert_code(&result, "DEADLINE_EXCEEDED");
    let err = result.unwrap_err();
    assert_eq!(err.attempts, 3);
    // three 5s deadlines plus 1s and 2s of backoff
    assert!(err.elapsed >= Duration::from_secs(18), "{:?}", err.elapsed);
    assert!(err.elapsed < Duration::from_millis(18_100), "{:?}", err.elapsed);
    assert_eq!(h.client.query_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_auth_rejection_signals_provider_and_is_not_retried() {
    let h = harness(test_config(), MockRemoteClient::new());
    h.client.push_query_failure(auth_failure());

    let result = h.orchestrator.read(&campaign_read()).await;

    assert_class(&result, ErrorClass::Auth);
    assert_eq!(h.client.query_calls(), 1);
    assert_eq!(h.provider.auth_failures(), 1);
    assert_eq!(h.provider.reported(), h.client.seen_credentials());

    // the next call picks up the refreshed credential
    h.orchestrator.read(&campaign_read()).await.unwrap();
    let seen = h.client.seen_credentials();
    assert_eq!(seen.len(), 2);
    assert_ne!(seen[0], seen[1]);
}

#[tokio::test(start_paused = true)]
async fn test_missing_credential_fails_before_any_call() {
    let h = harness(test_config(), MockRemoteClient::new());
    h.provider.set_unavailable(true);

    let result = h.orchestrator.read(&campaign_read()).await;

    assert_class(&result, ErrorClass::Auth);
    assert_eq!(h.client.query_calls(), 0);
    assert_eq!(h.orchestrator.limiter().tracked(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_local_rate_limit_surfaces_as_quota() {
    let mut config = test_config();
    config.rate_limit.burst_size = 2;
    config.rate_limit.requests_per_minute = 60;
    config.rate_limit.mode = AdmissionMode::FailFast;
    config.retry = RetryPolicy::no_retry();
    let h = harness(config, MockRemoteClient::new());

    let query = "SELECT campaign.id FROM campaign LIMIT 10";
    h.orchestrator.run_query(&account(), query).await.unwrap();
    h.orchestrator.run_query(&account(), query).await.unwrap();
    let third = h.orchestrator.run_query(&account(), query).await;

    assert_class(&third, ErrorClass::Quota);
    assert_code(&third, "LOCAL_RATE_LIMIT");
    assert_eq!(h.client.query_calls(), 2);

    // another account has its own bucket
    h.orchestrator.run_query(&other_account(), query).await.unwrap();
    assert_eq!(h.client.query_calls(), 3);
}

// ============================================================================
// CUSTOM QUERIES
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_rejected_query_spends_no_quota() {
    let h = harness(test_config(), MockRemoteClient::new());

    let result = h
        .orchestrator
        .run_query(&account(), "SELECT campaign.id, campaign.budget_name FROM campaign")
        .await;

    assert_class(&result, ErrorClass::Validation);
    assert!(result.unwrap_err().message.contains("campaign.budget_name"));
    assert_eq!(h.client.query_calls(), 0);
    assert_eq!(h.provider.issued(), 0);
    assert_eq!(h.orchestrator.limiter().tracked(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_custom_queries_are_not_cached() {
    let h = harness(test_config(), MockRemoteClient::new().with_rows(campaign_rows(4)));
    let query = "SELECT campaign.id, campaign.name FROM campaign";

    let first = h.orchestrator.run_query(&account(), query).await.unwrap();
    h.orchestrator.run_query(&account(), query).await.unwrap();

    assert_eq!(first.rows.len(), 4);
    assert!(!first.suggestions.is_empty());
    assert_eq!(h.client.query_calls(), 2);
    assert_eq!(h.client.seen_queries(), vec![query.to_string(), query.to_string()]);
}

// ============================================================================
// MUTATIONS
// ============================================================================

fn rejecting_client() -> MockRemoteClient {
    MockRemoteClient::new()
        .with_rows(campaign_rows(2))
        .reject_mutations_where(|op| (op.payload["name"] == "bad").then(|| validation_failure("name")))
}

#[tokio::test(start_paused = true)]
async fn test_mutate_reports_partial_success_in_order() {
    let h = harness(test_config(), rejecting_client());
    let operations = vec![
        create_campaign("Spring"),
        nameless_update(),
        create_campaign("bad"),
        pause_ad_group("customers/1234567890/adGroups/7"),
    ];

    let result = h.orchestrator.mutate(&account(), operations.clone(), false).await.unwrap();

    assert_eq!(result.status, BatchStatus::Partial);
    assert_eq!(result.len(), 4);
    assert_eq!(result.succeeded, 2);
    assert_eq!(result.failed, 2);
    assert_eq!(result.failed_indices(), vec![1, 2]);
    for (item, op) in result.items.iter().zip(&operations) {
        assert_eq!(&item.input, op);
    }

    let local = result.items[1].state.failure().unwrap();
    assert_eq!(local.class, ErrorClass::Validation);
    assert_eq!(local.field_path.as_deref(), Some("resource_name"));
    assert_eq!(local.attempts, 0);

    let remote = result.items[2].state.failure().unwrap();
    assert_eq!(remote.class, ErrorClass::Validation);
    assert_eq!(remote.field_path.as_deref(), Some("name"));
    assert_eq!(remote.attempts, 1);

    match &result.items[3].state {
        ItemState::Succeeded(out) => {
            assert_eq!(out.resource_name, "customers/1234567890/adGroups/7")
        }
        other => panic!("expected success, got {:?}", other),
    }

    // the nameless update never reached the platform
    assert_eq!(h.client.mutate_calls(), 3);
    assert_eq!(result.failed_inputs(), vec![&operations[1], &operations[2]]);
}

#[tokio::test(start_paused = true)]
async fn test_mutate_invalidates_touched_classes_only() {
    let h = harness(test_config(), rejecting_client());
    let keywords = ReadRequest::new(
        account(),
        ResourceClass::Keyword,
        "list_keywords",
        "SELECT ad_group_criterion.keyword.text FROM keyword_view",
    );
    let elsewhere = ReadRequest::new(
        other_account(),
        ResourceClass::Campaign,
        "list_campaigns",
        "SELECT campaign.id, campaign.name FROM campaign",
    );

    h.orchestrator.read(&campaign_read()).await.unwrap();
    h.orchestrator.read(&keywords).await.unwrap();
    h.orchestrator.read(&elsewhere).await.unwrap();
    assert_eq!(h.client.query_calls(), 3);

    h.orchestrator
        .mutate(&account(), vec![create_campaign("Summer")], false)
        .await
        .unwrap();

    h.orchestrator.read(&campaign_read()).await.unwrap();
    assert_eq!(h.client.query_calls(), 4);

    h.orchestrator.read(&keywords).await.unwrap();
    h.orchestrator.read(&elsewhere).await.unwrap();
    assert_eq!(h.client.query_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_dry_run_applies_nothing() {
    let h = harness(test_config(), rejecting_client());
    h.orchestrator.read(&campaign_read()).await.unwrap();

    let result = h
        .orchestrator
        .mutate(&account(), vec![create_campaign("Spring"), nameless_update()], true)
        .await
        .unwrap();

    assert!(result.dry_run);
    assert_eq!(result.items[0].state, ItemState::WouldSucceed);
    assert_eq!(result.failed_indices(), vec![1]);
    assert_eq!(result.status, BatchStatus::Partial);
    assert_eq!(h.client.mutate_calls(), 0);
    assert_eq!(h.provider.issued(), 1);

    // cache untouched
    h.orchestrator.read(&campaign_read()).await.unwrap();
    assert_eq!(h.client.query_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_batch_is_rejected_whole() {
    let mut config = test_config();
    config.batch.max_items = 2;
    let h = harness(config, MockRemoteClient::new());

    let operations = (0..3).map(|i| create_campaign(&format!("c{}", i))).collect();
    let result = h.orchestrator.mutate(&account(), operations, false).await;

    assert_class(&result, ErrorClass::Validation);
    assert_code(&result, "BATCH_TOO_LARGE");
    assert_eq!(h.client.mutate_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_empty_mutate_response_is_fatal() {
    let h = harness(test_config(), MockRemoteClient::new());
    h.client.push_mutate(Ok(Vec::new()));

    let result = h
        .orchestrator
        .mutate(&account(), vec![create_campaign("Spring")], false)
        .await
        .unwrap();

    assert_eq!(result.status, BatchStatus::AllFailed);
    let failure = result.items[0].state.failure().unwrap();
    assert_eq!(failure.class, ErrorClass::Fatal);
    assert_eq!(failure.code.as_deref(), Some("EMPTY_MUTATE_RESPONSE"));
}

// ============================================================================
// TOOLS
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_run_query_tool() {
    let h = harness(test_config(), MockRemoteClient::new().with_rows(campaign_rows(3)));
    let registry = ToolRegistry::with_builtin_tools();

    let output = registry
        .dispatch(
            &h.orchestrator,
            "run_query",
            json!({
                "account_id": "123-456-7890",
                "query": "SELECT campaign.id, campaign.name FROM campaign LIMIT 5"
            }),
        )
        .await
        .unwrap();

    assert_eq!(output["row_count"], json!(3));
    assert_eq!(output["rows"].as_array().map(Vec::len), Some(3));
    assert_eq!(output["complexity"], json!("simple"));
}

#[tokio::test(start_paused = true)]
async fn test_batch_mutate_tool_dry_run() {
    let h = harness(test_config(), MockRemoteClient::new());
    let registry = ToolRegistry::with_builtin_tools();

    let output = registry
        .dispatch(
            &h.orchestrator,
            "batch_mutate",
            json!({
                "account_id": "1234567890",
                "dry_run": true,
                "operations": [
                    {"resource": "campaign", "action": "create", "payload": {"name": "Spring"}},
                    {"resource": "ad_group", "action": "remove", "resource_name": "customers/1234567890/adGroups/9"}
                ]
            }),
        )
        .await
        .unwrap();

    assert_eq!(output["status"], json!("ALL_SUCCEEDED"));
    assert_eq!(output["dry_run"], json!(true));
    assert_eq!(output["succeeded"], json!(2));
    assert_eq!(output["items"][1]["state"]["state"], json!("would_succeed"));
    assert_eq!(h.client.mutate_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_errors() {
    let h = harness(test_config(), MockRemoteClient::new());
    let registry = ToolRegistry::with_builtin_tools();

    let unknown = registry.dispatch(&h.orchestrator, "delete_everything", json!({})).await;
    assert_class(&unknown, ErrorClass::Validation);
    assert_code(&unknown, "UNKNOWN_TOOL");

    let bad_args = registry
        .dispatch(&h.orchestrator, "batch_mutate", json!({"account_id": "1234567890"}))
        .await;
    assert_code(&bad_args, "INVALID_ARGUMENTS");
    assert_eq!(h.client.mutate_calls(), 0);
}
