//! ADSGATE Orchestrator - Request Orchestration Core
//!
//! Sits between tool invocations and the advertising platform.
//!
//! ```text
//! read:     Orchestrator::read ─→ CacheLayer::fetch ─(miss)─→ RetryCoordinator
//!                                                              ─→ RateLimiter ─→ RemoteApiClient::query
//! query:    Orchestrator::run_query ─→ QueryValidator ─→ RetryCoordinator ─→ RateLimiter ─→ query
//! mutation: Orchestrator::mutate ─→ BatchCoordinator ─(per item)─→ RetryCoordinator
//!                                                              ─→ RateLimiter ─→ RemoteApiClient::mutate
//!                                 └─→ CacheLayer invalidation
//! ```
//!
//! Every remote call is bounded by `request_timeout`; a timeout is a
//! Transient failure and is retried like any other.

pub mod batch;
pub mod context;
pub mod rate_limit;
pub mod retry;
pub mod telemetry;
pub mod tools;

pub use batch::{
    BatchCoordinator, BatchItem, BatchOperation, BatchOptions, BatchResult, BatchStatus,
    ItemFailure, ItemState,
};
pub use context::{MutationBatch, Orchestrator, QueryOutcome, ReadRequest};
pub use rate_limit::{Permit, RateLimiter, TokenBucketState};
pub use retry::RetryCoordinator;
pub use telemetry::init_tracing;
pub use tools::{BatchMutateTool, RunQueryTool, ToolDefinition, ToolHandler, ToolRegistry};
