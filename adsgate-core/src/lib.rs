//! ADSGATE Core - Shared Types
//!
//! Identifiers, resource classes, the error taxonomy and classifier, typed
//! configuration, and the collaborator traits every other crate builds on.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod identity;
pub mod remote;
pub mod resource;

pub use config::{
    AdmissionMode, BackoffStrategy, BatchConfig, CacheBackendKind, CacheConfig, LogFormat,
    LoggingConfig, OrchestratorConfig, RateLimitConfig, RetryPolicy, TtlTable,
};
pub use error::{
    AdsResult, ClassifiedError, ConfigError, ConfigResult, ErrorClass, ErrorClassifier,
    RemoteFailure,
};
pub use identity::{AccountId, CredentialId};
pub use remote::{
    Credential, CredentialProvider, MutateAction, MutateOperation, MutateResult, RemoteApiClient,
    ResourceRequest, Row,
};
pub use resource::ResourceClass;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
