//! Collaborator contracts: credential supply and the remote API transport.
//!
//! Both are consumed, never implemented, by the orchestration layer. All
//! network and protocol detail lives behind [`RemoteApiClient`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AdsResult, ClassifiedError, RemoteFailure};
use crate::identity::{AccountId, CredentialId};
use crate::resource::ResourceClass;

/// One result row as returned by the platform.
pub type Row = serde_json::Value;

/// A currently valid access credential.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub id: CredentialId,
    pub access_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(id: CredentialId, access_token: impl Into<String>) -> Self {
        Self {
            id,
            access_token: access_token.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("access_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Supplies credentials. Refresh mechanics are internal to the implementor.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a currently valid credential or fail with an Auth error.
    async fn valid_credential(&self) -> AdsResult<Credential>;

    /// Signal that the platform rejected `credential`; it may need refreshing.
    fn report_auth_failure(&self, credential: &CredentialId);
}

/// A read request in the platform's query language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub account: AccountId,
    pub query: String,
}

impl ResourceRequest {
    pub fn new(account: AccountId, query: impl Into<String>) -> Self {
        Self {
            account,
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutateAction {
    Create,
    Update,
    Remove,
}

/// A single structured mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutateOperation {
    pub resource: ResourceClass,
    pub action: MutateAction,
    /// Target resource name; required for update and remove.
    #[serde(default)]
    pub resource_name: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl MutateOperation {
    pub fn create(resource: ResourceClass, payload: serde_json::Value) -> Self {
        Self {
            resource,
            action: MutateAction::Create,
            resource_name: None,
            payload,
        }
    }

    pub fn update(
        resource: ResourceClass,
        resource_name: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            resource,
            action: MutateAction::Update,
            resource_name: Some(resource_name.into()),
            payload,
        }
    }

    pub fn remove(resource: ResourceClass, resource_name: impl Into<String>) -> Self {
        Self {
            resource,
            action: MutateAction::Remove,
            resource_name: Some(resource_name.into()),
            payload: serde_json::Value::Null,
        }
    }

    /// Local checks that need no round trip.
    pub fn validate(&self) -> AdsResult<()> {
        match self.action {
            MutateAction::Create | MutateAction::Update if !self.payload.is_object() => {
                return Err(ClassifiedError::validation(format!(
                    "{} payload for {} must be an object",
                    action_name(self.action),
                    self.resource
                ))
                .with_field_path("payload"));
            }
            _ => {}
        }

        if matches!(self.action, MutateAction::Update | MutateAction::Remove) {
            let missing = self
                .resource_name
                .as_deref()
                .map(|n| n.trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ClassifiedError::validation(format!(
                    "{} of {} requires a resource_name",
                    action_name(self.action),
                    self.resource
                ))
                .with_field_path("resource_name"));
            }
        }
        Ok(())
    }
}

fn action_name(action: MutateAction) -> &'static str {
    match action {
        MutateAction::Create => "create",
        MutateAction::Update => "update",
        MutateAction::Remove => "remove",
    }
}

/// Per-operation result of an applied mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateResult {
    pub resource_name: String,
}

/// The sole transport to the advertising platform.
#[async_trait]
pub trait RemoteApiClient: Send + Sync {
    async fn query(
        &self,
        credential: &Credential,
        request: &ResourceRequest,
    ) -> Result<Vec<Row>, RemoteFailure>;

    async fn mutate(
        &self,
        credential: &Credential,
        account: &AccountId,
        operations: &[MutateOperation],
    ) -> Result<Vec<MutateResult>, RemoteFailure>;
}
