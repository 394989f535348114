//! Identity types for advertising accounts and credentials

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::error::ClassifiedError;

static ACCOUNT_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{10}$").expect("Invalid account id regex"));

/// Advertising account (customer) identifier.
///
/// Stored without hyphens; `123-456-7890` and `1234567890` name the same
/// account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountId(String);

impl AccountId {
    /// Parse and normalize an account identifier.
    pub fn parse(raw: &str) -> Result<Self, ClassifiedError> {
        let normalized: String = raw.trim().chars().filter(|c| *c != '-').collect();
        if !ACCOUNT_ID_RE.is_match(&normalized) {
            return Err(ClassifiedError::validation(format!(
                "invalid account id '{}': expected 10 digits",
                raw
            ))
            .with_field_path("account_id"));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for AccountId {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for AccountId {
    type Error = ClassifiedError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccountId> for String {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

/// Identifier of the credential a request is made with.
///
/// Rate-limit buckets are scoped by (credential, account), so two
/// credentials acting on the same account are paced independently.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CredentialId(String);

impl CredentialId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derive a stable identifier from secret material without retaining it.
    pub fn fingerprint(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        Self(format!("cred-{}", &hex::encode(digest)[..16]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
