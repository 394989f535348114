//! Cache keys scoped by account and resource class.
//!
//! A key cannot be built without an [`AccountId`]; two accounts never share
//! an entry. Parameters are canonicalised (object keys sorted recursively)
//! before hashing, so `{"a":1,"b":2}` and `{"b":2,"a":1}` name the same
//! entry.

use adsgate_core::{AccountId, ResourceClass};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Separator byte between encoded key components. Not valid in any
/// component: account ids are digits, classes are snake_case and the
/// parameter hash is hex.
const SEPARATOR: u8 = 0x1F;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    account: AccountId,
    class: ResourceClass,
    operation: String,
    params_hash: String,
}

impl CacheKey {
    /// Build a key for `operation` over `params`.
    ///
    /// Separator bytes in `operation` are replaced so the encoding stays
    /// decodable.
    pub fn new(
        account: AccountId,
        class: ResourceClass,
        operation: impl Into<String>,
        params: &Value,
    ) -> Self {
        let operation: String = operation
            .into()
            .chars()
            .map(|c| if c as u32 == SEPARATOR as u32 { '_' } else { c })
            .collect();
        Self {
            account,
            class,
            operation,
            params_hash: params_hash(params),
        }
    }

    pub fn account(&self) -> &AccountId {
        &self.account
    }

    pub fn class(&self) -> ResourceClass {
        self.class
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn params_hash(&self) -> &str {
        &self.params_hash
    }

    /// Byte encoding for persistent stores.
    ///
    /// Format: `account 0x1F class 0x1F operation 0x1F params_hash`. The
    /// account comes first so one account's entries sort together.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            self.account.as_str().len() + self.operation.len() + self.params_hash.len() + 24,
        );
        bytes.extend_from_slice(self.account.as_str().as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.class.as_str().as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.operation.as_bytes());
        bytes.push(SEPARATOR);
        bytes.extend_from_slice(self.params_hash.as_bytes());
        bytes
    }

    /// Decode a key written by [`CacheKey::encode`].
    ///
    /// Returns `None` for foreign or corrupt keys.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut parts = bytes.split(|b| *b == SEPARATOR);
        let account = std::str::from_utf8(parts.next()?).ok()?;
        let class = std::str::from_utf8(parts.next()?).ok()?;
        let operation = std::str::from_utf8(parts.next()?).ok()?;
        let params_hash = std::str::from_utf8(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            account: AccountId::parse(account).ok()?,
            class: class.parse().ok()?,
            operation: operation.to_string(),
            params_hash: params_hash.to_string(),
        })
    }

    /// Encoded prefix shared by every key of `account`.
    pub fn account_prefix(account: &AccountId) -> Vec<u8> {
        let mut bytes = account.as_str().as_bytes().to_vec();
        bytes.push(SEPARATOR);
        bytes
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.account,
            self.class,
            self.operation,
            &self.params_hash[..self.params_hash.len().min(12)]
        )
    }
}

/// SHA-256 (hex) of the canonical rendering of `params`.
pub fn params_hash(params: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(params, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, v) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(v, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Which entries a write makes stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationScope {
    pub account: AccountId,
    /// Affected classes; empty means every class of the account.
    pub classes: Vec<ResourceClass>,
}

impl InvalidationScope {
    pub fn account(account: AccountId) -> Self {
        Self {
            account,
            classes: Vec::new(),
        }
    }

    pub fn classes(account: AccountId, classes: impl IntoIterator<Item = ResourceClass>) -> Self {
        let mut classes: Vec<ResourceClass> = classes.into_iter().collect();
        classes.sort();
        classes.dedup();
        Self { account, classes }
    }

    pub fn matches(&self, key: &CacheKey) -> bool {
        key.account() == &self.account
            && (self.classes.is_empty() || self.classes.contains(&key.class()))
    }
}
