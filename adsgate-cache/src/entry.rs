//! Stored cache entries.

use adsgate_core::ResourceClass;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A cached payload with the metadata needed to decide liveness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub payload: serde_json::Value,
    pub class: ResourceClass,
    pub created_at: DateTime<Utc>,
    #[serde(with = "adsgate_core::config::duration_ms")]
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(
        payload: serde_json::Value,
        class: ResourceClass,
        created_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            payload,
            class,
            created_at,
            ttl,
        }
    }

    /// When the entry stops being served, or `None` if that lies beyond
    /// the representable range.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let ttl = TimeDelta::from_std(self.ttl).ok()?;
        self.created_at.checked_add_signed(ttl)
    }

    /// An entry is live while `now < created_at + ttl`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at() {
            Some(expires_at) => now < expires_at,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_liveness_boundary() {
        let created = Utc::now();
        let entry = CacheEntry::new(json!([1]), ResourceClass::Ad, created, Duration::from_secs(10));

        assert!(entry.is_live_at(created));
        assert!(entry.is_live_at(created + TimeDelta::seconds(9)));
        assert!(!entry.is_live_at(created + TimeDelta::seconds(10)));
        assert!(!entry.is_live_at(created + TimeDelta::seconds(11)));
    }

    #[test]
    fn test_zero_ttl_is_never_live() {
        let created = Utc::now();
        let entry = CacheEntry::new(json!(null), ResourceClass::Ad, created, Duration::ZERO);
        assert!(!entry.is_live_at(created));
    }

    #[test]
    fn test_huge_ttl_does_not_overflow() {
        let entry = CacheEntry::new(
            json!(null),
            ResourceClass::Account,
            Utc::now(),
            Duration::from_secs(u64::MAX),
        );
        assert!(entry.expires_at().is_none());
        assert!(entry.is_live_at(Utc::now()));
    }

    #[test]
    fn test_entry_serde() {
        let entry = CacheEntry::new(
            json!({"rows": [1, 2]}),
            ResourceClass::Campaign,
            Utc::now(),
            Duration::from_millis(1500),
        );
        let bytes = serde_json::to_vec(&entry).unwrap();
        let back: CacheEntry = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(back, entry);
    }
}
