//! Resource classes of the advertising platform.
//!
//! A resource class is the unit of cache TTL configuration and of cache
//! invalidation after a mutation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ClassifiedError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceClass {
    Account,
    Campaign,
    AdGroup,
    Ad,
    Keyword,
    SearchTerm,
    Performance,
    Recommendation,
    Audience,
    Conversion,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 10] = [
        ResourceClass::Account,
        ResourceClass::Campaign,
        ResourceClass::AdGroup,
        ResourceClass::Ad,
        ResourceClass::Keyword,
        ResourceClass::SearchTerm,
        ResourceClass::Performance,
        ResourceClass::Recommendation,
        ResourceClass::Audience,
        ResourceClass::Conversion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Account => "account",
            ResourceClass::Campaign => "campaign",
            ResourceClass::AdGroup => "ad_group",
            ResourceClass::Ad => "ad",
            ResourceClass::Keyword => "keyword",
            ResourceClass::SearchTerm => "search_term",
            ResourceClass::Performance => "performance",
            ResourceClass::Recommendation => "recommendation",
            ResourceClass::Audience => "audience",
            ResourceClass::Conversion => "conversion",
        }
    }

    /// Map a query resource name (e.g. `keyword_view`) to the class whose
    /// TTL and invalidation rules govern it.
    pub fn for_query_resource(resource: &str) -> ResourceClass {
        match resource {
            "customer" | "customer_client" => ResourceClass::Account,
            "campaign" | "campaign_budget" | "campaign_criterion" | "bidding_strategy"
            | "campaign_asset" => ResourceClass::Campaign,
            "ad_group" | "ad_group_asset" => ResourceClass::AdGroup,
            "ad_group_ad" | "asset" => ResourceClass::Ad,
            "ad_group_criterion" | "keyword_view" => ResourceClass::Keyword,
            "search_term_view" => ResourceClass::SearchTerm,
            "recommendation" => ResourceClass::Recommendation,
            "audience" | "user_list" | "ad_group_audience_view" => ResourceClass::Audience,
            "conversion_action" => ResourceClass::Conversion,
            _ => ResourceClass::Performance,
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = ClassifiedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| ClassifiedError::validation(format!("unknown resource class: {}", s)))
    }
}
