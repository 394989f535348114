//! Allow-list of queryable resources and fields.
//!
//! A field path is `prefix.attribute(.sub)*`. The prefix must be `metrics`,
//! `segments`, or a resource that is either the FROM resource or one of the
//! resources attributed to it; the attribute must be listed for that prefix.
//! Sub-attributes below the first level are passed through unchecked.

/// Resources that may appear after FROM.
pub const RESOURCES: &[&str] = &[
    "customer",
    "campaign",
    "ad_group",
    "ad_group_ad",
    "ad_group_criterion",
    "keyword_view",
    "search_term_view",
    "campaign_criterion",
    "recommendation",
    "customer_client",
    "bidding_strategy",
    "campaign_budget",
    "ad_group_audience_view",
    "audience",
    "user_list",
    "conversion_action",
    "asset",
    "campaign_asset",
    "ad_group_asset",
    "extension_feed_item",
    "geographic_view",
    "age_range_view",
    "gender_view",
    "landing_page_view",
    "shopping_performance_view",
];

pub const METRICS: &[&str] = &[
    "clicks",
    "impressions",
    "cost_micros",
    "conversions",
    "conversions_value",
    "average_cpc",
    "average_cpm",
    "average_cost",
    "ctr",
    "conversion_rate",
    "conversions_from_interactions_rate",
    "cost_per_conversion",
    "value_per_conversion",
    "all_conversions",
    "all_conversions_value",
    "view_through_conversions",
    "interactions",
    "interaction_rate",
    "engagements",
    "engagement_rate",
    "video_views",
    "video_view_rate",
    "phone_calls",
    "invalid_clicks",
    "search_impression_share",
    "search_budget_lost_impression_share",
    "search_rank_lost_impression_share",
    "search_top_impression_share",
    "search_absolute_top_impression_share",
    "top_impression_percentage",
    "absolute_top_impression_percentage",
    "historical_quality_score",
    "historical_creative_quality_score",
    "historical_landing_page_quality_score",
    "historical_search_predicted_ctr",
];

pub const SEGMENTS: &[&str] = &[
    "date",
    "week",
    "month",
    "quarter",
    "year",
    "day_of_week",
    "hour",
    "device",
    "ad_network_type",
    "click_type",
    "slot",
    "conversion_action",
    "conversion_action_name",
    "conversion_action_category",
    "keyword",
    "search_term_match_type",
    "product_item_id",
    "product_title",
    "product_brand",
    "product_channel",
    "geo_target_country",
    "geo_target_region",
    "geo_target_city",
];

/// First-level attributes per resource prefix.
fn attributes(resource: &str) -> &'static [&'static str] {
    match resource {
        "customer" => &[
            "id", "resource_name", "descriptive_name", "currency_code", "time_zone", "manager",
            "test_account", "status", "auto_tagging_enabled", "optimization_score",
            "tracking_url_template", "final_url_suffix", "has_partners_badge",
        ],
        "customer_client" => &[
            "id", "resource_name", "client_customer", "descriptive_name", "currency_code",
            "time_zone", "manager", "test_account", "status", "level", "hidden", "applied_labels",
        ],
        "campaign" => &[
            "id", "resource_name", "name", "status", "serving_status", "primary_status",
            "primary_status_reasons", "advertising_channel_type", "advertising_channel_sub_type",
            "bidding_strategy_type", "bidding_strategy", "campaign_budget", "start_date",
            "end_date", "network_settings", "labels", "tracking_url_template",
            "final_url_suffix", "target_cpa", "target_roas", "target_spend", "manual_cpc",
            "maximize_conversions", "maximize_conversion_value", "optimization_score",
            "experiment_type", "geo_target_type_setting", "shopping_setting", "payment_mode",
        ],
        "campaign_budget" => &[
            "id", "resource_name", "name", "amount_micros", "total_amount_micros",
            "delivery_method", "status", "explicitly_shared", "period", "reference_count",
            "recommended_budget_amount_micros", "type",
        ],
        "bidding_strategy" => &[
            "id", "resource_name", "name", "type", "status", "campaign_count", "currency_code",
            "target_cpa", "target_roas", "target_spend", "target_impression_share",
            "maximize_conversions", "maximize_conversion_value", "enhanced_cpc",
        ],
        "ad_group" => &[
            "id", "resource_name", "name", "status", "type", "campaign", "cpc_bid_micros",
            "cpm_bid_micros", "target_cpa_micros", "target_roas", "effective_target_cpa_micros",
            "effective_target_roas", "labels", "tracking_url_template", "final_url_suffix",
            "primary_status", "primary_status_reasons", "ad_rotation_mode",
        ],
        "ad_group_ad" => &[
            "resource_name", "ad", "status", "ad_group", "policy_summary", "labels",
            "ad_strength", "action_items", "primary_status", "primary_status_reasons",
        ],
        "ad_group_criterion" => &[
            "criterion_id", "resource_name", "ad_group", "status", "type", "negative", "keyword",
            "cpc_bid_micros", "effective_cpc_bid_micros", "quality_info", "position_estimates",
            "final_urls", "bid_modifier", "labels", "system_serving_status", "approval_status",
            "disapproval_reasons", "age_range", "gender", "user_list", "placement", "topic",
            "primary_status",
        ],
        "campaign_criterion" => &[
            "criterion_id", "resource_name", "campaign", "type", "negative", "status",
            "bid_modifier", "keyword", "location", "language", "device", "ad_schedule",
            "age_range", "gender", "user_list", "proximity", "ip_block", "placement",
        ],
        "search_term_view" => &["resource_name", "search_term", "status", "ad_group"],
        "recommendation" => &[
            "resource_name", "type", "campaign", "ad_group", "campaign_budget", "dismissed",
            "impact", "keyword_recommendation", "campaign_budget_recommendation",
            "target_cpa_opt_in_recommendation", "text_ad_recommendation",
            "responsive_search_ad_recommendation",
        ],
        "audience" => &[
            "id", "resource_name", "name", "description", "status", "dimensions",
            "exclusion_dimension",
        ],
        "user_list" => &[
            "id", "resource_name", "name", "description", "membership_status",
            "membership_life_span", "size_for_display", "size_for_search", "type", "read_only",
            "eligible_for_search", "eligible_for_display", "match_rate_percentage",
            "account_user_list_status", "closing_reason",
        ],
        "conversion_action" => &[
            "id", "resource_name", "name", "status", "type", "category", "owner_customer",
            "include_in_conversions_metric", "click_through_lookback_window_days",
            "view_through_lookback_window_days", "value_settings", "counting_type",
            "attribution_model_settings", "tag_snippets", "phone_call_duration_seconds",
            "app_id", "origin", "primary_for_goal",
        ],
        "asset" => &[
            "id", "resource_name", "name", "type", "final_urls", "text_asset", "image_asset",
            "youtube_video_asset", "sitelink_asset", "callout_asset", "structured_snippet_asset",
            "call_asset", "lead_form_asset", "promotion_asset", "price_asset", "policy_summary",
            "source",
        ],
        "campaign_asset" => &[
            "resource_name", "asset", "campaign", "field_type", "status", "source",
            "primary_status",
        ],
        "ad_group_asset" => &[
            "resource_name", "asset", "ad_group", "field_type", "status", "source",
            "primary_status",
        ],
        "extension_feed_item" => &[
            "id", "resource_name", "extension_type", "status", "start_date_time",
            "end_date_time", "sitelink_feed_item", "callout_feed_item", "device",
            "targeted_campaign", "targeted_ad_group",
        ],
        "geographic_view" => &["resource_name", "country_criterion_id", "location_type"],
        "landing_page_view" => &["resource_name", "unexpanded_final_url"],
        "keyword_view" | "ad_group_audience_view" | "age_range_view" | "gender_view"
        | "shopping_performance_view" => &["resource_name"],
        _ => &[],
    }
}

/// Resources whose fields may be selected alongside `resource`.
fn attributed(resource: &str) -> &'static [&'static str] {
    match resource {
        "campaign" => &["campaign_budget", "bidding_strategy"],
        "ad_group" => &["campaign", "campaign_budget", "bidding_strategy"],
        "ad_group_ad" | "ad_group_criterion" => &["ad_group", "campaign"],
        "keyword_view" | "age_range_view" | "gender_view" | "ad_group_audience_view" => {
            &["ad_group_criterion", "ad_group", "campaign"]
        }
        "search_term_view" | "geographic_view" | "landing_page_view"
        | "shopping_performance_view" => &["ad_group", "campaign"],
        "campaign_criterion" => &["campaign"],
        "campaign_asset" => &["campaign", "asset"],
        "ad_group_asset" => &["ad_group", "campaign", "asset"],
        "recommendation" => &["campaign", "ad_group", "campaign_budget"],
        _ => &[],
    }
}

pub fn is_known_resource(resource: &str) -> bool {
    RESOURCES.contains(&resource)
}

/// Why a field was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    /// Neither the prefix nor the attribute is known.
    Unknown,
    /// Known field of a resource that cannot be combined with FROM.
    Incompatible,
}

/// Check `field` against the allow-list for queries over `from`.
pub fn check_field(from: &str, field: &str) -> Result<(), FieldIssue> {
    let mut segments = field.split('.');
    let prefix = segments.next().unwrap_or("");
    let attribute = match segments.next() {
        Some(a) if !a.is_empty() => a,
        _ => return Err(FieldIssue::Unknown),
    };

    let known = match prefix {
        "metrics" => METRICS.contains(&attribute),
        "segments" => SEGMENTS.contains(&attribute),
        resource => is_known_resource(resource) && attributes(resource).contains(&attribute),
    };
    if !known {
        return Err(FieldIssue::Unknown);
    }

    let compatible = matches!(prefix, "metrics" | "segments" | "customer")
        || prefix == from
        || attributed(from).contains(&prefix);
    if compatible {
        Ok(())
    } else {
        Err(FieldIssue::Incompatible)
    }
}
