//! Read-only validation gate for free-form queries.
//!
//! Nothing reaches the remote platform unless it parses as a single read
//! query over allow-listed resources and fields. Rejections carry a
//! human-readable reason and classify as Validation, so they never consume
//! quota or get retried.

use adsgate_core::{AdsResult, ClassifiedError, ResourceClass};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lexer::{Lexer, TokenKind};
use crate::parser::{CompareOp, FieldRef, ParseError, Parser, Query};
use crate::schema::{self, FieldIssue};

/// Hard upper bound on selected fields.
pub const MAX_FIELDS: usize = 30;
/// Above this many fields the query is accepted with a warning.
pub const WARN_FIELDS: usize = 20;

const WRITE_VERBS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "CREATE", "REMOVE", "MUTATE", "DROP", "ALTER", "REPLACE",
    "MERGE", "TRUNCATE", "UPSERT", "GRANT", "SET",
];

/// Rough cost grade of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryComplexity {
    Simple,
    Moderate,
    Complex,
    VeryComplex,
}

impl QueryComplexity {
    pub fn of(query: &Query) -> Self {
        let mut score = match query.fields.len() {
            n if n > 20 => 3,
            n if n > 10 => 2,
            n if n > 5 => 1,
            _ => 0,
        };

        if !query.conditions.is_empty() {
            score += 1;
            match query.conditions.len() - 1 {
                n if n > 5 => score += 2,
                n if n > 2 => score += 1,
                _ => {}
            }
        }

        if query.referenced_fields().any(|f| f.prefix() == "segments") {
            score += 1;
        }
        if !query.order_by.is_empty() {
            score += 1;
        }

        match score {
            s if s >= 7 => QueryComplexity::VeryComplex,
            s if s >= 5 => QueryComplexity::Complex,
            s if s >= 3 => QueryComplexity::Moderate,
            _ => QueryComplexity::Simple,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Valid,
    Invalid {
        reason: String,
        /// Offending field or resource name, when there is one.
        offending: Option<String>,
    },
}

/// Outcome of validating one query. Created per query, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    pub raw: String,
    /// Parsed form; `None` if the text did not parse.
    pub query: Option<Query>,
    pub verdict: Verdict,
    pub complexity: QueryComplexity,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

impl ValidatedQuery {
    fn rejected(raw: &str, query: Option<Query>, reason: String, offending: Option<String>) -> Self {
        debug!(reason = %reason, "Query rejected");
        let complexity = query
            .as_ref()
            .map(QueryComplexity::of)
            .unwrap_or(QueryComplexity::Simple);
        Self {
            raw: raw.to_string(),
            query,
            verdict: Verdict::Invalid { reason, offending },
            complexity,
            warnings: Vec::new(),
            suggestions: Vec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.verdict == Verdict::Valid
    }

    pub fn resource(&self) -> Option<&str> {
        self.query.as_ref().map(|q| q.resource.as_str())
    }

    pub fn resource_class(&self) -> Option<ResourceClass> {
        self.resource().map(ResourceClass::for_query_resource)
    }

    /// Selected fields, in SELECT order.
    pub fn fields(&self) -> &[FieldRef] {
        self.query.as_ref().map(|q| q.fields.as_slice()).unwrap_or(&[])
    }

    pub fn reason(&self) -> Option<&str> {
        match &self.verdict {
            Verdict::Valid => None,
            Verdict::Invalid { reason, .. } => Some(reason),
        }
    }

    /// Convert a rejection into a Validation error.
    pub fn into_result(self) -> AdsResult<ValidatedQuery> {
        match &self.verdict {
            Verdict::Valid => Ok(self),
            Verdict::Invalid { reason, .. } => Err(ClassifiedError::validation(reason.clone())
                .with_code("INVALID_QUERY")
                .with_field_path("query")),
        }
    }
}

/// Syntactic and semantic gate for free-form queries.
#[derive(Debug, Clone, Default)]
pub struct QueryValidator;

impl QueryValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, text: &str) -> ValidatedQuery {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ValidatedQuery::rejected(text, None, "query cannot be empty".to_string(), None);
        }

        let tokens = Lexer::new(trimmed).tokenize();
        if let Some(verb) = find_write_verb(&tokens) {
            return ValidatedQuery::rejected(
                text,
                None,
                format!(
                    "write operation '{}' is not allowed; queries are read-only, use a structured mutation instead",
                    verb
                ),
                Some(verb),
            );
        }

        let query = match Parser::new(tokens).parse() {
            Ok(q) => q,
            Err(ParseError {
                message,
                line,
                column,
            }) => {
                return ValidatedQuery::rejected(
                    text,
                    None,
                    format!("malformed query at line {}, column {}: {}", line, column, message),
                    None,
                )
            }
        };

        if let Some((reason, offending)) = check_names(&query) {
            return ValidatedQuery::rejected(text, Some(query), reason, Some(offending));
        }

        if query.fields.len() > MAX_FIELDS {
            let reason = format!(
                "query selects {} fields, which may exceed API limits; reduce to {} or fewer",
                query.fields.len(),
                MAX_FIELDS
            );
            return ValidatedQuery::rejected(text, Some(query), reason, None);
        }

        let (warnings, suggestions) = analyze(&query);
        let complexity = QueryComplexity::of(&query);
        debug!(
            resource = %query.resource,
            fields = query.fields.len(),
            complexity = ?complexity,
            "Query accepted"
        );

        ValidatedQuery {
            raw: text.to_string(),
            query: Some(query),
            verdict: Verdict::Valid,
            complexity,
            warnings,
            suggestions,
        }
    }
}

/// A write verb in command position. Verbs used as field segments or as
/// comparison operands are left to the parser.
fn find_write_verb(tokens: &[crate::lexer::Token]) -> Option<String> {
    tokens.iter().enumerate().find_map(|(i, token)| {
        let word = match &token.kind {
            TokenKind::Identifier(s) => s.to_ascii_uppercase(),
            _ => return None,
        };
        if !WRITE_VERBS.contains(&word.as_str()) {
            return None;
        }
        let prev = i.checked_sub(1).map(|p| &tokens[p].kind);
        let next = tokens.get(i + 1).map(|t| &t.kind);
        let in_path = matches!(prev, Some(TokenKind::Dot)) || matches!(next, Some(TokenKind::Dot));
        let operand = matches!(
            prev,
            Some(
                TokenKind::Eq
                    | TokenKind::Ne
                    | TokenKind::Gt
                    | TokenKind::Lt
                    | TokenKind::Ge
                    | TokenKind::Le
                    | TokenKind::Comma
                    | TokenKind::LParen
            )
        );
        if in_path || operand {
            None
        } else {
            Some(word)
        }
    })
}

/// First unknown resource or field, as (reason, offending name).
fn check_names(query: &Query) -> Option<(String, String)> {
    let from = query.resource.as_str();
    if !schema::is_known_resource(from) {
        return Some((format!("unknown resource '{}'", from), from.to_string()));
    }

    for field in query.referenced_fields() {
        match schema::check_field(from, &field.path) {
            Ok(()) => {}
            Err(FieldIssue::Unknown) => {
                return Some((
                    format!("unknown field '{}' on resource '{}'", field.path, from),
                    field.path.clone(),
                ))
            }
            Err(FieldIssue::Incompatible) => {
                return Some((
                    format!(
                        "field '{}' cannot be used in a query over resource '{}'",
                        field.path, from
                    ),
                    field.path.clone(),
                ))
            }
        }
    }
    None
}

fn analyze(query: &Query) -> (Vec<String>, Vec<String>) {
    let mut warnings = Vec::new();
    let mut suggestions = Vec::new();

    let has_metrics = query.fields.iter().any(|f| f.prefix() == "metrics");
    let has_date_filter = query.referenced_fields().any(|f| f.path == "segments.date")
        || query.conditions.iter().any(|c| c.op == CompareOp::During);

    if has_metrics && !has_date_filter {
        warnings.push(
            "Query includes metrics but no date range. Consider adding \
             'WHERE segments.date DURING LAST_30_DAYS' for better performance."
                .to_string(),
        );
    }

    if query.fields.len() > WARN_FIELDS {
        warnings.push(format!(
            "Query selects {} fields. Consider reducing to only necessary fields for better performance.",
            query.fields.len()
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for field in &query.fields {
        if !seen.insert(field.path.as_str()) {
            warnings.push(format!("Field '{}' is selected more than once.", field.path));
        }
    }

    if query.resource == "search_term_view" && !has_date_filter {
        warnings.push(
            "search_term_view queries should always include a date range to avoid \
             fetching excessive historical data."
                .to_string(),
        );
    }

    if query.limit.is_none() {
        suggestions.push(
            "Add LIMIT clause to prevent accidentally fetching too many rows. Example: LIMIT 1000"
                .to_string(),
        );
    }

    if QueryComplexity::of(query) >= QueryComplexity::Complex {
        suggestions.push(
            "Consider breaking this complex query into multiple simpler queries.".to_string(),
        );
    }

    if query.resource == "keyword_view" {
        suggestions.push(
            "For keyword performance data, consider filtering by campaign.id or ad_group.id \
             to reduce the result set."
                .to_string(),
        );
    }

    (warnings, suggestions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use adsgate_core::ErrorClass;

    fn validate(q: &str) -> ValidatedQuery {
        QueryValidator::new().validate(q)
    }

    #[test]
    fn test_accepts_known_fields_without_filter() {
        let v = validate("SELECT campaign.id, campaign.name, campaign.status FROM campaign");
        assert!(v.is_valid(), "{:?}", v.verdict);
        assert_eq!(v.resource(), Some("campaign"));
        assert_eq!(v.resource_class(), Some(ResourceClass::Campaign));
        assert_eq!(v.fields().len(), 3);
        assert_eq!(v.complexity, QueryComplexity::Simple);
    }

    #[test]
    fn test_rejects_unknown_field_naming_it() {
        let v = validate("SELECT campaign.id, campaign.budget_name FROM campaign");
        assert!(!v.is_valid());
        let reason = v.reason().unwrap();
        assert!(reason.contains("campaign.budget_name"), "{}", reason);
        assert!(reason.contains("unknown field"));

        let err = v.into_result().unwrap_err();
        assert_eq!(err.class, ErrorClass::Validation);
        assert!(err.message.contains("campaign.budget_name"));
    }

    #[test]
    fn test_rejects_unknown_field_in_where() {
        let v = validate("SELECT campaign.id FROM campaign WHERE metrics.profit > 1");
        assert!(v.reason().unwrap().contains("metrics.profit"));
    }

    #[test]
    fn test_rejects_unknown_resource() {
        let v = validate("SELECT widget.id FROM widget");
        assert_eq!(
            v.verdict,
            Verdict::Invalid {
                reason: "unknown resource 'widget'".to_string(),
                offending: Some("widget".to_string())
            }
        );
    }

    #[test]
    fn test_rejects_write_verbs() {
        for q in [
            "DELETE FROM campaign WHERE campaign.id = 1",
            "UPDATE campaign SET campaign.status = 'PAUSED'",
            "SELECT campaign.id FROM campaign; DROP campaign",
        ] {
            let v = validate(q);
            assert!(!v.is_valid(), "{}", q);
        }
        let v = validate("insert into campaign values (1)");
        assert!(v.reason().unwrap().contains("read-only"));
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(!validate("").is_valid());
        assert!(!validate("   ").is_valid());
        assert!(!validate("SELECT campaign.id").is_valid());
        assert!(!validate("SELECT campaign.id FROM campaign WHERE (campaign.id = 1").is_valid());
        assert!(validate("SELECT campaign.id FROM")
            .reason()
            .unwrap()
            .starts_with("malformed query"));
    }

    #[test]
    fn test_rejects_too_many_fields() {
        let fields: Vec<&str> = schema::METRICS.iter().take(31).copied().collect();
        let q = format!(
            "SELECT {} FROM campaign",
            fields
                .iter()
                .map(|f| format!("metrics.{}", f))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let v = validate(&q);
        assert!(v.reason().unwrap().contains("31 fields"));
    }

    #[test]
    fn test_warnings_and_suggestions() {
        let v = validate("SELECT search_term_view.search_term, metrics.clicks FROM search_term_view");
        assert!(v.is_valid());
        assert_eq!(v.warnings.len(), 2);
        assert!(v.suggestions.iter().any(|s| s.contains("LIMIT")));

        let v = validate(
            "SELECT search_term_view.search_term, metrics.clicks FROM search_term_view \
             WHERE segments.date DURING LAST_7_DAYS LIMIT 100",
        );
        assert!(v.warnings.is_empty(), "{:?}", v.warnings);
        assert!(v.suggestions.is_empty(), "{:?}", v.suggestions);
    }

    #[test]
    fn test_complexity_grades() {
        let v = validate(
            "SELECT campaign.id, campaign.name, campaign.status, metrics.clicks, \
             metrics.impressions, metrics.ctr, metrics.cost_micros, segments.date \
             FROM campaign WHERE segments.date DURING LAST_30_DAYS \
             AND campaign.status = 'ENABLED' AND metrics.clicks > 0 AND metrics.impressions > 10 \
             ORDER BY metrics.clicks DESC LIMIT 10",
        );
        // 8 fields (+1), WHERE (+1), 3 connectives (+1), segments (+1), ORDER BY (+1)
        assert_eq!(v.complexity, QueryComplexity::Complex);
    }

    #[test]
    fn test_write_verb_as_value_is_not_a_command() {
        let v = validate("SELECT campaign.id FROM campaign WHERE campaign.status IN (ENABLED, REMOVE)");
        assert!(v.is_valid(), "{:?}", v.verdict);
    }
}
