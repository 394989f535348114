//! AST types

use crate::lexer::{Span, Token, TokenKind};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// QUERY AST
// ============================================================================

/// A parsed read query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub fields: Vec<FieldRef>,
    pub resource: String,
    /// Conjunction of conditions; the language has no disjunction.
    pub conditions: Vec<Condition>,
    pub order_by: Vec<Ordering>,
    pub limit: Option<u64>,
    pub parameters: Vec<(String, Value)>,
}

impl Query {
    /// Every field named anywhere in the query, in order of appearance.
    pub fn referenced_fields(&self) -> impl Iterator<Item = &FieldRef> {
        self.fields
            .iter()
            .chain(self.conditions.iter().map(|c| &c.field))
            .chain(self.order_by.iter().map(|o| &o.field))
    }
}

/// A dotted field path such as `ad_group_criterion.keyword.text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub path: String,
}

impl FieldRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// Leading segment: a resource name, `metrics` or `segments`.
    pub fn prefix(&self) -> &str {
        self.path.split('.').next().unwrap_or("")
    }

    /// Segment right after the prefix, if any.
    pub fn attribute(&self) -> Option<&str> {
        self.path.split('.').nth(1)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: FieldRef,
    pub op: CompareOp,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    NotIn,
    Like,
    NotLike,
    ContainsAny,
    ContainsAll,
    ContainsNone,
    IsNull,
    IsNotNull,
    Between,
    During,
    RegexpMatch,
    NotRegexpMatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    String(String),
    Number(f64),
    /// Bare word such as `ENABLED` or `LAST_30_DAYS`.
    Identifier(String),
    List(Vec<Value>),
    Range(Box<Value>, Box<Value>),
    /// Operand of `IS NULL` / `IS NOT NULL`.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    pub field: FieldRef,
    pub descending: bool,
}

// ============================================================================
// PARSE ERROR
// ============================================================================

/// Parse error with source location.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at line {}, column {}: {}",
            self.line, self.column, self.message
        )
    }
}

impl std::error::Error for ParseError {}

// ============================================================================
// PARSER
// ============================================================================

/// Recursive-descent parser over a token vector.
pub struct Parser {
    pub(crate) tokens: Vec<Token>,
    pub(crate) pos: usize,
}

impl Parser {
    /// Create a new parser from a vector of tokens.
    pub fn new(mut tokens: Vec<Token>) -> Self {
        let terminated = tokens
            .last()
            .map(|t| t.kind == TokenKind::Eof)
            .unwrap_or(false);
        if !terminated {
            let span = tokens.last().map(|t| t.span).unwrap_or_default();
            tokens.push(Token {
                kind: TokenKind::Eof,
                span: Span {
                    start: span.end,
                    ..span
                },
            });
        }
        Self { tokens, pos: 0 }
    }
}
