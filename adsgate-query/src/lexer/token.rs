//! Lexer token types

use std::fmt;

/// Token kinds of the query language.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Clause keywords
    Select,
    From,
    Where,
    Order,
    By,
    Asc,
    Desc,
    Limit,
    Parameters,

    // Predicate keywords
    And,
    Or,
    Not,
    In,
    Like,
    Contains,
    Is,
    Null,
    Between,
    During,
    RegexpMatch,

    // Operators
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,

    // Delimiters
    LParen,
    RParen,
    Comma,
    Dot,

    // Literals
    String(String),
    Number(f64),
    Identifier(String),

    // Special
    Eof,
    Error(String),
}

impl TokenKind {
    /// Canonical spelling of a keyword token.
    pub fn keyword_str(&self) -> Option<&'static str> {
        let s = match self {
            TokenKind::Select => "SELECT",
            TokenKind::From => "FROM",
            TokenKind::Where => "WHERE",
            TokenKind::Order => "ORDER",
            TokenKind::By => "BY",
            TokenKind::Asc => "ASC",
            TokenKind::Desc => "DESC",
            TokenKind::Limit => "LIMIT",
            TokenKind::Parameters => "PARAMETERS",
            TokenKind::And => "AND",
            TokenKind::Or => "OR",
            TokenKind::Not => "NOT",
            TokenKind::In => "IN",
            TokenKind::Like => "LIKE",
            TokenKind::Contains => "CONTAINS",
            TokenKind::Is => "IS",
            TokenKind::Null => "NULL",
            TokenKind::Between => "BETWEEN",
            TokenKind::During => "DURING",
            TokenKind::RegexpMatch => "REGEXP_MATCH",
            _ => return None,
        };
        Some(s)
    }

    /// Look up a keyword, case-insensitively.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word.to_ascii_uppercase().as_str() {
            "SELECT" => TokenKind::Select,
            "FROM" => TokenKind::From,
            "WHERE" => TokenKind::Where,
            "ORDER" => TokenKind::Order,
            "BY" => TokenKind::By,
            "ASC" => TokenKind::Asc,
            "DESC" => TokenKind::Desc,
            "LIMIT" => TokenKind::Limit,
            "PARAMETERS" => TokenKind::Parameters,
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "NOT" => TokenKind::Not,
            "IN" => TokenKind::In,
            "LIKE" => TokenKind::Like,
            "CONTAINS" => TokenKind::Contains,
            "IS" => TokenKind::Is,
            "NULL" => TokenKind::Null,
            "BETWEEN" => TokenKind::Between,
            "DURING" => TokenKind::During,
            "REGEXP_MATCH" => TokenKind::RegexpMatch,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(kw) = self.keyword_str() {
            return f.write_str(kw);
        }
        match self {
            TokenKind::Eq => f.write_str("="),
            TokenKind::Ne => f.write_str("!="),
            TokenKind::Gt => f.write_str(">"),
            TokenKind::Lt => f.write_str("<"),
            TokenKind::Ge => f.write_str(">="),
            TokenKind::Le => f.write_str("<="),
            TokenKind::LParen => f.write_str("("),
            TokenKind::RParen => f.write_str(")"),
            TokenKind::Comma => f.write_str(","),
            TokenKind::Dot => f.write_str("."),
            TokenKind::String(s) => write!(f, "'{}'", s),
            TokenKind::Number(n) => write!(f, "{}", n),
            TokenKind::Identifier(s) => f.write_str(s),
            TokenKind::Eof => f.write_str("end of query"),
            TokenKind::Error(msg) => f.write_str(msg),
            _ => Ok(()),
        }
    }
}

/// Source location span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub line: usize,
    pub column: usize,
}

impl Default for Span {
    fn default() -> Self {
        Self {
            start: 0,
            end: 0,
            line: 1,
            column: 1,
        }
    }
}

/// A token with its kind and source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}
