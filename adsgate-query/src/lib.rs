//! ADSGATE Query - Read-Only Query Gate
//!
//! Free-form account queries pass through here before any quota is spent.
//!
//! ```text
//! query text
//!     ↓
//! Lexer (tokens + spans)
//!     ↓
//! Parser (SELECT / FROM / WHERE / ORDER BY / LIMIT)
//!     ↓
//! Schema allow-list (resources, fields, attribution)
//!     ↓
//! ValidatedQuery (verdict, complexity, warnings)
//! ```

pub mod lexer;
pub mod parser;
pub mod schema;
pub mod validator;

pub use parser::{parse_query, CompareOp, Condition, FieldRef, Ordering, ParseError, Query, Value};
pub use validator::{QueryComplexity, QueryValidator, ValidatedQuery, Verdict};
