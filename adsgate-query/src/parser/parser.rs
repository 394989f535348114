//! Parser implementation
//!
//! Grammar:
//! ```text
//! query      := SELECT field ("," field)* FROM ident
//!               [WHERE condition (AND condition)*]
//!               [ORDER BY field [ASC|DESC] ("," field [ASC|DESC])*]
//!               [LIMIT number]
//!               [PARAMETERS ident "=" value ("," ident "=" value)*]
//! condition  := field op operand
//! field      := ident ("." ident)*
//! ```

use super::ast::*;
use crate::lexer::*;

impl Parser {
    /// Parse the tokens into a [`Query`].
    pub fn parse(&mut self) -> Result<Query, ParseError> {
        if let Some(token) = self
            .tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::Error(_)))
        {
            let message = match &token.kind {
                TokenKind::Error(msg) => format!("Lexer error: {}", msg),
                _ => "Lexer error".to_string(),
            };
            return Err(ParseError {
                message,
                line: token.span.line,
                column: token.span.column,
            });
        }

        self.expect(TokenKind::Select)?;
        if self.check(&TokenKind::From) {
            return Err(self.error("SELECT clause cannot be empty"));
        }
        let fields = self.parse_field_list()?;

        self.expect(TokenKind::From)?;
        let resource = match &self.current().kind {
            TokenKind::Identifier(s) => {
                let s = s.clone();
                self.advance();
                s
            }
            _ => return Err(self.error("FROM clause must specify a resource")),
        };

        let mut conditions = Vec::new();
        if self.check(&TokenKind::Where) {
            self.advance();
            conditions = self.parse_and_expr()?;
        }

        let mut order_by = Vec::new();
        if self.check(&TokenKind::Order) {
            self.advance();
            self.expect(TokenKind::By)?;
            order_by = self.parse_ordering_list()?;
        }

        let mut limit = None;
        if self.check(&TokenKind::Limit) {
            self.advance();
            limit = Some(self.expect_limit()?);
        }

        let mut parameters = Vec::new();
        if self.check(&TokenKind::Parameters) {
            self.advance();
            parameters = self.parse_parameters()?;
        }

        if !self.is_at_end() {
            return Err(self.error(&format!(
                "Unexpected '{}' after end of query",
                self.current().kind
            )));
        }

        Ok(Query {
            fields,
            resource,
            conditions,
            order_by,
            limit,
            parameters,
        })
    }

    fn parse_field_list(&mut self) -> Result<Vec<FieldRef>, ParseError> {
        let mut fields = vec![self.expect_field()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            fields.push(self.expect_field()?);
        }
        Ok(fields)
    }

    /// Conditions joined by AND.
    pub(crate) fn parse_and_expr(&mut self) -> Result<Vec<Condition>, ParseError> {
        let mut conditions = vec![self.parse_condition()?];

        loop {
            if self.check(&TokenKind::And) {
                self.advance();
                conditions.push(self.parse_condition()?);
            } else if self.check(&TokenKind::Or) {
                return Err(self.error("OR is not supported; combine conditions with AND"));
            } else {
                break;
            }
        }

        Ok(conditions)
    }

    pub(crate) fn parse_condition(&mut self) -> Result<Condition, ParseError> {
        let field = self.expect_field()?;

        let (op, value) = match &self.current().kind {
            TokenKind::Eq => (self.bump(CompareOp::Eq), self.parse_scalar()?),
            TokenKind::Ne => (self.bump(CompareOp::Ne), self.parse_scalar()?),
            TokenKind::Gt => (self.bump(CompareOp::Gt), self.parse_scalar()?),
            TokenKind::Lt => (self.bump(CompareOp::Lt), self.parse_scalar()?),
            TokenKind::Ge => (self.bump(CompareOp::Ge), self.parse_scalar()?),
            TokenKind::Le => (self.bump(CompareOp::Le), self.parse_scalar()?),
            TokenKind::In => (self.bump(CompareOp::In), self.parse_list()?),
            TokenKind::Like => (self.bump(CompareOp::Like), self.parse_string_value()?),
            TokenKind::RegexpMatch => (
                self.bump(CompareOp::RegexpMatch),
                self.parse_string_value()?,
            ),
            TokenKind::Not => {
                self.advance();
                match &self.current().kind {
                    TokenKind::In => (self.bump(CompareOp::NotIn), self.parse_list()?),
                    TokenKind::Like => (self.bump(CompareOp::NotLike), self.parse_string_value()?),
                    TokenKind::RegexpMatch => (
                        self.bump(CompareOp::NotRegexpMatch),
                        self.parse_string_value()?,
                    ),
                    _ => return Err(self.error("Expected IN, LIKE or REGEXP_MATCH after NOT")),
                }
            }
            TokenKind::Contains => {
                self.advance();
                let op = match &self.current().kind {
                    TokenKind::Identifier(s) if s.eq_ignore_ascii_case("any") => CompareOp::ContainsAny,
                    TokenKind::Identifier(s) if s.eq_ignore_ascii_case("all") => CompareOp::ContainsAll,
                    TokenKind::Identifier(s) if s.eq_ignore_ascii_case("none") => {
                        CompareOp::ContainsNone
                    }
                    _ => return Err(self.error("Expected ANY, ALL or NONE after CONTAINS")),
                };
                self.advance();
                (op, self.parse_list()?)
            }
            TokenKind::Is => {
                self.advance();
                let op = if self.check(&TokenKind::Not) {
                    self.advance();
                    CompareOp::IsNotNull
                } else {
                    CompareOp::IsNull
                };
                self.expect(TokenKind::Null)?;
                (op, Value::None)
            }
            TokenKind::Between => {
                self.advance();
                let low = self.parse_scalar()?;
                self.expect(TokenKind::And)?;
                let high = self.parse_scalar()?;
                (CompareOp::Between, Value::Range(Box::new(low), Box::new(high)))
            }
            TokenKind::During => {
                self.advance();
                match &self.current().kind {
                    TokenKind::Identifier(s) => {
                        let range = s.clone();
                        self.advance();
                        (CompareOp::During, Value::Identifier(range))
                    }
                    _ => return Err(self.error("Expected date range after DURING")),
                }
            }
            _ => return Err(self.error("Expected comparison operator")),
        };

        Ok(Condition { field, op, value })
    }

    pub(crate) fn parse_scalar(&mut self) -> Result<Value, ParseError> {
        match &self.current().kind {
            TokenKind::String(s) => {
                let s = s.clone();
                self.advance();
                Ok(Value::String(s))
            }
            TokenKind::Number(n) => {
                let n = *n;
                self.advance();
                Ok(Value::Number(n))
            }
            TokenKind::Identifier(s) => {
                let s = s.clone();
                self.advance();
                Ok(Value::Identifier(s))
            }
            _ => Err(self.error("Expected value")),
        }
    }

    fn parse_string_value(&mut self) -> Result<Value, ParseError> {
        match &self.current().kind {
            TokenKind::String(s) => {
                let s = s.clone();
                self.advance();
                Ok(Value::String(s))
            }
            _ => Err(self.error("Expected string")),
        }
    }

    pub(crate) fn parse_list(&mut self) -> Result<Value, ParseError> {
        self.expect(TokenKind::LParen)?;
        let mut values = vec![self.parse_scalar()?];
        while self.check(&TokenKind::Comma) {
            self.advance();
            values.push(self.parse_scalar()?);
        }
        self.expect(TokenKind::RParen)?;
        Ok(Value::List(values))
    }

    fn parse_ordering_list(&mut self) -> Result<Vec<Ordering>, ParseError> {
        let mut orderings = Vec::new();
        loop {
            let field = self.expect_field()?;
            let descending = match self.current().kind {
                TokenKind::Desc => {
                    self.advance();
                    true
                }
                TokenKind::Asc => {
                    self.advance();
                    false
                }
                _ => false,
            };
            orderings.push(Ordering { field, descending });

            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(orderings)
    }

    fn parse_parameters(&mut self) -> Result<Vec<(String, Value)>, ParseError> {
        let mut params = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            self.expect(TokenKind::Eq)?;
            params.push((name, self.parse_scalar()?));
            if self.check(&TokenKind::Comma) {
                self.advance();
            } else {
                break;
            }
        }
        Ok(params)
    }

    fn expect_limit(&mut self) -> Result<u64, ParseError> {
        match self.current().kind {
            TokenKind::Number(n) if n >= 1.0 && n.fract() == 0.0 && n <= u64::MAX as f64 => {
                self.advance();
                Ok(n as u64)
            }
            _ => Err(self.error("LIMIT must be a positive integer")),
        }
    }

    // ========================================================================
    // Helper methods
    // ========================================================================

    pub(crate) fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    pub(crate) fn advance(&mut self) {
        if !self.is_at_end() {
            self.pos += 1;
        }
    }

    /// Advance past the current token and return `op`.
    fn bump(&mut self, op: CompareOp) -> CompareOp {
        self.advance();
        op
    }

    pub(crate) fn is_at_end(&self) -> bool {
        self.current().kind == TokenKind::Eof
    }

    pub(crate) fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current().kind) == std::mem::discriminant(kind)
    }

    pub(crate) fn expect(&mut self, kind: TokenKind) -> Result<(), ParseError> {
        if self.check(&kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error(&format!(
                "Expected {} but found '{}'",
                kind,
                self.current().kind
            )))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> Result<String, ParseError> {
        match &self.current().kind {
            TokenKind::Identifier(s) => {
                let s = s.clone();
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("Expected identifier")),
        }
    }

    /// Dotted field path. Keywords are accepted after a dot, so a field
    /// like `asset.type` or `campaign.order` still parses.
    pub(crate) fn expect_field(&mut self) -> Result<FieldRef, ParseError> {
        let mut path = self.expect_identifier()?;
        while self.check(&TokenKind::Dot) {
            self.advance();
            let segment = match &self.current().kind {
                TokenKind::Identifier(s) => s.clone(),
                kind => match kind.keyword_str() {
                    Some(kw) => kw.to_ascii_lowercase(),
                    None => return Err(self.error("Expected field name after '.'")),
                },
            };
            self.advance();
            path.push('.');
            path.push_str(&segment);
        }
        Ok(FieldRef::new(path))
    }

    pub(crate) fn error(&self, msg: &str) -> ParseError {
        let span = self.current().span;
        ParseError {
            message: msg.to_string(),
            line: span.line,
            column: span.column,
        }
    }
}

/// Lex and parse a query string.
pub fn parse_query(source: &str) -> Result<Query, ParseError> {
    let tokens = Lexer::new(source).tokenize();
    Parser::new(tokens).parse()
}
