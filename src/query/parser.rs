//! Recursive-descent parser for the filter query language.
//!
//! Grammar (EBNF):
//! ```text
//! query      = or_expr ;
//! or_expr    = and_expr, { "OR", and_expr } ;
//! and_expr   = unary_expr, { ["AND"], unary_expr } ;
//! unary_expr = { "!" }, primary ;
//! primary    = atom | "(", or_expr, ")" ;
//! atom       = string | "c" string | "@" ident | property | "!!!" | "@@@" | "$$$" ;
//! ```
//!
//! Precedence, tightest to loosest: `!`, AND (explicit or implicit via
//! juxtaposition), OR. Parentheses override.

use super::tokenizer::{tokenize, Token};
use super::types::{PropertyMatch, QueryExpr, StringMatch};

#[derive(Debug)]
pub struct QueryParseError {
    pub message: String,
}

impl std::fmt::Display for QueryParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for QueryParseError {}

fn parse_error(message: impl Into<String>) -> QueryParseError {
    QueryParseError { message: message.into() }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn current(&self) -> &Token {
        static EOF: Token = Token::Eof;
        self.tokens.get(self.pos).unwrap_or(&EOF)
    }

    fn advance(&mut self) -> Token {
        let token = self.current().clone();
        self.pos += 1;
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.current() == token
    }

    fn parse(&mut self) -> Result<QueryExpr, QueryParseError> {
        if self.check(&Token::Eof) {
            return Err(parse_error("Empty query"));
        }
        let expr = self.parse_or()?;
        if !self.check(&Token::Eof) {
            return Err(parse_error(format!("Unexpected token: {:?}", self.current())));
        }
        Ok(expr)
    }

    fn parse_or(&mut self) -> Result<QueryExpr, QueryParseError> {
        let mut operands = vec![self.parse_and()?];
        while self.check(&Token::Or) {
            self.advance();
            operands.push(self.parse_and()?);
        }
        Ok(if operands.len() == 1 { operands.pop().expect("non-empty") } else { QueryExpr::Or(operands) })
    }

    fn can_start_unary(&self) -> bool {
        matches!(
            self.current(),
            Token::Str { .. }
                | Token::Property { .. }
                | Token::AnyError
                | Token::AnyRunningAgent
                | Token::AnyRunningProcess
                | Token::Not
                | Token::LParen
        )
    }

    fn parse_and(&mut self) -> Result<QueryExpr, QueryParseError> {
        let mut operands = vec![self.parse_unary()?];
        loop {
            if self.check(&Token::And) {
                self.advance();
                operands.push(self.parse_unary()?);
            } else if self.can_start_unary() {
                // Implicit AND: juxtaposed atoms.
                operands.push(self.parse_unary()?);
            } else {
                break;
            }
        }
        Ok(if operands.len() == 1 { operands.pop().expect("non-empty") } else { QueryExpr::And(operands) })
    }

    fn parse_unary(&mut self) -> Result<QueryExpr, QueryParseError> {
        let mut not_count = 0;
        while self.check(&Token::Not) {
            self.advance();
            not_count += 1;
        }
        let mut expr = self.parse_primary()?;
        for _ in 0..not_count {
            expr = QueryExpr::Not(Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<QueryExpr, QueryParseError> {
        match self.advance() {
            Token::Str { value, case_sensitive } => {
                Ok(QueryExpr::Str(StringMatch { value, case_sensitive }))
            }
            Token::Property { key, value } => Ok(QueryExpr::Property(PropertyMatch { key, value })),
            Token::AnyError => Ok(QueryExpr::AnyErrorSuffix),
            Token::AnyRunningAgent => Ok(QueryExpr::AnyRunningAgent),
            Token::AnyRunningProcess => Ok(QueryExpr::AnyRunningProcess),
            Token::LParen => {
                let expr = self.parse_or()?;
                if !self.check(&Token::RParen) {
                    return Err(parse_error("Expected ')'"));
                }
                self.advance();
                Ok(expr)
            }
            other => Err(parse_error(format!("Expected atom or '(', got {other:?}"))),
        }
    }
}

/// Parse a query string into its AST.
pub fn parse_query(query: &str) -> Result<QueryExpr, QueryParseError> {
    let tokens = tokenize(query).map_err(|e| parse_error(e.to_string()))?;
    Parser { tokens, pos: 0 }.parse()
}
