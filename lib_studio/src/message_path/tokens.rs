//! Token definitions for message path lexing.

use std::fmt;
use std::ops::Range;

use super::ast::ComparisonOp;

/// Tokens of the step list that follows the topic name.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `.`
    Dot,
    /// `[`
    LeftBracket,
    /// `]`
    RightBracket,
    /// `{`
    LeftBrace,
    /// `}`
    RightBrace,
    /// `:`
    Colon,
    /// Field name, also `true` / `false` in literal position.
    Identifier(String),
    Integer(i64),
    Number(f64),
    /// Double-quoted string, escapes already resolved.
    String(String),
    /// `==`, `!=`, `<`, `<=`, `>`, `>=`
    Comparison(ComparisonOp),
    /// `$name`
    Variable(String),
}

impl Token {
    #[inline]
    pub fn is_comparison_operator(&self) -> bool {
        matches!(self, Token::Comparison(_))
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Dot => f.write_str("'.'"),
            Token::LeftBracket => f.write_str("'['"),
            Token::RightBracket => f.write_str("']'"),
            Token::LeftBrace => f.write_str("'{'"),
            Token::RightBrace => f.write_str("'}'"),
            Token::Colon => f.write_str("':'"),
            Token::Identifier(name) => write!(f, "identifier '{}'", name),
            Token::Integer(i) => write!(f, "integer {}", i),
            Token::Number(x) => write!(f, "number {}", x),
            Token::String(s) => write!(f, "string {:?}", s),
            Token::Comparison(op) => write!(f, "'{}'", op.as_str()),
            Token::Variable(name) => write!(f, "variable ${}", name),
        }
    }
}

/// A token together with its byte range in the original input.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub span: Range<usize>,
}
