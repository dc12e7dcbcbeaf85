//! Error types of the message-path engine.
//!
//! Parsing failures are returned as values carrying the byte span of the
//! offending input, so a caller can underline it next to the text field.
//! Evaluation never fails; the only evaluation-adjacent error is the
//! caller-level `MultipleResultsError`.

use std::fmt;
use std::ops::Range;

use thiserror::Error;

/// What went wrong while parsing a path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The input was empty or whitespace only.
    EmptyInput,
    /// The path does not start with a topic name.
    MissingTopic,
    /// A quoted string was never closed.
    UnterminatedString,
    /// A character that cannot start any token.
    UnexpectedCharacter(char),
    /// A token that does not fit the grammar at this position.
    UnexpectedToken { expected: &'static str, found: String },
    /// The input ended while more was expected.
    UnexpectedEnd { expected: &'static str },
    /// A numeric literal that does not fit its type.
    InvalidNumber(String),
    /// A `$variable` used as a slice bound or filter value.
    UnsupportedVariable(String),
    /// A slice bound written as a nested path instead of an integer literal.
    UnsupportedDynamicBound(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::EmptyInput => f.write_str("path is empty"),
            ParseErrorKind::MissingTopic => f.write_str("path must start with a topic name"),
            ParseErrorKind::UnterminatedString => f.write_str("unterminated string literal"),
            ParseErrorKind::UnexpectedCharacter(c) => write!(f, "unexpected character '{}'", c),
            ParseErrorKind::UnexpectedToken { expected, found } => {
                write!(f, "expected {}, found {}", expected, found)
            }
            ParseErrorKind::UnexpectedEnd { expected } => {
                write!(f, "expected {}, found end of path", expected)
            }
            ParseErrorKind::InvalidNumber(text) => write!(f, "invalid number '{}'", text),
            ParseErrorKind::UnsupportedVariable(name) => write!(
                f,
                "message paths using variables are not supported (${})",
                name
            ),
            ParseErrorKind::UnsupportedDynamicBound(text) => write!(
                f,
                "slice bounds must be integer literals, '{}' is a dynamic bound",
                text
            ),
        }
    }
}

/// A malformed path, with the byte range of the offending text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} (at {}..{})", span.start, span.end)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub span: Range<usize>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, span: Range<usize>) -> Self {
        Self { kind, span }
    }

    /// The offending slice of `input`, clamped to valid char boundaries.
    pub fn snippet<'a>(&self, input: &'a str) -> &'a str {
        let start = self.span.start.min(input.len());
        let end = self.span.end.clamp(start, input.len());
        input.get(start..end).unwrap_or("")
    }
}

/// Raised by callers that require exactly one value from a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("message path produced multiple results ({count} or more)")]
pub struct MultipleResultsError {
    /// Number of results seen before giving up (at least 2).
    pub count: usize,
}

pub type ParseResult<T> = Result<T, ParseError>;
