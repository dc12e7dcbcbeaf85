//! Recursive-descent parser from tokens to `ParsedPath`.
//!
//! ```text
//! path    := topic step*
//! step    := '.' ident | '[' slice ']' | '{' filter '}'
//! slice   := int | int? ':' int?
//! filter  := ident ('.' ident)* op literal
//! literal := int | float | string | 'true' | 'false'
//! ```

use super::ast::{index_end, ComparisonOp, FilterLiteral, FilterStep, ParsedPath, PathStep};
use super::error::{ParseError, ParseErrorKind, ParseResult};
use super::lexer::Lexer;
use super::tokens::{Spanned, Token};

/// Parses a message path. Pure, and safe to call from any thread.
pub fn parse(input: &str) -> ParseResult<ParsedPath> {
    let mut lexer = Lexer::new(input);
    let topic_name = lexer.topic()?;
    let tokens = lexer.tokenize()?;
    let steps = Parser {
        tokens,
        pos: 0,
        end: input.len(),
    }
    .steps()?;
    Ok(ParsedPath { topic_name, steps })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn advance(&mut self, expected: &'static str) -> ParseResult<Spanned> {
        match self.tokens.get(self.pos) {
            Some(spanned) => {
                self.pos += 1;
                Ok(spanned.clone())
            }
            None => Err(ParseError::new(
                ParseErrorKind::UnexpectedEnd { expected },
                self.end..self.end,
            )),
        }
    }

    fn unexpected(spanned: &Spanned, expected: &'static str) -> ParseError {
        ParseError::new(
            ParseErrorKind::UnexpectedToken {
                expected,
                found: spanned.token.to_string(),
            },
            spanned.span.clone(),
        )
    }

    fn expect(&mut self, token: Token, expected: &'static str) -> ParseResult<()> {
        let spanned = self.advance(expected)?;
        if spanned.token == token {
            Ok(())
        } else {
            Err(Self::unexpected(&spanned, expected))
        }
    }

    fn steps(mut self) -> ParseResult<Vec<PathStep>> {
        let mut steps = Vec::new();
        while self.pos < self.tokens.len() {
            let spanned = self.advance("'.', '[' or '{'")?;
            let step = match spanned.token {
                Token::Dot => PathStep::Name(self.identifier("field name")?),
                Token::LeftBracket => self.slice()?,
                Token::LeftBrace => PathStep::Filter(self.filter()?),
                _ => return Err(Self::unexpected(&spanned, "'.', '[' or '{'")),
            };
            steps.push(step);
        }
        Ok(steps)
    }

    fn identifier(&mut self, expected: &'static str) -> ParseResult<String> {
        let spanned = self.advance(expected)?;
        match spanned.token {
            Token::Identifier(name) => Ok(name),
            _ => Err(Self::unexpected(&spanned, expected)),
        }
    }

    fn slice(&mut self) -> ParseResult<PathStep> {
        let start = match self.peek() {
            Some(Token::Colon) => None,
            _ => Some(self.bound()?),
        };
        let spanned = self.advance("':' or ']'")?;
        match (&spanned.token, start) {
            (Token::RightBracket, Some(index)) => Ok(PathStep::Slice {
                start: Some(index),
                end: index_end(index),
            }),
            (Token::Colon, start) => {
                let end = match self.peek() {
                    Some(Token::RightBracket) => None,
                    _ => Some(self.bound()?),
                };
                self.expect(Token::RightBracket, "']'")?;
                Ok(PathStep::Slice { start, end })
            }
            _ => Err(Self::unexpected(&spanned, "':' or ']'")),
        }
    }

    fn bound(&mut self) -> ParseResult<i64> {
        let spanned = self.advance("integer slice bound")?;
        match spanned.token {
            Token::Integer(i) => Ok(i),
            Token::Variable(name) => Err(ParseError::new(
                ParseErrorKind::UnsupportedVariable(name),
                spanned.span,
            )),
            Token::Identifier(first) => {
                let mut text = first;
                let mut span = spanned.span;
                loop {
                    let (next, next_end) = match (self.tokens.get(self.pos), self.tokens.get(self.pos + 1)) {
                        (
                            Some(Spanned { token: Token::Dot, .. }),
                            Some(Spanned { token: Token::Identifier(next), span: next_span }),
                        ) => (next.clone(), next_span.end),
                        _ => break,
                    };
                    text.push('.');
                    text.push_str(&next);
                    span.end = next_end;
                    self.pos += 2;
                }
                Err(ParseError::new(
                    ParseErrorKind::UnsupportedDynamicBound(text),
                    span,
                ))
            }
            _ => Err(Self::unexpected(&spanned, "integer slice bound")),
        }
    }

    fn filter(&mut self) -> ParseResult<FilterStep> {
        let mut field = vec![self.identifier("filter field")?];
        while let Some(Token::Dot) = self.peek() {
            self.pos += 1;
            field.push(self.identifier("filter field")?);
        }

        let spanned = self.advance("comparison operator")?;
        let operator: ComparisonOp = match spanned.token {
            Token::Comparison(op) => op,
            _ => return Err(Self::unexpected(&spanned, "comparison operator")),
        };

        let spanned = self.advance("filter value")?;
        let value = match spanned.token {
            Token::Integer(i) => FilterLiteral::Int(i),
            Token::Number(x) => FilterLiteral::Float(x),
            Token::String(s) => FilterLiteral::String(s),
            Token::Identifier(ref word) if word == "true" => FilterLiteral::Bool(true),
            Token::Identifier(ref word) if word == "false" => FilterLiteral::Bool(false),
            Token::Variable(name) => {
                return Err(ParseError::new(
                    ParseErrorKind::UnsupportedVariable(name),
                    spanned.span,
                ))
            }
            _ => return Err(Self::unexpected(&spanned, "filter value")),
        };

        self.expect(Token::RightBrace, "'}'")?;
        Ok(FilterStep {
            field,
            operator,
            value,
        })
    }
}
