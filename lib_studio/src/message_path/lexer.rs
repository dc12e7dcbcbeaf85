//! Character-level scanning of a message path.
//!
//! The topic name is split off first (it has its own, looser character set and
//! may be quoted). The remainder is tokenized into `Spanned` tokens whose spans
//! are byte offsets into the original input.

use super::ast::ComparisonOp;
use super::error::{ParseError, ParseErrorKind, ParseResult};
use super::tokens::{Spanned, Token};

pub(crate) struct Lexer<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    i: usize,
}

impl<'a> Lexer<'a> {
    pub(crate) fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            i: 0,
        }
    }

    fn offset(&self, i: usize) -> usize {
        self.chars.get(i).map(|(o, _)| *o).unwrap_or(self.input.len())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.i).map(|(_, c)| *c)
    }

    fn peek_at(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.i + ahead).map(|(_, c)| *c)
    }

    fn error(&self, kind: ParseErrorKind, start: usize, end: usize) -> ParseError {
        ParseError::new(kind, self.offset(start)..self.offset(end))
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.i += 1;
        }
    }

    /// Reads the leading topic name, quoted or bare.
    pub(crate) fn topic(&mut self) -> ParseResult<String> {
        self.skip_whitespace();
        let start = self.i;
        match self.peek() {
            None => Err(self.error(ParseErrorKind::EmptyInput, start, start)),
            Some('"') => {
                let name = self.string_literal()?;
                if name.is_empty() {
                    return Err(self.error(ParseErrorKind::MissingTopic, start, self.i));
                }
                Ok(name)
            }
            Some(_) => {
                while let Some(c) = self.peek() {
                    if matches!(c, '.' | '[' | '{') || c.is_whitespace() {
                        break;
                    }
                    if matches!(c, ']' | '}' | '"' | '$' | '=' | '!' | '<' | '>') {
                        return Err(self.error(
                            ParseErrorKind::UnexpectedCharacter(c),
                            self.i,
                            self.i + 1,
                        ));
                    }
                    self.i += 1;
                }
                if self.i == start {
                    return Err(self.error(ParseErrorKind::MissingTopic, start, start + 1));
                }
                Ok(self.input[self.offset(start)..self.offset(self.i)].to_string())
            }
        }
    }

    /// Tokenizes everything after the topic name.
    pub(crate) fn tokenize(&mut self) -> ParseResult<Vec<Spanned>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek() else {
                return Ok(tokens);
            };
            let start = self.i;
            let token = match c {
                '.' => self.single(Token::Dot),
                '[' => self.single(Token::LeftBracket),
                ']' => self.single(Token::RightBracket),
                '{' => self.single(Token::LeftBrace),
                '}' => self.single(Token::RightBrace),
                ':' => self.single(Token::Colon),
                '=' | '!' | '<' | '>' => self.comparison(c)?,
                '"' => Token::String(self.string_literal()?),
                '$' => self.variable()?,
                '-' | '0'..='9' => self.number()?,
                c if c.is_alphabetic() || c == '_' => Token::Identifier(self.identifier()),
                other => {
                    return Err(self.error(
                        ParseErrorKind::UnexpectedCharacter(other),
                        start,
                        start + 1,
                    ))
                }
            };
            tokens.push(Spanned {
                token,
                span: self.offset(start)..self.offset(self.i),
            });
        }
    }

    fn single(&mut self, token: Token) -> Token {
        self.i += 1;
        token
    }

    fn comparison(&mut self, first: char) -> ParseResult<Token> {
        let followed_by_eq = self.peek_at(1) == Some('=');
        let op = match (first, followed_by_eq) {
            ('=', true) => ComparisonOp::Equal,
            ('!', true) => ComparisonOp::NotEqual,
            ('<', true) => ComparisonOp::LessEq,
            ('>', true) => ComparisonOp::GreaterEq,
            ('<', false) => ComparisonOp::Less,
            ('>', false) => ComparisonOp::Greater,
            (other, _) => {
                return Err(self.error(
                    ParseErrorKind::UnexpectedCharacter(other),
                    self.i,
                    self.i + 1,
                ))
            }
        };
        self.i += if followed_by_eq { 2 } else { 1 };
        Ok(Token::Comparison(op))
    }

    fn identifier(&mut self) -> String {
        let start = self.i;
        while matches!(self.peek(), Some(c) if c.is_alphanumeric() || c == '_') {
            self.i += 1;
        }
        self.input[self.offset(start)..self.offset(self.i)].to_string()
    }

    fn variable(&mut self) -> ParseResult<Token> {
        let start = self.i;
        self.i += 1;
        let name = self.identifier();
        if name.is_empty() {
            return Err(self.error(ParseErrorKind::UnexpectedCharacter('$'), start, start + 1));
        }
        Ok(Token::Variable(name))
    }

    /// `"..."` with `\"`, `\\`, `\n` and `\t` escapes. Cursor is on the opening quote.
    fn string_literal(&mut self) -> ParseResult<String> {
        let start = self.i;
        self.i += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => {
                    return Err(self.error(ParseErrorKind::UnterminatedString, start, self.i));
                }
                Some('"') => {
                    self.i += 1;
                    return Ok(out);
                }
                Some('\\') => {
                    let escaped = self.peek_at(1).ok_or_else(|| {
                        self.error(ParseErrorKind::UnterminatedString, start, self.i + 1)
                    })?;
                    out.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    self.i += 2;
                }
                Some(c) => {
                    out.push(c);
                    self.i += 1;
                }
            }
        }
    }

    fn number(&mut self) -> ParseResult<Token> {
        let start = self.i;
        if self.peek() == Some('-') {
            self.i += 1;
        }
        let digits_start = self.i;
        while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
            self.i += 1;
        }
        if self.i == digits_start {
            return Err(self.error(ParseErrorKind::UnexpectedCharacter('-'), start, start + 1));
        }

        let mut is_float = false;
        if self.peek() == Some('.') && matches!(self.peek_at(1), Some(c) if c.is_ascii_digit()) {
            is_float = true;
            self.i += 1;
            while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                self.i += 1;
            }
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if matches!(self.peek_at(1 + sign), Some(c) if c.is_ascii_digit()) {
                is_float = true;
                self.i += 1 + sign;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit()) {
                    self.i += 1;
                }
            }
        }

        let input = self.input;
        let text = &input[self.offset(start)..self.offset(self.i)];
        let invalid = || ParseErrorKind::InvalidNumber(text.to_string());
        if is_float {
            match text.parse::<f64>() {
                Ok(x) if x.is_finite() => Ok(Token::Number(x)),
                _ => Err(self.error(invalid(), start, self.i)),
            }
        } else {
            text.parse::<i64>()
                .map(Token::Integer)
                .map_err(|_| self.error(invalid(), start, self.i))
        }
    }
}
