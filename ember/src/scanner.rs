use log::trace;
use phf::phf_map;
use unicode_properties::UnicodeEmoji;

use crate::error::EmberError;
use crate::token::{Literal, Token, TokenType};

/// Check if a character can start an identifier
pub fn is_identifier_start(c: char) -> bool {
    !c.is_ascii_digit() && (c.is_alphabetic() || c == '_' || is_emoji(c))
}

/// Check if a character can continue an identifier
pub fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || is_emoji(c)
}

// ASCII '#', '*' and digits carry the emoji property too; keep them operators.
fn is_emoji(c: char) -> bool {
    !c.is_ascii() && c.is_emoji_char()
}

/// All ember keywords with their token types
pub static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "break" => TokenType::Break,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "fn" => TokenType::Fn,
    "for" => TokenType::For,
    "if" => TokenType::If,
    "let" => TokenType::Let,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "return" => TokenType::Return,
    "self" => TokenType::SelfKw,
    "super" => TokenType::Super,
    "true" => TokenType::True,
    "while" => TokenType::While,
};

pub struct Scanner<'a> {
    source: &'a str,
    start: usize,
    current: usize,
    line: usize,
    start_line: usize,
    include_comments: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
            start_line: 1,
            include_comments: false,
        }
    }

    /// Create a scanner that includes comment tokens (for highlighting)
    pub fn with_comments(source: &'a str) -> Self {
        Self {
            include_comments: true,
            ..Self::new(source)
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Token, EmberError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.current > self.source.len() {
                return None;
            }

            if self.is_at_end() {
                let span = self.current..self.current;
                self.current += 1;
                return Some(Ok(Token {
                    token_type: TokenType::Eof,
                    lexeme: String::new(),
                    literal: None,
                    span,
                    line: self.line,
                }));
            }

            self.start = self.current;
            self.start_line = self.line;
            let Some(c) = self.advance() else {
                continue;
            };

            let token = match c {
                ' ' | '\r' | '\t' | '\n' => continue,
                '(' => self.add_token(TokenType::LeftParen),
                ')' => self.add_token(TokenType::RightParen),
                '{' => self.add_token(TokenType::LeftBrace),
                '}' => self.add_token(TokenType::RightBrace),
                ',' => self.add_token(TokenType::Comma),
                '.' => self.add_token(TokenType::Dot),
                '-' => self.add_token(TokenType::Minus),
                '+' => self.add_token(TokenType::Plus),
                ';' => self.add_token(TokenType::Semicolon),
                '?' => self.add_token(TokenType::Question),
                ':' => self.add_token(TokenType::Colon),
                '*' => self.add_token(TokenType::Star),
                '/' => {
                    if self.match_char('/') {
                        while self.peek() != Some('\n') && !self.is_at_end() {
                            self.advance();
                        }
                        if self.include_comments {
                            return Some(Ok(self.add_token(TokenType::Comment)));
                        }
                        continue;
                    } else if self.match_char('*') {
                        if let Err(e) = self.block_comment() {
                            return Some(Err(e));
                        }
                        if self.include_comments {
                            return Some(Ok(self.add_token(TokenType::Comment)));
                        }
                        continue;
                    } else {
                        self.add_token(TokenType::Slash)
                    }
                }
                '!' => self.one_or_two('=', TokenType::BangEqual, TokenType::Bang),
                '=' => self.one_or_two('=', TokenType::EqualEqual, TokenType::Equal),
                '<' => self.one_or_two('=', TokenType::LessEqual, TokenType::Less),
                '>' => self.one_or_two('=', TokenType::GreaterEqual, TokenType::Greater),
                '"' => return Some(self.string()),
                c if c.is_ascii_digit() => return Some(self.number()),
                c if is_identifier_start(c) => self.identifier(),
                _ => {
                    return Some(Err(EmberError::Scan {
                        message: format!("Unexpected character '{}'", c),
                        span: self.start..self.current,
                        line: self.start_line,
                    }));
                }
            };

            trace!("scanned {}", token);
            return Some(Ok(token));
        }
    }
}

impl Scanner<'_> {
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.source[self.current..].chars().next()?;
        self.current += c.len_utf8();
        if c == '\n' {
            self.line += 1;
        }
        Some(c)
    }

    fn peek(&self) -> Option<char> {
        self.source[self.current..].chars().next()
    }

    fn peek_next(&self) -> Option<char> {
        let mut chars = self.source[self.current..].chars();
        chars.next(); // skip current
        chars.next()
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn one_or_two(&mut self, second: char, matched: TokenType, single: TokenType) -> Token {
        let token_type = if self.match_char(second) {
            matched
        } else {
            single
        };
        self.add_token(token_type)
    }

    fn add_token(&self, token_type: TokenType) -> Token {
        Token {
            token_type,
            lexeme: self.source[self.start..self.current].to_string(),
            literal: None,
            span: self.start..self.current,
            line: self.start_line,
        }
    }

    fn add_token_with_literal(&self, token_type: TokenType, literal: Literal) -> Token {
        Token {
            literal: Some(literal),
            ..self.add_token(token_type)
        }
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_some_and(is_identifier_char) {
            self.advance();
        }

        let text = &self.source[self.start..self.current];
        let token_type = KEYWORDS
            .get(text)
            .copied()
            .unwrap_or(TokenType::Identifier);
        self.add_token(token_type)
    }

    fn number(&mut self) -> Result<Token, EmberError> {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
        }

        // A dot only belongs to the number when a digit follows it
        if self.peek() == Some('.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            self.advance();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        let text = &self.source[self.start..self.current];
        let value: f64 = text.parse().map_err(|_| EmberError::Scan {
            message: format!("Invalid number literal '{}'", text),
            span: self.start..self.current,
            line: self.start_line,
        })?;
        Ok(self.add_token_with_literal(TokenType::Number, Literal::Number(value)))
    }

    fn string(&mut self) -> Result<Token, EmberError> {
        let content_start = self.current;

        loop {
            match self.peek() {
                None => {
                    return Err(EmberError::Scan {
                        message: "Unterminated string".to_string(),
                        span: self.start..self.current,
                        line: self.start_line,
                    });
                }
                Some('"') => {
                    let value = self.source[content_start..self.current].to_string();
                    self.advance();
                    return Ok(
                        self.add_token_with_literal(TokenType::String, Literal::String(value))
                    );
                }
                Some(_) => {
                    self.advance();
                }
            }
        }
    }

    fn block_comment(&mut self) -> Result<(), EmberError> {
        let mut depth = 1;

        while depth > 0 {
            let Some(c) = self.advance() else {
                break;
            };

            if c == '/' && self.peek() == Some('*') {
                self.advance();
                depth += 1;
            } else if c == '*' && self.peek() == Some('/') {
                self.advance();
                depth -= 1;
            }
        }

        if depth > 0 {
            return Err(EmberError::Scan {
                message: "Unterminated block comment".to_string(),
                span: self.start..self.current,
                line: self.start_line,
            });
        }

        Ok(())
    }
}
