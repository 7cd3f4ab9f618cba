use std::fmt;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenType {
    // Single-character tokens
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,
    Question,
    Colon,

    // One or two character tokens
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals
    String,
    Number,
    Identifier,

    // Keywords
    And,
    Break,
    Class,
    Else,
    False,
    Fn,
    For,
    If,
    Let,
    Nil,
    Or,
    Return,
    SelfKw,
    Super,
    True,
    While,

    /// Only produced by `Scanner::with_comments` (REPL highlighting).
    Comment,
    Eof,
}

impl TokenType {
    pub fn is_keyword(self) -> bool {
        matches!(
            self,
            TokenType::And
                | TokenType::Break
                | TokenType::Class
                | TokenType::Else
                | TokenType::False
                | TokenType::Fn
                | TokenType::For
                | TokenType::If
                | TokenType::Let
                | TokenType::Nil
                | TokenType::Or
                | TokenType::Return
                | TokenType::SelfKw
                | TokenType::Super
                | TokenType::True
                | TokenType::While
        )
    }
}

/// Literal payload carried by number/string tokens and literal expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Number(f64),
    String(String),
    Bool(bool),
    Nil,
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Number(n) => write!(f, "{}", n),
            Literal::String(s) => write!(f, "{}", s),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Nil => write!(f, "nil"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub token_type: TokenType,
    pub lexeme: String,
    pub literal: Option<Literal>,
    /// Byte range in the source, used for caret diagnostics.
    pub span: Range<usize>,
    /// 1-based source line.
    pub line: usize,
}

impl Token {
    /// Builds an identifier token; handy for synthesized names and tests.
    pub fn identifier(name: &str, span: Range<usize>, line: usize) -> Self {
        Self {
            token_type: TokenType::Identifier,
            lexeme: name.to_string(),
            literal: None,
            span,
            line,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.literal {
            Some(literal) => write!(f, "{:?} {} {}", self.token_type, self.lexeme, literal),
            None => write!(f, "{:?} {} None", self.token_type, self.lexeme),
        }
    }
}
