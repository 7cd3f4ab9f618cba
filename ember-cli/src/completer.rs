use ember::{KEYWORDS, Scanner, TokenType, is_identifier_char};
use rustyline::Context;
use rustyline::Helper;
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use std::borrow::Cow;
use std::cell::RefCell;

const KEYWORD: &str = "\x1b[35m";
const STRING: &str = "\x1b[32m";
const NUMBER: &str = "\x1b[33m";
const COMMENT: &str = "\x1b[90m";
const VARIABLE: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

/// Rustyline helper for the REPL: completes keywords and defined names,
/// and colors input using the scanner.
pub struct EmberHelper {
    variables: RefCell<Vec<String>>,
}

impl EmberHelper {
    pub fn new() -> Self {
        Self {
            variables: RefCell::new(Vec::new()),
        }
    }

    pub fn set_variables(&self, vars: Vec<String>) {
        *self.variables.borrow_mut() = vars;
    }

    /// Find the start position of the current word being typed
    fn find_word_start(line: &str, pos: usize) -> usize {
        line[..pos]
            .char_indices()
            .rev()
            .find(|(_, c)| !is_identifier_char(*c))
            .map_or(0, |(i, c)| i + c.len_utf8())
    }

    fn get_completions(prefix: &str, variables: &[String]) -> Vec<String> {
        if prefix.is_empty() {
            return Vec::new();
        }

        let mut completions: Vec<String> = KEYWORDS
            .keys()
            .filter(|keyword| keyword.starts_with(prefix))
            .map(|keyword| keyword.to_string())
            .collect();
        completions.sort();

        for var in variables {
            if var.starts_with(prefix) && !completions.contains(var) {
                completions.push(var.clone());
            }
        }

        completions
    }

    pub fn highlight_line(line: &str, variables: &[String]) -> String {
        if line.is_empty() {
            return String::new();
        }

        let mut result = String::new();
        let mut pos = 0usize;

        // Scan errors are skipped; their text is copied through uncolored.
        for token in Scanner::with_comments(line).flatten() {
            if token.token_type == TokenType::Eof {
                break;
            }

            if token.span.start > pos {
                result.push_str(&line[pos..token.span.start]);
            }

            let color = match token.token_type {
                TokenType::Comment => Some(COMMENT),
                TokenType::String => Some(STRING),
                TokenType::Number => Some(NUMBER),
                TokenType::Identifier if variables.contains(&token.lexeme) => Some(VARIABLE),
                t if t.is_keyword() => Some(KEYWORD),
                _ => None,
            };

            let text = &line[token.span.clone()];
            match color {
                Some(c) => {
                    result.push_str(c);
                    result.push_str(text);
                    result.push_str(RESET);
                }
                None => result.push_str(text),
            }
            pos = token.span.end;
        }

        if pos < line.len() {
            result.push_str(&line[pos..]);
        }

        result
    }
}

impl Helper for EmberHelper {}

impl Highlighter for EmberHelper {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        let variables = self.variables.borrow();
        Cow::Owned(Self::highlight_line(line, &variables))
    }

    fn highlight_char(
        &self,
        _line: &str,
        _pos: usize,
        _kind: rustyline::highlight::CmdKind,
    ) -> bool {
        true
    }
}

impl Hinter for EmberHelper {
    type Hint = String;
}

impl Validator for EmberHelper {}

impl Completer for EmberHelper {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        let start = Self::find_word_start(line, pos);
        let prefix = &line[start..pos];
        let variables = self.variables.borrow();

        let pairs = Self::get_completions(prefix, &variables)
            .into_iter()
            .map(|s| Pair {
                display: s.clone(),
                replacement: s,
            })
            .collect();

        Ok((start, pairs))
    }
}
