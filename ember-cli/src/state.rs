use ember::{KEYWORDS, TokenType, is_identifier_char};

/// Accumulates REPL input until braces balance.
pub struct ReplState {
    buffer: String,
    brace_depth: usize,
}

impl ReplState {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            brace_depth: 0,
        }
    }

    pub fn prompt(&self) -> String {
        if self.brace_depth == 0 {
            "> ".to_string()
        } else {
            format!("..{} ", self.brace_depth)
        }
    }

    /// Returns true if ready to execute (braces balanced)
    pub fn process_line(&mut self, line: &str) -> bool {
        for ch in line.chars() {
            match ch {
                '{' => self.brace_depth += 1,
                '}' => self.brace_depth = self.brace_depth.saturating_sub(1),
                _ => {}
            }
        }

        self.buffer.push_str(line);
        self.buffer.push('\n');

        self.brace_depth == 0
    }

    pub fn take_buffer(&mut self) -> String {
        self.brace_depth = 0;
        std::mem::take(&mut self.buffer)
    }

    pub fn cancel(&mut self) {
        self.buffer.clear();
        self.brace_depth = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Check if input is a bare expression that should be echoed
    pub fn should_auto_print(input: &str) -> bool {
        let trimmed = input.trim();
        if trimmed.starts_with("//") {
            return false;
        }
        if trimmed.starts_with("/*") && trimmed.ends_with("*/") {
            return false;
        }

        let code = match trimmed.find("//") {
            Some(idx) => trimmed[..idx].trim(),
            None => trimmed,
        };
        let code = match code.rfind("/*") {
            Some(start) if code.ends_with("*/") => code[..start].trim(),
            _ => code,
        };

        if code.is_empty() || code.ends_with('}') || code.ends_with(';') {
            return false;
        }

        !starts_with_statement_keyword(code)
    }

    /// Wrap input in a print call for auto-printing
    pub fn wrap_for_print(input: &str) -> String {
        format!("print({});", input.trim())
    }
}

/// Incomplete statements are left alone so the parser reports them.
fn starts_with_statement_keyword(code: &str) -> bool {
    let end = code
        .char_indices()
        .find(|(_, c)| !is_identifier_char(*c))
        .map_or(code.len(), |(i, _)| i);
    matches!(
        KEYWORDS.get(&code[..end]),
        Some(
            TokenType::Let
                | TokenType::Fn
                | TokenType::Class
                | TokenType::If
                | TokenType::Else
                | TokenType::While
                | TokenType::For
                | TokenType::Return
                | TokenType::Break
        )
    )
}
