mod ast;
mod environment;
mod error;
mod interpreter;
mod native;
mod parser;
mod resolver;
mod scanner;
mod token;
mod value;

use std::io::Write;

use log::debug;

pub use ast::{Expr, ExprId, FunctionDecl, Stmt};
pub use environment::{EnvId, Environments, Slot};
pub use error::{EmberError, RuntimeErrorKind};
pub use interpreter::{Flow, Interpreter, MAX_CALL_DEPTH};
pub use parser::{MAX_ARGUMENTS, Parser};
pub use resolver::{Resolutions, Resolver, resolve};
pub use scanner::{KEYWORDS, Scanner, is_identifier_char, is_identifier_start};
pub use token::{Literal, Token, TokenType};
pub use value::{Callable, Class, Function, INITIALIZER_NAME, Instance, NativeFunction, Value};

/// A scripting session. Globals defined by one `run` stay visible to the
/// next, which is what the REPL relies on.
pub struct Ember {
    interpreter: Interpreter,
}

impl Default for Ember {
    fn default() -> Self {
        Self::new()
    }
}

impl Ember {
    pub fn new() -> Self {
        Self {
            interpreter: Interpreter::new(),
        }
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.interpreter.variable_names()
    }

    /// Scans and parses `source` without running it.
    pub fn parse(&self, source: &str) -> Result<Vec<Stmt>, Vec<EmberError>> {
        let mut errors = Vec::new();
        let mut tokens = Vec::new();
        for result in Scanner::new(source) {
            match result {
                Ok(token) => tokens.push(token),
                Err(e) => errors.push(e),
            }
        }
        debug!("scanned {} tokens, {} errors", tokens.len(), errors.len());

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut parser = Parser::new(tokens);
        let statements = parser.parse();
        let errors = parser.take_errors();

        if errors.is_empty() {
            Ok(statements)
        } else {
            Err(errors)
        }
    }

    /// Runs `source`, returning every error it produced. Static errors keep
    /// the program from running at all; a runtime error stops it where it
    /// happened.
    pub fn run<O: Write>(&mut self, source: &str, stdout: O) -> Vec<EmberError> {
        match self.eval(source, stdout) {
            Ok(_) => Vec::new(),
            Err(errors) => errors,
        }
    }

    /// Like `run`, but also hands back the value of the final statement when
    /// it is a bare expression.
    pub fn eval<O: Write>(
        &mut self,
        source: &str,
        mut stdout: O,
    ) -> Result<Option<Value>, Vec<EmberError>> {
        let statements = self.parse(source)?;

        let resolutions =
            Resolver::with_globals(self.interpreter.variable_names()).resolve(&statements)?;
        self.interpreter.set_resolutions(resolutions);

        let result = self
            .interpreter
            .interpret(&statements, &mut stdout)
            .map_err(|e| vec![e]);
        self.interpreter.collect_garbage();
        result
    }

    /// Scopes currently allocated by the session.
    pub fn live_environments(&self) -> usize {
        self.interpreter.live_environments()
    }
}
