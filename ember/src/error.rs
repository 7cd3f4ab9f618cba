use std::fmt;
use std::ops::Range;
use thiserror::Error;

/// Which runtime failure occurred. Front-ends use it for headers and tests
/// use it to tell failures apart without matching on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeErrorKind {
    Type,
    UndefinedVariable,
    UninitializedVariable,
    Arity,
    NotCallable,
    UndefinedProperty,
    StackOverflow,
    Native,
}

impl fmt::Display for RuntimeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RuntimeErrorKind::Type => "TypeError",
            RuntimeErrorKind::UndefinedVariable => "UndefinedVariable",
            RuntimeErrorKind::UninitializedVariable => "UninitializedVariable",
            RuntimeErrorKind::Arity => "ArityError",
            RuntimeErrorKind::NotCallable => "NotCallable",
            RuntimeErrorKind::UndefinedProperty => "UndefinedProperty",
            RuntimeErrorKind::StackOverflow => "StackOverflow",
            RuntimeErrorKind::Native => "NativeError",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum EmberError {
    #[error("Could not read script: {0}")]
    Io(#[from] std::io::Error),

    #[error("[line {line}] Scan error: {message}")]
    Scan {
        message: String,
        span: Range<usize>,
        line: usize,
    },

    #[error("[line {line}] Parse error: {message}")]
    Parse {
        message: String,
        span: Range<usize>,
        line: usize,
    },

    #[error("[line {line}] Resolution error: {message}")]
    Resolution {
        message: String,
        span: Range<usize>,
        line: usize,
    },

    #[error("[line {line}] {kind}: {message}")]
    Runtime {
        kind: RuntimeErrorKind,
        message: String,
        span: Range<usize>,
        line: usize,
    },
}

impl EmberError {
    pub fn span(&self) -> Option<Range<usize>> {
        match self {
            EmberError::Io(_) => None,
            EmberError::Scan { span, .. }
            | EmberError::Parse { span, .. }
            | EmberError::Resolution { span, .. }
            | EmberError::Runtime { span, .. } => Some(span.clone()),
        }
    }

    pub fn line(&self) -> Option<usize> {
        match self {
            EmberError::Io(_) => None,
            EmberError::Scan { line, .. }
            | EmberError::Parse { line, .. }
            | EmberError::Resolution { line, .. }
            | EmberError::Runtime { line, .. } => Some(*line),
        }
    }

    /// The detail text without the `[line N]` header.
    pub fn message(&self) -> String {
        match self {
            EmberError::Io(e) => e.to_string(),
            EmberError::Scan { message, .. }
            | EmberError::Parse { message, .. }
            | EmberError::Resolution { message, .. }
            | EmberError::Runtime { message, .. } => message.clone(),
        }
    }

    /// Static errors are found before execution and stop the program from running at all.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            EmberError::Scan { .. } | EmberError::Parse { .. } | EmberError::Resolution { .. }
        )
    }

    pub fn runtime_kind(&self) -> Option<RuntimeErrorKind> {
        match self {
            EmberError::Runtime { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn io_error_converts_to_ember_error() {
        let io_err = Error::new(ErrorKind::NotFound, "file not found");
        let err: EmberError = io_err.into();
        assert!(matches!(err, EmberError::Io(_)));
        assert_eq!(err.to_string(), "Could not read script: file not found");
    }

    #[test]
    fn scan_error_shows_line() {
        let err = EmberError::Scan {
            message: "Unexpected character '@'".to_string(),
            span: 10..11,
            line: 3,
        };
        assert_eq!(err.to_string(), "[line 3] Scan error: Unexpected character '@'");
    }

    #[test]
    fn runtime_error_shows_kind() {
        let err = EmberError::Runtime {
            kind: RuntimeErrorKind::Arity,
            message: "Expected 2 arguments but got 1".to_string(),
            span: 30..35,
            line: 7,
        };
        assert_eq!(
            err.to_string(),
            "[line 7] ArityError: Expected 2 arguments but got 1"
        );
        assert_eq!(err.runtime_kind(), Some(RuntimeErrorKind::Arity));
    }

    #[test]
    fn static_errors_are_flagged() {
        let resolution = EmberError::Resolution {
            message: "x".to_string(),
            span: 0..1,
            line: 1,
        };
        let runtime = EmberError::Runtime {
            kind: RuntimeErrorKind::Type,
            message: "x".to_string(),
            span: 0..1,
            line: 1,
        };
        assert!(resolution.is_static());
        assert!(!runtime.is_static());
        assert_eq!(runtime.span(), Some(0..1));
        assert_eq!(resolution.message(), "x");
    }

    #[test]
    fn io_error_has_no_location() {
        let err: EmberError = Error::new(ErrorKind::NotFound, "gone").into();
        assert_eq!(err.span(), None);
        assert_eq!(err.line(), None);
        assert!(!err.is_static());
    }
}
