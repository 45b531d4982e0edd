//! lispcore - a small embeddable Lisp
//!
//! This crate provides a minimal expression language meant to live inside a larger
//! program: a reader that turns text into [`ast::Value`] trees, an evaluator with
//! lexical scoping and proper tail calls, and a bridge for calling strongly-typed
//! Rust functions from evaluated code.
//!
//! ```text
//! (defn fib [n]
//!   (defn fib-iter [curr next n]
//!     (if (= n 0) curr (fib-iter next (+ curr next) (- n 1))))
//!   (fib-iter 0 1 n))
//! (fib 10)                       ; => 55
//! ({:a "blah" :b {:c 42}} :b :c) ; => 42
//! ```
//!
//! ## Quick start
//!
//! ```
//! use lispcore::evaluator::{create_global_env, eval};
//! use lispcore::reader::read_str;
//!
//! fn add2(a: i64, b: i64) -> i64 {
//!     a + b
//! }
//!
//! let env = create_global_env();
//! env.register_builtin_operation::<_, (i64, i64), i64>("add2", add2);
//!
//! let expr = read_str("(add2 40 2)").unwrap();
//! assert_eq!(eval(&expr, &env).unwrap(), 42.into());
//! ```
//!
//! ## Modules
//!
//! - `ast`: the value model shared by reader and evaluator, plus its printed form
//! - `equality`: structural equality over values
//! - `reader`: text to values
//! - `evaluator`: environments, special forms, tail calls, native registration
//! - `builtinops`: the primitive and special-form tables
//! - `native`: host functions and their call-time signatures

use std::fmt;

use crate::builtinops::Arity;

/// Maximum collection nesting accepted by the reader.
/// Deeper input is rejected instead of recursing without bound.
pub const MAX_PARSE_DEPTH: usize = 256;

/// Maximum nesting of non-tail evaluation.
/// Tail calls do not count against this limit; runaway non-tail recursion is
/// reported as [`Error::DepthExceeded`].
pub const MAX_EVAL_DEPTH: usize = 4096;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed numbers, malformed map literals)
    InvalidSyntax,
    /// Input ended before the form was complete (unterminated string, unclosed collection)
    Incomplete,
    /// A closing delimiter with no matching opening delimiter
    UnmatchedDelimiter,
    /// Escape sequences or character names the reader does not support
    Unsupported,
    /// Collection nesting exceeded the configured maximum depth
    TooDeeplyNested,
    /// Extra input found after a complete form where exactly one was expected
    TrailingContent,
}

/// 1-based line and column of a reader error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl Location {
    /// Compute the location of a byte offset within `input`.
    pub fn of_offset(input: &str, byte_offset: usize) -> Self {
        let before = input.get(..byte_offset).unwrap_or(input);
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map_or(0, |i| i + 1);
        let column = before[line_start..].chars().count() + 1;
        Location { line, column }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}", self.line, self.column)
    }
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
    /// Where in the input the error was detected
    pub location: Option<Location>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
            location: None,
        }
    }

    /// Create a simple ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context and location extracted from `input` at a byte offset
    pub fn with_context_and_found(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let location = Location::of_offset(input, error_offset);
        let char_offset = input
            .get(..error_offset)
            .map_or(0, |before| before.chars().count());

        // Show some context before the error
        let context_start = char_offset.saturating_sub(20);
        let total_chars = input.chars().count();

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(&context_str);
        if context_start + context_str.chars().count() < total_chars {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        ParseError {
            kind,
            message: message.into(),
            context: Some(display_context),
            found,
            location: Some(location),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, " ({location})")?;
        }
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ParseError {}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("Unable to resolve symbol: {0} in this context")]
    UnboundVariable(String),
    #[error(
        "ArityError: {}expected {expected} arguments, got {got}",
        expression_prefix(.expression)
    )]
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    #[error("Invalid procedure: {0}")]
    InvalidApplication(String),
    #[error("Host function error: {0}")]
    HostError(String),
    #[error("Evaluation depth limit exceeded (max: {0})")]
    DepthExceeded(usize),
}

fn expression_prefix(expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!("expression {expr}: "),
        None => String::new(),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError with expression context
    pub fn arity_error_with_expr(expected: Arity, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// True for errors raised by the reader
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, Error::ParseError(_))
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::ParseError(err)
    }
}

pub mod ast;
pub mod builtinops;
pub mod equality;
pub mod evaluator;
pub mod native;
pub mod reader;

pub use ast::Value;
pub use evaluator::{Environment, create_global_env, eval};
pub use reader::{Reader, read_all, read_str};
