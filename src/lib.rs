//! malrs - a Mal (Make a Lisp) interpreter
//!
//! This crate reads Mal source text into a tree of [`ast::Value`]s, evaluates it against a
//! lexically scoped [`evaluator::Environment`] chain and prints results back as text.
//!
//! ```mal
//! (def! fib (fn* (n) (if (< n 2) n (+ (fib (- n 1)) (fib (- n 2))))))
//! (defmacro! unless (fn* (pred a b) (list 'if pred b a)))
//! (try* (throw {"msg" "oops"}) (catch* e (get e "msg")))
//! ```
//!
//! ## Evaluation model
//!
//! The evaluator is a trampoline: forms in tail position (`let*`, `do`, `if`, `quasiquote`
//! and user function application) rebind the loop state instead of recursing, so a
//! self-recursive Mal function can run for any number of iterations. Only the nesting
//! depth of non-tail forms consumes host stack, and that is capped by [`MAX_EVAL_DEPTH`].
//!
//! Truthiness follows Mal: only `nil` and `false` are falsy.
//!
//! ## Modules
//!
//! - `reader`: tokenizer and reader macros
//! - `printer`: readable and raw rendering of values
//! - `evaluator`: special forms, macro expansion, environments
//! - `builtinops`: the core function table
//! - `readline`: line input provider shared by the REPL and the `readline` builtin

use std::fmt;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 512;

/// Maximum nesting of non-tail evaluations (argument evaluation, `def!` values, builtin
/// callbacks). Tail calls do not count against this limit.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of reader errors.
#[derive(Debug, PartialEq, Clone)]
pub enum ParseErrorKind {
    /// Unbalanced or mismatched brackets
    MismatchedParens,
    /// String literal without its closing quote
    MismatchedQuotes,
    /// Hash-map literal with an odd number of forms
    MalformedHashMap,
    /// `^` used inside the forms captured by another `^`
    NestedMetadata,
    /// A reader macro with no form after it
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Implementation-imposed limit exceeded (integer overflow)
    ImplementationLimit,
}

/// A structured error providing detailed information about a reader failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// The problematic token, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, found: Option<String>) -> Self {
        ParseError {
            kind,
            message: message.into(),
            found,
        }
    }

    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None)
    }

    pub fn with_found(kind: ParseErrorKind, message: impl Into<String>, found: &str) -> Self {
        Self::new(kind, message, Some(found.to_owned()))
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "ParseError: {}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        Ok(())
    }
}

/// Number of arguments an operation accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn validate(&self, got: usize) -> Result<(), Error> {
        let ok = match *self {
            Arity::Exact(n) => got == n,
            Arity::AtLeast(n) => got >= n,
            Arity::Range(min, max) => (min..=max).contains(&got),
            Arity::Any => true,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::arity_error(*self, got))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    ParseError(ParseError),
    #[error("'{0}' not found")]
    UnknownSymbol(String),
    #[error(
        "Number of binds must match number of exprs in env creation ({binds} binds, {exprs} exprs)"
    )]
    BadEnvArity { binds: usize, exprs: usize },
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("ArityError: {}expected {expected} arguments, got {got}", form_prefix(.form))]
    ArityError {
        expected: Arity,
        got: usize,
        form: Option<&'static str>,
    },
    #[error("'nth' index {index} out of bounds for length {length}")]
    IndexOutOfRange { index: i64, length: usize },
    #[error("{0}")]
    MalformedHashMap(String),
    #[error("EvaluationError: {0}")]
    EvalError(String),
    #[error("IO error: {0}")]
    Io(String),
    /// A value raised by `throw`, unpacked unchanged by `catch*`
    #[error("{0}")]
    Thrown(ast::Value),
}

fn form_prefix(form: &Option<&'static str>) -> String {
    form.map(|name| format!("'{name}' ")).unwrap_or_default()
}

impl Error {
    /// Create an ArityError without form context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            form: None,
        }
    }

    /// Create an ArityError naming the special form that was misused
    pub fn form_arity_error(form: &'static str, expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            form: Some(form),
        }
    }

    pub(crate) fn odd_hash_map() -> Self {
        Error::MalformedHashMap("Number of keys does not match number of values in hashmap".into())
    }
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::ParseError(err)
    }
}

/// Read one form from `input`, evaluate it in `env` and print the result readably.
///
/// Returns `Ok(None)` when the input holds no form (blank or comment-only lines).
pub fn rep(input: &str, env: &evaluator::Environment) -> Result<Option<String>, Error> {
    match reader::read_str(input)? {
        Some(ast) => {
            let result = evaluator::eval(&ast, env)?;
            Ok(Some(printer::pr_str(&result, true)))
        }
        None => Ok(None),
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod printer;
pub mod reader;
pub mod readline;
