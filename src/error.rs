//! Flat error taxonomy for the compiler and evaluator.
//!
//! The taxonomy itself (§7 of the design spec) is deliberately flat: every
//! failure mode the Compiler or Evaluator can hit maps to exactly one of a
//! handful of named kinds, so a host can `match` on `kind()` the same way
//! it would switch on a C `enum`. `thiserror` supplies the `Display`/`Error`
//! boilerplate around that.

use std::path::PathBuf;

use thiserror::Error;

/// The flat error kind taxonomy, independent of the richer [`CompileError`]
/// / [`EvalError`] payloads. Useful for callers that want to dispatch on
/// kind without matching the full error type (mirrors an error-sink that
/// only records a code).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    TooDeep,
    ClosureMismatch,
    FileNotFound,
    FileTooBig,
    FileNameTooLong,
    FileNameTooShort,
    EmptyTemplate,
    DelimiterTooLong,
    NameTooLong,
    Unknown,
    UserError,
}

/// Errors raised while compiling a template (and its transitively
/// referenced partials) into a [`crate::program::Program`].
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("section nesting exceeded the maximum depth of {max}")]
    TooDeep { max: usize },

    #[error("unclosed or mismatched section tag{}", name.as_deref().map(|n| format!(" {n:?}")).unwrap_or_default())]
    ClosureMismatch { name: Option<String> },

    #[error("partial {name:?} could not be resolved")]
    FileNotFound { name: String },

    #[error("template {name:?} exceeds the maximum allowed file size")]
    FileTooBig { name: String },

    #[error("filename length ({len}) exceeds the maximum of {max}")]
    FileNameTooLong { len: usize, max: usize },

    #[error("filename is empty")]
    FileNameTooShort,

    #[error("template source is empty")]
    EmptyTemplate,

    #[error("delimiter {delim:?} exceeds the maximum length of {max}")]
    DelimiterTooLong { delim: String, max: usize },

    #[error("tag name length ({len}) exceeds the maximum of {max}")]
    NameTooLong { len: usize, max: usize },

    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// The flat error kind this error corresponds to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CompileError::TooDeep { .. } => ErrorKind::TooDeep,
            CompileError::ClosureMismatch { .. } => ErrorKind::ClosureMismatch,
            CompileError::FileNotFound { .. } => ErrorKind::FileNotFound,
            CompileError::FileTooBig { .. } => ErrorKind::FileTooBig,
            CompileError::FileNameTooLong { .. } => ErrorKind::FileNameTooLong,
            CompileError::FileNameTooShort => ErrorKind::FileNameTooShort,
            CompileError::EmptyTemplate => ErrorKind::EmptyTemplate,
            CompileError::DelimiterTooLong { .. } => ErrorKind::DelimiterTooLong,
            CompileError::NameTooLong { .. } => ErrorKind::NameTooLong,
            CompileError::Io { .. } => ErrorKind::FileNotFound,
        }
    }
}

/// Errors raised while evaluating a compiled [`crate::program::Program`].
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("section nesting exceeded the maximum depth of {max}")]
    TooDeep { max: usize },

    #[error("encountered an unrecognized instruction opcode")]
    Unknown,

    #[error("a callback reported a fatal error")]
    UserError,
}

impl EvalError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EvalError::TooDeep { .. } => ErrorKind::TooDeep,
            EvalError::Unknown => ErrorKind::Unknown,
            EvalError::UserError => ErrorKind::UserError,
        }
    }
}
