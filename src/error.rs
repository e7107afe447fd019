//! Structured error types for every failure the interpreter can surface.
//!
//! Runtime failures all funnel through `Context::fail`, the single error
//! entry point: it snapshots the call trail, hands the error to the
//! installed handler, and if the handler returns, prints the message and
//! trail and terminates the process. Compile-time lexical/parse diagnostics
//! (`Syntax`) are a distinct, non-fatal path (see `surface::parser`):
//! they never reach `Context::fail` and carry the parser's own `[line N]
//! Error at '...': msg` text rather than a handler-formatted message.

use thiserror::Error;

/// Every runtime error kind the core can raise.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("expected {expected}, got {got}")]
    TypeMismatch { expected: &'static str, got: &'static str },

    #[error("too few arguments")]
    TooFewArguments,

    #[error("dotted pair in argument list")]
    DottedArgumentList,

    #[error("tried to call non-callable value")]
    NotCallable,

    #[error("out of memory")]
    OutOfMemory,

    #[error("gc stack overflow")]
    GcStackOverflow,

    #[error("export outside of module")]
    ExportOutsideModule,

    #[error("division by zero")]
    DivisionByZero,

    #[error("{0}")]
    Custom(String),

    /// A surface-syntax compile error, carrying the parser's own literal
    /// `[line N] Error at '...': msg` (or `at end`) diagnostic (§4.9). Never
    /// produced by the evaluator and never routed through `Context::fail`.
    #[error("{0}")]
    Syntax(String),
}

pub type Result<T> = std::result::Result<T, Error>;
