//! Expression error types

use thiserror::Error;

/// Errors from parsing or validating a query expression.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExprError {
    /// The expression is not parseable.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// The expression is well-formed but ill-typed or degenerate.
    #[error("semantic error: {0}")]
    Semantic(String),
}

/// Result type for expression operations.
pub type ExprResult<T> = Result<T, ExprError>;
