//! Error types for policy compilation and evaluation.

use thiserror::Error;
use warden_core::StoreError;

use crate::translate::TranslateError;

/// Result alias for policy operations.
pub type Result<T> = std::result::Result<T, PolicyError>;

/// Policy engine error.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// The module source could not be parsed.
    #[error("policy parse failed at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// The module references no rule for the requested policy.
    #[error("policy evaluator not found: {0}")]
    UnknownPolicy(String),

    /// The policy directory could not be loaded into a module.
    #[error("policy module load failed: {0}")]
    Module(String),

    /// Evaluation hit an unrecoverable condition (unsafe variable,
    /// double assignment, unknown function).
    #[error("policy evaluation failed: {0}")]
    Evaluation(String),

    /// A built-in was called with arguments it cannot accept.
    #[error("built-in {name} failed: {message}")]
    Builtin { name: String, message: String },

    /// The caller disconnected; evaluation aborted at a built-in checkpoint.
    #[error("policy evaluation canceled")]
    Canceled,

    /// The residual could not be translated to a query.
    #[error(transparent)]
    Translate(#[from] TranslateError),

    /// The role store failed while serving a built-in.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PolicyError {
    /// Shorthand for a parse error.
    pub fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    /// Shorthand for a built-in failure.
    pub fn builtin(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Builtin {
            name: name.into(),
            message: message.into(),
        }
    }

    /// True when the error is the unsatisfiable-filter marker.
    pub fn is_empty_query(&self) -> bool {
        matches!(self, Self::Translate(TranslateError::EmptyQuery))
    }
}
