//! Error types for model construction and validation

use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while building or validating an analysis model
///
/// None of these are recovered inside the model layer. They surface to the
/// build driver, which halts construction and reports them verbatim.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModelError {
    /// Structural violation detectable after parsing
    #[error("validation error: {0}")]
    Validation(String),

    /// Duplicate identifier on insertion
    #[error("redefinition of {kind} '{id}'")]
    Redefinition { kind: &'static str, id: String },

    /// Repeated member in a CCF group
    #[error("duplicate argument: {0}")]
    DuplicateArgument(String),

    /// Mutation attempted in a lifecycle phase that forbids it
    #[error("illegal operation: {0}")]
    IllegalOperation(String),

    /// Failed reference resolution
    #[error("entity '{reference}' not found in scope '{scope}'")]
    EntityNotFound { reference: String, scope: String },

    /// Arithmetic domain violation in an expression
    #[error("invalid expression: {0}")]
    InvalidExpression(String),
}
