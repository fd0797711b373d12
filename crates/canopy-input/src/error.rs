//! Error types for input reading

use thiserror::Error;

use canopy_model::ModelError;

/// Errors raised while reading input files
///
/// `Io` and `Xml` are environment or syntax problems; `Malformed` and
/// `Model` mean the document is readable but does not describe a valid
/// model. The distinction drives the process exit code.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("i/o error: {0}")]
    Io(String),

    #[error("xml error: {0}")]
    Xml(String),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error(transparent)]
    Model(#[from] ModelError),
}
