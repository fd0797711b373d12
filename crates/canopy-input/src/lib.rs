//! # canopy-input
//!
//! Reader for the Open-PSA MEF fault tree dialect. Produces a populated
//! [`canopy_model::Model`] ready for validation; it performs no validation
//! of its own beyond what the model layer enforces on insertion.

pub mod error;
pub mod parser;
pub mod xml;

pub use error::InputError;
pub use parser::{merge, parse_model, read_files};
