//! # canopy-analysis
//!
//! Analyses over a frozen [`canopy_model::Model`]: fault tree reduction to
//! minimal cut sets, top-event probability under several approximations,
//! and Monte Carlo uncertainty quantification.
//!
//! The passes are layered: [`fault_tree::FaultTreeAnalysis`] reduces the
//! gate graph once, and the probability and uncertainty passes reuse that
//! reduction.

use thiserror::Error;

pub mod fault_tree;
pub mod probability;
pub mod report;
pub mod uncertainty;

pub use fault_tree::{top_gates, CutSet, FaultTreeAnalysis};
pub use probability::{Approximation, ProbabilityResult};
pub use report::TreeResults;
pub use uncertainty::{UncertaintyConfig, UncertaintyResult};

/// Errors raised by the analysis passes
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Model(#[from] canopy_model::ModelError),

    #[error("basic event '{0}' has no probability expression")]
    MissingProbability(String),

    #[error("the model declares no top gate to analyze")]
    NoTopGate,

    #[error("invalid analysis settings: {0}")]
    InvalidSettings(String),
}
