//! # canopy-model
//!
//! Model construction core for probabilistic risk analysis: the lazy
//! expression graph, fault tree primitives, hierarchical name resolution,
//! and common-cause failure modeling.
//!
//! The intended build sequence mirrors how an input file is read:
//!
//! 1. register fault trees, parameters, events, gates, and CCF groups on a
//!    [`model::Model`];
//! 2. [`model::Model::validate`] the result;
//! 3. [`model::Model::apply_ccf`] to rewrite CCF group members into their
//!    replacement sub-graphs, which freezes the model.
//!
//! Downstream analyses traverse the rewritten graph read-only.

pub mod ccf;
pub mod component;
pub mod error;
pub mod event;
pub mod expr;
pub mod model;

pub use ccf::{CcfGroup, CcfGroupId, CcfModel, Phase};
pub use component::Component;
pub use error::{ModelError, Result};
pub use event::{
    BasicEvent, BasicEventId, EventRef, Formula, Gate, GateId, HouseEvent, HouseEventId, Identity,
    Operator, Role,
};
pub use expr::{Expr, ExprArena, ExprId, ParameterId, SampleSpace};
pub use model::{Model, Parameter};
