//! dermclass Core
//!
//! Core types and utilities shared across dermclass components.
//!
//! This crate provides:
//! - The class catalog (label space) and its version fingerprint
//! - Score, probability, target, and prediction vectors with boundary validation
//! - Temperature-scaled sigmoid calibration
//! - Per-class support counts
//! - Error types and result handling
//! - Atomic artifact persistence helpers

pub mod artifact;
pub mod calibration;
pub mod catalog;
pub mod error;
pub mod support;
pub mod types;

pub use calibration::{sigmoid, Calibration, EPS, P_MAX, P_MIN};
pub use catalog::ClassCatalog;
pub use error::{Error, Result};
pub use support::SupportCounts;
pub use types::{
    ensure_len, PredictionSet, ProbabilityVector, ScoreVector, SplitRole, TargetVector,
    UnknownLabel, AGREEMENT_THRESHOLD,
};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::calibration::Calibration;
    pub use crate::catalog::ClassCatalog;
    pub use crate::error::{Error, Result};
    pub use crate::support::SupportCounts;
    pub use crate::types::{PredictionSet, ProbabilityVector, ScoreVector, TargetVector};
}
