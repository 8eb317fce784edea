//! dermclass command-line drivers
//!
//! File-based front ends for the training, policy, and evaluation crates:
//! derive class weights and loss from a scored training split, fit
//! per-class thresholds on a validation split, evaluate a test split, and
//! diagnose a saved report.

pub mod commands;
pub mod config;
pub mod split;

pub use commands::{
    class_weights, diagnose_report, evaluate, fit_thresholds, loss, ClassWeightSummary,
    LossSummary, ModelContext,
};
pub use config::DermclassConfig;
pub use split::{ScoredSample, ScoredSplit};
