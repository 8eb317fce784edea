//! dermclass Policy
//!
//! Turns calibrated per-class probabilities into discrete label sets.
//!
//! - [`ThresholdPolicy`]: global cutoff, per-class cutoffs, or top-K, all
//!   behind the [`DecisionPolicy`] interface
//! - [`fit_per_class`]: F1-maximizing per-class cutoffs from a validation
//!   split, with an explicit fallback for classes without positives
//! - [`ThresholdFile`]: a policy bound to one checkpoint and catalog
//! - [`DecisionEngine`]: a policy checked against its catalog

pub mod engine;
pub mod fit;
pub mod strategy;
pub mod threshold_file;

pub use engine::DecisionEngine;
pub use fit::{fit_class_threshold, fit_per_class, ClassFit, FitConfig, FitOutcome, PerClassFit};
pub use strategy::{DecisionPolicy, ThresholdPolicy};
pub use threshold_file::ThresholdFile;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::engine::DecisionEngine;
    pub use crate::fit::{fit_per_class, FitConfig};
    pub use crate::strategy::{DecisionPolicy, ThresholdPolicy};
    pub use crate::threshold_file::ThresholdFile;
}
