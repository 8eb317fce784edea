//! dermclass Evaluation
//!
//! Multi-label evaluation that stays meaningful under heavy class skew:
//!
//! - Per-class confusion counts with zero-safe precision, recall, and F1
//! - Micro and macro averages side by side; macro averages exclude classes
//!   without evaluation support
//! - Threshold-independent Top-K and soft Top-K from probabilities
//! - Deterministic, diffable JSON reports
//! - Diagnostics for frequent classes that collapse to F1 = 0
//!
//! # Example
//!
//! ```
//! use dermclass_core::{ClassCatalog, PredictionSet, TargetVector};
//! use dermclass_eval::{EvalConfig, Evaluator};
//! use std::sync::Arc;
//!
//! let catalog = Arc::new(ClassCatalog::new(["acne", "eczema"]).unwrap());
//! let evaluator = Evaluator::new(catalog, EvalConfig::default()).unwrap();
//! let predictions = vec![PredictionSet::from_indices(2, [0]).unwrap()];
//! let targets = vec![TargetVector::multi_hot(2, &[0]).unwrap()];
//! let report = evaluator.evaluate(&predictions, &targets, None).unwrap();
//! assert_eq!(report.aggregate.macro_avg.unwrap().f1, 1.0);
//! ```

pub mod confusion;
pub mod diagnostics;
pub mod engine;
pub mod report;
pub mod topk;

pub use confusion::{ConfusionCounts, ConfusionTable};
pub use diagnostics::{diagnose, spearman, ClassFlag, DiagnosticsReport, FlagKind};
pub use engine::{EvalConfig, Evaluator, MacroScope};
pub use report::{
    AggregateMetrics, Averages, ClassReport, ClassStatus, EvaluationReport, FieldChange, Provenance,
};
pub use topk::{TopKAccumulator, DEFAULT_TOP_K};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::diagnostics::{diagnose, DiagnosticsReport, FlagKind};
    pub use crate::engine::{EvalConfig, Evaluator, MacroScope};
    pub use crate::report::{ClassStatus, EvaluationReport};
}
