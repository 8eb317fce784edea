//! Decision engine
//!
//! Binds a validated policy to the catalog it was built for, so every
//! probability vector is length-checked before any class is decided.

use crate::strategy::{DecisionPolicy, ThresholdPolicy};
use crate::threshold_file::ThresholdFile;
use dermclass_core::{ClassCatalog, PredictionSet, ProbabilityVector, Result};
use std::sync::Arc;
use tracing::debug;

/// Decides label sets for one catalog
#[derive(Clone)]
pub struct DecisionEngine {
    catalog: Arc<ClassCatalog>,
    policy: Arc<dyn DecisionPolicy>,
}

impl DecisionEngine {
    /// Create an engine from a threshold policy, validated against `catalog`
    pub fn new(catalog: Arc<ClassCatalog>, policy: ThresholdPolicy) -> Result<Self> {
        policy.validate(catalog.len())?;
        debug!(policy = policy.name(), classes = catalog.len(), "Decision engine ready");
        Ok(Self {
            catalog,
            policy: Arc::new(policy),
        })
    }

    /// Create an engine from an already verified threshold file
    pub fn from_threshold_file(catalog: Arc<ClassCatalog>, file: &ThresholdFile) -> Result<Self> {
        catalog.ensure_matches("threshold file catalog", &file.catalog_fingerprint)?;
        Self::new(catalog, file.policy.clone())
    }

    /// Use a custom decision strategy
    pub fn with_policy(catalog: Arc<ClassCatalog>, policy: Arc<dyn DecisionPolicy>) -> Self {
        Self { catalog, policy }
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    /// Predicted label set for one sample
    pub fn decide(&self, probabilities: &ProbabilityVector) -> Result<PredictionSet> {
        probabilities.ensure_len(&self.catalog)?;
        self.policy.decide(probabilities)
    }

    /// Predicted label sets for a batch, in input order
    pub fn decide_batch(&self, probabilities: &[ProbabilityVector]) -> Result<Vec<PredictionSet>> {
        probabilities.iter().map(|p| self.decide(p)).collect()
    }
}

impl std::fmt::Debug for DecisionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionEngine")
            .field("classes", &self.catalog.len())
            .field("policy", &self.policy.name())
            .finish()
    }
}
