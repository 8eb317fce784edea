//! Thresholding strategies
//!
//! A strategy turns one probability vector into a set of predicted class
//! indices. All strategies share the [`DecisionPolicy`] contract and are
//! selected by configuration through the tagged [`ThresholdPolicy`] enum.

use dermclass_core::{ensure_len, Error, PredictionSet, ProbabilityVector, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Common decision interface
pub trait DecisionPolicy: Send + Sync {
    /// Predicted positive classes for one sample
    fn decide(&self, probabilities: &ProbabilityVector) -> Result<PredictionSet>;

    /// Strategy name for logs and reports
    fn name(&self) -> &'static str;
}

/// Threshold set: a global cutoff, per-class cutoffs, or a top-K rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// Predict class `c` when `p_c >= threshold`
    Global { threshold: f64 },

    /// Predict class `c` when `p_c >= thresholds[c]`
    PerClass {
        thresholds: Vec<f64>,

        /// Classes whose cutoff could not be fitted and holds the fallback
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        fallbacks: Vec<usize>,
    },

    /// Predict the `k` highest-probability classes regardless of value
    TopK { k: usize },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::Global { threshold: 0.5 }
    }
}

fn check_threshold(what: &str, t: f64) -> Result<()> {
    if !t.is_finite() || !(0.0..=1.0).contains(&t) {
        return Err(Error::config(format!("{what} must lie in [0, 1], got {t}")));
    }
    Ok(())
}

impl ThresholdPolicy {
    pub fn global(threshold: f64) -> Result<Self> {
        check_threshold("global threshold", threshold)?;
        Ok(Self::Global { threshold })
    }

    pub fn per_class(thresholds: Vec<f64>) -> Result<Self> {
        for (c, &t) in thresholds.iter().enumerate() {
            check_threshold(&format!("threshold for class {c}"), t)?;
        }
        Ok(Self::PerClass {
            thresholds,
            fallbacks: Vec::new(),
        })
    }

    pub fn top_k(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(Error::config("top-k policy needs k >= 1"));
        }
        Ok(Self::TopK { k })
    }

    /// Load from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Check the policy against a catalog size
    pub fn validate(&self, num_classes: usize) -> Result<()> {
        match self {
            Self::Global { threshold } => check_threshold("global threshold", *threshold),
            Self::PerClass {
                thresholds,
                fallbacks,
            } => {
                ensure_len("per-class thresholds", num_classes, thresholds.len())?;
                for (c, &t) in thresholds.iter().enumerate() {
                    check_threshold(&format!("threshold for class {c}"), t)?;
                }
                if let Some(&c) = fallbacks.iter().find(|&&c| c >= num_classes) {
                    return Err(Error::invalid(format!(
                        "fallback class index {c} out of range for {num_classes} classes"
                    )));
                }
                Ok(())
            }
            Self::TopK { k } => {
                if *k == 0 {
                    return Err(Error::config("top-k policy needs k >= 1"));
                }
                Ok(())
            }
        }
    }

    /// Cutoff applied to class `c`, if the strategy is cutoff-based
    pub fn threshold_for(&self, class: usize) -> Option<f64> {
        match self {
            Self::Global { threshold } => Some(*threshold),
            Self::PerClass { thresholds, .. } => thresholds.get(class).copied(),
            Self::TopK { .. } => None,
        }
    }
}

impl DecisionPolicy for ThresholdPolicy {
    fn decide(&self, probabilities: &ProbabilityVector) -> Result<PredictionSet> {
        let p = probabilities.as_slice();
        let set = match self {
            Self::Global { threshold } => (0..p.len()).filter(|&c| p[c] >= *threshold).collect(),
            Self::PerClass { thresholds, .. } => {
                ensure_len("probability vector", thresholds.len(), p.len())?;
                (0..p.len()).filter(|&c| p[c] >= thresholds[c]).collect()
            }
            Self::TopK { k } => probabilities.top_k(*k).into_iter().collect(),
        };
        Ok(set)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Global { .. } => "global",
            Self::PerClass { .. } => "per_class",
            Self::TopK { .. } => "top_k",
        }
    }
}
