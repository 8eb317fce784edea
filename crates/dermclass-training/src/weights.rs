//! Per-class positive weights (`pos_weight`)
//!
//! Inverse-frequency weighting without a cap pushes majority-class
//! probabilities below any fixed operating threshold. The cap is therefore a
//! first-class config knob, and every capped class is reported.

use dermclass_core::{ensure_len, Error, Result, SupportCounts};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How base weights are derived before capping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightScheme {
    /// Every class weighs 1.0
    #[default]
    Uniform,
    /// `N / (C * count_c)`, with `count_c = 0` treated as weight 1.0
    InverseFrequency,
    /// Weights listed in `ClassWeightConfig::weights`
    Explicit,
}

/// Class weight derivation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeightConfig {
    #[serde(default)]
    pub scheme: WeightScheme,

    /// Per-class weights, required for `explicit`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weights: Option<Vec<f64>>,

    /// Upper cap applied after derivation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pos_weight: Option<f64>,

    /// Lower floor applied after derivation
    #[serde(default)]
    pub min_pos_weight: f64,
}

impl Default for ClassWeightConfig {
    fn default() -> Self {
        Self {
            scheme: WeightScheme::Uniform,
            weights: None,
            max_pos_weight: None,
            min_pos_weight: 0.0,
        }
    }
}

impl ClassWeightConfig {
    /// Inverse-frequency weights capped at `max`
    pub fn inverse_frequency(max_pos_weight: Option<f64>) -> Self {
        Self {
            scheme: WeightScheme::InverseFrequency,
            max_pos_weight,
            ..Self::default()
        }
    }

    /// Validate bounds
    pub fn validate(&self) -> Result<()> {
        if !self.min_pos_weight.is_finite() || self.min_pos_weight < 0.0 {
            return Err(Error::config(format!(
                "min_pos_weight must be finite and >= 0, got {}",
                self.min_pos_weight
            )));
        }
        if let Some(max) = self.max_pos_weight {
            if !max.is_finite() || max <= 0.0 {
                return Err(Error::config(format!(
                    "max_pos_weight must be finite and > 0, got {max}"
                )));
            }
            if max < self.min_pos_weight {
                return Err(Error::config(format!(
                    "max_pos_weight ({max}) is below min_pos_weight ({})",
                    self.min_pos_weight
                )));
            }
        }
        if self.scheme == WeightScheme::Explicit && self.weights.is_none() {
            return Err(Error::config("explicit weight scheme requires `weights`"));
        }
        Ok(())
    }
}

/// Resolved per-class weights, aligned to the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    weights: Vec<f64>,
    #[serde(default)]
    capped: Vec<usize>,
}

impl ClassWeights {
    /// Weight 1.0 for every class
    pub fn uniform(num_classes: usize) -> Self {
        Self {
            weights: vec![1.0; num_classes],
            capped: Vec::new(),
        }
    }

    /// Wrap explicit weights, rejecting negative or non-finite entries
    pub fn from_vec(weights: Vec<f64>) -> Result<Self> {
        if let Some(i) = weights.iter().position(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::invalid(format!(
                "class weight at index {i} must be finite and >= 0, got {}",
                weights[i]
            )));
        }
        Ok(Self {
            weights,
            capped: Vec::new(),
        })
    }

    /// Derive weights from training support.
    ///
    /// `samples` is the number of training samples (N).
    pub fn derive(
        config: &ClassWeightConfig,
        support: &SupportCounts,
        samples: u64,
    ) -> Result<Self> {
        config.validate()?;
        let num_classes = support.len();

        let base = match config.scheme {
            WeightScheme::Uniform => vec![1.0; num_classes],
            WeightScheme::InverseFrequency => {
                if samples == 0 {
                    return Err(Error::invalid(
                        "inverse-frequency weights need at least one training sample",
                    ));
                }
                let n = samples as f64;
                let c = num_classes as f64;
                support
                    .as_slice()
                    .iter()
                    .map(|&count| {
                        if count == 0 {
                            1.0
                        } else {
                            n / (c * count as f64)
                        }
                    })
                    .collect()
            }
            WeightScheme::Explicit => {
                let weights = config.weights.clone().unwrap_or_default();
                ensure_len("explicit class weights", num_classes, weights.len())?;
                weights
            }
        };

        let mut resolved = Self::from_vec(base)?;
        resolved.apply_bounds(config.min_pos_weight, config.max_pos_weight);

        debug!(
            scheme = ?config.scheme,
            classes = num_classes,
            capped = resolved.capped.len(),
            "Derived class weights"
        );
        Ok(resolved)
    }

    fn apply_bounds(&mut self, min: f64, max: Option<f64>) {
        for (c, w) in self.weights.iter_mut().enumerate() {
            if *w < min {
                *w = min;
            }
            if let Some(max) = max {
                if *w > max {
                    *w = max;
                    self.capped.push(c);
                }
            }
        }
        if let Some(max) = max {
            if !self.capped.is_empty() {
                warn!(
                    capped = self.capped.len(),
                    max_pos_weight = max,
                    "Capped class weights; majority-class calibration is protected at the cost of rare-class emphasis"
                );
            }
        }
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn get(&self, class: usize) -> f64 {
        self.weights.get(class).copied().unwrap_or(1.0)
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Indices of classes whose weight hit `max_pos_weight`
    pub fn capped(&self) -> &[usize] {
        &self.capped
    }
}
