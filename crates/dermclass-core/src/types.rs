//! Core vector types for dermclass
//!
//! Every vector is indexed by catalog position. Lengths are validated against
//! the catalog at each component boundary with [`ensure_len`].

use crate::catalog::ClassCatalog;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cutoff at which a fractional ground-truth weight counts as a positive label
/// for discrete confusion counting.
pub const AGREEMENT_THRESHOLD: f64 = 0.5;

/// Fail with `DimensionMismatch` unless `actual == expected`
pub fn ensure_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(Error::dimension(what, expected, actual));
    }
    Ok(())
}

/// Raw, unbounded per-class scores produced by a model for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScoreVector(Vec<f32>);

impl ScoreVector {
    /// Create a score vector, rejecting NaN and infinite entries
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if let Some(i) = values.iter().position(|v| !v.is_finite()) {
            return Err(Error::invalid(format!(
                "score at class index {i} is not finite"
            )));
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, class: usize) -> Option<f32> {
        self.0.get(class).copied()
    }

    /// Validate the length against a catalog
    pub fn ensure_len(&self, catalog: &ClassCatalog) -> Result<()> {
        ensure_len("score vector", catalog.len(), self.0.len())
    }
}

/// Independent per-class probabilities in [0, 1] (not softmax-normalized)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProbabilityVector(Vec<f64>);

impl ProbabilityVector {
    /// Create a probability vector, rejecting entries outside [0, 1]
    pub fn new(values: Vec<f64>) -> Result<Self> {
        if let Some(i) = values
            .iter()
            .position(|p| !p.is_finite() || *p < 0.0 || *p > 1.0)
        {
            return Err(Error::invalid(format!(
                "probability at class index {i} is outside [0, 1]: {}",
                values[i]
            )));
        }
        Ok(Self(values))
    }

    /// Wrap values already clamped into [0, 1] by calibration
    pub(crate) fn from_clamped(values: Vec<f64>) -> Self {
        debug_assert!(values.iter().all(|p| (0.0..=1.0).contains(p)));
        Self(values)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, class: usize) -> Option<f64> {
        self.0.get(class).copied()
    }

    /// Validate the length against a catalog
    pub fn ensure_len(&self, catalog: &ClassCatalog) -> Result<()> {
        ensure_len("probability vector", catalog.len(), self.0.len())
    }

    /// Class indices ordered by descending probability.
    ///
    /// Equal probabilities are ordered by lower class index first.
    pub fn ranked(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.0.len()).collect();
        order.sort_by(|&a, &b| self.0[b].total_cmp(&self.0[a]).then(a.cmp(&b)));
        order
    }

    /// The `k` highest-probability class indices (see [`Self::ranked`])
    pub fn top_k(&self, k: usize) -> Vec<usize> {
        let mut order = self.ranked();
        order.truncate(k);
        order
    }
}

/// Which data split a set of samples comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitRole {
    Train,
    Validation,
    Test,
}

impl std::fmt::Display for SplitRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Train => f.write_str("train"),
            Self::Validation => f.write_str("validation"),
            Self::Test => f.write_str("test"),
        }
    }
}

/// How to treat ground-truth labels missing from the catalog
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownLabel {
    /// Fail with an `InvalidInput` error
    #[default]
    Reject,
    /// Drop the label and continue
    Skip,
}

/// Multi-hot (or fractionally weighted) ground truth for one sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetVector(Vec<f64>);

impl TargetVector {
    /// Create a target vector, rejecting weights outside [0, 1]
    pub fn new(weights: Vec<f64>) -> Result<Self> {
        if let Some(i) = weights
            .iter()
            .position(|w| !w.is_finite() || *w < 0.0 || *w > 1.0)
        {
            return Err(Error::invalid(format!(
                "target weight at class index {i} is outside [0, 1]: {}",
                weights[i]
            )));
        }
        Ok(Self(weights))
    }

    /// Multi-hot target with weight 1.0 at each listed class
    pub fn multi_hot(num_classes: usize, positives: &[usize]) -> Result<Self> {
        let mut weights = vec![0.0; num_classes];
        for &c in positives {
            let slot = weights.get_mut(c).ok_or_else(|| {
                Error::invalid(format!(
                    "class index {c} out of range for {num_classes} classes"
                ))
            })?;
            *slot = 1.0;
        }
        Ok(Self(weights))
    }

    /// Build from annotated label weights, e.g. `{eczema: 0.5, psoriasis: 0.5}`.
    ///
    /// Fractional weights are kept as given; a label listed twice accumulates
    /// and must still sum to at most 1.0.
    pub fn from_weighted_labels<'a, I>(
        catalog: &ClassCatalog,
        labels: I,
        unknown: UnknownLabel,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let mut weights = vec![0.0; catalog.len()];
        for (name, weight) in labels {
            match catalog.index(name) {
                Some(c) => weights[c] += weight,
                None => match unknown {
                    UnknownLabel::Reject => {
                        return Err(Error::invalid(format!(
                            "label '{name}' is not in the class catalog"
                        )))
                    }
                    UnknownLabel::Skip => {
                        tracing::debug!(label = name, "Skipping label outside the catalog");
                    }
                },
            }
        }
        Self::new(weights)
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw (possibly fractional) weight for a class
    pub fn weight(&self, class: usize) -> f64 {
        self.0.get(class).copied().unwrap_or(0.0)
    }

    /// Whether a class counts as positive under [`AGREEMENT_THRESHOLD`]
    pub fn is_positive(&self, class: usize) -> bool {
        self.weight(class) >= AGREEMENT_THRESHOLD
    }

    /// Indices of classes counting as positive
    pub fn positives(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.0.len()).filter(move |&c| self.is_positive(c))
    }

    /// Sum of all label weights
    pub fn total_weight(&self) -> f64 {
        self.0.iter().sum()
    }

    /// Validate the length against a catalog
    pub fn ensure_len(&self, catalog: &ClassCatalog) -> Result<()> {
        ensure_len("target vector", catalog.len(), self.0.len())
    }
}

/// Predicted positive labels for one sample, as sorted class indices
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionSet(BTreeSet<usize>);

impl PredictionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from class indices, validating each against `num_classes`
    pub fn from_indices<I>(num_classes: usize, indices: I) -> Result<Self>
    where
        I: IntoIterator<Item = usize>,
    {
        let mut set = BTreeSet::new();
        for c in indices {
            if c >= num_classes {
                return Err(Error::invalid(format!(
                    "predicted class index {c} out of range for {num_classes} classes"
                )));
            }
            set.insert(c);
        }
        Ok(Self(set))
    }

    pub fn insert(&mut self, class: usize) {
        self.0.insert(class);
    }

    pub fn contains(&self, class: usize) -> bool {
        self.0.contains(&class)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Class indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }

    /// Highest contained index, if any
    pub fn max_index(&self) -> Option<usize> {
        self.0.iter().next_back().copied()
    }

    /// Class names in ascending index order
    pub fn names<'a>(&'a self, catalog: &'a ClassCatalog) -> Vec<&'a str> {
        self.iter().filter_map(|c| catalog.name(c)).collect()
    }
}

impl FromIterator<usize> for PredictionSet {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
