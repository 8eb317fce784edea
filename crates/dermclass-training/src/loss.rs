//! Imbalance-aware multi-label loss
//!
//! Every variant is a per-class, per-sample binary term over
//! `p = clamp(sigmoid(s), EPS, 1 - EPS)`, where `s` is the raw score, `t` the
//! (possibly fractional) target weight, and `w` the class weight multiplying
//! the positive term. Gradients are analytic with respect to the raw score and
//! carry the same reduction factor as the loss value.

use crate::weights::ClassWeights;
use dermclass_core::calibration::{clamp_probability, sigmoid, EPS};
use dermclass_core::{ensure_len, Error, Result, ScoreVector, TargetVector};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Loss variant and its hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LossKind {
    /// Weighted binary cross-entropy.
    ///
    /// - Loss: `-[w t ln p + (1-t) ln(1-p)]`
    /// - Gradient: `(1-t) p - w t (1-p)`
    WeightedBce,

    /// Focal loss.
    ///
    /// - Loss: `-a w t (1-p)^g ln p - (1-a)(1-t) p^g ln(1-p)`
    /// - Gradient: `-a w t (1-p)^g [(1-p) - g p ln p] + (1-a)(1-t) p^g [p - g (1-p) ln(1-p)]`
    Focal {
        #[serde(default = "default_alpha")]
        alpha: f64,
        #[serde(default = "default_gamma")]
        gamma: f64,
    },

    /// Asymmetric loss with separate focusing strengths and probability clipping.
    ///
    /// `p` is clipped to `[clip, 1 - clip]`; the gradient is zero wherever the
    /// clip is active.
    Asymmetric {
        #[serde(default = "default_gamma_pos")]
        gamma_pos: f64,
        #[serde(default = "default_gamma_neg")]
        gamma_neg: f64,
        #[serde(default = "default_clip")]
        clip: f64,
    },
}

fn default_alpha() -> f64 {
    0.25
}

fn default_gamma() -> f64 {
    2.0
}

fn default_gamma_pos() -> f64 {
    0.0
}

fn default_gamma_neg() -> f64 {
    4.0
}

fn default_clip() -> f64 {
    0.05
}

impl LossKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::WeightedBce => "weighted_bce",
            Self::Focal { .. } => "focal",
            Self::Asymmetric { .. } => "asymmetric",
        }
    }
}

/// How per-element terms are reduced to a scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Sum over classes, mean over the batch
    #[default]
    SumClassesMeanBatch,
    /// Mean over all N x C elements
    MeanAll,
}

/// Loss configuration.
///
/// The defaults are starting points, not tuned values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossConfig {
    #[serde(flatten)]
    pub kind: LossKind,

    #[serde(default)]
    pub reduction: Reduction,

    /// Warn when more than this fraction of elements hit the probability clamp
    #[serde(default = "default_clamp_warn_ratio")]
    pub clamp_warn_ratio: f64,
}

fn default_clamp_warn_ratio() -> f64 {
    0.01
}

impl Default for LossConfig {
    fn default() -> Self {
        Self::new(LossKind::WeightedBce)
    }
}

impl LossConfig {
    pub fn new(kind: LossKind) -> Self {
        Self {
            kind,
            reduction: Reduction::default(),
            clamp_warn_ratio: default_clamp_warn_ratio(),
        }
    }

    pub fn focal(alpha: f64, gamma: f64) -> Self {
        Self::new(LossKind::Focal { alpha, gamma })
    }

    pub fn asymmetric(gamma_pos: f64, gamma_neg: f64, clip: f64) -> Self {
        Self::new(LossKind::Asymmetric {
            gamma_pos,
            gamma_neg,
            clip,
        })
    }

    pub fn with_reduction(mut self, reduction: Reduction) -> Self {
        self.reduction = reduction;
        self
    }

    /// Check hyper-parameter ranges
    pub fn validate(&self) -> Result<()> {
        fn gamma_ok(name: &str, g: f64) -> Result<()> {
            if !g.is_finite() || g < 0.0 {
                return Err(Error::config(format!(
                    "{name} must be finite and >= 0, got {g}"
                )));
            }
            Ok(())
        }

        match self.kind {
            LossKind::WeightedBce => {}
            LossKind::Focal { alpha, gamma } => {
                if !alpha.is_finite() || !(0.0..=1.0).contains(&alpha) {
                    return Err(Error::config(format!(
                        "focal alpha must lie in [0, 1], got {alpha}"
                    )));
                }
                gamma_ok("focal gamma", gamma)?;
            }
            LossKind::Asymmetric {
                gamma_pos,
                gamma_neg,
                clip,
            } => {
                gamma_ok("gamma_pos", gamma_pos)?;
                gamma_ok("gamma_neg", gamma_neg)?;
                if !clip.is_finite() || !(0.0..0.5).contains(&clip) {
                    return Err(Error::config(format!(
                        "asymmetric clip must lie in [0, 0.5), got {clip}"
                    )));
                }
            }
        }

        if !self.clamp_warn_ratio.is_finite() || !(0.0..=1.0).contains(&self.clamp_warn_ratio) {
            return Err(Error::config(format!(
                "clamp_warn_ratio must lie in [0, 1], got {}",
                self.clamp_warn_ratio
            )));
        }
        Ok(())
    }
}

/// Result of one loss evaluation over a batch
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    /// Reduced scalar loss
    pub value: f64,
    /// Per-class contribution to `value` (sums to `value`)
    pub per_class: Vec<f64>,
    /// dLoss/dScore, one row per sample
    pub gradients: Vec<Vec<f64>>,
    /// Elements whose sigmoid output hit the `EPS` clamp
    pub clamped: usize,
    /// Batch size (N)
    pub samples: usize,
}

impl LossOutput {
    /// Gradient w.r.t. a per-class bias on the scores (column sums of `gradients`)
    pub fn bias_gradient(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.per_class.len()];
        for row in &self.gradients {
            for (acc, g) in out.iter_mut().zip(row) {
                *acc += g;
            }
        }
        out
    }
}

/// Stateless loss evaluator
#[derive(Debug, Clone)]
pub struct ImbalanceLoss {
    config: LossConfig,
}

impl ImbalanceLoss {
    pub fn new(config: LossConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    /// Compute the reduced loss and gradients for a batch.
    ///
    /// Deterministic: identical inputs always produce identical outputs.
    pub fn compute(
        &self,
        scores: &[ScoreVector],
        targets: &[TargetVector],
        class_weights: &ClassWeights,
    ) -> Result<LossOutput> {
        if scores.is_empty() {
            return Err(Error::invalid("loss batch is empty"));
        }
        ensure_len("batch targets", scores.len(), targets.len())?;

        let num_classes = class_weights.len();
        if num_classes == 0 {
            return Err(Error::invalid("class weights are empty"));
        }
        for (score, target) in scores.iter().zip(targets) {
            ensure_len("score vector", num_classes, score.len())?;
            ensure_len("target vector", num_classes, target.len())?;
        }

        let n = scores.len();
        let scale = match self.config.reduction {
            Reduction::SumClassesMeanBatch => 1.0 / n as f64,
            Reduction::MeanAll => 1.0 / (n * num_classes) as f64,
        };

        let mut per_class = vec![0.0; num_classes];
        let mut gradients = Vec::with_capacity(n);
        let mut clamped = 0usize;

        for (score, target) in scores.iter().zip(targets) {
            let mut row = Vec::with_capacity(num_classes);
            for c in 0..num_classes {
                let raw = sigmoid(f64::from(score.as_slice()[c]));
                if !(EPS..=1.0 - EPS).contains(&raw) {
                    clamped += 1;
                }
                let p = clamp_probability(raw);
                let t = target.as_slice()[c];
                let w = class_weights.get(c);

                let (loss, grad) = self.element(p, t, w);
                per_class[c] += loss * scale;
                row.push(grad * scale);
            }
            gradients.push(row);
        }

        let value = per_class.iter().sum();
        self.report_clamping(clamped, n * num_classes);
        metrics::counter!("dermclass_loss_batches_total", "loss" => self.config.kind.name())
            .increment(1);

        debug!(
            loss = self.config.kind.name(),
            samples = n,
            value,
            clamped,
            "Computed batch loss"
        );

        Ok(LossOutput {
            value,
            per_class,
            gradients,
            clamped,
            samples: n,
        })
    }

    /// Loss and gradient for one (sample, class) element
    fn element(&self, p: f64, t: f64, w: f64) -> (f64, f64) {
        let q = 1.0 - p;
        match self.config.kind {
            LossKind::WeightedBce => {
                let loss = -(w * t * p.ln() + (1.0 - t) * q.ln());
                let grad = (1.0 - t) * p - w * t * q;
                (loss, grad)
            }
            LossKind::Focal { alpha, gamma } => {
                focal_element(p, t, w * alpha, 1.0 - alpha, gamma, gamma)
            }
            LossKind::Asymmetric {
                gamma_pos,
                gamma_neg,
                clip,
            } => {
                if clip > 0.0 && (p < clip || p > 1.0 - clip) {
                    let pc = p.clamp(clip, 1.0 - clip);
                    let (loss, _) = focal_element(pc, t, w, 1.0, gamma_pos, gamma_neg);
                    (loss, 0.0)
                } else {
                    focal_element(p, t, w, 1.0, gamma_pos, gamma_neg)
                }
            }
        }
    }

    fn report_clamping(&self, clamped: usize, elements: usize) {
        if clamped == 0 {
            return;
        }
        metrics::counter!("dermclass_loss_clamped_total").increment(clamped as u64);
        let ratio = clamped as f64 / elements as f64;
        if ratio > self.config.clamp_warn_ratio {
            warn!(
                clamped,
                elements,
                ratio,
                "Frequent probability clamping in loss; outputs are saturated or miscalibrated"
            );
        }
    }
}

/// Focal-form term with positive scale `a_pos`, negative scale `a_neg`
fn focal_element(p: f64, t: f64, a_pos: f64, a_neg: f64, g_pos: f64, g_neg: f64) -> (f64, f64) {
    let q = 1.0 - p;
    let (ln_p, ln_q) = (p.ln(), q.ln());
    let mod_pos = q.powf(g_pos);
    let mod_neg = p.powf(g_neg);

    let loss = -a_pos * t * mod_pos * ln_p - a_neg * (1.0 - t) * mod_neg * ln_q;
    let grad = -a_pos * t * mod_pos * (q - g_pos * p * ln_p)
        + a_neg * (1.0 - t) * mod_neg * (p - g_neg * q * ln_q);
    (loss, grad)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn batch(scores: &[&[f32]], targets: &[&[f64]]) -> (Vec<ScoreVector>, Vec<TargetVector>) {
        (
            scores
                .iter()
                .map(|s| ScoreVector::new(s.to_vec()).unwrap())
                .collect(),
            targets
                .iter()
                .map(|t| TargetVector::new(t.to_vec()).unwrap())
                .collect(),
        )
    }

    /// Central-difference derivative of the reduced loss w.r.t. one score
    fn numeric_gradient(
        loss: &ImbalanceLoss,
        scores: &[ScoreVector],
        targets: &[TargetVector],
        weights: &ClassWeights,
        n: usize,
        c: usize,
    ) -> f64 {
        let h = 1e-3f32;
        let bump = |delta: f32| {
            let mut s: Vec<ScoreVector> = scores.to_vec();
            let mut row = s[n].as_slice().to_vec();
            row[c] += delta;
            let moved = f64::from(row[c]);
            s[n] = ScoreVector::new(row).unwrap();
            (loss.compute(&s, targets, weights).unwrap().value, moved)
        };
        let (up, s_up) = bump(h);
        let (down, s_down) = bump(-h);
        (up - down) / (s_up - s_down)
    }

    #[test]
    fn test_bce_reference_value() {
        let loss = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let (s, t) = batch(&[&[0.0, 0.0]], &[&[1.0, 0.0]]);
        let out = loss.compute(&s, &t, &ClassWeights::uniform(2)).unwrap();
        let ln2 = std::f64::consts::LN_2;
        assert!((out.value - 2.0 * ln2).abs() < 1e-12);
        assert!((out.per_class[0] - ln2).abs() < 1e-12);
        assert!((out.gradients[0][0] + 0.5).abs() < 1e-12);
        assert!((out.gradients[0][1] - 0.5).abs() < 1e-12);
        assert_eq!(out.samples, 1);
        assert_eq!(out.clamped, 0);
    }

    #[test]
    fn test_pos_weight_scales_positive_term_only() {
        let loss = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let (s, t) = batch(&[&[0.0, 0.0]], &[&[1.0, 0.0]]);
        let base = loss.compute(&s, &t, &ClassWeights::uniform(2)).unwrap();
        let weighted = loss
            .compute(&s, &t, &ClassWeights::from_vec(vec![3.0, 3.0]).unwrap())
            .unwrap();
        assert!((weighted.per_class[0] - 3.0 * base.per_class[0]).abs() < 1e-12);
        assert!((weighted.per_class[1] - base.per_class[1]).abs() < 1e-12);
    }

    #[test]
    fn test_reduction_modes() {
        let (s, t) = batch(&[&[1.0, -1.0], &[0.5, 2.0]], &[&[1.0, 0.0], &[0.0, 1.0]]);
        let w = ClassWeights::uniform(2);
        let sum = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let mean = ImbalanceLoss::new(LossConfig::default().with_reduction(Reduction::MeanAll))
            .unwrap();
        let a = sum.compute(&s, &t, &w).unwrap();
        let b = mean.compute(&s, &t, &w).unwrap();
        assert!((a.value - 2.0 * b.value).abs() < 1e-12);
        assert!((a.per_class.iter().sum::<f64>() - a.value).abs() < 1e-12);
    }

    #[test]
    fn test_saturated_scores_are_clamped() {
        let loss = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let (s, t) = batch(&[&[-100.0, 100.0]], &[&[1.0, 0.0]]);
        let out = loss.compute(&s, &t, &ClassWeights::uniform(2)).unwrap();
        assert!(out.value.is_finite());
        assert_eq!(out.clamped, 2);
        let bound = -(EPS.ln());
        assert!((out.value - 2.0 * bound).abs() < 1e-6);
        assert!(out.gradients[0][0] < 0.0);
        assert!(out.gradients[0][1] > 0.0);
    }

    #[test]
    fn test_focal_downweights_easy_examples() {
        let bce = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let focal = ImbalanceLoss::new(LossConfig::focal(0.5, 2.0)).unwrap();
        let w = ClassWeights::uniform(1);
        let (easy_s, easy_t) = batch(&[&[4.0]], &[&[1.0]]);
        let (hard_s, hard_t) = batch(&[&[-4.0]], &[&[1.0]]);

        let easy_ratio = focal.compute(&easy_s, &easy_t, &w).unwrap().value
            / bce.compute(&easy_s, &easy_t, &w).unwrap().value;
        let hard_ratio = focal.compute(&hard_s, &hard_t, &w).unwrap().value
            / bce.compute(&hard_s, &hard_t, &w).unwrap().value;
        assert!(easy_ratio < hard_ratio);
    }

    #[test]
    fn test_focal_gamma_zero_matches_scaled_bce() {
        let bce = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let focal = ImbalanceLoss::new(LossConfig::focal(0.5, 0.0)).unwrap();
        let (s, t) = batch(&[&[0.3, -1.2, 2.0]], &[&[1.0, 0.0, 0.5]]);
        let w = ClassWeights::uniform(3);
        let a = bce.compute(&s, &t, &w).unwrap();
        let b = focal.compute(&s, &t, &w).unwrap();
        assert!((a.value * 0.5 - b.value).abs() < 1e-12);
    }

    #[test]
    fn test_analytic_gradients_match_numeric() {
        let (s, t) = batch(
            &[&[0.3, -1.2, 2.0], &[-0.4, 0.8, -2.5]],
            &[&[1.0, 0.0, 0.5], &[0.0, 1.0, 0.0]],
        );
        let w = ClassWeights::from_vec(vec![2.0, 1.0, 4.0]).unwrap();
        let configs = [
            LossConfig::default(),
            LossConfig::focal(0.25, 2.0),
            LossConfig::focal(0.7, 1.5).with_reduction(Reduction::MeanAll),
            LossConfig::asymmetric(1.0, 4.0, 0.0),
        ];
        for config in configs {
            let loss = ImbalanceLoss::new(config).unwrap();
            let out = loss.compute(&s, &t, &w).unwrap();
            for n in 0..2 {
                for c in 0..3 {
                    let numeric = numeric_gradient(&loss, &s, &t, &w, n, c);
                    let analytic = out.gradients[n][c];
                    assert!(
                        (numeric - analytic).abs() < 1e-4 * analytic.abs().max(1.0),
                        "{config:?} n={n} c={c}: numeric {numeric} analytic {analytic}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_asymmetric_clip_zeroes_gradient() {
        let loss = ImbalanceLoss::new(LossConfig::asymmetric(0.0, 4.0, 0.05)).unwrap();
        let (s, t) = batch(&[&[-5.0, 0.0]], &[&[0.0, 0.0]]);
        let out = loss.compute(&s, &t, &ClassWeights::uniform(2)).unwrap();
        assert_eq!(out.gradients[0][0], 0.0);
        assert!(out.gradients[0][1] > 0.0);
        assert!(out.per_class[0] > 0.0);
    }

    #[test]
    fn test_deterministic() {
        let loss = ImbalanceLoss::new(LossConfig::focal(0.25, 2.0)).unwrap();
        let (s, t) = batch(&[&[0.1, 0.2], &[3.0, -3.0]], &[&[1.0, 0.0], &[0.0, 1.0]]);
        let w = ClassWeights::uniform(2);
        assert_eq!(
            loss.compute(&s, &t, &w).unwrap(),
            loss.compute(&s, &t, &w).unwrap()
        );
    }

    #[test]
    fn test_rejects_malformed_batches() {
        let loss = ImbalanceLoss::new(LossConfig::default()).unwrap();
        let w = ClassWeights::uniform(2);
        let (s, t) = batch(&[&[0.0, 0.0]], &[&[1.0]]);
        assert!(matches!(
            loss.compute(&s, &t, &w),
            Err(Error::DimensionMismatch { .. })
        ));
        let (s, _) = batch(&[&[0.0, 0.0]], &[]);
        assert!(loss.compute(&s, &[], &w).is_err());
        assert!(loss.compute(&[], &[], &w).is_err());
    }

    #[test]
    fn test_config_validation() {
        assert!(ImbalanceLoss::new(LossConfig::focal(1.5, 2.0)).is_err());
        assert!(ImbalanceLoss::new(LossConfig::focal(0.25, -1.0)).is_err());
        assert!(ImbalanceLoss::new(LossConfig::focal(f64::NAN, 1.0)).is_err());
        assert!(ImbalanceLoss::new(LossConfig::asymmetric(0.0, 4.0, 0.5)).is_err());
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
type: focal
alpha: 0.5
gamma: 1.5
reduction: mean_all
"#;
        let config: LossConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.kind, LossKind::Focal { alpha: 0.5, gamma: 1.5 });
        assert_eq!(config.reduction, Reduction::MeanAll);

        let config: LossConfig = serde_yaml::from_str("type: asymmetric").unwrap();
        assert_eq!(
            config.kind,
            LossKind::Asymmetric {
                gamma_pos: 0.0,
                gamma_neg: 4.0,
                clip: 0.05
            }
        );
        assert_eq!(config.reduction, Reduction::SumClassesMeanBatch);
    }

    proptest! {
        #[test]
        fn prop_loss_finite_and_nonnegative(
            scores in prop::collection::vec(-50.0f32..50.0, 4),
            targets in prop::collection::vec(0.0f64..=1.0, 4),
            gamma in 0.0f64..5.0,
        ) {
            let s = vec![ScoreVector::new(scores).unwrap()];
            let t = vec![TargetVector::new(targets).unwrap()];
            let w = ClassWeights::uniform(4);
            for config in [LossConfig::default(), LossConfig::focal(0.25, gamma)] {
                let out = ImbalanceLoss::new(config).unwrap().compute(&s, &t, &w).unwrap();
                prop_assert!(out.value.is_finite());
                prop_assert!(out.value >= 0.0);
                prop_assert!(out.gradients[0].iter().all(|g| g.is_finite()));
            }
        }
    }
}
