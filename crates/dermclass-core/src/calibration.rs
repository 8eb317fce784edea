//! Probability calibration: elementwise (temperature-scaled) sigmoid.
//!
//! Classes are independent, so there is no cross-class normalization.
//! Calibrated probabilities are bounded to `[P_MIN, P_MAX]`, the tightest f64
//! interval strictly inside (0, 1), so distinct scores keep distinct
//! probabilities wherever f64 can represent them. The coarser `EPS` clamp is
//! for the loss, where `ln p` and `ln (1 - p)` must stay well conditioned.

use crate::error::{Error, Result};
use crate::types::{ProbabilityVector, ScoreVector};
use serde::{Deserialize, Serialize};

/// Loss-side clamp bound for probabilities
pub const EPS: f64 = 1e-7;

/// Smallest calibrated probability
pub const P_MIN: f64 = f64::MIN_POSITIVE;

/// Largest calibrated probability (the largest f64 below 1.0)
pub const P_MAX: f64 = 1.0 - f64::EPSILON / 2.0;

/// Numerically stable logistic function
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Clamp a probability into `[EPS, 1 - EPS]` for loss computation
pub fn clamp_probability(p: f64) -> f64 {
    p.clamp(EPS, 1.0 - EPS)
}

/// Temperature-scaled sigmoid calibration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Scores are divided by this before the sigmoid (must be > 0)
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_temperature() -> f64 {
    1.0
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
        }
    }
}

impl Calibration {
    /// Create a calibration with the given temperature
    pub fn new(temperature: f64) -> Result<Self> {
        let calibration = Self { temperature };
        calibration.validate()?;
        Ok(calibration)
    }

    /// Reject non-positive or non-finite temperatures
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature <= 0.0 {
            return Err(Error::config(format!(
                "calibration temperature must be finite and > 0, got {}",
                self.temperature
            )));
        }
        Ok(())
    }

    /// Probability for a single raw score
    pub fn probability(&self, score: f32) -> f64 {
        sigmoid(f64::from(score) / self.temperature).clamp(P_MIN, P_MAX)
    }

    /// Elementwise calibration of one score vector
    pub fn calibrate(&self, scores: &ScoreVector) -> ProbabilityVector {
        let probabilities = scores
            .as_slice()
            .iter()
            .map(|&s| self.probability(s))
            .collect();
        ProbabilityVector::from_clamped(probabilities)
    }

    /// Calibrate a batch of score vectors
    pub fn calibrate_batch(&self, scores: &[ScoreVector]) -> Vec<ProbabilityVector> {
        scores.iter().map(|s| self.calibrate(s)).collect()
    }

    /// Analytic inverse: the raw score that maps to `p` (`T * logit(p)`).
    ///
    /// `p` must lie strictly inside (0, 1).
    pub fn invert(&self, p: f64) -> Result<f64> {
        if !(p > 0.0 && p < 1.0) {
            return Err(Error::invalid(format!(
                "cannot invert probability {p}: must lie in (0, 1)"
            )));
        }
        Ok(self.temperature * (p / (1.0 - p)).ln())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sigmoid_reference_points() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-15);
        assert!((sigmoid(2.0) - 0.880_797_077_977_882_3).abs() < 1e-12);
        assert!((sigmoid(-2.0) - 0.119_202_922_022_117_7).abs() < 1e-12);
        assert!(sigmoid(-1000.0).is_finite());
        assert!(sigmoid(1000.0).is_finite());
    }

    #[test]
    fn test_extreme_scores_stay_open_interval() {
        let cal = Calibration::default();
        let scores = ScoreVector::new(vec![-1e30, 1e30, 0.0]).unwrap();
        let p = cal.calibrate(&scores);
        assert_eq!(p.len(), 3);
        for &v in p.as_slice() {
            assert!(v > 0.0 && v < 1.0);
        }
    }

    #[test]
    fn test_saturated_scores_keep_their_order() {
        let cal = Calibration::default();
        let p = cal.calibrate(&ScoreVector::new(vec![17.0, 20.0, -17.0, -20.0]).unwrap());
        let p = p.as_slice();
        assert!(p[0] < p[1], "{} !< {}", p[0], p[1]);
        assert!(p[3] < p[2], "{} !< {}", p[3], p[2]);
        assert!(p[1] < 1.0 && p[3] > 0.0);

        let ranked = cal.calibrate(&ScoreVector::new(vec![17.0, 20.0, 19.0]).unwrap());
        assert_eq!(ranked.top_k(1), vec![1]);
        assert_eq!(ranked.ranked(), vec![1, 2, 0]);
    }

    #[test]
    fn test_temperature_softens() {
        let sharp = Calibration::new(1.0).unwrap();
        let soft = Calibration::new(2.0).unwrap();
        assert!(soft.probability(2.0) < sharp.probability(2.0));
        assert!(soft.probability(-2.0) > sharp.probability(-2.0));
        assert!(Calibration::new(0.0).is_err());
        assert!(Calibration::new(f64::NAN).is_err());
    }

    #[test]
    fn test_invert_roundtrip() {
        let cal = Calibration::new(0.7).unwrap();
        for s in [-6.0f32, -1.5, 0.0, 0.25, 3.0] {
            let back = cal.invert(cal.probability(s)).unwrap();
            assert!((back - f64::from(s)).abs() < 1e-6, "{s} -> {back}");
        }
        assert!(cal.invert(0.0).is_err());
        assert!(cal.invert(1.0).is_err());
    }

    #[test]
    fn test_calibration_yaml_default() {
        let cal: Calibration = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cal.temperature, 1.0);
    }

    proptest! {
        #[test]
        fn prop_calibrate_in_open_interval(scores in prop::collection::vec(-1e4f32..1e4f32, 1..64)) {
            let p = Calibration::default().calibrate(&ScoreVector::new(scores).unwrap());
            for &v in p.as_slice() {
                prop_assert!(v > 0.0 && v < 1.0);
            }
        }

        #[test]
        fn prop_calibrate_preserves_strict_order(
            a in -30.0f32..30.0,
            gap in 0.05f32..2.0,
            temperature in 1.0f64..3.0,
        ) {
            let b = a + gap;
            let cal = Calibration::new(temperature).unwrap();
            let p = cal.calibrate(&ScoreVector::new(vec![a, b]).unwrap());
            prop_assert!(p.as_slice()[0] < p.as_slice()[1]);
        }
    }
}
