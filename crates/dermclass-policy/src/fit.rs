//! Per-class threshold fitting on a validation split
//!
//! For each class the validation probabilities are sorted descending and the
//! cutoff is swept through every distinct value, updating TP/FP
//! incrementally. The retained cutoff maximizes F1; ties go to the higher
//! precision, then to the higher threshold. F1 and precision are compared as
//! exact integer ratios so ties are real ties, not float noise.

use crate::strategy::ThresholdPolicy;
use dermclass_core::{
    ensure_len, ClassCatalog, Error, ProbabilityVector, Result, SplitRole, TargetVector,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use tracing::{info, warn};

/// Fitting settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitConfig {
    /// Cutoff used for classes with no validation positives
    #[serde(default = "default_fallback_threshold")]
    pub fallback_threshold: f64,

    /// Fit classes on the rayon pool
    #[serde(default = "default_true")]
    pub parallel: bool,
}

fn default_fallback_threshold() -> f64 {
    0.5
}

fn default_true() -> bool {
    true
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: default_fallback_threshold(),
            parallel: true,
        }
    }
}

/// How a class's cutoff was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitOutcome {
    /// Swept the validation precision/recall curve
    Fitted,
    /// No validation positives; the fallback cutoff is used
    NoPositives,
}

/// Fitted cutoff for one class and its validation metrics at that cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFit {
    pub threshold: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
    pub positives: u64,
    pub outcome: FitOutcome,
}

/// Exact non-negative ratio `num / den` (0 when `den == 0`)
#[derive(Debug, Clone, Copy)]
struct Ratio {
    num: u64,
    den: u64,
}

impl Ratio {
    fn new(num: u64, den: u64) -> Self {
        if den == 0 {
            Self { num: 0, den: 1 }
        } else {
            Self { num, den }
        }
    }

    fn cmp(&self, other: &Self) -> Ordering {
        (u128::from(self.num) * u128::from(other.den))
            .cmp(&(u128::from(other.num) * u128::from(self.den)))
    }

    fn value(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    threshold: f64,
    tp: u64,
    fp: u64,
}

impl Candidate {
    fn f1(&self, positives: u64) -> Ratio {
        // 2TP / (2TP + FP + FN), FN = positives - TP
        Ratio::new(2 * self.tp, self.tp + self.fp + positives)
    }

    fn precision(&self) -> Ratio {
        Ratio::new(self.tp, self.tp + self.fp)
    }

    /// True when `self` beats `best` (F1, then precision; equal keeps `best`)
    fn beats(&self, best: &Self, positives: u64) -> bool {
        match self.f1(positives).cmp(&best.f1(positives)) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.precision().cmp(&best.precision()) == Ordering::Greater,
        }
    }
}

/// Fit the F1-maximizing cutoff for one class.
///
/// `probabilities[i]` is sample `i`'s probability for the class and
/// `positives[i]` whether the sample is a true positive.
pub fn fit_class_threshold(
    probabilities: &[f64],
    positives: &[bool],
    fallback_threshold: f64,
) -> Result<ClassFit> {
    ensure_len("positive labels", probabilities.len(), positives.len())?;
    if let Some(&p) = probabilities
        .iter()
        .find(|p| !p.is_finite() || !(0.0..=1.0).contains(*p))
    {
        return Err(Error::invalid(format!("probability outside [0, 1]: {p}")));
    }

    let total_pos = positives.iter().filter(|&&y| y).count() as u64;
    if total_pos == 0 {
        return Ok(ClassFit {
            threshold: fallback_threshold,
            f1: 0.0,
            precision: 0.0,
            recall: 0.0,
            positives: 0,
            outcome: FitOutcome::NoPositives,
        });
    }

    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|&a, &b| probabilities[b].total_cmp(&probabilities[a]));

    let mut best: Option<Candidate> = None;
    let (mut tp, mut fp) = (0u64, 0u64);
    let mut i = 0;
    while i < order.len() {
        let value = probabilities[order[i]];
        // Admit every sample tied at this value before scoring the cutoff.
        while i < order.len() && probabilities[order[i]] == value {
            if positives[order[i]] {
                tp += 1;
            } else {
                fp += 1;
            }
            i += 1;
        }
        let candidate = Candidate {
            threshold: value,
            tp,
            fp,
        };
        match &best {
            Some(b) if !candidate.beats(b, total_pos) => {}
            _ => best = Some(candidate),
        }
    }

    let best = best.ok_or_else(|| Error::internal("threshold sweep produced no candidate"))?;
    Ok(ClassFit {
        threshold: best.threshold,
        f1: best.f1(total_pos).value(),
        precision: best.precision().value(),
        recall: Ratio::new(best.tp, total_pos).value(),
        positives: total_pos,
        outcome: FitOutcome::Fitted,
    })
}

/// Per-class fits plus the policy built from them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerClassFit {
    pub policy: ThresholdPolicy,
    pub fits: Vec<ClassFit>,
}

impl PerClassFit {
    /// Classes that fell back to the global cutoff
    pub fn fallbacks(&self) -> impl Iterator<Item = usize> + '_ {
        self.fits
            .iter()
            .enumerate()
            .filter(|(_, f)| f.outcome == FitOutcome::NoPositives)
            .map(|(c, _)| c)
    }
}

/// Fit a per-class threshold policy on a validation split.
///
/// Classes are independent and fitted in parallel. Fitting on the test split
/// is refused.
pub fn fit_per_class(
    catalog: &ClassCatalog,
    split: SplitRole,
    probabilities: &[ProbabilityVector],
    targets: &[TargetVector],
    config: &FitConfig,
) -> Result<PerClassFit> {
    if split == SplitRole::Test {
        return Err(Error::invalid(
            "thresholds must be fit on a validation split, never on the test split",
        ));
    }
    ThresholdPolicy::global(config.fallback_threshold)?;
    ensure_len("validation targets", probabilities.len(), targets.len())?;
    for (p, t) in probabilities.iter().zip(targets) {
        p.ensure_len(catalog)?;
        t.ensure_len(catalog)?;
    }

    let fit_one = |c: usize| -> Result<ClassFit> {
        let column: Vec<f64> = probabilities.iter().map(|p| p.as_slice()[c]).collect();
        let labels: Vec<bool> = targets.iter().map(|t| t.is_positive(c)).collect();
        fit_class_threshold(&column, &labels, config.fallback_threshold)
    };

    let fits: Vec<ClassFit> = if config.parallel {
        (0..catalog.len())
            .into_par_iter()
            .map(fit_one)
            .collect::<Result<Vec<ClassFit>>>()?
    } else {
        (0..catalog.len()).map(fit_one).collect::<Result<Vec<ClassFit>>>()?
    };

    let thresholds = fits.iter().map(|f| f.threshold).collect();
    let fallbacks: Vec<usize> = fits
        .iter()
        .enumerate()
        .filter(|(_, f)| f.outcome == FitOutcome::NoPositives)
        .map(|(c, _)| c)
        .collect();

    if !fallbacks.is_empty() {
        metrics::counter!("dermclass_threshold_fallbacks_total").increment(fallbacks.len() as u64);
        let names: Vec<&str> = fallbacks.iter().filter_map(|&c| catalog.name(c)).collect();
        warn!(
            count = fallbacks.len(),
            fallback_threshold = config.fallback_threshold,
            classes = ?names,
            "Classes without validation positives use the fallback threshold"
        );
    }

    info!(
        classes = catalog.len(),
        samples = probabilities.len(),
        %split,
        fallbacks = fallbacks.len(),
        "Fitted per-class thresholds"
    );

    Ok(PerClassFit {
        policy: ThresholdPolicy::PerClass {
            thresholds,
            fallbacks,
        },
        fits,
    })
}
