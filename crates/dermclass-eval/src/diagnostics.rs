//! Class-imbalance diagnostics
//!
//! Surfaces the per-class failures an aggregate score hides: frequent
//! training classes that score F1 = 0, classes that are never predicted,
//! classes that cannot be tested on the split, and classes that were never
//! seen in training.

use crate::report::{ClassStatus, EvaluationReport};
use dermclass_core::{ensure_len, Result, SupportCounts};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    /// Top-quartile training support but F1 = 0 on the split
    MajorityCollapse,
    /// Present in the split, never predicted
    NeverPredicted,
    /// No support in the split; metrics are undefined
    Untestable,
    /// Present in the split but absent from training
    TrainAbsent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassFlag {
    pub class: usize,
    pub name: String,
    pub kind: FlagKind,
    pub train_support: u64,
    pub eval_support: u64,
    pub f1: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Flags ordered by class index, then kind
    pub flags: Vec<ClassFlag>,

    /// Classes making up the top training-support quartile
    pub majority_classes: Vec<usize>,

    /// Rank correlation between training support and F1 over tested classes
    pub support_f1_spearman: Option<f64>,
}

impl DiagnosticsReport {
    pub fn of_kind(&self, kind: FlagKind) -> impl Iterator<Item = &ClassFlag> + '_ {
        self.flags.iter().filter(move |f| f.kind == kind)
    }

    pub fn is_flagged(&self, class: usize, kind: FlagKind) -> bool {
        self.flags.iter().any(|f| f.class == class && f.kind == kind)
    }
}

/// Indices of classes whose training-support rank falls in the top quartile.
///
/// The cutoff is the support of the `ceil(C / 4)`-th most frequent class;
/// every class at or above it qualifies, so ties at the boundary are all
/// included. Classes without training support never qualify.
fn majority_classes(train_support: &SupportCounts) -> Vec<usize> {
    let counts = train_support.as_slice();
    let quartile = counts.len().div_ceil(4);
    let mut sorted = counts.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    let Some(&cutoff) = sorted.get(quartile.saturating_sub(1)) else {
        return Vec::new();
    };
    (0..counts.len())
        .filter(|&c| counts[c] > 0 && counts[c] >= cutoff)
        .collect()
}

/// Flag pathological classes in `report` given the training support
pub fn diagnose(report: &EvaluationReport, train_support: &SupportCounts) -> Result<DiagnosticsReport> {
    ensure_len("training support", report.classes.len(), train_support.len())?;
    let majority = majority_classes(train_support);

    let mut flags = Vec::new();
    for class in &report.classes {
        let train = train_support.get(class.index);
        let mut flag = |kind| {
            flags.push(ClassFlag {
                class: class.index,
                name: class.name.clone(),
                kind,
                train_support: train,
                eval_support: class.support,
                f1: class.f1,
            })
        };

        if majority.binary_search(&class.index).is_ok() && class.f1 == Some(0.0) {
            flag(FlagKind::MajorityCollapse);
        }
        if class.status == ClassStatus::NeverPredicted {
            flag(FlagKind::NeverPredicted);
        }
        if class.status == ClassStatus::Untested {
            flag(FlagKind::Untestable);
        }
        if train == 0 && class.support > 0 {
            flag(FlagKind::TrainAbsent);
        }
    }

    let (support, f1): (Vec<f64>, Vec<f64>) = report
        .classes
        .iter()
        .filter_map(|c| c.f1.map(|f| (train_support.get(c.index) as f64, f)))
        .unzip();
    let support_f1_spearman = spearman(&support, &f1);

    let diagnostics = DiagnosticsReport {
        flags,
        majority_classes: majority,
        support_f1_spearman,
    };
    for flag in diagnostics.of_kind(FlagKind::MajorityCollapse) {
        warn!(
            class = %flag.name,
            train_support = flag.train_support,
            eval_support = flag.eval_support,
            "Frequent training class scores F1 = 0"
        );
    }
    Ok(diagnostics)
}

/// Ranks starting at 1; tied values share their average rank
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && values[order[j + 1]] == values[order[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation with average ranks for ties.
///
/// `None` for mismatched lengths, fewer than two points, or a constant input.
pub fn spearman(xs: &[f64], ys: &[f64]) -> Option<f64> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let (rx, ry) = (average_ranks(xs), average_ranks(ys));
    let n = rx.len() as f64;
    let (mx, my) = (rx.iter().sum::<f64>() / n, ry.iter().sum::<f64>() / n);

    let (mut cov, mut vx, mut vy) = (0.0, 0.0, 0.0);
    for (a, b) in rx.iter().zip(&ry) {
        cov += (a - mx) * (b - my);
        vx += (a - mx) * (a - mx);
        vy += (b - my) * (b - my);
    }
    if vx == 0.0 || vy == 0.0 {
        return None;
    }
    Some(cov / (vx * vy).sqrt())
}
