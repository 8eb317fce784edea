//! Per-class confusion counting
//!
//! Counts are plain integers so shards can be accumulated privately and
//! merged by addition in any order.

use dermclass_core::{ensure_len, Error, PredictionSet, Result, TargetVector};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Binary confusion counts for one class
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub tn: u64,
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl ConfusionCounts {
    pub fn record(&mut self, predicted: bool, actual: bool) {
        match (predicted, actual) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, true) => self.fn_ += 1,
            (false, false) => self.tn += 1,
        }
    }

    /// Samples whose target marks the class positive
    pub fn support(&self) -> u64 {
        self.tp + self.fn_
    }

    /// Samples predicted positive
    pub fn predicted(&self) -> u64 {
        self.tp + self.fp
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.fn_ + self.tn
    }

    /// TP / (TP + FP), 0 when nothing was predicted
    pub fn precision(&self) -> f64 {
        ratio(self.tp, self.predicted())
    }

    /// TP / (TP + FN), 0 when the class has no support
    pub fn recall(&self) -> f64 {
        ratio(self.tp, self.support())
    }

    /// Harmonic mean of precision and recall, 0 exactly when TP = 0
    pub fn f1(&self) -> f64 {
        // 2PR / (P + R) reduces to 2TP / (2TP + FP + FN)
        ratio(2 * self.tp, 2 * self.tp + self.fp + self.fn_)
    }

    pub fn merge(&mut self, other: &Self) {
        *self += *other;
    }
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            tp: self.tp + rhs.tp,
            fp: self.fp + rhs.fp,
            fn_: self.fn_ + rhs.fn_,
            tn: self.tn + rhs.tn,
        }
    }
}

impl AddAssign for ConfusionCounts {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for ConfusionCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

/// Confusion counts for every class of a catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionTable {
    counts: Vec<ConfusionCounts>,
    samples: u64,
}

impl ConfusionTable {
    pub fn new(num_classes: usize) -> Self {
        Self {
            counts: vec![ConfusionCounts::default(); num_classes],
            samples: 0,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.counts.len()
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn get(&self, class: usize) -> Option<&ConfusionCounts> {
        self.counts.get(class)
    }

    pub fn classes(&self) -> &[ConfusionCounts] {
        &self.counts
    }

    /// Record one sample. A class counts as positive when its target weight
    /// reaches the agreement threshold.
    pub fn record(&mut self, prediction: &PredictionSet, target: &TargetVector) -> Result<()> {
        let n = self.counts.len();
        ensure_len("target vector", n, target.len())?;
        if let Some(max) = prediction.max_index() {
            if max >= n {
                return Err(Error::invalid(format!(
                    "predicted class index {max} out of range for {n} classes"
                )));
            }
        }
        for (c, counts) in self.counts.iter_mut().enumerate() {
            counts.record(prediction.contains(c), target.is_positive(c));
        }
        self.samples += 1;
        Ok(())
    }

    /// Add another table's counts into this one
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        ensure_len("confusion table", self.counts.len(), other.counts.len())?;
        for (mine, theirs) in self.counts.iter_mut().zip(&other.counts) {
            mine.merge(theirs);
        }
        self.samples += other.samples;
        Ok(())
    }

    /// Counts pooled across all classes
    pub fn micro(&self) -> ConfusionCounts {
        self.counts.iter().copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn counts(tp: u64, fp: u64, fn_: u64, tn: u64) -> ConfusionCounts {
        ConfusionCounts { tp, fp, fn_, tn }
    }

    #[test]
    fn test_zero_denominators() {
        let empty = ConfusionCounts::default();
        assert_eq!(empty.precision(), 0.0);
        assert_eq!(empty.recall(), 0.0);
        assert_eq!(empty.f1(), 0.0);

        // never predicted but present
        let missed = counts(0, 0, 141, 300);
        assert_eq!(missed.precision(), 0.0);
        assert_eq!(missed.recall(), 0.0);
        assert_eq!(missed.f1(), 0.0);
    }

    #[test]
    fn test_f1_is_harmonic_mean() {
        let c = counts(6, 2, 4, 10);
        let (p, r) = (c.precision(), c.recall());
        assert!((c.f1() - 2.0 * p * r / (p + r)).abs() < 1e-12);
    }

    #[test]
    fn test_record_and_micro() {
        let mut table = ConfusionTable::new(2);
        let sets = [
            PredictionSet::from_indices(2, [0]).unwrap(),
            PredictionSet::from_indices(2, [0, 1]).unwrap(),
        ];
        let targets = [
            TargetVector::new(vec![1.0, 0.0]).unwrap(),
            TargetVector::new(vec![0.5, 0.4]).unwrap(),
        ];
        for (s, t) in sets.iter().zip(&targets) {
            table.record(s, t).unwrap();
        }

        assert_eq!(table.get(0), Some(&counts(2, 0, 0, 0)));
        // 0.4 is below the agreement threshold
        assert_eq!(table.get(1), Some(&counts(0, 1, 0, 1)));
        assert_eq!(table.micro(), counts(2, 1, 0, 1));
        assert_eq!(table.samples(), 2);
    }

    #[test]
    fn test_record_rejects_bad_shapes() {
        let mut table = ConfusionTable::new(2);
        let target = TargetVector::new(vec![1.0, 0.0]).unwrap();
        let out_of_range: PredictionSet = [3usize].into_iter().collect();
        assert!(table.record(&out_of_range, &target).is_err());

        let short = TargetVector::new(vec![1.0]).unwrap();
        assert!(table.record(&PredictionSet::new(), &short).is_err());
        assert_eq!(table.samples(), 0);

        assert!(table.merge(&ConfusionTable::new(3)).is_err());
    }

    #[test]
    fn test_serde_field_name() {
        let json = serde_json::to_string(&counts(1, 2, 3, 4)).unwrap();
        assert_eq!(json, r#"{"tp":1,"fp":2,"fn":3,"tn":4}"#);
    }

    proptest! {
        #[test]
        fn prop_f1_never_nan_and_zero_iff_no_tp(
            tp in 0u64..1000, fp in 0u64..1000, fn_ in 0u64..1000, tn in 0u64..1000,
        ) {
            let c = counts(tp, fp, fn_, tn);
            let f1 = c.f1();
            prop_assert!(f1.is_finite());
            prop_assert!((0.0..=1.0).contains(&f1));
            prop_assert_eq!(f1 == 0.0, tp == 0);
        }

        #[test]
        fn prop_merge_is_commutative(
            a in prop::collection::vec(0u64..100, 4),
            b in prop::collection::vec(0u64..100, 4),
        ) {
            let x = counts(a[0], a[1], a[2], a[3]);
            let y = counts(b[0], b[1], b[2], b[3]);
            prop_assert_eq!(x + y, y + x);
        }
    }
}
