//! Threshold-independent ranking accuracy
//!
//! Top-K reads the probability vector directly; no decision policy is
//! involved. A sample is a hit at K when any of its positive classes is among
//! the K highest probabilities. Every sample is in the denominator, including
//! samples without a positive class.
//!
//! Soft Top-K uses the fractional target weights: the share of a sample's
//! total weight captured by its top K classes, averaged over samples with
//! nonzero total weight.

use dermclass_core::{ensure_len, Error, ProbabilityVector, Result, TargetVector};
use std::collections::BTreeMap;

pub const DEFAULT_TOP_K: [usize; 3] = [1, 3, 5];

#[derive(Debug, Clone, PartialEq)]
pub struct TopKAccumulator {
    ks: Vec<usize>,
    hits: Vec<u64>,
    samples: u64,
    /// Per-sample captured weight share for each K, in record order.
    /// Kept unsummed so merged shards sum in exactly the sequential order.
    captured: Vec<Vec<f64>>,
}

impl TopKAccumulator {
    /// Create an accumulator for the given K values (sorted and deduplicated)
    pub fn new(ks: &[usize]) -> Result<Self> {
        let mut ks = ks.to_vec();
        ks.sort_unstable();
        ks.dedup();
        if ks.first() == Some(&0) {
            return Err(Error::config("top-k values must be >= 1"));
        }
        let n = ks.len();
        Ok(Self {
            ks,
            hits: vec![0; n],
            samples: 0,
            captured: vec![Vec::new(); n],
        })
    }

    pub fn ks(&self) -> &[usize] {
        &self.ks
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn record(&mut self, probabilities: &ProbabilityVector, target: &TargetVector) -> Result<()> {
        ensure_len("target vector", probabilities.len(), target.len())?;
        let max_k = self.ks.last().copied().unwrap_or(0);
        let top = probabilities.top_k(max_k);
        let total_weight = target.total_weight();

        for (i, &k) in self.ks.iter().enumerate() {
            let head = &top[..k.min(top.len())];
            if head.iter().any(|&c| target.is_positive(c)) {
                self.hits[i] += 1;
            }
            if total_weight > 0.0 {
                let weight: f64 = head.iter().map(|&c| target.weight(c)).sum();
                self.captured[i].push(weight / total_weight);
            }
        }
        self.samples += 1;
        Ok(())
    }

    /// Append another accumulator's samples after this one's
    pub fn merge(&mut self, other: &Self) -> Result<()> {
        if self.ks != other.ks {
            return Err(Error::invalid(format!(
                "cannot merge top-k accumulators over {:?} and {:?}",
                self.ks, other.ks
            )));
        }
        for (mine, theirs) in self.hits.iter_mut().zip(&other.hits) {
            *mine += theirs;
        }
        for (mine, theirs) in self.captured.iter_mut().zip(&other.captured) {
            mine.extend_from_slice(theirs);
        }
        self.samples += other.samples;
        Ok(())
    }

    /// Hit rate per K (0 for an empty accumulator)
    pub fn accuracy(&self) -> BTreeMap<usize, f64> {
        self.ks
            .iter()
            .zip(&self.hits)
            .map(|(&k, &hits)| {
                let acc = if self.samples == 0 {
                    0.0
                } else {
                    hits as f64 / self.samples as f64
                };
                (k, acc)
            })
            .collect()
    }

    /// Mean captured weight share per K over weighted samples
    pub fn soft_accuracy(&self) -> BTreeMap<usize, f64> {
        self.ks
            .iter()
            .zip(&self.captured)
            .map(|(&k, shares)| {
                let mean = if shares.is_empty() {
                    0.0
                } else {
                    shares.iter().sum::<f64>() / shares.len() as f64
                };
                (k, mean)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(v: &[f64]) -> ProbabilityVector {
        ProbabilityVector::new(v.to_vec()).unwrap()
    }

    fn target(v: &[f64]) -> TargetVector {
        TargetVector::new(v.to_vec()).unwrap()
    }

    #[test]
    fn test_hits_by_rank() {
        let mut acc = TopKAccumulator::new(&[1, 3]).unwrap();
        // positive ranked second
        acc.record(&probs(&[0.9, 0.5, 0.1, 0.05]), &target(&[0.0, 1.0, 0.0, 0.0]))
            .unwrap();
        // positive ranked first
        acc.record(&probs(&[0.2, 0.1, 0.3, 0.05]), &target(&[0.0, 0.0, 1.0, 0.0]))
            .unwrap();
        // no positive label: counted as a miss
        acc.record(&probs(&[0.2, 0.1, 0.3, 0.05]), &target(&[0.0; 4]))
            .unwrap();

        let a = acc.accuracy();
        assert!((a[&1] - 1.0 / 3.0).abs() < 1e-12);
        assert!((a[&3] - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_k_larger_than_catalog() {
        let mut acc = TopKAccumulator::new(&[5]).unwrap();
        acc.record(&probs(&[0.1, 0.2]), &target(&[1.0, 0.0])).unwrap();
        assert_eq!(acc.accuracy()[&5], 1.0);
    }

    #[test]
    fn test_soft_top_k_uses_fractional_weights() {
        let mut acc = TopKAccumulator::new(&[1, 2]).unwrap();
        // labelers split 0.5 / 0.25 / 0.25
        acc.record(&probs(&[0.7, 0.1, 0.6]), &target(&[0.5, 0.25, 0.25]))
            .unwrap();
        // unlabeled sample: excluded from the soft mean
        acc.record(&probs(&[0.7, 0.1, 0.6]), &target(&[0.0, 0.0, 0.0]))
            .unwrap();

        let soft = acc.soft_accuracy();
        assert!((soft[&1] - 0.5).abs() < 1e-12);
        assert!((soft[&2] - 0.75).abs() < 1e-12);
        // the 0.25 weights are below the agreement threshold
        assert_eq!(acc.accuracy()[&1], 0.5);
        assert_eq!(acc.accuracy()[&2], 0.5);
    }

    #[test]
    fn test_merge_matches_sequential() {
        let samples: Vec<(ProbabilityVector, TargetVector)> = (0..10)
            .map(|i| {
                let p = probs(&[0.1 * (i % 3) as f64, 0.35, 0.2 + 0.05 * i as f64]);
                let t = target(&[(i % 2) as f64, 0.3, 0.7]);
                (p, t)
            })
            .collect();

        let mut whole = TopKAccumulator::new(&DEFAULT_TOP_K).unwrap();
        for (p, t) in &samples {
            whole.record(p, t).unwrap();
        }

        let mut left = TopKAccumulator::new(&DEFAULT_TOP_K).unwrap();
        let mut right = left.clone();
        for (p, t) in &samples[..4] {
            left.record(p, t).unwrap();
        }
        for (p, t) in &samples[4..] {
            right.record(p, t).unwrap();
        }
        left.merge(&right).unwrap();

        assert_eq!(left, whole);
        assert!(left.merge(&TopKAccumulator::new(&[1]).unwrap()).is_err());
    }

    #[test]
    fn test_rejects_zero_k() {
        assert!(TopKAccumulator::new(&[0, 1]).is_err());
        assert_eq!(TopKAccumulator::new(&[5, 1, 1]).unwrap().ks(), &[1, 5]);
    }
}
