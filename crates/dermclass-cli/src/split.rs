//! Scored split files
//!
//! A scored split is a JSON document holding, per sample, the raw model
//! scores in catalog order and the labeler-weighted ground truth:
//!
//! ```json
//! { "samples": [ { "id": "case-1", "scores": [1.2, -0.4], "labels": { "eczema": 0.67 } } ] }
//! ```

use anyhow::Context;
use dermclass_core::{
    Calibration, ClassCatalog, ProbabilityVector, ScoreVector, SupportCounts, TargetVector,
    UnknownLabel,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredSample {
    pub id: String,
    pub scores: Vec<f32>,
    #[serde(default)]
    pub labels: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoredSplit {
    pub samples: Vec<ScoredSample>,
}

impl ScoredSplit {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading scored split {}", path.display()))?;
        let split: Self = serde_json::from_str(&content)
            .with_context(|| format!("parsing scored split {}", path.display()))?;
        tracing::debug!(path = %path.display(), samples = split.len(), "Loaded scored split");
        Ok(split)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        dermclass_core::artifact::write_json(path.as_ref(), self)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Raw scores, each checked against the catalog size
    pub fn scores(&self, catalog: &ClassCatalog) -> anyhow::Result<Vec<ScoreVector>> {
        self.samples
            .iter()
            .map(|s| {
                let scores = ScoreVector::new(s.scores.clone())?;
                scores
                    .ensure_len(catalog)
                    .with_context(|| format!("sample '{}'", s.id))?;
                Ok(scores)
            })
            .collect()
    }

    pub fn probabilities(
        &self,
        catalog: &ClassCatalog,
        calibration: &Calibration,
    ) -> anyhow::Result<Vec<ProbabilityVector>> {
        Ok(calibration.calibrate_batch(&self.scores(catalog)?))
    }

    pub fn targets(
        &self,
        catalog: &ClassCatalog,
        unknown: UnknownLabel,
    ) -> anyhow::Result<Vec<TargetVector>> {
        self.samples
            .iter()
            .map(|s| {
                let labels = s.labels.iter().map(|(name, &w)| (name.as_str(), w));
                TargetVector::from_weighted_labels(catalog, labels, unknown)
                    .with_context(|| format!("sample '{}'", s.id))
            })
            .collect()
    }

    pub fn support(
        &self,
        catalog: &ClassCatalog,
        unknown: UnknownLabel,
    ) -> anyhow::Result<SupportCounts> {
        Ok(SupportCounts::from_targets(
            catalog,
            &self.targets(catalog, unknown)?,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split() -> ScoredSplit {
        serde_json::from_str(
            r#"{ "samples": [
                { "id": "a", "scores": [2.0, -2.0], "labels": { "eczema": 1.0 } },
                { "id": "b", "scores": [-1.0, 0.5], "labels": { "acne": 0.67, "eczema": 0.33 } },
                { "id": "c", "scores": [0.0, 0.0] }
            ] }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_targets_and_support() {
        let catalog = ClassCatalog::new(["eczema", "acne"]).unwrap();
        let split = split();
        let targets = split.targets(&catalog, UnknownLabel::Reject).unwrap();
        assert_eq!(targets[1].as_slice(), &[0.33, 0.67]);
        assert_eq!(targets[2].as_slice(), &[0.0, 0.0]);

        let support = split.support(&catalog, UnknownLabel::Reject).unwrap();
        assert_eq!(support.as_slice(), &[1, 1]);
    }

    #[test]
    fn test_unknown_labels() {
        let catalog = ClassCatalog::new(["eczema", "acne", "tinea"]).unwrap();
        let mut split = split();
        split.samples[0].scores.push(0.0);
        split.samples[0].labels.insert("vitiligo".to_string(), 1.0);
        assert!(split.targets(&catalog, UnknownLabel::Reject).is_err());
        assert!(split.targets(&catalog, UnknownLabel::Skip).is_ok());
    }

    #[test]
    fn test_score_length_checked() {
        let catalog = ClassCatalog::new(["eczema", "acne", "tinea"]).unwrap();
        let err = split().scores(&catalog).unwrap_err();
        assert!(format!("{err:#}").contains("sample 'a'"));
    }

    #[test]
    fn test_probabilities_calibrated() {
        let catalog = ClassCatalog::new(["eczema", "acne"]).unwrap();
        let probs = split().probabilities(&catalog, &Calibration::default()).unwrap();
        assert_eq!(probs[2].as_slice(), &[0.5, 0.5]);
        assert!(probs[0].as_slice()[0] > 0.88);
    }
}
