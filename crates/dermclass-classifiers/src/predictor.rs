//! Ranked inference
//!
//! Scores an image, calibrates the scores, and returns both the decided label
//! set and a ranked `(label, confidence)` list for display. The ranked list
//! keeps the top-K labels at or above `min_confidence` and always holds at
//! least one entry: when nothing clears the bar, the single best label is
//! returned and marked low-confidence.

use crate::image::ImageTensor;
use crate::model::ScoreModel;
use crate::model_config::InferenceConfig;
use dermclass_core::{Calibration, PredictionSet, ProbabilityVector, Result};
use dermclass_policy::{DecisionEngine, ThresholdPolicy};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// One entry of the ranked display list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedLabel {
    pub index: usize,
    pub label: String,
    pub confidence: f64,
    pub low_confidence: bool,
}

/// Result of predicting one image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Highest-probability labels, best first; never empty
    pub ranked: Vec<RankedLabel>,

    /// Whether the best label falls below the low-confidence bar
    pub low_confidence: bool,

    /// Labels selected by the decision policy
    pub labels: PredictionSet,
    pub label_names: Vec<String>,

    /// Calibrated probability for every class
    pub probabilities: ProbabilityVector,

    pub model: String,

    /// Latency in microseconds
    pub latency_us: u64,
}

/// Model, calibration, and decision policy bound together
pub struct Predictor {
    model: Arc<dyn ScoreModel>,
    calibration: Calibration,
    engine: DecisionEngine,
    config: InferenceConfig,
}

impl Predictor {
    /// `calibration` is normally the checkpoint's; `config.temperature`
    /// overrides it when set.
    pub fn new(
        model: Arc<dyn ScoreModel>,
        policy: ThresholdPolicy,
        calibration: Calibration,
        config: InferenceConfig,
    ) -> Result<Self> {
        config.validate()?;
        let calibration = config.calibration(calibration)?;
        let engine = DecisionEngine::new(model.catalog(), policy)?;
        Ok(Self {
            model,
            calibration,
            engine,
            config,
        })
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub async fn predict(&self, image: &ImageTensor) -> Result<Prediction> {
        let start = Instant::now();
        let catalog = self.engine.catalog();

        let scores = self.model.scores(image).await?;
        scores.ensure_len(catalog)?;
        let probabilities = self.calibration.calibrate(&scores);
        let labels = self.engine.decide(&probabilities)?;

        let p = probabilities.as_slice();
        let entry = |c: usize| RankedLabel {
            index: c,
            label: catalog.name(c).unwrap_or_default().to_string(),
            confidence: p[c],
            low_confidence: p[c] < self.config.low_confidence_below,
        };
        let top = probabilities.top_k(self.config.top_k);
        let mut ranked: Vec<RankedLabel> = top
            .iter()
            .copied()
            .filter(|&c| p[c] >= self.config.min_confidence)
            .map(entry)
            .collect();
        if ranked.is_empty() {
            if let Some(&best) = top.first() {
                ranked.push(RankedLabel {
                    low_confidence: true,
                    ..entry(best)
                });
            }
        }
        let low_confidence = ranked.first().map_or(true, |r| r.low_confidence);

        let latency_us = start.elapsed().as_micros() as u64;
        debug!(
            model = self.model.name(),
            labels = labels.len(),
            best = ranked.first().map(|r| r.label.as_str()),
            low_confidence,
            latency_us,
            "Predicted image"
        );

        Ok(Prediction {
            ranked,
            low_confidence,
            label_names: labels.names(catalog).into_iter().map(String::from).collect(),
            labels,
            probabilities,
            model: self.model.name().to_string(),
            latency_us,
        })
    }

    /// Predict several images concurrently; results keep input order
    pub async fn predict_batch(&self, images: &[ImageTensor]) -> Result<Vec<Prediction>> {
        let concurrency = match self.config.concurrency {
            0 => num_cpus::get(),
            n => n,
        };
        stream::iter(images)
            .map(|image| self.predict(image))
            .buffered(concurrency)
            .try_collect()
            .await
    }
}

impl std::fmt::Debug for Predictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Predictor")
            .field("model", &self.model.name())
            .field("calibration", &self.calibration)
            .field("engine", &self.engine)
            .field("config", &self.config)
            .finish()
    }
}
