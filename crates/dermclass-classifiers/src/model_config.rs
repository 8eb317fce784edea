//! Model configuration and registry structures

use dermclass_core::{Calibration, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Model registry containing all available models
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRegistry {
    pub version: String,
    pub models: BTreeMap<String, ModelConfig>,
}

/// Configuration for a single model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model name
    #[serde(default)]
    pub name: String,

    /// Model description
    #[serde(default)]
    pub description: String,

    /// Checkpoint directory (weights, catalog, manifest)
    pub checkpoint: PathBuf,

    /// Threshold file fitted for this checkpoint
    #[serde(default)]
    pub thresholds: Option<PathBuf>,

    /// Global threshold to serve with when no threshold file is configured.
    /// Leaving both unset is a configuration error.
    #[serde(default)]
    pub default_threshold: Option<f64>,

    /// Expected input image shape
    #[serde(default)]
    pub input: InputShape,

    /// Inference settings
    #[serde(default)]
    pub inference: InferenceConfig,
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        self.inference.validate()?;
        if let Some(t) = self.default_threshold {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::config(format!(
                    "default_threshold must lie in [0, 1], got {t}"
                )));
            }
        }
        Ok(())
    }
}

/// Decoded image shape the classification head expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputShape {
    #[serde(default = "default_channels")]
    pub channels: usize,
    #[serde(default = "default_image_size")]
    pub height: usize,
    #[serde(default = "default_image_size")]
    pub width: usize,
}

fn default_channels() -> usize {
    3
}

fn default_image_size() -> usize {
    224
}

impl Default for InputShape {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            height: default_image_size(),
            width: default_image_size(),
        }
    }
}

impl InputShape {
    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    /// Flattened feature count
    pub fn features(&self) -> usize {
        self.channels * self.height * self.width
    }
}

/// Inference configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceConfig {
    /// Device to run on (cpu, cuda, cuda:N, metal, metal:N)
    #[serde(default = "default_device")]
    pub device: String,

    /// Overrides the checkpoint's calibration temperature when set
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Ranked labels returned per image
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Ranked labels below this probability are dropped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,

    /// Ranked labels below this probability are marked low-confidence
    #[serde(default = "default_low_confidence_below")]
    pub low_confidence_below: f64,

    /// Images scored concurrently by `predict_batch` (0 = number of CPUs)
    #[serde(default)]
    pub concurrency: usize,
}

fn default_device() -> String {
    "cpu".to_string()
}

fn default_top_k() -> usize {
    5
}

fn default_min_confidence() -> f64 {
    0.15
}

fn default_low_confidence_below() -> f64 {
    0.25
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: default_device(),
            temperature: None,
            top_k: default_top_k(),
            min_confidence: default_min_confidence(),
            low_confidence_below: default_low_confidence_below(),
            concurrency: 0,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(Error::config("inference top_k must be >= 1"));
        }
        for (what, v) in [
            ("min_confidence", self.min_confidence),
            ("low_confidence_below", self.low_confidence_below),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(Error::config(format!("{what} must lie in [0, 1], got {v}")));
            }
        }
        if let Some(t) = self.temperature {
            Calibration::new(t)?;
        }
        Ok(())
    }

    /// The calibration to use given the checkpoint's own
    pub fn calibration(&self, checkpoint: Calibration) -> Result<Calibration> {
        match self.temperature {
            Some(t) => Calibration::new(t),
            None => Ok(checkpoint),
        }
    }
}

impl ModelRegistry {
    /// Load model registry from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let registry: ModelRegistry = serde_yaml::from_str(yaml)?;
        for (name, model) in &registry.models {
            model
                .validate()
                .map_err(|e| Error::config(format!("model '{name}': {e}")))?;
        }
        Ok(registry)
    }

    /// Load model registry from YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Get a model configuration by name
    pub fn get_model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.get(name)
    }

    /// Get a model configuration by name, failing when unknown
    pub fn require_model(&self, name: &str) -> Result<&ModelConfig> {
        self.get_model(name)
            .ok_or_else(|| Error::config(format!("unknown model '{name}'")))
    }
}
