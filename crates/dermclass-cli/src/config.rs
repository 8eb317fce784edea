//! CLI configuration

use dermclass_core::Calibration;
use dermclass_eval::EvalConfig;
use dermclass_policy::FitConfig;
use dermclass_training::{ClassWeightConfig, LossConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings shared by every subcommand; every section is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DermclassConfig {
    #[serde(default)]
    pub loss: LossConfig,

    #[serde(default)]
    pub class_weights: ClassWeightConfig,

    /// Used when no checkpoint supplies its own calibration
    #[serde(default)]
    pub calibration: Calibration,

    #[serde(default)]
    pub evaluation: EvalConfig,

    #[serde(default)]
    pub fitting: FitConfig,
}

impl DermclassConfig {
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or use defaults when the file does not exist
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file; using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.loss.validate()?;
        self.class_weights.validate()?;
        self.calibration.validate()?;
        if !(0.0..=1.0).contains(&self.fitting.fallback_threshold) {
            anyhow::bail!(
                "fitting.fallback_threshold must lie in [0, 1], got {}",
                self.fitting.fallback_threshold
            );
        }
        Ok(())
    }
}
