//! Build predictors from registry entries
//!
//! A registry entry names a checkpoint directory and either a threshold file
//! or an explicit `default_threshold`. The checkpoint is loaded and verified
//! as one unit, and the threshold file must belong to that exact checkpoint
//! and catalog.

use crate::linear_head::{create_device, LinearHead};
use crate::model_config::{ModelConfig, ModelRegistry};
use crate::predictor::Predictor;
use dermclass_core::{Error, Result};
use dermclass_policy::{ThresholdFile, ThresholdPolicy};
use dermclass_training::Checkpoint;
use std::sync::Arc;
use tracing::{info, warn};

/// Load the checkpoint, head, and thresholds for one model
pub fn load_predictor(config: &ModelConfig) -> Result<Predictor> {
    let checkpoint = Checkpoint::load(&config.checkpoint)?;

    let policy = match &config.thresholds {
        Some(path) => {
            ThresholdFile::load_for(path, &checkpoint.manifest, &checkpoint.catalog)?.policy
        }
        None => match config.default_threshold {
            Some(threshold) => {
                warn!(
                    model = %config.name,
                    threshold,
                    "No threshold file configured; serving with the configured global threshold"
                );
                ThresholdPolicy::global(threshold)?
            }
            None => {
                return Err(Error::config(format!(
                    "model '{}' has neither a threshold file nor a default_threshold",
                    config.name
                )))
            }
        },
    };

    let device = create_device(&config.inference.device)?;
    let head = LinearHead::from_checkpoint(&checkpoint, config.input.as_tuple(), device)?;
    let predictor = Predictor::new(
        Arc::new(head),
        policy,
        checkpoint.manifest.calibration,
        config.inference.clone(),
    )?;

    info!(
        model = %config.name,
        checkpoint_id = %checkpoint.id(),
        classes = checkpoint.catalog.len(),
        "Predictor ready"
    );
    Ok(predictor)
}

/// Load a named model from a registry
pub fn load_from_registry(registry: &ModelRegistry, name: &str) -> Result<Predictor> {
    load_predictor(registry.require_model(name)?)
}
