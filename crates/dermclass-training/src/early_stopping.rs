//! Early stopping on validation loss

use dermclass_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

/// Early stopping settings
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    /// Epochs without improvement before stopping
    #[serde(default = "default_patience")]
    pub patience: usize,

    /// Minimum decrease in validation loss that counts as improvement
    #[serde(default)]
    pub min_delta: f64,
}

fn default_patience() -> usize {
    10
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            patience: default_patience(),
            min_delta: 0.0,
        }
    }
}

/// Outcome of observing one epoch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StopDecision {
    /// New best validation loss; the caller should checkpoint
    Improved,
    /// No improvement yet, still within patience
    Continue { epochs_without_improvement: usize },
    /// Patience exhausted
    Stop { best_epoch: u64, best_loss: f64 },
}

/// Tracks the best validation loss across epochs
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    config: EarlyStoppingConfig,
    best: Option<(u64, f64)>,
    epochs_without_improvement: usize,
}

impl EarlyStopping {
    pub fn new(config: EarlyStoppingConfig) -> Result<Self> {
        if !config.min_delta.is_finite() || config.min_delta < 0.0 {
            return Err(Error::config(format!(
                "min_delta must be finite and >= 0, got {}",
                config.min_delta
            )));
        }
        Ok(Self {
            config,
            best: None,
            epochs_without_improvement: 0,
        })
    }

    /// Record an epoch's validation loss
    pub fn observe(&mut self, epoch: u64, val_loss: f64) -> Result<StopDecision> {
        if !val_loss.is_finite() {
            return Err(Error::invalid(format!(
                "validation loss at epoch {epoch} is not finite"
            )));
        }

        let improved = match self.best {
            None => true,
            Some((_, best)) => val_loss < best - self.config.min_delta,
        };

        if improved {
            self.best = Some((epoch, val_loss));
            self.epochs_without_improvement = 0;
            return Ok(StopDecision::Improved);
        }

        self.epochs_without_improvement += 1;
        if self.epochs_without_improvement >= self.config.patience {
            let (best_epoch, best_loss) = self.best.unwrap_or((epoch, val_loss));
            info!(
                best_epoch,
                best_loss,
                patience = self.config.patience,
                "Early stopping"
            );
            return Ok(StopDecision::Stop {
                best_epoch,
                best_loss,
            });
        }

        Ok(StopDecision::Continue {
            epochs_without_improvement: self.epochs_without_improvement,
        })
    }

    /// Best (epoch, loss) seen so far
    pub fn best(&self) -> Option<(u64, f64)> {
        self.best
    }
}

/// Per-epoch training record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    pub epoch: u64,
    pub train_loss: f64,
    pub val_loss: f64,
    /// Validation Top-K accuracy keyed by K
    #[serde(default)]
    pub top_k: BTreeMap<usize, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<f64>,
}
