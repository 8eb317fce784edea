//! dermclass Training
//!
//! Training-side building blocks for imbalanced multi-label classification:
//!
//! - **Class weights**: uniform, inverse-frequency, or explicit `pos_weight`
//!   with an explicit cap
//! - **Loss**: weighted BCE, focal, and asymmetric variants with analytic
//!   gradients w.r.t. raw scores
//! - **Batch loading**: tokio producer/consumer with seeded shuffling
//! - **Reduction**: sample-weighted gradient all-reduce across replicas
//! - **Checkpoints**: weights, catalog, and hyper-parameters loaded as one unit
//! - **Early stopping** on validation loss
//!
//! # Example
//!
//! ```
//! use dermclass_core::{ScoreVector, TargetVector};
//! use dermclass_training::{ClassWeights, ImbalanceLoss, LossConfig};
//!
//! let loss = ImbalanceLoss::new(LossConfig::focal(0.25, 2.0)).unwrap();
//! let scores = vec![ScoreVector::new(vec![1.5, -2.0]).unwrap()];
//! let targets = vec![TargetVector::new(vec![1.0, 0.0]).unwrap()];
//! let out = loss.compute(&scores, &targets, &ClassWeights::uniform(2)).unwrap();
//! assert!(out.value > 0.0);
//! ```

pub mod checkpoint;
pub mod early_stopping;
pub mod loader;
pub mod loss;
pub mod reduce;
pub mod weights;

pub use checkpoint::{Checkpoint, CheckpointManifest};
pub use early_stopping::{EarlyStopping, EarlyStoppingConfig, EpochStats, StopDecision};
pub use loader::{Batch, BatchLoader, EpochBatches, LoaderConfig, SampleSource};
pub use loss::{ImbalanceLoss, LossConfig, LossKind, LossOutput, Reduction};
pub use reduce::{
    reduce_gradients, reduce_loss_shards, GradientShard, LossShard, Replica, ReplicaGroup,
};
pub use weights::{ClassWeightConfig, ClassWeights, WeightScheme};
