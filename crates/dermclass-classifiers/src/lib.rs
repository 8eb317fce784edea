//! dermclass Classifiers
//!
//! The inference side of dermclass: a model contract that maps a decoded
//! image to one raw score per class, and a predictor that calibrates those
//! scores, applies a decision policy, and builds a ranked label list.
//!
//! With the `ml-models` feature (on by default) a Candle linear head can be
//! loaded straight from a verified checkpoint.

pub mod image;
pub mod model;
pub mod model_config;
pub mod predictor;

#[cfg(feature = "ml-models")]
pub mod linear_head;
#[cfg(feature = "ml-models")]
pub mod loader;

pub use image::ImageTensor;
pub use model::ScoreModel;
pub use model_config::{InferenceConfig, InputShape, ModelConfig, ModelRegistry};
pub use predictor::{Prediction, Predictor, RankedLabel};

#[cfg(feature = "ml-models")]
pub use linear_head::{create_device, LinearHead};
#[cfg(feature = "ml-models")]
pub use loader::{load_from_registry, load_predictor};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::image::ImageTensor;
    pub use crate::model::ScoreModel;
    pub use crate::model_config::{InferenceConfig, ModelRegistry};
    pub use crate::predictor::{Prediction, Predictor};
}
