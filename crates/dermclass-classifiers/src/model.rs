//! Classification model contract

use crate::image::ImageTensor;
use async_trait::async_trait;
use dermclass_core::{ClassCatalog, Result, ScoreVector};
use std::sync::Arc;

/// A model that maps an image to one raw score per catalog class
#[async_trait]
pub trait ScoreModel: Send + Sync {
    /// Raw (uncalibrated) per-class scores
    async fn scores(&self, image: &ImageTensor) -> Result<ScoreVector>;

    /// Catalog the scores are aligned to
    fn catalog(&self) -> Arc<ClassCatalog>;

    /// Model name
    fn name(&self) -> &str;
}
