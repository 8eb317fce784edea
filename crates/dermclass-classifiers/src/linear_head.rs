//! Candle linear classification head
//!
//! Scores a decoded image with a single linear layer over its flattened
//! pixels. The weights come from a safetensors blob holding
//! `classifier.weight` `[C, F]` and `classifier.bias` `[C]`, with
//! `F = channels * height * width`.

use crate::image::ImageTensor;
use crate::model::ScoreModel;
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use dermclass_core::{ClassCatalog, Error, Result, ScoreVector};
use dermclass_training::Checkpoint;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

const HEAD_PREFIX: &str = "classifier";

fn model_err(what: &str) -> impl FnOnce(candle_core::Error) -> Error + '_ {
    move |e| Error::model(format!("{what}: {e}"))
}

/// Parse a device string: `cpu`, `cuda`, `cuda:N`, `metal`, `metal:N`
pub fn create_device(spec: &str) -> Result<Device> {
    let (kind, index) = match spec.split_once(':') {
        Some((kind, index)) => {
            let index = index
                .parse::<usize>()
                .map_err(|_| Error::config(format!("invalid device index in '{spec}'")))?;
            (kind, index)
        }
        None => (spec, 0),
    };
    match kind {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(index).map_err(model_err("Failed to initialize CUDA")),
        "metal" | "mps" => Device::new_metal(index).map_err(model_err("Failed to initialize Metal")),
        other => Err(Error::config(format!("unknown device '{other}'"))),
    }
}

pub struct LinearHead {
    name: String,
    catalog: Arc<ClassCatalog>,
    input_shape: (usize, usize, usize),
    linear: Linear,
    device: Device,
}

impl LinearHead {
    fn from_var_builder(
        name: String,
        vb: VarBuilder,
        catalog: Arc<ClassCatalog>,
        input_shape: (usize, usize, usize),
        device: Device,
    ) -> Result<Self> {
        let features = input_shape.0 * input_shape.1 * input_shape.2;
        if features == 0 {
            return Err(Error::config("input shape must be non-empty"));
        }
        let linear = candle_nn::linear(features, catalog.len(), vb.pp(HEAD_PREFIX))
            .map_err(model_err("Failed to load classification head"))?;
        info!(
            model = %name,
            classes = catalog.len(),
            features,
            "Loaded linear classification head"
        );
        Ok(Self {
            name,
            catalog,
            input_shape,
            linear,
            device,
        })
    }

    /// Load head weights from a safetensors file
    pub fn load(
        path: impl AsRef<Path>,
        catalog: Arc<ClassCatalog>,
        input_shape: (usize, usize, usize),
        device: Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("linear-head")
            .to_string();
        let vb = VarBuilder::from_buffered_safetensors(bytes, DType::F32, &device)
            .map_err(model_err("Failed to read safetensors"))?;
        Self::from_var_builder(name, vb, catalog, input_shape, device)
    }

    /// Build the head from a verified checkpoint's weight blob
    pub fn from_checkpoint(
        checkpoint: &Checkpoint,
        input_shape: (usize, usize, usize),
        device: Device,
    ) -> Result<Self> {
        let vb = VarBuilder::from_buffered_safetensors(
            checkpoint.weights.clone(),
            DType::F32,
            &device,
        )
        .map_err(model_err("Failed to read checkpoint weights"))?;
        Self::from_var_builder(
            checkpoint.id().to_string(),
            vb,
            Arc::new(checkpoint.catalog.clone()),
            input_shape,
            device,
        )
    }

    pub fn input_shape(&self) -> (usize, usize, usize) {
        self.input_shape
    }

    fn forward(&self, image: &ImageTensor) -> Result<Vec<f32>> {
        image.ensure_shape(self.input_shape)?;
        let input = Tensor::from_slice(image.as_slice(), (1, image.len()), &self.device)
            .map_err(model_err("Failed to create input tensor"))?;
        let output = self
            .linear
            .forward(&input)
            .map_err(model_err("Forward pass failed"))?;
        output
            .squeeze(0)
            .and_then(|t| t.to_dtype(DType::F32))
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(model_err("Failed to read scores"))
    }
}

#[async_trait]
impl ScoreModel for LinearHead {
    async fn scores(&self, image: &ImageTensor) -> Result<ScoreVector> {
        ScoreVector::new(self.forward(image)?)
    }

    fn catalog(&self) -> Arc<ClassCatalog> {
        self.catalog.clone()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Two classes over a 1x1x3 image
    fn write_head(path: &Path) {
        let device = Device::Cpu;
        let weight = Tensor::new(&[[1.0f32, 0.0, 0.0], [0.0, 1.0, -1.0]], &device).unwrap();
        let bias = Tensor::new(&[0.5f32, 0.0], &device).unwrap();
        let tensors = HashMap::from([
            ("classifier.weight".to_string(), weight),
            ("classifier.bias".to_string(), bias),
        ]);
        candle_core::safetensors::save(&tensors, path).unwrap();
    }

    #[tokio::test]
    async fn test_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.safetensors");
        write_head(&path);

        let catalog = Arc::new(ClassCatalog::new(["acne", "eczema"]).unwrap());
        let head = LinearHead::load(&path, catalog, (1, 1, 3), Device::Cpu).unwrap();
        assert_eq!(head.name(), "head");

        let image = ImageTensor::new(1, 1, 3, vec![2.0, 3.0, 1.0]).unwrap();
        let scores = head.scores(&image).await.unwrap();
        assert_eq!(scores.as_slice(), &[2.5, 2.0]);

        let wrong = ImageTensor::filled(3, 1, 1, 0.0).unwrap();
        assert!(head.scores(&wrong).await.is_err());
    }

    #[test]
    fn test_shape_mismatch_with_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("head.safetensors");
        write_head(&path);

        let three = Arc::new(ClassCatalog::new(["a", "b", "c"]).unwrap());
        assert!(LinearHead::load(&path, three, (1, 1, 3), Device::Cpu).is_err());
    }

    #[test]
    fn test_device_strings() {
        assert!(matches!(create_device("cpu"), Ok(Device::Cpu)));
        assert!(create_device("tpu").is_err());
        assert!(create_device("cuda:x").is_err());
    }
}
