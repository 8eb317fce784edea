//! Decoded image input

use dermclass_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A decoded, fixed-size pixel tensor in channel-major (CHW) order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    channels: usize,
    height: usize,
    width: usize,
    data: Vec<f32>,
}

impl ImageTensor {
    pub fn new(channels: usize, height: usize, width: usize, data: Vec<f32>) -> Result<Self> {
        if channels == 0 || height == 0 || width == 0 {
            return Err(Error::invalid(format!(
                "image dimensions must be positive, got {channels}x{height}x{width}"
            )));
        }
        let expected = channels * height * width;
        if data.len() != expected {
            return Err(Error::dimension("image pixel data", expected, data.len()));
        }
        if let Some(pos) = data.iter().position(|v| !v.is_finite()) {
            return Err(Error::invalid(format!("non-finite pixel value at offset {pos}")));
        }
        Ok(Self {
            channels,
            height,
            width,
            data,
        })
    }

    /// A constant-valued image
    pub fn filled(channels: usize, height: usize, width: usize, value: f32) -> Result<Self> {
        Self::new(channels, height, width, vec![value; channels * height * width])
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    /// Number of flattened features
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// Fail unless the image has the given shape
    pub fn ensure_shape(&self, shape: (usize, usize, usize)) -> Result<()> {
        if self.shape() != shape {
            return Err(Error::invalid(format!(
                "expected a {}x{}x{} image, got {}x{}x{}",
                shape.0, shape.1, shape.2, self.channels, self.height, self.width
            )));
        }
        Ok(())
    }
}
