//! Loading a predictor from a checkpoint directory and threshold file.
//! Requires the `ml-models` feature.

#![cfg(feature = "ml-models")]

use candle_core::{Device, Tensor};
use dermclass_classifiers::{load_from_registry, ImageTensor, ModelRegistry};
use dermclass_core::{Calibration, ClassCatalog};
use dermclass_policy::{ThresholdFile, ThresholdPolicy};
use dermclass_training::{Checkpoint, ClassWeights, LossConfig};
use std::collections::HashMap;
use std::path::Path;

/// Head over a 1x1x2 image: class 0 follows pixel 0, class 1 follows pixel 1
fn head_weights(dir: &Path) -> Vec<u8> {
    let device = Device::Cpu;
    let tensors = HashMap::from([
        (
            "classifier.weight".to_string(),
            Tensor::new(&[[4.0f32, 0.0], [0.0, 4.0]], &device).unwrap(),
        ),
        (
            "classifier.bias".to_string(),
            Tensor::new(&[-2.0f32, -2.0], &device).unwrap(),
        ),
    ]);
    let path = dir.join("head.safetensors");
    candle_core::safetensors::save(&tensors, &path).unwrap();
    std::fs::read(path).unwrap()
}

fn registry_yaml(dir: &Path, thresholds: Option<&Path>, default_threshold: Option<f64>) -> String {
    let mut thresholds = thresholds
        .map(|p| format!("    thresholds: \"{}\"\n", p.display()))
        .unwrap_or_default();
    if let Some(t) = default_threshold {
        thresholds.push_str(&format!("    default_threshold: {t}\n"));
    }
    format!(
        r#"
version: "1.0"
models:
  head:
    name: "tiny-head"
    checkpoint: "{}"
{thresholds}    input:
      channels: 1
      height: 1
      width: 2
    inference:
      device: "cpu"
      top_k: 2
"#,
        dir.join("ckpt").display()
    )
}

fn save_checkpoint(dir: &Path) -> Checkpoint {
    let catalog = ClassCatalog::new(["eczema", "psoriasis"]).unwrap();
    let checkpoint = Checkpoint::new(
        catalog,
        head_weights(dir),
        LossConfig::focal(0.25, 2.0),
        ClassWeights::uniform(2),
        Calibration::default(),
    )
    .unwrap();
    checkpoint.save(dir.join("ckpt")).unwrap();
    checkpoint
}

#[tokio::test]
async fn test_predict_from_checkpoint_with_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let checkpoint = save_checkpoint(dir.path());

    // eczema scores sigmoid(4 * 0.4 - 2) = 0.40 on the test image
    let thresholds = dir.path().join("thresholds.json");
    ThresholdFile::new(
        &checkpoint.manifest,
        &checkpoint.catalog,
        ThresholdPolicy::per_class(vec![0.35, 0.9]).unwrap(),
    )
    .unwrap()
    .save(&thresholds)
    .unwrap();

    let registry =
        ModelRegistry::from_yaml(&registry_yaml(dir.path(), Some(&thresholds), None)).unwrap();
    let predictor = load_from_registry(&registry, "head").unwrap();

    let image = ImageTensor::new(1, 1, 2, vec![0.4, 0.9]).unwrap();
    let prediction = predictor.predict(&image).await.unwrap();
    assert_eq!(prediction.label_names, vec!["eczema"]);
    assert_eq!(prediction.ranked[0].label, "psoriasis");
    assert_eq!(prediction.ranked.len(), 2);
}

#[tokio::test]
async fn test_configured_default_threshold_without_file() {
    let dir = tempfile::tempdir().unwrap();
    save_checkpoint(dir.path());

    let registry = ModelRegistry::from_yaml(&registry_yaml(dir.path(), None, Some(0.5))).unwrap();
    let predictor = load_from_registry(&registry, "head").unwrap();

    let image = ImageTensor::new(1, 1, 2, vec![0.4, 0.9]).unwrap();
    let prediction = predictor.predict(&image).await.unwrap();
    assert_eq!(prediction.label_names, vec!["psoriasis"]);
}

#[test]
fn test_missing_thresholds_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    save_checkpoint(dir.path());

    let registry = ModelRegistry::from_yaml(&registry_yaml(dir.path(), None, None)).unwrap();
    let err = load_from_registry(&registry, "head").unwrap_err();
    assert!(err.to_string().contains("default_threshold"));
}

#[test]
fn test_threshold_file_from_other_checkpoint_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let _current = save_checkpoint(dir.path());

    // thresholds fitted for an earlier checkpoint with the same catalog
    let earlier_dir = tempfile::tempdir().unwrap();
    let earlier = save_checkpoint(earlier_dir.path());
    let thresholds = dir.path().join("thresholds.json");
    ThresholdFile::new(&earlier.manifest, &earlier.catalog, ThresholdPolicy::default())
        .unwrap()
        .save(&thresholds)
        .unwrap();

    let registry =
        ModelRegistry::from_yaml(&registry_yaml(dir.path(), Some(&thresholds), None)).unwrap();
    let err = load_from_registry(&registry, "head").unwrap_err();
    assert!(err.is_version_mismatch());
    assert!(load_from_registry(&registry, "missing").is_err());
}
