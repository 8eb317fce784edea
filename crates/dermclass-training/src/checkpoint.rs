//! Version-locked model checkpoints
//!
//! A checkpoint directory holds three files written as one unit:
//!
//! ```text
//! <dir>/model.safetensors   opaque weight blob
//! <dir>/catalog.json        class catalog the weights were trained against
//! <dir>/manifest.json       ids, digests, hyper-parameters (written last)
//! ```
//!
//! Loading verifies that the catalog fingerprint and the weight digest match
//! the manifest, so weights can never be paired with the wrong label space.

use crate::loss::LossConfig;
use crate::weights::ClassWeights;
use chrono::{DateTime, Utc};
use dermclass_core::artifact::{read_json, sha256_hex, write_atomic, write_json};
use dermclass_core::{Calibration, ClassCatalog, Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;
use uuid::Uuid;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const CATALOG_FILE: &str = "catalog.json";
pub const WEIGHTS_FILE: &str = "model.safetensors";

/// Checkpoint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub checkpoint_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub catalog_fingerprint: String,
    pub num_classes: usize,
    pub loss: LossConfig,
    pub class_weights: ClassWeights,
    #[serde(default)]
    pub calibration: Calibration,
    pub weights_file: String,
    pub weights_sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_val_loss: Option<f64>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl CheckpointManifest {
    /// Read only the manifest of a checkpoint directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        read_json(&dir.as_ref().join(MANIFEST_FILE))
    }

    /// Fail unless `catalog` is the catalog this checkpoint was trained against
    pub fn ensure_catalog(&self, catalog: &ClassCatalog) -> Result<()> {
        catalog.ensure_matches("checkpoint catalog", &self.catalog_fingerprint)
    }
}

/// Weights, catalog, and manifest loaded together
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub manifest: CheckpointManifest,
    pub catalog: ClassCatalog,
    pub weights: Vec<u8>,
}

impl Checkpoint {
    /// Assemble a new checkpoint with a fresh id
    pub fn new(
        catalog: ClassCatalog,
        weights: Vec<u8>,
        loss: LossConfig,
        class_weights: ClassWeights,
        calibration: Calibration,
    ) -> Result<Self> {
        loss.validate()?;
        calibration.validate()?;
        dermclass_core::ensure_len("checkpoint class weights", catalog.len(), class_weights.len())?;

        let manifest = CheckpointManifest {
            checkpoint_id: Uuid::new_v4(),
            created_at: Utc::now(),
            catalog_fingerprint: catalog.fingerprint().to_string(),
            num_classes: catalog.len(),
            loss,
            class_weights,
            calibration,
            weights_file: WEIGHTS_FILE.to_string(),
            weights_sha256: sha256_hex(&weights),
            epoch: None,
            best_val_loss: None,
            metadata: BTreeMap::new(),
        };
        Ok(Self {
            manifest,
            catalog,
            weights,
        })
    }

    /// Record training progress in the manifest
    pub fn with_epoch(mut self, epoch: u64, best_val_loss: f64) -> Self {
        self.manifest.epoch = Some(epoch);
        self.manifest.best_val_loss = Some(best_val_loss);
        self
    }

    pub fn id(&self) -> Uuid {
        self.manifest.checkpoint_id
    }

    /// Path of the weight blob inside `dir`
    pub fn weights_path(dir: impl AsRef<Path>, manifest: &CheckpointManifest) -> PathBuf {
        dir.as_ref().join(&manifest.weights_file)
    }

    /// Write the checkpoint; the manifest is renamed into place last.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        write_atomic(&Self::weights_path(dir, &self.manifest), &self.weights)?;
        self.catalog.save(dir.join(CATALOG_FILE))?;
        write_json(&dir.join(MANIFEST_FILE), &self.manifest)?;
        info!(
            dir = %dir.display(),
            checkpoint_id = %self.manifest.checkpoint_id,
            classes = self.manifest.num_classes,
            "Saved checkpoint"
        );
        Ok(())
    }

    /// Load and verify a checkpoint directory
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let manifest = CheckpointManifest::load(dir)?;
        let catalog = ClassCatalog::load(dir.join(CATALOG_FILE))?;
        manifest.ensure_catalog(&catalog)?;
        dermclass_core::ensure_len("checkpoint classes", catalog.len(), manifest.num_classes)?;
        dermclass_core::ensure_len(
            "checkpoint class weights",
            catalog.len(),
            manifest.class_weights.len(),
        )?;

        let weights = std::fs::read(Self::weights_path(dir, &manifest))?;
        let digest = sha256_hex(&weights);
        if digest != manifest.weights_sha256 {
            return Err(Error::version_mismatch(
                "checkpoint weights",
                manifest.weights_sha256.clone(),
                digest,
            ));
        }

        info!(
            dir = %dir.display(),
            checkpoint_id = %manifest.checkpoint_id,
            loss = manifest.loss.kind.name(),
            "Loaded checkpoint"
        );
        Ok(Self {
            manifest,
            catalog,
            weights,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint() -> Checkpoint {
        let catalog = ClassCatalog::new(["eczema", "psoriasis"]).unwrap();
        Checkpoint::new(
            catalog,
            vec![1, 2, 3, 4],
            LossConfig::focal(0.25, 2.0),
            ClassWeights::from_vec(vec![1.0, 3.0]).unwrap(),
            Calibration::new(0.7).unwrap(),
        )
        .unwrap()
        .with_epoch(12, 0.42)
    }

    #[test]
    fn test_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let ckpt = checkpoint();
        ckpt.save(dir.path()).unwrap();

        let loaded = Checkpoint::load(dir.path()).unwrap();
        assert_eq!(loaded.manifest, ckpt.manifest);
        assert_eq!(loaded.catalog, ckpt.catalog);
        assert_eq!(loaded.weights, ckpt.weights);
        assert_eq!(loaded.manifest.epoch, Some(12));
    }

    #[test]
    fn test_fresh_ids() {
        assert_ne!(checkpoint().id(), checkpoint().id());
    }

    #[test]
    fn test_tampered_weights_rejected() {
        let dir = tempfile::tempdir().unwrap();
        checkpoint().save(dir.path()).unwrap();
        std::fs::write(dir.path().join(WEIGHTS_FILE), [9u8, 9, 9]).unwrap();
        let err = Checkpoint::load(dir.path()).unwrap_err();
        assert!(err.is_version_mismatch());
    }

    #[test]
    fn test_swapped_catalog_rejected() {
        let dir = tempfile::tempdir().unwrap();
        checkpoint().save(dir.path()).unwrap();
        ClassCatalog::new(["psoriasis", "eczema"])
            .unwrap()
            .save(dir.path().join(CATALOG_FILE))
            .unwrap();
        let err = Checkpoint::load(dir.path()).unwrap_err();
        assert!(err.is_version_mismatch());
    }

    #[test]
    fn test_weight_count_must_match_catalog() {
        let catalog = ClassCatalog::new(["a", "b", "c"]).unwrap();
        let result = Checkpoint::new(
            catalog,
            Vec::new(),
            LossConfig::default(),
            ClassWeights::uniform(2),
            Calibration::default(),
        );
        assert!(result.is_err());
    }
}
