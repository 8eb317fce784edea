//! Threshold files keyed to a checkpoint
//!
//! A threshold file is only meaningful for the checkpoint whose validation
//! probabilities it was fitted on. It records that checkpoint's id and the
//! catalog fingerprint; loading it against anything else fails with
//! [`Error::VersionMismatch`] before any decision is made.

use crate::fit::ClassFit;
use crate::strategy::{DecisionPolicy, ThresholdPolicy};
use chrono::{DateTime, Utc};
use dermclass_core::artifact::{read_json, write_json};
use dermclass_core::{ClassCatalog, Error, Result};
use dermclass_training::CheckpointManifest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdFile {
    pub checkpoint_id: Uuid,
    pub catalog_fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub policy: ThresholdPolicy,

    /// Validation metrics per class when the policy was fitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fits: Option<Vec<ClassFit>>,
}

impl ThresholdFile {
    /// Bind `policy` to a checkpoint and its catalog
    pub fn new(
        manifest: &CheckpointManifest,
        catalog: &ClassCatalog,
        policy: ThresholdPolicy,
    ) -> Result<Self> {
        manifest.ensure_catalog(catalog)?;
        policy.validate(catalog.len())?;
        Ok(Self {
            checkpoint_id: manifest.checkpoint_id,
            catalog_fingerprint: catalog.fingerprint().to_string(),
            created_at: Utc::now(),
            policy,
            fits: None,
        })
    }

    pub fn with_fits(mut self, fits: Vec<ClassFit>) -> Self {
        self.fits = Some(fits);
        self
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_json(path, self)?;
        info!(
            path = %path.display(),
            checkpoint_id = %self.checkpoint_id,
            policy = self.policy.name(),
            "Saved threshold file"
        );
        Ok(())
    }

    /// Load a threshold file and verify it belongs to `manifest` and `catalog`
    pub fn load_for(
        path: impl AsRef<Path>,
        manifest: &CheckpointManifest,
        catalog: &ClassCatalog,
    ) -> Result<Self> {
        let path = path.as_ref();
        let file: Self = read_json(path)?;
        file.verify(manifest, catalog)?;
        debug!(path = %path.display(), checkpoint_id = %file.checkpoint_id, "Loaded threshold file");
        Ok(file)
    }

    /// Fail unless this file was produced for `manifest` and `catalog`
    pub fn verify(&self, manifest: &CheckpointManifest, catalog: &ClassCatalog) -> Result<()> {
        if self.checkpoint_id != manifest.checkpoint_id {
            return Err(Error::version_mismatch(
                "threshold file checkpoint",
                manifest.checkpoint_id.to_string(),
                self.checkpoint_id.to_string(),
            ));
        }
        manifest.ensure_catalog(catalog)?;
        catalog.ensure_matches("threshold file catalog", &self.catalog_fingerprint)?;
        self.policy.validate(catalog.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dermclass_core::Calibration;
    use dermclass_training::{Checkpoint, ClassWeights, LossConfig};

    fn checkpoint(catalog: &ClassCatalog) -> Checkpoint {
        Checkpoint::new(
            catalog.clone(),
            vec![1, 2, 3],
            LossConfig::default(),
            ClassWeights::uniform(catalog.len()),
            Calibration::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ClassCatalog::new(["eczema", "psoriasis"]).unwrap();
        let ckpt = checkpoint(&catalog);
        let policy = ThresholdPolicy::per_class(vec![0.3, 0.45]).unwrap();

        let path = dir.path().join("thresholds.json");
        ThresholdFile::new(&ckpt.manifest, &catalog, policy.clone())
            .unwrap()
            .save(&path)
            .unwrap();

        let loaded = ThresholdFile::load_for(&path, &ckpt.manifest, &catalog).unwrap();
        assert_eq!(loaded.policy, policy);
        assert_eq!(loaded.checkpoint_id, ckpt.id());
    }

    #[test]
    fn test_other_checkpoint_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = ClassCatalog::new(["eczema", "psoriasis"]).unwrap();
        let fitted_on = checkpoint(&catalog);
        let retrained = checkpoint(&catalog);

        let path = dir.path().join("thresholds.json");
        ThresholdFile::new(&fitted_on.manifest, &catalog, ThresholdPolicy::default())
            .unwrap()
            .save(&path)
            .unwrap();

        let err = ThresholdFile::load_for(&path, &retrained.manifest, &catalog).unwrap_err();
        assert!(err.is_version_mismatch());
    }

    #[test]
    fn test_other_catalog_is_rejected() {
        let catalog = ClassCatalog::new(["eczema", "psoriasis"]).unwrap();
        let reordered = ClassCatalog::new(["psoriasis", "eczema"]).unwrap();
        let ckpt = checkpoint(&catalog);

        assert!(ThresholdFile::new(&ckpt.manifest, &reordered, ThresholdPolicy::default())
            .unwrap_err()
            .is_version_mismatch());

        let mut file =
            ThresholdFile::new(&ckpt.manifest, &catalog, ThresholdPolicy::default()).unwrap();
        file.catalog_fingerprint = reordered.fingerprint().to_string();
        assert!(file.verify(&ckpt.manifest, &catalog).unwrap_err().is_version_mismatch());
    }

    #[test]
    fn test_wrong_length_policy_is_rejected() {
        let catalog = ClassCatalog::new(["eczema", "psoriasis"]).unwrap();
        let ckpt = checkpoint(&catalog);
        let policy = ThresholdPolicy::per_class(vec![0.5, 0.5, 0.5]).unwrap();
        assert!(matches!(
            ThresholdFile::new(&ckpt.manifest, &catalog, policy),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
