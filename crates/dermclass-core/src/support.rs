//! Per-class support counts (number of positive samples per class)

use crate::catalog::ClassCatalog;
use crate::error::{Error, Result};
use crate::types::{TargetVector, UnknownLabel};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Positive-sample count per class, aligned to a catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SupportCounts(Vec<u64>);

impl SupportCounts {
    /// All-zero counts for `num_classes` classes
    pub fn zeros(num_classes: usize) -> Self {
        Self(vec![0; num_classes])
    }

    /// Wrap raw counts, checking the length against the catalog
    pub fn new(catalog: &ClassCatalog, counts: Vec<u64>) -> Result<Self> {
        crate::types::ensure_len("support counts", catalog.len(), counts.len())?;
        Ok(Self(counts))
    }

    /// Count positives (under the agreement threshold) in a set of targets
    pub fn from_targets(catalog: &ClassCatalog, targets: &[TargetVector]) -> Result<Self> {
        let mut counts = vec![0u64; catalog.len()];
        for target in targets {
            target.ensure_len(catalog)?;
            for c in target.positives() {
                counts[c] += 1;
            }
        }
        Ok(Self(counts))
    }

    /// Build from a name-keyed map; classes missing from the map count zero.
    ///
    /// Signed input lets negative counts be rejected at the boundary rather
    /// than wrapping.
    pub fn from_map(
        catalog: &ClassCatalog,
        map: &HashMap<String, i64>,
        unknown: UnknownLabel,
    ) -> Result<Self> {
        let mut counts = vec![0u64; catalog.len()];
        for (name, &count) in map {
            let count = u64::try_from(count).map_err(|_| {
                Error::invalid(format!("negative support count {count} for class '{name}'"))
            })?;
            match (catalog.index(name), unknown) {
                (Some(c), _) => counts[c] = count,
                (None, UnknownLabel::Reject) => {
                    return Err(Error::invalid(format!(
                        "support count for class '{name}' which is not in the catalog"
                    )))
                }
                (None, UnknownLabel::Skip) => {
                    tracing::debug!(class = %name, "Ignoring support for class outside the catalog");
                }
            }
        }
        Ok(Self(counts))
    }

    pub fn get(&self, class: usize) -> u64 {
        self.0.get(class).copied().unwrap_or(0)
    }

    pub fn by_name(&self, catalog: &ClassCatalog, name: &str) -> Option<u64> {
        catalog.index(name).map(|c| self.get(c))
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Sum over all classes
    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    /// Name-keyed view in catalog order of names
    pub fn to_map(&self, catalog: &ClassCatalog) -> BTreeMap<String, u64> {
        catalog
            .names()
            .iter()
            .zip(&self.0)
            .map(|(name, &n)| (name.clone(), n))
            .collect()
    }

    /// Validate the length against a catalog
    pub fn ensure_len(&self, catalog: &ClassCatalog) -> Result<()> {
        crate::types::ensure_len("support counts", catalog.len(), self.0.len())
    }
}
