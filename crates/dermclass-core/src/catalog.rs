//! Label space: the fixed, ordered class catalog every other component aligns to.
//!
//! A catalog is immutable once built. Its fingerprint is the version tag that
//! checkpoints, threshold files, and evaluation reports carry, so an artifact
//! produced for one label space can never be silently applied to another.

use crate::artifact::{hex, read_json, write_json};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// Ordered sequence of unique class names
#[derive(Debug, Clone)]
pub struct ClassCatalog {
    names: Vec<String>,
    index: HashMap<String, usize>,
    fingerprint: String,
}

/// On-disk form of a catalog
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    fingerprint: String,
    classes: Vec<String>,
}

impl ClassCatalog {
    /// Build a catalog from an ordered list of names.
    ///
    /// Rejects an empty list and duplicate names.
    pub fn new<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            return Err(Error::invalid("class catalog must contain at least one class"));
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.is_empty() {
                return Err(Error::invalid(format!("class name at index {i} is empty")));
            }
            if index.insert(name.clone(), i).is_some() {
                return Err(Error::invalid(format!("duplicate class name '{name}'")));
            }
        }

        let fingerprint = fingerprint_of(&names);
        Ok(Self {
            names,
            index,
            fingerprint,
        })
    }

    /// Build a catalog from a label inventory.
    ///
    /// Classes are ordered by descending count, ties broken by name. Only the
    /// `top_k` most frequent labels are kept when given, and labels seen fewer
    /// than `min_count` times are dropped.
    pub fn from_label_counts(
        counts: &HashMap<String, u64>,
        top_k: Option<usize>,
        min_count: u64,
    ) -> Result<Self> {
        let mut ranked: Vec<(&String, u64)> = counts
            .iter()
            .filter(|(_, &n)| n >= min_count && n > 0)
            .map(|(name, &n)| (name, n))
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        if let Some(k) = top_k {
            ranked.truncate(k);
        }

        debug!(
            inventory = counts.len(),
            kept = ranked.len(),
            min_count,
            "Building class catalog from label counts"
        );

        Self::new(ranked.into_iter().map(|(name, _)| name.clone()))
    }

    /// Number of classes (C)
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Always false for a constructed catalog
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of a class name
    pub fn index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Index of a class name, or an error naming the unknown class
    pub fn require_index(&self, name: &str) -> Result<usize> {
        self.index(name)
            .ok_or_else(|| Error::invalid(format!("unknown class '{name}'")))
    }

    /// Class name at an index
    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    /// All class names in catalog order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Hex SHA-256 of the ordered class names
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Fail with `VersionMismatch` unless `fingerprint` identifies this catalog
    pub fn ensure_matches(&self, artifact: &str, fingerprint: &str) -> Result<()> {
        if self.fingerprint != fingerprint {
            return Err(Error::version_mismatch(
                artifact,
                self.fingerprint.clone(),
                fingerprint,
            ));
        }
        Ok(())
    }

    /// Load a catalog from JSON, verifying the stored fingerprint
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file: CatalogFile = read_json(path)?;
        let catalog = Self::new(file.classes)?;
        catalog.ensure_matches("class catalog", &file.fingerprint)?;
        info!(
            path = %path.display(),
            classes = catalog.len(),
            fingerprint = %catalog.fingerprint,
            "Loaded class catalog"
        );
        Ok(catalog)
    }

    /// Save the catalog as JSON (atomic: temp file then rename)
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = CatalogFile {
            fingerprint: self.fingerprint.clone(),
            classes: self.names.clone(),
        };
        write_json(path.as_ref(), &file)
    }
}

impl PartialEq for ClassCatalog {
    fn eq(&self, other: &Self) -> bool {
        self.names == other.names
    }
}

impl Eq for ClassCatalog {}

fn fingerprint_of(names: &[String]) -> String {
    let mut hasher = Sha256::new();
    for name in names {
        // Length prefix keeps ["ab","c"] distinct from ["a","bc"].
        hasher.update((name.len() as u64).to_le_bytes());
        hasher.update(name.as_bytes());
    }
    hex(&hasher.finalize())
}
