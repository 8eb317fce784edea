//! Evaluation report
//!
//! The report is a plain value: one entry per catalog class plus an aggregate
//! section. It holds no timestamps or hash-ordered maps, so serializing the
//! same evaluation twice gives identical bytes and reports from different
//! runs can be diffed field by field.

use crate::confusion::ConfusionCounts;
use crate::engine::EvalConfig;
use dermclass_core::artifact::{read_json, sha256_hex, write_atomic};
use dermclass_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

/// Whether a class could be scored on the evaluation split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassStatus {
    /// Present in the split and predicted at least once
    Tested,
    /// Present in the split but never predicted: tested and failed
    NeverPredicted,
    /// No positive sample in the split; metrics are undefined
    Untested,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassReport {
    pub index: usize,
    pub name: String,
    pub status: ClassStatus,
    pub counts: ConfusionCounts,
    /// Positive samples in the evaluation split
    pub support: u64,
    pub predicted: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_support: Option<u64>,
    /// `None` when the class is untested
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1: Option<f64>,
    /// Whether the class takes part in macro averaging
    pub in_macro: bool,
}

impl ClassReport {
    pub(crate) fn new(
        index: usize,
        name: String,
        counts: ConfusionCounts,
        train_support: Option<u64>,
        in_macro: bool,
    ) -> Self {
        let status = if counts.support() == 0 {
            ClassStatus::Untested
        } else if counts.predicted() == 0 {
            ClassStatus::NeverPredicted
        } else {
            ClassStatus::Tested
        };
        let tested = status != ClassStatus::Untested;
        Self {
            index,
            name,
            status,
            counts,
            support: counts.support(),
            predicted: counts.predicted(),
            train_support,
            precision: tested.then(|| counts.precision()),
            recall: tested.then(|| counts.recall()),
            f1: tested.then(|| counts.f1()),
            in_macro,
        }
    }
}

/// Precision, recall, and F1 under one averaging scheme
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Averages {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub samples: u64,

    /// Pooled counts across all classes
    pub micro_counts: ConfusionCounts,
    pub micro_avg: Averages,

    /// Unweighted mean over in-scope classes; `None` when no class is in scope
    pub macro_avg: Option<Averages>,
    pub macro_classes: usize,

    pub tested_classes: usize,
    pub never_predicted_classes: usize,
    pub untested_classes: usize,

    /// Top-K accuracy straight from probabilities, keyed by K
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub top_k: BTreeMap<usize, f64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub soft_top_k: BTreeMap<usize, f64>,
}

/// What the evaluated predictions were produced by
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_id: Option<Uuid>,

    /// Decision policy as serialized by its own crate (name and thresholds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Value>,
}

impl Provenance {
    pub fn new<P: Serialize>(checkpoint_id: Option<Uuid>, policy: &P) -> Result<Self> {
        Ok(Self {
            checkpoint_id,
            policy: Some(serde_json::to_value(policy)?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub catalog_fingerprint: String,
    #[serde(default)]
    pub provenance: Provenance,
    pub config: EvalConfig,
    pub classes: Vec<ClassReport>,
    pub aggregate: AggregateMetrics,
}

/// One field whose value differs between two reports
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path; class entries are addressed by class name
    pub path: String,
    pub before: Option<Value>,
    pub after: Option<Value>,
}

impl EvaluationReport {
    /// Canonical pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        write_atomic(path, self.to_json()?.as_bytes())?;
        info!(path = %path.display(), classes = self.classes.len(), "Saved evaluation report");
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Hex SHA-256 of the canonical JSON
    pub fn digest(&self) -> Result<String> {
        Ok(sha256_hex(self.to_json()?.as_bytes()))
    }

    pub fn class(&self, name: &str) -> Option<&ClassReport> {
        self.classes.iter().find(|c| c.name == name)
    }

    /// Every field that differs from `other`, in path order
    pub fn diff(&self, other: &Self) -> Result<Vec<FieldChange>> {
        let before = keyed_by_class(serde_json::to_value(self)?);
        let after = keyed_by_class(serde_json::to_value(other)?);
        let mut changes = Vec::new();
        diff_values(String::new(), Some(&before), Some(&after), &mut changes);
        Ok(changes)
    }
}

/// Replace the `classes` array with an object keyed by class name
fn keyed_by_class(mut value: Value) -> Value {
    if let Some(Value::Array(classes)) = value.get_mut("classes").map(Value::take) {
        let keyed = classes
            .into_iter()
            .map(|c| {
                let name = c
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                (name, c)
            })
            .collect();
        value["classes"] = Value::Object(keyed);
    }
    value
}

fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

fn diff_values(path: String, a: Option<&Value>, b: Option<&Value>, out: &mut Vec<FieldChange>) {
    match (a, b) {
        (Some(Value::Object(x)), Some(Value::Object(y))) => {
            let keys: std::collections::BTreeSet<&String> = x.keys().chain(y.keys()).collect();
            for key in keys {
                diff_values(join(&path, key), x.get(key), y.get(key), out);
            }
        }
        (Some(Value::Array(x)), Some(Value::Array(y))) => {
            for i in 0..x.len().max(y.len()) {
                diff_values(join(&path, &i.to_string()), x.get(i), y.get(i), out);
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(FieldChange {
            path,
            before: a.cloned(),
            after: b.cloned(),
        }),
    }
}
