//! Subcommand implementations
//!
//! Each command is a plain function over loaded inputs so it can be driven
//! from tests without going through argument parsing.

use crate::config::DermclassConfig;
use crate::split::ScoredSplit;
use anyhow::Context;
use dermclass_core::{Calibration, ClassCatalog, SplitRole, SupportCounts, UnknownLabel};
use dermclass_eval::{diagnose, DiagnosticsReport, EvaluationReport, Evaluator, Provenance};
use dermclass_policy::{fit_per_class, DecisionEngine, ThresholdFile, ThresholdPolicy};
use dermclass_training::{Checkpoint, ClassWeights, ImbalanceLoss, WeightScheme};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Catalog, calibration, and decision policy for one run
#[derive(Debug, Clone)]
pub struct ModelContext {
    pub catalog: Arc<ClassCatalog>,
    /// Set when resolved from a checkpoint
    pub checkpoint_id: Option<Uuid>,
    pub calibration: Calibration,
    pub policy: ThresholdPolicy,
}

impl ModelContext {
    /// Resolve from either a checkpoint directory or a bare catalog file.
    ///
    /// A threshold file requires the checkpoint it was fitted against. With
    /// no threshold file, `threshold` (or the default) is used globally.
    pub fn resolve(
        config: &DermclassConfig,
        catalog: Option<&Path>,
        checkpoint: Option<&Path>,
        thresholds: Option<&Path>,
        threshold: Option<f64>,
    ) -> anyhow::Result<Self> {
        let global = || -> anyhow::Result<ThresholdPolicy> {
            Ok(match threshold {
                Some(t) => ThresholdPolicy::global(t)?,
                None => ThresholdPolicy::default(),
            })
        };

        match (checkpoint, catalog) {
            (Some(dir), _) => {
                let checkpoint = Checkpoint::load(dir)
                    .with_context(|| format!("loading checkpoint {}", dir.display()))?;
                let policy = match thresholds {
                    Some(path) => {
                        ThresholdFile::load_for(path, &checkpoint.manifest, &checkpoint.catalog)?
                            .policy
                    }
                    None => global()?,
                };
                Ok(Self {
                    checkpoint_id: Some(checkpoint.manifest.checkpoint_id),
                    catalog: Arc::new(checkpoint.catalog),
                    calibration: checkpoint.manifest.calibration,
                    policy,
                })
            }
            (None, Some(path)) => {
                if thresholds.is_some() {
                    anyhow::bail!("a threshold file can only be applied together with its checkpoint");
                }
                let catalog = ClassCatalog::load(path)
                    .with_context(|| format!("loading catalog {}", path.display()))?;
                Ok(Self {
                    catalog: Arc::new(catalog),
                    checkpoint_id: None,
                    calibration: config.calibration,
                    policy: global()?,
                })
            }
            (None, None) => anyhow::bail!("either a catalog or a checkpoint is required"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassWeightEntry {
    pub class: String,
    pub support: u64,
    pub pos_weight: f64,
    pub capped: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassWeightSummary {
    pub scheme: WeightScheme,
    pub samples: u64,
    pub max_pos_weight: Option<f64>,
    pub classes: Vec<ClassWeightEntry>,
}

/// Derive `pos_weight` per class from a training split
pub fn class_weights(
    config: &DermclassConfig,
    catalog: &ClassCatalog,
    train: &ScoredSplit,
    unknown: UnknownLabel,
) -> anyhow::Result<ClassWeightSummary> {
    let support = train.support(catalog, unknown)?;
    let samples = train.len() as u64;
    let weights = ClassWeights::derive(&config.class_weights, &support, samples)?;

    let classes = catalog
        .names()
        .iter()
        .enumerate()
        .map(|(c, name)| ClassWeightEntry {
            class: name.clone(),
            support: support.get(c),
            pos_weight: weights.get(c),
            capped: weights.capped().contains(&c),
        })
        .collect();

    info!(
        scheme = ?config.class_weights.scheme,
        classes = catalog.len(),
        capped = weights.capped().len(),
        "Derived class weights"
    );
    Ok(ClassWeightSummary {
        scheme: config.class_weights.scheme,
        samples,
        max_pos_weight: config.class_weights.max_pos_weight,
        classes,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LossSummary {
    pub loss: &'static str,
    pub value: f64,
    pub samples: usize,
    pub clamped: usize,
    /// Per-class contribution to `value`, in catalog order
    pub per_class: Vec<(String, f64)>,
}

/// Loss of a scored split under the configured loss and class weights.
///
/// Class weights are derived from `train` (the split itself when absent).
pub fn loss(
    config: &DermclassConfig,
    catalog: &ClassCatalog,
    split: &ScoredSplit,
    train: Option<&ScoredSplit>,
    unknown: UnknownLabel,
) -> anyhow::Result<LossSummary> {
    let weight_source = train.unwrap_or(split);
    let support = weight_source.support(catalog, unknown)?;
    let weights =
        ClassWeights::derive(&config.class_weights, &support, weight_source.len() as u64)?;

    let scores = split.scores(catalog)?;
    let targets = split.targets(catalog, unknown)?;
    let loss = ImbalanceLoss::new(config.loss)?;
    let out = loss.compute(&scores, &targets, &weights)?;

    Ok(LossSummary {
        loss: config.loss.kind.name(),
        value: out.value,
        samples: out.samples,
        clamped: out.clamped,
        per_class: catalog.names().iter().cloned().zip(out.per_class).collect(),
    })
}

/// Fit per-class thresholds on a held-out split and bind them to `checkpoint`
pub fn fit_thresholds(
    config: &DermclassConfig,
    checkpoint: &Checkpoint,
    split: &ScoredSplit,
    role: SplitRole,
    unknown: UnknownLabel,
) -> anyhow::Result<ThresholdFile> {
    let catalog = &checkpoint.catalog;
    let probabilities = split.probabilities(catalog, &checkpoint.manifest.calibration)?;
    let targets = split.targets(catalog, unknown)?;

    let fit = fit_per_class(catalog, role, &probabilities, &targets, &config.fitting)?;
    let fallbacks = fit.fallbacks().count();
    if fallbacks > 0 {
        warn!(
            classes = fallbacks,
            fallback_threshold = config.fitting.fallback_threshold,
            "Classes without positives in the fitting split use the fallback threshold"
        );
    }

    let file = ThresholdFile::new(&checkpoint.manifest, catalog, fit.policy)?.with_fits(fit.fits);
    Ok(file)
}

/// Decide and evaluate a scored split
pub fn evaluate(
    config: &DermclassConfig,
    context: &ModelContext,
    split: &ScoredSplit,
    train_support: Option<SupportCounts>,
    sharded: bool,
    unknown: UnknownLabel,
) -> anyhow::Result<EvaluationReport> {
    let catalog = &context.catalog;
    let probabilities = split.probabilities(catalog, &context.calibration)?;
    let targets = split.targets(catalog, unknown)?;

    let engine = DecisionEngine::new(catalog.clone(), context.policy.clone())?;
    let predictions = engine.decide_batch(&probabilities)?;

    let provenance = Provenance::new(context.checkpoint_id, &context.policy)?;
    let mut evaluator = Evaluator::new(catalog.clone(), config.evaluation.clone())?
        .with_provenance(provenance);
    if let Some(support) = train_support {
        evaluator = evaluator.with_train_support(support)?;
    }

    let report = if sharded {
        evaluator.evaluate_sharded(&predictions, &targets, Some(&probabilities))?
    } else {
        evaluator.evaluate(&predictions, &targets, Some(&probabilities))?
    };
    Ok(report)
}

/// Flag collapsed and untestable classes in a saved report
pub fn diagnose_report(
    report: &EvaluationReport,
    catalog: &ClassCatalog,
    train: &ScoredSplit,
    unknown: UnknownLabel,
) -> anyhow::Result<DiagnosticsReport> {
    catalog.ensure_matches("evaluation report", &report.catalog_fingerprint)?;
    let support = train.support(catalog, unknown)?;
    Ok(diagnose(report, &support)?)
}
