//! Multi-label evaluation engine
//!
//! [`Evaluator::evaluate`] is a pure function of its inputs. The sharded
//! variant splits samples into contiguous shards, accumulates each into a
//! private table on the rayon pool, and merges the shards in order, so both
//! paths produce the same report.

use crate::confusion::ConfusionTable;
use crate::report::{
    AggregateMetrics, Averages, ClassReport, ClassStatus, EvaluationReport, Provenance,
};
use crate::topk::{TopKAccumulator, DEFAULT_TOP_K};
use dermclass_core::{
    ensure_len, ClassCatalog, Error, PredictionSet, ProbabilityVector, Result, SupportCounts,
    TargetVector,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Which classes enter macro averages.
///
/// Classes without evaluation support are excluded under every scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MacroScope {
    /// Every class with evaluation support
    #[default]
    EvalSupport,
    /// Classes with both training and evaluation support
    TrainAndEval,
    /// A named subset of the catalog
    Subset { classes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: Vec<usize>,

    #[serde(default)]
    pub macro_scope: MacroScope,

    /// Number of shards for parallel evaluation (0 = number of CPUs)
    #[serde(default)]
    pub shards: usize,
}

fn default_top_k() -> Vec<usize> {
    DEFAULT_TOP_K.to_vec()
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            macro_scope: MacroScope::default(),
            shards: 0,
        }
    }
}

impl EvalConfig {
    pub fn with_macro_scope(mut self, scope: MacroScope) -> Self {
        self.macro_scope = scope;
        self
    }
}

/// Per-shard accumulation state
#[derive(Debug, Clone)]
struct Accumulator {
    table: ConfusionTable,
    top_k: TopKAccumulator,
}

impl Accumulator {
    fn merge(mut self, other: &Self) -> Result<Self> {
        self.table.merge(&other.table)?;
        self.top_k.merge(&other.top_k)?;
        Ok(self)
    }
}

/// Scores prediction sets against multi-label targets for one catalog
#[derive(Debug, Clone)]
pub struct Evaluator {
    catalog: Arc<ClassCatalog>,
    config: EvalConfig,
    train_support: Option<SupportCounts>,
    subset: Option<BTreeSet<usize>>,
    provenance: Provenance,
}

impl Evaluator {
    pub fn new(catalog: Arc<ClassCatalog>, config: EvalConfig) -> Result<Self> {
        TopKAccumulator::new(&config.top_k)?;
        let subset = match &config.macro_scope {
            MacroScope::Subset { classes } => Some(
                classes
                    .iter()
                    .map(|name| catalog.require_index(name))
                    .collect::<Result<BTreeSet<usize>>>()?,
            ),
            _ => None,
        };
        Ok(Self {
            catalog,
            config,
            train_support: None,
            subset,
            provenance: Provenance::default(),
        })
    }

    /// Attach training support; reported per class and required by
    /// [`MacroScope::TrainAndEval`]
    pub fn with_train_support(mut self, support: SupportCounts) -> Result<Self> {
        support.ensure_len(&self.catalog)?;
        self.train_support = Some(support);
        Ok(self)
    }

    /// Record the checkpoint and policy behind the predictions in every report
    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn catalog(&self) -> &ClassCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate one split.
    ///
    /// `probabilities` feeds Top-K only; when `None`, Top-K is omitted.
    pub fn evaluate(
        &self,
        predictions: &[PredictionSet],
        targets: &[TargetVector],
        probabilities: Option<&[ProbabilityVector]>,
    ) -> Result<EvaluationReport> {
        self.check_inputs(predictions, targets, probabilities)?;
        let acc = self.accumulate(0..targets.len(), predictions, targets, probabilities)?;
        self.finish(acc, probabilities.is_some())
    }

    /// Same as [`Self::evaluate`], with samples split across the rayon pool
    pub fn evaluate_sharded(
        &self,
        predictions: &[PredictionSet],
        targets: &[TargetVector],
        probabilities: Option<&[ProbabilityVector]>,
    ) -> Result<EvaluationReport> {
        self.check_inputs(predictions, targets, probabilities)?;
        let n = targets.len();
        let shards = match self.config.shards {
            0 => num_cpus::get(),
            s => s,
        }
        .clamp(1, n.max(1));
        let chunk = n.div_ceil(shards).max(1);
        debug!(samples = n, shards, chunk, "Sharded evaluation");

        let partials = (0..shards)
            .into_par_iter()
            .map(|s| {
                let range = (s * chunk).min(n)..((s + 1) * chunk).min(n);
                self.accumulate(range, predictions, targets, probabilities)
            })
            .collect::<Result<Vec<Accumulator>>>()?;

        let mut merged = self.empty_accumulator()?;
        for partial in &partials {
            merged = merged.merge(partial)?;
        }
        self.finish(merged, probabilities.is_some())
    }

    fn check_inputs(
        &self,
        predictions: &[PredictionSet],
        targets: &[TargetVector],
        probabilities: Option<&[ProbabilityVector]>,
    ) -> Result<()> {
        ensure_len("prediction sets", targets.len(), predictions.len())?;
        if let Some(p) = probabilities {
            ensure_len("probability vectors", targets.len(), p.len())?;
        }
        if matches!(self.config.macro_scope, MacroScope::TrainAndEval)
            && self.train_support.is_none()
        {
            return Err(Error::config(
                "macro scope train_and_eval requires training support counts",
            ));
        }
        Ok(())
    }

    fn empty_accumulator(&self) -> Result<Accumulator> {
        Ok(Accumulator {
            table: ConfusionTable::new(self.catalog.len()),
            top_k: TopKAccumulator::new(&self.config.top_k)?,
        })
    }

    fn accumulate(
        &self,
        range: std::ops::Range<usize>,
        predictions: &[PredictionSet],
        targets: &[TargetVector],
        probabilities: Option<&[ProbabilityVector]>,
    ) -> Result<Accumulator> {
        let mut acc = self.empty_accumulator()?;
        for i in range {
            acc.table.record(&predictions[i], &targets[i])?;
            if let Some(p) = probabilities {
                p[i].ensure_len(&self.catalog)?;
                acc.top_k.record(&p[i], &targets[i])?;
            }
        }
        Ok(acc)
    }

    fn in_macro_scope(&self, class: usize, eval_support: u64) -> bool {
        if eval_support == 0 {
            return false;
        }
        match &self.config.macro_scope {
            MacroScope::EvalSupport => true,
            MacroScope::TrainAndEval => self
                .train_support
                .as_ref()
                .is_some_and(|s| s.get(class) > 0),
            MacroScope::Subset { .. } => self.subset.as_ref().is_some_and(|s| s.contains(&class)),
        }
    }

    fn finish(&self, acc: Accumulator, with_top_k: bool) -> Result<EvaluationReport> {
        let classes: Vec<ClassReport> = acc
            .table
            .classes()
            .iter()
            .enumerate()
            .map(|(c, counts)| {
                let name = self.catalog.name(c).unwrap_or_default().to_string();
                let train = self.train_support.as_ref().map(|s| s.get(c));
                ClassReport::new(c, name, *counts, train, self.in_macro_scope(c, counts.support()))
            })
            .collect();

        let micro_counts = acc.table.micro();
        let micro_avg = Averages {
            precision: micro_counts.precision(),
            recall: micro_counts.recall(),
            f1: micro_counts.f1(),
        };

        let in_scope: Vec<&ClassReport> = classes.iter().filter(|c| c.in_macro).collect();
        let macro_avg = (!in_scope.is_empty()).then(|| {
            let n = in_scope.len() as f64;
            let mean = |f: fn(&ClassReport) -> Option<f64>| {
                in_scope.iter().filter_map(|c| f(c)).sum::<f64>() / n
            };
            Averages {
                precision: mean(|c| c.precision),
                recall: mean(|c| c.recall),
                f1: mean(|c| c.f1),
            }
        });

        let count = |status: ClassStatus| classes.iter().filter(|c| c.status == status).count();
        let aggregate = AggregateMetrics {
            samples: acc.table.samples(),
            micro_counts,
            micro_avg,
            macro_avg,
            macro_classes: in_scope.len(),
            tested_classes: count(ClassStatus::Tested),
            never_predicted_classes: count(ClassStatus::NeverPredicted),
            untested_classes: count(ClassStatus::Untested),
            top_k: if with_top_k {
                acc.top_k.accuracy()
            } else {
                Default::default()
            },
            soft_top_k: if with_top_k {
                acc.top_k.soft_accuracy()
            } else {
                Default::default()
            },
        };

        metrics::counter!("dermclass_evaluations_total").increment(1);
        info!(
            samples = aggregate.samples,
            micro_f1 = aggregate.micro_avg.f1,
            macro_f1 = aggregate.macro_avg.map(|m| m.f1),
            macro_classes = aggregate.macro_classes,
            untested = aggregate.untested_classes,
            never_predicted = aggregate.never_predicted_classes,
            "Evaluation complete"
        );

        Ok(EvaluationReport {
            catalog_fingerprint: self.catalog.fingerprint().to_string(),
            provenance: self.provenance.clone(),
            config: self.config.clone(),
            classes,
            aggregate,
        })
    }
}
