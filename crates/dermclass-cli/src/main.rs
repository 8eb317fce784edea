//! dermclass
//!
//! Class weighting, threshold fitting, evaluation, and diagnostics for
//! imbalanced multi-label skin-condition classifiers, driven from scored
//! split files.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use dermclass_cli::{commands, DermclassConfig, ModelContext, ScoredSplit};
use dermclass_core::{ClassCatalog, SplitRole, UnknownLabel};
use dermclass_eval::EvaluationReport;
use dermclass_training::Checkpoint;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "dermclass")]
#[command(about = "Imbalance-aware multi-label training and evaluation tools", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "DERMCLASS_CONFIG", default_value = "dermclass.yaml")]
    config: PathBuf,

    /// Drop ground-truth labels missing from the catalog instead of failing
    #[arg(long, global = true)]
    skip_unknown_labels: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Derive per-class positive weights from a training split
    ClassWeights {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        train: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Compute the configured loss over a scored split
    Loss {
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        split: PathBuf,
        /// Split to derive class weights from (defaults to `--split`)
        #[arg(long)]
        train: Option<PathBuf>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Fit per-class thresholds for a checkpoint on a held-out split
    FitThresholds {
        #[arg(long)]
        checkpoint: PathBuf,
        #[arg(long)]
        split: PathBuf,
        #[arg(long, value_enum, default_value_t = Role::Validation)]
        role: Role,
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Evaluate a scored split and write a report
    Evaluate {
        #[arg(long, required_unless_present = "checkpoint")]
        catalog: Option<PathBuf>,
        #[arg(long)]
        checkpoint: Option<PathBuf>,
        /// Threshold file fitted for `--checkpoint`
        #[arg(long, requires = "checkpoint", conflicts_with = "threshold")]
        thresholds: Option<PathBuf>,
        /// Global threshold when no threshold file is given
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        split: PathBuf,
        /// Training split, for train-support macro scopes
        #[arg(long)]
        train: Option<PathBuf>,
        /// Accumulate shards on the rayon pool
        #[arg(long)]
        sharded: bool,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Flag collapsed, never-predicted, and untestable classes in a report
    Diagnose {
        #[arg(long)]
        report: PathBuf,
        #[arg(long)]
        catalog: PathBuf,
        #[arg(long)]
        train: PathBuf,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// List fields that changed between two reports
    Diff {
        before: PathBuf,
        after: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Role {
    Train,
    Validation,
    Test,
}

impl From<Role> for SplitRole {
    fn from(role: Role) -> Self {
        match role {
            Role::Train => SplitRole::Train,
            Role::Validation => SplitRole::Validation,
            Role::Test => SplitRole::Test,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);
    describe_metrics();

    let config = DermclassConfig::load(&cli.config)?;
    let unknown = if cli.skip_unknown_labels {
        UnknownLabel::Skip
    } else {
        UnknownLabel::Reject
    };

    match cli.command {
        Command::ClassWeights {
            catalog,
            train,
            out,
        } => {
            let catalog = ClassCatalog::load(&catalog)?;
            let train = ScoredSplit::load(&train)?;
            let summary = commands::class_weights(&config, &catalog, &train, unknown)?;
            emit(&summary, out.as_deref())?;
        }
        Command::Loss {
            catalog,
            split,
            train,
            out,
        } => {
            let catalog = ClassCatalog::load(&catalog)?;
            let split = ScoredSplit::load(&split)?;
            let train = train.map(ScoredSplit::load).transpose()?;
            let summary = commands::loss(&config, &catalog, &split, train.as_ref(), unknown)?;
            info!(loss = summary.loss, value = summary.value, "Computed loss");
            emit(&summary, out.as_deref())?;
        }
        Command::FitThresholds {
            checkpoint,
            split,
            role,
            out,
        } => {
            let checkpoint = Checkpoint::load(&checkpoint)?;
            let split = ScoredSplit::load(&split)?;
            let file = commands::fit_thresholds(&config, &checkpoint, &split, role.into(), unknown)?;
            file.save(&out)?;
        }
        Command::Evaluate {
            catalog,
            checkpoint,
            thresholds,
            threshold,
            split,
            train,
            sharded,
            out,
        } => {
            let context = ModelContext::resolve(
                &config,
                catalog.as_deref(),
                checkpoint.as_deref(),
                thresholds.as_deref(),
                threshold,
            )?;
            let split = ScoredSplit::load(&split)?;
            let train_support = train
                .map(|path| ScoredSplit::load(path)?.support(&context.catalog, unknown))
                .transpose()?;
            let report =
                commands::evaluate(&config, &context, &split, train_support, sharded, unknown)?;
            match out {
                Some(path) => report.save(&path)?,
                None => println!("{}", report.to_json()?),
            }
        }
        Command::Diagnose {
            report,
            catalog,
            train,
            out,
        } => {
            let report = EvaluationReport::load(&report)?;
            let catalog = ClassCatalog::load(&catalog)?;
            let train = ScoredSplit::load(&train)?;
            let diagnostics = commands::diagnose_report(&report, &catalog, &train, unknown)?;
            emit(&diagnostics, out.as_deref())?;
        }
        Command::Diff { before, after } => {
            let before = EvaluationReport::load(&before)?;
            let after = EvaluationReport::load(&after)?;
            let changes = before.diff(&after)?;
            info!(changes = changes.len(), "Compared reports");
            emit(&changes, None)?;
        }
    }

    Ok(())
}

/// Write `value` as pretty JSON to `out`, or to stdout
fn emit<T: Serialize>(value: &T, out: Option<&Path>) -> Result<()> {
    match out {
        Some(path) => {
            dermclass_core::artifact::write_json(path, value)?;
            info!(path = %path.display(), "Wrote output");
        }
        None => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("dermclass=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dermclass=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Describe the counters the library crates record. No exporter is
/// installed, so they are only visible to an embedding recorder.
fn describe_metrics() {
    metrics::describe_counter!(
        "dermclass_loss_batches_total",
        "Total number of loss evaluations"
    );
    metrics::describe_counter!(
        "dermclass_loss_clamped_total",
        "Total number of loss elements that hit the probability clamp"
    );
    metrics::describe_counter!(
        "dermclass_evaluations_total",
        "Total number of evaluation reports produced"
    );
    metrics::describe_counter!(
        "dermclass_threshold_fallbacks_total",
        "Total number of classes fitted with the fallback threshold"
    );
}
