//! End-to-end evaluation scenarios: decision policies feeding the evaluator,
//! report persistence, and diagnostics.

use dermclass_core::{ClassCatalog, PredictionSet, ProbabilityVector, SupportCounts, TargetVector};
use dermclass_eval::{diagnose, ClassStatus, EvalConfig, EvaluationReport, Evaluator, FlagKind};
use dermclass_policy::{DecisionEngine, ThresholdPolicy};
use std::sync::Arc;

fn probs(rows: &[&[f64]]) -> Vec<ProbabilityVector> {
    rows.iter()
        .map(|r| ProbabilityVector::new(r.to_vec()).unwrap())
        .collect()
}

fn targets(n: usize, rows: &[&[usize]]) -> Vec<TargetVector> {
    rows.iter()
        .map(|r| TargetVector::multi_hot(n, r).unwrap())
        .collect()
}

fn sets(n: usize, rows: &[&[usize]]) -> Vec<PredictionSet> {
    rows.iter()
        .map(|r| PredictionSet::from_indices(n, r.iter().copied()).unwrap())
        .collect()
}

#[test]
fn test_two_class_perfect_split() {
    let catalog = Arc::new(ClassCatalog::new(["melanoma", "nevus"]).unwrap());
    let probabilities = probs(&[&[0.9, 0.1], &[0.3, 0.7]]);
    let targets = targets(2, &[&[0], &[1]]);

    let engine = DecisionEngine::new(
        catalog.clone(),
        ThresholdPolicy::per_class(vec![0.5, 0.5]).unwrap(),
    )
    .unwrap();
    let predictions = engine.decide_batch(&probabilities).unwrap();

    let report = Evaluator::new(catalog, EvalConfig::default())
        .unwrap()
        .evaluate(&predictions, &targets, Some(&probabilities))
        .unwrap();

    assert_eq!(report.aggregate.micro_counts.tp, 2);
    assert_eq!(report.aggregate.micro_counts.fp, 0);
    assert_eq!(report.aggregate.micro_counts.fn_, 0);
    for class in &report.classes {
        assert_eq!((class.counts.tp, class.counts.fp, class.counts.fn_), (1, 0, 0));
        assert_eq!(class.f1, Some(1.0));
        assert_eq!(class.status, ClassStatus::Tested);
    }
    assert_eq!(report.aggregate.macro_avg.unwrap().f1, 1.0);
    assert_eq!(report.aggregate.micro_avg.f1, 1.0);
    assert_eq!(report.aggregate.top_k[&1], 1.0);
}

#[test]
fn test_top_k_ignores_decision_policy() {
    let n = 6;
    let catalog = Arc::new(ClassCatalog::new((0..n).map(|c| format!("c{c}"))).unwrap());
    let probabilities = probs(&[
        &[0.40, 0.30, 0.20, 0.05, 0.02, 0.01],
        &[0.05, 0.10, 0.15, 0.20, 0.25, 0.30],
        &[0.90, 0.80, 0.02, 0.01, 0.03, 0.04],
        &[0.11, 0.12, 0.13, 0.14, 0.15, 0.16],
    ]);
    let targets = targets(n, &[&[1], &[0], &[0, 1], &[5]]);
    let evaluator = Evaluator::new(catalog.clone(), EvalConfig::default()).unwrap();

    let policies = [
        ThresholdPolicy::global(0.5).unwrap(),
        ThresholdPolicy::per_class(vec![0.1, 0.2, 0.9, 0.9, 0.9, 0.15]).unwrap(),
        ThresholdPolicy::top_k(1).unwrap(),
    ];
    let reports: Vec<EvaluationReport> = policies
        .into_iter()
        .map(|policy| {
            let engine = DecisionEngine::new(catalog.clone(), policy).unwrap();
            let predictions = engine.decide_batch(&probabilities).unwrap();
            evaluator
                .evaluate(&predictions, &targets, Some(&probabilities))
                .unwrap()
        })
        .collect();

    // sample 1 has its positive ranked last
    assert_eq!(reports[0].aggregate.top_k[&5], 0.75);
    assert_eq!(reports[0].aggregate.top_k[&1], 0.5);
    for report in &reports[1..] {
        assert_eq!(report.aggregate.top_k, reports[0].aggregate.top_k);
        assert_eq!(report.aggregate.soft_top_k, reports[0].aggregate.soft_top_k);
    }
    assert_ne!(reports[0].aggregate.micro_avg, reports[1].aggregate.micro_avg);
}

#[test]
fn test_diagnostics_flag_collapse_and_zero_shot() {
    let catalog = Arc::new(ClassCatalog::new(["eczema", "acne", "vitiligo", "tinea"]).unwrap());
    let train = SupportCounts::new(&catalog, vec![890, 40, 0, 5]).unwrap();
    let predictions = sets(4, &[&[], &[], &[1], &[1]]);
    let targets = targets(4, &[&[0], &[0], &[1], &[2]]);

    let report = Evaluator::new(catalog, EvalConfig::default())
        .unwrap()
        .with_train_support(train.clone())
        .unwrap()
        .evaluate(&predictions, &targets, None)
        .unwrap();

    // vitiligo was never trained on but has evaluation support: it is testable
    let vitiligo = report.class("vitiligo").unwrap();
    assert!(vitiligo.in_macro);
    assert_eq!(vitiligo.f1, Some(0.0));
    assert_eq!(report.aggregate.macro_classes, 3);
    let expected_macro = (0.0 + 2.0 / 3.0 + 0.0) / 3.0;
    assert!((report.aggregate.macro_avg.unwrap().f1 - expected_macro).abs() < 1e-12);

    let tinea = report.class("tinea").unwrap();
    assert_eq!(tinea.status, ClassStatus::Untested);
    assert!(!tinea.in_macro);

    let diagnostics = diagnose(&report, &train).unwrap();
    assert_eq!(diagnostics.majority_classes, vec![0]);
    assert!(diagnostics.is_flagged(0, FlagKind::MajorityCollapse));
    assert!(diagnostics.is_flagged(0, FlagKind::NeverPredicted));
    assert!(diagnostics.is_flagged(2, FlagKind::TrainAbsent));
    assert!(diagnostics.is_flagged(2, FlagKind::NeverPredicted));
    assert!(diagnostics.is_flagged(3, FlagKind::Untestable));
    assert!(!diagnostics.is_flagged(1, FlagKind::MajorityCollapse));
    assert_eq!(diagnostics.of_kind(FlagKind::Untestable).count(), 1);
    assert!(diagnostics.support_f1_spearman.is_some());

    assert!(diagnose(&report, &SupportCounts::zeros(3)).is_err());
}

#[test]
fn test_tied_majority_classes_all_flagged() {
    let catalog =
        Arc::new(ClassCatalog::new(["eczema", "psoriasis", "acne", "tinea"]).unwrap());
    let train = SupportCounts::new(&catalog, vec![890, 890, 5, 1]).unwrap();
    // both frequent classes are never predicted; the rare ones are
    let predictions = sets(4, &[&[], &[], &[2], &[3]]);
    let targets = targets(4, &[&[0], &[1], &[2], &[3]]);

    let report = Evaluator::new(catalog, EvalConfig::default())
        .unwrap()
        .evaluate(&predictions, &targets, None)
        .unwrap();
    let diagnostics = diagnose(&report, &train).unwrap();

    assert_eq!(diagnostics.majority_classes, vec![0, 1]);
    assert!(diagnostics.is_flagged(0, FlagKind::MajorityCollapse));
    assert!(diagnostics.is_flagged(1, FlagKind::MajorityCollapse));
    assert_eq!(diagnostics.of_kind(FlagKind::MajorityCollapse).count(), 2);
}

#[test]
fn test_reports_are_byte_identical_and_diffable() {
    let dir = tempfile::tempdir().unwrap();
    let catalog = Arc::new(ClassCatalog::new(["a", "b", "c"]).unwrap());
    let probabilities = probs(&[&[0.8, 0.4, 0.1], &[0.2, 0.6, 0.3], &[0.5, 0.5, 0.5]]);
    let targets = targets(3, &[&[0], &[1, 2], &[]]);
    let evaluator = Evaluator::new(catalog.clone(), EvalConfig::default()).unwrap();

    let decide = |policy| {
        DecisionEngine::new(catalog.clone(), policy)
            .unwrap()
            .decide_batch(&probabilities)
            .unwrap()
    };
    let predictions = decide(ThresholdPolicy::global(0.5).unwrap());

    let first = evaluator.evaluate(&predictions, &targets, Some(&probabilities)).unwrap();
    let second = evaluator.evaluate(&predictions, &targets, Some(&probabilities)).unwrap();
    assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    assert_eq!(first.digest().unwrap(), second.digest().unwrap());
    assert!(first.diff(&second).unwrap().is_empty());

    let path = dir.path().join("report.json");
    first.save(&path).unwrap();
    let loaded = EvaluationReport::load(&path).unwrap();
    assert_eq!(loaded, first);
    assert_eq!(loaded.digest().unwrap(), first.digest().unwrap());

    let lowered = decide(ThresholdPolicy::global(0.3).unwrap());
    let changed = evaluator.evaluate(&lowered, &targets, Some(&probabilities)).unwrap();
    assert_ne!(changed.digest().unwrap(), first.digest().unwrap());
    let changes = first.diff(&changed).unwrap();
    assert!(changes.iter().any(|c| c.path == "classes.c.counts.tp"));
    assert!(changes.iter().all(|c| !c.path.starts_with("aggregate.top_k")));
}
