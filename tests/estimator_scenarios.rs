//! Statistical scenario tests on seeded synthetic experiments
//!
//! Each scenario has a known ground truth. Repeated-draw tests use fixed
//! seeds, so their outcome is deterministic.

use causify::config::{BaseLearner, ForestParams, MatchingConfig, PipelineConfig, UpliftConfig};
use causify::covariates::{CovariateSelector, CovariateSet};
use causify::cuped::CupedAdjuster;
use causify::pipeline::{EstimateStatus, Pipeline};
use causify::propensity::PropensityMatcher;
use causify::report::RunStatus;
use causify::schema::SchemaDescriptor;
use causify::significance::SignificanceTester;
use causify::stats;
use causify::synthetic::{BinaryScenario, ContinuousScenario, SyntheticExperiment};
use causify::table::{AnalysisTable, Column};
use causify::uplift::XLearner;
use causify::{Error, EstimationError};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::collections::BTreeSet;

fn all_covariates(table: &AnalysisTable) -> CovariateSet {
    CovariateSelector::new(0.05)
        .unwrap()
        .select(table)
        .unwrap()
        .selected
}

// ============================================================================
// CUPED + z-test
// ============================================================================

#[test]
fn test_cuped_detects_lift_in_most_draws() {
    // 1,000 users, +0.05 on a 0.20 base, 64 covariates each r = 0.3 with
    // the baseline outcome
    let scenario = BinaryScenario::default();
    let tester = SignificanceTester::default();
    let mut detected = 0;
    for seed in 0..100 {
        let table = SyntheticExperiment::binary(&scenario, seed).unwrap().table;
        let set = all_covariates(&table);
        let cuped = CupedAdjuster::new().adjust(&table, &set).unwrap();
        let result = tester.test(&cuped.adjusted, table.treatment()).unwrap();
        if result.p_value < 0.05 {
            detected += 1;
        }
    }
    assert!(detected >= 90, "detected in {detected} of 100 draws");
}

#[test]
fn test_cuped_narrows_interval() {
    let table = SyntheticExperiment::binary(&BinaryScenario::default(), 7)
        .unwrap()
        .table;
    let set = all_covariates(&table);
    let tester = SignificanceTester::default();
    let raw = tester.test_outcome(&table).unwrap();
    let cuped = CupedAdjuster::new().adjust(&table, &set).unwrap();
    let adjusted = tester.test(&cuped.adjusted, table.treatment()).unwrap();

    assert!(cuped.variance_reduction_pct > 50.0);
    assert!(adjusted.std_error < raw.std_error);
}

#[test]
fn test_zero_effect_interval_covers_zero() {
    let scenario = BinaryScenario {
        effect: 0.0,
        n_covariates: 4,
        ..BinaryScenario::default()
    };
    let tester = SignificanceTester::default();
    let mut covered = 0;
    for seed in 1_000..1_100 {
        let table = SyntheticExperiment::binary(&scenario, seed).unwrap().table;
        let result = tester.test_outcome(&table).unwrap();
        if result.ci_low <= 0.0 && 0.0 <= result.ci_high {
            covered += 1;
        }
    }
    assert!(covered >= 88, "covered zero in {covered} of 100 draws");
}

#[test]
fn test_single_record_arm_is_insufficient() {
    let n = 40;
    let table = AnalysisTable::builder(SchemaDescriptor::default())
        .user_ids((0..n).map(|i| format!("u{i}")))
        .treatment((0..n).map(|i| i == 0))
        .outcome((0..n).map(|i| f64::from(u8::from(i % 4 == 0))))
        .column(Column::dense("sessions", (0..n).map(f64::from).collect()))
        .build()
        .unwrap();

    let err = SignificanceTester::default().test_outcome(&table).unwrap_err();
    assert!(matches!(err, Error::InsufficientData(_)));

    let config = PipelineConfig::default().with_uplift(UpliftConfig {
        base_learner: BaseLearner::Linear { ridge: 1e-6 },
        ..UpliftConfig::default()
    });
    let output = Pipeline::new(config).unwrap().run(&table).unwrap();
    assert_eq!(output.raw_test.status, EstimateStatus::InsufficientData);
    assert_eq!(output.adjusted_test.status, EstimateStatus::InsufficientData);
    assert_ne!(output.uplift.status, EstimateStatus::Ok);
    assert_eq!(output.run.status(), RunStatus::Degraded);
}

// ============================================================================
// Propensity matching
// ============================================================================

#[test]
fn test_matching_interval_covers_zero_without_effect() {
    let scenario = ContinuousScenario {
        n_users: 600,
        base_effect: 0.0,
        heterogeneity: 0.0,
        ..ContinuousScenario::default()
    };
    let matcher = PropensityMatcher::new(MatchingConfig::default(), 0.95).unwrap();
    let mut covered = 0;
    let draws = 60;
    for seed in 0..draws {
        let table = SyntheticExperiment::continuous(&scenario, 500 + seed)
            .unwrap()
            .table;
        let set = all_covariates(&table);
        let result = matcher.estimate(&table, &set).unwrap();
        if result.ate.ci_low <= 0.0 && 0.0 <= result.ate.ci_high {
            covered += 1;
        }
    }
    assert!(covered >= 51, "covered zero in {covered} of {draws} draws");
}

#[test]
fn test_identical_distributions_balance() {
    let n = 2_000;
    let mut rng = ChaCha8Rng::seed_from_u64(2024);
    let treatment: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.4)).collect();
    let sessions: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
    let outcome: Vec<f64> = sessions.iter().map(|x| 1.0 + 0.5 * x).collect();
    let table = AnalysisTable::builder(SchemaDescriptor::default())
        .user_ids((0..n).map(|i| format!("user_{i}")))
        .treatment(treatment)
        .outcome(outcome)
        .column(Column::dense("sessions", sessions))
        .build()
        .unwrap();
    let set = CovariateSet::from_names(&table, ["sessions"]).unwrap();

    let result = PropensityMatcher::new(MatchingConfig::default(), 0.95)
        .unwrap()
        .estimate(&table, &set)
        .unwrap();
    assert!(result.match_rate >= 0.95, "match rate {}", result.match_rate);
    for row in &result.balance {
        assert!(row.smd_after.abs() < 0.1, "{} SMD {}", row.covariate, row.smd_after);
    }
}

#[test]
fn test_matching_stable_under_row_permutation() {
    let scenario = ContinuousScenario {
        n_users: 500,
        confounding: 0.5,
        ..ContinuousScenario::default()
    };
    let table = SyntheticExperiment::continuous(&scenario, 31).unwrap().table;
    let set = all_covariates(&table);
    let matcher = PropensityMatcher::new(MatchingConfig::default(), 0.95).unwrap();

    let mut order: Vec<usize> = (0..table.num_rows()).collect();
    order.shuffle(&mut ChaCha8Rng::seed_from_u64(99));
    let shuffled = table.take_rows(&order).unwrap();

    let by_id = |t: &AnalysisTable| -> BTreeSet<(String, String)> {
        let result = matcher.estimate(t, &set).unwrap();
        result
            .pairs
            .iter()
            .map(|p| (t.user_ids()[p.treated].clone(), t.user_ids()[p.control].clone()))
            .collect()
    };
    let original = by_id(&table);
    assert!(!original.is_empty());
    assert_eq!(original, by_id(&shuffled));
}

/// Assignment almost fully determined by the sign of `x`
fn separated_table(n: usize, seed: u64) -> AnalysisTable {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-3.0..3.0)).collect();
    let treatment: Vec<bool> = x
        .iter()
        .map(|&v| rng.gen_bool(if v > 0.0 { 0.97 } else { 0.03 }))
        .collect();
    let outcome: Vec<f64> = x
        .iter()
        .zip(&treatment)
        .map(|(&v, &t)| v + if t { 1.0 } else { 0.0 } + rng.gen_range(-0.5..0.5))
        .collect();
    AnalysisTable::builder(SchemaDescriptor::default())
        .user_ids((0..n).map(|i| format!("user_{i}")))
        .treatment(treatment)
        .outcome(outcome)
        .column(Column::dense("x", x))
        .build()
        .unwrap()
}

fn strict_matching() -> MatchingConfig {
    MatchingConfig {
        caliper: Some(0.001),
        min_match_rate: 0.9,
        ..MatchingConfig::default()
    }
}

#[test]
fn test_separated_arms_report_poor_overlap() {
    let table = separated_table(1_000, 8);
    let set = CovariateSet::from_names(&table, ["x"]).unwrap();

    let err = PropensityMatcher::new(strict_matching(), 0.95)
        .unwrap()
        .estimate(&table, &set)
        .unwrap_err();
    match err {
        Error::Estimation(EstimationError::PoorOverlap { match_rate, minimum }) => {
            assert!(match_rate < minimum, "match rate {match_rate}");
            assert!((minimum - 0.9).abs() < 1e-12);
        }
        other => panic!("expected poor overlap, got {other}"),
    }
}

#[test]
fn test_pipeline_flags_poor_overlap_as_failed() {
    let table = separated_table(1_000, 8);
    let config = PipelineConfig::default()
        .with_matching(strict_matching())
        .with_uplift(UpliftConfig {
            base_learner: BaseLearner::Linear { ridge: 1e-6 },
            ..UpliftConfig::default()
        });

    let output = Pipeline::new(config).unwrap().run(&table).unwrap();
    assert_eq!(output.matching.status, EstimateStatus::Failed);
    assert!(output.matching.value.is_none());
    assert!(output
        .matching
        .message
        .as_deref()
        .unwrap()
        .contains("poor propensity overlap"));
    assert_eq!(output.raw_test.status, EstimateStatus::Ok);
    assert_eq!(output.run.status(), RunStatus::Degraded);
}

// ============================================================================
// CUPED retry on collinear covariates
// ============================================================================

#[test]
fn test_pipeline_retries_cuped_without_collinear_column() {
    let n = 600;
    let mut rng = ChaCha8Rng::seed_from_u64(4);
    let a: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
    let c: Vec<f64> = (0..n).map(|_| rng.sample(StandardNormal)).collect();
    let b: Vec<f64> = a.iter().map(|v| 2.0 * v + 1.0).collect();
    let treatment: Vec<bool> = (0..n).map(|_| rng.gen_bool(0.5)).collect();
    let outcome: Vec<f64> = (0..n)
        .map(|i| 1.0 + a[i] + 0.5 * c[i] + if treatment[i] { 0.3 } else { 0.0 })
        .collect();
    let table = AnalysisTable::builder(SchemaDescriptor::default())
        .user_ids((0..n).map(|i| format!("user_{i}")))
        .treatment(treatment)
        .outcome(outcome)
        .column(Column::dense("a", a))
        .column(Column::dense("b", b))
        .column(Column::dense("c", c))
        .build()
        .unwrap();
    let config = PipelineConfig::default().with_uplift(UpliftConfig {
        base_learner: BaseLearner::RandomForest(ForestParams {
            n_trees: 10,
            ..ForestParams::default()
        }),
        ..UpliftConfig::default()
    });

    let output = Pipeline::new(config).unwrap().run(&table).unwrap();
    assert_eq!(output.cuped.status, EstimateStatus::Warning);
    let message = output.cuped.message.as_deref().unwrap();
    assert!(message.contains("dropped collinear covariates"), "{message}");
    assert!(message.ends_with(": b"), "{message}");
    let cuped = output.cuped.value().unwrap();
    assert_eq!(cuped.coefficients.len(), 2);
    assert!(cuped.variance_reduction_pct > 50.0);
    assert_eq!(output.adjusted_test.status, EstimateStatus::Warning);
    assert!(output.adjusted_test.value.is_some());
    assert_eq!(output.run.status(), RunStatus::Degraded);
}

// ============================================================================
// X-Learner
// ============================================================================

fn uplift_correlation(base_learner: BaseLearner) -> f64 {
    let exp = SyntheticExperiment::continuous(&ContinuousScenario::default(), 77).unwrap();
    let set = all_covariates(&exp.table);
    let config = UpliftConfig {
        base_learner,
        ..UpliftConfig::default()
    };
    let result = XLearner::new(config, 10)
        .unwrap()
        .estimate(&exp.table, &set, None)
        .unwrap();
    let scores: Vec<f64> = result.scores.iter().map(|s| s.unwrap()).collect();
    stats::pearson(&scores, &exp.true_effects).unwrap()
}

#[test]
fn test_linear_uplift_tracks_true_effect() {
    let r = uplift_correlation(BaseLearner::Linear { ridge: 1e-6 });
    assert!(r > 0.5, "correlation {r}");
}

#[test]
fn test_forest_uplift_tracks_true_effect() {
    let r = uplift_correlation(BaseLearner::RandomForest(ForestParams {
        n_trees: 30,
        ..ForestParams::default()
    }));
    assert!(r > 0.3, "correlation {r}");
}
