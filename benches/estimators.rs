//! Estimator benchmarks
//!
//! Benchmarks for the three estimation paths on synthetic experiments:
//! - CUPED adjustment + z-test
//! - Propensity fit + greedy matching
//! - X-Learner with linear and forest base learners
//! - Full pipeline run

use causify::config::{BaseLearner, ForestParams, MatchingConfig, PipelineConfig, UpliftConfig};
use causify::covariates::{CovariateSelector, CovariateSet};
use causify::cuped::CupedAdjuster;
use causify::pipeline::Pipeline;
use causify::propensity::PropensityMatcher;
use causify::significance::SignificanceTester;
use causify::synthetic::{BinaryScenario, ContinuousScenario, SyntheticExperiment};
use causify::table::AnalysisTable;
use causify::uplift::XLearner;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn continuous_table(n_users: usize) -> (AnalysisTable, CovariateSet) {
    let scenario = ContinuousScenario {
        n_users,
        confounding: 0.5,
        ..ContinuousScenario::default()
    };
    let table = SyntheticExperiment::continuous(&scenario, 42).unwrap().table;
    let set = CovariateSelector::default().select(&table).unwrap().selected;
    (table, set)
}

/// Benchmark CUPED on the booking scenario (64 covariates)
fn bench_cuped(c: &mut Criterion) {
    let mut group = c.benchmark_group("cuped_z_test");

    for size in [1_000, 10_000, 50_000].iter() {
        let scenario = BinaryScenario {
            n_users: *size,
            ..BinaryScenario::default()
        };
        let table = SyntheticExperiment::binary(&scenario, 42).unwrap().table;
        let set = CovariateSelector::default().select(&table).unwrap().selected;
        let tester = SignificanceTester::default();

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| {
                let cuped = CupedAdjuster::new().adjust(&table, &set).unwrap();
                black_box(tester.test(&cuped.adjusted, table.treatment()).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark propensity matching with and without replacement
fn bench_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("propensity_matching");
    let (table, set) = continuous_table(20_000);

    for with_replacement in [false, true] {
        let config = MatchingConfig {
            with_replacement,
            k: 3,
            ..MatchingConfig::default()
        };
        let matcher = PropensityMatcher::new(config, 0.95).unwrap();
        let label = if with_replacement { "with_replacement" } else { "without_replacement" };
        group.bench_function(label, |b| {
            b.iter(|| black_box(matcher.estimate(&table, &set).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark the X-Learner per base learner
fn bench_xlearner(c: &mut Criterion) {
    let mut group = c.benchmark_group("xlearner");
    group.sample_size(10);
    let (table, set) = continuous_table(5_000);

    let learners = [
        ("linear", BaseLearner::Linear { ridge: 1e-6 }),
        (
            "forest_50",
            BaseLearner::RandomForest(ForestParams {
                n_trees: 50,
                ..ForestParams::default()
            }),
        ),
    ];
    for (label, base_learner) in learners {
        let learner = XLearner::new(
            UpliftConfig {
                base_learner,
                ..UpliftConfig::default()
            },
            42,
        )
        .unwrap();
        group.bench_function(label, |b| {
            b.iter(|| black_box(learner.estimate(&table, &set, None).unwrap()));
        });
    }

    group.finish();
}

/// Benchmark a full pipeline run
fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    group.sample_size(10);
    let (table, _) = continuous_table(5_000);
    let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();

    group.bench_function("default_config_5k", |b| {
        b.iter(|| black_box(pipeline.run(&table).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_cuped, bench_matching, bench_xlearner, bench_pipeline);
criterion_main!(benches);
