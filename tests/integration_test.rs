//! End-to-end test: Parquet snapshot in, export table and run report out
//!
//! Tests the complete pipeline:
//! 1. Write an experiment snapshot to Parquet
//! 2. Load it against a schema descriptor
//! 3. Run every estimation path
//! 4. Write the per-user export and the JSON report

use arrow::array::{Array, Float64Array, Int32Array, Int64Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use causify::config::{BaseLearner, ForestParams, PipelineConfig, UpliftConfig};
use causify::covariates::DropReason;
use causify::export;
use causify::pipeline::{EstimateStatus, Pipeline};
use causify::report::{RunReport, RunStatus};
use causify::schema::SchemaDescriptor;
use causify::storage::StorageEngine;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const NUM_ROWS: usize = 1_200;

/// Create a booking snapshot: keys, two covariates, a categorical field,
/// a post-treatment field and a timestamp
#[allow(clippy::cast_possible_truncation)]
fn create_test_parquet<P: AsRef<Path>>(path: P) -> Result<(), Box<dyn std::error::Error>> {
    let schema = Schema::new(vec![
        Field::new("user_id", DataType::Utf8, false),
        Field::new("treatment", DataType::Int32, false),
        Field::new("booking", DataType::Int32, false),
        Field::new("sessions", DataType::Float64, true),
        Field::new("nights", DataType::Int64, false),
        Field::new("device", DataType::Utf8, false),
        Field::new("booking_value", DataType::Float64, false),
        Field::new("signup_ts", DataType::Int64, false),
    ]);

    let mut rng = ChaCha8Rng::seed_from_u64(17);
    let mut treatment = Vec::with_capacity(NUM_ROWS);
    let mut booking = Vec::with_capacity(NUM_ROWS);
    let mut sessions = Vec::with_capacity(NUM_ROWS);
    let mut nights = Vec::with_capacity(NUM_ROWS);
    let mut value = Vec::with_capacity(NUM_ROWS);
    for i in 0..NUM_ROWS {
        let latent: f64 = rng.sample(StandardNormal);
        let treated = rng.gen_bool(0.5);
        let p = (0.2 + 0.1 * latent + if treated { 0.05 } else { 0.0 }).clamp(0.01, 0.99);
        let booked = rng.gen_bool(p);
        treatment.push(i32::from(treated));
        booking.push(i32::from(booked));
        // 1% missing sessions
        sessions.push((i % 100 != 0).then(|| 5.0 + 2.0 * latent + rng.gen_range(-0.5..0.5)));
        nights.push(rng.gen_range(0..10_i64));
        value.push(if booked { rng.gen_range(50.0..500.0) } else { 0.0 });
    }

    let batch = RecordBatch::try_new(
        Arc::new(schema.clone()),
        vec![
            Arc::new(StringArray::from_iter_values(
                (0..NUM_ROWS).map(|i| format!("user_{i:05}")),
            )),
            Arc::new(Int32Array::from(treatment)),
            Arc::new(Int32Array::from(booking)),
            Arc::new(Float64Array::from(sessions)),
            Arc::new(Int64Array::from(nights)),
            Arc::new(StringArray::from_iter_values(
                (0..NUM_ROWS).map(|i| if i % 3 == 0 { "mobile" } else { "desktop" }),
            )),
            Arc::new(Float64Array::from(value)),
            Arc::new(Int64Array::from_iter_values(
                (0..NUM_ROWS).map(|i| 1_700_000_000 + i as i64),
            )),
        ],
    )?;

    let file = File::create(path.as_ref())?;
    let props = WriterProperties::builder()
        .set_max_row_group_size(500) // 3 row groups
        .build();
    let mut writer = ArrowWriter::try_new(file, Arc::new(schema), Some(props))?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(())
}

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("causify_{}_{name}", std::process::id()))
}

fn pipeline_config() -> PipelineConfig {
    let schema = SchemaDescriptor::default()
        .with_post_treatment(["booking_value"])
        .with_timestamps(["signup_ts"]);
    PipelineConfig::default()
        .with_schema(schema)
        .with_uplift(UpliftConfig {
            base_learner: BaseLearner::RandomForest(ForestParams {
                n_trees: 20,
                ..ForestParams::default()
            }),
            ..UpliftConfig::default()
        })
}

#[test]
fn test_pipeline_end_to_end() {
    let input = temp_path("snapshot.parquet");
    create_test_parquet(&input).expect("Failed to create test Parquet file");

    let pipeline = Pipeline::new(pipeline_config()).unwrap();
    let table = pipeline.load_table(&input).expect("Failed to load table");
    assert_eq!(table.num_rows(), NUM_ROWS);
    // device is categorical and skipped
    assert!(table.column("device").is_none());

    let output = pipeline.run(&table).expect("Pipeline run failed");

    // Reserved fields never become covariates
    let selected = output.selection.selected.names();
    assert_eq!(selected, &["sessions".to_string(), "nights".to_string()][..]);
    assert!(output
        .selection
        .dropped
        .contains(&("booking_value".to_string(), DropReason::Reserved)));
    assert!(output
        .selection
        .dropped
        .contains(&("signup_ts".to_string(), DropReason::Reserved)));

    assert_eq!(output.raw_test.status, EstimateStatus::Ok);
    assert_eq!(output.cuped.status, EstimateStatus::Ok);
    assert_eq!(output.matching.status, EstimateStatus::Ok);
    assert_eq!(output.uplift.status, EstimateStatus::Ok);
    assert!(output.all_ok());
    assert_eq!(output.run.status(), RunStatus::Success);
    assert!(output.run.ended_at().is_some());

    let cuped = output.cuped.value().unwrap();
    assert_eq!(cuped.rows_used, NUM_ROWS - NUM_ROWS / 100);
    assert!((cuped.adjusted_mean - cuped.raw_mean).abs() < 1e-9);
    let adjusted = output.adjusted_test.value().unwrap();
    let raw = output.raw_test.value().unwrap();
    assert!(adjusted.std_error <= raw.std_error);

    let matching = output.matching.value().unwrap();
    assert!(matching.match_rate >= 0.5);
    assert!(matching.ate.ci_low <= matching.ate.estimate);
    assert!(matching.ate.estimate <= matching.ate.ci_high);

    let diagnostics = &output.diagnostics;
    assert_eq!(diagnostics.balance.len(), 2);
    assert_eq!(diagnostics.calibration.len(), 10);
    assert_eq!(
        diagnostics.calibration.iter().map(|b| b.count).sum::<usize>(),
        NUM_ROWS - NUM_ROWS / 100
    );
    let randomization = &diagnostics.randomization;
    assert_eq!(randomization.treated + randomization.control, NUM_ROWS);
    assert_eq!(randomization.covariates.len(), 2);

    // Export
    let export_file = temp_path("export.parquet");
    export::write_parquet(&table, &output, &export_file).expect("Failed to write export");
    let exported = StorageEngine::load_parquet(&export_file).expect("Failed to read export");
    assert_eq!(exported.num_rows(), NUM_ROWS);
    let batch = &exported.batches()[0];
    for name in export::OUTPUT_COLUMNS {
        assert!(batch.schema().field_with_name(name).is_ok(), "missing {name}");
    }
    let deciles = batch
        .column_by_name("uplift_decile")
        .unwrap()
        .as_any()
        .downcast_ref::<UInt64Array>()
        .unwrap();
    // Row 0 has missing sessions, so it has no decile
    assert!(deciles.is_null(0));
    assert!((1..=10).contains(&deciles.value(1)));

    // Report
    let report = RunReport::from_output(&output);
    let report_file = temp_path("report.json");
    report.write_json(&report_file).expect("Failed to write report");
    let text = std::fs::read_to_string(&report_file).unwrap();
    let parsed = RunReport::from_json_str(&text).expect("Failed to parse report");
    assert_eq!(parsed.run.run_id(), output.run.run_id());
    assert_eq!(parsed.run.status(), RunStatus::Success);
    assert_eq!(parsed.metrics.len(), report.metrics.len());
    assert!(parsed.metric("adjusted_test.p_value").is_some());
    assert!(parsed.metric("matching.ate").is_some());
    assert!(parsed.metric("uplift.ranking_score").is_some());

    for path in [input, export_file, report_file] {
        let _ = std::fs::remove_file(path);
    }
}

#[test]
fn test_pipeline_is_reproducible() {
    let input = temp_path("repro.parquet");
    create_test_parquet(&input).unwrap();
    let pipeline = Pipeline::new(pipeline_config()).unwrap();
    let table = pipeline.load_table(&input).unwrap();

    let first = pipeline.run(&table).unwrap();
    let second = pipeline.run(&table).unwrap();
    assert_eq!(first.uplift.value, second.uplift.value);
    assert_eq!(first.matching.value, second.matching.value);
    assert_eq!(first.cuped.value, second.cuped.value);
    let _ = std::fs::remove_file(input);
}

#[test]
fn test_disabled_cuped_tests_raw_outcome() {
    let input = temp_path("no_cuped.parquet");
    create_test_parquet(&input).unwrap();
    let mut config = pipeline_config();
    config.cuped.enabled = false;
    let pipeline = Pipeline::new(config).unwrap();
    let table = pipeline.load_table(&input).unwrap();

    let output = pipeline.run(&table).unwrap();
    assert!(output.cuped.value.is_none());
    assert_eq!(output.cuped.status, EstimateStatus::Ok);
    assert_eq!(output.adjusted_test.value, output.raw_test.value);
    assert!(output.diagnostics.cuped.is_none());
    let _ = std::fs::remove_file(input);
}

#[test]
fn test_missing_key_column_rejected() {
    let input = temp_path("bad_schema.parquet");
    create_test_parquet(&input).unwrap();
    let config = PipelineConfig::default()
        .with_schema(SchemaDescriptor::new("user_id", "variant", "booking"));
    let err = Pipeline::new(config).unwrap().load_table(&input).unwrap_err();
    assert!(err.to_string().contains("variant"));
    let _ = std::fs::remove_file(input);
}
