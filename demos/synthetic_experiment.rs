//! Synthetic Experiment Example
//!
//! Generates a booking experiment with a known heterogeneous effect, runs
//! every estimation path, and writes the export table and run report.
//!
//! Run with: cargo run --example synthetic_experiment
//! Optional: RUST_LOG=causify=debug, or pass a JSON config path as the
//! first argument.

use anyhow::Context;
use causify::config::PipelineConfig;
use causify::export;
use causify::pipeline::Pipeline;
use causify::report::RunReport;
use causify::stats;
use causify::synthetic::{ContinuousScenario, SyntheticExperiment};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    println!("=== Causify Synthetic Experiment ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => PipelineConfig::from_json_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => PipelineConfig::default(),
    };

    // -------------------------------------------------------------------------
    // 1. Generate data
    // -------------------------------------------------------------------------
    let scenario = ContinuousScenario {
        n_users: 5_000,
        confounding: 0.4,
        missing_fraction: 0.01,
        ..ContinuousScenario::default()
    };
    let experiment = SyntheticExperiment::continuous(&scenario, config.seed)?;
    let table = &experiment.table;
    let (treated, control) = table.arm_sizes();
    println!("1. Generated {} users ({treated} treated, {control} control)", table.num_rows());
    println!(
        "   True average effect: {:.3}",
        stats::mean(&experiment.true_effects)
    );

    // -------------------------------------------------------------------------
    // 2. Run the pipeline
    // -------------------------------------------------------------------------
    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run(table)?;
    println!("\n2. Run {} finished: {:?}", output.run.run_id(), output.run.status());
    println!("   Covariates: {}", output.selection.selected.names().join(", "));

    for (label, test) in [("Raw", &output.raw_test), ("CUPED", &output.adjusted_test)] {
        match test.value() {
            Some(t) => println!(
                "   {label:<6} effect {:+.4} [{:+.4}, {:+.4}] p={:.4} ({})",
                t.effect,
                t.ci_low,
                t.ci_high,
                t.p_value,
                test.status.as_str()
            ),
            None => println!("   {label:<6} {}", test.message.as_deref().unwrap_or("no estimate")),
        }
    }
    if let Some(m) = output.matching.value() {
        println!(
            "   PSM    ATE    {:+.4} [{:+.4}, {:+.4}] matched {}/{}",
            m.ate.estimate, m.ate.ci_low, m.ate.ci_high, m.matched_treated, m.treated_total
        );
    }

    // -------------------------------------------------------------------------
    // 3. Diagnostics
    // -------------------------------------------------------------------------
    println!("\n3. Diagnostics");
    for row in &output.diagnostics.balance {
        println!(
            "   {:<8} SMD before {:+.3} after {:+.3} {}",
            row.covariate,
            row.smd_before,
            row.smd_after,
            if row.balanced { "ok" } else { "IMBALANCED" }
        );
    }
    for bin in &output.diagnostics.calibration {
        println!(
            "   decile {:>2}: predicted {:+.3} observed {}",
            bin.bin,
            bin.mean_predicted,
            bin.observed_effect
                .map_or_else(|| "n/a".to_string(), |e| format!("{e:+.3}"))
        );
    }
    if let Some(ranking) = output.diagnostics.ranking {
        println!("   Ranking score: {:.3}", ranking.score);
    }
    if let Some(uplift) = output.uplift.value() {
        let (scores, truth): (Vec<f64>, Vec<f64>) = uplift
            .scored()
            .into_iter()
            .map(|(row, s)| (s, experiment.true_effects[row]))
            .unzip();
        if let Some(r) = stats::pearson(&scores, &truth) {
            println!("   Correlation with true effect: {r:.3}");
        }
    }

    // -------------------------------------------------------------------------
    // 4. Write outputs
    // -------------------------------------------------------------------------
    let dir = std::env::temp_dir();
    let export_path = dir.join("causify_users.parquet");
    let report_path = dir.join("causify_report.json");
    export::write_parquet(table, &output, &export_path).context("writing export")?;
    RunReport::from_output(&output)
        .write_json(&report_path)
        .context("writing report")?;
    println!("\n4. Wrote {}", export_path.display());
    println!("   Wrote {}", report_path.display());

    Ok(())
}
