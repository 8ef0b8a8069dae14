//! Run reporting
//!
//! This module turns a [`PipelineOutput`] into a serializable
//! [`RunReport`]: run metadata, the configuration used, every estimate
//! with its status flag, the diagnostics tables and a flat list of
//! headline metrics.
//!
//! ## Schema Overview
//!
//! ```text
//! RunRecord (1) ──< MetricRecord (N)
//!      │
//!      └── RunReport: tests, ATE, balance / calibration / randomization
//! ```
//!
//! Per-record outputs (scores, flags) go to the Parquet export instead,
//! see [`crate::export`].
//!
//! ## Usage
//!
//! ```rust
//! use causify::report::{MetricRecord, RunRecord, RunStatus};
//!
//! let mut run = RunRecord::builder(42).rows(1_000).build();
//! run.start();
//! let metric = MetricRecord::new(run.run_id(), "adjusted_test.p_value", 0.01);
//! run.complete(RunStatus::Success);
//! assert_eq!(metric.run_id(), run.run_id());
//! ```

mod metric_record;
mod run_record;

pub use metric_record::{MetricRecord, MetricRecordBuilder};
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};

use crate::config::PipelineConfig;
use crate::covariates::SelectionReport;
use crate::diagnostics::{
    BalanceDiagnostic, CalibrationBin, CupedSummary, RandomizationCheck, RankingPerformance,
};
use crate::pipeline::{EstimateStatus, PipelineOutput, StageOutcome};
use crate::propensity::{EffectEstimate, MatchingResult};
use crate::significance::TestResult;
use crate::uplift::UpliftResult;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Matching estimate without the per-row vectors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingSummary {
    /// ATE with confidence bounds
    pub ate: EffectEstimate,
    /// Treated units with a complete propensity score
    pub treated_total: usize,
    /// Treated units with at least one control
    pub matched_treated: usize,
    /// Treated units without an eligible control
    pub unmatched_treated: usize,
    /// `matched_treated / treated_total`
    pub match_rate: f64,
    /// Matched pairs
    pub pairs: usize,
}

impl From<&MatchingResult> for MatchingSummary {
    fn from(result: &MatchingResult) -> Self {
        Self {
            ate: result.ate,
            treated_total: result.treated_total,
            matched_treated: result.matched_treated,
            unmatched_treated: result.unmatched_treated,
            match_rate: result.match_rate,
            pairs: result.pairs.len(),
        }
    }
}

/// Uplift scores summarised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpliftSummary {
    /// Complete treated rows used for training
    pub treated_rows: usize,
    /// Complete control rows used for training
    pub control_rows: usize,
    /// Rows with a score
    pub scored: usize,
    /// Mean predicted effect over scored rows
    pub mean_score: f64,
}

impl From<&UpliftResult> for UpliftSummary {
    fn from(result: &UpliftResult) -> Self {
        let scores: Vec<f64> = result.scored().into_iter().map(|(_, s)| s).collect();
        Self {
            treated_rows: result.treated_rows,
            control_rows: result.control_rows,
            scored: scores.len(),
            mean_score: crate::stats::mean(&scores),
        }
    }
}

/// JSON report of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Run metadata
    pub run: RunRecord,
    /// Configuration the run used
    pub config: PipelineConfig,
    /// Covariate selection
    pub selection: SelectionReport,
    /// CUPED variance reduction
    pub cuped: StageOutcome<CupedSummary>,
    /// z-test on the raw outcome
    pub raw_test: StageOutcome<TestResult>,
    /// z-test on the adjusted outcome
    pub adjusted_test: StageOutcome<TestResult>,
    /// Propensity matching ATE
    pub matching: StageOutcome<MatchingSummary>,
    /// X-Learner summary
    pub uplift: StageOutcome<UpliftSummary>,
    /// Post-matching balance
    pub balance: Vec<BalanceDiagnostic>,
    /// Uplift calibration bins
    pub calibration: Vec<CalibrationBin>,
    /// Uplift ranking performance
    pub ranking: Option<RankingPerformance>,
    /// Score above which records are flagged high uplift
    pub high_uplift_threshold: Option<f64>,
    /// Randomization check
    pub randomization: RandomizationCheck,
    /// Headline metrics
    pub metrics: Vec<MetricRecord>,
}

impl RunReport {
    /// Summarise a pipeline output.
    #[must_use]
    pub fn from_output(output: &PipelineOutput) -> Self {
        let diagnostics = &output.diagnostics;
        let mut report = Self {
            run: output.run.clone(),
            config: output.config.clone(),
            selection: output.selection.clone(),
            cuped: output.cuped.map(|c| CupedSummary::from(c)),
            raw_test: output.raw_test.clone(),
            adjusted_test: output.adjusted_test.clone(),
            matching: output.matching.map(|m| MatchingSummary::from(m)),
            uplift: output.uplift.map(|u| UpliftSummary::from(u)),
            balance: diagnostics.balance.clone(),
            calibration: diagnostics.calibration.clone(),
            ranking: diagnostics.ranking,
            high_uplift_threshold: diagnostics.segments.as_ref().and_then(|s| s.threshold),
            randomization: diagnostics.randomization.clone(),
            metrics: Vec::new(),
        };
        report.metrics = report.headline_metrics();
        report
    }

    fn headline_metrics(&self) -> Vec<MetricRecord> {
        let run_id = self.run.run_id();
        let mut metrics = Vec::new();
        let mut push = |key: &str, value: f64, status: EstimateStatus| {
            metrics.push(MetricRecord::builder(run_id, key, value).status(status).build());
        };

        let tests = [
            ("raw_test", &self.raw_test),
            ("adjusted_test", &self.adjusted_test),
        ];
        for (prefix, test) in tests {
            if let Some(t) = test.value() {
                push(&format!("{prefix}.effect"), t.effect, test.status);
                push(&format!("{prefix}.std_error"), t.std_error, test.status);
                push(&format!("{prefix}.p_value"), t.p_value, test.status);
            }
        }
        if let Some(c) = self.cuped.value() {
            push("cuped.variance_reduction_pct", c.variance_reduction_pct, self.cuped.status);
        }
        if let Some(m) = self.matching.value() {
            push("matching.ate", m.ate.estimate, self.matching.status);
            push("matching.p_value", m.ate.p_value, self.matching.status);
            push("matching.match_rate", m.match_rate, self.matching.status);
        }
        if let Some(u) = self.uplift.value() {
            push("uplift.mean_score", u.mean_score, self.uplift.status);
        }
        if let Some(r) = self.ranking {
            push("uplift.ranking_score", r.score, self.uplift.status);
        }
        push(
            "randomization.srm_p_value",
            self.randomization.srm_p_value,
            EstimateStatus::Ok,
        );
        metrics
    }

    /// Look up a headline metric by key
    #[must_use]
    pub fn metric(&self, key: &str) -> Option<&MetricRecord> {
        self.metrics.iter().find(|m| m.key() == key)
    }

    /// Serialize as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a report written by [`RunReport::write_json`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` for malformed input.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the report as JSON.
    ///
    /// # Errors
    ///
    /// Returns an IO or JSON error.
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path.as_ref(), self.to_json()?)?;
        info!(path = %path.as_ref().display(), run_id = self.run.run_id(), "wrote run report");
        Ok(())
    }
}

impl From<&PipelineOutput> for RunReport {
    fn from(output: &PipelineOutput) -> Self {
        Self::from_output(output)
    }
}
