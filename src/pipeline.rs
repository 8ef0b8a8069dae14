//! End-to-end estimation run
//!
//! ```text
//! table ─▶ CovariateSelector ─▶ propensity model ─┬─▶ CUPED ─▶ z-tests
//!                                                 ├─▶ matching
//!                                                 └─▶ X-Learner
//!                                  all ─▶ DiagnosticsEngine ─▶ report / export
//! ```
//!
//! The three estimation paths share no data, so with the `parallel` feature
//! they run under `rayon::join`. Each path records its own
//! [`StageOutcome`]; only configuration errors abort the run.

use crate::config::PipelineConfig;
use crate::covariates::{CovariateSelector, CovariateSet, SelectionReport};
use crate::cuped::{CupedAdjuster, CupedResult};
use crate::diagnostics::{DiagnosticsEngine, DiagnosticsReport};
use crate::error::EstimationError;
use crate::propensity::{MatchingResult, PropensityMatcher, PropensityScores};
use crate::report::{RunRecord, RunStatus};
use crate::significance::{SignificanceTester, TestResult};
use crate::storage::StorageEngine;
use crate::table::AnalysisTable;
use crate::uplift::{UpliftResult, XLearner};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, instrument, warn};

/// Seed offset of the X-Learner sub-models (they use `seed + offset + 0..4`)
pub const UPLIFT_SEED_OFFSET: u64 = 10;

/// Status flag carried beside every estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    /// Estimated as configured
    Ok,
    /// Estimated after an automatic adjustment (see the message)
    Warning,
    /// An arm was too small for a valid estimate
    InsufficientData,
    /// The stage failed
    Failed,
}

impl EstimateStatus {
    /// Lowercase label used in exports
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::InsufficientData => "insufficient_data",
            Self::Failed => "failed",
        }
    }
}

/// Result of one pipeline stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome<T> {
    /// Status flag
    pub status: EstimateStatus,
    /// The estimate, if one was produced
    pub value: Option<T>,
    /// Failure or warning message
    pub message: Option<String>,
}

impl<T> StageOutcome<T> {
    /// Successful stage
    #[must_use]
    pub const fn ok(value: T) -> Self {
        Self {
            status: EstimateStatus::Ok,
            value: Some(value),
            message: None,
        }
    }

    /// Stage produced a value after an automatic adjustment
    #[must_use]
    pub fn warning(value: T, message: impl Into<String>) -> Self {
        Self {
            status: EstimateStatus::Warning,
            value: Some(value),
            message: Some(message.into()),
        }
    }

    /// Stage intentionally not run
    #[must_use]
    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            status: EstimateStatus::Ok,
            value: None,
            message: Some(message.into()),
        }
    }

    /// Failed stage; `InsufficientData` errors keep their own status
    #[must_use]
    pub fn failed(error: &Error) -> Self {
        let status = match error {
            Error::InsufficientData(_) => EstimateStatus::InsufficientData,
            _ => EstimateStatus::Failed,
        };
        Self {
            status,
            value: None,
            message: Some(error.to_string()),
        }
    }

    /// Convert a stage result, aborting on configuration errors.
    ///
    /// # Errors
    ///
    /// Returns the error itself if it is `Error::Configuration`.
    pub fn settle(result: Result<T>) -> Result<Self> {
        match result {
            Ok(value) => Ok(Self::ok(value)),
            Err(e @ Error::Configuration(_)) => Err(e),
            Err(e) => {
                warn!(error = %e, "stage failed");
                Ok(Self::failed(&e))
            }
        }
    }

    /// Borrow the value
    #[must_use]
    pub const fn value(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Same status and message, transformed value
    #[must_use]
    pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> StageOutcome<U> {
        StageOutcome {
            status: self.status,
            value: self.value.as_ref().map(f),
            message: self.message.clone(),
        }
    }

    /// Same status and message, no value
    fn carry<U>(&self) -> StageOutcome<U> {
        StageOutcome {
            status: self.status,
            value: None,
            message: self.message.clone(),
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Run metadata
    pub run: RunRecord,
    /// Configuration the run used
    pub config: PipelineConfig,
    /// Covariate selection
    pub selection: SelectionReport,
    /// CUPED adjustment
    pub cuped: StageOutcome<CupedResult>,
    /// z-test on the raw outcome
    pub raw_test: StageOutcome<TestResult>,
    /// z-test on the CUPED-adjusted outcome
    pub adjusted_test: StageOutcome<TestResult>,
    /// Propensity scores shared by matching and uplift
    pub propensity: StageOutcome<PropensityScores>,
    /// Propensity matching
    pub matching: StageOutcome<MatchingResult>,
    /// X-Learner uplift
    pub uplift: StageOutcome<UpliftResult>,
    /// Diagnostics
    pub diagnostics: DiagnosticsReport,
}

impl PipelineOutput {
    /// Whether every estimate is `Ok`
    #[must_use]
    pub fn all_ok(&self) -> bool {
        [
            self.cuped.status,
            self.raw_test.status,
            self.adjusted_test.status,
            self.matching.status,
            self.uplift.status,
        ]
        .iter()
        .all(|s| *s == EstimateStatus::Ok)
    }
}

type TestPath = (
    StageOutcome<CupedResult>,
    StageOutcome<TestResult>,
    StageOutcome<TestResult>,
);

/// Configured estimation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Pipeline with a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for an invalid configuration.
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load a Parquet snapshot as an analysis table.
    ///
    /// # Errors
    ///
    /// Returns a storage or schema error.
    pub fn load_table<P: AsRef<Path>>(&self, path: P) -> Result<AnalysisTable> {
        StorageEngine::load_parquet(path)?.analysis_table(&self.config.schema)
    }

    /// Run every stage on the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if no usable covariates remain or an
    /// option is invalid. Estimation failures are reported per stage.
    #[instrument(skip_all, fields(rows = table.num_rows(), seed = self.config.seed))]
    pub fn run(&self, table: &AnalysisTable) -> Result<PipelineOutput> {
        let mut run = RunRecord::builder(self.config.seed)
            .rows(table.num_rows())
            .build();
        run.start();

        let mut selector = CovariateSelector::new(self.config.covariates.max_missing_fraction)?;
        if let Some(candidates) = &self.config.covariates.candidates {
            selector = selector.with_candidates(candidates.iter().cloned());
        }
        let selection = selector.select(table)?;
        let covariates = &selection.selected;

        let propensity = StageOutcome::settle(PropensityScores::fit(
            table,
            covariates,
            &self.config.matching,
        ))?;

        let test_path = || self.test_path(table, covariates);
        let matching_path = || self.matching_path(table, &propensity);
        let uplift_path = || self.uplift_path(table, covariates, &propensity);

        #[cfg(feature = "parallel")]
        let (tests, (matching, uplift)) =
            rayon::join(test_path, || rayon::join(matching_path, uplift_path));
        #[cfg(not(feature = "parallel"))]
        let (tests, (matching, uplift)) = (test_path(), (matching_path(), uplift_path()));

        let (cuped, raw_test, adjusted_test) = tests?;
        let matching = matching?;
        let uplift = uplift?;

        let diagnostics = DiagnosticsEngine::new(self.config.diagnostics.clone())?.run(
            table,
            covariates,
            cuped.value(),
            matching.value(),
            uplift.value(),
        )?;

        let mut output = PipelineOutput {
            run,
            config: self.config.clone(),
            selection,
            cuped,
            raw_test,
            adjusted_test,
            propensity,
            matching,
            uplift,
            diagnostics,
        };
        let status = if output.all_ok() {
            RunStatus::Success
        } else {
            RunStatus::Degraded
        };
        output.run.complete(status);
        info!(status = ?status, "pipeline run complete");
        Ok(output)
    }

    fn test_path(&self, table: &AnalysisTable, covariates: &CovariateSet) -> Result<TestPath> {
        let tester = SignificanceTester::new(self.config.confidence_level)?;
        let raw_test = StageOutcome::settle(tester.test_outcome(table))?;

        if !self.config.cuped.enabled {
            let mut adjusted = raw_test.map(|t| *t);
            if adjusted.value.is_some() {
                adjusted.message = Some("CUPED disabled; raw outcome tested".to_string());
            }
            return Ok((StageOutcome::skipped("CUPED disabled"), raw_test, adjusted));
        }

        let cuped = self.run_cuped(table, covariates)?;
        let adjusted_test = match cuped.value() {
            Some(result) => {
                let mut outcome =
                    StageOutcome::settle(tester.test(&result.adjusted, table.treatment()))?;
                if outcome.value.is_some() && cuped.status == EstimateStatus::Warning {
                    outcome.status = EstimateStatus::Warning;
                    outcome.message.clone_from(&cuped.message);
                }
                outcome
            }
            None => match raw_test.value() {
                Some(raw) => StageOutcome::warning(*raw, "CUPED unavailable; raw outcome tested"),
                None => raw_test.carry(),
            },
        };
        Ok((cuped, raw_test, adjusted_test))
    }

    /// CUPED with one automatic retry that drops reported collinear columns
    fn run_cuped(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
    ) -> Result<StageOutcome<CupedResult>> {
        let adjuster = match self.config.cuped.holdout_fraction {
            Some(fraction) => CupedAdjuster::with_holdout(fraction, self.config.seed)?,
            None => CupedAdjuster::new(),
        };
        match adjuster.adjust(table, covariates) {
            Err(Error::Estimation(EstimationError::RankDeficient { columns }))
                if self.config.cuped.retry_on_collinearity =>
            {
                warn!(?columns, "retrying CUPED without collinear covariates");
                let retried = covariates
                    .without(&columns)
                    .and_then(|reduced| adjuster.adjust(table, &reduced));
                Ok(match StageOutcome::settle(retried)? {
                    StageOutcome {
                        value: Some(result),
                        ..
                    } => StageOutcome::warning(
                        result,
                        format!("dropped collinear covariates: {}", columns.join(", ")),
                    ),
                    failed => failed,
                })
            }
            other => StageOutcome::settle(other),
        }
    }

    fn matching_path(
        &self,
        table: &AnalysisTable,
        propensity: &StageOutcome<PropensityScores>,
    ) -> Result<StageOutcome<MatchingResult>> {
        let matcher =
            PropensityMatcher::new(self.config.matching.clone(), self.config.confidence_level)?;
        match propensity.value() {
            Some(scores) => StageOutcome::settle(matcher.estimate_with_scores(table, scores)),
            None => Ok(propensity.carry()),
        }
    }

    fn uplift_path(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
        propensity: &StageOutcome<PropensityScores>,
    ) -> Result<StageOutcome<UpliftResult>> {
        let learner = XLearner::new(
            self.config.uplift.clone(),
            self.config.seed.wrapping_add(UPLIFT_SEED_OFFSET),
        )?
        .with_propensity_config(self.config.matching.clone());
        match propensity.value() {
            Some(scores) => {
                StageOutcome::settle(learner.estimate(table, covariates, Some(scores)))
            }
            None => Ok(propensity.carry()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settle_maps_statuses() {
        let ok: StageOutcome<u8> = StageOutcome::settle(Ok(1)).unwrap();
        assert_eq!(ok.status, EstimateStatus::Ok);

        let thin: StageOutcome<u8> =
            StageOutcome::settle(Err(Error::InsufficientData("arm".into()))).unwrap();
        assert_eq!(thin.status, EstimateStatus::InsufficientData);
        assert!(thin.value.is_none());

        let failed: StageOutcome<u8> = StageOutcome::settle(Err(
            EstimationError::SingularMatrix("x".into()).into(),
        ))
        .unwrap();
        assert_eq!(failed.status, EstimateStatus::Failed);
        assert!(failed.message.unwrap().contains("singular"));

        assert!(StageOutcome::<u8>::settle(Err(Error::Configuration("bad".into()))).is_err());
    }

    #[test]
    fn test_map_keeps_status() {
        let warned = StageOutcome::warning(2_u8, "retried");
        let mapped = warned.map(|v| u16::from(*v) * 10);
        assert_eq!(mapped.status, EstimateStatus::Warning);
        assert_eq!(mapped.value, Some(20));
        assert_eq!(mapped.message.as_deref(), Some("retried"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = PipelineConfig::default().with_confidence_level(0.0);
        assert!(matches!(Pipeline::new(config), Err(Error::Configuration(_))));
    }
}
