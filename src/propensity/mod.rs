//! Propensity scores and nearest-neighbor matching
//!
//! The propensity model is fitted once and its scores are shared by the
//! matcher and the X-Learner combination step.

pub mod logistic;
pub mod matching;

pub use logistic::LogisticModel;
pub use matching::{
    BalanceRow, EffectEstimate, MatchedPair, MatchingResult, PropensityMatcher,
};

use crate::config::MatchingConfig;
use crate::covariates::CovariateSet;
use crate::table::AnalysisTable;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Fitted `P(treated | covariates)` for every table row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropensityScores {
    /// Score per table row, `None` where a covariate is missing
    pub scores: Vec<Option<f64>>,
    /// The fitted model
    pub model: LogisticModel,
    /// Covariates the model was fitted on
    pub covariates: CovariateSet,
}

impl PropensityScores {
    /// Fit a regularised logistic model of treatment on the covariates.
    ///
    /// # Errors
    ///
    /// - `Error::Configuration` for an empty covariate set
    /// - `Error::InsufficientData` if an arm has no complete rows
    /// - `Error::Estimation` if the model does not converge
    #[instrument(skip_all, fields(covariates = covariates.len()))]
    pub fn fit(
        table: &AnalysisTable,
        covariates: &CovariateSet,
        config: &MatchingConfig,
    ) -> Result<Self> {
        if covariates.is_empty() {
            return Err(Error::Configuration(
                "propensity model needs at least one covariate".to_string(),
            ));
        }
        let design = table.design_matrix(covariates)?;
        let labels: Vec<bool> = design.rows.iter().map(|&r| table.treatment()[r]).collect();
        let model = LogisticModel::fit(
            &design.x,
            &labels,
            config.regularization,
            config.max_iterations,
            config.tolerance,
        )?;

        let mut scores = vec![None; table.num_rows()];
        for (p, &row) in model.predict(&design.x).into_iter().zip(&design.rows) {
            scores[row] = Some(p);
        }
        info!(
            rows = design.rows.len(),
            iterations = model.iterations(),
            "propensity model fitted"
        );
        Ok(Self {
            scores,
            model,
            covariates: covariates.clone(),
        })
    }

    /// Score of a table row
    #[must_use]
    pub fn get(&self, row: usize) -> Option<f64> {
        self.scores.get(row).copied().flatten()
    }

    /// Number of table rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Whether there are no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}
