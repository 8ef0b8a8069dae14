//! CUPED variance reduction
//!
//! Regresses the outcome on mean-centered pre-treatment covariates and
//! subtracts the fitted, centered prediction:
//!
//! ```text
//! y_adj = y - (x - mean(x)) · θ
//! ```
//!
//! The adjustment has zero mean over the rows it is applied to, so the
//! adjusted outcome keeps the raw sample mean and only the variance drops.

use crate::covariates::CovariateSet;
use crate::error::EstimationError;
use crate::linalg::{self, Standardizer};
use crate::stats;
use crate::table::AnalysisTable;
use crate::{Error, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// Output of the adjustment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CupedResult {
    /// Adjusted outcome per table row (`None` where a covariate is missing)
    pub adjusted: Vec<Option<f64>>,
    /// Fitted coefficient per covariate, in original units
    pub coefficients: Vec<(String, f64)>,
    /// Covariates actually used
    pub covariates: CovariateSet,
    /// Complete rows the adjustment was applied to
    pub rows_used: usize,
    /// Rows the coefficients were estimated on
    pub estimation_rows: usize,
    /// Raw outcome mean over the rows used
    pub raw_mean: f64,
    /// Adjusted outcome mean over the rows used
    pub adjusted_mean: f64,
    /// Raw outcome sample variance
    pub raw_variance: f64,
    /// Adjusted outcome sample variance
    pub adjusted_variance: f64,
    /// `(raw - adjusted) / raw * 100`
    pub variance_reduction_pct: f64,
}

/// Regression-based CUPED adjuster
#[derive(Debug, Clone, Default)]
pub struct CupedAdjuster {
    holdout: Option<(f64, u64)>,
}

impl CupedAdjuster {
    /// Estimate coefficients on all complete rows
    #[must_use]
    pub const fn new() -> Self {
        Self { holdout: None }
    }

    /// Estimate coefficients on a seeded random `fraction` of complete rows
    /// and apply them to every row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for a fraction outside (0, 1).
    pub fn with_holdout(fraction: f64, seed: u64) -> Result<Self> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(Error::Configuration(format!(
                "hold-out fraction must lie in (0, 1), got {fraction}"
            )));
        }
        Ok(Self {
            holdout: Some((fraction, seed)),
        })
    }

    /// Fit and apply the adjustment.
    ///
    /// # Errors
    ///
    /// - `EstimationError::RankDeficient` naming the collinear covariates
    /// - `Error::InsufficientData` with fewer complete rows than
    ///   covariates + 2
    #[instrument(skip_all, fields(covariates = covariates.len()))]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn adjust(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
    ) -> Result<CupedResult> {
        let design = table.design_matrix(covariates)?;
        let n = design.rows.len();
        let p = covariates.len();
        let y: Vec<f64> = design.rows.iter().map(|&r| table.outcome()[r]).collect();

        let mut estimation: Vec<usize> = (0..n).collect();
        if let Some((fraction, seed)) = self.holdout {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            estimation.shuffle(&mut rng);
            estimation.truncate((n as f64 * fraction) as usize);
            estimation.sort_unstable();
        }
        if estimation.len() < p + 2 {
            return Err(Error::InsufficientData(format!(
                "CUPED needs at least {} complete rows for {p} covariates, got {}",
                p + 2,
                estimation.len()
            )));
        }

        // Fit on z-scored covariates so the pivot tolerance is scale-free
        let scaler = Standardizer::fit_rows(&design.x, &estimation);
        let z = scaler.transform(&design.x.select_rows(&estimation));
        let y_est: Vec<f64> = estimation.iter().map(|&i| y[i]).collect();
        let y_est_mean = stats::mean(&y_est);
        let y_centered: Vec<f64> = y_est.iter().map(|v| v - y_est_mean).collect();

        let theta_z = linalg::solve(&z.gram(), &z.t_mul_vec(&y_centered)).map_err(|s| {
            EstimationError::RankDeficient {
                columns: s
                    .columns
                    .iter()
                    .map(|&j| covariates.names()[j].clone())
                    .collect(),
            }
        })?;
        let theta: Vec<f64> = theta_z
            .iter()
            .zip(scaler.scales())
            .map(|(t, s)| t / s)
            .collect();

        // Center with full-sample means so the adjustment sums to zero
        let full_means: Vec<f64> = (0..p).map(|j| stats::mean(&design.x.column(j))).collect();
        let mut adjusted = vec![None; table.num_rows()];
        let mut adjusted_used = Vec::with_capacity(n);
        for (i, &row) in design.rows.iter().enumerate() {
            let shift: f64 = design
                .x
                .row(i)
                .iter()
                .zip(&full_means)
                .zip(&theta)
                .map(|((x, m), t)| (x - m) * t)
                .sum();
            let value = y[i] - shift;
            adjusted[row] = Some(value);
            adjusted_used.push(value);
        }

        let raw_variance = stats::variance(&y);
        let adjusted_variance = stats::variance(&adjusted_used);
        let variance_reduction_pct = if raw_variance > 0.0 {
            (raw_variance - adjusted_variance) / raw_variance * 100.0
        } else {
            0.0
        };
        info!(
            rows = n,
            estimation_rows = estimation.len(),
            variance_reduction_pct,
            "CUPED adjustment fitted"
        );

        Ok(CupedResult {
            adjusted,
            coefficients: covariates.names().iter().cloned().zip(theta).collect(),
            covariates: covariates.clone(),
            rows_used: n,
            estimation_rows: estimation.len(),
            raw_mean: stats::mean(&y),
            adjusted_mean: stats::mean(&adjusted_used),
            raw_variance,
            adjusted_variance,
            variance_reduction_pct,
        })
    }
}
