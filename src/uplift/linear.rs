//! Ridge-regularised least squares

use super::Predictor;
use crate::error::EstimationError;
use crate::linalg::{self, Matrix, Standardizer};
use crate::stats;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Fitted linear model on standardized covariates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    standardizer: Standardizer,
    intercept: f64,
    slopes: Vec<f64>,
}

impl LinearModel {
    /// Solve `(ZᵀZ + λI) β = Zᵀ(y − ȳ)` on z-scored covariates; the
    /// intercept is the target mean.
    ///
    /// # Errors
    ///
    /// - `Error::InsufficientData` for an empty training set
    /// - `EstimationError::SingularMatrix` if the system is singular
    ///   (only possible with `ridge = 0`)
    pub fn fit(ridge: f64, x: &Matrix, y: &[f64]) -> Result<Self> {
        if x.rows() == 0 || x.rows() != y.len() {
            return Err(Error::InsufficientData(format!(
                "linear model needs matching, non-empty rows ({} rows, {} targets)",
                x.rows(),
                y.len()
            )));
        }
        let standardizer = Standardizer::fit(x);
        let z = standardizer.transform(x);
        let intercept = stats::mean(y);
        let centered: Vec<f64> = y.iter().map(|v| v - intercept).collect();

        let mut gram = z.gram();
        gram.add_to_diagonal(ridge, 0);
        let slopes = linalg::solve(&gram, &z.t_mul_vec(&centered))
            .map_err(|_| EstimationError::SingularMatrix("linear base learner".to_string()))?;
        Ok(Self {
            standardizer,
            intercept,
            slopes,
        })
    }
}

impl Predictor for LinearModel {
    fn predict_row(&self, row: &[f64]) -> f64 {
        self.intercept + linalg::dot(&self.slopes, &self.standardizer.transform_row(row))
    }
}
