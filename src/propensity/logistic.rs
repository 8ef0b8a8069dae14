//! L2-regularised logistic regression fitted by Newton-Raphson (IRLS)
//!
//! Covariates are z-scored before fitting; the penalty `‖β‖² / (2C)` applies
//! to slopes only, never to the intercept.

use crate::error::EstimationError;
use crate::linalg::{self, Matrix, Standardizer};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Smallest IRLS weight, keeps the Hessian positive definite when
/// predictions saturate
const MIN_WEIGHT: f64 = 1e-10;

/// Numerically stable logistic function
#[must_use]
pub fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// Fitted logistic model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    standardizer: Standardizer,
    /// Intercept followed by one slope per (standardized) covariate
    coefficients: Vec<f64>,
    iterations: usize,
}

impl LogisticModel {
    /// Fit `P(label = 1 | x)`.
    ///
    /// `regularization` is the inverse penalty strength `C`.
    ///
    /// # Errors
    ///
    /// - `Error::InsufficientData` if either class is absent
    /// - `EstimationError::NonConvergence` if the step does not fall below
    ///   `tolerance` within `max_iterations`
    /// - `EstimationError::SingularMatrix` if the Newton system is singular
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(
        x: &Matrix,
        labels: &[bool],
        regularization: f64,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<Self> {
        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == labels.len() {
            return Err(Error::InsufficientData(format!(
                "logistic model needs both classes ({positives} of {} positive)",
                labels.len()
            )));
        }

        let standardizer = Standardizer::fit(x);
        let design = standardizer.transform(x).with_intercept();
        let y: Vec<f64> = labels.iter().map(|&l| if l { 1.0 } else { 0.0 }).collect();
        let penalty = 1.0 / regularization;

        let base_rate = positives as f64 / labels.len() as f64;
        let mut beta = vec![0.0; design.cols()];
        beta[0] = (base_rate / (1.0 - base_rate)).ln();

        for iteration in 1..=max_iterations {
            let p: Vec<f64> = design.mul_vec(&beta).into_iter().map(sigmoid).collect();
            let weights: Vec<f64> = p.iter().map(|p| (p * (1.0 - p)).max(MIN_WEIGHT)).collect();
            let residual: Vec<f64> = y.iter().zip(&p).map(|(y, p)| y - p).collect();

            let mut gradient = design.t_mul_vec(&residual);
            for (g, b) in gradient.iter_mut().zip(&beta).skip(1) {
                *g -= penalty * b;
            }
            let mut hessian = design.weighted_gram(Some(&weights));
            hessian.add_to_diagonal(penalty, 1);

            let step = linalg::solve(&hessian, &gradient).map_err(|_| {
                EstimationError::SingularMatrix("logistic propensity Hessian".to_string())
            })?;
            let max_step = step.iter().fold(0.0_f64, |m, s| m.max(s.abs()));
            if !max_step.is_finite() {
                break;
            }
            for (b, s) in beta.iter_mut().zip(&step) {
                *b += s;
            }
            if max_step < tolerance {
                debug!(iteration, "logistic model converged");
                return Ok(Self {
                    standardizer,
                    coefficients: beta,
                    iterations: iteration,
                });
            }
        }

        Err(EstimationError::NonConvergence {
            model: "logistic propensity model".to_string(),
            iterations: max_iterations,
        }
        .into())
    }

    /// Probability for one raw (unstandardized) covariate row
    #[must_use]
    pub fn predict_row(&self, row: &[f64]) -> f64 {
        let z = self.standardizer.transform_row(row);
        sigmoid(self.coefficients[0] + linalg::dot(&self.coefficients[1..], &z))
    }

    /// Probabilities for every row of a raw covariate matrix
    #[must_use]
    pub fn predict(&self, x: &Matrix) -> Vec<f64> {
        (0..x.rows()).map(|i| self.predict_row(x.row(i))).collect()
    }

    /// Intercept on the standardized scale
    #[must_use]
    pub fn intercept(&self) -> f64 {
        self.coefficients[0]
    }

    /// Slopes on the standardized scale
    #[must_use]
    pub fn slopes(&self) -> &[f64] {
        &self.coefficients[1..]
    }

    /// Newton iterations used
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }
}
