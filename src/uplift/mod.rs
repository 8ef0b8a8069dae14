//! Heterogeneous treatment effects with the X-Learner
//!
//! Base learners plug in through [`Regressor`]; the fitted models expose
//! [`Predictor`].

pub mod forest;
pub mod linear;
pub mod tree;
pub mod xlearner;

pub use forest::RandomForest;
pub use linear::LinearModel;
pub use tree::RegressionTree;
pub use xlearner::{UpliftResult, XLearner, XLearnerModels};

use crate::config::{BaseLearner, ForestParams};
use crate::linalg::Matrix;
use crate::Result;
use serde::{Deserialize, Serialize};

/// A fitted model mapping a covariate row to a prediction
pub trait Predictor {
    /// Prediction for one row
    fn predict_row(&self, row: &[f64]) -> f64;

    /// Predictions for every row of a matrix
    fn predict(&self, x: &Matrix) -> Vec<f64> {
        (0..x.rows()).map(|i| self.predict_row(x.row(i))).collect()
    }
}

/// A learner that fits a regression model
pub trait Regressor {
    /// Fit on `x` (rows) and targets `y`; `seed` drives any randomness.
    ///
    /// # Errors
    ///
    /// Returns an error if the model cannot be fitted.
    fn fit(&self, x: &Matrix, y: &[f64], seed: u64) -> Result<FittedRegressor>;
}

/// Any fitted base learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FittedRegressor {
    /// Random forest
    Forest(RandomForest),
    /// Ridge regression
    Linear(LinearModel),
}

impl Predictor for FittedRegressor {
    fn predict_row(&self, row: &[f64]) -> f64 {
        match self {
            Self::Forest(m) => m.predict_row(row),
            Self::Linear(m) => m.predict_row(row),
        }
    }
}

impl Regressor for ForestParams {
    fn fit(&self, x: &Matrix, y: &[f64], seed: u64) -> Result<FittedRegressor> {
        RandomForest::fit(self, x, y, seed).map(FittedRegressor::Forest)
    }
}

impl Regressor for BaseLearner {
    fn fit(&self, x: &Matrix, y: &[f64], seed: u64) -> Result<FittedRegressor> {
        match self {
            Self::RandomForest(params) => params.fit(x, y, seed),
            Self::Linear { ridge } => LinearModel::fit(*ridge, x, y).map(FittedRegressor::Linear),
        }
    }
}
