//! Bagged regression trees
//!
//! Each tree draws its own bootstrap sample and feature subsets from a
//! ChaCha8 stream seeded with `seed + tree_index`, so the fitted forest does
//! not depend on whether trees are grown sequentially or in parallel.

use super::tree::{RegressionTree, TreeParams};
use super::Predictor;
use crate::config::ForestParams;
use crate::linalg::Matrix;
use crate::{Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Fitted random forest regressor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Fit `n_trees` trees on bootstrap samples of the rows of `x`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid `params`,
    /// `Error::InsufficientData` for an empty training set and `Error::Other`
    /// on a length mismatch.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn fit(params: &ForestParams, x: &Matrix, y: &[f64], seed: u64) -> Result<Self> {
        params.validate()?;
        if x.rows() != y.len() {
            return Err(Error::Other(format!(
                "{} training rows but {} targets",
                x.rows(),
                y.len()
            )));
        }
        if x.rows() == 0 || x.cols() == 0 {
            return Err(Error::InsufficientData(
                "random forest needs at least one row and one feature".to_string(),
            ));
        }

        let n = x.rows();
        let sample_size = ((n as f64 * params.sample_fraction).round() as usize).max(1);
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_leaf: params.min_samples_leaf,
            max_features: ((x.cols() as f64 * params.feature_fraction).ceil() as usize).max(1),
        };

        let grow = |t: usize| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(t as u64));
            let rows: Vec<usize> = (0..sample_size).map(|_| rng.gen_range(0..n)).collect();
            RegressionTree::fit(x, y, &rows, tree_params, &mut rng)
        };

        #[cfg(feature = "parallel")]
        let trees: Vec<RegressionTree> = (0..params.n_trees).into_par_iter().map(grow).collect();
        #[cfg(not(feature = "parallel"))]
        let trees: Vec<RegressionTree> = (0..params.n_trees).map(grow).collect();

        debug!(trees = trees.len(), rows = n, "random forest fitted");
        Ok(Self { trees })
    }

    /// Number of trees
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Predictor for RandomForest {
    #[allow(clippy::cast_precision_loss)]
    fn predict_row(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }
}
