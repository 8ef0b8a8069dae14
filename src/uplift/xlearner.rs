//! X-Learner (Künzel et al., 2019)
//!
//! 1. Outcome models: μ₀ on control rows, μ₁ on treated rows.
//! 2. Imputed effects: `D¹ = y − μ₀(x)` for treated, `D⁰ = μ₁(x) − y` for
//!    control.
//! 3. Effect models: τ₁ on `D¹`, τ₀ on `D⁰`.
//! 4. Combination: `τ(x) = g(x)·τ₀(x) + (1 − g(x))·τ₁(x)` with the clipped
//!    propensity `g`.

use super::{FittedRegressor, Predictor, Regressor};
use crate::config::{MatchingConfig, UpliftConfig};
use crate::covariates::CovariateSet;
use crate::error::EstimationError;
use crate::propensity::PropensityScores;
use crate::table::{AnalysisTable, Arm};
use crate::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

/// The four fitted sub-models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XLearnerModels {
    /// Control outcome model
    pub mu0: FittedRegressor,
    /// Treated outcome model
    pub mu1: FittedRegressor,
    /// Effect model fitted on control imputed effects
    pub tau0: FittedRegressor,
    /// Effect model fitted on treated imputed effects
    pub tau1: FittedRegressor,
}

impl XLearnerModels {
    /// Combined effect for one covariate row and propensity `g`
    #[must_use]
    pub fn effect(&self, row: &[f64], g: f64) -> f64 {
        g * self.tau0.predict_row(row) + (1.0 - g) * self.tau1.predict_row(row)
    }
}

/// Per-record uplift scores
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpliftResult {
    /// Estimated individual effect per table row (`None` if incomplete)
    pub scores: Vec<Option<f64>>,
    /// Scores clipped to `±score_clip` for display
    pub clipped: Vec<Option<f64>>,
    /// Clipped propensity used in the combination step
    pub propensity: Vec<Option<f64>>,
    /// Complete treated rows used for training
    pub treated_rows: usize,
    /// Complete control rows used for training
    pub control_rows: usize,
    /// Fitted sub-models
    #[serde(skip_serializing)]
    pub models: XLearnerModels,
}

impl UpliftResult {
    /// `(table row, score)` for every scored row
    #[must_use]
    pub fn scored(&self) -> Vec<(usize, f64)> {
        self.scores
            .iter()
            .enumerate()
            .filter_map(|(row, s)| s.map(|s| (row, s)))
            .collect()
    }
}

/// X-Learner estimator
#[derive(Debug, Clone)]
pub struct XLearner {
    config: UpliftConfig,
    propensity_config: MatchingConfig,
    seed: u64,
}

impl XLearner {
    /// Estimator with validated options; sub-model `i` is seeded `seed + i`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid options.
    pub fn new(config: UpliftConfig, seed: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            propensity_config: MatchingConfig::default(),
            seed,
        })
    }

    /// Logistic-model options used when propensity scores must be refit
    #[must_use]
    pub fn with_propensity_config(mut self, config: MatchingConfig) -> Self {
        self.propensity_config = config;
        self
    }

    /// Fit the four sub-models and score every complete row.
    ///
    /// `propensity` is reused when it was fitted on the same covariates;
    /// otherwise the propensity model is refit.
    ///
    /// # Errors
    ///
    /// - `EstimationError::ArmTooSmall` if an arm has fewer than
    ///   `min_arm_size` complete rows
    /// - any error from the base learner or the propensity model
    #[instrument(skip_all, fields(covariates = covariates.len()))]
    pub fn estimate(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
        propensity: Option<&PropensityScores>,
    ) -> Result<UpliftResult> {
        let design = table.design_matrix(covariates)?;
        let (mut treated, mut control) = (Vec::new(), Vec::new());
        for (i, &row) in design.rows.iter().enumerate() {
            if table.treatment()[row] {
                treated.push(i);
            } else {
                control.push(i);
            }
        }
        for (arm, size) in [(Arm::Treated, treated.len()), (Arm::Control, control.len())] {
            if size < self.config.min_arm_size {
                return Err(EstimationError::ArmTooSmall {
                    arm,
                    size,
                    minimum: self.config.min_arm_size,
                }
                .into());
            }
        }

        let refit;
        let scores = match propensity {
            Some(p) if p.covariates == *covariates && p.len() == table.num_rows() => p,
            _ => {
                refit = PropensityScores::fit(table, covariates, &self.propensity_config)?;
                &refit
            }
        };

        let x1 = design.x.select_rows(&treated);
        let x0 = design.x.select_rows(&control);
        let y = table.outcome();
        let y1: Vec<f64> = treated.iter().map(|&i| y[design.rows[i]]).collect();
        let y0: Vec<f64> = control.iter().map(|&i| y[design.rows[i]]).collect();

        let learner = &self.config.base_learner;
        let mu0 = learner.fit(&x0, &y0, self.seed)?;
        let mu1 = learner.fit(&x1, &y1, self.seed.wrapping_add(1))?;

        let d1: Vec<f64> = y1.iter().zip(mu0.predict(&x1)).map(|(y, m)| y - m).collect();
        let d0: Vec<f64> = mu1.predict(&x0).into_iter().zip(&y0).map(|(m, y)| m - y).collect();

        let tau0 = learner.fit(&x0, &d0, self.seed.wrapping_add(2))?;
        let tau1 = learner.fit(&x1, &d1, self.seed.wrapping_add(3))?;
        let models = XLearnerModels {
            mu0,
            mu1,
            tau0,
            tau1,
        };

        let n = table.num_rows();
        let mut out_scores = vec![None; n];
        let mut clipped = vec![None; n];
        let mut used_propensity = vec![None; n];
        let bound = self.config.score_clip;
        for (i, &row) in design.rows.iter().enumerate() {
            let x = design.x.row(i);
            let raw_g = scores
                .get(row)
                .unwrap_or_else(|| scores.model.predict_row(x));
            let g = self.config.propensity_clip.clip(raw_g);
            let score = models.effect(x, g);
            out_scores[row] = Some(score);
            clipped[row] = Some(score.clamp(-bound, bound));
            used_propensity[row] = Some(g);
        }
        info!(
            treated = treated.len(),
            control = control.len(),
            scored = design.rows.len(),
            "X-Learner fitted"
        );

        Ok(UpliftResult {
            scores: out_scores,
            clipped,
            propensity: used_propensity,
            treated_rows: treated.len(),
            control_rows: control.len(),
            models,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BaseLearner;
    use crate::schema::SchemaDescriptor;
    use crate::table::Column;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    /// Effect is `1 + 2·x` for treated units
    fn heterogeneous(n: usize, seed: u64) -> AnalysisTable {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (mut x, mut t, mut y) = (Vec::new(), Vec::new(), Vec::new());
        for _ in 0..n {
            let xi: f64 = rng.gen_range(-1.0..1.0);
            let ti = rng.gen_bool(0.5);
            let effect = if ti { 1.0 + 2.0 * xi } else { 0.0 };
            x.push(xi);
            t.push(ti);
            y.push(0.5 * xi + effect + rng.gen_range(-0.1..0.1));
        }
        AnalysisTable::builder(SchemaDescriptor::default())
            .user_ids((0..n).map(|i| format!("u{i}")))
            .treatment(t)
            .outcome(y)
            .column(Column::dense("x", x))
            .build()
            .unwrap()
    }

    fn linear_config() -> UpliftConfig {
        UpliftConfig {
            base_learner: BaseLearner::Linear { ridge: 1e-6 },
            ..UpliftConfig::default()
        }
    }

    #[test]
    fn test_linear_learner_recovers_effect() {
        let table = heterogeneous(600, 3);
        let set = CovariateSet::from_names(&table, ["x"]).unwrap();
        let result = XLearner::new(linear_config(), 42)
            .unwrap()
            .estimate(&table, &set, None)
            .unwrap();

        for (row, score) in result.scored() {
            let xi = table.column("x").unwrap().values()[row].unwrap();
            assert!((score - (1.0 + 2.0 * xi)).abs() < 0.1, "row {row}: {score}");
        }
        assert_eq!(result.treated_rows + result.control_rows, 600);
    }

    #[test]
    fn test_clipped_scores_bounded() {
        let table = heterogeneous(300, 4);
        let set = CovariateSet::from_names(&table, ["x"]).unwrap();
        let result = XLearner::new(linear_config(), 42)
            .unwrap()
            .estimate(&table, &set, None)
            .unwrap();
        assert!(result.clipped.iter().flatten().all(|s| s.abs() <= 0.2));
        assert!(result
            .propensity
            .iter()
            .flatten()
            .all(|g| (0.01..=0.99).contains(g)));
    }

    #[test]
    fn test_half_propensity_averages_effect_models() {
        let x = crate::linalg::Matrix::from_rows(&[vec![0.0], vec![1.0]]);
        let constant = |v: f64| BaseLearner::Linear { ridge: 0.0 }.fit(&x, &[v, v], 0).unwrap();
        let models = XLearnerModels {
            mu0: constant(0.0),
            mu1: constant(0.0),
            tau0: constant(1.0),
            tau1: constant(3.0),
        };
        assert!((models.effect(&[0.5], 0.5) - 2.0).abs() < 1e-12);
        assert!((models.effect(&[0.5], 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_arm_rejected() {
        let table = heterogeneous(40, 5);
        let set = CovariateSet::from_names(&table, ["x"]).unwrap();
        let err = XLearner::new(linear_config(), 42)
            .unwrap()
            .estimate(&table, &set, None)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Estimation(EstimationError::ArmTooSmall { minimum: 30, .. })
        ));
    }
}
