//! Seeded synthetic experiments with a known ground truth
//!
//! Used by tests, benchmarks and the demo. Two generators:
//!
//! - [`BinaryScenario`]: booking-style 0/1 outcome with a constant absolute
//!   lift and pre-period covariates correlated with the baseline outcome.
//! - [`ContinuousScenario`]: continuous outcome, confounded assignment and a
//!   treatment effect that varies linearly with one covariate.

use crate::schema::SchemaDescriptor;
use crate::table::{AnalysisTable, Column};
use crate::{Error, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Binary-outcome experiment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BinaryScenario {
    /// Users in the experiment
    pub n_users: usize,
    /// Control conversion rate
    pub base_rate: f64,
    /// Absolute lift in conversion rate for treated users
    pub effect: f64,
    /// Correlation of each covariate with the baseline outcome
    pub covariate_correlation: f64,
    /// Number of pre-period covariates
    pub n_covariates: usize,
    /// Probability of assignment to treatment
    pub treated_share: f64,
}

impl Default for BinaryScenario {
    fn default() -> Self {
        Self {
            n_users: 1_000,
            base_rate: 0.20,
            effect: 0.05,
            covariate_correlation: 0.3,
            n_covariates: 64,
            treated_share: 0.5,
        }
    }
}

/// Continuous-outcome experiment with heterogeneous effects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousScenario {
    /// Users in the experiment
    pub n_users: usize,
    /// Standard-normal covariates (at least 3)
    pub n_covariates: usize,
    /// Effect at `x1 = 0`
    pub base_effect: f64,
    /// Slope of the effect in `x1`
    pub heterogeneity: f64,
    /// Log-odds slope of treatment assignment in `x0`
    pub confounding: f64,
    /// Outcome noise standard deviation
    pub noise_sd: f64,
    /// Fraction of covariate values blanked out at random
    pub missing_fraction: f64,
}

impl Default for ContinuousScenario {
    fn default() -> Self {
        Self {
            n_users: 2_000,
            n_covariates: 3,
            base_effect: 0.5,
            heterogeneity: 1.0,
            confounding: 0.0,
            noise_sd: 0.5,
            missing_fraction: 0.0,
        }
    }
}

/// Generated table plus each user's true effect
#[derive(Debug, Clone)]
pub struct SyntheticExperiment {
    /// Analysis table (`user_id` / `treatment` / `booking` schema)
    pub table: AnalysisTable,
    /// True individual treatment effect per row
    pub true_effects: Vec<f64>,
}

fn check_unit(name: &str, value: f64) -> Result<()> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(Error::Configuration(format!(
            "{name} must lie in (0, 1), got {value}"
        )))
    }
}

impl SyntheticExperiment {
    /// Generate a binary-outcome experiment.
    ///
    /// Each user has a latent baseline `b ~ Bernoulli(base_rate)`. Covariate
    /// `pre_j = b + σ·N(0, 1)` with `σ² = p(1 − p)(1/r² − 1)`, so each one
    /// has correlation `r` with `b`. Control users book iff `b`; treated
    /// users also book with probability `effect / (1 − base_rate)`, which
    /// lifts the rate by exactly `effect`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for out-of-range parameters.
    pub fn binary(scenario: &BinaryScenario, seed: u64) -> Result<Self> {
        check_unit("base_rate", scenario.base_rate)?;
        check_unit("covariate_correlation", scenario.covariate_correlation)?;
        check_unit("treated_share", scenario.treated_share)?;
        if !(0.0..1.0 - scenario.base_rate).contains(&scenario.effect) {
            return Err(Error::Configuration(format!(
                "effect must lie in [0, {}), got {}",
                1.0 - scenario.base_rate,
                scenario.effect
            )));
        }
        if scenario.n_users < 2 || scenario.n_covariates == 0 {
            return Err(Error::Configuration(
                "scenario needs at least 2 users and 1 covariate".to_string(),
            ));
        }

        let p = scenario.base_rate;
        let r = scenario.covariate_correlation;
        let sigma = (p * (1.0 - p) * (1.0 / (r * r) - 1.0)).sqrt();
        let lift = scenario.effect / (1.0 - p);

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = scenario.n_users;
        let mut treatment = Vec::with_capacity(n);
        let mut outcome = Vec::with_capacity(n);
        let mut covariates = vec![Vec::with_capacity(n); scenario.n_covariates];
        for _ in 0..n {
            let baseline = rng.gen_bool(p);
            let treated = rng.gen_bool(scenario.treated_share);
            let booked = baseline || (treated && rng.gen_bool(lift));
            let b = if baseline { 1.0 } else { 0.0 };
            for column in &mut covariates {
                let noise: f64 = rng.sample(StandardNormal);
                column.push(b + sigma * noise);
            }
            treatment.push(treated);
            outcome.push(if booked { 1.0 } else { 0.0 });
        }

        let mut builder = AnalysisTable::builder(SchemaDescriptor::default())
            .user_ids((0..n).map(|i| format!("user_{i:06}")))
            .treatment(treatment)
            .outcome(outcome);
        for (j, values) in covariates.into_iter().enumerate() {
            builder = builder.column(Column::dense(format!("pre_{j}"), values));
        }
        Ok(Self {
            table: builder.build()?,
            true_effects: vec![scenario.effect; n],
        })
    }

    /// Generate a continuous-outcome experiment.
    ///
    /// Covariates `x_j ~ N(0, 1)`; assignment `P(T = 1) = σ(confounding·x0)`;
    /// effect `τ = base_effect + heterogeneity·x1`;
    /// outcome `y = 1 + 0.5·x0 + 0.3·x2 + T·τ + noise_sd·N(0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for out-of-range parameters.
    pub fn continuous(scenario: &ContinuousScenario, seed: u64) -> Result<Self> {
        if scenario.n_users < 2 || scenario.n_covariates < 3 {
            return Err(Error::Configuration(
                "scenario needs at least 2 users and 3 covariates".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&scenario.missing_fraction) || scenario.noise_sd < 0.0 {
            return Err(Error::Configuration(
                "missing_fraction must lie in [0, 1) and noise_sd be non-negative".to_string(),
            ));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let n = scenario.n_users;
        let mut treatment = Vec::with_capacity(n);
        let mut outcome = Vec::with_capacity(n);
        let mut true_effects = Vec::with_capacity(n);
        let mut covariates: Vec<Vec<Option<f64>>> =
            vec![Vec::with_capacity(n); scenario.n_covariates];
        let mut x = vec![0.0; scenario.n_covariates];
        for _ in 0..n {
            for v in &mut x {
                *v = rng.sample(StandardNormal);
            }
            let propensity = crate::propensity::logistic::sigmoid(scenario.confounding * x[0]);
            let treated = rng.gen_bool(propensity);
            let effect = scenario.base_effect + scenario.heterogeneity * x[1];
            let noise: f64 = rng.sample(StandardNormal);
            let y = 1.0
                + 0.5 * x[0]
                + 0.3 * x[2]
                + if treated { effect } else { 0.0 }
                + scenario.noise_sd * noise;

            for (column, &v) in covariates.iter_mut().zip(&x) {
                let missing =
                    scenario.missing_fraction > 0.0 && rng.gen_bool(scenario.missing_fraction);
                column.push((!missing).then_some(v));
            }
            treatment.push(treated);
            outcome.push(y);
            true_effects.push(effect);
        }

        let mut builder = AnalysisTable::builder(SchemaDescriptor::default())
            .user_ids((0..n).map(|i| format!("user_{i:06}")))
            .treatment(treatment)
            .outcome(outcome);
        for (j, values) in covariates.into_iter().enumerate() {
            builder = builder.column(Column::new(format!("x{j}"), values));
        }
        Ok(Self {
            table: builder.build()?,
            true_effects,
        })
    }
}
