//! Two-sample z-test on arm means
//!
//! Compares treatment and control on the (adjusted or raw) outcome using a
//! pooled-variance standard error:
//!
//! ```text
//! s_p² = ((n₁-1)s₁² + (n₀-1)s₀²) / (n₁+n₀-2)
//! SE   = s_p · sqrt(1/n₁ + 1/n₀)
//! ```

use crate::stats;
use crate::table::AnalysisTable;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Per-arm summary with a confidence interval on the mean
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ArmSummary {
    /// Records in the arm
    pub n: usize,
    /// Arm mean
    pub mean: f64,
    /// Sample standard deviation
    pub std_dev: f64,
    /// Lower bound of the mean's interval
    pub ci_low: f64,
    /// Upper bound of the mean's interval
    pub ci_high: f64,
}

/// Standardized effect size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum EffectSize {
    /// `2(asin√p₁ − asin√p₀)`, used for binary outcomes
    CohensH(f64),
    /// `diff / s_p`, used for continuous outcomes
    CohensD(f64),
}

impl EffectSize {
    /// Numeric value regardless of kind
    #[must_use]
    pub const fn value(&self) -> f64 {
        match self {
            Self::CohensH(v) | Self::CohensD(v) => *v,
        }
    }
}

/// Immutable result of a significance test
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Treated mean minus control mean
    pub effect: f64,
    /// Pooled-variance standard error of the difference
    pub std_error: f64,
    /// Lower confidence bound
    pub ci_low: f64,
    /// Upper confidence bound
    pub ci_high: f64,
    /// z statistic
    pub z_statistic: f64,
    /// Two-sided p-value
    pub p_value: f64,
    /// Confidence level of the interval
    pub confidence_level: f64,
    /// `p_value < 1 - confidence_level`
    pub significant: bool,
    /// Treated arm summary
    pub treated: ArmSummary,
    /// Control arm summary
    pub control: ArmSummary,
    /// Standardized effect size
    pub effect_size: EffectSize,
    /// `effect / control mean`, `None` when the control mean is 0
    pub relative_lift: Option<f64>,
}

/// Two-sample z-tester
#[derive(Debug, Clone, Copy)]
pub struct SignificanceTester {
    confidence_level: f64,
    z_critical: f64,
}

impl Default for SignificanceTester {
    fn default() -> Self {
        Self {
            confidence_level: 0.95,
            z_critical: 1.959_963_984_540_054,
        }
    }
}

impl SignificanceTester {
    /// Tester at the given confidence level.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for a level outside (0, 1).
    pub fn new(confidence_level: f64) -> Result<Self> {
        Ok(Self {
            confidence_level,
            z_critical: stats::z_critical(confidence_level)?,
        })
    }

    /// Test the table's raw outcome.
    ///
    /// # Errors
    ///
    /// See [`SignificanceTester::test`].
    pub fn test_outcome(&self, table: &AnalysisTable) -> Result<TestResult> {
        let values: Vec<Option<f64>> = table.outcome().iter().copied().map(Some).collect();
        self.test(&values, table.treatment())
    }

    /// Test per-record values split by treatment; `None` values are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::InsufficientData` if either arm has fewer than 2
    /// values, and `Error::Other` on length mismatch.
    #[instrument(skip_all)]
    #[allow(clippy::cast_precision_loss)]
    pub fn test(&self, values: &[Option<f64>], treatment: &[bool]) -> Result<TestResult> {
        if values.len() != treatment.len() {
            return Err(Error::Other(format!(
                "{} values but {} treatment flags",
                values.len(),
                treatment.len()
            )));
        }
        let mut treated = Vec::new();
        let mut control = Vec::new();
        for (v, &t) in values.iter().zip(treatment) {
            if let Some(v) = v {
                if t {
                    treated.push(*v);
                } else {
                    control.push(*v);
                }
            }
        }
        if treated.len() < 2 || control.len() < 2 {
            return Err(Error::InsufficientData(format!(
                "z-test needs at least 2 records per arm (treated: {}, control: {})",
                treated.len(),
                control.len()
            )));
        }

        let (n1, n0) = (treated.len() as f64, control.len() as f64);
        let (m1, m0) = (stats::mean(&treated), stats::mean(&control));
        let (v1, v0) = (stats::variance(&treated), stats::variance(&control));
        let pooled_var = ((n1 - 1.0) * v1 + (n0 - 1.0) * v0) / (n1 + n0 - 2.0);
        let std_error = (pooled_var * (1.0 / n1 + 1.0 / n0)).sqrt();

        let effect = m1 - m0;
        let (z_statistic, p_value) = if std_error > 0.0 {
            let z = effect / std_error;
            (z, stats::two_sided_p_value(z)?)
        } else if effect == 0.0 {
            (0.0, 1.0)
        } else {
            (effect.signum() * f64::INFINITY, 0.0)
        };

        let is_binary = |v: &[f64]| v.iter().all(|&x| x == 0.0 || x == 1.0);
        let effect_size = if is_binary(&treated) && is_binary(&control) {
            EffectSize::CohensH(2.0 * (m1.sqrt().asin() - m0.sqrt().asin()))
        } else if pooled_var > 0.0 {
            EffectSize::CohensD(effect / pooled_var.sqrt())
        } else {
            EffectSize::CohensD(0.0)
        };

        let result = TestResult {
            effect,
            std_error,
            ci_low: effect - self.z_critical * std_error,
            ci_high: effect + self.z_critical * std_error,
            z_statistic,
            p_value,
            confidence_level: self.confidence_level,
            significant: p_value < 1.0 - self.confidence_level,
            treated: self.arm_summary(treated.len(), m1, v1),
            control: self.arm_summary(control.len(), m0, v0),
            effect_size,
            relative_lift: (m0 != 0.0).then(|| effect / m0),
        };
        debug!(effect, std_error, p_value, "z-test computed");
        Ok(result)
    }

    #[allow(clippy::cast_precision_loss)]
    fn arm_summary(&self, n: usize, mean: f64, var: f64) -> ArmSummary {
        let std_dev = var.sqrt();
        let half = self.z_critical * std_dev / (n as f64).sqrt();
        ArmSummary {
            n,
            mean,
            std_dev,
            ci_low: mean - half,
            ci_high: mean + half,
        }
    }
}
