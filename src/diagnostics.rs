//! Diagnostics derived from the estimates
//!
//! Nothing here fits a model. Every table is computed from a borrowed
//! estimator output plus the analysis table.

use crate::config::DiagnosticsConfig;
use crate::covariates::CovariateSet;
use crate::cuped::CupedResult;
use crate::propensity::MatchingResult;
use crate::stats;
use crate::table::AnalysisTable;
use crate::uplift::UpliftResult;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Balance of one covariate after matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceDiagnostic {
    /// Covariate name
    pub covariate: String,
    /// SMD before matching
    pub smd_before: f64,
    /// SMD after matching
    pub smd_after: f64,
    /// `|smd_after| < balance_threshold`
    pub balanced: bool,
}

/// One uplift score bin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBin {
    /// Bin number, 1 = lowest scores
    pub bin: usize,
    /// Records in the bin
    pub count: usize,
    /// Treated records in the bin
    pub treated: usize,
    /// Control records in the bin
    pub control: usize,
    /// Mean predicted uplift
    pub mean_predicted: f64,
    /// Treated mean minus control mean, `None` if an arm is empty
    pub observed_effect: Option<f64>,
}

/// Agreement between predicted ranking and observed effects
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankingPerformance {
    /// Spearman correlation between bin rank and observed effect
    pub spearman: Option<f64>,
    /// `0.5 + ρ/2` clamped to [0, 1]; 0.5 when undefined
    pub score: f64,
    /// Bins with both arms present
    pub bins_used: usize,
}

/// Per-record uplift segments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpliftSegments {
    /// Score bin per table row (1..=n_bins)
    pub bins: Vec<Option<usize>>,
    /// Score above the high-uplift threshold
    pub high_uplift: Vec<Option<bool>>,
    /// Score quantile used as the threshold
    pub threshold: Option<f64>,
}

/// Raw-arm SMD of one covariate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CovariateImbalance {
    /// Covariate name
    pub covariate: String,
    /// Standardized mean difference, treated minus control
    pub smd: f64,
}

/// Pre-treatment randomization check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomizationCheck {
    /// Per-covariate imbalance between the raw arms
    pub covariates: Vec<CovariateImbalance>,
    /// Treated records
    pub treated: usize,
    /// Control records
    pub control: usize,
    /// Observed treated share
    pub treated_share: f64,
    /// Planned treated share
    pub expected_share: f64,
    /// Sample-ratio-mismatch chi-square statistic (1 df)
    pub srm_chi_square: f64,
    /// p-value of the sample-ratio test
    pub srm_p_value: f64,
    /// SRM significant or some |SMD| at or above the balance threshold
    pub flagged: bool,
}

/// CUPED variance-reduction summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CupedSummary {
    /// Covariates and fitted coefficients
    pub coefficients: Vec<(String, f64)>,
    /// Rows the adjustment was applied to
    pub rows_used: usize,
    /// Raw outcome variance
    pub raw_variance: f64,
    /// Adjusted outcome variance
    pub adjusted_variance: f64,
    /// Percentage reduction
    pub variance_reduction_pct: f64,
}

impl From<&CupedResult> for CupedSummary {
    fn from(result: &CupedResult) -> Self {
        Self {
            coefficients: result.coefficients.clone(),
            rows_used: result.rows_used,
            raw_variance: result.raw_variance,
            adjusted_variance: result.adjusted_variance,
            variance_reduction_pct: result.variance_reduction_pct,
        }
    }
}

/// Everything the diagnostics engine derives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Post-matching balance (empty when matching failed)
    pub balance: Vec<BalanceDiagnostic>,
    /// Uplift calibration bins (empty when uplift failed)
    pub calibration: Vec<CalibrationBin>,
    /// Ranking performance of the uplift scores
    pub ranking: Option<RankingPerformance>,
    /// Per-record uplift segments
    pub segments: Option<UpliftSegments>,
    /// Randomization check on the raw arms
    pub randomization: RandomizationCheck,
    /// CUPED summary
    pub cuped: Option<CupedSummary>,
}

/// Derives diagnostics tables
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsEngine {
    config: DiagnosticsConfig,
}

impl DiagnosticsEngine {
    /// Engine with validated options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid options.
    pub fn new(config: DiagnosticsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Build the full report from whichever estimates are available.
    ///
    /// # Errors
    ///
    /// Returns an error if the randomization check cannot be computed.
    pub fn run(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
        cuped: Option<&CupedResult>,
        matching: Option<&MatchingResult>,
        uplift: Option<&UpliftResult>,
    ) -> Result<DiagnosticsReport> {
        let randomization = self.randomization_check(table, covariates)?;
        let balance = matching.map(|m| self.balance(m)).unwrap_or_default();
        let (segments, calibration, ranking) = match uplift {
            Some(u) => {
                let segments = self.segments(u);
                let calibration = self.calibration(table, u, &segments);
                let ranking = Self::ranking(&calibration);
                (Some(segments), calibration, Some(ranking))
            }
            None => (None, Vec::new(), None),
        };
        Ok(DiagnosticsReport {
            balance,
            calibration,
            ranking,
            segments,
            randomization,
            cuped: cuped.map(CupedSummary::from),
        })
    }

    /// Label the matching balance table.
    #[must_use]
    pub fn balance(&self, matching: &MatchingResult) -> Vec<BalanceDiagnostic> {
        matching
            .balance
            .iter()
            .map(|row| BalanceDiagnostic {
                covariate: row.covariate.clone(),
                smd_before: row.smd_before,
                smd_after: row.smd_after,
                balanced: row.smd_after.abs() < self.config.balance_threshold,
            })
            .collect()
    }

    /// Equal-count score bins (ascending score, ties by record order) and
    /// the high-uplift flag.
    #[must_use]
    pub fn segments(&self, uplift: &UpliftResult) -> UpliftSegments {
        let mut scored = uplift.scored();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        let n = scored.len();
        let n_rows = uplift.scores.len();

        let mut bins = vec![None; n_rows];
        for (position, &(row, _)) in scored.iter().enumerate() {
            bins[row] = Some(position * self.config.n_bins / n + 1);
        }

        let values: Vec<f64> = scored.iter().map(|&(_, s)| s).collect();
        let threshold = stats::quantile(&values, self.config.high_uplift_quantile);
        let mut high_uplift = vec![None; n_rows];
        if let Some(t) = threshold {
            for &(row, s) in &scored {
                high_uplift[row] = Some(s > t);
            }
        }
        UpliftSegments {
            bins,
            high_uplift,
            threshold,
        }
    }

    /// Observed effect per score bin.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn calibration(
        &self,
        table: &AnalysisTable,
        uplift: &UpliftResult,
        segments: &UpliftSegments,
    ) -> Vec<CalibrationBin> {
        #[derive(Default, Clone)]
        struct Acc {
            count: usize,
            predicted: f64,
            treated: Vec<f64>,
            control: Vec<f64>,
        }
        let mut acc = vec![Acc::default(); self.config.n_bins];
        for (row, bin) in segments.bins.iter().enumerate() {
            let (Some(bin), Some(score)) = (bin, uplift.scores[row]) else {
                continue;
            };
            let a = &mut acc[bin - 1];
            a.count += 1;
            a.predicted += score;
            if table.treatment()[row] {
                a.treated.push(table.outcome()[row]);
            } else {
                a.control.push(table.outcome()[row]);
            }
        }
        acc.into_iter()
            .enumerate()
            .filter(|(_, a)| a.count > 0)
            .map(|(i, a)| CalibrationBin {
                bin: i + 1,
                count: a.count,
                treated: a.treated.len(),
                control: a.control.len(),
                mean_predicted: a.predicted / a.count as f64,
                observed_effect: (!a.treated.is_empty() && !a.control.is_empty())
                    .then(|| stats::mean(&a.treated) - stats::mean(&a.control)),
            })
            .collect()
    }

    /// Spearman agreement between bin order and observed effect
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ranking(calibration: &[CalibrationBin]) -> RankingPerformance {
        let (ranks, effects): (Vec<f64>, Vec<f64>) = calibration
            .iter()
            .filter_map(|b| b.observed_effect.map(|e| (b.bin as f64, e)))
            .unzip();
        let bins_used = ranks.len();
        let spearman = if bins_used >= 3 {
            stats::spearman(&ranks, &effects)
        } else {
            None
        };
        RankingPerformance {
            spearman,
            score: spearman.map_or(0.5, |rho| (0.5 + rho / 2.0).clamp(0.0, 1.0)),
            bins_used,
        }
    }

    /// Raw-arm SMD per covariate and a sample-ratio-mismatch test.
    ///
    /// # Errors
    ///
    /// Returns `Error::InsufficientData` for an empty table and
    /// `Error::Configuration` for an unknown covariate.
    #[allow(clippy::cast_precision_loss)]
    pub fn randomization_check(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
    ) -> Result<RandomizationCheck> {
        if table.is_empty() {
            return Err(Error::InsufficientData(
                "randomization check on an empty table".to_string(),
            ));
        }
        let imbalance = covariates
            .names()
            .iter()
            .map(|name| {
                let column = table.column(name).ok_or_else(|| {
                    Error::Configuration(format!("covariate {name:?} is not a table column"))
                })?;
                let (mut t, mut c) = (Vec::new(), Vec::new());
                for (v, &treated) in column.values().iter().zip(table.treatment()) {
                    match (v, treated) {
                        (Some(v), true) => t.push(*v),
                        (Some(v), false) => c.push(*v),
                        (None, _) => {}
                    }
                }
                let smd = stats::standardized_mean_difference(
                    stats::mean(&t),
                    stats::variance(&t),
                    stats::mean(&c),
                    stats::variance(&c),
                );
                Ok(CovariateImbalance {
                    covariate: name.clone(),
                    smd,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let (treated, control) = table.arm_sizes();
        let n = table.num_rows() as f64;
        let share = self.config.expected_treated_share;
        let (exp_t, exp_c) = (n * share, n * (1.0 - share));
        let srm_chi_square = (treated as f64 - exp_t).powi(2) / exp_t
            + (control as f64 - exp_c).powi(2) / exp_c;
        let srm_p_value = stats::chi_square_sf(srm_chi_square, 1.0)?;

        let imbalanced = imbalance
            .iter()
            .any(|c| c.smd.abs() >= self.config.balance_threshold);
        let flagged = srm_p_value < self.config.srm_alpha || imbalanced;
        if flagged {
            warn!(srm_p_value, imbalanced, "randomization check flagged");
        } else {
            debug!(srm_p_value, "randomization check passed");
        }
        Ok(RandomizationCheck {
            covariates: imbalance,
            treated,
            control,
            treated_share: treated as f64 / n,
            expected_share: share,
            srm_chi_square,
            srm_p_value,
            flagged,
        })
    }
}
