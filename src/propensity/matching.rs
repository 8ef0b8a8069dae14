//! Greedy nearest-neighbor matching on the propensity score
//!
//! Treated units are processed in descending score order (ties by record
//! order). Each takes its `k` nearest available controls by absolute score
//! distance, ties broken by record order, optionally within a caliper.
//! Without replacement, a used control is removed from the pool through a
//! pair of "next available" skip structures, so every lookup stays close to
//! O(log n) regardless of how many controls have been consumed.

use super::PropensityScores;
use crate::config::MatchingConfig;
use crate::covariates::CovariateSet;
use crate::error::EstimationError;
use crate::stats;
use crate::table::AnalysisTable;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

/// One treated-control link
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchedPair {
    /// Table row of the treated unit
    pub treated: usize,
    /// Table row of the control unit
    pub control: usize,
    /// Absolute propensity distance
    pub distance: f64,
}

/// Effect estimate with its uncertainty
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EffectEstimate {
    /// Point estimate
    pub estimate: f64,
    /// Standard error
    pub std_error: f64,
    /// Lower confidence bound
    pub ci_low: f64,
    /// Upper confidence bound
    pub ci_high: f64,
    /// Two-sided p-value against zero
    pub p_value: f64,
    /// Units contributing to the estimate
    pub n: usize,
}

/// Standardized mean difference of one covariate before and after matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceRow {
    /// Covariate name
    pub covariate: String,
    /// SMD over all complete rows
    pub smd_before: f64,
    /// SMD over the matched sample
    pub smd_after: f64,
}

/// Output of propensity matching
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingResult {
    /// Average effect on matched treated units
    pub ate: EffectEstimate,
    /// Every treated-control link, ordered by treated row then distance
    pub pairs: Vec<MatchedPair>,
    /// Propensity score per table row
    pub propensity: Vec<Option<f64>>,
    /// Times each table row appears in a pair
    pub match_counts: Vec<usize>,
    /// Treated units with a complete covariate row
    pub treated_total: usize,
    /// Treated units with at least one match
    pub matched_treated: usize,
    /// Treated units without a match
    pub unmatched_treated: usize,
    /// `matched_treated / treated_total`
    pub match_rate: f64,
    /// Covariate balance before and after matching
    pub balance: Vec<BalanceRow>,
}

/// Propensity-score matcher
#[derive(Debug, Clone)]
pub struct PropensityMatcher {
    config: MatchingConfig,
    z_critical: f64,
}

impl PropensityMatcher {
    /// Matcher with validated options.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid options or confidence level.
    pub fn new(config: MatchingConfig, confidence_level: f64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            z_critical: stats::z_critical(confidence_level)?,
        })
    }

    /// Matching options
    #[must_use]
    pub const fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Fit propensity scores, then match.
    ///
    /// # Errors
    ///
    /// See [`PropensityScores::fit`] and [`PropensityMatcher::estimate_with_scores`].
    pub fn estimate(
        &self,
        table: &AnalysisTable,
        covariates: &CovariateSet,
    ) -> Result<MatchingResult> {
        let scores = PropensityScores::fit(table, covariates, &self.config)?;
        self.estimate_with_scores(table, &scores)
    }

    /// Match using previously fitted scores.
    ///
    /// # Errors
    ///
    /// - `Error::InsufficientData` if an arm has no scored rows or fewer
    ///   than two treated units are matched
    /// - `EstimationError::PoorOverlap` if the match rate falls below the
    ///   configured minimum
    #[instrument(skip_all, fields(k = self.config.k, caliper = ?self.config.caliper))]
    #[allow(clippy::cast_precision_loss)]
    pub fn estimate_with_scores(
        &self,
        table: &AnalysisTable,
        scores: &PropensityScores,
    ) -> Result<MatchingResult> {
        if scores.len() != table.num_rows() {
            return Err(Error::Other(format!(
                "{} propensity scores for {} table rows",
                scores.len(),
                table.num_rows()
            )));
        }
        let mut treated = Vec::new();
        let mut controls = Vec::new();
        for (row, score) in scores.scores.iter().enumerate() {
            if let Some(s) = *score {
                if table.treatment()[row] {
                    treated.push(Unit { row, score: s });
                } else {
                    controls.push(Unit { row, score: s });
                }
            }
        }
        if treated.is_empty() || controls.is_empty() {
            return Err(Error::InsufficientData(format!(
                "matching needs scored units in both arms (treated: {}, control: {})",
                treated.len(),
                controls.len()
            )));
        }

        let matches = greedy_match(
            &treated,
            &controls,
            self.config.k,
            self.config.with_replacement,
            self.config.caliper,
        );

        let treated_total = treated.len();
        let matched_treated = matches.iter().filter(|m| !m.is_empty()).count();
        let match_rate = matched_treated as f64 / treated_total as f64;
        if match_rate < self.config.min_match_rate {
            warn!(match_rate, "poor propensity overlap");
            return Err(EstimationError::PoorOverlap {
                match_rate,
                minimum: self.config.min_match_rate,
            }
            .into());
        }
        if matched_treated < 2 {
            return Err(Error::InsufficientData(format!(
                "only {matched_treated} treated units matched, at least 2 required"
            )));
        }

        let mut pairs = Vec::new();
        let mut match_counts = vec![0; table.num_rows()];
        let mut differences = Vec::with_capacity(matched_treated);
        for (unit, chosen) in treated.iter().zip(&matches) {
            if chosen.is_empty() {
                continue;
            }
            let y = table.outcome();
            let control_mean = chosen.iter().map(|c| y[c.row]).sum::<f64>() / chosen.len() as f64;
            differences.push(y[unit.row] - control_mean);
            match_counts[unit.row] += chosen.len();
            for c in chosen {
                match_counts[c.row] += 1;
                pairs.push(MatchedPair {
                    treated: unit.row,
                    control: c.row,
                    distance: c.distance,
                });
            }
        }
        pairs.sort_by(|a, b| {
            a.treated
                .cmp(&b.treated)
                .then(a.distance.total_cmp(&b.distance))
                .then(a.control.cmp(&b.control))
        });

        let estimate = stats::mean(&differences);
        let std_error = (stats::variance(&differences) / differences.len() as f64).sqrt();
        let p_value = if std_error > 0.0 {
            stats::two_sided_p_value(estimate / std_error)?
        } else if estimate == 0.0 {
            1.0
        } else {
            0.0
        };
        let ate = EffectEstimate {
            estimate,
            std_error,
            ci_low: estimate - self.z_critical * std_error,
            ci_high: estimate + self.z_critical * std_error,
            p_value,
            n: differences.len(),
        };

        let balance = balance_table(table, &scores.covariates, &treated, &matches)?;
        info!(
            matched_treated,
            treated_total,
            ate = estimate,
            "propensity matching complete"
        );

        Ok(MatchingResult {
            ate,
            pairs,
            propensity: scores.scores.clone(),
            match_counts,
            treated_total,
            matched_treated,
            unmatched_treated: treated_total - matched_treated,
            match_rate,
            balance,
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct Unit {
    row: usize,
    score: f64,
}

#[derive(Debug, Clone, Copy)]
struct Chosen {
    row: usize,
    distance: f64,
}

/// Indices into a sorted control pool that skip consumed entries in both
/// directions (union-find with path compression).
struct Availability {
    /// `right[p]` leads to the first available position `>= p`; `n` means none
    right: Vec<usize>,
    /// `left[p + 1]` leads to the last available position `<= p`; 0 means none
    left: Vec<usize>,
}

impl Availability {
    fn new(n: usize) -> Self {
        Self {
            right: (0..=n).collect(),
            left: (0..=n).collect(),
        }
    }

    fn find(parent: &mut [usize], x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut cur = x;
        while parent[cur] != root {
            let next = parent[cur];
            parent[cur] = root;
            cur = next;
        }
        root
    }

    fn at_or_after(&mut self, p: usize) -> Option<usize> {
        let n = self.right.len() - 1;
        let r = Self::find(&mut self.right, p.min(n));
        (r < n).then_some(r)
    }

    fn at_or_before(&mut self, p: usize) -> Option<usize> {
        let l = Self::find(&mut self.left, p + 1);
        (l > 0).then(|| l - 1)
    }

    fn before(&mut self, p: usize) -> Option<usize> {
        p.checked_sub(1).and_then(|q| self.at_or_before(q))
    }

    fn remove(&mut self, p: usize) {
        self.right[p] = p + 1;
        self.left[p + 1] = p;
    }
}

/// Match treated units to controls; returns the chosen controls per treated
/// unit, in the order of `treated`.
fn greedy_match(
    treated: &[Unit],
    controls: &[Unit],
    k: usize,
    with_replacement: bool,
    caliper: Option<f64>,
) -> Vec<Vec<Chosen>> {
    let mut pool: Vec<Unit> = controls.to_vec();
    pool.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.row.cmp(&b.row)));
    let mut available = Availability::new(pool.len());

    let mut order: Vec<usize> = (0..treated.len()).collect();
    order.sort_by(|&a, &b| {
        treated[b]
            .score
            .total_cmp(&treated[a].score)
            .then(treated[a].row.cmp(&treated[b].row))
    });

    let mut result = vec![Vec::new(); treated.len()];
    let mut candidates: Vec<(f64, usize, usize)> = Vec::with_capacity(k + 1);
    for t in order {
        let s = treated[t].score;
        let split = pool.partition_point(|c| c.score < s);
        let mut left = available.before(split);
        let mut right = available.at_or_after(split);

        // Expand outward; distances are non-decreasing, so stop once k are
        // held and the next one is strictly farther.
        candidates.clear();
        loop {
            let dl = left.map(|p| s - pool[p].score);
            let dr = right.map(|p| pool[p].score - s);
            let (distance, position, from_left) = match (dl, dr) {
                (None, None) => break,
                (Some(d), None) => (d, left.unwrap_or_default(), true),
                (None, Some(d)) => (d, right.unwrap_or_default(), false),
                (Some(a), Some(b)) if a <= b => (a, left.unwrap_or_default(), true),
                (Some(_), Some(b)) => (b, right.unwrap_or_default(), false),
            };
            if caliper.is_some_and(|c| distance > c) {
                break;
            }
            if candidates.len() >= k && distance > candidates[k - 1].0 {
                break;
            }
            candidates.push((distance, pool[position].row, position));
            if from_left {
                left = available.before(position);
            } else {
                right = available.at_or_after(position + 1);
            }
        }

        candidates.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.truncate(k);
        for &(distance, row, position) in &candidates {
            if !with_replacement {
                available.remove(position);
            }
            result[t].push(Chosen { row, distance });
        }
    }
    result
}

/// SMD per covariate before matching (all complete rows) and after
/// (matched treated vs their controls, each control weighted `1/k_i`).
fn balance_table(
    table: &AnalysisTable,
    covariates: &CovariateSet,
    treated: &[Unit],
    matches: &[Vec<Chosen>],
) -> Result<Vec<BalanceRow>> {
    covariates
        .names()
        .iter()
        .map(|name| {
            let column = table.column(name).ok_or_else(|| {
                Error::Configuration(format!("covariate {name:?} is not a table column"))
            })?;
            let value = |row: usize| column.values()[row].unwrap_or_default();

            let (mut t_all, mut c_all) = (Vec::new(), Vec::new());
            for row in 0..table.num_rows() {
                if let Some(v) = column.values()[row] {
                    if table.treatment()[row] {
                        t_all.push(v);
                    } else {
                        c_all.push(v);
                    }
                }
            }

            let mut t_matched = Vec::new();
            let mut c_matched = Vec::new();
            let mut c_weights = Vec::new();
            for (unit, chosen) in treated.iter().zip(matches) {
                if chosen.is_empty() {
                    continue;
                }
                t_matched.push(value(unit.row));
                #[allow(clippy::cast_precision_loss)]
                let weight = 1.0 / chosen.len() as f64;
                for c in chosen {
                    c_matched.push(value(c.row));
                    c_weights.push(weight);
                }
            }

            let smd = |t: &[f64], c: &[f64], cw: &[f64]| {
                let (m1, v1) = stats::weighted_mean_variance(t, &vec![1.0; t.len()]);
                let (m0, v0) = stats::weighted_mean_variance(c, cw);
                stats::standardized_mean_difference(m1, v1, m0, v0)
            };
            Ok(BalanceRow {
                covariate: name.clone(),
                smd_before: smd(&t_all, &c_all, &vec![1.0; c_all.len()]),
                smd_after: smd(&t_matched, &c_matched, &c_weights),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn units(scores: &[f64], offset: usize) -> Vec<Unit> {
        scores
            .iter()
            .enumerate()
            .map(|(i, &score)| Unit {
                row: offset + i,
                score,
            })
            .collect()
    }

    fn rows(chosen: &[Chosen]) -> Vec<usize> {
        chosen.iter().map(|c| c.row).collect()
    }

    #[test]
    fn test_nearest_control_without_replacement() {
        let treated = units(&[0.50, 0.48], 0);
        let controls = units(&[0.49, 0.30, 0.47], 10);
        let m = greedy_match(&treated, &controls, 1, false, None);
        // 0.50 goes first and takes 0.49; 0.48 then takes 0.47
        assert_eq!(rows(&m[0]), vec![10]);
        assert_eq!(rows(&m[1]), vec![12]);
    }

    #[test]
    fn test_with_replacement_reuses_control() {
        let treated = units(&[0.50, 0.48], 0);
        let controls = units(&[0.49, 0.30], 10);
        let m = greedy_match(&treated, &controls, 1, true, None);
        assert_eq!(rows(&m[0]), vec![10]);
        assert_eq!(rows(&m[1]), vec![10]);
    }

    #[test]
    fn test_caliper_leaves_unit_unmatched() {
        let treated = units(&[0.90, 0.40], 0);
        let controls = units(&[0.41, 0.10], 10);
        let m = greedy_match(&treated, &controls, 1, false, Some(0.05));
        assert!(m[0].is_empty());
        assert_eq!(rows(&m[1]), vec![10]);
    }

    #[test]
    fn test_equal_distance_prefers_record_order() {
        let treated = units(&[0.50], 0);
        // 0.25 and 0.75 are equidistant; row 11 comes before row 12
        let controls = units(&[0.90, 0.75, 0.25], 10);
        let m = greedy_match(&treated, &controls, 1, false, None);
        assert_eq!(rows(&m[0]), vec![11]);

        let tied = units(&[0.45, 0.45, 0.45], 20);
        let m = greedy_match(&treated, &tied, 2, false, None);
        assert_eq!(rows(&m[0]), vec![20, 21]);
    }

    #[test]
    fn test_k_neighbors_and_exhausted_pool() {
        let treated = units(&[0.5, 0.5], 0);
        let controls = units(&[0.1, 0.52, 0.49], 10);
        let m = greedy_match(&treated, &controls, 2, false, None);
        assert_eq!(rows(&m[0]), vec![12, 11]);
        // Only one control left for the second treated unit
        assert_eq!(rows(&m[1]), vec![10]);
    }

    #[test]
    fn test_availability_skips_removed() {
        let mut a = Availability::new(4);
        a.remove(1);
        a.remove(2);
        assert_eq!(a.at_or_after(1), Some(3));
        assert_eq!(a.at_or_before(2), Some(0));
        a.remove(3);
        assert_eq!(a.at_or_after(1), None);
        assert_eq!(a.before(0), None);
    }
}
