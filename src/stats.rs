//! Summary statistics and reference distributions

use crate::{Error, Result};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

/// Arithmetic mean (0 for an empty slice)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased sample variance (0 for fewer than two values)
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn variance(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64
}

/// Weighted mean and weighted (population) variance
#[must_use]
pub fn weighted_mean_variance(values: &[f64], weights: &[f64]) -> (f64, f64) {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return (0.0, 0.0);
    }
    let m = values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / total;
    let var = values
        .iter()
        .zip(weights)
        .map(|(v, w)| w * (v - m).powi(2))
        .sum::<f64>()
        / total;
    (m, var)
}

/// Standardized mean difference `(m1 - m0) / sqrt((v1 + v0) / 2)`,
/// 0 when both variances vanish.
#[must_use]
pub fn standardized_mean_difference(m1: f64, v1: f64, m0: f64, v0: f64) -> f64 {
    let denom = (0.5 * (v1 + v0)).sqrt();
    if denom <= f64::EPSILON {
        0.0
    } else {
        (m1 - m0) / denom
    }
}

fn standard_normal() -> Result<Normal> {
    Normal::new(0.0, 1.0).map_err(|e| Error::Other(format!("standard normal: {e}")))
}

/// Two-sided critical value `z_{1-α/2}` for a confidence level in (0, 1).
///
/// # Errors
///
/// Returns `Error::Configuration` if the level is outside (0, 1).
pub fn z_critical(confidence_level: f64) -> Result<f64> {
    if !(confidence_level > 0.0 && confidence_level < 1.0) {
        return Err(Error::Configuration(format!(
            "confidence level must lie in (0, 1), got {confidence_level}"
        )));
    }
    let alpha_half = (1.0 - confidence_level) / 2.0;
    Ok(standard_normal()?.inverse_cdf(1.0 - alpha_half))
}

/// Two-sided p-value for a standard normal statistic
///
/// # Errors
///
/// Returns `Error::Other` if the distribution cannot be constructed.
pub fn two_sided_p_value(z: f64) -> Result<f64> {
    let tail = 1.0 - standard_normal()?.cdf(z.abs());
    Ok((2.0 * tail).clamp(0.0, 1.0))
}

/// Upper-tail probability of a chi-square statistic
///
/// # Errors
///
/// Returns `Error::Other` for non-positive degrees of freedom.
pub fn chi_square_sf(statistic: f64, degrees_of_freedom: f64) -> Result<f64> {
    let dist = ChiSquared::new(degrees_of_freedom)
        .map_err(|e| Error::Other(format!("chi-square({degrees_of_freedom}): {e}")))?;
    Ok((1.0 - dist.cdf(statistic.max(0.0))).clamp(0.0, 1.0))
}

/// Linear-interpolated quantile (`q` in [0, 1]) of unsorted values.
/// Returns `None` for an empty slice.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Ranks starting at 1, ties receive their average rank
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let avg = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = avg;
        }
        start = end;
    }
    ranks
}

/// Pearson correlation; `None` when either side has zero variance
#[must_use]
pub fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    let (ma, mb) = (mean(a), mean(b));
    let mut cov = 0.0;
    let mut va = 0.0;
    let mut vb = 0.0;
    for (x, y) in a.iter().zip(b) {
        cov += (x - ma) * (y - mb);
        va += (x - ma).powi(2);
        vb += (y - mb).powi(2);
    }
    if va <= 0.0 || vb <= 0.0 {
        return None;
    }
    Some(cov / (va * vb).sqrt())
}

/// Spearman rank correlation
#[must_use]
pub fn spearman(a: &[f64], b: &[f64]) -> Option<f64> {
    pearson(&average_ranks(a), &average_ranks(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert!((mean(&v) - 2.5).abs() < 1e-12);
        assert!((variance(&v) - 5.0 / 3.0).abs() < 1e-12);
        assert_eq!(variance(&[1.0]), 0.0);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_z_critical_95() {
        let z = z_critical(0.95).unwrap();
        assert!((z - 1.959_964).abs() < 1e-5);
        assert!(z_critical(1.0).is_err());
        assert!(z_critical(0.0).is_err());
    }

    #[test]
    fn test_two_sided_p_value() {
        assert!((two_sided_p_value(0.0).unwrap() - 1.0).abs() < 1e-12);
        assert!((two_sided_p_value(1.959_964).unwrap() - 0.05).abs() < 1e-5);
        assert!((two_sided_p_value(-1.959_964).unwrap() - 0.05).abs() < 1e-5);
    }

    #[test]
    fn test_chi_square_sf() {
        // 3.841 is the 95th percentile of chi-square(1)
        assert!((chi_square_sf(3.841_459, 1.0).unwrap() - 0.05).abs() < 1e-5);
        assert!(chi_square_sf(1.0, 0.0).is_err());
    }

    #[test]
    fn test_quantile_interpolates() {
        let v = [4.0, 1.0, 3.0, 2.0];
        assert_eq!(quantile(&v, 0.0), Some(1.0));
        assert_eq!(quantile(&v, 1.0), Some(4.0));
        assert!((quantile(&v, 0.75).unwrap() - 3.25).abs() < 1e-12);
        assert_eq!(quantile(&[], 0.5), None);
    }

    #[test]
    fn test_average_ranks_ties() {
        assert_eq!(average_ranks(&[10.0, 20.0, 10.0]), vec![1.5, 3.0, 1.5]);
    }

    #[test]
    fn test_spearman_monotone() {
        let a = [1.0, 2.0, 3.0, 4.0];
        let b = [1.0, 8.0, 27.0, 64.0];
        assert!((spearman(&a, &b).unwrap() - 1.0).abs() < 1e-12);
        assert_eq!(pearson(&a, &[1.0; 4]), None);
    }

    #[test]
    fn test_smd() {
        assert!((standardized_mean_difference(1.0, 1.0, 0.0, 1.0) - 1.0).abs() < 1e-12);
        assert_eq!(standardized_mean_difference(1.0, 0.0, 0.0, 0.0), 0.0);
    }

    #[test]
    fn test_weighted_mean_variance() {
        let (m, v) = weighted_mean_variance(&[1.0, 3.0], &[1.0, 1.0]);
        assert!((m - 2.0).abs() < 1e-12);
        assert!((v - 1.0).abs() < 1e-12);
    }
}
