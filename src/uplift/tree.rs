//! CART regression tree with variance-reduction splits

use super::Predictor;
use crate::linalg::Matrix;
use rand::seq::index::sample;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Gain below which a split is not worth making
const MIN_GAIN: f64 = 1e-12;

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    /// Maximum depth (root has depth 0)
    pub max_depth: usize,
    /// Minimum samples on each side of a split
    pub min_samples_leaf: usize,
    /// Features drawn per split
    pub max_features: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// Fitted regression tree stored as a flat node arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    /// Grow a tree on the given rows of `x` (rows may repeat, as in a
    /// bootstrap sample).
    pub fn fit<R: Rng>(
        x: &Matrix,
        y: &[f64],
        rows: &[usize],
        params: TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let mut rows = rows.to_vec();
        tree.grow(x, y, &mut rows, 0, params, rng);
        tree
    }

    fn grow<R: Rng>(
        &mut self,
        x: &Matrix,
        y: &[f64],
        rows: &mut [usize],
        depth: usize,
        params: TreeParams,
        rng: &mut R,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: leaf_value(y, rows),
        });
        if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf {
            return id;
        }
        let Some(split) = best_split(x, y, rows, params, rng) else {
            return id;
        };

        let mid = partition(rows, |r| x.get(r, split.feature) <= split.threshold);
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(x, y, left_rows, depth + 1, params, rng);
        let right = self.grow(x, y, right_rows, depth + 1, params, rng);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    /// Number of leaves
    #[must_use]
    pub fn leaves(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }
}

impl Predictor for RegressionTree {
    fn predict_row(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { value } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => id = if row[feature] <= threshold { left } else { right },
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn leaf_value(y: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64
}

/// Stable-order partition; returns the number of rows satisfying `pred`
fn partition(rows: &mut [usize], pred: impl Fn(usize) -> bool) -> usize {
    let (mut yes, no): (Vec<usize>, Vec<usize>) = rows.iter().partition(|&&r| pred(r));
    let mid = yes.len();
    yes.extend(no);
    rows.copy_from_slice(&yes);
    mid
}

/// Best variance-reduction split over a random subset of features.
///
/// For each feature the rows are sorted once and every boundary between
/// distinct values is scored with prefix sums:
/// `gain = S_L²/n_L + S_R²/n_R − S²/n`.
#[allow(clippy::cast_precision_loss)]
fn best_split<R: Rng>(
    x: &Matrix,
    y: &[f64],
    rows: &[usize],
    params: TreeParams,
    rng: &mut R,
) -> Option<Split> {
    let n = rows.len();
    let total: f64 = rows.iter().map(|&r| y[r]).sum();
    let parent_score = total * total / n as f64;

    let n_features = x.cols();
    let mut features = sample(rng, n_features, params.max_features.clamp(1, n_features)).into_vec();
    features.sort_unstable();

    let mut best: Option<Split> = None;
    let mut sorted = rows.to_vec();
    for feature in features {
        sorted.sort_by(|&a, &b| x.get(a, feature).total_cmp(&x.get(b, feature)));
        let mut left_sum = 0.0;
        for i in 0..n - 1 {
            left_sum += y[sorted[i]];
            let n_left = i + 1;
            let n_right = n - n_left;
            if n_left < params.min_samples_leaf || n_right < params.min_samples_leaf {
                continue;
            }
            let (lo, hi) = (x.get(sorted[i], feature), x.get(sorted[i + 1], feature));
            if lo == hi {
                continue;
            }
            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / n_left as f64 + right_sum * right_sum / n_right as f64
                - parent_score;
            if gain > MIN_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                best = Some(Split {
                    feature,
                    threshold: 0.5 * (lo + hi),
                    gain,
                });
            }
        }
    }
    best
}
