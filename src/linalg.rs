//! Dense linear algebra for the estimators
//!
//! Small, row-major matrices and a Gaussian-elimination solver with partial
//! pivoting. The solver reports which columns have no pivot so callers can
//! name the collinear covariates instead of failing opaquely.

use serde::{Deserialize, Serialize};

/// Relative pivot tolerance below which a column is treated as dependent
pub const PIVOT_TOLERANCE: f64 = 1e-10;

/// Row-major dense matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Matrix of zeros
    #[must_use]
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Wrap row-major data.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() != rows * cols`.
    #[must_use]
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f64>) -> Self {
        assert_eq!(data.len(), rows * cols, "matrix data length mismatch");
        Self { rows, cols, data }
    }

    /// Build from a slice of equally long rows.
    ///
    /// # Panics
    ///
    /// Panics if rows have different lengths.
    #[must_use]
    pub fn from_rows(rows: &[Vec<f64>]) -> Self {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for row in rows {
            assert_eq!(row.len(), cols, "ragged rows");
            data.extend_from_slice(row);
        }
        Self {
            rows: rows.len(),
            cols,
            data,
        }
    }

    /// Number of rows
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    #[must_use]
    pub const fn cols(&self) -> usize {
        self.cols
    }

    /// Element at (i, j)
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    /// Set element at (i, j)
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }

    /// Row slice
    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Copy of column j
    #[must_use]
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.get(i, j)).collect()
    }

    /// New matrix made of the given rows, in order
    #[must_use]
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Xᵀ X
    #[must_use]
    pub fn gram(&self) -> Self {
        self.weighted_gram(None)
    }

    /// Xᵀ W X for diagonal weights (unweighted when `None`)
    #[must_use]
    pub fn weighted_gram(&self, weights: Option<&[f64]>) -> Self {
        let mut out = Self::zeros(self.cols, self.cols);
        for i in 0..self.rows {
            let w = weights.map_or(1.0, |w| w[i]);
            let row = self.row(i);
            for a in 0..self.cols {
                let wa = w * row[a];
                for b in a..self.cols {
                    out.data[a * self.cols + b] += wa * row[b];
                }
            }
        }
        for a in 0..self.cols {
            for b in 0..a {
                out.data[a * self.cols + b] = out.data[b * self.cols + a];
            }
        }
        out
    }

    /// Xᵀ v
    #[must_use]
    pub fn t_mul_vec(&self, v: &[f64]) -> Vec<f64> {
        let mut out = vec![0.0; self.cols];
        for (i, &vi) in v.iter().enumerate().take(self.rows) {
            for (o, &x) in out.iter_mut().zip(self.row(i)) {
                *o += x * vi;
            }
        }
        out
    }

    /// X β
    #[must_use]
    pub fn mul_vec(&self, beta: &[f64]) -> Vec<f64> {
        (0..self.rows).map(|i| dot(self.row(i), beta)).collect()
    }

    /// Add `value` to the diagonal, skipping the first `skip` entries
    pub fn add_to_diagonal(&mut self, value: f64, skip: usize) {
        for d in skip..self.rows.min(self.cols) {
            self.data[d * self.cols + d] += value;
        }
    }

    /// Copy with a leading column of ones (intercept)
    #[must_use]
    pub fn with_intercept(&self) -> Self {
        let cols = self.cols + 1;
        let mut data = Vec::with_capacity(self.rows * cols);
        for i in 0..self.rows {
            data.push(1.0);
            data.extend_from_slice(self.row(i));
        }
        Self {
            rows: self.rows,
            cols,
            data,
        }
    }
}

/// Dot product of two equally long slices
#[must_use]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// A square system had no unique solution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Singular {
    /// Columns without a usable pivot, each a combination of earlier columns
    pub columns: Vec<usize>,
}

/// Solve `A x = b` by Gaussian elimination with partial pivoting.
///
/// Elimination continues past dependent columns so that every column
/// without a pivot is reported, not only the first.
///
/// # Errors
///
/// Returns [`Singular`] listing the dependent columns when `A` is singular
/// (relative pivot below [`PIVOT_TOLERANCE`]) or not square.
pub fn solve(a: &Matrix, b: &[f64]) -> Result<Vec<f64>, Singular> {
    let n = a.rows;
    if a.cols != n || b.len() != n {
        return Err(Singular {
            columns: (0..a.cols).collect(),
        });
    }

    // Augmented matrix [A | b]
    let width = n + 1;
    let mut aug = vec![0.0; n * width];
    for i in 0..n {
        aug[i * width..i * width + n].copy_from_slice(a.row(i));
        aug[i * width + n] = b[i];
    }

    let scale = (0..n)
        .map(|i| a.get(i, i).abs())
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let tolerance = PIVOT_TOLERANCE * scale;

    let mut rank = 0;
    let mut pivot_cols = Vec::with_capacity(n);
    let mut dependent = Vec::new();
    for col in 0..n {
        let (pivot_row, pivot_val) = (rank..n)
            .map(|r| (r, aug[r * width + col].abs()))
            .fold((rank, -1.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if rank >= n || pivot_val < tolerance {
            dependent.push(col);
            continue;
        }
        if pivot_row != rank {
            for k in 0..width {
                aug.swap(pivot_row * width + k, rank * width + k);
            }
        }
        let pivot = aug[rank * width + col];
        for r in (rank + 1)..n {
            let factor = aug[r * width + col] / pivot;
            if factor != 0.0 {
                for k in col..width {
                    aug[r * width + k] -= factor * aug[rank * width + k];
                }
            }
        }
        pivot_cols.push(col);
        rank += 1;
    }

    if !dependent.is_empty() {
        return Err(Singular { columns: dependent });
    }

    // Back substitution (full rank: pivot of row i sits in column i)
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = aug[i * width + n];
        for k in (i + 1)..n {
            sum -= aug[i * width + k] * x[k];
        }
        x[i] = sum / aug[i * width + pivot_cols[i]];
    }
    Ok(x)
}

/// Column means and standard deviations used to z-score a design matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl Standardizer {
    /// Fit column means and (population) standard deviations.
    /// Constant columns get scale 1 so they pass through centered.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn fit(x: &Matrix) -> Self {
        let n = x.rows.max(1) as f64;
        let mut means = vec![0.0; x.cols];
        for i in 0..x.rows {
            for (m, v) in means.iter_mut().zip(x.row(i)) {
                *m += v;
            }
        }
        means.iter_mut().for_each(|m| *m /= n);

        let mut scales = vec![0.0; x.cols];
        for i in 0..x.rows {
            for ((s, v), m) in scales.iter_mut().zip(x.row(i)).zip(&means) {
                *s += (v - m).powi(2);
            }
        }
        for s in &mut scales {
            *s = (*s / n).sqrt();
            if *s <= f64::EPSILON {
                *s = 1.0;
            }
        }
        Self { means, scales }
    }

    /// Fit on a subset of rows (e.g. a hold-out sample)
    #[must_use]
    pub fn fit_rows(x: &Matrix, rows: &[usize]) -> Self {
        Self::fit(&x.select_rows(rows))
    }

    /// Column means
    #[must_use]
    pub fn means(&self) -> &[f64] {
        &self.means
    }

    /// Column scales
    #[must_use]
    pub fn scales(&self) -> &[f64] {
        &self.scales
    }

    /// z-score a matrix with the fitted parameters
    #[must_use]
    pub fn transform(&self, x: &Matrix) -> Matrix {
        let mut out = x.clone();
        for i in 0..out.rows {
            let start = i * out.cols;
            for j in 0..out.cols {
                out.data[start + j] = (out.data[start + j] - self.means[j]) / self.scales[j];
            }
        }
        out
    }

    /// z-score a single row
    #[must_use]
    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}
