//! In-memory analysis table (one row per user)
//!
//! The table is an immutable, columnar snapshot: identifiers, treatment
//! indicator, outcome and every numeric field of the input. Estimators read
//! it through [`AnalysisTable::design_matrix`], which performs complete-case
//! extraction for a covariate set.

use crate::covariates::CovariateSet;
use crate::linalg::Matrix;
use crate::schema::SchemaDescriptor;
use crate::{Error, Result};
use arrow::array::{Array, ArrayRef, Float64Array, RecordBatch, StringArray};
use arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use tracing::debug;

/// Experiment arm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Arm {
    /// Received the feature
    Treated,
    /// Did not receive the feature
    Control,
}

impl fmt::Display for Arm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Treated => write!(f, "treated"),
            Self::Control => write!(f, "control"),
        }
    }
}

/// A named numeric column; `None` marks a missing value.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    values: Vec<Option<f64>>,
}

impl Column {
    /// Create a column from optional values. Non-finite values become missing.
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<Option<f64>>) -> Self {
        let values = values
            .into_iter()
            .map(|v| v.filter(|x| x.is_finite()))
            .collect();
        Self {
            name: name.into(),
            values,
        }
    }

    /// Create a column without missing values.
    #[must_use]
    pub fn dense(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(name, values.into_iter().map(Some).collect())
    }

    /// Column name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column values
    #[must_use]
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Fraction of rows with a missing value (0 for an empty column).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn missing_fraction(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        let missing = self.values.iter().filter(|v| v.is_none()).count();
        missing as f64 / self.values.len() as f64
    }

    /// Whether all present values are equal (zero variance).
    #[must_use]
    pub fn is_constant(&self) -> bool {
        let mut present = self.values.iter().flatten();
        let Some(&first) = present.next() else {
            return true;
        };
        let scale = first.abs().max(1.0);
        present.all(|&v| (v - first).abs() <= 1e-12 * scale)
    }
}

/// Complete-case design matrix for a covariate set.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// Covariate values, one row per complete record, columns in set order
    pub x: Matrix,
    /// Table row index of each matrix row
    pub rows: Vec<usize>,
}

/// Immutable analysis table
#[derive(Debug, Clone)]
pub struct AnalysisTable {
    descriptor: SchemaDescriptor,
    user_ids: Vec<String>,
    treatment: Vec<bool>,
    outcome: Vec<f64>,
    columns: Vec<Column>,
}

impl AnalysisTable {
    /// Start building a table programmatically.
    #[must_use]
    pub fn builder(descriptor: SchemaDescriptor) -> AnalysisTableBuilder {
        AnalysisTableBuilder::new(descriptor)
    }

    /// Build a table from Arrow record batches.
    ///
    /// The id column may be string or integer typed; treatment must be 0/1
    /// (integer, float or boolean); outcome must be numeric or boolean.
    /// Every other numeric or boolean field is kept as a `Float64` column.
    /// Non-numeric fields are ignored.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a key column is missing, has nulls, or
    /// treatment is not binary, and `Error::StorageError` if batch schemas
    /// differ.
    pub fn from_batches(batches: &[RecordBatch], descriptor: &SchemaDescriptor) -> Result<Self> {
        descriptor.validate()?;
        let Some(first) = batches.first() else {
            return AnalysisTableBuilder::new(descriptor.clone()).build();
        };
        let schema = first.schema();
        for key in [
            &descriptor.id_column,
            &descriptor.treatment_column,
            &descriptor.outcome_column,
        ] {
            if schema.index_of(key).is_err() {
                return Err(Error::Schema(format!("column {key:?} not found in input")));
            }
        }

        let value_fields: Vec<_> = schema
            .fields()
            .iter()
            .filter(|f| {
                let name = f.name().as_str();
                name != descriptor.id_column
                    && name != descriptor.treatment_column
                    && name != descriptor.outcome_column
            })
            .filter(|f| {
                let keep = f.data_type().is_numeric() || f.data_type() == &DataType::Boolean;
                if !keep {
                    debug!(column = %f.name(), data_type = ?f.data_type(), "skipping non-numeric column");
                }
                keep
            })
            .map(|f| f.name().clone())
            .collect();

        let mut builder = AnalysisTableBuilder::new(descriptor.clone());
        let mut values: Vec<Vec<Option<f64>>> = vec![Vec::new(); value_fields.len()];

        for batch in batches {
            if batch.schema() != schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    schema,
                    batch.schema()
                )));
            }

            let ids = string_column(batch.column(schema.index_of(&descriptor.id_column)?))?;
            for i in 0..ids.len() {
                if ids.is_null(i) {
                    return Err(Error::Schema(format!(
                        "null value in id column {:?}",
                        descriptor.id_column
                    )));
                }
                builder.user_ids.push(ids.value(i).to_string());
            }

            let treatment =
                float_column(batch.column(schema.index_of(&descriptor.treatment_column)?))?;
            for i in 0..treatment.len() {
                let value = (!treatment.is_null(i)).then(|| treatment.value(i));
                match value {
                    Some(v) if v == 0.0 => builder.treatment.push(false),
                    Some(v) if (v - 1.0).abs() < f64::EPSILON => builder.treatment.push(true),
                    other => {
                        return Err(Error::Schema(format!(
                            "treatment column {:?} must be 0/1, found {other:?}",
                            descriptor.treatment_column
                        )))
                    }
                }
            }

            let outcome = float_column(batch.column(schema.index_of(&descriptor.outcome_column)?))?;
            for i in 0..outcome.len() {
                if outcome.is_null(i) {
                    return Err(Error::Schema(format!(
                        "null value in outcome column {:?}",
                        descriptor.outcome_column
                    )));
                }
                builder.outcome.push(outcome.value(i));
            }

            for (slot, name) in values.iter_mut().zip(&value_fields) {
                let array = float_column(batch.column(schema.index_of(name)?))?;
                slot.extend((0..array.len()).map(|i| (!array.is_null(i)).then(|| array.value(i))));
            }
        }

        for (name, column) in value_fields.into_iter().zip(values) {
            builder.columns.push(Column::new(name, column));
        }
        builder.build()
    }

    /// Schema descriptor the table was validated against
    #[must_use]
    pub const fn descriptor(&self) -> &SchemaDescriptor {
        &self.descriptor
    }

    /// Number of users
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.user_ids.len()
    }

    /// Whether the table has no rows
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }

    /// User identifiers
    #[must_use]
    pub fn user_ids(&self) -> &[String] {
        &self.user_ids
    }

    /// Treatment indicator per row
    #[must_use]
    pub fn treatment(&self) -> &[bool] {
        &self.treatment
    }

    /// Outcome per row
    #[must_use]
    pub fn outcome(&self) -> &[f64] {
        &self.outcome
    }

    /// All non-key numeric columns, in input order
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Look up a column by name
    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// (treated, control) row counts
    #[must_use]
    pub fn arm_sizes(&self) -> (usize, usize) {
        let treated = self.treatment.iter().filter(|&&t| t).count();
        (treated, self.treatment.len() - treated)
    }

    /// Extract the complete-case design matrix for a covariate set.
    ///
    /// Rows with a missing value in any selected covariate are skipped.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a covariate is not a column of
    /// this table.
    pub fn design_matrix(&self, covariates: &CovariateSet) -> Result<DesignMatrix> {
        let columns = covariates
            .names()
            .iter()
            .map(|name| {
                self.column(name).ok_or_else(|| {
                    Error::Configuration(format!("covariate {name:?} is not a table column"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = Vec::with_capacity(self.num_rows() * columns.len());
        let mut rows = Vec::with_capacity(self.num_rows());
        let mut row_values = Vec::with_capacity(columns.len());
        for row in 0..self.num_rows() {
            row_values.clear();
            row_values.extend(columns.iter().map(|c| c.values[row]));
            if row_values.iter().all(Option::is_some) {
                data.extend(row_values.iter().flatten());
                rows.push(row);
            }
        }
        Ok(DesignMatrix {
            x: Matrix::from_row_major(rows.len(), columns.len(), data),
            rows,
        })
    }

    /// Build a new table from a subset (or reordering) of rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::Other` if an index is out of bounds.
    pub fn take_rows(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&bad) = indices.iter().find(|&&i| i >= self.num_rows()) {
            return Err(Error::Other(format!(
                "row index {bad} out of bounds (table has {} rows)",
                self.num_rows()
            )));
        }
        Ok(Self {
            descriptor: self.descriptor.clone(),
            user_ids: indices.iter().map(|&i| self.user_ids[i].clone()).collect(),
            treatment: indices.iter().map(|&i| self.treatment[i]).collect(),
            outcome: indices.iter().map(|&i| self.outcome[i]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: indices.iter().map(|&i| c.values[i]).collect(),
                })
                .collect(),
        })
    }
}

/// Builder for [`AnalysisTable`]
#[derive(Debug)]
pub struct AnalysisTableBuilder {
    descriptor: SchemaDescriptor,
    user_ids: Vec<String>,
    treatment: Vec<bool>,
    outcome: Vec<f64>,
    columns: Vec<Column>,
}

impl AnalysisTableBuilder {
    /// Create an empty builder
    #[must_use]
    pub const fn new(descriptor: SchemaDescriptor) -> Self {
        Self {
            descriptor,
            user_ids: Vec::new(),
            treatment: Vec::new(),
            outcome: Vec::new(),
            columns: Vec::new(),
        }
    }

    /// Set user identifiers
    #[must_use]
    pub fn user_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.user_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set treatment indicators
    #[must_use]
    pub fn treatment(mut self, treatment: impl IntoIterator<Item = bool>) -> Self {
        self.treatment = treatment.into_iter().collect();
        self
    }

    /// Set outcomes
    #[must_use]
    pub fn outcome(mut self, outcome: impl IntoIterator<Item = f64>) -> Self {
        self.outcome = outcome.into_iter().collect();
        self
    }

    /// Add a numeric column (covariate, post-treatment or timestamp field)
    #[must_use]
    pub fn column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    /// Validate and build the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if lengths disagree, ids or column names are
    /// duplicated, an outcome is not finite, or a column reuses a key name.
    pub fn build(self) -> Result<AnalysisTable> {
        self.descriptor.validate()?;
        let n = self.user_ids.len();
        if self.treatment.len() != n || self.outcome.len() != n {
            return Err(Error::Schema(format!(
                "length mismatch: {n} ids, {} treatment values, {} outcomes",
                self.treatment.len(),
                self.outcome.len()
            )));
        }
        if let Some(bad) = self.outcome.iter().position(|y| !y.is_finite()) {
            return Err(Error::Schema(format!("outcome at row {bad} is not finite")));
        }

        let mut seen_ids = HashSet::with_capacity(n);
        for id in &self.user_ids {
            if !seen_ids.insert(id.as_str()) {
                return Err(Error::Schema(format!("duplicate user id {id:?}")));
            }
        }

        let mut seen_columns = HashSet::new();
        for column in &self.columns {
            if column.values.len() != n {
                return Err(Error::Schema(format!(
                    "column {:?} has {} values, expected {n}",
                    column.name,
                    column.values.len()
                )));
            }
            let is_key = column.name == self.descriptor.id_column
                || column.name == self.descriptor.treatment_column
                || column.name == self.descriptor.outcome_column;
            if is_key || !seen_columns.insert(column.name.as_str()) {
                return Err(Error::Schema(format!(
                    "duplicate column name {:?}",
                    column.name
                )));
            }
        }

        Ok(AnalysisTable {
            descriptor: self.descriptor,
            user_ids: self.user_ids,
            treatment: self.treatment,
            outcome: self.outcome,
            columns: self.columns,
        })
    }
}

fn float_column(array: &ArrayRef) -> Result<Float64Array> {
    let cast = arrow::compute::cast(array, &DataType::Float64)?;
    let floats = cast
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Other("Failed to downcast column to Float64Array".to_string()))?;
    // NaN is treated as missing
    Ok(floats
        .iter()
        .map(|v| v.filter(|x| x.is_finite()))
        .collect())
}

fn string_column(array: &ArrayRef) -> Result<StringArray> {
    let cast = arrow::compute::cast(array, &DataType::Utf8)?;
    cast.as_any()
        .downcast_ref::<StringArray>()
        .cloned()
        .ok_or_else(|| Error::Other("Failed to downcast id column to StringArray".to_string()))
}
