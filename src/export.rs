//! Per-record export table
//!
//! One Arrow `RecordBatch` with a row per user: the key columns, every
//! numeric input column, and the per-record outputs of each stage. Columns
//! of a stage that produced no value are written as nulls, and the stage
//! status is repeated in a `*_status` column so a consumer never has to
//! open the JSON report to tell a failed stage from a missing value.

use crate::pipeline::PipelineOutput;
use crate::storage::StorageEngine;
use crate::table::AnalysisTable;
use crate::{Error, Result};
use arrow::array::{ArrayRef, BooleanArray, Float64Array, Int32Array, StringArray, UInt64Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

/// Column names appended to the input columns
pub const OUTPUT_COLUMNS: [&str; 13] = [
    "adjusted_outcome",
    "propensity_score",
    "matched",
    "match_count",
    "uplift_score",
    "uplift_score_clipped",
    "uplift_decile",
    "high_uplift",
    "incomplete",
    "cuped_status",
    "matching_status",
    "uplift_status",
    "run_id",
];

struct Columns {
    fields: Vec<Field>,
    arrays: Vec<ArrayRef>,
}

impl Columns {
    fn push(&mut self, name: &str, data_type: DataType, nullable: bool, array: ArrayRef) {
        self.fields.push(Field::new(name, data_type, nullable));
        self.arrays.push(array);
    }

    fn floats(&mut self, name: &str, values: Vec<Option<f64>>) {
        self.push(name, DataType::Float64, true, Arc::new(Float64Array::from(values)));
    }

    fn flags(&mut self, name: &str, values: Vec<Option<bool>>) {
        self.push(name, DataType::Boolean, true, Arc::new(BooleanArray::from(values)));
    }

    fn counts(&mut self, name: &str, values: Vec<Option<u64>>) {
        self.push(name, DataType::UInt64, true, Arc::new(UInt64Array::from(values)));
    }

    fn constant(&mut self, name: &str, value: &str, n: usize) {
        let array = StringArray::from_iter_values(std::iter::repeat(value).take(n));
        self.push(name, DataType::Utf8, false, Arc::new(array));
    }
}

fn or_nulls<T: Clone>(values: Option<&[Option<T>]>, n: usize) -> Vec<Option<T>> {
    values.map_or_else(|| vec![None; n], <[Option<T>]>::to_vec)
}

/// Build the export batch for one run.
///
/// # Errors
///
/// - `Error::Schema` if an input column name collides with an output column
///   or the output does not belong to this table
/// - `Error::Arrow` if the batch cannot be assembled
pub fn export_batch(table: &AnalysisTable, output: &PipelineOutput) -> Result<RecordBatch> {
    let n = table.num_rows();
    if output.run.rows() != n {
        return Err(Error::Schema(format!(
            "run analysed {} rows but the table has {n}",
            output.run.rows()
        )));
    }
    let descriptor = table.descriptor();
    let mut taken: BTreeSet<&str> = OUTPUT_COLUMNS.into_iter().collect();
    for name in [
        descriptor.id_column.as_str(),
        descriptor.treatment_column.as_str(),
        descriptor.outcome_column.as_str(),
    ]
    .into_iter()
    .chain(table.columns().iter().map(|c| c.name()))
    {
        if !taken.insert(name) {
            return Err(Error::Schema(format!(
                "column {name:?} collides with an export column"
            )));
        }
    }

    let mut columns = Columns {
        fields: Vec::new(),
        arrays: Vec::new(),
    };
    columns.push(
        &descriptor.id_column,
        DataType::Utf8,
        false,
        Arc::new(StringArray::from_iter_values(table.user_ids())),
    );
    columns.push(
        &descriptor.treatment_column,
        DataType::Int32,
        false,
        Arc::new(Int32Array::from_iter_values(
            table.treatment().iter().map(|&t| i32::from(t)),
        )),
    );
    columns.push(
        &descriptor.outcome_column,
        DataType::Float64,
        false,
        Arc::new(Float64Array::from(table.outcome().to_vec())),
    );
    for column in table.columns() {
        columns.floats(column.name(), column.values().to_vec());
    }

    let cuped = output.cuped.value();
    let adjusted = match cuped {
        Some(result) => result.adjusted.clone(),
        None if !output.config.cuped.enabled => {
            table.outcome().iter().copied().map(Some).collect()
        }
        None => vec![None; n],
    };
    columns.floats("adjusted_outcome", adjusted);

    let propensity = output.propensity.value().map(|p| p.scores.as_slice());
    columns.floats("propensity_score", or_nulls(propensity, n));

    let matching = output.matching.value();
    columns.flags(
        "matched",
        (0..n)
            .map(|row| matching.map(|m| m.match_counts[row] > 0))
            .collect(),
    );
    columns.counts(
        "match_count",
        (0..n)
            .map(|row| matching.and_then(|m| u64::try_from(m.match_counts[row]).ok()))
            .collect(),
    );

    let uplift = output.uplift.value();
    columns.floats("uplift_score", or_nulls(uplift.map(|u| u.scores.as_slice()), n));
    columns.floats(
        "uplift_score_clipped",
        or_nulls(uplift.map(|u| u.clipped.as_slice()), n),
    );
    let segments = output.diagnostics.segments.as_ref();
    columns.counts(
        "uplift_decile",
        (0..n)
            .map(|row| {
                segments
                    .and_then(|s| s.bins[row])
                    .and_then(|b| u64::try_from(b).ok())
            })
            .collect(),
    );
    columns.flags(
        "high_uplift",
        or_nulls(segments.map(|s| s.high_uplift.as_slice()), n),
    );

    let covariates = &output.selection.selected;
    let selected: Vec<&[Option<f64>]> = table
        .columns()
        .iter()
        .filter(|c| covariates.contains(c.name()))
        .map(|c| c.values())
        .collect();
    columns.flags(
        "incomplete",
        (0..n)
            .map(|row| Some(selected.iter().any(|values| values[row].is_none())))
            .collect(),
    );

    columns.constant("cuped_status", output.cuped.status.as_str(), n);
    columns.constant("matching_status", output.matching.status.as_str(), n);
    columns.constant("uplift_status", output.uplift.status.as_str(), n);
    columns.constant("run_id", output.run.run_id(), n);

    Ok(RecordBatch::try_new(
        Arc::new(Schema::new(columns.fields)),
        columns.arrays,
    )?)
}

/// Build the export batch and write it to one Parquet file.
///
/// # Errors
///
/// Returns any error of [`export_batch`] or of the Parquet writer.
pub fn write_parquet<P: AsRef<Path>>(
    table: &AnalysisTable,
    output: &PipelineOutput,
    path: P,
) -> Result<()> {
    let batch = export_batch(table, output)?;
    StorageEngine::new(vec![batch]).write_parquet(path)
}
