//! Storage backend (Arrow/Parquet)
//!
//! Batch-in, batch-out: an experiment snapshot is read fully into memory as
//! `RecordBatch`es, converted once into an [`AnalysisTable`], and results are
//! written back as a single Parquet file. Appends are whole batches with a
//! matching schema; there are no row-level updates.

use crate::schema::SchemaDescriptor;
use crate::table::AnalysisTable;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use std::fs::File;
use std::path::Path;
use tracing::{debug, info};

/// Row group size used when writing Parquet
pub const DEFAULT_ROW_GROUP_SIZE: usize = 64 * 1024;

/// In-memory store of Arrow record batches
#[derive(Debug, Clone, Default)]
pub struct StorageEngine {
    batches: Vec<RecordBatch>,
}

impl StorageEngine {
    /// Create a storage engine from existing batches
    ///
    /// Useful for testing and benchmarking
    #[must_use]
    pub fn new(batches: Vec<RecordBatch>) -> Self {
        Self { batches }
    }

    /// Load a table from a Parquet file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?;

        let reader = builder
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

        let mut engine = Self::default();
        for batch in reader {
            engine.append_batch(
                batch.map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))?,
            )?;
        }
        info!(
            path = %path.as_ref().display(),
            batches = engine.batches.len(),
            rows = engine.num_rows(),
            "loaded Parquet snapshot"
        );

        Ok(engine)
    }

    /// Get all record batches
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total rows across batches
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Append a batch of snapshot rows. Column names and types must match
    /// the stored batches; empty batches are dropped.
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` naming the first differing column.
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if batch.num_rows() == 0 {
            return Ok(());
        }
        if let Some(first) = self.batches.first() {
            let stored = first.schema();
            let incoming = batch.schema();
            if stored.fields().len() != incoming.fields().len() {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: {} stored columns, batch has {}",
                    stored.fields().len(),
                    incoming.fields().len()
                )));
            }
            let differing = stored.fields().iter().zip(incoming.fields().iter()).find(|(a, b)| {
                a.name() != b.name() || a.data_type() != b.data_type()
            });
            if let Some((expected, got)) = differing {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected column {} ({}), got {} ({})",
                    expected.name(),
                    expected.data_type(),
                    got.name(),
                    got.data_type()
                )));
            }
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Convert the stored batches into an analysis table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if the batches do not match the descriptor.
    pub fn analysis_table(&self, descriptor: &SchemaDescriptor) -> Result<AnalysisTable> {
        AnalysisTable::from_batches(&self.batches, descriptor)
    }

    /// Write every stored batch to one Parquet file
    ///
    /// # Errors
    ///
    /// Returns `Error::StorageError` when there is nothing to write, or an
    /// IO/Parquet error from the writer.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let first = self
            .batches
            .first()
            .ok_or_else(|| Error::StorageError("No batches to write".to_string()))?;

        let file = File::create(path.as_ref())?;
        let props = WriterProperties::builder()
            .set_max_row_group_size(DEFAULT_ROW_GROUP_SIZE)
            .build();
        let mut writer = ArrowWriter::try_new(file, first.schema(), Some(props))?;
        for batch in &self.batches {
            writer.write(batch)?;
        }
        writer.close()?;
        debug!(path = %path.as_ref().display(), rows = self.num_rows(), "wrote Parquet file");
        Ok(())
    }
}
