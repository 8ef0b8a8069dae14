//! Run Record - metadata of one estimation run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run is created but not yet started.
    Pending,
    /// Run is currently executing.
    Running,
    /// Every estimate completed with status `Ok`.
    Success,
    /// The run finished but at least one estimate carries a warning or failure.
    Degraded,
    /// Run aborted with an error.
    Failed,
}

/// Run Record identifies a single execution of the pipeline.
///
/// Tracks the lifecycle from start to completion together with the inputs
/// needed to reproduce it (seed and row count).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunRecord {
    run_id: String,
    seed: u64,
    rows: usize,
    status: RunStatus,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    /// Create a new run record in Pending status with a time-based id.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        RunRecordBuilder::new(seed).build()
    }

    /// Create a builder for constructing a run record with optional fields.
    #[must_use]
    pub fn builder(seed: u64) -> RunRecordBuilder {
        RunRecordBuilder::new(seed)
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Seed every stochastic step derives from.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Rows in the analysed table.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.rows
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Get the start timestamp, if the run has started.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Get the end timestamp, if the run has completed.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Wall-clock duration, once the run has both timestamps.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.ended_at? - self.started_at?)
    }

    /// Start the run, transitioning from Pending to Running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Complete the run with the given final status.
    pub fn complete(&mut self, status: RunStatus) {
        self.status = status;
        self.ended_at = Some(Utc::now());
    }
}

/// Builder for `RunRecord`.
#[derive(Debug)]
pub struct RunRecordBuilder {
    run_id: Option<String>,
    seed: u64,
    rows: usize,
}

impl RunRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            run_id: None,
            seed,
            rows: 0,
        }
    }

    /// Use an explicit run ID instead of a time-based one.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Record the analysed row count.
    #[must_use]
    pub const fn rows(mut self, rows: usize) -> Self {
        self.rows = rows;
        self
    }

    /// Build the `RunRecord`.
    #[must_use]
    pub fn build(self) -> RunRecord {
        let run_id = self.run_id.unwrap_or_else(|| {
            format!("run-{}-s{}", Utc::now().format("%Y%m%dT%H%M%S%.6fZ"), self.seed)
        });
        RunRecord {
            run_id,
            seed: self.seed,
            rows: self.rows,
            status: RunStatus::Pending,
            started_at: None,
            ended_at: None,
        }
    }
}
