//! Metric Record - headline numbers of a run

use crate::pipeline::EstimateStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metric Record represents one named scalar produced by a run.
///
/// Keys are dotted paths such as `adjusted_test.p_value` or
/// `matching.match_rate`, so a flat list of records can be filtered by
/// `run_id` and key prefix without knowing the report layout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricRecord {
    run_id: String,
    key: String,
    value: f64,
    status: EstimateStatus,
    timestamp: DateTime<Utc>,
}

impl MetricRecord {
    /// Create a new metric record with status `Ok` and the current timestamp.
    #[must_use]
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, value: f64) -> Self {
        MetricRecordBuilder::new(run_id, key, value).build()
    }

    /// Create a builder for constructing a metric record with optional fields.
    #[must_use]
    pub fn builder(
        run_id: impl Into<String>,
        key: impl Into<String>,
        value: f64,
    ) -> MetricRecordBuilder {
        MetricRecordBuilder::new(run_id, key, value)
    }

    /// Get the run ID.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Get the metric key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Get the metric value.
    #[must_use]
    pub const fn value(&self) -> f64 {
        self.value
    }

    /// Status of the estimate the metric came from.
    #[must_use]
    pub const fn status(&self) -> EstimateStatus {
        self.status
    }

    /// Get the timestamp when the metric was recorded.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

/// Builder for `MetricRecord`.
#[derive(Debug)]
pub struct MetricRecordBuilder {
    run_id: String,
    key: String,
    value: f64,
    status: EstimateStatus,
    timestamp: DateTime<Utc>,
}

impl MetricRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(run_id: impl Into<String>, key: impl Into<String>, value: f64) -> Self {
        Self {
            run_id: run_id.into(),
            key: key.into(),
            value,
            status: EstimateStatus::Ok,
            timestamp: Utc::now(),
        }
    }

    /// Set the estimate status.
    #[must_use]
    pub const fn status(mut self, status: EstimateStatus) -> Self {
        self.status = status;
        self
    }

    /// Set a custom timestamp.
    #[must_use]
    pub const fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Build the `MetricRecord`.
    #[must_use]
    pub fn build(self) -> MetricRecord {
        MetricRecord {
            run_id: self.run_id,
            key: self.key,
            value: self.value,
            status: self.status,
            timestamp: self.timestamp,
        }
    }
}
