//! Schema descriptor for the analysis table
//!
//! Reserved columns are declared up front instead of being inferred from the
//! data at runtime. The descriptor is validated once, when the table is built.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Typed record of the reserved column names of an analysis table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaDescriptor {
    /// Unique user identifier column
    pub id_column: String,
    /// Binary treatment indicator column (0/1)
    pub treatment_column: String,
    /// Outcome column (0/1 or numeric)
    pub outcome_column: String,
    /// Fields observed after treatment; never eligible as covariates
    pub post_treatment_columns: Vec<String>,
    /// Timestamp fields; only used for leakage validation
    pub timestamp_columns: Vec<String>,
}

impl Default for SchemaDescriptor {
    fn default() -> Self {
        Self {
            id_column: "user_id".to_string(),
            treatment_column: "treatment".to_string(),
            outcome_column: "booking".to_string(),
            post_treatment_columns: Vec::new(),
            timestamp_columns: Vec::new(),
        }
    }
}

impl SchemaDescriptor {
    /// Create a descriptor with the three key columns.
    #[must_use]
    pub fn new(
        id_column: impl Into<String>,
        treatment_column: impl Into<String>,
        outcome_column: impl Into<String>,
    ) -> Self {
        Self {
            id_column: id_column.into(),
            treatment_column: treatment_column.into(),
            outcome_column: outcome_column.into(),
            post_treatment_columns: Vec::new(),
            timestamp_columns: Vec::new(),
        }
    }

    /// Declare post-treatment columns.
    #[must_use]
    pub fn with_post_treatment<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.post_treatment_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Declare timestamp columns.
    #[must_use]
    pub fn with_timestamps<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.timestamp_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// All column names that may never enter a covariate set.
    #[must_use]
    pub fn reserved(&self) -> BTreeSet<&str> {
        let mut reserved = BTreeSet::new();
        reserved.insert(self.id_column.as_str());
        reserved.insert(self.treatment_column.as_str());
        reserved.insert(self.outcome_column.as_str());
        reserved.extend(self.post_treatment_columns.iter().map(String::as_str));
        reserved.extend(self.timestamp_columns.iter().map(String::as_str));
        reserved
    }

    /// Whether `name` is a reserved column.
    #[must_use]
    pub fn is_reserved(&self, name: &str) -> bool {
        self.reserved().contains(name)
    }

    /// Check the descriptor is internally consistent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Schema` if a key column name is empty or the key
    /// columns are not distinct.
    pub fn validate(&self) -> Result<()> {
        let keys = [
            ("id", &self.id_column),
            ("treatment", &self.treatment_column),
            ("outcome", &self.outcome_column),
        ];
        for (role, name) in keys {
            if name.trim().is_empty() {
                return Err(Error::Schema(format!("{role} column name is empty")));
            }
        }
        if self.id_column == self.treatment_column
            || self.id_column == self.outcome_column
            || self.treatment_column == self.outcome_column
        {
            return Err(Error::Schema(format!(
                "id, treatment and outcome columns must be distinct (got {:?}, {:?}, {:?})",
                self.id_column, self.treatment_column, self.outcome_column
            )));
        }
        for name in self.post_treatment_columns.iter().chain(&self.timestamp_columns) {
            if name == &self.treatment_column {
                return Err(Error::Schema(format!(
                    "treatment column {name:?} cannot also be a post-treatment or timestamp field"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_contains_all_declared_columns() {
        let descriptor = SchemaDescriptor::new("id", "t", "y")
            .with_post_treatment(["revenue"])
            .with_timestamps(["first_booking_at"]);
        let reserved = descriptor.reserved();
        for name in ["id", "t", "y", "revenue", "first_booking_at"] {
            assert!(reserved.contains(name), "{name} should be reserved");
        }
        assert!(!descriptor.is_reserved("age"));
    }

    #[test]
    fn test_validate_rejects_duplicate_keys() {
        let descriptor = SchemaDescriptor::new("id", "id", "y");
        assert!(matches!(descriptor.validate(), Err(Error::Schema(_))));
    }

    #[test]
    fn test_validate_rejects_empty_names() {
        let descriptor = SchemaDescriptor::new("", "t", "y");
        assert!(descriptor.validate().is_err());
    }

    #[test]
    fn test_default_matches_booking_schema() {
        let descriptor = SchemaDescriptor::default();
        assert_eq!(descriptor.outcome_column, "booking");
        assert!(descriptor.validate().is_ok());
    }
}
