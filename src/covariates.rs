//! Covariate selection
//!
//! Chooses numeric pre-treatment covariates from a declared table: every
//! numeric column that is not reserved by the schema descriptor, is not
//! constant and is not missing too often.

use crate::table::AnalysisTable;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Default maximum fraction of missing values tolerated in a covariate
pub const DEFAULT_MAX_MISSING_FRACTION: f64 = 0.05;

/// Ordered, immutable set of covariate column names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CovariateSet {
    columns: Vec<String>,
}

impl CovariateSet {
    /// Build a set from explicit names, validated against the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if the list is empty, a name is not a
    /// numeric column of the table, a name is reserved, or a name repeats.
    pub fn from_names<I, S>(table: &AnalysisTable, names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let descriptor = table.descriptor();
        let mut columns: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if descriptor.is_reserved(&name) {
                return Err(Error::Configuration(format!(
                    "column {name:?} is reserved and cannot be a covariate"
                )));
            }
            if table.column(&name).is_none() {
                return Err(Error::Configuration(format!(
                    "covariate {name:?} is not a numeric column of the table"
                )));
            }
            if columns.contains(&name) {
                return Err(Error::Configuration(format!("covariate {name:?} listed twice")));
            }
            columns.push(name);
        }
        if columns.is_empty() {
            return Err(Error::Configuration("covariate set is empty".to_string()));
        }
        Ok(Self { columns })
    }

    /// Column names in selection order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.columns
    }

    /// Number of covariates
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Always false for a constructed set; provided for API symmetry
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Whether `name` is in the set
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// A new set without the given columns (e.g. collinear ones).
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if nothing would remain.
    pub fn without(&self, drop: &[String]) -> Result<Self> {
        let columns: Vec<String> = self
            .columns
            .iter()
            .filter(|c| !drop.contains(c))
            .cloned()
            .collect();
        if columns.is_empty() {
            return Err(Error::Configuration(
                "covariate set is empty after dropping collinear columns".to_string(),
            ));
        }
        Ok(Self { columns })
    }
}

/// Why a column was not selected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Identifier, treatment, outcome, post-treatment or timestamp field
    Reserved,
    /// Missing fraction above the threshold
    TooManyMissing,
    /// Zero variance
    Constant,
    /// Not in the explicit candidate list
    NotCandidate,
}

/// Selected set plus the columns that were dropped and why
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionReport {
    /// Selected covariates
    pub selected: CovariateSet,
    /// Dropped columns with reasons, in table order
    pub dropped: Vec<(String, DropReason)>,
}

/// Selects covariates from an analysis table
#[derive(Debug, Clone)]
pub struct CovariateSelector {
    max_missing_fraction: f64,
    candidates: Option<Vec<String>>,
}

impl Default for CovariateSelector {
    fn default() -> Self {
        Self {
            max_missing_fraction: DEFAULT_MAX_MISSING_FRACTION,
            candidates: None,
        }
    }
}

impl CovariateSelector {
    /// Create a selector with a missingness threshold in `[0, 1)`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` for a threshold outside `[0, 1)`.
    pub fn new(max_missing_fraction: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&max_missing_fraction) {
            return Err(Error::Configuration(format!(
                "max_missing_fraction must lie in [0, 1), got {max_missing_fraction}"
            )));
        }
        Ok(Self {
            max_missing_fraction,
            candidates: None,
        })
    }

    /// Restrict selection to an explicit candidate list.
    #[must_use]
    pub fn with_candidates<I, S>(mut self, candidates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.candidates = Some(candidates.into_iter().map(Into::into).collect());
        self
    }

    /// Select covariates.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` if a candidate is unknown or reserved,
    /// or if no column survives selection.
    pub fn select(&self, table: &AnalysisTable) -> Result<SelectionReport> {
        let descriptor = table.descriptor();

        if let Some(candidates) = &self.candidates {
            for name in candidates {
                if descriptor.is_reserved(name) {
                    return Err(Error::Configuration(format!(
                        "candidate {name:?} is reserved and cannot be a covariate"
                    )));
                }
                if table.column(name).is_none() {
                    return Err(Error::Configuration(format!(
                        "candidate {name:?} is not a numeric column of the table"
                    )));
                }
            }
        }

        let mut selected = Vec::new();
        let mut dropped = Vec::new();
        for column in table.columns() {
            let name = column.name();
            let reason = if descriptor.is_reserved(name) {
                Some(DropReason::Reserved)
            } else if self
                .candidates
                .as_ref()
                .is_some_and(|c| !c.iter().any(|n| n == name))
            {
                Some(DropReason::NotCandidate)
            } else if column.missing_fraction() > self.max_missing_fraction {
                Some(DropReason::TooManyMissing)
            } else if column.is_constant() {
                Some(DropReason::Constant)
            } else {
                None
            };

            match reason {
                Some(reason) => {
                    debug!(column = %name, ?reason, "covariate dropped");
                    dropped.push((name.to_string(), reason));
                }
                None => selected.push(name.to_string()),
            }
        }

        if selected.is_empty() {
            return Err(Error::Configuration(
                "no eligible covariates: every numeric column is reserved, constant or too sparse"
                    .to_string(),
            ));
        }
        info!(selected = selected.len(), dropped = dropped.len(), "covariates selected");

        Ok(SelectionReport {
            selected: CovariateSet { columns: selected },
            dropped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaDescriptor;
    use crate::table::Column;

    fn table() -> AnalysisTable {
        let descriptor = SchemaDescriptor::default()
            .with_post_treatment(["revenue"])
            .with_timestamps(["signup_ts"]);
        AnalysisTable::builder(descriptor)
            .user_ids(["a", "b", "c", "d"])
            .treatment([true, false, true, false])
            .outcome([1.0, 0.0, 1.0, 0.0])
            .column(Column::dense("age", vec![20.0, 30.0, 40.0, 50.0]))
            .column(Column::dense("constant", vec![1.0; 4]))
            .column(Column::new("sparse", vec![Some(1.0), None, None, Some(2.0)]))
            .column(Column::dense("revenue", vec![10.0, 0.0, 12.0, 0.0]))
            .column(Column::dense("signup_ts", vec![1.0, 2.0, 3.0, 4.0]))
            .column(Column::dense("sessions", vec![4.0, 1.0, 7.0, 2.0]))
            .build()
            .unwrap()
    }

    #[test]
    fn test_select_excludes_reserved_constant_and_sparse() {
        let report = CovariateSelector::default().select(&table()).unwrap();
        assert_eq!(report.selected.names(), &["age".to_string(), "sessions".to_string()]);
        assert!(report
            .dropped
            .contains(&("revenue".to_string(), DropReason::Reserved)));
        assert!(report
            .dropped
            .contains(&("signup_ts".to_string(), DropReason::Reserved)));
        assert!(report
            .dropped
            .contains(&("constant".to_string(), DropReason::Constant)));
        assert!(report
            .dropped
            .contains(&("sparse".to_string(), DropReason::TooManyMissing)));
    }

    #[test]
    fn test_threshold_admits_sparse_column() {
        let report = CovariateSelector::new(0.6).unwrap().select(&table()).unwrap();
        assert!(report.selected.contains("sparse"));
    }

    #[test]
    fn test_invalid_threshold() {
        assert!(matches!(CovariateSelector::new(1.0), Err(Error::Configuration(_))));
        assert!(CovariateSelector::new(-0.1).is_err());
    }

    #[test]
    fn test_candidates_restrict_and_guard_leakage() {
        let report = CovariateSelector::default()
            .with_candidates(["sessions"])
            .select(&table())
            .unwrap();
        assert_eq!(report.selected.names(), &["sessions".to_string()]);

        let leak = CovariateSelector::default()
            .with_candidates(["revenue"])
            .select(&table());
        assert!(matches!(leak, Err(Error::Configuration(_))));

        let unknown = CovariateSelector::default()
            .with_candidates(["nope"])
            .select(&table());
        assert!(unknown.is_err());
    }

    #[test]
    fn test_empty_selection_is_configuration_error() {
        let result = CovariateSelector::default()
            .with_candidates(["constant"])
            .select(&table());
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_without_keeps_order_and_rejects_empty() {
        let set = CovariateSet::from_names(&table(), ["age", "sessions"]).unwrap();
        let reduced = set.without(&["age".to_string()]).unwrap();
        assert_eq!(reduced.names(), &["sessions".to_string()]);
        assert!(reduced.without(&["sessions".to_string()]).is_err());
    }

    #[test]
    fn test_from_names_rejects_reserved() {
        let result = CovariateSet::from_names(&table(), ["booking"]);
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
