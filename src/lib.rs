//! # Causify: Experiment Effect Estimation
//!
//! **Version**: 0.1.0
//!
//! Causify estimates the effect of a product change on a binary or
//! continuous outcome from a prepared, one-row-per-user experiment table,
//! and scores every user with a predicted individual effect for targeted
//! rollout.
//!
//! ## Estimation paths
//!
//! - **CUPED**: regression adjustment on pre-period covariates, then a
//!   two-sample z-test on the adjusted outcome
//! - **Propensity matching**: regularised logistic propensity model,
//!   greedy nearest-neighbour matching, ATE with confidence bounds and a
//!   before/after balance table
//! - **X-Learner**: four base-learner fits (random forest or ridge) blended
//!   by the propensity score into a per-user uplift score
//!
//! All three read the same immutable [`table::AnalysisTable`] and run
//! independently; [`diagnostics`] joins their outputs.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use causify::config::PipelineConfig;
//! use causify::pipeline::Pipeline;
//! use causify::report::RunReport;
//!
//! let pipeline = Pipeline::new(PipelineConfig::from_json_file("config.json")?)?;
//! let table = pipeline.load_table("data/analysis.parquet")?;
//! let output = pipeline.run(&table)?;
//!
//! causify::export::write_parquet(&table, &output, "out/users.parquet")?;
//! RunReport::from_output(&output).write_json("out/report.json")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod covariates;
pub mod cuped;
pub mod diagnostics;
pub mod error;
pub mod export;
pub mod linalg;
pub mod pipeline;
pub mod propensity;
pub mod report;
pub mod schema;
pub mod significance;
pub mod stats;
pub mod storage;
pub mod synthetic;
pub mod table;
pub mod uplift;

pub use error::{Error, EstimationError, Result};
pub use pipeline::{EstimateStatus, Pipeline, PipelineOutput, StageOutcome};
