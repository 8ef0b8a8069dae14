//! Pipeline configuration
//!
//! Every recognized option lives here, with defaults matching the booking
//! experiment. Configs are plain serde structs loadable from JSON; each one
//! validates itself and fails with `Error::Configuration`.

use crate::covariates::DEFAULT_MAX_MISSING_FRACTION;
use crate::schema::SchemaDescriptor;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default seed for every stochastic step
pub const DEFAULT_SEED: u64 = 42;

/// Covariate selection options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CovariateConfig {
    /// Maximum tolerated fraction of missing values, in [0, 1)
    pub max_missing_fraction: f64,
    /// Optional explicit candidate list
    pub candidates: Option<Vec<String>>,
}

impl Default for CovariateConfig {
    fn default() -> Self {
        Self {
            max_missing_fraction: DEFAULT_MAX_MISSING_FRACTION,
            candidates: None,
        }
    }
}

/// CUPED options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CupedConfig {
    /// Run the adjustment at all (the tester falls back to the raw outcome)
    pub enabled: bool,
    /// Estimate coefficients on a seeded random fraction of rows
    pub holdout_fraction: Option<f64>,
    /// Drop reported collinear columns and refit once
    pub retry_on_collinearity: bool,
}

impl Default for CupedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            holdout_fraction: None,
            retry_on_collinearity: true,
        }
    }
}

impl CupedConfig {
    /// # Errors
    ///
    /// Returns `Error::Configuration` for a hold-out fraction outside (0, 1).
    pub fn validate(&self) -> Result<()> {
        if let Some(f) = self.holdout_fraction {
            if !(f > 0.0 && f < 1.0) {
                return Err(Error::Configuration(format!(
                    "cuped.holdout_fraction must lie in (0, 1), got {f}"
                )));
            }
        }
        Ok(())
    }
}

/// Propensity model and matching options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Control units per treated unit
    pub k: usize,
    /// Allow a control unit to be matched more than once
    pub with_replacement: bool,
    /// Maximum propensity distance for a match (`None` disables)
    pub caliper: Option<f64>,
    /// Minimum fraction of treated units that must be matched
    pub min_match_rate: f64,
    /// Inverse L2 penalty strength of the logistic model (larger = weaker)
    pub regularization: f64,
    /// Newton iterations before reporting non-convergence
    pub max_iterations: usize,
    /// Convergence tolerance on the largest coefficient step
    pub tolerance: f64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            k: 1,
            with_replacement: false,
            caliper: Some(0.05),
            min_match_rate: 0.5,
            regularization: 1.0,
            max_iterations: 100,
            tolerance: 1e-8,
        }
    }
}

impl MatchingConfig {
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.k == 0 {
            return Err(Error::Configuration("matching.k must be at least 1".to_string()));
        }
        if let Some(c) = self.caliper {
            if !(c > 0.0 && c.is_finite()) {
                return Err(Error::Configuration(format!(
                    "matching.caliper must be positive, got {c}"
                )));
            }
        }
        if !(0.0..=1.0).contains(&self.min_match_rate) {
            return Err(Error::Configuration(format!(
                "matching.min_match_rate must lie in [0, 1], got {}",
                self.min_match_rate
            )));
        }
        if !(self.regularization > 0.0) {
            return Err(Error::Configuration(format!(
                "matching.regularization must be positive, got {}",
                self.regularization
            )));
        }
        if self.max_iterations == 0 || !(self.tolerance > 0.0) {
            return Err(Error::Configuration(
                "matching.max_iterations and matching.tolerance must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Random forest hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    /// Number of trees
    pub n_trees: usize,
    /// Maximum tree depth
    pub max_depth: usize,
    /// Minimum samples in a leaf
    pub min_samples_leaf: usize,
    /// Fraction of features considered per split, in (0, 1]
    pub feature_fraction: f64,
    /// Bootstrap sample size as a fraction of the training rows, in (0, 1]
    pub sample_fraction: f64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: 5,
            min_samples_leaf: 5,
            feature_fraction: 1.0,
            sample_fraction: 1.0,
        }
    }
}

impl ForestParams {
    /// # Errors
    ///
    /// Returns `Error::Configuration` for a zero count or a fraction outside (0, 1].
    pub fn validate(&self) -> Result<()> {
        if self.n_trees == 0 || self.max_depth == 0 || self.min_samples_leaf == 0 {
            return Err(Error::Configuration(
                "random forest n_trees, max_depth and min_samples_leaf must be positive"
                    .to_string(),
            ));
        }
        let unit = |v: f64| v > 0.0 && v <= 1.0;
        if !unit(self.feature_fraction) || !unit(self.sample_fraction) {
            return Err(Error::Configuration(
                "random forest feature_fraction and sample_fraction must lie in (0, 1]"
                    .to_string(),
            ));
        }
        Ok(())
    }
}

/// Base learner for the X-Learner sub-models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BaseLearner {
    /// Bagged regression trees
    RandomForest(ForestParams),
    /// Ridge-regularised least squares
    Linear {
        /// L2 penalty on slopes
        ridge: f64,
    },
}

impl Default for BaseLearner {
    fn default() -> Self {
        Self::RandomForest(ForestParams::default())
    }
}

impl BaseLearner {
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid hyperparameters.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::RandomForest(params) => params.validate()?,
            Self::Linear { ridge } => {
                if !(*ridge >= 0.0 && ridge.is_finite()) {
                    return Err(Error::Configuration(format!(
                        "linear ridge must be non-negative, got {ridge}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Propensity clipping bounds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClipBounds {
    /// Lower bound
    pub low: f64,
    /// Upper bound
    pub high: f64,
}

impl Default for ClipBounds {
    fn default() -> Self {
        Self {
            low: 0.01,
            high: 0.99,
        }
    }
}

impl ClipBounds {
    /// Clamp a value into the bounds
    #[must_use]
    pub fn clip(&self, value: f64) -> f64 {
        value.clamp(self.low, self.high)
    }
}

/// X-Learner options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpliftConfig {
    /// Regressor used for outcome and effect models
    pub base_learner: BaseLearner,
    /// Minimum complete records per arm
    pub min_arm_size: usize,
    /// Propensity clipping for the combination step
    pub propensity_clip: ClipBounds,
    /// Symmetric clip applied to the visualisation copy of the score
    pub score_clip: f64,
}

impl Default for UpliftConfig {
    fn default() -> Self {
        Self {
            base_learner: BaseLearner::default(),
            min_arm_size: 30,
            propensity_clip: ClipBounds::default(),
            score_clip: 0.2,
        }
    }
}

impl UpliftConfig {
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid bounds or hyperparameters.
    pub fn validate(&self) -> Result<()> {
        self.base_learner.validate()?;
        let ClipBounds { low, high } = self.propensity_clip;
        if !(low > 0.0 && low < high && high < 1.0) {
            return Err(Error::Configuration(format!(
                "uplift.propensity_clip must satisfy 0 < low < high < 1, got [{low}, {high}]"
            )));
        }
        if self.min_arm_size < 2 {
            return Err(Error::Configuration(
                "uplift.min_arm_size must be at least 2".to_string(),
            ));
        }
        if !(self.score_clip > 0.0) {
            return Err(Error::Configuration(format!(
                "uplift.score_clip must be positive, got {}",
                self.score_clip
            )));
        }
        Ok(())
    }
}

/// Diagnostics options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    /// Number of uplift score bins (deciles by default)
    pub n_bins: usize,
    /// |SMD| below which a covariate counts as balanced
    pub balance_threshold: f64,
    /// Planned treated share for the sample-ratio check
    pub expected_treated_share: f64,
    /// Significance level of the sample-ratio check
    pub srm_alpha: f64,
    /// Score quantile above which a user is flagged high-uplift
    pub high_uplift_quantile: f64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            n_bins: 10,
            balance_threshold: 0.1,
            expected_treated_share: 0.5,
            srm_alpha: 0.001,
            high_uplift_quantile: 0.75,
        }
    }
}

impl DiagnosticsConfig {
    /// # Errors
    ///
    /// Returns `Error::Configuration` for invalid thresholds.
    pub fn validate(&self) -> Result<()> {
        if self.n_bins < 2 {
            return Err(Error::Configuration(
                "diagnostics.n_bins must be at least 2".to_string(),
            ));
        }
        let open_unit = |v: f64| v > 0.0 && v < 1.0;
        if !open_unit(self.expected_treated_share)
            || !open_unit(self.srm_alpha)
            || !open_unit(self.high_uplift_quantile)
        {
            return Err(Error::Configuration(
                "diagnostics share, alpha and quantile must lie in (0, 1)".to_string(),
            ));
        }
        if !(self.balance_threshold > 0.0) {
            return Err(Error::Configuration(
                "diagnostics.balance_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Full pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reserved column names of the input table
    pub schema: SchemaDescriptor,
    /// Seed for every stochastic step (pinned for reproducibility)
    pub seed: u64,
    /// Confidence level for all intervals
    pub confidence_level: f64,
    /// Covariate selection
    pub covariates: CovariateConfig,
    /// CUPED adjustment
    pub cuped: CupedConfig,
    /// Propensity matching
    pub matching: MatchingConfig,
    /// X-Learner uplift
    pub uplift: UpliftConfig,
    /// Diagnostics
    pub diagnostics: DiagnosticsConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            schema: SchemaDescriptor::default(),
            seed: DEFAULT_SEED,
            confidence_level: 0.95,
            covariates: CovariateConfig::default(),
            cuped: CupedConfig::default(),
            matching: MatchingConfig::default(),
            uplift: UpliftConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from a JSON file and validate.
    ///
    /// # Errors
    ///
    /// Returns an IO or JSON error if the file cannot be read or parsed,
    /// or `Error::Configuration` if validation fails.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Parse from a JSON string and validate. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns a JSON error or `Error::Configuration`.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the seed
    #[must_use]
    pub const fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the schema descriptor
    #[must_use]
    pub fn with_schema(mut self, schema: SchemaDescriptor) -> Self {
        self.schema = schema;
        self
    }

    /// Set the confidence level
    #[must_use]
    pub const fn with_confidence_level(mut self, level: f64) -> Self {
        self.confidence_level = level;
        self
    }

    /// Set matching options
    #[must_use]
    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    /// Set uplift options
    #[must_use]
    pub fn with_uplift(mut self, uplift: UpliftConfig) -> Self {
        self.uplift = uplift;
        self
    }

    /// Set CUPED options
    #[must_use]
    pub fn with_cuped(mut self, cuped: CupedConfig) -> Self {
        self.cuped = cuped;
        self
    }

    /// Validate every section.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` (or `Error::Schema`) on the first
    /// invalid option.
    pub fn validate(&self) -> Result<()> {
        self.schema.validate()?;
        if !(self.confidence_level > 0.0 && self.confidence_level < 1.0) {
            return Err(Error::Configuration(format!(
                "confidence_level must lie in (0, 1), got {}",
                self.confidence_level
            )));
        }
        if !(0.0..1.0).contains(&self.covariates.max_missing_fraction) {
            return Err(Error::Configuration(format!(
                "covariates.max_missing_fraction must lie in [0, 1), got {}",
                self.covariates.max_missing_fraction
            )));
        }
        self.cuped.validate()?;
        self.matching.validate()?;
        self.uplift.validate()?;
        self.diagnostics.validate()
    }
}
