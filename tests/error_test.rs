//! Tests for error types

use causify::table::Arm;
use causify::{Error, EstimationError};

#[test]
fn test_configuration_error() {
    let error = Error::Configuration("max_missing_fraction must lie in [0, 1)".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("max_missing_fraction"));
    assert!(!error.is_recoverable());
}

#[test]
fn test_rank_deficient_error() {
    let error: Error = EstimationError::RankDeficient {
        columns: vec!["pre_1".to_string(), "pre_2".to_string()],
    }
    .into();
    let error_str = format!("{error}");
    assert!(error_str.contains("Estimation error"));
    assert!(error_str.contains("rank-deficient"));
    assert!(error_str.contains("pre_1, pre_2"));
    assert!(error.is_recoverable());
}

#[test]
fn test_non_convergence_error() {
    let error = EstimationError::NonConvergence {
        model: "propensity model".to_string(),
        iterations: 100,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("propensity model"));
    assert!(error_str.contains("100 iterations"));
}

#[test]
fn test_poor_overlap_error() {
    let error = EstimationError::PoorOverlap {
        match_rate: 0.3,
        minimum: 0.5,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("30.0%"));
    assert!(error_str.contains("50.0%"));
    assert!(error_str.contains("poor propensity overlap"));
}

#[test]
fn test_arm_too_small_error() {
    let error = EstimationError::ArmTooSmall {
        arm: Arm::Control,
        size: 12,
        minimum: 30,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("control arm has 12"));
    assert!(error_str.contains("at least 30"));
}

#[test]
fn test_singular_matrix_error() {
    let error = EstimationError::SingularMatrix("linear base learner".to_string());
    assert_eq!(format!("{error}"), "singular matrix in linear base learner");
}

#[test]
fn test_insufficient_data_error() {
    let error = Error::InsufficientData("treated arm has 1 record".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Insufficient data"));
    assert!(!error.is_recoverable());
}

#[test]
fn test_schema_error() {
    let error = Error::Schema("missing column \"treatment\"".to_string());
    assert!(format!("{error}").contains("Schema error"));
}

#[test]
fn test_storage_error() {
    let error = Error::StorageError("file not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_json_error_conversion() {
    let json_error = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = json_error.into();
    assert!(format!("{error}").contains("JSON error"));
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error message".to_string());
    assert_eq!(format!("{error}"), "custom error message");
}

#[test]
fn test_error_debug() {
    let error = Error::Configuration("debug test".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Configuration"));
}
