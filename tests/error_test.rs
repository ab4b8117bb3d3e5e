//! Tests for error types

use infraclimate::load::Identifier;
use infraclimate::Error;

#[test]
fn test_no_eligible_models_error() {
    let error = Error::NoEligibleModels {
        scenario: "ssp585".to_string(),
        skipped: 3,
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("No eligible models for scenario ssp585"));
    assert!(error_str.contains("3 candidate(s) skipped"));
    assert!(error_str.contains("complete year range"));
}

#[test]
fn test_storage_error() {
    let error = Error::Storage("object not found".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Storage error"));
    assert!(error_str.contains("object not found"));
}

#[test]
fn test_grid_error() {
    let error = Error::Grid("x axis has 1 coordinate".to_string());
    assert_eq!(format!("{error}"), "Grid error: x axis has 1 coordinate");
}

#[test]
fn test_geometry_error() {
    let error = "POINT (1)".parse::<infraclimate::geometry::Geometry>().unwrap_err();
    assert!(matches!(error, Error::Geometry(_)));
    assert!(format!("{error}").starts_with("Geometry error"));
}

#[test]
fn test_aggregation_error() {
    let error = Error::Aggregation("chunk 2 panicked".to_string());
    assert!(format!("{error}").contains("chunk 2 panicked"));
}

#[test]
fn test_invalid_identifier_error() {
    let error = Identifier::new("exposure; DROP TABLE x").unwrap_err();
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid SQL identifier"));
    assert!(error_str.contains("\"exposure; DROP TABLE x\""));
    assert!(error_str.contains("[a-z_][a-z0-9_]*"));
}

#[test]
fn test_config_error() {
    let error = Error::Config("worker_count must be at least 1".to_string());
    assert!(format!("{error}").starts_with("Configuration error"));
}

#[test]
fn test_invalid_input_error() {
    let error = Error::InvalidInput("batch has no column \"ssp\"".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Invalid input"));
    assert!(error_str.contains("ssp"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
}

#[test]
fn test_toml_error_conversion() {
    let parsed: Result<toml::Value, _> = toml::from_str("scenario = ");
    let error: Error = parsed.unwrap_err().into();
    assert!(matches!(error, Error::Toml(_)));
    assert!(format!("{error}").starts_with("Config parse error"));
}

#[test]
fn test_json_error_conversion() {
    let parsed: Result<serde_json::Value, _> = serde_json::from_str("{");
    let error: Error = parsed.unwrap_err().into();
    assert!(format!("{error}").starts_with("JSON error"));
}

#[test]
fn test_database_error_conversion() {
    let error: Error = sqlx::Error::RowNotFound.into();
    assert!(matches!(error, Error::Database(_)));
    assert!(format!("{error}").starts_with("Database error"));
}

#[test]
fn test_error_debug() {
    let error = Error::Grid("bad".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("Grid"));
}

#[test]
fn test_result_type() {
    fn returns_result() -> infraclimate::Result<i32> {
        Ok(42)
    }
    assert_eq!(returns_result().unwrap(), 42);
}
