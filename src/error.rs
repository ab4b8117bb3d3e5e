//! Error types for infraclimate
//!
//! Every fatal pipeline condition maps to exactly one variant. Recoverable
//! conditions (skipped models, failed polygon chunks, null exposure rows)
//! are never raised; they are counted in the run summary instead.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    /// Every candidate model failed scenario or temporal-coverage validation
    #[error("No eligible models for scenario {scenario}: {skipped} candidate(s) skipped\nCheck that model directories contain the scenario and a complete year range")]
    NoEligibleModels {
        /// Scenario that was requested
        scenario: String,
        /// Number of models rejected during validation
        skipped: usize,
    },

    /// Object-store listing/read failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed or non-conforming climate grid
    #[error("Grid error: {0}")]
    Grid(String),

    /// Unparseable or invalid geometry
    #[error("Geometry error: {0}")]
    Geometry(String),

    /// Zonal aggregation failure
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Identifier rejected by the SQL identifier validator
    #[error("Invalid SQL identifier: {0:?}\nIdentifiers must match [a-z_][a-z0-9_]* and be at most 63 characters")]
    InvalidIdentifier(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input to an operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Relational store error (staging, copy, insert-select)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML config parse error
    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}
