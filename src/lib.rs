//! # infraclimate: Climate-to-Infrastructure Exposure Pipeline
//!
//! Computes future climate-exposure statistics for infrastructure assets
//! from a multi-model climate ensemble and persists them keyed by
//! `(feature_id, decade, month, scenario)`.
//!
//! ## Pipeline
//!
//! 1. **Validate** model runs: scenario directory present and per-year
//!    stores covering exactly 1950-2014 or 2015-2100.
//! 2. **Reduce** each model to a decade-month climatology, normalising
//!    longitudes and applying the optional bounding box.
//! 3. **Ensemble** statistics per cell across models: mean, median,
//!    stddev, min, max, q1, q3.
//! 4. **Zonal aggregation** per feature: nearest cell for points, vertex
//!    sampling for lines, area-weighted statistics for polygons (parallel,
//!    with per-chunk failure isolation).
//! 5. **Bulk load** through a uniquely named staging table in a single
//!    transaction; existing keys are never overwritten.
//!
//! ## Example
//!
//! ```rust,no_run
//! use infraclimate::config::PipelineConfig;
//! use infraclimate::pipeline::Pipeline;
//! use infraclimate::store::LocalClimateStore;
//! use std::sync::Arc;
//!
//! # async fn run() -> infraclimate::Result<()> {
//! infraclimate::telemetry::init_tracing(infraclimate::telemetry::DEFAULT_FILTER);
//! let config = PipelineConfig::from_file("pipeline.toml")?;
//! let store = Arc::new(LocalClimateStore::new("/data/climate"));
//! let pipeline = Pipeline::connect(config, store).await?;
//! let summary = pipeline.run().await?;
//! println!("{} rows inserted", summary.rows_inserted);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod climate;
pub mod config;
pub mod error;
pub mod exposure;
pub mod geometry;
pub mod load;
pub mod pipeline;
pub mod store;
pub mod telemetry;
pub mod zonal;

pub use error::{Error, Result};
