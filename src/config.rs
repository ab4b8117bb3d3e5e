//! Pipeline configuration
//!
//! Loaded from TOML. Every identifier that later reaches SQL is validated
//! here first so a bad config fails before any storage or database I/O.
//!
//! ```toml
//! climate_variable = "tas"
//! scenario = "ssp585"
//! crs = 4326
//! zonal_agg_method = "mean"
//! region = "washington"
//! osm_category = "infrastructure"
//! osm_type = "power"
//! climate_root = "/data/nex-gddp"
//! database_url = "sqlite://exposure.db"
//! ```

use crate::climate::Scenario;
use crate::load::Identifier;
use crate::zonal::AggregationMethod;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Default number of concurrent storage probes during model discovery.
pub const DEFAULT_IO_CONCURRENCY: usize = 4;

/// Largest permitted database pool.
pub const MAX_POOL_CONNECTIONS: u32 = 3;

/// Inclusive WGS84 bounding box on both spatial axes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Western edge (longitude, -180..180).
    pub min_lon: f64,
    /// Southern edge.
    pub min_lat: f64,
    /// Eastern edge.
    pub max_lon: f64,
    /// Northern edge.
    pub max_lat: f64,
}

impl BoundingBox {
    /// Bounding box of a named region, or `None` for an unknown region.
    ///
    /// Unknown regions resolve to global extent with a warning.
    #[must_use]
    pub fn for_region(region: &str) -> Option<Self> {
        match region.to_ascii_lowercase().as_str() {
            // Source: U.S. state bounding boxes (rdmurphy)
            "washington" => Some(Self {
                min_lon: -124.733_643_067_030_67,
                min_lat: 45.543_830_715_397_15,
                max_lon: -116.916_160_750_407_5,
                max_lat: 49.002_405_029_740_29,
            }),
            _ => {
                warn!(region, "Bounding box not specified for region, using global extent");
                None
            }
        }
    }

    /// Whether `(lon, lat)` lies inside the box, edges included.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }

    fn validate(&self) -> Result<()> {
        if self.min_lon > self.max_lon || self.min_lat > self.max_lat {
            return Err(Error::Config(format!("Inverted bounding box: {self:?}")));
        }
        Ok(())
    }
}

fn default_io_concurrency() -> usize {
    DEFAULT_IO_CONCURRENCY
}

fn default_max_connections() -> u32 {
    MAX_POOL_CONNECTIONS
}

fn default_worker_count() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

fn default_crs() -> u32 {
    4326
}

/// Configuration for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Climate variable to process (e.g. `tas`, `pr`).
    pub climate_variable: String,
    /// Emissions scenario.
    pub scenario: Scenario,
    /// EPSG code of the climate grid and feature geometries.
    #[serde(default = "default_crs")]
    pub crs: u32,
    /// Zonal aggregation method for lines and polygons.
    pub zonal_agg_method: AggregationMethod,
    /// Named region resolved through [`BoundingBox::for_region`].
    #[serde(default)]
    pub region: Option<String>,
    /// Explicit bounding box; takes precedence over `region`.
    #[serde(default)]
    pub bbox: Option<BoundingBox>,
    /// Feature table category (table name substring).
    pub osm_category: String,
    /// Feature type filter.
    pub osm_type: String,
    /// Root of the climate store.
    pub climate_root: String,
    /// Database URL of the fact store.
    pub database_url: String,
    /// Polygon worker count.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Concurrent storage probes.
    #[serde(default = "default_io_concurrency")]
    pub io_concurrency: usize,
    /// Database pool size (1..=3).
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Consider at most this many discovered models.
    #[serde(default)]
    pub max_models: Option<usize>,
}

impl PipelineConfig {
    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Returns error if the document is malformed or fails validation.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    /// Check value ranges and identifiers.
    ///
    /// # Errors
    /// Returns [`Error::Config`] or [`Error::InvalidIdentifier`].
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be at least 1".to_string()));
        }
        if self.io_concurrency == 0 {
            return Err(Error::Config("io_concurrency must be at least 1".to_string()));
        }
        if !(1..=MAX_POOL_CONNECTIONS).contains(&self.max_connections) {
            return Err(Error::Config(format!(
                "max_connections must be within 1..={MAX_POOL_CONNECTIONS}, got {}",
                self.max_connections
            )));
        }
        Identifier::new(&self.climate_variable)?;
        Identifier::new(&self.osm_category)?;
        if let Some(bbox) = &self.bbox {
            bbox.validate()?;
        }
        Ok(())
    }

    /// Effective bounding box: explicit box, else named region, else global.
    #[must_use]
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.bbox
            .or_else(|| self.region.as_deref().and_then(BoundingBox::for_region))
    }
}
