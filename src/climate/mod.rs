//! Climate grid model: scenarios, decade-month keys and labeled grids
//!
//! ## Pipeline Shape
//!
//! ```text
//! per-year stores ──> Climatology (decade_month, y, x)      [one per model]
//!                          │
//!                          └─ stack ──> ClimateGrid (model, decade_month, y, x)
//!                                            │
//!                                            └─ reduce ──> EnsembleCube (statistic, decade_month, y, x)
//! ```
//!
//! All grids store cell values row-major as `f64`, with `NaN` marking a
//! missing cell.

pub mod climatology;
pub mod ensemble;
pub mod validator;

pub use climatology::{normalize_longitudes, ClimatologyReducer};
pub use ensemble::{EnsembleAggregator, EnsembleCube, Statistic, STATISTIC_COUNT};
pub use validator::{ModelRun, ModelValidator, Rejection, ValidationOutcome};

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Emissions scenario of a model run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Scenario {
    /// The reserved historical baseline (1950-2014).
    Historical,
    /// A Shared Socioeconomic Pathway, e.g. `Ssp(585)`.
    Ssp(u16),
}

impl Scenario {
    /// Directory name used under a model path (`historical`, `ssp585`).
    #[must_use]
    pub fn directory_name(&self) -> String {
        match self {
            Self::Historical => "historical".to_string(),
            Self::Ssp(code) => format!("ssp{code}"),
        }
    }

    /// Key persisted in the `ssp` column of the fact store.
    #[must_use]
    pub fn key(&self) -> String {
        self.directory_name()
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.directory_name())
    }
}

impl FromStr for Scenario {
    type Err = Error;

    /// Accepts `historical`, `585` or `ssp585` (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        // -999 is the legacy numeric code for the baseline run
        if lowered == "historical" || lowered == "-999" {
            return Ok(Self::Historical);
        }
        let code = lowered.strip_prefix("ssp").unwrap_or(&lowered);
        code.parse::<u16>()
            .map(Self::Ssp)
            .map_err(|_| Error::InvalidInput(format!("Unrecognised scenario: {s:?}")))
    }
}

impl TryFrom<String> for Scenario {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Scenario> for String {
    fn from(scenario: Scenario) -> Self {
        scenario.key()
    }
}

/// Composite climatology key: decade start year plus calendar month.
///
/// Renders as `"{decade}-{month:02}"`, e.g. `2050-07`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DecadeMonth {
    decade: i32,
    month: u8,
}

impl DecadeMonth {
    /// Build a key from a decade start year and month (1-12).
    ///
    /// # Errors
    /// Returns error if the month is out of range or `decade` is not a
    /// multiple of ten.
    pub fn new(decade: i32, month: u8) -> Result<Self> {
        if !(1..=12).contains(&month) {
            return Err(Error::InvalidInput(format!("Month out of range: {month}")));
        }
        if decade.rem_euclid(10) != 0 {
            return Err(Error::InvalidInput(format!(
                "Decade must be a multiple of ten: {decade}"
            )));
        }
        Ok(Self { decade, month })
    }

    /// Key for a sample taken in `year`/`month`.
    ///
    /// # Errors
    /// Returns error if the month is out of range.
    pub fn for_sample(year: i32, month: u32) -> Result<Self> {
        let month = u8::try_from(month)
            .map_err(|_| Error::InvalidInput(format!("Month out of range: {month}")))?;
        Self::new(year.div_euclid(10) * 10, month)
    }

    /// Decade start year.
    #[must_use]
    pub const fn decade(&self) -> i32 {
        self.decade
    }

    /// Calendar month (1-12).
    #[must_use]
    pub const fn month(&self) -> u8 {
        self.month
    }
}

impl fmt::Display for DecadeMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.decade, self.month)
    }
}

impl FromStr for DecadeMonth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidInput(format!("Invalid decade-month label: {s:?}"));
        let (decade, month) = s.rsplit_once('-').ok_or_else(invalid)?;
        if month.len() != 2 {
            return Err(invalid());
        }
        let decade = decade.parse().map_err(|_| invalid())?;
        let month = month.parse().map_err(|_| invalid())?;
        Self::new(decade, month)
    }
}

/// Coordinate axes shared by every grid in the pipeline.
///
/// `y_step` and `x_step` hold the native cell size of the source grid.
/// They survive bounding-box slices, so an axis cut down to a single
/// coordinate still has a defined cell extent.
#[derive(Debug, Clone, PartialEq)]
pub struct GridAxes {
    /// Decade-month labels (outermost axis).
    pub labels: Vec<DecadeMonth>,
    /// Cell-center latitudes / northings.
    pub y: Vec<f64>,
    /// Cell-center longitudes / eastings.
    pub x: Vec<f64>,
    /// Native cell size along y, if known.
    pub y_step: Option<f64>,
    /// Native cell size along x, if known.
    pub x_step: Option<f64>,
}

/// Smallest positive spacing between distinct coordinates, or `None` for
/// fewer than two.
#[must_use]
pub fn native_step(centers: &[f64]) -> Option<f64> {
    let mut sorted = centers.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0.0)
        .min_by(f64::total_cmp)
}

impl GridAxes {
    /// Axes whose cell sizes are taken from the centers themselves.
    #[must_use]
    pub fn new(labels: Vec<DecadeMonth>, y: Vec<f64>, x: Vec<f64>) -> Self {
        let (y_step, x_step) = (native_step(&y), native_step(&x));
        Self {
            labels,
            y,
            x,
            y_step,
            x_step,
        }
    }

    /// Number of cells in one spatial plane.
    #[must_use]
    pub fn plane_len(&self) -> usize {
        self.y.len() * self.x.len()
    }

    /// Total number of values across all labels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len() * self.plane_len()
    }

    /// Whether the axes describe an empty grid.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flat offset of `(label, iy, ix)`.
    #[must_use]
    pub fn offset(&self, label: usize, iy: usize, ix: usize) -> usize {
        label * self.plane_len() + iy * self.x.len() + ix
    }
}

/// One model's decade-month climatology over `(decade_month, y, x)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Climatology {
    axes: GridAxes,
    values: Vec<f64>,
}

impl Climatology {
    /// Create a climatology from axes and row-major values.
    ///
    /// # Errors
    /// Returns error if the value count does not match the axes.
    pub fn new(axes: GridAxes, values: Vec<f64>) -> Result<Self> {
        if values.len() != axes.len() {
            return Err(Error::Grid(format!(
                "Climatology has {} values, axes describe {}",
                values.len(),
                axes.len()
            )));
        }
        Ok(Self { axes, values })
    }

    /// Coordinate axes.
    #[must_use]
    pub const fn axes(&self) -> &GridAxes {
        &self.axes
    }

    /// Row-major cell values.
    #[must_use]
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Value at `(label, iy, ix)`.
    #[must_use]
    pub fn value(&self, label: usize, iy: usize, ix: usize) -> f64 {
        self.values[self.axes.offset(label, iy, ix)]
    }

    pub(crate) fn into_parts(self) -> (GridAxes, Vec<f64>) {
        (self.axes, self.values)
    }
}

/// Stack of per-model climatologies over `(model, decade_month, y, x)`.
#[derive(Debug, Clone)]
pub struct ClimateGrid {
    models: Vec<String>,
    axes: GridAxes,
    values: Vec<f64>,
}

impl ClimateGrid {
    /// Stack named climatologies along a new model axis.
    ///
    /// Every member must share identical spatial coordinates and the same
    /// decade-month label set.
    ///
    /// # Errors
    /// Returns error if the stack is empty or a member does not conform.
    pub fn stack(members: Vec<(String, Climatology)>) -> Result<Self> {
        let mut members = members.into_iter();
        let (first_name, first) = members
            .next()
            .ok_or_else(|| Error::Grid("Cannot stack zero climatologies".to_string()))?;
        let (axes, mut values) = first.into_parts();
        let mut models = vec![first_name];

        for (name, member) in members {
            if member.axes != axes {
                return Err(Error::Grid(format!(
                    "Model {name} does not share the grid of model {}",
                    models[0]
                )));
            }
            values.extend_from_slice(member.values());
            models.push(name);
        }

        Ok(Self {
            models,
            axes,
            values,
        })
    }

    /// Model names, in stacking order.
    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Coordinate axes shared by every member.
    #[must_use]
    pub const fn axes(&self) -> &GridAxes {
        &self.axes
    }

    /// Values of one model member.
    #[must_use]
    pub fn member(&self, model: usize) -> &[f64] {
        let len = self.axes.len();
        &self.values[model * len..(model + 1) * len]
    }
}
