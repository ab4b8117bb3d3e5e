//! Geometry-aware zonal aggregation of the ensemble cube
//!
//! - Points take the value of the cell containing them.
//! - Lines and multi-points are sampled at each distinct vertex and the
//!   vertex values are reduced with the configured method. Vertex density,
//!   not segment length, governs the result.
//! - Polygons use area-weighted statistics: each intersecting cell is
//!   weighted by the fraction of its area covered by the polygon. Polygon
//!   chunks run in parallel through a [`TaskGroup`]; a failing chunk drops
//!   only its own features.

pub mod tasks;

pub use tasks::{ErrorPolicy, TaskFailure, TaskGroup, TaskGroupOutcome};

use crate::climate::{DecadeMonth, EnsembleCube, Statistic, STATISTIC_COUNT};
use crate::geometry::{polygon_rect_area, ClassifiedFeatures, Coord, Geometry, InfrastructureFeature, Rect};
use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Range;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

/// Reduction applied to the cell samples of one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    /// Weighted arithmetic mean.
    #[default]
    Mean,
    /// Weighted median.
    Median,
    /// Minimum over intersecting cells.
    Min,
    /// Maximum over intersecting cells.
    Max,
    /// Coverage-weighted sum.
    Sum,
}

impl AggregationMethod {
    /// Method name as written in configuration.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Median => "median",
            Self::Min => "min",
            Self::Max => "max",
            Self::Sum => "sum",
        }
    }

    /// Reduce `(value, weight)` samples. `NaN` values and non-positive
    /// weights are ignored; `None` when nothing remains.
    #[must_use]
    pub fn reduce(self, samples: &[(f64, f64)]) -> Option<f64> {
        let mut valid: Vec<(f64, f64)> = samples
            .iter()
            .copied()
            .filter(|(v, w)| !v.is_nan() && *w > 0.0)
            .collect();
        if valid.is_empty() {
            return None;
        }

        let total: f64 = valid.iter().map(|(_, w)| w).sum();
        let value = match self {
            Self::Mean => valid.iter().map(|(v, w)| v * w).sum::<f64>() / total,
            Self::Sum => valid.iter().map(|(v, w)| v * w).sum(),
            Self::Min => valid.iter().map(|(v, _)| *v).fold(f64::INFINITY, f64::min),
            Self::Max => valid.iter().map(|(v, _)| *v).fold(f64::NEG_INFINITY, f64::max),
            Self::Median => {
                valid.sort_by(|a, b| a.0.total_cmp(&b.0));
                let half = total / 2.0;
                let tolerance = total * 1e-12;
                let mut cumulative = 0.0;
                let mut median = valid[valid.len() - 1].0;
                for (i, (v, w)) in valid.iter().enumerate() {
                    cumulative += w;
                    if (cumulative - half).abs() <= tolerance {
                        // Exactly half the weight below: average with the next value
                        median = valid.get(i + 1).map_or(*v, |(next, _)| (v + next) / 2.0);
                        break;
                    }
                    if cumulative > half {
                        median = *v;
                        break;
                    }
                }
                median
            }
        };
        Some(value)
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(Self::Mean),
            "median" => Ok(Self::Median),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            other => Err(Error::InvalidInput(format!(
                "Unknown aggregation method {other:?} (expected mean, median, min, max or sum)"
            ))),
        }
    }
}

/// Cell edges along one axis: midpoints between adjacent centers,
/// extended by half a step at both ends. A lone center spans half the
/// native step on either side.
#[derive(Debug, Clone, PartialEq)]
pub struct AxisCells {
    edges: Vec<f64>,
}

impl AxisCells {
    /// Derive edges from ascending cell centers. `step` is the native cell
    /// size, used only when the axis holds a single center.
    ///
    /// # Errors
    /// Returns error for non-ascending centers, an empty axis, or a single
    /// center without a positive finite `step`.
    pub fn from_centers(centers: &[f64], step: Option<f64>) -> Result<Self> {
        match (centers, step) {
            ([], _) => return Err(Error::Grid("Axis has no coordinates".to_string())),
            ([c], Some(s)) if s.is_finite() && s > 0.0 => {
                return Ok(Self {
                    edges: vec![c - s / 2.0, c + s / 2.0],
                });
            }
            ([_], _) => {
                return Err(Error::Grid(
                    "Cell size is undefined for an axis with 1 coordinate and no native step"
                        .to_string(),
                ));
            }
            _ => {}
        }
        if centers.windows(2).any(|w| w[1] <= w[0]) {
            return Err(Error::Grid("Cell centers must be strictly ascending".to_string()));
        }

        let n = centers.len();
        let mut edges = Vec::with_capacity(n + 1);
        edges.push(centers[0] - (centers[1] - centers[0]) / 2.0);
        edges.extend(centers.windows(2).map(|w| (w[0] + w[1]) / 2.0));
        edges.push(centers[n - 1] + (centers[n - 1] - centers[n - 2]) / 2.0);
        Ok(Self { edges })
    }

    /// Number of cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.edges.len() - 1
    }

    /// Always false: construction requires a center.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(lower, upper)` edge of cell `i`.
    #[must_use]
    pub fn bounds(&self, i: usize) -> (f64, f64) {
        (self.edges[i], self.edges[i + 1])
    }

    /// Cell containing `v`, or `None` outside the outer edges.
    #[must_use]
    pub fn locate(&self, v: f64) -> Option<usize> {
        let (lo, hi) = (self.edges[0], self.edges[self.len()]);
        if !(lo..=hi).contains(&v) {
            return None;
        }
        let i = self.edges.partition_point(|e| *e <= v).saturating_sub(1);
        Some(i.min(self.len() - 1))
    }

    /// Cells whose extent overlaps the open interval `(min, max)`.
    #[must_use]
    pub fn overlapping(&self, min: f64, max: f64) -> Range<usize> {
        let n = self.len();
        let start = self.edges[1..].partition_point(|e| *e <= min);
        let end = self.edges[..n].partition_point(|e| *e < max);
        start..end.max(start)
    }
}

/// One aggregated value set for a feature and decade-month. `None` marks
/// a sample with no climate coverage.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonalRow {
    /// Feature id.
    pub feature_id: i64,
    /// Decade-month label.
    pub label: DecadeMonth,
    /// Values indexed by [`Statistic::index`].
    pub values: [Option<f64>; STATISTIC_COUNT],
}

impl ZonalRow {
    /// Whether any statistic is missing.
    #[must_use]
    pub fn has_null(&self) -> bool {
        self.values.iter().any(Option::is_none)
    }

    /// Value of one statistic.
    #[must_use]
    pub fn value(&self, stat: Statistic) -> Option<f64> {
        self.values[stat.index()]
    }
}

/// Rows from every geometry kind plus the polygon chunks that failed.
#[derive(Debug, Default)]
pub struct ZonalOutcome {
    /// Aggregated rows (may contain nulls until [`drop_null_rows`]).
    pub rows: Vec<ZonalRow>,
    /// Failed polygon chunks.
    pub failed_chunks: Vec<TaskFailure>,
    /// Features dropped because their chunk failed.
    pub failed_features: usize,
}

/// Rows dropped for null values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NullReport {
    /// Dropped rows.
    pub rows: usize,
    /// Distinct features with at least one dropped row.
    pub features: usize,
}

/// Remove every row with a null statistic.
#[must_use]
pub fn drop_null_rows(rows: Vec<ZonalRow>) -> (Vec<ZonalRow>, NullReport) {
    let mut dropped_features = BTreeSet::new();
    let total = rows.len();
    let kept: Vec<ZonalRow> = rows
        .into_iter()
        .filter(|row| {
            if row.has_null() {
                dropped_features.insert(row.feature_id);
                false
            } else {
                true
            }
        })
        .collect();

    let report = NullReport {
        rows: total - kept.len(),
        features: dropped_features.len(),
    };
    if report.rows > 0 {
        warn!(
            rows = report.rows,
            features = report.features,
            "Features could not be zonally aggregated; dropping null rows"
        );
    }
    (kept, report)
}

/// Computes per-feature, per-decade-month exposure values from an
/// [`EnsembleCube`].
#[derive(Debug, Clone)]
pub struct ZonalAggregationEngine {
    cube: Arc<EnsembleCube>,
    method: AggregationMethod,
    tasks: TaskGroup,
    x_cells: AxisCells,
    y_cells: AxisCells,
}

impl ZonalAggregationEngine {
    /// Create an engine over a materialised cube.
    ///
    /// # Errors
    /// Returns error if a spatial axis is not ascending, or has a single
    /// coordinate and no native cell size.
    pub fn new(cube: Arc<EnsembleCube>, method: AggregationMethod, worker_count: usize) -> Result<Self> {
        let axes = cube.axes();
        let x_cells = AxisCells::from_centers(&axes.x, axes.x_step)?;
        let y_cells = AxisCells::from_centers(&axes.y, axes.y_step)?;
        Ok(Self {
            cube,
            method,
            tasks: TaskGroup::new(worker_count, ErrorPolicy::ContinueOnError),
            x_cells,
            y_cells,
        })
    }

    /// Replace the polygon chunk error policy.
    #[must_use]
    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.tasks = TaskGroup::new(self.tasks.workers(), policy);
        self
    }

    /// Configured method.
    #[must_use]
    pub const fn method(&self) -> AggregationMethod {
        self.method
    }

    fn locate(&self, c: Coord) -> Option<(usize, usize)> {
        Some((self.y_cells.locate(c.y)?, self.x_cells.locate(c.x)?))
    }

    fn cell_rect(&self, iy: usize, ix: usize) -> Rect {
        let (x0, x1) = self.x_cells.bounds(ix);
        let (y0, y1) = self.y_cells.bounds(iy);
        Rect::new(x0, y0, x1, y1)
    }

    fn labels(&self) -> impl Iterator<Item = (usize, DecadeMonth)> + '_ {
        self.cube.axes().labels.iter().copied().enumerate()
    }

    /// Rows for `feature_id` from weighted cells, one per decade-month.
    fn weighted_rows(&self, feature_id: i64, cells: &[((usize, usize), f64)]) -> Vec<ZonalRow> {
        let mut samples = Vec::with_capacity(cells.len());
        self.labels()
            .map(|(l, label)| {
                let mut values = [None; STATISTIC_COUNT];
                for stat in Statistic::ALL {
                    samples.clear();
                    samples.extend(
                        cells
                            .iter()
                            .map(|&((iy, ix), w)| (self.cube.value(stat, l, iy, ix), w)),
                    );
                    values[stat.index()] = self.method.reduce(&samples);
                }
                ZonalRow {
                    feature_id,
                    label,
                    values,
                }
            })
            .collect()
    }

    /// Nearest-cell value of a single point for every decade-month.
    #[must_use]
    pub fn sample_point(&self, feature_id: i64, point: Coord) -> Vec<ZonalRow> {
        let cell = self.locate(point);
        self.labels()
            .map(|(l, label)| {
                let mut values = [None; STATISTIC_COUNT];
                if let Some((iy, ix)) = cell {
                    for (slot, v) in values.iter_mut().zip(self.cube.cell(l, iy, ix)) {
                        *slot = (!v.is_nan()).then_some(v);
                    }
                }
                ZonalRow {
                    feature_id,
                    label,
                    values,
                }
            })
            .collect()
    }

    /// Sample every distinct vertex and reduce with the configured method.
    #[must_use]
    pub fn sample_vertices(&self, feature_id: i64, vertices: &[Coord]) -> Vec<ZonalRow> {
        let cells: Vec<((usize, usize), f64)> = vertices
            .iter()
            .filter_map(|c| self.locate(*c))
            .map(|cell| (cell, 1.0))
            .collect();
        self.weighted_rows(feature_id, &cells)
    }

    /// Point-like features: single points are sampled directly,
    /// multi-points like line vertices.
    #[must_use]
    pub fn aggregate_points(&self, features: &[InfrastructureFeature]) -> Vec<ZonalRow> {
        let rows: Vec<ZonalRow> = features
            .iter()
            .flat_map(|f| match &f.geometry {
                Geometry::Point(c) => self.sample_point(f.id, *c),
                other => self.sample_vertices(f.id, &other.vertices()),
            })
            .collect();
        info!(features = features.len(), rows = rows.len(), "Point geometries aggregated");
        rows
    }

    /// Line-like features, sampled at their distinct vertices.
    #[must_use]
    pub fn aggregate_lines(&self, features: &[InfrastructureFeature]) -> Vec<ZonalRow> {
        let rows: Vec<ZonalRow> = features
            .iter()
            .flat_map(|f| self.sample_vertices(f.id, &f.geometry.vertices()))
            .collect();
        info!(features = features.len(), rows = rows.len(), "Line geometries aggregated");
        rows
    }

    /// Coverage fraction of every cell intersecting the feature, merged
    /// across multipolygon parts, ordered by cell.
    ///
    /// # Errors
    /// Returns error if any ring coordinate is not finite.
    pub fn coverage(&self, feature: &InfrastructureFeature) -> Result<Vec<((usize, usize), f64)>> {
        let mut weights: FxHashMap<(usize, usize), f64> = FxHashMap::default();
        for polygon in feature.geometry.polygons() {
            let finite = polygon
                .exterior
                .iter()
                .chain(polygon.interiors.iter().flatten())
                .all(Coord::is_finite);
            if !finite {
                return Err(Error::Geometry(format!(
                    "Feature {} has non-finite coordinates",
                    feature.id
                )));
            }
            let Some(bounds) = polygon.bounds() else {
                continue;
            };
            for iy in self.y_cells.overlapping(bounds.min_y, bounds.max_y) {
                for ix in self.x_cells.overlapping(bounds.min_x, bounds.max_x) {
                    let cell = self.cell_rect(iy, ix);
                    let fraction = polygon_rect_area(polygon, &cell) / cell.area();
                    if fraction > 0.0 {
                        *weights.entry((iy, ix)).or_insert(0.0) += fraction;
                    }
                }
            }
        }
        let mut cells: Vec<_> = weights.into_iter().collect();
        cells.sort_unstable_by_key(|(cell, _)| *cell);
        Ok(cells)
    }

    fn aggregate_polygon_chunk(&self, chunk: &[InfrastructureFeature]) -> Result<Vec<ZonalRow>> {
        let mut rows = Vec::with_capacity(chunk.len() * self.cube.axes().labels.len());
        for feature in chunk {
            let cells = self.coverage(feature)?;
            rows.extend(self.weighted_rows(feature.id, &cells));
        }
        Ok(rows)
    }

    /// Area-weighted aggregation of polygon-like features across
    /// `min(worker_count, features)` parallel chunks.
    ///
    /// # Errors
    /// Returns error if the worker pool cannot start, or if a chunk fails
    /// under [`ErrorPolicy::FailFast`].
    pub fn aggregate_polygons(&self, features: &[InfrastructureFeature]) -> Result<ZonalOutcome> {
        let outcome = self
            .tasks
            .run(features, |chunk| self.aggregate_polygon_chunk(chunk))?;
        let failed_features = outcome.failed_items();
        let rows: Vec<ZonalRow> = outcome.completed.into_iter().flatten().collect();

        if failed_features > 0 {
            warn!(
                failed_chunks = outcome.failures.len(),
                failed_features,
                "Polygon chunks failed; their features contribute no rows"
            );
        }
        info!(features = features.len(), rows = rows.len(), "Polygon geometries aggregated");
        Ok(ZonalOutcome {
            rows,
            failed_chunks: outcome.failures,
            failed_features,
        })
    }

    /// Aggregate every classified feature: points, then lines, then
    /// polygons.
    ///
    /// # Errors
    /// See [`ZonalAggregationEngine::aggregate_polygons`].
    pub fn aggregate(&self, features: &ClassifiedFeatures) -> Result<ZonalOutcome> {
        let mut rows = self.aggregate_points(&features.points);
        rows.extend(self.aggregate_lines(&features.lines));
        let polygons = self.aggregate_polygons(&features.polygons)?;
        rows.extend(polygons.rows);
        Ok(ZonalOutcome {
            rows,
            failed_chunks: polygons.failed_chunks,
            failed_features: polygons.failed_features,
        })
    }
}
