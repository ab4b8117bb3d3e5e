//! Decade-month climatology reduction
//!
//! Each sample is keyed `"{floor(year/10)*10}-{month:02}"` and all samples
//! sharing a key are mean-reduced per cell. Per-year stores are streamed
//! batch by batch into running sums, so a model's full daily series is
//! never held in memory. Samples outside the bounding box are discarded
//! as they arrive.

use super::{native_step, Climatology, DecadeMonth, GridAxes, ModelRun};
use crate::config::BoundingBox;
use crate::store::{ClimateStore, TIME_COLUMN, VALUE_COLUMN, X_COLUMN, Y_COLUMN};
use crate::{Error, Result};
use arrow::array::{Array, Date32Array, Float64Array};
use arrow::record_batch::RecordBatch;
use chrono::{Datelike, NaiveDate};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Mean-reduce one time series into decade-month climatology values.
///
/// Null (`NaN`) samples are skipped; a label whose samples are all null
/// reduces to `NaN`. Output is ordered by label.
///
/// # Errors
/// Returns error if `times` and `values` differ in length.
pub fn reduce_decade_month(times: &[NaiveDate], values: &[f64]) -> Result<Vec<(DecadeMonth, f64)>> {
    if times.len() != values.len() {
        return Err(Error::Grid(format!(
            "Time axis has {} samples, series has {}",
            times.len(),
            values.len()
        )));
    }

    let mut sums: BTreeMap<DecadeMonth, (f64, u32)> = BTreeMap::new();
    for (date, value) in times.iter().zip(values) {
        let label = DecadeMonth::for_sample(date.year(), date.month())?;
        let entry = sums.entry(label).or_insert((0.0, 0));
        if !value.is_nan() {
            entry.0 += value;
            entry.1 += 1;
        }
    }

    Ok(sums
        .into_iter()
        .map(|(label, (sum, count))| (label, mean_or_nan(sum, count)))
        .collect())
}

fn mean_or_nan(sum: f64, count: u32) -> f64 {
    if count == 0 {
        f64::NAN
    } else {
        sum / f64::from(count)
    }
}

/// Map a longitude from `[0, 360)` into `[-180, 180)`.
#[must_use]
pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

/// Remap x coordinates into `[-180, 180)` and re-sort ascending.
///
/// Identity for grids already in the `[-180, 180)` convention apart from
/// the re-sort.
///
/// # Errors
/// Returns error if two columns collapse onto the same longitude.
pub fn normalize_longitudes(grid: Climatology) -> Result<Climatology> {
    let (axes, values) = grid.into_parts();
    let mut order: Vec<(f64, usize)> = axes
        .x
        .iter()
        .enumerate()
        .map(|(i, &x)| (normalize_longitude(x), i))
        .collect();
    order.sort_by(|a, b| a.0.total_cmp(&b.0));
    if order.windows(2).any(|w| w[0].0 == w[1].0) {
        return Err(Error::Grid(
            "Duplicate longitude after [0,360) -> [-180,180) normalisation".to_string(),
        ));
    }

    let columns: Vec<usize> = order.iter().map(|&(_, i)| i).collect();
    let x = order.into_iter().map(|(lon, _)| lon).collect();
    let rows: Vec<usize> = (0..axes.y.len()).collect();
    let new_axes = GridAxes {
        labels: axes.labels.clone(),
        y: axes.y.clone(),
        x,
        y_step: axes.y_step,
        x_step: axes.x_step,
    };
    gather(&axes, &values, new_axes, &rows, &columns)
}

/// Keep cells whose coordinates fall inside `bbox` (inclusive).
///
/// Cell sizes not already known are taken from the full axes first.
///
/// # Errors
/// Returns error if x is not ascending or the box selects no cells.
pub fn select_bbox(grid: Climatology, bbox: &BoundingBox) -> Result<Climatology> {
    let (axes, values) = grid.into_parts();
    if axes.x.windows(2).any(|w| w[0] >= w[1]) {
        return Err(Error::Grid(
            "x coordinates must be ascending before a bounding-box slice".to_string(),
        ));
    }

    let rows: Vec<usize> = (0..axes.y.len())
        .filter(|&i| (bbox.min_lat..=bbox.max_lat).contains(&axes.y[i]))
        .collect();
    let columns: Vec<usize> = (0..axes.x.len())
        .filter(|&i| (bbox.min_lon..=bbox.max_lon).contains(&axes.x[i]))
        .collect();
    if rows.is_empty() || columns.is_empty() {
        return Err(Error::Grid(format!("Bounding box selects no cells: {bbox:?}")));
    }

    let new_axes = GridAxes {
        labels: axes.labels.clone(),
        y: rows.iter().map(|&i| axes.y[i]).collect(),
        x: columns.iter().map(|&i| axes.x[i]).collect(),
        y_step: axes.y_step.or_else(|| native_step(&axes.y)),
        x_step: axes.x_step.or_else(|| native_step(&axes.x)),
    };
    gather(&axes, &values, new_axes, &rows, &columns)
}

fn gather(
    axes: &GridAxes,
    values: &[f64],
    new_axes: GridAxes,
    rows: &[usize],
    columns: &[usize],
) -> Result<Climatology> {
    let mut out = Vec::with_capacity(new_axes.len());
    for label in 0..axes.labels.len() {
        for &iy in rows {
            for &ix in columns {
                out.push(values[axes.offset(label, iy, ix)]);
            }
        }
    }
    Climatology::new(new_axes, out)
}

/// Streaming accumulator of per-cell decade-month sums.
///
/// Longitudes are normalised to `[-180, 180)` on arrival. Only cells
/// inside the optional bounding box are kept; the coordinates of every
/// sample are still recorded so the native cell size is known.
#[derive(Debug, Default)]
pub struct ClimatologyAccumulator {
    bbox: Option<BoundingBox>,
    sums: FxHashMap<(DecadeMonth, u64, u64), (f64, u32)>,
    y_seen: FxHashSet<u64>,
    // raw x bits -> normalised x bits
    x_seen: FxHashMap<u64, u64>,
    samples: usize,
    outside: usize,
}

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a dyn Array> {
    batch
        .column_by_name(name)
        .map(AsRef::as_ref)
        .ok_or_else(|| Error::Grid(format!("Climate store is missing column {name:?}")))
}

fn f64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Float64Array> {
    column(batch, name)?
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Grid(format!("Column {name:?} must be Float64")))
}

impl ClimatologyAccumulator {
    /// Create an empty accumulator over the global extent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty accumulator that keeps only samples inside `bbox`.
    #[must_use]
    pub fn with_bbox(bbox: Option<BoundingBox>) -> Self {
        Self {
            bbox,
            ..Self::default()
        }
    }

    /// Number of samples consumed so far.
    #[must_use]
    pub const fn samples(&self) -> usize {
        self.samples
    }

    /// Samples discarded for falling outside the bounding box.
    #[must_use]
    pub const fn skipped(&self) -> usize {
        self.outside
    }

    /// Distinct `(label, y, x)` cells held so far.
    #[must_use]
    pub fn cells(&self) -> usize {
        self.sums.len()
    }

    /// Fold one batch of `(time, y, x, value)` samples.
    ///
    /// # Errors
    /// Returns error if the batch does not conform to the store schema.
    pub fn add_batch(&mut self, batch: &RecordBatch) -> Result<()> {
        let time = column(batch, TIME_COLUMN)?
            .as_any()
            .downcast_ref::<Date32Array>()
            .ok_or_else(|| Error::Grid(format!("Column {TIME_COLUMN:?} must be Date32")))?;
        let y = f64_column(batch, Y_COLUMN)?;
        let x = f64_column(batch, X_COLUMN)?;
        let value = f64_column(batch, VALUE_COLUMN)?;

        if time.null_count() > 0 || y.null_count() > 0 || x.null_count() > 0 {
            return Err(Error::Grid("Null coordinate in climate store".to_string()));
        }

        for row in 0..batch.num_rows() {
            let (lat, raw_lon) = (y.value(row), x.value(row));
            let lon = normalize_longitude(raw_lon);
            self.y_seen.insert(lat.to_bits());
            self.x_seen.entry(raw_lon.to_bits()).or_insert(lon.to_bits());
            if self.bbox.is_some_and(|bbox| !bbox.contains(lon, lat)) {
                self.outside += 1;
                continue;
            }

            let date = time
                .value_as_date(row)
                .ok_or_else(|| Error::Grid(format!("Invalid date at row {row}")))?;
            let label = DecadeMonth::for_sample(date.year(), date.month())?;
            let entry = self
                .sums
                .entry((label, lat.to_bits(), lon.to_bits()))
                .or_insert((0.0, 0));
            if value.is_valid(row) && !value.value(row).is_nan() {
                entry.0 += value.value(row);
                entry.1 += 1;
            }
        }
        self.samples += batch.num_rows();
        Ok(())
    }

    /// Materialise the climatology on ascending axes.
    ///
    /// Cells never sampled for a label are `NaN`. Cell sizes come from
    /// every coordinate seen, inside the box or not.
    ///
    /// # Errors
    /// Returns error if nothing was accumulated, the box selected no
    /// cells, or two longitudes collapse under normalisation.
    pub fn finish(self) -> Result<Climatology> {
        if self.sums.is_empty() {
            return Err(match self.bbox {
                Some(bbox) if self.samples > 0 => {
                    Error::Grid(format!("Bounding box selects no cells: {bbox:?}"))
                }
                _ => Error::Grid("No climate samples to reduce".to_string()),
            });
        }

        let all_x: FxHashSet<u64> = self.x_seen.values().copied().collect();
        if all_x.len() < self.x_seen.len() {
            return Err(Error::Grid(
                "Duplicate longitude after [0,360) -> [-180,180) normalisation".to_string(),
            ));
        }
        let all_y: Vec<f64> = self.y_seen.iter().map(|b| f64::from_bits(*b)).collect();
        let all_x: Vec<f64> = all_x.into_iter().map(f64::from_bits).collect();
        let (y_step, x_step) = (native_step(&all_y), native_step(&all_x));

        let mut labels: Vec<DecadeMonth> = self.sums.keys().map(|k| k.0).collect();
        labels.sort_unstable();
        labels.dedup();
        let y = sorted_axis(self.sums.keys().map(|k| k.1));
        let x = sorted_axis(self.sums.keys().map(|k| k.2));

        let label_index: FxHashMap<DecadeMonth, usize> =
            labels.iter().enumerate().map(|(i, l)| (*l, i)).collect();
        let y_index: FxHashMap<u64, usize> =
            y.iter().enumerate().map(|(i, v)| (v.to_bits(), i)).collect();
        let x_index: FxHashMap<u64, usize> =
            x.iter().enumerate().map(|(i, v)| (v.to_bits(), i)).collect();

        let axes = GridAxes {
            labels,
            y,
            x,
            y_step,
            x_step,
        };
        let mut values = vec![f64::NAN; axes.len()];
        for ((label, yb, xb), (sum, count)) in self.sums {
            let offset = axes.offset(label_index[&label], y_index[&yb], x_index[&xb]);
            values[offset] = mean_or_nan(sum, count);
        }
        Climatology::new(axes, values)
    }
}

fn sorted_axis(bits: impl Iterator<Item = u64>) -> Vec<f64> {
    let mut axis: Vec<f64> = bits.map(f64::from_bits).collect();
    axis.sort_by(f64::total_cmp);
    axis.dedup_by(|a, b| a.to_bits() == b.to_bits());
    axis
}

/// Reduces each validated model run into a decade-month climatology.
#[derive(Debug, Clone, Default)]
pub struct ClimatologyReducer {
    bbox: Option<BoundingBox>,
}

impl ClimatologyReducer {
    /// Create a reducer; `None` keeps the global extent.
    #[must_use]
    pub const fn new(bbox: Option<BoundingBox>) -> Self {
        Self { bbox }
    }

    /// Apply longitude normalisation then the optional bounding box.
    ///
    /// Both are no-ops on the output of a box-aware accumulator apart
    /// from the axis re-sort.
    ///
    /// # Errors
    /// Returns error on a non-conforming grid.
    pub fn finalize(&self, raw: Climatology) -> Result<Climatology> {
        let normalized = normalize_longitudes(raw)?;
        match &self.bbox {
            Some(bbox) => select_bbox(normalized, bbox),
            None => Ok(normalized),
        }
    }

    /// Stream every per-year store of `run` into one climatology. Folding
    /// runs on the blocking pool, one store at a time.
    ///
    /// # Errors
    /// Any storage or grid failure is fatal for the run.
    pub async fn reduce_model<S: ClimateStore>(&self, store: &S, run: &ModelRun) -> Result<Climatology> {
        let mut acc = ClimatologyAccumulator::with_bbox(self.bbox);
        for store_ref in &run.stores {
            let batches = store.read_batches(store_ref).await?;
            acc = tokio::task::spawn_blocking(move || -> Result<ClimatologyAccumulator> {
                for batch in &batches {
                    acc.add_batch(batch)?;
                }
                Ok(acc)
            })
            .await
            .map_err(join_error)??;
            debug!(model = %run.name, store = %store_ref, "Store reduced");
        }

        let (samples, skipped) = (acc.samples(), acc.skipped());
        let reducer = self.clone();
        let climatology = tokio::task::spawn_blocking(move || -> Result<Climatology> {
            reducer.finalize(acc.finish()?)
        })
            .await
            .map_err(join_error)??;
        info!(
            model = %run.name,
            samples,
            skipped,
            labels = climatology.axes().labels.len(),
            "Climatology reduced"
        );
        Ok(climatology)
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Grid(format!("Climatology task failed: {e}"))
}
