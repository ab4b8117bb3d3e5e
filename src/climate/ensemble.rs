//! Cross-model ensemble statistics
//!
//! Reduces the model axis of a [`ClimateGrid`] into seven summary
//! statistics per decade-month per cell. The ensemble is unweighted, and
//! every statistic is computed from the sorted member values, so the
//! result is bit-identical under any permutation of the model axis.

use super::{ClimateGrid, GridAxes};
use rayon::prelude::*;
use std::fmt;
use tracing::info;

/// Number of ensemble statistics.
pub const STATISTIC_COUNT: usize = 7;

/// Ensemble summary statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Statistic {
    /// Arithmetic mean.
    Mean,
    /// Median (50th percentile).
    Median,
    /// Population standard deviation.
    StdDev,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
    /// 25th percentile.
    Q1,
    /// 75th percentile.
    Q3,
}

impl Statistic {
    /// All statistics in storage order.
    pub const ALL: [Self; STATISTIC_COUNT] = [
        Self::Mean,
        Self::Median,
        Self::StdDev,
        Self::Min,
        Self::Max,
        Self::Q1,
        Self::Q3,
    ];

    /// Position in [`Statistic::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Column name in the fact store (`value_mean`, ...).
    #[must_use]
    pub const fn column_name(self) -> &'static str {
        match self {
            Self::Mean => "value_mean",
            Self::Median => "value_median",
            Self::StdDev => "value_stddev",
            Self::Min => "value_min",
            Self::Max => "value_max",
            Self::Q1 => "value_q1",
            Self::Q3 => "value_q3",
        }
    }
}

impl fmt::Display for Statistic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// Percentile of ascending `sorted` values with linear interpolation
/// between order statistics.
#[must_use]
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            #[allow(clippy::cast_precision_loss)]
            let h = (n - 1) as f64 * q;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let lo = h.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = h - h.floor();
            sorted[lo] + frac * (sorted[hi] - sorted[lo])
        }
    }
}

/// All seven statistics of one cell's member values. `NaN` members are
/// skipped; an all-`NaN` cell yields `NaN` everywhere.
#[must_use]
pub fn cell_statistics(values: &[f64]) -> [f64; STATISTIC_COUNT] {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return [f64::NAN; STATISTIC_COUNT];
    }
    sorted.sort_by(f64::total_cmp);

    #[allow(clippy::cast_precision_loss)]
    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let mut stats = [0.0; STATISTIC_COUNT];
    stats[Statistic::Mean.index()] = mean;
    stats[Statistic::Median.index()] = quantile_sorted(&sorted, 0.5);
    stats[Statistic::StdDev.index()] = variance.sqrt();
    stats[Statistic::Min.index()] = sorted[0];
    stats[Statistic::Max.index()] = sorted[sorted.len() - 1];
    stats[Statistic::Q1.index()] = quantile_sorted(&sorted, 0.25);
    stats[Statistic::Q3.index()] = quantile_sorted(&sorted, 0.75);
    stats
}

/// Ensemble statistics over `(statistic, decade_month, y, x)`.
///
/// Fully materialised: safe to share across worker threads behind an
/// `Arc`.
#[derive(Debug, Clone)]
pub struct EnsembleCube {
    axes: GridAxes,
    /// One row-major plane stack per statistic, indexed by [`Statistic::index`].
    variables: Vec<Vec<f64>>,
    members: Vec<String>,
}

impl EnsembleCube {
    /// Coordinate axes.
    #[must_use]
    pub const fn axes(&self) -> &GridAxes {
        &self.axes
    }

    /// Number of contributing models (provenance only).
    #[must_use]
    pub fn sample_size(&self) -> usize {
        self.members.len()
    }

    /// Contributing model names, sorted.
    #[must_use]
    pub fn members(&self) -> &[String] {
        &self.members
    }

    /// Values of one statistic variable.
    #[must_use]
    pub fn variable(&self, stat: Statistic) -> &[f64] {
        &self.variables[stat.index()]
    }

    /// Value of `stat` at `(label, iy, ix)`.
    #[must_use]
    pub fn value(&self, stat: Statistic, label: usize, iy: usize, ix: usize) -> f64 {
        self.variables[stat.index()][self.axes.offset(label, iy, ix)]
    }

    /// Every statistic at `(label, iy, ix)`.
    #[must_use]
    pub fn cell(&self, label: usize, iy: usize, ix: usize) -> [f64; STATISTIC_COUNT] {
        let offset = self.axes.offset(label, iy, ix);
        let mut out = [0.0; STATISTIC_COUNT];
        for stat in Statistic::ALL {
            out[stat.index()] = self.variables[stat.index()][offset];
        }
        out
    }

    /// Minimum and maximum of a statistic, ignoring `NaN` cells.
    #[must_use]
    pub fn range(&self, stat: Statistic) -> Option<(f64, f64)> {
        self.variable(stat)
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }
}

/// Reduces stacked model climatologies into an [`EnsembleCube`].
#[derive(Debug, Clone, Copy, Default)]
pub struct EnsembleAggregator;

impl EnsembleAggregator {
    /// Compute per-cell ensemble statistics across the model axis.
    #[must_use]
    pub fn reduce_ensemble(grid: &ClimateGrid) -> EnsembleCube {
        let axes = grid.axes().clone();
        let model_count = grid.models().len();

        let cells: Vec<[f64; STATISTIC_COUNT]> = (0..axes.len())
            .into_par_iter()
            .map_init(
                || Vec::with_capacity(model_count),
                |scratch, offset| {
                    scratch.clear();
                    scratch.extend((0..model_count).map(|m| grid.member(m)[offset]));
                    cell_statistics(scratch)
                },
            )
            .collect();

        let mut variables = vec![Vec::with_capacity(cells.len()); STATISTIC_COUNT];
        for cell in &cells {
            for (variable, value) in variables.iter_mut().zip(cell) {
                variable.push(*value);
            }
        }

        let mut members = grid.models().to_vec();
        members.sort();
        info!(sample_size = members.len(), cells = axes.len(), "Ensemble reduced");

        EnsembleCube {
            axes,
            variables,
            members,
        }
    }
}
