//! Exposure records and their provenance
//!
//! [`ExposureRecord`] is the persisted fact row; a batch of them is handed
//! to the loader as an Arrow [`RecordBatch`] whose columns mirror the fact
//! table leaf columns exactly.

use crate::climate::{EnsembleCube, Scenario, Statistic, STATISTIC_COUNT};
use crate::config::BoundingBox;
use crate::zonal::{AggregationMethod, ZonalRow};
use crate::{Error, Result};
use arrow::array::{ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Fact column holding the feature id.
pub const FEATURE_ID_COLUMN: &str = "feature_id";
/// Fact column holding the decade start year.
pub const DECADE_COLUMN: &str = "decade";
/// Fact column holding the calendar month.
pub const MONTH_COLUMN: &str = "month";
/// Fact column holding the scenario key.
pub const SSP_COLUMN: &str = "ssp";
/// Fact column holding the provenance JSON.
pub const METADATA_COLUMN: &str = "metadata";

/// Provenance attached verbatim to every persisted batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetadata {
    /// Climate variable (e.g. `tas`).
    pub variable: String,
    /// Scenario key (`historical`, `ssp585`, ...).
    pub scenario: String,
    /// Contributing models, sorted.
    pub ensemble_members: Vec<String>,
    /// Number of contributing models.
    pub sample_size: usize,
    /// Zonal aggregation method.
    pub zonal_agg_method: AggregationMethod,
    /// EPSG code of feature geometries.
    pub crs: u32,
    /// Spatial subset, `None` for global extent.
    pub bbox: Option<BoundingBox>,
    /// Minimum of the ensemble mean across the cube.
    pub value_min: Option<f64>,
    /// Maximum of the ensemble mean across the cube.
    pub value_max: Option<f64>,
    /// When the metadata was produced.
    pub created_at: DateTime<Utc>,
}

impl PipelineMetadata {
    /// Derive provenance from a reduced cube.
    #[must_use]
    pub fn from_cube(
        cube: &EnsembleCube,
        variable: &str,
        scenario: Scenario,
        method: AggregationMethod,
        crs: u32,
        bbox: Option<BoundingBox>,
    ) -> Self {
        let range = cube.range(Statistic::Mean);
        Self {
            variable: variable.to_string(),
            scenario: scenario.key(),
            ensemble_members: cube.members().to_vec(),
            sample_size: cube.sample_size(),
            zonal_agg_method: method,
            crs,
            bbox,
            value_min: range.map(|(lo, _)| lo),
            value_max: range.map(|(_, hi)| hi),
            created_at: Utc::now(),
        }
    }

    /// Serialise to the JSON stored in the registry and fact rows.
    ///
    /// # Errors
    /// Returns error if serialisation fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// One persisted fact row. Natural key: `(feature_id, decade, month, ssp)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExposureRecord {
    /// Feature id.
    pub feature_id: i64,
    /// Decade start year.
    pub decade: i32,
    /// Calendar month, 1-12.
    pub month: u8,
    /// Scenario key.
    pub ssp: String,
    /// Statistics indexed by [`Statistic::index`].
    pub stats: [f64; STATISTIC_COUNT],
}

impl ExposureRecord {
    /// Convert a complete zonal row. `None` if any statistic is null.
    #[must_use]
    pub fn from_row(row: &ZonalRow, scenario: Scenario) -> Option<Self> {
        let mut stats = [0.0; STATISTIC_COUNT];
        for (slot, value) in stats.iter_mut().zip(row.values) {
            *slot = value?;
        }
        Some(Self {
            feature_id: row.feature_id,
            decade: row.label.decade(),
            month: row.label.month(),
            ssp: scenario.key(),
            stats,
        })
    }

    /// Value of one statistic.
    #[must_use]
    pub fn stat(&self, stat: Statistic) -> f64 {
        self.stats[stat.index()]
    }
}

/// Arrow schema of an exposure batch, in fact-table column order.
#[must_use]
pub fn exposure_schema() -> SchemaRef {
    let mut fields = vec![
        Field::new(FEATURE_ID_COLUMN, DataType::Int64, false),
        Field::new(MONTH_COLUMN, DataType::Int32, false),
        Field::new(DECADE_COLUMN, DataType::Int32, false),
        Field::new(SSP_COLUMN, DataType::Utf8, false),
    ];
    fields.extend(
        Statistic::ALL
            .iter()
            .map(|s| Field::new(s.column_name(), DataType::Float64, false)),
    );
    fields.push(Field::new(METADATA_COLUMN, DataType::Utf8, false));
    Arc::new(Schema::new(fields))
}

/// Build an exposure batch; every row carries the same metadata JSON.
///
/// # Errors
/// Returns error if the batch cannot be assembled.
pub fn to_record_batch(records: &[ExposureRecord], metadata_json: &str) -> Result<RecordBatch> {
    let mut columns: Vec<ArrayRef> = vec![
        Arc::new(Int64Array::from_iter_values(records.iter().map(|r| r.feature_id))),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| i32::from(r.month)))),
        Arc::new(Int32Array::from_iter_values(records.iter().map(|r| r.decade))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.ssp.as_str()))),
    ];
    for stat in Statistic::ALL {
        columns.push(Arc::new(Float64Array::from_iter_values(
            records.iter().map(|r| r.stat(stat)),
        )));
    }
    columns.push(Arc::new(StringArray::from_iter_values(
        std::iter::repeat(metadata_json).take(records.len()),
    )));

    RecordBatch::try_new(exposure_schema(), columns)
        .map_err(|e| Error::InvalidInput(format!("Failed to build exposure batch: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::DecadeMonth;

    fn row(values: [Option<f64>; STATISTIC_COUNT]) -> ZonalRow {
        ZonalRow {
            feature_id: 42,
            label: DecadeMonth::new(2050, 7).unwrap(),
            values,
        }
    }

    #[test]
    fn test_from_row() {
        let record = ExposureRecord::from_row(&row([Some(1.5); STATISTIC_COUNT]), Scenario::Ssp(585)).unwrap();
        assert_eq!(record.decade, 2050);
        assert_eq!(record.month, 7);
        assert_eq!(record.ssp, "ssp585");
        assert_eq!(record.stat(Statistic::Q3), 1.5);
    }

    #[test]
    fn test_from_row_rejects_null() {
        let mut values = [Some(1.0); STATISTIC_COUNT];
        values[Statistic::StdDev.index()] = None;
        assert!(ExposureRecord::from_row(&row(values), Scenario::Historical).is_none());
    }

    #[test]
    fn test_record_batch_layout() {
        let record = ExposureRecord::from_row(&row([Some(2.0); STATISTIC_COUNT]), Scenario::Ssp(245)).unwrap();
        let batch = to_record_batch(&[record.clone(), record], "{}").unwrap();
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.num_columns(), 4 + STATISTIC_COUNT + 1);
        assert_eq!(batch.schema().field(4).name(), "value_mean");
        assert_eq!(batch.schema().field(11).name(), METADATA_COLUMN);
    }

    #[test]
    fn test_metadata_json_roundtrip_fields() {
        let metadata = PipelineMetadata {
            variable: "tas".to_string(),
            scenario: "ssp585".to_string(),
            ensemble_members: vec!["A".to_string(), "B".to_string()],
            sample_size: 2,
            zonal_agg_method: AggregationMethod::Max,
            crs: 4326,
            bbox: None,
            value_min: Some(1.0),
            value_max: Some(2.0),
            created_at: Utc::now(),
        };
        let json = metadata.to_json().unwrap();
        assert!(json.contains("\"zonal_agg_method\":\"max\""));
        let back: PipelineMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, metadata);
    }
}
