//! Zonal aggregation over a small synthetic ensemble: failure isolation,
//! null handling and multi-model statistics.

use infraclimate::climate::{
    ClimateGrid, Climatology, DecadeMonth, EnsembleAggregator, EnsembleCube, GridAxes, Statistic,
};
use infraclimate::geometry::{classify, InfrastructureFeature};
use infraclimate::zonal::{
    drop_null_rows, AggregationMethod, ErrorPolicy, ZonalAggregationEngine, ZonalRow,
};
use infraclimate::Error;
use std::sync::Arc;

fn axes(labels: u8) -> GridAxes {
    GridAxes::new(
        (1..=labels)
            .map(|m| DecadeMonth::new(2050, m).unwrap())
            .collect(),
        vec![0.0, 1.0, 2.0],
        vec![0.0, 1.0, 2.0],
    )
}

/// Two models over a 3x3 grid; model `b` is model `a` plus `offset`.
fn two_model_cube(labels: u8, offset: f64) -> Arc<EnsembleCube> {
    let base: Vec<f64> = (0..u32::from(labels) * 9).map(f64::from).collect();
    let shifted: Vec<f64> = base.iter().map(|v| v + offset).collect();
    let grid = ClimateGrid::stack(vec![
        ("a".to_string(), Climatology::new(axes(labels), base).unwrap()),
        ("b".to_string(), Climatology::new(axes(labels), shifted).unwrap()),
    ])
    .unwrap();
    Arc::new(EnsembleAggregator::reduce_ensemble(&grid))
}

fn feature(id: i64, wkt: &str) -> InfrastructureFeature {
    InfrastructureFeature::from_wkt(id, wkt).unwrap()
}

fn rows_of(rows: &[ZonalRow], id: i64) -> Vec<&ZonalRow> {
    rows.iter().filter(|r| r.feature_id == id).collect()
}

// ============================================================================
// Failure isolation
// ============================================================================

#[test]
fn test_failed_polygon_chunk_drops_only_its_features() {
    let engine =
        ZonalAggregationEngine::new(two_model_cube(2, 2.0), AggregationMethod::Mean, 2).unwrap();
    let features = classify(vec![
        feature(1, "POINT (1 1)"),
        feature(2, "LINESTRING (0 0, 2 2)"),
        // chunk 0: [10, 11]; chunk 1: [12, 13]
        feature(10, "POLYGON ((NaN 0, 1 0, 1 1, 0 1, NaN 0))"),
        feature(11, "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))"),
        feature(12, "POLYGON ((1 1, 2 1, 2 2, 1 2, 1 1))"),
        feature(13, "POLYGON ((0 0, 2 0, 2 2, 0 2, 0 0))"),
    ]);

    let outcome = engine.aggregate(&features).unwrap();

    assert_eq!(outcome.failed_chunks.len(), 1);
    assert_eq!(outcome.failed_chunks[0].task, 0);
    assert_eq!(outcome.failed_features, 2);
    assert!(rows_of(&outcome.rows, 10).is_empty());
    assert!(rows_of(&outcome.rows, 11).is_empty());
    for id in [1, 2, 12, 13] {
        assert_eq!(rows_of(&outcome.rows, id).len(), 2, "feature {id}");
    }
}

#[test]
fn test_fail_fast_aborts_aggregation() {
    let engine = ZonalAggregationEngine::new(two_model_cube(1, 2.0), AggregationMethod::Mean, 2)
        .unwrap()
        .with_error_policy(ErrorPolicy::FailFast);
    let features = classify(vec![
        feature(10, "POLYGON ((0 0, 1 0, inf 1, 0 1, 0 0))"),
        feature(11, "POLYGON ((0 0, 1 0, 1 1, 0 1, 0 0))"),
    ]);

    assert!(matches!(
        engine.aggregate(&features),
        Err(Error::Aggregation(_))
    ));
}

// ============================================================================
// Statistics flow through
// ============================================================================

#[test]
fn test_point_carries_every_ensemble_statistic() {
    let engine =
        ZonalAggregationEngine::new(two_model_cube(1, 2.0), AggregationMethod::Mean, 1).unwrap();
    let rows = engine.aggregate_points(&[feature(1, "POINT (2 0)")]);

    // cell (0, 2) holds 2.0 in model a and 4.0 in model b
    let row = &rows[0];
    assert_eq!(row.value(Statistic::Mean), Some(3.0));
    assert_eq!(row.value(Statistic::Median), Some(3.0));
    assert_eq!(row.value(Statistic::StdDev), Some(1.0));
    assert_eq!(row.value(Statistic::Min), Some(2.0));
    assert_eq!(row.value(Statistic::Max), Some(4.0));
    assert_eq!(row.value(Statistic::Q1), Some(2.5));
    assert_eq!(row.value(Statistic::Q3), Some(3.5));
}

#[test]
fn test_polygon_weighted_by_coverage() {
    let engine =
        ZonalAggregationEngine::new(two_model_cube(1, 0.0), AggregationMethod::Mean, 1).unwrap();
    // Full cell (0,0) = 0.0 plus half of cell (0,1) = 1.0
    let polygon = feature(1, "POLYGON ((-0.5 -0.5, 1 -0.5, 1 0.5, -0.5 0.5, -0.5 -0.5))");
    let outcome = engine.aggregate_polygons(&[polygon]).unwrap();

    let mean = outcome.rows[0].value(Statistic::Mean).unwrap();
    assert!((mean - 1.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_sum_over_polygon() {
    let engine =
        ZonalAggregationEngine::new(two_model_cube(1, 0.0), AggregationMethod::Sum, 1).unwrap();
    let polygon = feature(1, "POLYGON ((-0.5 -0.5, 1.5 -0.5, 1.5 0.5, -0.5 0.5, -0.5 -0.5))");
    let outcome = engine.aggregate_polygons(&[polygon]).unwrap();

    assert_eq!(outcome.rows[0].value(Statistic::Max), Some(1.0));
}

// ============================================================================
// Null rows
// ============================================================================

#[test]
fn test_outside_features_become_null_and_are_dropped() {
    let engine =
        ZonalAggregationEngine::new(two_model_cube(3, 1.0), AggregationMethod::Max, 2).unwrap();
    let features = classify(vec![
        feature(1, "POINT (1 1)"),
        feature(2, "POINT (50 50)"),
        feature(3, "LINESTRING (40 40, 41 41)"),
        feature(4, "POLYGON ((30 30, 31 30, 31 31, 30 30))"),
    ]);

    let outcome = engine.aggregate(&features).unwrap();
    assert_eq!(outcome.rows.len(), 12);

    let (kept, report) = drop_null_rows(outcome.rows);
    assert_eq!(kept.len(), 3);
    assert!(kept.iter().all(|r| r.feature_id == 1 && !r.has_null()));
    assert_eq!(report.rows, 9);
    assert_eq!(report.features, 3);
}

/// One row of cells at y = 0; `y_step` is the native size before slicing.
fn single_row_cube(y_step: Option<f64>) -> Arc<EnsembleCube> {
    let mut axes = GridAxes::new(
        vec![DecadeMonth::new(2030, 6).unwrap()],
        vec![0.0],
        vec![0.0, 1.0],
    );
    axes.y_step = y_step;
    let grid = ClimateGrid::stack(vec![(
        "m".to_string(),
        Climatology::new(axes, vec![1.0, 2.0]).unwrap(),
    )])
    .unwrap();
    Arc::new(EnsembleAggregator::reduce_ensemble(&grid))
}

#[test]
fn test_single_coordinate_axis_without_step_rejected() {
    assert!(matches!(
        ZonalAggregationEngine::new(single_row_cube(None), AggregationMethod::Mean, 1),
        Err(Error::Grid(_))
    ));
}

#[test]
fn test_single_coordinate_axis_uses_native_step() {
    let engine =
        ZonalAggregationEngine::new(single_row_cube(Some(2.0)), AggregationMethod::Mean, 1).unwrap();
    let features = classify(vec![
        feature(1, "POINT (1 0.9)"),
        feature(2, "POINT (0 1.5)"),
        // Half of each cell; both span y in [-1, 1]
        feature(3, "POLYGON ((0 -1, 1 -1, 1 1, 0 1, 0 -1))"),
    ]);
    let outcome = engine.aggregate(&features).unwrap();

    let mean = |id: i64| rows_of(&outcome.rows, id)[0].value(Statistic::Mean);
    assert_eq!(mean(1), Some(2.0));
    assert_eq!(mean(2), None);
    assert_eq!(mean(3), Some(1.5));
}
