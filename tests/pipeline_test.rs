//! End-to-end pipeline tests over an in-memory climate store and a
//! file-backed SQLite fact store.

use arrow::array::{Date32Array, Float64Array, RecordBatch};
use chrono::NaiveDate;
use infraclimate::climate::validator::FUTURE_YEARS;
use infraclimate::climate::Scenario;
use infraclimate::config::{BoundingBox, PipelineConfig};
use infraclimate::load::connect_pool;
use infraclimate::pipeline::{run_scenarios, Pipeline, PipelineRun, PipelineStage, RunStatus};
use infraclimate::store::{sample_schema, MemoryClimateStore};
use infraclimate::Error;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// Cell centers in the [0, 360) longitude convention.
const LONS: [f64; 2] = [238.0, 239.0];
const LATS: [f64; 2] = [46.0, 47.0];

/// Twelve mid-month samples per cell; the value equals the month number.
fn year_batch(year: i32) -> RecordBatch {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
    let (mut time, mut y, mut x, mut value) = (vec![], vec![], vec![], vec![]);
    for month in 1..=12u32 {
        let date = NaiveDate::from_ymd_opt(year, month, 15).unwrap();
        let days = i32::try_from((date - epoch).num_days()).unwrap();
        for lat in LATS {
            for lon in LONS {
                time.push(days);
                y.push(lat);
                x.push(lon);
                value.push(f64::from(month));
            }
        }
    }
    RecordBatch::try_new(
        sample_schema(),
        vec![
            Arc::new(Date32Array::from(time)),
            Arc::new(Float64Array::from(y)),
            Arc::new(Float64Array::from(x)),
            Arc::new(Float64Array::from(value)),
        ],
    )
    .unwrap()
}

/// `complete` has every future year under `ssp585`; `baseline_only`
/// has no `ssp585` directory at all.
fn climate_store() -> Arc<MemoryClimateStore> {
    let store = MemoryClimateStore::new();
    for year in FUTURE_YEARS {
        store.insert(
            format!("root/complete/ssp585/tas_day_{year}.parquet"),
            vec![year_batch(year)],
        );
    }
    store.insert(
        "root/baseline_only/historical/tas_day_1950.parquet",
        vec![year_batch(1950)],
    );
    Arc::new(store)
}

async fn fact_store(dir: &TempDir) -> (String, SqlitePool) {
    let url = format!("sqlite://{}", dir.path().join("exposure.db").display());
    let pool = connect_pool(&url, 3).await.unwrap();
    for table in ["infrastructure_point", "infrastructure_polygon"] {
        sqlx::query(&format!(
            "CREATE TABLE {table} (osm_id INTEGER NOT NULL, osm_type TEXT NOT NULL, geom TEXT NOT NULL)"
        ))
        .execute(&pool)
        .await
        .unwrap();
    }
    let features = [
        ("infrastructure_point", 1, "POINT (-122 47)"),
        ("infrastructure_point", 2, "POINT (10 10)"),
        (
            "infrastructure_polygon",
            3,
            "POLYGON ((-122.25 46.25, -121.25 46.25, -121.25 47.25, -122.25 47.25, -122.25 46.25))",
        ),
    ];
    for (table, id, wkt) in features {
        sqlx::query(&format!(
            "INSERT INTO {table} (osm_id, osm_type, geom) VALUES (?, 'power', ?)"
        ))
        .bind(id)
        .bind(wkt)
        .execute(&pool)
        .await
        .unwrap();
    }
    (url, pool)
}

fn config(url: &str) -> PipelineConfig {
    PipelineConfig::from_toml_str(&format!(
        r#"
        climate_variable = "tas"
        scenario = "ssp585"
        zonal_agg_method = "mean"
        region = "washington"
        osm_category = "infrastructure"
        osm_type = "power"
        climate_root = "root"
        database_url = "{url}"
        worker_count = 2
        "#
    ))
    .unwrap()
}

async fn scalar(pool: &SqlitePool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}

#[tokio::test]
async fn test_single_eligible_model_end_to_end() {
    let dir = TempDir::new().unwrap();
    let (url, pool) = fact_store(&dir).await;
    let pipeline = Pipeline::new(config(&url), climate_store(), pool.clone()).unwrap();

    let mut record = PipelineRun::new(Scenario::Ssp(585));
    let summary = pipeline.run_with_record(&mut record).await.unwrap();

    assert_eq!(record.status(), RunStatus::Succeeded);
    assert_eq!(record.stage(), Some(PipelineStage::BulkLoad));
    assert_eq!(summary.models_discovered, 2);
    assert_eq!(summary.models_eligible, 1);
    assert_eq!(summary.models_skipped, 1);
    assert_eq!(summary.sample_size, 1);
    assert_eq!(summary.features, 3);

    // 2015-2100 spans decades 2010..=2100: 10 decades x 12 months
    let labels = 120;
    assert_eq!(summary.null_rows, labels);
    assert_eq!(summary.null_features, 1);
    assert_eq!(summary.rows_inserted, 2 * labels as u64);

    assert_eq!(scalar(&pool, "SELECT COUNT(*) FROM exposure_tas").await, 240);
    assert_eq!(
        scalar(&pool, "SELECT COUNT(*) FROM exposure_tas WHERE value_stddev != 0").await,
        0
    );
    assert_eq!(
        scalar(&pool, "SELECT COUNT(*) FROM exposure_tas WHERE feature_id = 2").await,
        0
    );

    let july: f64 = sqlx::query_scalar(
        "SELECT value_mean FROM exposure_tas WHERE feature_id = 1 AND decade = 2050 AND month = 7",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!((july - 7.0).abs() < 1e-12);

    let metadata: String =
        sqlx::query_scalar("SELECT metadata FROM climate_variables WHERE variable = 'tas'")
            .fetch_one(&pool)
            .await
            .unwrap();
    let metadata: serde_json::Value = serde_json::from_str(&metadata).unwrap();
    assert_eq!(metadata["sample_size"].as_u64(), Some(1));
    assert_eq!(metadata["ensemble_members"][0], "complete");
    assert_eq!(metadata["scenario"], "ssp585");
}

#[tokio::test]
async fn test_single_column_bbox_keeps_native_cell_size() {
    let dir = TempDir::new().unwrap();
    let (url, pool) = fact_store(&dir).await;
    let mut cfg = config(&url);
    cfg.bbox = Some(BoundingBox {
        min_lon: -122.1,
        min_lat: 45.0,
        max_lon: -121.9,
        max_lat: 48.0,
    });
    let pipeline = Pipeline::new(cfg, climate_store(), pool.clone()).unwrap();

    let mut record = PipelineRun::new(Scenario::Ssp(585));
    let summary = pipeline.run_with_record(&mut record).await.unwrap();

    assert_eq!(record.status(), RunStatus::Succeeded);
    assert_eq!(summary.null_features, 1);
    assert_eq!(summary.rows_inserted, 240);

    // The polygon still overlaps the lone -122 column, cell size 1 degree
    for feature in [1, 3] {
        let july: f64 = sqlx::query_scalar(&format!(
            "SELECT value_mean FROM exposure_tas WHERE feature_id = {feature} AND decade = 2050 AND month = 7"
        ))
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!((july - 7.0).abs() < 1e-12);
    }
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let (url, pool) = fact_store(&dir).await;
    let pipeline = Pipeline::new(config(&url), climate_store(), pool.clone()).unwrap();

    let first = pipeline.run().await.unwrap();
    let second = pipeline.run().await.unwrap();

    assert_eq!(first.rows_inserted, 240);
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.rows_skipped, 240);
    assert_eq!(scalar(&pool, "SELECT COUNT(*) FROM exposure_tas").await, 240);
}

#[tokio::test]
async fn test_no_eligible_models_fails_at_validation() {
    let dir = TempDir::new().unwrap();
    let (url, pool) = fact_store(&dir).await;
    let mut cfg = config(&url);
    cfg.scenario = Scenario::Ssp(245);
    let pipeline = Pipeline::new(cfg, climate_store(), pool).unwrap();

    let mut record = PipelineRun::new(Scenario::Ssp(245));
    let err = pipeline.run_with_record(&mut record).await.unwrap_err();

    assert!(matches!(err, Error::NoEligibleModels { skipped: 2, .. }));
    assert_eq!(record.status(), RunStatus::Failed);
    assert_eq!(record.failed_stage(), Some(PipelineStage::Validate));
}

#[tokio::test]
async fn test_run_scenarios_continues_after_failure() {
    let dir = TempDir::new().unwrap();
    let (url, pool) = fact_store(&dir).await;

    let runs = run_scenarios(
        &config(&url),
        climate_store(),
        pool.clone(),
        &[Scenario::Ssp(245), Scenario::Ssp(585)],
    )
    .await;

    assert_eq!(runs.len(), 2);
    assert_eq!(runs[0].status(), RunStatus::Failed);
    assert_eq!(runs[1].status(), RunStatus::Succeeded);
    assert_eq!(runs[1].summary().unwrap().rows_inserted, 240);
}

#[tokio::test]
async fn test_connect_opens_pool_from_config() {
    let dir = TempDir::new().unwrap();
    let (url, _pool) = fact_store(&dir).await;
    let pipeline = Pipeline::connect(config(&url), climate_store()).await.unwrap();
    assert_eq!(pipeline.config().climate_variable, "tas");
}
