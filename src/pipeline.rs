//! End-to-end pipeline
//!
//! Stages run strictly in order, each consuming only the previous stage's
//! output:
//!
//! ```text
//! Discover -> Validate -> ReducePerModel -> Stack -> ReduceEnsemble
//!   -> Classify -> ZonalAggregate -> DropNulls -> BulkLoad
//! ```
//!
//! A run ends `Succeeded` once the load commits, or `Failed` at the first
//! stage that cannot recover. Non-fatal conditions (skipped models, failed
//! polygon chunks, null rows) are counted in the [`RunSummary`]. There is
//! no restart; re-running is the caller's decision.

use crate::climate::{
    ClimateGrid, ClimatologyReducer, EnsembleAggregator, ModelValidator, Scenario,
};
use crate::config::PipelineConfig;
use crate::exposure::{to_record_batch, ExposureRecord, PipelineMetadata};
use crate::geometry::classify;
use crate::load::{connect_pool, load_features, BulkLoader, Identifier};
use crate::store::ClimateStore;
use crate::zonal::{drop_null_rows, ZonalAggregationEngine};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// List model directories.
    Discover,
    /// Check scenario availability and temporal coverage.
    Validate,
    /// Decade-month climatology per model.
    ReducePerModel,
    /// Stack climatologies along the model axis.
    Stack,
    /// Cross-model statistics.
    ReduceEnsemble,
    /// Fetch and partition infrastructure features.
    Classify,
    /// Point, line and polygon aggregation.
    ZonalAggregate,
    /// Drop rows with null statistics.
    DropNulls,
    /// Transactional load.
    BulkLoad,
}

impl PipelineStage {
    /// Every stage in execution order.
    pub const ALL: [Self; 9] = [
        Self::Discover,
        Self::Validate,
        Self::ReducePerModel,
        Self::Stack,
        Self::ReduceEnsemble,
        Self::Classify,
        Self::ZonalAggregate,
        Self::DropNulls,
        Self::BulkLoad,
    ];

    /// Snake-case name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Validate => "validate",
            Self::ReducePerModel => "reduce_per_model",
            Self::Stack => "stack",
            Self::ReduceEnsemble => "reduce_ensemble",
            Self::Classify => "classify",
            Self::ZonalAggregate => "zonal_aggregate",
            Self::DropNulls => "drop_nulls",
            Self::BulkLoad => "bulk_load",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Created, not started.
    Pending,
    /// Executing a stage.
    Running,
    /// Load committed.
    Succeeded,
    /// Stopped at a stage that could not recover.
    Failed,
}

/// Per-run counters; non-fatal conditions end up here instead of errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Model directories found.
    pub models_discovered: usize,
    /// Models that passed validation.
    pub models_eligible: usize,
    /// Models skipped by validation.
    pub models_skipped: usize,
    /// Ensemble size.
    pub sample_size: usize,
    /// Features with a usable geometry.
    pub features: usize,
    /// Features whose geometry did not parse.
    pub invalid_features: usize,
    /// Polygon chunks that failed.
    pub failed_chunks: usize,
    /// Features dropped with their failed chunk.
    pub failed_features: usize,
    /// Rows dropped for null statistics.
    pub null_rows: usize,
    /// Features with at least one null row.
    pub null_features: usize,
    /// Rows appended to staging.
    pub rows_staged: u64,
    /// Rows newly written to the fact table.
    pub rows_inserted: u64,
    /// Rows skipped on existing natural keys.
    pub rows_skipped: u64,
}

/// Lifecycle record of one pipeline execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    run_id: String,
    scenario: Scenario,
    status: RunStatus,
    stage: Option<PipelineStage>,
    failed_stage: Option<PipelineStage>,
    error: Option<String>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    summary: Option<RunSummary>,
}

impl PipelineRun {
    /// New pending run with a random id.
    #[must_use]
    pub fn new(scenario: Scenario) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            scenario,
            status: RunStatus::Pending,
            stage: None,
            failed_stage: None,
            error: None,
            started_at: None,
            ended_at: None,
            summary: None,
        }
    }

    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Scenario being processed.
    #[must_use]
    pub const fn scenario(&self) -> Scenario {
        self.scenario
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Last stage entered.
    #[must_use]
    pub const fn stage(&self) -> Option<PipelineStage> {
        self.stage
    }

    /// Stage that failed, if any.
    #[must_use]
    pub const fn failed_stage(&self) -> Option<PipelineStage> {
        self.failed_stage
    }

    /// Failure message, if any.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// End timestamp.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Summary of a succeeded run.
    #[must_use]
    pub const fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    /// Transition Pending -> Running.
    pub fn start(&mut self) {
        self.status = RunStatus::Running;
        self.started_at = Some(Utc::now());
    }

    /// Record entry into `stage`.
    pub fn enter(&mut self, stage: PipelineStage) {
        info!(run_id = %self.run_id, stage = %stage, "Entering stage");
        self.stage = Some(stage);
    }

    /// Terminal success.
    pub fn succeed(&mut self, summary: RunSummary) {
        self.status = RunStatus::Succeeded;
        self.summary = Some(summary);
        self.ended_at = Some(Utc::now());
    }

    /// Terminal failure at the current stage.
    pub fn fail(&mut self, error: &Error) {
        self.status = RunStatus::Failed;
        self.failed_stage = self.stage;
        self.error = Some(error.to_string());
        self.ended_at = Some(Utc::now());
    }
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Aggregation(format!("Blocking task failed: {e}"))
}

/// One configured pipeline over a climate store and a fact store.
pub struct Pipeline<S> {
    config: PipelineConfig,
    store: Arc<S>,
    pool: SqlitePool,
}

impl<S: ClimateStore + 'static> Pipeline<S> {
    /// Pipeline over an existing pool.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new(config: PipelineConfig, store: Arc<S>, pool: SqlitePool) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            store,
            pool,
        })
    }

    /// Pipeline with a pool opened from `config.database_url`.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn connect(config: PipelineConfig, store: Arc<S>) -> Result<Self> {
        config.validate()?;
        let pool = connect_pool(&config.database_url, config.max_connections).await?;
        Self::new(config, store, pool)
    }

    /// Configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run every stage once.
    ///
    /// # Errors
    /// Returns the error of the first stage that fails.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut record = PipelineRun::new(self.config.scenario);
        self.run_with_record(&mut record).await
    }

    /// Run every stage, tracking progress in `record`.
    ///
    /// # Errors
    /// Returns the error of the first stage that fails; `record` then holds
    /// the failing stage.
    pub async fn run_with_record(&self, record: &mut PipelineRun) -> Result<RunSummary> {
        record.start();
        info!(
            run_id = %record.run_id(),
            variable = %self.config.climate_variable,
            scenario = %self.config.scenario,
            "Pipeline started"
        );
        match self.execute(record).await {
            Ok(summary) => {
                info!(run_id = %record.run_id(), ?summary, "Pipeline succeeded");
                record.succeed(summary.clone());
                Ok(summary)
            }
            Err(e) => {
                record.fail(&e);
                error!(
                    run_id = %record.run_id(),
                    stage = ?record.failed_stage(),
                    error = %e,
                    "Pipeline failed"
                );
                Err(e)
            }
        }
    }

    async fn execute(&self, record: &mut PipelineRun) -> Result<RunSummary> {
        let config = &self.config;
        let scenario = config.scenario;
        let variable = Identifier::new(&config.climate_variable)?;
        let category = Identifier::new(&config.osm_category)?;
        let fact = Identifier::fact_table(variable.as_str())?;
        let mut summary = RunSummary::default();

        record.enter(PipelineStage::Discover);
        let validator = Arc::new(ModelValidator::new(Arc::clone(&self.store), variable.as_str()));
        let model_paths = validator
            .list_models(&config.climate_root, config.max_models)
            .await?;
        summary.models_discovered = model_paths.len();

        record.enter(PipelineStage::Validate);
        let validation = validator
            .validate_models(model_paths, scenario, config.io_concurrency)
            .await?;
        summary.models_eligible = validation.eligible.len();
        summary.models_skipped = validation.skipped.len();

        record.enter(PipelineStage::ReducePerModel);
        let bbox = config.bounding_box();
        let reducer = ClimatologyReducer::new(bbox);
        let mut members = Vec::with_capacity(validation.eligible.len());
        for run in &validation.eligible {
            let climatology = reducer.reduce_model(self.store.as_ref(), run).await?;
            members.push((run.name.clone(), climatology));
        }

        record.enter(PipelineStage::Stack);
        let grid = ClimateGrid::stack(members)?;

        record.enter(PipelineStage::ReduceEnsemble);
        let cube = tokio::task::spawn_blocking(move || EnsembleAggregator::reduce_ensemble(&grid))
            .await
            .map_err(join_error)?;
        let cube = Arc::new(cube);
        summary.sample_size = cube.sample_size();
        let metadata = PipelineMetadata::from_cube(
            &cube,
            variable.as_str(),
            scenario,
            config.zonal_agg_method,
            config.crs,
            bbox,
        );

        record.enter(PipelineStage::Classify);
        let features = load_features(&self.pool, &category, &config.osm_type).await?;
        summary.invalid_features = features.invalid;
        let classified = classify(features.features);
        summary.features = classified.len();
        info!(
            points = classified.points.len(),
            lines = classified.lines.len(),
            polygons = classified.polygons.len(),
            "Features classified"
        );

        record.enter(PipelineStage::ZonalAggregate);
        let engine = ZonalAggregationEngine::new(cube, config.zonal_agg_method, config.worker_count)?;
        let zonal = tokio::task::spawn_blocking(move || engine.aggregate(&classified))
            .await
            .map_err(join_error)??;
        summary.failed_chunks = zonal.failed_chunks.len();
        summary.failed_features = zonal.failed_features;

        record.enter(PipelineStage::DropNulls);
        let (rows, nulls) = drop_null_rows(zonal.rows);
        summary.null_rows = nulls.rows;
        summary.null_features = nulls.features;
        let records: Vec<ExposureRecord> = rows
            .iter()
            .filter_map(|row| ExposureRecord::from_row(row, scenario))
            .collect();

        record.enter(PipelineStage::BulkLoad);
        let metadata_json = metadata.to_json()?;
        let batch = to_record_batch(&records, &metadata_json)?;
        let loader = BulkLoader::new(self.pool.clone());
        loader.ensure_schema(&fact).await?;
        let report = loader
            .load(&fact, &batch, &variable, scenario, &metadata_json)
            .await?;
        summary.rows_staged = report.staged;
        summary.rows_inserted = report.inserted;
        summary.rows_skipped = report.skipped;

        Ok(summary)
    }
}

/// Run the pipeline once per scenario, sequentially. A failed scenario is
/// logged and recorded; the remaining scenarios still run.
pub async fn run_scenarios<S: ClimateStore + 'static>(
    config: &PipelineConfig,
    store: Arc<S>,
    pool: SqlitePool,
    scenarios: &[Scenario],
) -> Vec<PipelineRun> {
    let mut runs = Vec::with_capacity(scenarios.len());
    for &scenario in scenarios {
        let mut record = PipelineRun::new(scenario);
        let config = PipelineConfig {
            scenario,
            ..config.clone()
        };
        match Pipeline::new(config, Arc::clone(&store), pool.clone()) {
            Ok(pipeline) => {
                // Failures are already logged and captured in the record
                let _ = pipeline.run_with_record(&mut record).await;
            }
            Err(e) => {
                record.start();
                record.fail(&e);
                error!(scenario = %scenario, error = %e, "Invalid pipeline configuration");
            }
        }
        runs.push(record);
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        let mut sorted = PipelineStage::ALL;
        sorted.sort();
        assert_eq!(sorted, PipelineStage::ALL);
        assert_eq!(PipelineStage::ZonalAggregate.to_string(), "zonal_aggregate");
    }

    #[test]
    fn test_run_lifecycle_success() {
        let mut run = PipelineRun::new(Scenario::Ssp(585));
        assert_eq!(run.status(), RunStatus::Pending);
        run.start();
        run.enter(PipelineStage::Discover);
        assert_eq!(run.status(), RunStatus::Running);
        run.succeed(RunSummary::default());
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert!(run.ended_at().is_some());
        assert!(run.failed_stage().is_none());
    }

    #[test]
    fn test_run_lifecycle_failure_keeps_stage() {
        let mut run = PipelineRun::new(Scenario::Historical);
        run.start();
        run.enter(PipelineStage::Validate);
        run.fail(&Error::NoEligibleModels {
            scenario: "historical".to_string(),
            skipped: 2,
        });
        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.failed_stage(), Some(PipelineStage::Validate));
        assert!(run.error().unwrap().contains("historical"));
    }

    #[test]
    fn test_run_ids_unique() {
        let a = PipelineRun::new(Scenario::Ssp(126));
        let b = PipelineRun::new(Scenario::Ssp(126));
        assert_ne!(a.run_id(), b.run_id());
    }

    #[test]
    fn test_run_record_serializes() {
        let run = PipelineRun::new(Scenario::Ssp(245));
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"ssp245\""));
        assert!(json.contains("\"Pending\""));
    }
}
