//! Model run discovery and validation
//!
//! A model run is eligible for a scenario only if the scenario directory
//! exists under the model path and its per-year stores cover exactly one
//! of the two fixed calendars. Ineligible models are skipped with a
//! warning; the run fails only when nothing is left.

use super::Scenario;
use crate::store::{file_name, join_path, ClimateStore};
use crate::{Error, Result};
use std::ops::RangeInclusive;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Years a historical run must cover (1950-2014 inclusive).
pub const HISTORICAL_YEARS: RangeInclusive<i32> = 1950..=2014;

/// Years a future scenario run must cover (2015-2100 inclusive).
pub const FUTURE_YEARS: RangeInclusive<i32> = 2015..=2100;

/// A validated model run: transient, rebuilt on every pipeline execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRun {
    /// Model name (last segment of the model path).
    pub name: String,
    /// Model directory path in the store.
    pub path: String,
    /// Scenario the run was validated for.
    pub scenario: Scenario,
    /// Per-year store paths, sorted.
    pub stores: Vec<String>,
}

/// Why a model was skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No directory for the requested scenario.
    MissingScenario,
    /// Per-year stores do not match either calendar exactly.
    IncompleteCoverage {
        /// Number of year-bearing stores found.
        stores_found: usize,
    },
}

/// Result of validating every discovered model.
#[derive(Debug, Default)]
pub struct ValidationOutcome {
    /// Eligible runs, ordered by model name.
    pub eligible: Vec<ModelRun>,
    /// Skipped models with the reason.
    pub skipped: Vec<(String, Rejection)>,
}

/// Extract the year embedded in a per-year store name.
///
/// Matches `..._{YYYY}.zarr` and `..._{YYYY}.parquet`.
#[must_use]
pub fn store_year(store: &str) -> Option<i32> {
    let name = file_name(store);
    let stem = name
        .strip_suffix(".zarr")
        .or_else(|| name.strip_suffix(".parquet"))?;
    let (_, year) = stem.rsplit_once('_')?;
    if year.len() != 4 || !year.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    year.parse().ok()
}

/// Validates candidate model runs against a climate store.
pub struct ModelValidator<S> {
    store: Arc<S>,
    variable: String,
}

impl<S: ClimateStore + 'static> ModelValidator<S> {
    /// Create a validator for `variable` (e.g. `tas`).
    pub fn new(store: Arc<S>, variable: impl Into<String>) -> Self {
        Self {
            store,
            variable: variable.into(),
        }
    }

    /// Whether `model_path` has a directory for `scenario`.
    ///
    /// # Errors
    /// Propagates storage failures; there is no retry here.
    pub async fn scenario_available(&self, model_path: &str, scenario: Scenario) -> Result<bool> {
        self.store
            .exists(&join_path(model_path, &scenario.directory_name()))
            .await
    }

    /// Whether the store years equal exactly one of the fixed calendars.
    ///
    /// Duplicated years, gaps, surplus years and mixtures of both ranges
    /// all fail.
    #[must_use]
    pub fn has_complete_temporal_coverage<T: AsRef<str>>(stores: &[T]) -> bool {
        let mut years: Vec<i32> = stores
            .iter()
            .filter_map(|s| store_year(s.as_ref()))
            .collect();
        years.sort_unstable();

        [HISTORICAL_YEARS, FUTURE_YEARS]
            .into_iter()
            .any(|calendar| years.iter().copied().eq(calendar))
    }

    /// Per-year stores of `variable` for one model and scenario.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn list_stores(&self, model_path: &str, scenario: Scenario) -> Result<Vec<String>> {
        let prefix = join_path(model_path, &scenario.directory_name());
        let wanted = format!("{}_day_", self.variable);
        let stores = self
            .store
            .list(&prefix)
            .await?
            .into_iter()
            .filter(|path| file_name(path).starts_with(&wanted) && store_year(path).is_some())
            .collect();
        Ok(stores)
    }

    /// Validate a single model.
    ///
    /// # Errors
    /// Propagates storage failures. Validation failures are returned as
    /// `Ok(Err(rejection))`.
    pub async fn validate_model(
        &self,
        model_path: &str,
        scenario: Scenario,
    ) -> Result<std::result::Result<ModelRun, Rejection>> {
        if !self.scenario_available(model_path, scenario).await? {
            return Ok(Err(Rejection::MissingScenario));
        }

        let stores = self.list_stores(model_path, scenario).await?;
        if !Self::has_complete_temporal_coverage(&stores) {
            return Ok(Err(Rejection::IncompleteCoverage {
                stores_found: stores.len(),
            }));
        }

        Ok(Ok(ModelRun {
            name: file_name(model_path).to_string(),
            path: model_path.to_string(),
            scenario,
            stores,
        }))
    }

    /// Model directories under `root`, capped at `max_models`.
    ///
    /// # Errors
    /// Propagates storage failures.
    pub async fn list_models(&self, root: &str, max_models: Option<usize>) -> Result<Vec<String>> {
        let mut model_paths = self.store.list_dirs(root).await?;
        if let Some(cap) = max_models {
            model_paths.truncate(cap);
        }
        info!(models = model_paths.len(), root, "Discovered model directories");
        Ok(model_paths)
    }

    /// Discover models under `root` and validate them for `scenario`.
    ///
    /// # Errors
    /// See [`ModelValidator::list_models`] and [`ModelValidator::validate_models`].
    pub async fn discover(
        self: &Arc<Self>,
        root: &str,
        scenario: Scenario,
        io_concurrency: usize,
        max_models: Option<usize>,
    ) -> Result<ValidationOutcome> {
        let model_paths = self.list_models(root, max_models).await?;
        self.validate_models(model_paths, scenario, io_concurrency).await
    }

    /// Validate every model path for `scenario`, with at most
    /// `io_concurrency` models probed at once.
    ///
    /// # Errors
    /// Returns [`Error::NoEligibleModels`] when every model is skipped, or
    /// the first storage failure.
    pub async fn validate_models(
        self: &Arc<Self>,
        model_paths: Vec<String>,
        scenario: Scenario,
        io_concurrency: usize,
    ) -> Result<ValidationOutcome> {
        let permits = Arc::new(Semaphore::new(io_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for model_path in model_paths {
            let validator = Arc::clone(self);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Storage(format!("I/O pool closed: {e}")))?;
                let verdict = validator.validate_model(&model_path, scenario).await?;
                Ok::<_, Error>((model_path, verdict))
            });
        }

        let mut outcome = ValidationOutcome::default();
        while let Some(joined) = tasks.join_next().await {
            let (model_path, verdict) =
                joined.map_err(|e| Error::Storage(format!("Validation task failed: {e}")))??;
            let name = file_name(&model_path).to_string();
            match verdict {
                Ok(run) => {
                    info!(model = %name, stores = run.stores.len(), "Model validated");
                    outcome.eligible.push(run);
                }
                Err(reason) => {
                    warn!(model = %name, ?reason, "Skipping model");
                    outcome.skipped.push((name, reason));
                }
            }
        }

        outcome.eligible.sort_by(|a, b| a.name.cmp(&b.name));
        outcome.skipped.sort_by(|a, b| a.0.cmp(&b.0));

        if outcome.eligible.is_empty() {
            return Err(Error::NoEligibleModels {
                scenario: scenario.to_string(),
                skipped: outcome.skipped.len(),
            });
        }
        Ok(outcome)
    }
}
