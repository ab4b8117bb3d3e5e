//! Transactional bulk load into the fact store
//!
//! One transaction per batch:
//!
//! 1. Register the variable/scenario provenance (first writer wins).
//! 2. Create a uniquely named temporary staging table.
//! 3. Append the batch to staging with multi-row inserts.
//! 4. Merge staging into the fact table, skipping existing natural keys.
//! 5. Drop the staging table and commit.
//!
//! Any failure drops the transaction, which rolls every step back: no
//! staging table survives and no partial fact rows are written.
//!
//! Table and column names never come from unvalidated strings: tables are
//! [`Identifier`]s and columns are the closed [`FactColumn`] set. All values
//! are bound parameters.

pub mod features;

pub use features::{category_tables, load_features, FeatureLoad, FeatureQuery};

use crate::climate::{Scenario, Statistic, STATISTIC_COUNT};
use crate::exposure::{DECADE_COLUMN, FEATURE_ID_COLUMN, METADATA_COLUMN, MONTH_COLUMN, SSP_COLUMN};
use crate::{Error, Result};
use arrow::array::{Array, Float64Array, Int32Array, Int64Array, RecordBatch, StringArray};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Registry of loaded variables, keyed by `(variable, ssp)`.
pub const VARIABLE_REGISTRY_TABLE: &str = "climate_variables";

/// Longest accepted identifier.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Rows per staging insert statement (12 binds per row stays under
/// SQLite's 32766 parameter limit).
pub const STAGING_CHUNK_ROWS: usize = 2000;

/// A validated SQL identifier: `[a-z_][a-z0-9_]*`, at most
/// [`MAX_IDENTIFIER_LEN`] characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Identifier(String);

impl Identifier {
    /// Validate `name`.
    ///
    /// # Errors
    /// Returns [`Error::InvalidIdentifier`] if `name` is empty, too long or
    /// contains characters outside `[a-z0-9_]`, or starts with a digit.
    pub fn new(name: &str) -> Result<Self> {
        let mut chars = name.chars();
        let valid_start = chars
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_');
        let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
        if !valid_start || !valid_rest || name.len() > MAX_IDENTIFIER_LEN {
            return Err(Error::InvalidIdentifier(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    /// Raw name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Double-quoted form for interpolation into SQL.
    #[must_use]
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0)
    }

    /// Fact table of a climate variable: `exposure_{variable}`.
    ///
    /// # Errors
    /// Returns error if the derived name is not a valid identifier.
    pub fn fact_table(variable: &str) -> Result<Self> {
        Self::new(&format!("exposure_{variable}"))
    }

    /// Unique staging table name for one load.
    #[must_use]
    pub fn staging(variable: &Self) -> Self {
        let prefix: String = variable.0.chars().take(20).collect();
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("staging_{prefix}_{stamp}_{}", &suffix[..12]))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Identifier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// Columns of the fact table (and of staging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactColumn {
    /// `feature_id`
    FeatureId,
    /// `month`
    Month,
    /// `decade`
    Decade,
    /// `ssp`
    Ssp,
    /// `value_*`
    Value(Statistic),
    /// `metadata`
    Metadata,
}

impl FactColumn {
    /// Every column in storage order.
    #[must_use]
    pub fn all() -> Vec<Self> {
        let mut columns = vec![Self::FeatureId, Self::Month, Self::Decade, Self::Ssp];
        columns.extend(Statistic::ALL.map(Self::Value));
        columns.push(Self::Metadata);
        columns
    }

    /// Column name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::FeatureId => FEATURE_ID_COLUMN,
            Self::Month => MONTH_COLUMN,
            Self::Decade => DECADE_COLUMN,
            Self::Ssp => SSP_COLUMN,
            Self::Value(stat) => stat.column_name(),
            Self::Metadata => METADATA_COLUMN,
        }
    }

    /// SQLite column type.
    #[must_use]
    pub const fn sql_type(self) -> &'static str {
        match self {
            Self::FeatureId | Self::Month | Self::Decade => "INTEGER",
            Self::Ssp | Self::Metadata => "TEXT",
            Self::Value(_) => "REAL",
        }
    }
}

fn column_list() -> String {
    FactColumn::all()
        .iter()
        .map(|c| c.name())
        .collect::<Vec<_>>()
        .join(", ")
}

fn column_definitions() -> String {
    FactColumn::all()
        .iter()
        .map(|c| format!("{} {} NOT NULL", c.name(), c.sql_type()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// `CREATE TABLE IF NOT EXISTS` for a fact table.
#[must_use]
pub fn create_fact_table_sql(table: &Identifier) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({FEATURE_ID_COLUMN}, {MONTH_COLUMN}, {DECADE_COLUMN}, {SSP_COLUMN}))",
        table.quoted(),
        column_definitions()
    )
}

/// `CREATE TABLE IF NOT EXISTS` for the variable registry.
#[must_use]
pub fn create_registry_sql() -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {VARIABLE_REGISTRY_TABLE} (\
         variable TEXT NOT NULL, ssp TEXT NOT NULL, metadata TEXT NOT NULL, \
         PRIMARY KEY (variable, ssp))"
    )
}

/// `CREATE TEMP TABLE` mirroring the fact leaf columns.
#[must_use]
pub fn create_staging_sql(staging: &Identifier) -> String {
    format!("CREATE TEMP TABLE {} ({})", staging.quoted(), column_definitions())
}

/// Insert-select from staging that skips existing natural keys.
#[must_use]
pub fn merge_sql(fact: &Identifier, staging: &Identifier) -> String {
    let columns = column_list();
    // `WHERE true` disambiguates the upsert clause from a join constraint
    format!(
        "INSERT INTO {} ({columns}) SELECT {columns} FROM {} WHERE true \
         ON CONFLICT ({FEATURE_ID_COLUMN}, {MONTH_COLUMN}, {DECADE_COLUMN}, {SSP_COLUMN}) DO NOTHING",
        fact.quoted(),
        staging.quoted()
    )
}

/// Open a bounded SQLite pool, creating the database file if needed.
///
/// # Errors
/// Returns error if the URL is invalid or the database cannot be opened.
pub async fn connect_pool(url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections.max(1))
        .connect_with(options)
        .await?;
    info!(url, max_connections, "Connected to fact store");
    Ok(pool)
}

/// Outcome of one bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    /// Rows appended to staging.
    pub staged: u64,
    /// Rows merged into the fact table.
    pub inserted: u64,
    /// Rows skipped because their natural key already existed.
    pub skipped: u64,
    /// Name of the (dropped) staging table.
    pub staging_table: String,
}

/// Columns of an exposure batch, downcast once.
struct ExposureColumns<'a> {
    feature_id: &'a Int64Array,
    month: &'a Int32Array,
    decade: &'a Int32Array,
    ssp: &'a StringArray,
    values: Vec<&'a Float64Array>,
    metadata: &'a StringArray,
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    let array = batch
        .column_by_name(name)
        .ok_or_else(|| Error::InvalidInput(format!("Exposure batch has no column {name:?}")))?;
    if array.null_count() > 0 {
        return Err(Error::InvalidInput(format!(
            "Exposure column {name:?} contains nulls"
        )));
    }
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| Error::InvalidInput(format!("Exposure column {name:?} has the wrong type")))
}

impl<'a> ExposureColumns<'a> {
    fn new(batch: &'a RecordBatch) -> Result<Self> {
        let values = Statistic::ALL
            .iter()
            .map(|s| column::<Float64Array>(batch, s.column_name()))
            .collect::<Result<Vec<_>>>()?;
        debug_assert_eq!(values.len(), STATISTIC_COUNT);
        Ok(Self {
            feature_id: column(batch, FEATURE_ID_COLUMN)?,
            month: column(batch, MONTH_COLUMN)?,
            decade: column(batch, DECADE_COLUMN)?,
            ssp: column(batch, SSP_COLUMN)?,
            values,
            metadata: column(batch, METADATA_COLUMN)?,
        })
    }
}

/// Persists exposure batches.
#[derive(Debug, Clone)]
pub struct BulkLoader {
    pool: SqlitePool,
}

impl BulkLoader {
    /// Loader over a shared pool.
    #[must_use]
    pub const fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the registry and fact table if missing.
    ///
    /// # Errors
    /// Returns error on database failure.
    pub async fn ensure_schema(&self, fact: &Identifier) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        sqlx::query(&create_registry_sql()).execute(&mut *conn).await?;
        sqlx::query(&create_fact_table_sql(fact)).execute(&mut *conn).await?;
        debug!(table = %fact, "Fact schema ready");
        Ok(())
    }

    /// Load one batch in a single transaction.
    ///
    /// # Errors
    /// Returns error if the batch does not have the exposure layout or any
    /// database step fails; the transaction is rolled back.
    pub async fn load(
        &self,
        fact: &Identifier,
        batch: &RecordBatch,
        variable: &Identifier,
        scenario: Scenario,
        metadata_json: &str,
    ) -> Result<LoadReport> {
        let columns = ExposureColumns::new(batch)?;
        let staging = Identifier::staging(variable);

        let mut tx = self.pool.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO {VARIABLE_REGISTRY_TABLE} (variable, ssp, metadata) VALUES (?, ?, ?) \
             ON CONFLICT DO NOTHING"
        ))
        .bind(variable.as_str())
        .bind(scenario.key())
        .bind(metadata_json)
        .execute(&mut *tx)
        .await?;
        debug!(variable = %variable, ssp = %scenario, "Variable registered");

        sqlx::query(&create_staging_sql(&staging)).execute(&mut *tx).await?;

        let mut staged = 0u64;
        let insert_head = format!("INSERT INTO {} ({}) ", staging.quoted(), column_list());
        for start in (0..batch.num_rows()).step_by(STAGING_CHUNK_ROWS) {
            let end = (start + STAGING_CHUNK_ROWS).min(batch.num_rows());
            let mut builder: QueryBuilder<'_, Sqlite> = QueryBuilder::new(&insert_head);
            builder.push_values(start..end, |mut row, i| {
                row.push_bind(columns.feature_id.value(i))
                    .push_bind(columns.month.value(i))
                    .push_bind(columns.decade.value(i))
                    .push_bind(columns.ssp.value(i).to_string());
                for values in &columns.values {
                    row.push_bind(values.value(i));
                }
                row.push_bind(columns.metadata.value(i).to_string());
            });
            staged += builder.build().execute(&mut *tx).await?.rows_affected();
        }
        debug!(staging = %staging, rows = staged, "Staging table loaded");

        let inserted = sqlx::query(&merge_sql(fact, &staging))
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(&format!("DROP TABLE {}", staging.quoted()))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        let report = LoadReport {
            staged,
            inserted,
            skipped: staged - inserted,
            staging_table: staging.to_string(),
        };
        info!(
            table = %fact,
            staged = report.staged,
            inserted = report.inserted,
            skipped = report.skipped,
            "Bulk load committed"
        );
        Ok(report)
    }
}
