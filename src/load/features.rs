//! Infrastructure geometry source
//!
//! Features of one category live in several tables (one per geometry
//! flavour, e.g. `infrastructure_point`, `infrastructure_polygon`). The
//! query unions every matching table and filters on the feature type.

use super::Identifier;
use crate::geometry::InfrastructureFeature;
use crate::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::{QueryBuilder, Sqlite};
use tracing::{info, warn};

/// Tables whose name contains `category`, sorted by name. Names that are
/// not valid identifiers are skipped.
///
/// # Errors
/// Returns error on database failure.
pub async fn category_tables(pool: &SqlitePool, category: &Identifier) -> Result<Vec<Identifier>> {
    let names: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND instr(name, ?) > 0 ORDER BY name",
    )
    .bind(category.as_str())
    .fetch_all(pool)
    .await?;

    let tables = names
        .into_iter()
        .filter_map(|name| match Identifier::new(&name) {
            Ok(table) => Some(table),
            Err(_) => {
                warn!(table = %name, "Skipping table with unsupported name");
                None
            }
        })
        .collect();
    Ok(tables)
}

/// `UNION ALL` of `(feature_id, geometry)` selects over category tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureQuery {
    tables: Vec<Identifier>,
}

impl FeatureQuery {
    /// Query over `tables`.
    #[must_use]
    pub const fn new(tables: Vec<Identifier>) -> Self {
        Self { tables }
    }

    /// Source tables.
    #[must_use]
    pub fn tables(&self) -> &[Identifier] {
        &self.tables
    }

    fn builder<'a>(&self, osm_type: &'a str) -> QueryBuilder<'a, Sqlite> {
        let mut builder = QueryBuilder::new("");
        for (i, table) in self.tables.iter().enumerate() {
            if i > 0 {
                builder.push(" UNION ALL ");
            }
            builder.push(format!(
                "SELECT main.osm_id AS feature_id, main.geom AS geometry FROM {} main WHERE main.osm_type = ",
                table.quoted()
            ));
            builder.push_bind(osm_type);
        }
        builder
    }

    /// Generated SQL with `?` placeholders, one per table.
    #[must_use]
    pub fn sql(&self) -> String {
        self.builder("").into_sql()
    }

    /// Fetch `(feature_id, WKT)` pairs of `osm_type`.
    ///
    /// # Errors
    /// Returns error on database failure.
    pub async fn fetch(&self, pool: &SqlitePool, osm_type: &str) -> Result<Vec<(i64, String)>> {
        if self.tables.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder = self.builder(osm_type);
        let rows = builder
            .build_query_as::<(i64, String)>()
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

/// Parsed features plus the number of rows whose geometry was unusable.
#[derive(Debug, Clone, Default)]
pub struct FeatureLoad {
    /// Parsed features, in query order.
    pub features: Vec<InfrastructureFeature>,
    /// Rows skipped because their WKT did not parse.
    pub invalid: usize,
}

/// Fetch and parse every feature of `osm_type` in `category`.
///
/// # Errors
/// Returns error on database failure.
pub async fn load_features(
    pool: &SqlitePool,
    category: &Identifier,
    osm_type: &str,
) -> Result<FeatureLoad> {
    let tables = category_tables(pool, category).await?;
    if tables.is_empty() {
        warn!(category = %category, "No feature tables match category");
    }
    let rows = FeatureQuery::new(tables).fetch(pool, osm_type).await?;

    let mut load = FeatureLoad::default();
    for (id, wkt) in rows {
        match InfrastructureFeature::from_wkt(id, &wkt) {
            Ok(feature) => load.features.push(feature),
            Err(e) => {
                warn!(feature_id = id, error = %e, "Skipping feature with invalid geometry");
                load.invalid += 1;
            }
        }
    }
    info!(
        category = %category,
        osm_type,
        features = load.features.len(),
        invalid = load.invalid,
        "Infrastructure features loaded"
    );
    Ok(load)
}
