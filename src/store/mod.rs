//! Climate object-store collaborator
//!
//! Model runs live under a root as
//! `{model}/{scenario}/{year}/{variable}_day_{year}.parquet`. The pipeline
//! only probes (`exists`, `list_dirs`, `list`) and reads per-year stores;
//! retries against the backing store are the collaborator's concern.
//!
//! Per-year stores are Arrow batches with the [`sample_schema`] columns:
//!
//! | column  | type      | nullable |
//! |---------|-----------|----------|
//! | `time`  | `Date32`  | no       |
//! | `y`     | `Float64` | no       |
//! | `x`     | `Float64` | no       |
//! | `value` | `Float64` | yes      |

mod local;
mod memory;

pub use local::LocalClimateStore;
pub use memory::MemoryClimateStore;

use crate::Result;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use std::future::Future;
use std::sync::Arc;

/// Sample timestamp column.
pub const TIME_COLUMN: &str = "time";
/// Cell-center y coordinate column.
pub const Y_COLUMN: &str = "y";
/// Cell-center x coordinate column.
pub const X_COLUMN: &str = "x";
/// Climate variable value column.
pub const VALUE_COLUMN: &str = "value";

/// Schema of one per-year climate store.
#[must_use]
pub fn sample_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(TIME_COLUMN, DataType::Date32, false),
        Field::new(Y_COLUMN, DataType::Float64, false),
        Field::new(X_COLUMN, DataType::Float64, false),
        Field::new(VALUE_COLUMN, DataType::Float64, true),
    ]))
}

/// Join store path segments with `/`, ignoring empty segments.
#[must_use]
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (_, true) => base.to_string(),
        _ => format!("{base}/{child}"),
    }
}

/// Last path segment (`a/b/c` -> `c`).
#[must_use]
pub fn file_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

/// Read/list access to per-model per-year climate stores.
///
/// Paths are `/`-separated and relative to the store root.
pub trait ClimateStore: Send + Sync {
    /// Whether an object or directory exists at `path`.
    fn exists(&self, path: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Immediate child directories of `prefix`, as full paths, sorted.
    fn list_dirs(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Every object below `prefix` (recursive), as full paths, sorted.
    fn list(&self, prefix: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Read one per-year store into record batches.
    fn read_batches(&self, path: &str) -> impl Future<Output = Result<Vec<RecordBatch>>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("root/", "/model"), "root/model");
        assert_eq!(join_path("", "model"), "model");
        assert_eq!(join_path("root", ""), "root");
    }

    #[test]
    fn test_file_name() {
        assert_eq!(file_name("a/b/tas_day_2015.parquet"), "tas_day_2015.parquet");
        assert_eq!(file_name("model/"), "model");
    }
}
