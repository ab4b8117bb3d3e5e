//! In-memory climate store using `DashMap`.
//!
//! Objects are kept as decoded record batches keyed by path. Directories
//! are implied by key prefixes, as in an object store.

use super::ClimateStore;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use dashmap::DashMap;
use std::collections::BTreeSet;

/// In-memory climate store.
///
/// # Example
///
/// ```rust
/// use infraclimate::store::{ClimateStore, MemoryClimateStore};
///
/// # async fn example() -> infraclimate::Result<()> {
/// let store = MemoryClimateStore::new();
/// store.insert("cesm2/ssp585/2015/tas_day_2015.parquet", vec![]);
/// assert!(store.exists("cesm2/ssp585").await?);
/// assert_eq!(store.list_dirs("").await?, vec!["cesm2".to_string()]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct MemoryClimateStore {
    objects: DashMap<String, Vec<RecordBatch>>,
}

impl MemoryClimateStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an object at `path`, replacing any previous object.
    pub fn insert(&self, path: impl Into<String>, batches: Vec<RecordBatch>) {
        self.objects.insert(path.into(), batches);
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn keys_under(&self, prefix: &str) -> Vec<String> {
        let prefix = prefix.trim_end_matches('/');
        self.objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| prefix.is_empty() || key.starts_with(&format!("{prefix}/")))
            .collect()
    }
}

impl ClimateStore for MemoryClimateStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = path.trim_end_matches('/');
        if self.objects.contains_key(path) {
            return Ok(true);
        }
        Ok(!path.is_empty() && !self.keys_under(path).is_empty())
    }

    async fn list_dirs(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix = prefix.trim_end_matches('/');
        let skip = if prefix.is_empty() { 0 } else { prefix.len() + 1 };
        let dirs: BTreeSet<String> = self
            .keys_under(prefix)
            .into_iter()
            .filter_map(|key| {
                let rest = &key[skip..];
                rest.split_once('/')
                    .map(|(dir, _)| super::join_path(prefix, dir))
            })
            .collect();
        Ok(dirs.into_iter().collect())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys = self.keys_under(prefix);
        keys.sort();
        Ok(keys)
    }

    async fn read_batches(&self, path: &str) -> Result<Vec<RecordBatch>> {
        self.objects
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::Storage(format!("Object not found: {path}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated() -> MemoryClimateStore {
        let store = MemoryClimateStore::new();
        store.insert("m1/ssp585/2015/tas_day_2015.parquet", vec![]);
        store.insert("m1/historical/1950/tas_day_1950.parquet", vec![]);
        store.insert("m2/ssp245/2015/tas_day_2015.parquet", vec![]);
        store
    }

    #[tokio::test]
    async fn test_exists_directory_prefix() {
        let store = populated();
        assert!(store.exists("m1/ssp585").await.unwrap());
        assert!(store.exists("m1/historical/").await.unwrap());
        assert!(!store.exists("m1/ssp245").await.unwrap());
        // Prefix must end on a segment boundary
        assert!(!store.exists("m1/ssp58").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_dirs() {
        let store = populated();
        assert_eq!(store.list_dirs("").await.unwrap(), vec!["m1", "m2"]);
        assert_eq!(
            store.list_dirs("m1").await.unwrap(),
            vec!["m1/historical", "m1/ssp585"]
        );
    }

    #[tokio::test]
    async fn test_list_recursive_sorted() {
        let store = populated();
        let keys = store.list("m1").await.unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys[0] < keys[1]);
    }

    #[tokio::test]
    async fn test_read_missing_object() {
        let store = MemoryClimateStore::new();
        let err = store.read_batches("nope").await.unwrap_err();
        assert!(err.to_string().contains("Object not found"));
    }
}
