//! Filesystem-backed climate store reading per-year Parquet files.

use super::ClimateStore;
use crate::{Error, Result};
use arrow::record_batch::RecordBatch;
use std::path::{Path, PathBuf};

/// Climate store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct LocalClimateStore {
    root: PathBuf,
}

impl LocalClimateStore {
    /// Create a store rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            self.root.clone()
        } else {
            self.root.join(trimmed)
        }
    }

    fn relative(&self, path: &Path) -> Result<String> {
        let rel = path.strip_prefix(&self.root).map_err(|e| {
            Error::Storage(format!("Path {} escapes store root: {e}", path.display()))
        })?;
        Ok(rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"))
    }

    /// Write batches to `path` as a Parquet file, creating parent directories.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or encoded.
    pub fn write_batches(&self, path: &str, batches: &[RecordBatch]) -> Result<()> {
        use parquet::arrow::ArrowWriter;
        use std::fs::{self, File};

        let first = batches
            .first()
            .ok_or_else(|| Error::InvalidInput(format!("No batches to write to {path}")))?;
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = File::create(&target)?;
        let mut writer = ArrowWriter::try_new(file, first.schema(), None)?;
        for batch in batches {
            writer.write(batch)?;
        }
        writer.close()?;
        Ok(())
    }

    fn walk(&self, dir: &Path, out: &mut Vec<String>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                self.walk(&path, out)?;
            } else {
                out.push(self.relative(&path)?);
            }
        }
        Ok(())
    }
}

fn load_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
    use std::fs::File;

    let file = File::open(path).map_err(|e| {
        Error::Storage(format!("Failed to open store {}: {e}", path.display()))
    })?;

    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| Error::Storage(format!("Failed to parse store {}: {e}", path.display())))?
        .build()
        .map_err(|e| {
            Error::Storage(format!("Failed to create reader for {}: {e}", path.display()))
        })?;

    let mut batches = Vec::new();
    for batch in reader {
        batches.push(batch.map_err(|e| {
            Error::Storage(format!("Failed to read batch from {}: {e}", path.display()))
        })?);
    }
    Ok(batches)
}

impl ClimateStore for LocalClimateStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(path)).await?)
    }

    async fn list_dirs(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = self.resolve(prefix);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                dirs.push(self.relative(&entry.path())?);
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let store = self.clone();
        let dir = self.resolve(prefix);
        tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            if dir.is_dir() {
                store.walk(&dir, &mut out)?;
            }
            out.sort();
            Ok(out)
        })
        .await
        .map_err(|e| Error::Storage(format!("Listing task failed: {e}")))?
    }

    async fn read_batches(&self, path: &str) -> Result<Vec<RecordBatch>> {
        let target = self.resolve(path);
        tokio::task::spawn_blocking(move || load_parquet(&target))
            .await
            .map_err(|e| Error::Storage(format!("Read task failed: {e}")))?
    }
}
