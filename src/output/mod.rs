//! Persisted results
//!
//! All artifacts of a run live in one directory. Writes go through
//! [`MergeWriter`], which merges each batch into whatever the file already
//! holds while holding that file's lock from the shared [`LockRegistry`].

pub mod json_store;
pub mod locks;
pub mod summary;
pub mod table;

use chrono::{DateTime, Local};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::MiningResult;

pub use json_store::MergeDepth;
pub use locks::LockRegistry;
pub use summary::{format_run_summary, RepositoryOutcome, RepositoryStatus};
pub use table::{Cell, TableRow};

/// Name of a timestamped run directory, e.g. `2024-05-01_14-30`
pub fn run_directory_name(now: &DateTime<Local>) -> String {
    now.format("%Y-%m-%d_%H-%M").to_string()
}

/// Writes artifacts into one run directory
#[derive(Debug, Clone)]
pub struct MergeWriter {
    directory: PathBuf,
    registry: Arc<LockRegistry>,
}

impl MergeWriter {
    pub fn new(directory: impl Into<PathBuf>, registry: Arc<LockRegistry>) -> Self {
        Self {
            directory: directory.into(),
            registry,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Full path of an artifact
    pub fn path(&self, file_name: &str) -> PathBuf {
        self.directory.join(file_name)
    }

    /// Merge a `repository -> ...` batch into a JSON artifact
    pub fn merge_json(&self, file_name: &str, batch: Map<String, Value>, depth: MergeDepth) -> MiningResult<()> {
        json_store::merge_json(&self.registry, &self.path(file_name), batch, depth)
    }

    /// Current content of a JSON artifact, read under its lock
    pub fn load_json(&self, file_name: &str) -> Map<String, Value> {
        let path = self.path(file_name);
        self.registry.with_lock(&path, || json_store::load_object(&path))
    }

    /// Merge rows into a CSV artifact keyed by `key_fields`
    pub fn merge_table(&self, file_name: &str, rows: Vec<TableRow>, key_fields: &[&str]) -> MiningResult<()> {
        table::merge_csv(&self.registry, &self.path(file_name), rows, key_fields)
    }
}
