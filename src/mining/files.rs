//! Source file enumeration for a checked-out snapshot

use log::{debug, warn};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Directory names never descended into
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &[
    "venv",
    ".venv",
    "env",
    ".env",
    "virtualenv",
    "build",
    "dist",
    ".git",
    "__pycache__",
    ".tox",
    ".nox",
    ".mypy_cache",
    ".pytest_cache",
    "node_modules",
    "site-packages",
    "vendor",
    "third_party",
    "third-party",
    ".eggs",
];

/// Directory name prefixes never descended into
pub const DEFAULT_IGNORE_PREFIXES: &[&str] = &[".", "_"];

/// File count above which a snapshot is logged as slow
pub const DEFAULT_LARGE_SNAPSHOT_THRESHOLD: usize = 1000;

const SOURCE_EXTENSION: &str = "py";

/// Decides which files in a working tree are analysed
#[derive(Debug, Clone)]
pub struct SourceFilter {
    excluded_dirs: HashSet<String>,
    ignore_prefixes: Vec<String>,
}

impl Default for SourceFilter {
    fn default() -> Self {
        Self::new(
            DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()),
            DEFAULT_IGNORE_PREFIXES.iter().map(|s| s.to_string()),
        )
    }
}

impl SourceFilter {
    /// Build a filter. Directory names are compared case-insensitively.
    pub fn new<D, P>(excluded_dirs: D, ignore_prefixes: P) -> Self
    where
        D: IntoIterator<Item = String>,
        P: IntoIterator<Item = String>,
    {
        Self {
            excluded_dirs: excluded_dirs.into_iter().map(|d| d.to_lowercase()).collect(),
            ignore_prefixes: ignore_prefixes.into_iter().filter(|p| !p.is_empty()).collect(),
        }
    }

    /// Whether a directory with this name is skipped entirely
    pub fn is_excluded_dir(&self, name: &str) -> bool {
        self.excluded_dirs.contains(&name.to_lowercase())
            || self.ignore_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
    }

    fn keep_entry(&self, entry: &DirEntry) -> bool {
        // The walk root itself is never filtered
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        !self.is_excluded_dir(&name)
    }

    /// List qualifying source files under `root`, sorted by path
    pub fn source_files(&self, root: &Path) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| self.keep_entry(entry))
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(DirEntry::into_path)
            .filter(|path| path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION))
            .collect();

        files.sort();
        debug!("Found {} source files under {}", files.len(), root.display());
        files
    }
}

/// Path of `path` relative to `root`, with forward slashes
pub fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
