//! Mining Error Types
//!
//! Errors raised while acquiring repositories, walking history, analysing
//! snapshots and persisting results. Every variant is recoverable at some
//! scope (file, snapshot or repository); only configuration errors abort a run.

use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during repository mining
#[derive(Debug, Error)]
pub enum MiningError {
    /// Repository could not be opened, cloned or walked
    #[error("Repository error: {0}")]
    Repository(String),

    /// A commit could not be checked out on the working tree
    #[error("Checkout of {commit} failed: {message}")]
    Checkout { commit: String, message: String },

    /// A single source file could not be parsed
    #[error("Failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    /// The lint engine failed or produced unreadable output
    #[error("Lint error: {0}")]
    Lint(String),

    /// A snapshot exceeded its time budget
    #[error("Snapshot analysis timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Output artifact could not be written
    #[error("Persistence error for {}: {message}", .path.display())]
    Persistence { path: PathBuf, message: String },

    /// Configuration problem
    #[error("Configuration problem: {0}\n\nCheck your configuration file or command line arguments. Run 'repo-miner --help' for usage information.")]
    Configuration(String),

    /// File system error
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON (de)serialisation error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapped errors from other sources
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MiningError {
    /// Create a repository error
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }

    /// Create a repository error for a specific path
    pub fn repository_with_path(msg: impl Into<String>, path: impl AsRef<Path>) -> Self {
        Self::Repository(format!("{} ({})", msg.into(), path.as_ref().display()))
    }

    /// Create a checkout error
    pub fn checkout(commit: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Checkout {
            commit: commit.into(),
            message: msg.into(),
        }
    }

    /// Create a parse error for a file
    pub fn parse(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Parse {
            path: path.as_ref().to_path_buf(),
            message: msg.into(),
        }
    }

    /// Create a lint error
    pub fn lint(msg: impl Into<String>) -> Self {
        Self::Lint(msg.into())
    }

    /// Create a persistence error
    pub fn persistence(path: impl AsRef<Path>, msg: impl Into<String>) -> Self {
        Self::Persistence {
            path: path.as_ref().to_path_buf(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether this error should abort the whole batch rather than one unit of work
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}

/// Result type for mining operations
pub type MiningResult<T> = Result<T, MiningError>;

impl From<std::io::Error> for MiningError {
    fn from(error: std::io::Error) -> Self {
        let msg = match error.kind() {
            std::io::ErrorKind::NotFound => format!("File or directory not found: {error}"),
            std::io::ErrorKind::PermissionDenied => format!("Permission denied: {error}"),
            std::io::ErrorKind::TimedOut => format!("Operation timed out: {error}"),
            _ => format!("File system error: {error}"),
        };
        Self::Io(msg)
    }
}

impl From<git2::Error> for MiningError {
    fn from(error: git2::Error) -> Self {
        Self::Repository(error.message().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = MiningError::repository("cannot open");
        assert!(matches!(err, MiningError::Repository(_)));

        let err = MiningError::checkout("abc123", "invalid oid");
        assert!(matches!(err, MiningError::Checkout { .. }));

        let err = MiningError::parse("src/app.py", "unexpected indent");
        assert!(matches!(err, MiningError::Parse { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = MiningError::checkout("abc123", "invalid oid");
        assert_eq!(err.to_string(), "Checkout of abc123 failed: invalid oid");

        let err = MiningError::parse("pkg/mod.py", "syntax error");
        assert!(err.to_string().contains("pkg/mod.py"));

        let err = MiningError::Timeout(Duration::from_secs(30));
        assert_eq!(err.to_string(), "Snapshot analysis timed out after 30s");
    }

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(MiningError::configuration("no repositories").is_fatal());
        assert!(!MiningError::repository("gone").is_fatal());
        assert!(!MiningError::Timeout(Duration::from_secs(1)).is_fatal());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.json");
        let err: MiningError = io.into();
        assert!(matches!(err, MiningError::Io(_)));
        assert!(err.to_string().contains("not found"));
    }
}
