//! Commit-history mining for Python repositories.
//!
//! Every commit of a repository is checked out in turn; its Python sources
//! are linted and classified into test and production statements, and the
//! per-commit records are merged into JSON and CSV artifacts that tolerate
//! reruns.

pub mod aggregate;
pub mod app;
pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod logging;
pub mod mining;
pub mod output;

pub use error::{MiningError, MiningResult};
