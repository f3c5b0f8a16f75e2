//! Commit-driven history mining
//!
//! `files` picks the source files of a snapshot, `classifier` and `lint`
//! analyse them, `snapshot` combines both into one record per commit,
//! `history` drives snapshots across a commit list and `git_metrics`
//! computes process metrics straight from the object database.

pub mod classifier;
pub mod files;
pub mod git_metrics;
pub mod history;
pub mod lint;
pub mod snapshot;

use std::time::{Duration, Instant};

use crate::error::{MiningError, MiningResult};

pub use classifier::{StatementClassifier, StatementCounts, DEFAULT_TEST_MODULES};
pub use files::SourceFilter;
pub use git_metrics::{GitMetrics, GitMetricsCollector};
pub use history::{CommitFailure, HistoryDriver, RepositoryTimeSeries, SeriesTally};
pub use lint::{LintReport, Linter, PylintRunner};
pub use snapshot::{AnalysisKinds, SnapshotAnalyzer, SnapshotOptions, SnapshotRecord, TestSummary};

/// Time budget for one snapshot
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Deadline {
    /// Start a deadline now; `None` never expires
    pub fn starting_now(budget: Option<Duration>) -> Self {
        Self {
            budget,
            expires_at: budget.map(|b| Instant::now() + b),
        }
    }

    pub fn unlimited() -> Self {
        Self::starting_now(None)
    }

    /// Time left, or `None` when unlimited
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }

    /// The error to report when the deadline has passed
    pub fn timeout_error(&self) -> MiningError {
        MiningError::Timeout(self.budget.unwrap_or_default())
    }

    pub fn check(&self) -> MiningResult<()> {
        if self.is_expired() {
            Err(self.timeout_error())
        } else {
            Ok(())
        }
    }
}
