//! History driver
//!
//! Moves one working tree through a commit list, oldest first, and collects
//! the snapshot records into a per-repository time series. A failing commit
//! never stops the walk.

use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::snapshot::{SnapshotAnalyzer, SnapshotRecord};
use crate::git::{short_hash, CommitInfo, WorkingTree};

/// Per-repository bookkeeping for the run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesTally {
    pub seen: usize,
    pub recorded: usize,
    /// Commits without any qualifying source file
    pub skipped: usize,
    pub failed: usize,
}

/// Why a commit produced no record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFailure {
    pub commit_hash: String,
    pub reason: String,
}

/// Snapshot records of one repository in the order the commits were given
#[derive(Debug, Clone, Default)]
pub struct RepositoryTimeSeries {
    pub repository: String,
    records: Vec<SnapshotRecord>,
    /// commit hash -> position in `records`
    index: HashMap<String, usize>,
    pub tally: SeriesTally,
    pub failures: Vec<CommitFailure>,
}

impl RepositoryTimeSeries {
    pub fn new(repository: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            ..Self::default()
        }
    }

    /// Add a record. A record for a commit already present replaces it in place.
    pub fn insert(&mut self, record: SnapshotRecord) {
        match self.index.get(&record.commit_hash) {
            Some(&position) => self.records[position] = record,
            None => {
                self.index.insert(record.commit_hash.clone(), self.records.len());
                self.records.push(record);
            }
        }
    }

    pub fn get(&self, commit_hash: &str) -> Option<&SnapshotRecord> {
        self.index.get(commit_hash).map(|&position| &self.records[position])
    }

    pub fn records(&self) -> &[SnapshotRecord] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &SnapshotRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Drives a snapshot analyzer over a commit list
pub struct HistoryDriver<'a> {
    analyzer: &'a mut SnapshotAnalyzer,
}

impl<'a> HistoryDriver<'a> {
    pub fn new(analyzer: &'a mut SnapshotAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Analyse every commit in order on `tree`.
    ///
    /// Each commit gets a clean tree (hard reset plus removal of untracked
    /// and ignored files) before its checkout. Reset, checkout and analysis
    /// failures are logged and counted, and the walk moves on.
    pub fn analyze_repository_history(
        &mut self,
        tree: &dyn WorkingTree,
        repository: &str,
        commits: &[CommitInfo],
    ) -> RepositoryTimeSeries {
        let mut series = RepositoryTimeSeries::new(repository);
        let total = commits.len();
        info!("{}: analysing {} commits", repository, total);

        for (index, commit) in commits.iter().enumerate() {
            series.tally.seen += 1;
            debug!("{}: [{}/{}] {}", repository, index + 1, total, commit.short_hash());

            let outcome = tree
                .reset_working_tree()
                .and_then(|_| tree.checkout(&commit.hash))
                .and_then(|_| self.analyzer.analyze(tree.root(), &commit.hash, commit.date));

            match outcome {
                Ok(Some(mut record)) => {
                    record.commit_date = commit.date;
                    series.insert(record);
                    series.tally.recorded += 1;
                }
                Ok(None) => series.tally.skipped += 1,
                Err(e) => {
                    error!("{}: commit {} failed: {}", repository, short_hash(&commit.hash), e);
                    series.tally.failed += 1;
                    series.failures.push(CommitFailure {
                        commit_hash: commit.hash.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        info!(
            "{}: {} recorded, {} without source files, {} failed",
            repository, series.tally.recorded, series.tally.skipped, series.tally.failed
        );
        series
    }
}
