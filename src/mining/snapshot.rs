//! Per-commit analysis of a checked-out working tree

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use super::classifier::{StatementClassifier, StatementCounts};
use super::files::{relative_path, SourceFilter, DEFAULT_LARGE_SNAPSHOT_THRESHOLD};
use super::lint::{LintReport, Linter};
use super::Deadline;
use crate::error::MiningResult;
use crate::git::short_hash;

/// Which analyses a snapshot runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisKinds {
    pub lint: bool,
    pub tests: bool,
}

impl Default for AnalysisKinds {
    fn default() -> Self {
        Self { lint: true, tests: true }
    }
}

impl AnalysisKinds {
    pub fn any(&self) -> bool {
        self.lint || self.tests
    }
}

/// Share of test statements among all counted statements.
///
/// With no statements at all the ratio is 1.0 if test framework evidence was
/// seen (for instance a `from pytest import fixture` only file) and 0.0
/// otherwise. The result is never NaN.
pub fn test_to_code_ratio(test_statements: u64, production_statements: u64, has_test_evidence: bool) -> f64 {
    let total = test_statements + production_statements;
    if total > 0 {
        test_statements as f64 / total as f64
    } else if has_test_evidence {
        1.0
    } else {
        0.0
    }
}

/// Classifier results of one snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    /// Per-file counts keyed by path relative to the working tree root
    pub files: BTreeMap<String, StatementCounts>,
    pub test_statements: u64,
    pub production_statements: u64,
    pub test_to_code_ratio: f64,
    /// Files excluded because they could not be parsed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_files: Vec<String>,
}

impl TestSummary {
    fn add_file(&mut self, relative: String, counts: StatementCounts) {
        self.test_statements += counts.test_statements;
        self.production_statements += counts.production_statements;
        self.files.insert(relative, counts);
    }

    fn finish(&mut self) {
        let has_evidence = self.files.values().any(|counts| !counts.has_no_test_evidence());
        self.test_to_code_ratio = test_to_code_ratio(self.test_statements, self.production_statements, has_evidence);
    }

    /// Union of test frameworks imported anywhere in the snapshot
    pub fn test_frameworks(&self) -> BTreeSet<String> {
        self.files
            .values()
            .flat_map(|counts| counts.test_imports.iter().cloned())
            .collect()
    }

    pub fn test_class_count(&self) -> usize {
        self.files.values().map(|counts| counts.test_classes.len()).sum()
    }

    pub fn test_function_count(&self) -> usize {
        self.files.values().map(|counts| counts.test_functions.len()).sum()
    }
}

/// Analysis result for one commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub commit_hash: String,
    pub commit_date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lint: Option<LintReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tests: Option<TestSummary>,
}

impl SnapshotRecord {
    pub fn test_to_code_ratio(&self) -> Option<f64> {
        self.tests.as_ref().map(|tests| tests.test_to_code_ratio)
    }
}

/// Settings shared by every snapshot of a run
#[derive(Clone)]
pub struct SnapshotOptions {
    pub kinds: AnalysisKinds,
    pub filter: SourceFilter,
    pub test_modules: Vec<String>,
    pub large_snapshot_threshold: usize,
    pub timeout: Option<Duration>,
    pub linter: Option<Arc<dyn Linter>>,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            kinds: AnalysisKinds::default(),
            filter: SourceFilter::default(),
            test_modules: super::DEFAULT_TEST_MODULES.iter().map(|m| m.to_string()).collect(),
            large_snapshot_threshold: DEFAULT_LARGE_SNAPSHOT_THRESHOLD,
            timeout: None,
            linter: None,
        }
    }
}

/// Produces one record per checked-out commit
pub struct SnapshotAnalyzer {
    options: SnapshotOptions,
    classifier: Option<StatementClassifier>,
}

impl SnapshotAnalyzer {
    pub fn new(options: SnapshotOptions) -> MiningResult<Self> {
        let classifier = if options.kinds.tests {
            Some(StatementClassifier::new(options.test_modules.iter().cloned())?)
        } else {
            None
        };
        if options.kinds.lint && options.linter.is_none() {
            warn!("Lint analysis requested without a linter; lint results will be absent");
        }
        Ok(Self { options, classifier })
    }

    /// Analyse the working tree at `root`, which must already be at `commit_hash`.
    ///
    /// Returns `Ok(None)` when the snapshot has no qualifying source files.
    /// Lint failures and timeouts fail the whole snapshot; unparsable files
    /// are only excluded from the statement totals.
    pub fn analyze(
        &mut self,
        root: &Path,
        commit_hash: &str,
        commit_date: DateTime<Utc>,
    ) -> MiningResult<Option<SnapshotRecord>> {
        let deadline = Deadline::starting_now(self.options.timeout);
        let files = self.options.filter.source_files(root);

        if files.is_empty() {
            info!("Commit {} has no source files, skipping", short_hash(commit_hash));
            return Ok(None);
        }
        if files.len() > self.options.large_snapshot_threshold {
            warn!(
                "Commit {} has {} source files, analysis will be slow",
                short_hash(commit_hash),
                files.len()
            );
        }
        debug!("Analysing {} files at {}", files.len(), short_hash(commit_hash));

        let lint = match (&self.options.linter, self.options.kinds.lint) {
            (Some(linter), true) => {
                let run = linter.lint(&files, root, &deadline)?;
                Some(LintReport::from_run(&run))
            }
            _ => None,
        };

        let tests = match self.classifier.as_mut() {
            Some(classifier) => {
                let mut summary = TestSummary::default();
                for path in &files {
                    deadline.check()?;
                    let relative = relative_path(root, path);
                    match classifier.classify_file(path) {
                        Ok(counts) => summary.add_file(relative, counts),
                        Err(e) => {
                            error!("Skipping {} at {}: {}", relative, short_hash(commit_hash), e);
                            summary.failed_files.push(relative);
                        }
                    }
                }
                summary.finish();
                Some(summary)
            }
            None => None,
        };

        Ok(Some(SnapshotRecord {
            commit_hash: commit_hash.to_string(),
            commit_date,
            lint,
            tests,
        }))
    }
}
