//! Mining runs and the smaller commands

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use rayon::prelude::*;
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aggregate::{self, git_report, lint_report, stargazers, test_report};
use crate::config::MiningConfig;
use crate::error::{MiningError, MiningResult};
use crate::git::{self, RepositoryHandle};
use crate::mining::{
    AnalysisKinds, GitMetricsCollector, HistoryDriver, Linter, PylintRunner, RepositoryTimeSeries, SeriesTally,
    SnapshotAnalyzer, SnapshotOptions, SourceFilter,
};
use crate::output::{LockRegistry, MergeDepth, MergeWriter, RepositoryOutcome};

/// Everything one mining run needs, shared by all worker threads
pub struct MiningRun {
    config: MiningConfig,
    repositories: Vec<String>,
    kinds: AnalysisKinds,
    git_metrics: bool,
    linter: Option<Arc<dyn Linter>>,
    writer: MergeWriter,
    /// One lock per local copy; a working tree is driven by one worker at a time
    working_trees: LockRegistry,
}

impl MiningRun {
    /// A run with every analysis enabled and pylint as the linter
    pub fn new(config: MiningConfig, repositories: Vec<String>, run_directory: impl Into<PathBuf>) -> Self {
        let linter: Arc<dyn Linter> = Arc::new(PylintRunner::new(
            config.pylint_command.clone(),
            config.pylint_rcfile.clone(),
        ));
        Self {
            config,
            repositories,
            kinds: AnalysisKinds::default(),
            git_metrics: true,
            linter: Some(linter),
            writer: MergeWriter::new(run_directory, Arc::new(LockRegistry::new())),
            working_trees: LockRegistry::new(),
        }
    }

    pub fn with_kinds(mut self, kinds: AnalysisKinds) -> Self {
        self.kinds = kinds;
        self
    }

    pub fn with_git_metrics(mut self, enabled: bool) -> Self {
        self.git_metrics = enabled;
        self
    }

    pub fn with_linter(mut self, linter: Arc<dyn Linter>) -> Self {
        self.linter = Some(linter);
        self
    }

    pub fn writer(&self) -> &MergeWriter {
        &self.writer
    }

    fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions {
            kinds: self.kinds,
            filter: SourceFilter::new(
                self.config.exclude_dirs.iter().cloned(),
                self.config.ignore_prefixes.iter().cloned(),
            ),
            test_modules: self.config.test_modules.clone(),
            large_snapshot_threshold: self.config.large_snapshot_threshold,
            timeout: self.config.snapshot_timeout,
            linter: self.linter.clone(),
        }
    }
}

/// Mine every repository of the run, chunk by chunk.
///
/// Chunks run one after another. Inside a chunk repositories run on a pool
/// of `max_workers` threads when `parallel` is set. A repository that fails
/// is reported in the returned outcomes and the others carry on.
pub fn run_mining(run: &MiningRun) -> Result<Vec<RepositoryOutcome>> {
    if run.repositories.is_empty() {
        error!("No repositories to mine");
        return Err(MiningError::configuration("No repositories to mine").into());
    }

    fs::create_dir_all(run.writer.directory())
        .with_context(|| format!("Failed to create output directory {}", run.writer.directory().display()))?;
    info!(
        "Mining {} repositories into {}",
        run.repositories.len(),
        run.writer.directory().display()
    );

    let mut keys = HashSet::new();
    for source in &run.repositories {
        if !keys.insert(git::repository_key(source)) {
            warn!("{} is listed more than once, its runs will share one local copy", source);
        }
    }

    let pool = if run.config.parallel {
        Some(
            rayon::ThreadPoolBuilder::new()
                .num_threads(run.config.max_workers)
                .thread_name(|index| format!("miner-{}", index))
                .build()
                .context("Failed to build worker pool")?,
        )
    } else {
        None
    };

    let chunk_count = run.repositories.len().div_ceil(run.config.chunk_size);
    let mut outcomes = Vec::with_capacity(run.repositories.len());

    for (index, chunk) in run.repositories.chunks(run.config.chunk_size).enumerate() {
        info!("Chunk {}/{}: {} repositories", index + 1, chunk_count, chunk.len());

        let chunk_outcomes: Vec<(RepositoryOutcome, Option<PathBuf>)> = match &pool {
            Some(pool) => pool.install(|| chunk.par_iter().map(|source| mine_repository(run, source)).collect()),
            None => chunk.iter().map(|source| mine_repository(run, source)).collect(),
        };

        for (outcome, local_copy) in chunk_outcomes {
            if !run.config.persist_repos {
                if let Some(path) = local_copy {
                    if let Err(e) = git::remove_local_copy(&path) {
                        warn!("Failed to remove {}: {}", path.display(), e);
                    }
                }
            }
            outcomes.push(outcome);
        }
    }

    Ok(outcomes)
}

/// Run the whole pipeline for one repository.
///
/// Also returns the local copy, which a non-persistent run deletes after
/// the chunk.
fn mine_repository(run: &MiningRun, source: &str) -> (RepositoryOutcome, Option<PathBuf>) {
    let name = git::repository_key(source);
    let target = match git::local_copy_path(&run.config.repositories_dir, source) {
        Ok(path) => path,
        Err(e) => {
            error!("{}: skipping repository: {}", source, e);
            return (RepositoryOutcome::failed(name, e.to_string()), None);
        }
    };

    let tree_lock = run.working_trees.lock_for(&target);
    let _tree_guard = tree_lock.lock();

    let local_copy = match git::ensure_local_copy(&run.config.repositories_dir, source) {
        Ok(path) => path,
        Err(e) => {
            error!("{}: skipping repository: {}", name, e);
            return (RepositoryOutcome::failed(name, e.to_string()), None);
        }
    };

    let outcome = match mine_local_copy(run, &name, source, &local_copy) {
        Ok(tally) => {
            info!(
                "{}: {} commits, {} recorded, {} skipped, {} failed",
                name, tally.seen, tally.recorded, tally.skipped, tally.failed
            );
            RepositoryOutcome::completed(name, tally)
        }
        Err(e) => {
            error!("{}: {}", name, e);
            RepositoryOutcome::failed(name, e.to_string())
        }
    };
    (outcome, Some(local_copy))
}

fn mine_local_copy(run: &MiningRun, name: &str, source: &str, local_copy: &Path) -> MiningResult<SeriesTally> {
    let handle = RepositoryHandle::open(local_copy)?;
    let commits = handle.list_commits(run.config.max_commits)?;

    let mut tally = SeriesTally {
        seen: commits.len(),
        ..SeriesTally::default()
    };

    if run.kinds.any() {
        let original_head = handle.head_reference()?;
        let mut analyzer = SnapshotAnalyzer::new(run.snapshot_options())?;
        let series = HistoryDriver::new(&mut analyzer).analyze_repository_history(&handle, name, &commits);

        if let Some(reference) = original_head {
            if let Err(e) = handle.restore_head(&reference) {
                warn!("{}: could not restore {}: {}", name, reference, e);
            }
        }

        write_series(&run.writer, &series)?;
        tally = series.tally;
    }

    if run.git_metrics {
        let metrics = GitMetricsCollector::new(handle.repository()).collect(&commits)?;
        let url = git::sanitize_url(source);
        run.writer.merge_json(
            git_report::GIT_RAW_FILE,
            git_report::git_raw_batch(name, &url, &metrics)?,
            MergeDepth::TopLevel,
        )?;
        run.writer.merge_table(
            git_report::GIT_FLAT_CSV_FILE,
            vec![git_report::git_flat_row(name, &url, &metrics)?],
            git_report::GIT_FLAT_KEYS,
        )?;
    }

    Ok(tally)
}

/// Persist the lint and test artifacts of one series
pub fn write_series(writer: &MergeWriter, series: &RepositoryTimeSeries) -> MiningResult<()> {
    let report = aggregate::aggregate(series);
    let has_tests = series.iter().any(|record| record.tests.is_some());
    let has_lint = series.iter().any(|record| record.lint.is_some());

    if has_tests {
        writer.merge_json(test_report::TEST_RAW_FILE, test_report::test_raw_batch(series)?, MergeDepth::Nested)?;
        writer.merge_json(
            test_report::TEST_OVER_TIME_JSON_FILE,
            test_report::test_over_time_batch(&report),
            MergeDepth::Nested,
        )?;
        writer.merge_table(
            test_report::TEST_OVER_TIME_CSV_FILE,
            test_report::test_over_time_rows(&report),
            test_report::TEST_OVER_TIME_KEYS,
        )?;
    }

    if has_lint {
        writer.merge_json(lint_report::LINT_RAW_FILE, lint_report::lint_raw_batch(series)?, MergeDepth::Nested)?;
        writer.merge_json(
            lint_report::LINT_FLAT_JSON_FILE,
            lint_report::lint_flat_batch(series),
            MergeDepth::Nested,
        )?;
        writer.merge_table(
            lint_report::LINT_FLAT_CSV_FILE,
            lint_report::lint_flat_rows(series),
            lint_report::LINT_FLAT_KEYS,
        )?;
    }

    if !(has_tests || has_lint) {
        debug!("{}: no snapshot records to write", series.repository);
    }
    Ok(())
}

/// Clone (or find) every repository without analysing it
pub fn run_clone(repositories_dir: &Path, repositories: &[String]) -> Result<Vec<PathBuf>> {
    if repositories.is_empty() {
        return Err(MiningError::configuration("No repositories to clone").into());
    }

    let mut cloned = Vec::new();
    for source in repositories {
        match git::ensure_local_copy(repositories_dir, source) {
            Ok(path) => cloned.push(path),
            Err(e) => error!("{}: {}", git::repository_key(source), e),
        }
    }
    info!("{} of {} repositories available locally", cloned.len(), repositories.len());
    Ok(cloned)
}

/// Clean a raw stargazer dump and merge it into the artifacts in `output_dir`.
///
/// The over-time history is rebuilt from the whole merged clean store, so
/// counts carried forward stay complete for repositories of earlier dumps.
pub fn run_stargazers(input: &Path, output_dir: &Path) -> Result<usize> {
    let content = fs::read_to_string(input)
        .with_context(|| format!("Failed to read stargazer dump: {}", input.display()))?;
    let raw: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Stargazer dump is not a JSON object: {}", input.display()))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory {}", output_dir.display()))?;
    let writer = MergeWriter::new(output_dir, Arc::new(LockRegistry::new()));

    let cleaned = stargazers::clean(&raw);
    let cleaned_batch = match serde_json::to_value(&cleaned)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    writer.merge_json(stargazers::STARGAZERS_CLEAN_FILE, cleaned_batch, MergeDepth::Nested)?;

    let merged: stargazers::CleanStargazers =
        serde_json::from_value(Value::Object(writer.load_json(stargazers::STARGAZERS_CLEAN_FILE)))
            .context("Merged stargazer store is not a repository -> user -> timestamp map")?;

    let stars = stargazers::over_time(&merged);
    let stars_batch = match serde_json::to_value(&stars)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    writer.merge_json(stargazers::STARGAZERS_OVER_TIME_JSON_FILE, stars_batch, MergeDepth::Nested)?;
    writer.merge_table(
        stargazers::STARGAZERS_OVER_TIME_CSV_FILE,
        stargazers::over_time_rows(&stars),
        stargazers::STARGAZERS_KEYS,
    )?;

    info!(
        "{} repositories in this dump, {} in total, {} days of stargazer history",
        cleaned.len(),
        merged.len(),
        stars.len()
    );
    Ok(cleaned.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_repository_list_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let run = MiningRun::new(MiningConfig::default(), Vec::new(), temp_dir.path());
        let err = run_mining(&run).unwrap_err();
        let mining_error = err.downcast_ref::<MiningError>().unwrap();
        assert!(mining_error.is_fatal());
    }

    #[test]
    fn test_unknown_repository_is_reported_not_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let config = MiningConfig {
            repositories_dir: temp_dir.path().join("repos"),
            ..MiningConfig::default()
        };
        let run = MiningRun::new(
            config,
            vec![temp_dir.path().join("missing.git").to_string_lossy().to_string()],
            temp_dir.path().join("out"),
        );

        let outcomes = run_mining(&run).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(matches!(outcomes[0].status, crate::output::RepositoryStatus::Failed(_)));
    }

    #[test]
    fn test_stargazers_command_writes_artifacts() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("raw.json");
        fs::write(
            &input,
            r#"{"demo": {"data": {"repository": {"stargazers": {"edges": [
                {"starredAt": "2024-01-02T00:00:00Z", "node": {"login": "a"}}
            ]}}}}}"#,
        )
        .unwrap();

        let out = temp_dir.path().join("out");
        assert_eq!(run_stargazers(&input, &out).unwrap(), 1);
        let csv = fs::read_to_string(out.join(stargazers::STARGAZERS_OVER_TIME_CSV_FILE)).unwrap();
        assert_eq!(csv, "date,demo\n2024-01-02,1\n");
        assert!(out.join(stargazers::STARGAZERS_CLEAN_FILE).exists());
    }

    #[test]
    fn test_stargazers_rejects_non_object() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("raw.json");
        fs::write(&input, "[1, 2]").unwrap();
        assert!(run_stargazers(&input, temp_dir.path()).is_err());
    }
}
