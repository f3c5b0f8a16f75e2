//! Process metrics computed from commit diffs
//!
//! Needs no checkout: every commit is diffed against its first parent (or
//! the empty tree for a root commit) straight from the object database.
//! Merge commits count as commits but contribute no file changes. Renames
//! are detected, so a renamed file is one change and keeps its history.

use git2::{Delta, Diff, DiffFindOptions, DiffOptions, Oid, Patch, Repository};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::error::MiningResult;
use crate::git::CommitInfo;

/// Authors with less than this share of all changed lines are minor contributors
const MINOR_CONTRIBUTOR_SHARE: f64 = 0.05;

/// Churn of one file change is its added plus deleted lines, the same as
/// pydriller's `CodeChurn` with `add_deleted_lines_to_churn`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChurnStats {
    pub total: u64,
    pub max: u64,
    pub avg: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSetStats {
    pub max: usize,
    pub avg: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ContributorCounts {
    pub total: usize,
    pub minor: usize,
}

/// Per file, the share (in percent, two decimals) of its changed lines
/// written by its most active author. `avg` is the mean over all files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceStats {
    pub avg: f64,
    pub by_file: BTreeMap<String, f64>,
}

/// Repository-wide process metrics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GitMetrics {
    pub total_commits: usize,
    pub developers: Vec<String>,
    pub developer_count: usize,
    pub lines_added: u64,
    pub lines_deleted: u64,
    pub files_modified: usize,
    pub average_lines_added_per_commit: f64,
    pub average_lines_deleted_per_commit: f64,
    pub hunks_count: usize,
    pub code_churn: ChurnStats,
    pub change_set: ChangeSetStats,
    pub contributors_count: ContributorCounts,
    pub contributors_experience: ExperienceStats,
}

/// Changes of one file in one commit
#[derive(Debug, Clone, PartialEq)]
struct FileChange {
    path: String,
    /// Previous path of a renamed file
    renamed_from: Option<String>,
    added: u64,
    deleted: u64,
    hunks: usize,
}

pub struct GitMetricsCollector<'r> {
    repository: &'r Repository,
}

impl<'r> GitMetricsCollector<'r> {
    pub fn new(repository: &'r Repository) -> Self {
        Self { repository }
    }

    /// Compute metrics over the given commits
    pub fn collect(&self, commits: &[CommitInfo]) -> MiningResult<GitMetrics> {
        let mut metrics = GitMetrics::default();
        let mut developers = BTreeSet::new();
        let mut lines_by_author: BTreeMap<String, u64> = BTreeMap::new();
        let mut churns: Vec<u64> = Vec::new();
        let mut change_sets: Vec<usize> = Vec::new();
        // file -> author email -> changed lines
        let mut lines_by_file: BTreeMap<String, BTreeMap<String, u64>> = BTreeMap::new();

        for info in commits {
            let commit = self.repository.find_commit(Oid::from_str(&info.hash)?)?;
            let author = commit.author().name().unwrap_or("").to_string();
            let email = commit.author().email().unwrap_or("").trim().to_string();

            metrics.total_commits += 1;
            developers.insert(author.clone());

            if commit.parent_count() > 1 {
                change_sets.push(0);
                continue;
            }

            let changes = self.file_changes(&commit)?;
            change_sets.push(changes.len());
            metrics.files_modified += changes.len();

            for change in &changes {
                metrics.lines_added += change.added;
                metrics.lines_deleted += change.deleted;
                metrics.hunks_count += change.hunks;
                churns.push(change.added + change.deleted);
                *lines_by_author.entry(author.clone()).or_insert(0) += change.added + change.deleted;

                if let Some(old_path) = &change.renamed_from {
                    if let Some(history) = lines_by_file.remove(old_path) {
                        lines_by_file.insert(change.path.clone(), history);
                    }
                }
                *lines_by_file
                    .entry(change.path.clone())
                    .or_default()
                    .entry(email.clone())
                    .or_insert(0) += change.added + change.deleted;
            }
        }

        if metrics.total_commits > 0 {
            let commits = metrics.total_commits as f64;
            metrics.average_lines_added_per_commit = metrics.lines_added as f64 / commits;
            metrics.average_lines_deleted_per_commit = metrics.lines_deleted as f64 / commits;
        }

        metrics.code_churn = ChurnStats {
            total: churns.iter().sum(),
            max: churns.iter().copied().max().unwrap_or(0),
            avg: mean(churns.iter().map(|&c| c as f64)),
        };
        metrics.change_set = ChangeSetStats {
            max: change_sets.iter().copied().max().unwrap_or(0),
            avg: mean(change_sets.iter().map(|&c| c as f64)),
        };
        metrics.contributors_count = contributor_counts(&developers, &lines_by_author);
        metrics.contributors_experience = contributors_experience(&lines_by_file);

        metrics.developer_count = developers.len();
        metrics.developers = developers.into_iter().collect();

        debug!(
            "Collected git metrics over {} commits ({} developers)",
            metrics.total_commits, metrics.developer_count
        );
        Ok(metrics)
    }

    fn file_changes(&self, commit: &git2::Commit<'_>) -> MiningResult<Vec<FileChange>> {
        let tree = commit.tree()?;
        let parent_tree = if commit.parent_count() == 1 {
            Some(commit.parent(0)?.tree()?)
        } else {
            None
        };

        let mut options = DiffOptions::new();
        options.include_untracked(false);
        let mut diff: Diff<'_> =
            self.repository
                .diff_tree_to_tree(parent_tree.as_ref(), Some(&tree), Some(&mut options))?;
        diff.find_similar(Some(DiffFindOptions::new().renames(true)))?;

        let mut changes = Vec::with_capacity(diff.deltas().len());
        for (index, delta) in diff.deltas().enumerate() {
            let new_path = delta.new_file().path().map(path_string);
            let old_path = delta.old_file().path().map(path_string);
            let path = new_path.clone().or_else(|| old_path.clone()).unwrap_or_default();
            let renamed_from = match delta.status() {
                Delta::Renamed => old_path,
                _ => None,
            };

            let (added, deleted, hunks) = match Patch::from_diff(&diff, index)? {
                Some(patch) => {
                    let (_, added, deleted) = patch.line_stats()?;
                    (added as u64, deleted as u64, patch.num_hunks())
                }
                // Binary files carry no line statistics
                None => (0, 0, 0),
            };
            changes.push(FileChange {
                path,
                renamed_from,
                added,
                deleted,
                hunks,
            });
        }
        Ok(changes)
    }
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn round_to_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn contributors_experience(lines_by_file: &BTreeMap<String, BTreeMap<String, u64>>) -> ExperienceStats {
    let by_file: BTreeMap<String, f64> = lines_by_file
        .iter()
        .map(|(path, by_author)| {
            let total: u64 = by_author.values().sum();
            let top = by_author.values().copied().max().unwrap_or(0);
            let share = if total == 0 {
                0.0
            } else {
                round_to_hundredths(100.0 * top as f64 / total as f64)
            };
            (path.clone(), share)
        })
        .collect();
    ExperienceStats {
        avg: round_to_hundredths(mean(by_file.values().copied())),
        by_file,
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn contributor_counts(developers: &BTreeSet<String>, lines_by_author: &BTreeMap<String, u64>) -> ContributorCounts {
    let total_lines: u64 = lines_by_author.values().sum();
    let minor = if total_lines == 0 {
        0
    } else {
        developers
            .iter()
            .filter(|author| {
                let lines = lines_by_author.get(*author).copied().unwrap_or(0);
                (lines as f64) / (total_lines as f64) < MINOR_CONTRIBUTOR_SHARE
            })
            .count()
    };
    ContributorCounts {
        total: developers.len(),
        minor,
    }
}
