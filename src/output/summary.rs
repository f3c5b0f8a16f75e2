//! End-of-run summary table

use colored::Colorize;
use prettytable::{format, Cell, Row, Table};

use crate::mining::SeriesTally;

/// How one repository fared in a run
#[derive(Debug, Clone, PartialEq)]
pub enum RepositoryStatus {
    Completed,
    /// Completed, but some commits failed
    Partial,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryOutcome {
    pub repository: String,
    pub tally: SeriesTally,
    pub status: RepositoryStatus,
}

impl RepositoryOutcome {
    pub fn completed(repository: impl Into<String>, tally: SeriesTally) -> Self {
        let status = if tally.failed > 0 {
            RepositoryStatus::Partial
        } else {
            RepositoryStatus::Completed
        };
        Self {
            repository: repository.into(),
            tally,
            status,
        }
    }

    pub fn failed(repository: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tally: SeriesTally::default(),
            status: RepositoryStatus::Failed(reason.into()),
        }
    }

    fn status_text(&self, use_color: bool) -> String {
        let (plain, painted) = match &self.status {
            RepositoryStatus::Completed => ("ok".to_string(), "ok".green()),
            RepositoryStatus::Partial => ("partial".to_string(), "partial".yellow()),
            RepositoryStatus::Failed(reason) => {
                let text = format!("failed: {}", reason);
                (text.clone(), text.red())
            }
        };
        if use_color { painted.to_string() } else { plain }
    }
}

/// Render the per-repository summary of a run
pub fn format_run_summary(outcomes: &[RepositoryOutcome], use_color: bool) -> String {
    if outcomes.is_empty() {
        return String::new();
    }

    let mut table = Table::new();
    table.set_format(*format::consts::FORMAT_CLEAN);
    table.add_row(Row::new(
        ["Repository", "Commits", "Recorded", "No source", "Failed", "Status"]
            .iter()
            .map(|h| Cell::new(h))
            .collect(),
    ));

    for outcome in outcomes {
        table.add_row(Row::new(vec![
            Cell::new(&outcome.repository),
            Cell::new(&outcome.tally.seen.to_string()),
            Cell::new(&outcome.tally.recorded.to_string()),
            Cell::new(&outcome.tally.skipped.to_string()),
            Cell::new(&outcome.tally.failed.to_string()),
            Cell::new(&outcome.status_text(use_color)),
        ]));
    }

    table
        .to_string()
        .lines()
        .map(|line| format!("  {}\n", line))
        .collect()
}
