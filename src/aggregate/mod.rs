//! Result aggregation
//!
//! Turns a repository time series into report rows and into the batches the
//! merge writer persists. Absent snapshots never appear in a series, so they
//! never reach a report as zeroes.

pub mod git_report;
pub mod lint_report;
pub mod stargazers;
pub mod test_report;

use chrono::{DateTime, SecondsFormat, Utc};
use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};

use crate::mining::RepositoryTimeSeries;

/// Key used for a commit date in every artifact
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// One report row per snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportRow {
    pub repository: String,
    pub date: DateTime<Utc>,
    pub commit_hash: String,
    pub test_to_code_ratio: Option<f64>,
    pub test_frameworks: BTreeSet<String>,
    pub test_class_count: usize,
    pub test_function_count: usize,
    /// Lint message totals by category; empty when lint did not run
    pub lint_totals: BTreeMap<String, u64>,
    pub avg_mccabe_complexity: Option<f64>,
}

/// Derived, read-only view of one repository's time series
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregateReport {
    pub repository: String,
    pub rows: Vec<ReportRow>,
}

impl AggregateReport {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Latest row, if any
    pub fn latest(&self) -> Option<&ReportRow> {
        self.rows.last()
    }
}

/// Build the report for a series, sorted by date with ties in series order
pub fn aggregate(series: &RepositoryTimeSeries) -> AggregateReport {
    if series.is_empty() {
        warn!("{}: no snapshots to aggregate", series.repository);
        return AggregateReport {
            repository: series.repository.clone(),
            rows: Vec::new(),
        };
    }

    let mut rows: Vec<ReportRow> = series
        .iter()
        .map(|record| {
            let tests = record.tests.as_ref();
            ReportRow {
                repository: series.repository.clone(),
                date: record.commit_date,
                commit_hash: record.commit_hash.clone(),
                test_to_code_ratio: tests.map(|t| t.test_to_code_ratio),
                test_frameworks: tests.map(|t| t.test_frameworks()).unwrap_or_default(),
                test_class_count: tests.map(|t| t.test_class_count()).unwrap_or(0),
                test_function_count: tests.map(|t| t.test_function_count()).unwrap_or(0),
                lint_totals: record
                    .lint
                    .as_ref()
                    .map(|lint| lint.stats.by_category.clone())
                    .unwrap_or_default(),
                avg_mccabe_complexity: record.lint.as_ref().map(|lint| lint.stats.avg_mccabe_complexity),
            }
        })
        .collect();

    // Stable sort keeps encounter order for equal dates
    rows.sort_by_key(|row| row.date);

    AggregateReport {
        repository: series.repository.clone(),
        rows,
    }
}

/// Flatten nested objects into dotted keys (`{"a": {"b": 1}}` -> `{"a.b": 1}`)
pub fn flatten_value(prefix: &str, value: &Value, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let name = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                flatten_value(&name, nested, out);
            }
        }
        other => {
            out.insert(prefix.to_string(), other.clone());
        }
    }
}

/// Wrap per-key entries of one repository as `{repository: {key: entry}}`
pub(crate) fn repository_batch(repository: &str, entries: Map<String, Value>) -> Map<String, Value> {
    let mut batch = Map::new();
    batch.insert(repository.to_string(), Value::Object(entries));
    batch
}
