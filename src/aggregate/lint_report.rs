//! Lint artifacts: raw diagnostics per commit and flattened stats per date

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::{flatten_value, format_date, repository_batch};
use crate::error::MiningResult;
use crate::mining::{LintReport, RepositoryTimeSeries};
use crate::output::table::{Cell, TableRow};

pub const LINT_RAW_FILE: &str = "lint-raw.json";
pub const LINT_FLAT_JSON_FILE: &str = "lint-flat.json";
pub const LINT_FLAT_CSV_FILE: &str = "lint-flat.csv";

pub const LINT_FLAT_KEYS: &[&str] = &["repo", "date", "commit_hash"];

/// `repository -> commit -> {date, messages, stats}`
pub fn lint_raw_batch(series: &RepositoryTimeSeries) -> MiningResult<Map<String, Value>> {
    let mut entries = Map::new();
    for record in series.iter() {
        let Some(lint) = &record.lint else { continue };
        let mut value = serde_json::to_value(lint)?;
        if let Value::Object(map) = &mut value {
            map.insert("date".to_string(), Value::String(format_date(&record.commit_date)));
        }
        entries.insert(record.commit_hash.clone(), value);
    }
    Ok(repository_batch(&series.repository, entries))
}

/// Stats of one snapshot as `stats.<name>` keys; category totals become `stats.<category>`
pub fn flatten_lint(report: &LintReport) -> BTreeMap<String, Value> {
    let mut flat = BTreeMap::new();
    for (category, total) in &report.stats.by_category {
        flat.insert(format!("stats.{}", category), Value::from(*total));
    }
    let mut rest = serde_json::to_value(&report.stats).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut rest {
        map.remove("by_category");
    }
    flatten_value("stats", &rest, &mut flat);
    flat
}

/// `repository -> date -> {commit_hash, stats.*}`
pub fn lint_flat_batch(series: &RepositoryTimeSeries) -> Map<String, Value> {
    let mut entries = Map::new();
    for record in series.iter() {
        let Some(lint) = &record.lint else { continue };
        let mut entry: Map<String, Value> = flatten_lint(lint).into_iter().collect();
        entry.insert("commit_hash".to_string(), Value::String(record.commit_hash.clone()));
        entries.insert(format_date(&record.commit_date), Value::Object(entry));
    }
    repository_batch(&series.repository, entries)
}

/// Rows for `lint-flat.csv`
pub fn lint_flat_rows(series: &RepositoryTimeSeries) -> Vec<TableRow> {
    series
        .iter()
        .filter_map(|record| {
            let lint = record.lint.as_ref()?;
            let mut row: TableRow = flatten_lint(lint)
                .iter()
                .map(|(key, value)| (key.clone(), Cell::from(value)))
                .collect();
            row.insert("repo".to_string(), Cell::Text(series.repository.clone()));
            row.insert("date".to_string(), Cell::Text(format_date(&record.commit_date)));
            row.insert("commit_hash".to_string(), Cell::Text(record.commit_hash.clone()));
            Some(row)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::lint::{Diagnostic, LintRun};
    use crate::mining::SnapshotRecord;
    use chrono::{TimeZone, Utc};

    fn series() -> RepositoryTimeSeries {
        let run = LintRun {
            diagnostics: vec![Diagnostic {
                category: "refactor".to_string(),
                module: "app".to_string(),
                obj: "main".to_string(),
                line: 3,
                column: 0,
                path: "app.py".to_string(),
                symbol: "too-complex".to_string(),
                message: "'main' is too complex. The McCabe rating is 15".to_string(),
                message_id: "R1260".to_string(),
            }],
            files_linted: 1,
            statistics: None,
        };
        let mut series = RepositoryTimeSeries::new("demo");
        series.insert(SnapshotRecord {
            commit_hash: "c1".to_string(),
            commit_date: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            lint: Some(LintReport::from_run(&run)),
            tests: None,
        });
        series
    }

    #[test]
    fn test_flatten_lint_keys() {
        let series = series();
        let flat = flatten_lint(series.records()[0].lint.as_ref().unwrap());

        assert_eq!(flat["stats.refactor"], 1);
        assert_eq!(flat["stats.error"], 0);
        assert_eq!(flat["stats.total_messages"], 1);
        assert_eq!(flat["stats.avg_mccabe_complexity"], 15.0);
        assert_eq!(flat["stats.files_linted"], 1);
        assert_eq!(flat["stats.modules_linted"], 1);
        assert_eq!(flat["stats.modules_with_messages"], 1);
        assert!(flat["stats.global_score"].is_null());
        assert!(!flat.keys().any(|k| k.starts_with("stats.by_category")));
    }

    #[test]
    fn test_raw_batch_keeps_messages() {
        let batch = lint_raw_batch(&series()).unwrap();
        let entry = &batch["demo"]["c1"];
        assert_eq!(entry["messages"]["app"]["categories"]["refactor"]["message_ids"]["R1260"]["count"], 1);
        assert_eq!(entry["date"], "2024-03-01T12:00:00Z");
    }

    #[test]
    fn test_flat_batch_and_rows_key_by_date() {
        let series = series();
        let batch = lint_flat_batch(&series);
        assert_eq!(batch["demo"]["2024-03-01T12:00:00Z"]["commit_hash"], "c1");

        let rows = lint_flat_rows(&series);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["commit_hash"], Cell::Text("c1".to_string()));
        assert_eq!(rows[0]["stats.avg_mccabe_complexity"].render(), "15.0");
    }
}
