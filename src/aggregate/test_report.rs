//! Test-presence artifacts: raw per-commit evidence and ratio over time

use serde_json::{json, Map, Value};

use super::{format_date, repository_batch, AggregateReport};
use crate::error::MiningResult;
use crate::mining::RepositoryTimeSeries;
use crate::output::table::{Cell, TableRow};

pub const TEST_RAW_FILE: &str = "test-raw.json";
pub const TEST_OVER_TIME_JSON_FILE: &str = "test-over-time.json";
pub const TEST_OVER_TIME_CSV_FILE: &str = "test-over-time.csv";

/// Identity columns of the over-time table
pub const TEST_OVER_TIME_KEYS: &[&str] = &["repo", "date"];

/// `repository -> commit -> {date, files, totals, ratio}` for snapshots with classifier results
pub fn test_raw_batch(series: &RepositoryTimeSeries) -> MiningResult<Map<String, Value>> {
    let mut entries = Map::new();
    for record in series.iter() {
        let Some(tests) = &record.tests else { continue };
        let mut value = serde_json::to_value(tests)?;
        if let Value::Object(map) = &mut value {
            map.insert("date".to_string(), Value::String(format_date(&record.commit_date)));
        }
        entries.insert(record.commit_hash.clone(), value);
    }
    Ok(repository_batch(&series.repository, entries))
}

/// `repository -> date -> {ratio, classes, functions, frameworks}`
pub fn test_over_time_batch(report: &AggregateReport) -> Map<String, Value> {
    let mut entries = Map::new();
    for row in &report.rows {
        let Some(ratio) = row.test_to_code_ratio else { continue };
        entries.insert(
            format_date(&row.date),
            json!({
                "commit_hash": row.commit_hash,
                "test-to-code-ratio": ratio,
                "test-classes": row.test_class_count,
                "test-functions": row.test_function_count,
                "test-frameworks": row.test_frameworks,
            }),
        );
    }
    repository_batch(&report.repository, entries)
}

/// Rows for `test-over-time.csv`
pub fn test_over_time_rows(report: &AggregateReport) -> Vec<TableRow> {
    report
        .rows
        .iter()
        .filter_map(|row| {
            let ratio = row.test_to_code_ratio?;
            let mut table_row = TableRow::new();
            table_row.insert("repo".to_string(), Cell::Text(report.repository.clone()));
            table_row.insert("date".to_string(), Cell::Text(format_date(&row.date)));
            table_row.insert("test-to-code-ratio".to_string(), Cell::Float(ratio));
            table_row.insert("test-classes".to_string(), Cell::Integer(row.test_class_count as i64));
            table_row.insert("test-functions".to_string(), Cell::Integer(row.test_function_count as i64));
            table_row.insert(
                "test-frameworks".to_string(),
                Cell::Set(row.test_frameworks.iter().cloned().collect()),
            );
            Some(table_row)
        })
        .collect()
}
