//! Keyed merge of CSV artifacts
//!
//! Every table has identity columns that form the row key (for example
//! `repo, date`). Merging replaces whole rows by key, keeps identity columns
//! first and sorts the remaining columns by name. Cells without a value are
//! written as `nan`.

use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use super::json_store::write_atomically;
use super::locks::LockRegistry;
use crate::error::{MiningError, MiningResult};

/// Marker for a missing value
pub const MISSING: &str = "nan";

/// A typed cell value before rendering
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Text(String),
    Integer(i64),
    Float(f64),
    /// Rendered as a JSON array of strings
    Set(Vec<String>),
}

impl Cell {
    pub fn render(&self) -> String {
        match self {
            Cell::Missing => MISSING.to_string(),
            Cell::Text(text) => text.clone(),
            Cell::Integer(value) => value.to_string(),
            Cell::Float(value) => render_float(*value),
            Cell::Set(items) => serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string()),
        }
    }
}

impl From<&serde_json::Value> for Cell {
    fn from(value: &serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => Cell::Missing,
            Value::Bool(b) => Cell::Text(b.to_string()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Integer(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Missing),
            },
            Value::String(s) => Cell::Text(s.clone()),
            Value::Array(items) => Cell::Set(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(_) => Cell::Text(value.to_string()),
        }
    }
}

fn render_float(value: f64) -> String {
    if !value.is_finite() {
        MISSING.to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{:.1}", value)
    } else {
        value.to_string()
    }
}

/// One table row: column name to cell
pub type TableRow = BTreeMap<String, Cell>;

/// Header plus rows of rendered strings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Parse CSV text with a header row
    pub fn parse(text: &str) -> Self {
        let mut records = parse_records(text).into_iter();
        let columns = records.next().unwrap_or_default();
        let rows = records
            .filter(|record| !(record.len() == 1 && record[0].is_empty()))
            .collect();
        Self { columns, rows }
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        push_record(&mut out, &self.columns);
        for row in &self.rows {
            push_record(&mut out, row);
        }
        out
    }

    fn into_keyed(self) -> Vec<BTreeMap<String, String>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| {
                columns
                    .iter()
                    .cloned()
                    .zip(row.into_iter().chain(std::iter::repeat(MISSING.to_string())))
                    .collect()
            })
            .collect()
    }
}

/// Merge rows into a table keyed by `key_fields`; new rows replace old rows with the same key
pub fn merge_rows(existing: Table, new_rows: Vec<TableRow>, key_fields: &[&str]) -> Table {
    let mut by_key: BTreeMap<Vec<String>, BTreeMap<String, String>> = BTreeMap::new();

    let key_of = |row: &BTreeMap<String, String>| -> Vec<String> {
        key_fields
            .iter()
            .map(|field| row.get(*field).cloned().unwrap_or_else(|| MISSING.to_string()))
            .collect()
    };

    for row in existing.into_keyed() {
        by_key.insert(key_of(&row), row);
    }
    for row in new_rows {
        let rendered: BTreeMap<String, String> = row.iter().map(|(k, v)| (k.clone(), v.render())).collect();
        by_key.insert(key_of(&rendered), rendered);
    }

    let metric_columns: BTreeSet<String> = by_key
        .values()
        .flat_map(|row| row.keys())
        .filter(|column| !key_fields.contains(&column.as_str()))
        .cloned()
        .collect();
    let columns: Vec<String> = key_fields
        .iter()
        .map(|field| field.to_string())
        .chain(metric_columns)
        .collect();

    let rows = by_key
        .into_values()
        .map(|row| {
            columns
                .iter()
                .map(|column| row.get(column).cloned().unwrap_or_else(|| MISSING.to_string()))
                .collect()
        })
        .collect();

    Table { columns, rows }
}

/// Merge rows into the CSV file at `path` under the path's lock
pub fn merge_csv(registry: &LockRegistry, path: &Path, rows: Vec<TableRow>, key_fields: &[&str]) -> MiningResult<()> {
    if key_fields.is_empty() {
        return Err(MiningError::persistence(path, "a table needs at least one identity column"));
    }
    if rows.is_empty() {
        warn!("No rows to write to {}, leaving it unchanged", path.display());
        return Ok(());
    }

    registry.with_lock(path, || {
        let existing = load_table(path);
        let merged = merge_rows(existing, rows, key_fields);
        debug!("{} now holds {} rows", path.display(), merged.rows.len());
        write_atomically(path, merged.to_csv().as_bytes())
    })
}

fn load_table(path: &Path) -> Table {
    match fs::read_to_string(path) {
        Ok(text) => Table::parse(&text),
        Err(e) if e.kind() == ErrorKind::NotFound => Table::default(),
        Err(e) => {
            warn!("Could not read {}, starting from empty: {}", path.display(), e);
            Table::default()
        }
    }
}

fn push_record(out: &mut String, fields: &[String]) {
    let line: Vec<String> = fields.iter().map(|f| quote_field(f)).collect();
    out.push_str(&line.join(","));
    out.push('\n');
}

fn quote_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split CSV text into records, honouring quoted fields with embedded
/// separators, doubled quotes and line breaks
fn parse_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => in_quotes = true,
            ',' => record.push(std::mem::take(&mut field)),
            '\r' => {}
            '\n' => {
                record.push(std::mem::take(&mut field));
                records.push(std::mem::take(&mut record));
            }
            _ => field.push(c),
        }
    }

    if !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row(pairs: &[(&str, Cell)]) -> TableRow {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(Cell::Missing.render(), "nan");
        assert_eq!(Cell::Float(1.0).render(), "1.0");
        assert_eq!(Cell::Float(0.25).render(), "0.25");
        assert_eq!(Cell::Float(f64::NAN).render(), "nan");
        assert_eq!(Cell::Integer(7).render(), "7");
        assert_eq!(Cell::Set(vec![]).render(), "[]");
        assert_eq!(Cell::Set(vec!["pytest".into(), "unittest".into()]).render(), r#"["pytest","unittest"]"#);
    }

    #[test]
    fn test_csv_round_trip_with_quoting() {
        let table = Table {
            columns: vec!["repo".into(), "test-frameworks".into()],
            rows: vec![vec!["r".into(), r#"["pytest","unittest"]"#.into()]],
        };
        let text = table.to_csv();
        assert_eq!(text, "repo,test-frameworks\nr,\"[\"\"pytest\"\",\"\"unittest\"\"]\"\n");
        assert_eq!(Table::parse(&text), table);
    }

    #[test]
    fn test_column_order_identity_first_then_sorted() {
        let merged = merge_rows(
            Table::default(),
            vec![row(&[
                ("zeta", Cell::Integer(1)),
                ("date", Cell::Text("2024-01-01".into())),
                ("alpha", Cell::Integer(2)),
                ("repo", Cell::Text("r".into())),
            ])],
            &["repo", "date"],
        );
        assert_eq!(merged.columns, vec!["repo", "date", "alpha", "zeta"]);
    }

    #[test]
    fn test_missing_cells_become_nan() {
        let merged = merge_rows(
            Table::default(),
            vec![
                row(&[("repo", Cell::Text("a".into())), ("x", Cell::Integer(1))]),
                row(&[("repo", Cell::Text("b".into())), ("y", Cell::Integer(2))]),
            ],
            &["repo"],
        );
        assert_eq!(merged.rows, vec![vec!["a", "1", "nan"], vec!["b", "nan", "2"]]);
    }

    #[test]
    fn test_same_key_replaces_whole_row() {
        let existing = Table {
            columns: vec!["repo".into(), "date".into(), "old".into(), "ratio".into()],
            rows: vec![
                vec!["R".into(), "2024-01-01".into(), "5".into(), "0.5".into()],
                vec!["R".into(), "2023-12-31".into(), "1".into(), "0.1".into()],
            ],
        };
        let merged = merge_rows(
            existing,
            vec![row(&[
                ("repo", Cell::Text("R".into())),
                ("date", Cell::Text("2024-01-01".into())),
                ("ratio", Cell::Float(0.75)),
            ])],
            &["repo", "date"],
        );

        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.rows[0], vec!["R", "2023-12-31", "1", "0.1"]);
        assert_eq!(merged.rows[1], vec!["R", "2024-01-01", "nan", "0.75"]);
    }

    #[test]
    fn test_merge_csv_twice_is_byte_identical() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test-over-time.csv");
        let registry = LockRegistry::new();
        let rows = vec![
            row(&[("repo", Cell::Text("b".into())), ("date", Cell::Text("d1".into())), ("v", Cell::Float(1.0))]),
            row(&[("repo", Cell::Text("a".into())), ("date", Cell::Text("d1".into())), ("v", Cell::Missing)]),
        ];

        merge_csv(&registry, &path, rows.clone(), &["repo", "date"]).unwrap();
        let once = fs::read_to_string(&path).unwrap();
        merge_csv(&registry, &path, rows, &["repo", "date"]).unwrap();
        let twice = fs::read_to_string(&path).unwrap();

        assert_eq!(once, twice);
        assert_eq!(once, "repo,date,v\na,d1,nan\nb,d1,1.0\n");
    }

    #[test]
    fn test_empty_batch_leaves_file_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lint-flat.csv");
        merge_csv(&LockRegistry::new(), &path, Vec::new(), &["repo"]).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_parse_handles_crlf_and_embedded_newlines() {
        let table = Table::parse("repo,note\r\nr,\"two\nlines\"\r\n");
        assert_eq!(table.columns, vec!["repo", "note"]);
        assert_eq!(table.rows, vec![vec!["r".to_string(), "two\nlines".to_string()]]);
    }
}
