//! Git process-metric artifacts

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::flatten_value;
use crate::error::MiningResult;
use crate::mining::GitMetrics;
use crate::output::table::{Cell, TableRow};

pub const GIT_RAW_FILE: &str = "git-raw.json";
pub const GIT_FLAT_CSV_FILE: &str = "git-flat.csv";

pub const GIT_FLAT_KEYS: &[&str] = &["repo"];

fn metrics_object(repository: &str, url: &str, metrics: &GitMetrics) -> MiningResult<Map<String, Value>> {
    let mut object = match serde_json::to_value(metrics)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    object.insert("repo".to_string(), Value::String(repository.to_string()));
    object.insert("repo_url".to_string(), Value::String(url.to_string()));
    Ok(object)
}

/// `repository -> metrics`; merged at the top level
pub fn git_raw_batch(repository: &str, url: &str, metrics: &GitMetrics) -> MiningResult<Map<String, Value>> {
    let mut batch = Map::new();
    batch.insert(repository.to_string(), Value::Object(metrics_object(repository, url, metrics)?));
    Ok(batch)
}

/// One `git-flat.csv` row with dotted keys (`code_churn.max`, ...).
/// Per-file experience stays in the raw artifact; the row keeps its average.
pub fn git_flat_row(repository: &str, url: &str, metrics: &GitMetrics) -> MiningResult<TableRow> {
    let mut object = metrics_object(repository, url, metrics)?;
    if let Some(Value::Object(experience)) = object.get_mut("contributors_experience") {
        experience.remove("by_file");
    }
    let mut flat = BTreeMap::new();
    flatten_value("", &Value::Object(object), &mut flat);
    Ok(flat.iter().map(|(key, value)| (key.clone(), Cell::from(value))).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mining::git_metrics::{ChurnStats, ExperienceStats};

    fn metrics() -> GitMetrics {
        GitMetrics {
            total_commits: 4,
            developers: vec!["Alice".to_string(), "Bob".to_string()],
            developer_count: 2,
            code_churn: ChurnStats { total: 10, max: 6, avg: 2.5 },
            contributors_experience: ExperienceStats {
                avg: 75.0,
                by_file: BTreeMap::from([("a.py".to_string(), 100.0), ("b.py".to_string(), 50.0)]),
            },
            ..GitMetrics::default()
        }
    }

    #[test]
    fn test_raw_batch_carries_identity() {
        let batch = git_raw_batch("demo", "https://github.com/o/demo", &metrics()).unwrap();
        assert_eq!(batch["demo"]["repo"], "demo");
        assert_eq!(batch["demo"]["repo_url"], "https://github.com/o/demo");
        assert_eq!(batch["demo"]["total_commits"], 4);
    }

    #[test]
    fn test_flat_row_uses_dotted_keys() {
        let row = git_flat_row("demo", "/local/demo", &metrics()).unwrap();
        assert_eq!(row["repo"], Cell::Text("demo".to_string()));
        assert_eq!(row["code_churn.max"], Cell::Integer(6));
        assert_eq!(row["code_churn.avg"].render(), "2.5");
        assert_eq!(row["developers"].render(), r#"["Alice","Bob"]"#);
        assert_eq!(row["contributors_experience.avg"].render(), "75.0");
        assert!(!row.keys().any(|key| key.contains("by_file")));
    }

    #[test]
    fn test_raw_batch_keeps_experience_per_file() {
        let batch = git_raw_batch("demo", "/local/demo", &metrics()).unwrap();
        assert_eq!(batch["demo"]["contributors_experience"]["by_file"]["b.py"], 50.0);
    }
}
