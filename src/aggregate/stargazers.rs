//! Stargazer counts over time
//!
//! Input is a dump of GitHub GraphQL stargazer pages keyed by repository.
//! `clean` reduces it to `repo -> user -> starredAt`, and `over_time` turns
//! that into cumulative daily counts where every date has a value for every
//! repository.

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::output::table::{Cell, TableRow};

pub const STARGAZERS_CLEAN_FILE: &str = "stargazers-clean.json";
pub const STARGAZERS_OVER_TIME_JSON_FILE: &str = "stargazers-over-time.json";
pub const STARGAZERS_OVER_TIME_CSV_FILE: &str = "stargazers-over-time.csv";

pub const STARGAZERS_KEYS: &[&str] = &["date"];

/// repository -> user login -> starredAt timestamp
pub type CleanStargazers = BTreeMap<String, BTreeMap<String, String>>;

/// date (YYYY-MM-DD) -> repository -> cumulative stars
pub type StarsOverTime = BTreeMap<String, BTreeMap<String, u64>>;

/// Extract `user -> starredAt` per repository from raw GraphQL responses
pub fn clean(raw: &Map<String, Value>) -> CleanStargazers {
    let mut cleaned = CleanStargazers::new();

    for (repository, response) in raw {
        let edges = response
            .pointer("/data/repository/stargazers/edges")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut starred = BTreeMap::new();
        for edge in &edges {
            let user = edge.pointer("/node/login").and_then(Value::as_str);
            let starred_at = edge.get("starredAt").and_then(Value::as_str);
            match (user, starred_at) {
                (Some(user), Some(at)) => {
                    starred.insert(user.to_string(), at.to_string());
                }
                _ => warn!("{}: skipping malformed stargazer edge", repository),
            }
        }

        debug!("{}: {} stargazers", repository, starred.len());
        cleaned.insert(repository.clone(), starred);
    }
    cleaned
}

/// Cumulative stars per day, carrying the last known count forward (0 before the first star)
pub fn over_time(cleaned: &CleanStargazers) -> StarsOverTime {
    let mut observed = StarsOverTime::new();

    for (repository, stars) in cleaned {
        let mut times: Vec<DateTime<Utc>> = stars
            .values()
            .filter_map(|at| match DateTime::parse_from_rfc3339(at) {
                Ok(time) => Some(time.with_timezone(&Utc)),
                Err(e) => {
                    warn!("{}: ignoring unreadable starredAt '{}': {}", repository, at, e);
                    None
                }
            })
            .collect();
        times.sort();

        for (index, time) in times.iter().enumerate() {
            let day = time.format("%Y-%m-%d").to_string();
            observed
                .entry(day)
                .or_default()
                .insert(repository.clone(), index as u64 + 1);
        }
    }

    let mut last_known: BTreeMap<&str, u64> = cleaned.keys().map(|r| (r.as_str(), 0)).collect();
    let mut filled = StarsOverTime::new();
    for (day, counts) in &observed {
        for (repository, count) in counts {
            if let Some(last) = last_known.get_mut(repository.as_str()) {
                *last = *count;
            }
        }
        filled.insert(
            day.clone(),
            last_known.iter().map(|(r, c)| (r.to_string(), *c)).collect(),
        );
    }
    filled
}

/// Rows for the over-time table: `date` then one column per repository
pub fn over_time_rows(stars: &StarsOverTime) -> Vec<TableRow> {
    stars
        .iter()
        .map(|(day, counts)| {
            let mut row = TableRow::new();
            row.insert("date".to_string(), Cell::Text(day.clone()));
            for (repository, count) in counts {
                row.insert(repository.clone(), Cell::Integer(*count as i64));
            }
            row
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw() -> Map<String, Value> {
        let value = json!({
            "alpha": {"data": {"repository": {"stargazers": {"edges": [
                {"cursor": "a", "starredAt": "2024-01-03T10:00:00Z", "node": {"login": "u1"}},
                {"cursor": "b", "starredAt": "2024-01-01T09:00:00Z", "node": {"login": "u2"}},
                {"cursor": "c", "starredAt": "2024-01-03T11:00:00Z", "node": {"login": "u3"}},
                {"cursor": "d", "node": {"login": "broken"}}
            ]}}}},
            "beta": {"data": {"repository": {"stargazers": {"edges": [
                {"cursor": "e", "starredAt": "2024-01-02T08:00:00Z", "node": {"login": "u1"}}
            ]}}}},
            "empty": {"errors": [{"message": "Not found"}]}
        });
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_clean_extracts_user_timestamps() {
        let cleaned = clean(&raw());
        assert_eq!(cleaned["alpha"].len(), 3);
        assert_eq!(cleaned["alpha"]["u2"], "2024-01-01T09:00:00Z");
        assert_eq!(cleaned["beta"].len(), 1);
        assert!(cleaned["empty"].is_empty());
    }

    #[test]
    fn test_over_time_carries_counts_forward() {
        let stars = over_time(&clean(&raw()));
        let days: Vec<&str> = stars.keys().map(String::as_str).collect();
        assert_eq!(days, vec!["2024-01-01", "2024-01-02", "2024-01-03"]);

        assert_eq!(stars["2024-01-01"]["alpha"], 1);
        assert_eq!(stars["2024-01-01"]["beta"], 0);
        assert_eq!(stars["2024-01-02"]["alpha"], 1);
        assert_eq!(stars["2024-01-02"]["beta"], 1);
        assert_eq!(stars["2024-01-03"]["alpha"], 3);
        assert_eq!(stars["2024-01-03"]["beta"], 1);
        assert_eq!(stars["2024-01-03"]["empty"], 0);
    }

    #[test]
    fn test_over_time_rows_have_every_repository() {
        let rows = over_time_rows(&over_time(&clean(&raw())));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|row| row.len() == 4));
        assert_eq!(rows[0]["date"], Cell::Text("2024-01-01".to_string()));
    }
}
