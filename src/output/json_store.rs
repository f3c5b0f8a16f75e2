//! Keyed merge of JSON artifacts
//!
//! Artifacts are objects keyed by repository and then by commit hash or
//! date (`Nested`), or keyed by repository only (`TopLevel`). A new entry
//! replaces an existing entry with the same key in full. Keys are written in
//! sorted order, so merging the same batch twice gives identical bytes.

use log::{debug, warn};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::locks::LockRegistry;
use crate::error::{MiningError, MiningResult};

/// Level at which entries are replaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDepth {
    /// `repository -> value`; a repository's value is replaced whole
    TopLevel,
    /// `repository -> key -> value`; entries are replaced per key
    Nested,
}

/// Merge `batch` into the JSON file at `path` under the path's lock
pub fn merge_json(registry: &LockRegistry, path: &Path, batch: Map<String, Value>, depth: MergeDepth) -> MiningResult<()> {
    registry.with_lock(path, || {
        let mut existing = load_object(path);
        merge_objects(&mut existing, batch, depth);

        let mut text = serde_json::to_string_pretty(&Value::Object(existing))?;
        text.push('\n');
        write_atomically(path, text.as_bytes())
    })
}

/// Merge in memory; exposed for callers that build artifacts themselves
pub fn merge_objects(existing: &mut Map<String, Value>, batch: Map<String, Value>, depth: MergeDepth) {
    for (repository, value) in batch {
        match (depth, value) {
            (MergeDepth::Nested, Value::Object(entries)) => {
                let slot = existing
                    .entry(repository)
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                if let Value::Object(target) = slot {
                    for (key, entry) in entries {
                        target.insert(key, entry);
                    }
                }
            }
            (_, value) => {
                existing.insert(repository, value);
            }
        }
    }
}

/// Read a JSON object; missing, unreadable or non-object files count as empty
pub fn load_object(path: &Path) -> Map<String, Value> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Map::new(),
        Err(e) => {
            warn!("Could not read {}, starting from empty: {}", path.display(), e);
            return Map::new();
        }
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            warn!("{} does not hold a JSON object, starting from empty", path.display());
            Map::new()
        }
        Err(e) => {
            warn!("{} is not valid JSON, starting from empty: {}", path.display(), e);
            Map::new()
        }
    }
}

/// Write through a sibling temporary file and rename it over the target
pub fn write_atomically(path: &Path, bytes: &[u8]) -> MiningResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| MiningError::persistence(path, e.to_string()))?;
    }

    let temporary = temporary_path(path);
    fs::write(&temporary, bytes).map_err(|e| MiningError::persistence(&temporary, e.to_string()))?;
    fs::rename(&temporary, path).map_err(|e| {
        let _ = fs::remove_file(&temporary);
        MiningError::persistence(path, e.to_string())
    })?;

    debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

fn temporary_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_missing_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test-raw.json");
        let registry = LockRegistry::new();

        merge_json(&registry, &path, object(json!({"repo": {"c1": {"ratio": 0.5}}})), MergeDepth::Nested).unwrap();

        let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, json!({"repo": {"c1": {"ratio": 0.5}}}));
        assert!(!temporary_path(&path).exists());
    }

    #[test]
    fn test_nested_merge_keeps_other_keys_and_replaces_same_key() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("lint-raw.json");
        let registry = LockRegistry::new();

        merge_json(
            &registry,
            &path,
            object(json!({"r": {"c1": {"a": 1, "b": 2}, "c2": {"a": 3}}, "other": {"c9": {}}})),
            MergeDepth::Nested,
        )
        .unwrap();
        merge_json(&registry, &path, object(json!({"r": {"c1": {"a": 10}}})), MergeDepth::Nested).unwrap();

        let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, json!({"r": {"c1": {"a": 10}, "c2": {"a": 3}}, "other": {"c9": {}}}));
    }

    #[test]
    fn test_top_level_merge_replaces_repository() {
        let mut existing = object(json!({"r": {"total_commits": 3, "old": true}}));
        merge_objects(&mut existing, object(json!({"r": {"total_commits": 5}})), MergeDepth::TopLevel);
        assert_eq!(Value::Object(existing), json!({"r": {"total_commits": 5}}));
    }

    #[test]
    fn test_merge_twice_is_byte_identical() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test-over-time.json");
        let registry = LockRegistry::new();
        let batch = object(json!({"b": {"2024-01-02": {"x": 1.0}}, "a": {"2024-01-01": {"x": 0.5}}}));

        merge_json(&registry, &path, batch.clone(), MergeDepth::Nested).unwrap();
        let once = fs::read(&path).unwrap();
        merge_json(&registry, &path, batch, MergeDepth::Nested).unwrap();
        let twice = fs::read(&path).unwrap();

        assert_eq!(once, twice);
        assert!(String::from_utf8(once).unwrap().ends_with("}\n"));
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("git-raw.json");
        fs::write(&path, "{ truncated").unwrap();
        let registry = LockRegistry::new();

        merge_json(&registry, &path, object(json!({"r": {"n": 1}})), MergeDepth::TopLevel).unwrap();
        let stored: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored, json!({"r": {"n": 1}}));
    }
}
