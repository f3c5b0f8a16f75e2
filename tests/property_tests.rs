//! Property-based tests for statement classification and artifact merging

use proptest::prelude::*;
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

use repo_miner::mining::StatementClassifier;
use repo_miner::output::{Cell, LockRegistry, MergeWriter, TableRow};

/// Simple statements that never involve a test framework
fn plain_statement() -> impl Strategy<Value = String> {
    prop_oneof![
        (0u32..100).prop_map(|n| format!("value_{n} = {n}")),
        (0u32..100).prop_map(|n| format!("print({n})")),
        (0u32..100).prop_map(|n| format!("total = max({n}, 1) + {n}")),
        Just("import os".to_string()),
        Just("from collections import OrderedDict".to_string()),
        (0u32..100).prop_map(|n| format!("def helper_{n}(x):\n    return x * {n}")),
        (0u32..100).prop_map(|n| format!("class Model{n}:\n    size = {n}")),
    ]
}

fn indent(source: &str, depth: usize) -> String {
    let pad = " ".repeat(depth * 4);
    source
        .lines()
        .map(|line| format!("{}{}\n", pad, line))
        .collect()
}

proptest! {
    #[test]
    fn prop_no_test_evidence_means_no_test_statements(statements in prop::collection::vec(plain_statement(), 1..12)) {
        let source = statements.join("\n") + "\n";
        let mut classifier = StatementClassifier::with_default_modules().unwrap();
        let counts = classifier.classify_source(&source).unwrap();

        prop_assert_eq!(counts.test_statements, 0);
        prop_assert!(counts.test_imports.is_empty());
        prop_assert!(counts.test_classes.is_empty() && counts.test_functions.is_empty());
    }

    #[test]
    fn prop_everything_inside_a_test_case_is_test_code(statements in prop::collection::vec(plain_statement(), 1..12)) {
        let body: String = statements.iter().map(|s| indent(s, 2)).collect();
        let source = format!(
            "import unittest\n\n\nclass TestGenerated(unittest.TestCase):\n    def test_generated(self):\n{}",
            body
        );
        let mut classifier = StatementClassifier::with_default_modules().unwrap();
        let counts = classifier.classify_source(&source).unwrap();

        prop_assert_eq!(counts.production_statements, 0);
        prop_assert!(counts.test_statements >= 3);
        prop_assert_eq!(counts.test_classes.len(), 1);
    }

    #[test]
    fn prop_merge_is_idempotent(rows in prop::collection::vec((0u8..4, 1u32..28, 0.0f64..1.0), 1..10)) {
        let dir = TempDir::new().unwrap();
        let writer = MergeWriter::new(dir.path(), Arc::new(LockRegistry::new()));
        let table: Vec<TableRow> = rows
            .iter()
            .map(|(repo, day, ratio)| {
                TableRow::from([
                    ("repo".to_string(), Cell::Text(format!("repo-{}", repo))),
                    ("date".to_string(), Cell::Text(format!("2024-01-{:02}", day))),
                    ("ratio".to_string(), Cell::Float(*ratio)),
                ])
            })
            .collect();

        writer.merge_table("p.csv", table.clone(), &["repo", "date"]).unwrap();
        let once = fs::read(writer.path("p.csv")).unwrap();
        writer.merge_table("p.csv", table, &["repo", "date"]).unwrap();
        let twice = fs::read(writer.path("p.csv")).unwrap();

        prop_assert_eq!(once, twice);
    }
}
