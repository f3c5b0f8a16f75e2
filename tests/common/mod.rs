//! Shared helpers for integration tests

#![allow(dead_code)]

use git2::{Oid, Repository, Signature};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tempfile::TempDir;

use repo_miner::mining::lint::{Diagnostic, LintRun, Linter};
use repo_miner::mining::Deadline;
use repo_miner::MiningResult;

pub const TEST_CASE_FILE: &str = "import unittest\n\n\nclass TestMath(unittest.TestCase):\n    def test_add(self):\n        self.assertEqual(1 + 1, 2)\n\n    def test_sub(self):\n        self.assertEqual(2 - 1, 1)\n";

pub const PRODUCTION_FILE: &str = "def add(a, b):\n    return a + b\n";

/// A throwaway repository in a temp dir
pub struct TestRepo {
    pub dir: TempDir,
    pub repo: Repository,
    clock: i64,
}

impl TestRepo {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let repo = Repository::init(dir.path()).expect("Failed to init test repository");
        Self {
            dir,
            repo,
            clock: 1_704_067_200, // 2024-01-01T00:00:00Z
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn path_string(&self) -> String {
        self.dir.path().to_string_lossy().to_string()
    }

    /// Commit a set of changes one day after the previous commit.
    /// `None` content deletes the file.
    pub fn commit(&mut self, files: &[(&str, Option<&str>)], message: &str) -> Oid {
        let workdir = self.path().to_path_buf();
        let mut index = self.repo.index().unwrap();
        for (path, content) in files {
            let full = workdir.join(path);
            match content {
                Some(content) => {
                    if let Some(parent) = full.parent() {
                        fs::create_dir_all(parent).unwrap();
                    }
                    fs::write(&full, content).unwrap();
                    index.add_path(Path::new(path)).unwrap();
                }
                None => {
                    fs::remove_file(&full).unwrap();
                    index.remove_path(Path::new(path)).unwrap();
                }
            }
        }
        index.write().unwrap();

        let tree = self.repo.find_tree(index.write_tree().unwrap()).unwrap();
        let time = git2::Time::new(self.clock, 0);
        self.clock += 86_400;
        let signature = Signature::new("Miner Test", "miner@test.com", &time).unwrap();
        let parents: Vec<git2::Commit> = self
            .repo
            .head()
            .ok()
            .and_then(|h| h.peel_to_commit().ok())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit> = parents.iter().collect();
        self.repo
            .commit(Some("HEAD"), &signature, &signature, message, &tree, &parent_refs)
            .unwrap()
    }
}

/// Three commits: a TestCase with two methods, plus a production function, then everything deleted
pub fn scenario_a_repo() -> (TestRepo, Vec<Oid>) {
    let mut repo = TestRepo::new();
    let first = repo.commit(&[("tests/test_math.py", Some(TEST_CASE_FILE))], "add tests");
    let second = repo.commit(&[("app.py", Some(PRODUCTION_FILE))], "add app");
    let third = repo.commit(&[("tests/test_math.py", None), ("app.py", None)], "remove everything");
    (repo, vec![first, second, third])
}

pub fn too_complex(path: &str, rating: u32) -> Diagnostic {
    let module = path.trim_end_matches(".py").replace('/', ".");
    Diagnostic {
        category: "refactor".to_string(),
        module,
        obj: "handler".to_string(),
        line: 1,
        column: 0,
        path: path.to_string(),
        symbol: "too-complex".to_string(),
        message: format!("'handler' is too complex. The McCabe rating is {}", rating),
        message_id: "R1260".to_string(),
    }
}

/// Linter reporting canned diagnostics for files by name, recording every call
#[derive(Default)]
pub struct StubLinter {
    by_file: HashMap<String, Vec<Diagnostic>>,
    pub calls: Mutex<Vec<Vec<String>>>,
}

impl StubLinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, file_name: &str, diagnostics: Vec<Diagnostic>) -> Self {
        self.by_file.insert(file_name.to_string(), diagnostics);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Linter for StubLinter {
    fn lint(&self, files: &[PathBuf], working_dir: &Path, _deadline: &Deadline) -> MiningResult<LintRun> {
        let relative: Vec<String> = files
            .iter()
            .map(|f| {
                f.strip_prefix(working_dir)
                    .unwrap_or(f)
                    .to_string_lossy()
                    .replace('\\', "/")
            })
            .collect();
        let diagnostics = relative
            .iter()
            .flat_map(|name| self.by_file.get(name).cloned().unwrap_or_default())
            .collect();
        self.calls.lock().unwrap().push(relative);

        Ok(LintRun {
            diagnostics,
            files_linted: files.len(),
            statistics: None,
        })
    }
}
