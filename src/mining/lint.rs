//! Lint collaborator
//!
//! Runs pylint once per snapshot over every qualifying file and groups the
//! resulting diagnostics by module, category and message id. pylint's own
//! statistics (modules linted, global score) are kept alongside.

use crossbeam_channel::RecvTimeoutError;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use super::Deadline;
use crate::error::{MiningError, MiningResult};

/// Categories pylint reports; always present in stats so tabular output is stable
pub const LINT_CATEGORIES: &[&str] = &["convention", "error", "fatal", "info", "refactor", "warning"];

const TOO_COMPLEX_SYMBOL: &str = "too-complex";

/// pylint exit status bit for a usage error
const USAGE_ERROR_BIT: i32 = 32;

/// One pylint message in its JSON output format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(rename = "type")]
    pub category: String,
    pub module: String,
    #[serde(default)]
    pub obj: String,
    pub line: u32,
    pub column: u32,
    pub path: String,
    pub symbol: String,
    pub message: String,
    #[serde(rename = "message-id", alias = "messageId")]
    pub message_id: String,
}

/// Summary pylint computes for a run (`statistics` of the `json2` format)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PylintStatistics {
    #[serde(default)]
    pub message_type_count: BTreeMap<String, u64>,
    #[serde(default)]
    pub modules_linted: usize,
    /// Global evaluation score out of 10; absent when nothing could be scored
    #[serde(default)]
    pub score: Option<f64>,
}

/// pylint output in either the `json` (bare message list) or `json2` format
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PylintOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub statistics: Option<PylintStatistics>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPylintOutput {
    Messages(Vec<Diagnostic>),
    Report {
        messages: Vec<Diagnostic>,
        statistics: Option<PylintStatistics>,
    },
}

/// Raw output of one lint invocation
#[derive(Debug, Clone, Default)]
pub struct LintRun {
    pub diagnostics: Vec<Diagnostic>,
    pub files_linted: usize,
    pub statistics: Option<PylintStatistics>,
}

/// Anything that can lint a batch of files in a working tree
pub trait Linter: Send + Sync {
    fn lint(&self, files: &[PathBuf], working_dir: &Path, deadline: &Deadline) -> MiningResult<LintRun>;
}

/// Linter backed by a `pylint` subprocess
#[derive(Debug, Clone)]
pub struct PylintRunner {
    command: String,
    rcfile: Option<PathBuf>,
}

impl Default for PylintRunner {
    fn default() -> Self {
        Self::new("pylint", None)
    }
}

impl PylintRunner {
    pub fn new(command: impl Into<String>, rcfile: Option<PathBuf>) -> Self {
        Self {
            command: command.into(),
            rcfile,
        }
    }

    fn build_command(&self, files: &[PathBuf], working_dir: &Path) -> Command {
        let mut command = Command::new(&self.command);
        command
            .arg("--output-format=json2")
            .arg("--load-plugins=pylint.extensions.mccabe");
        if let Some(rcfile) = &self.rcfile {
            command.arg(format!("--rcfile={}", rcfile.display()));
        }
        command
            .args(files)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        command
    }
}

impl Linter for PylintRunner {
    fn lint(&self, files: &[PathBuf], working_dir: &Path, deadline: &Deadline) -> MiningResult<LintRun> {
        if files.is_empty() {
            return Ok(LintRun::default());
        }
        deadline.check()?;

        info!("Linting {} files in {}", files.len(), working_dir.display());
        let mut child = self
            .build_command(files, working_dir)
            .spawn()
            .map_err(|e| MiningError::lint(format!("Failed to run {}: {}", self.command, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MiningError::lint("Failed to capture pylint stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MiningError::lint("Failed to capture pylint stderr"))?;

        let (sender, receiver) = crossbeam_channel::bounded(1);
        thread::spawn(move || {
            let mut text = String::new();
            let result = BufReader::new(stdout).read_to_string(&mut text).map(|_| text);
            let _ = sender.send(result);
        });
        let stderr_reader = thread::spawn(move || {
            let mut text = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut text);
            text
        });

        let received = match deadline.remaining() {
            Some(left) => receiver.recv_timeout(left),
            None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        let stdout_text = match received {
            Ok(Ok(text)) => text,
            Ok(Err(e)) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MiningError::lint(format!("Failed reading pylint output: {}", e)));
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("pylint exceeded the snapshot deadline, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(deadline.timeout_error());
            }
            Err(RecvTimeoutError::Disconnected) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(MiningError::lint("pylint output reader stopped unexpectedly"));
            }
        };

        let status = child
            .wait()
            .map_err(|e| MiningError::lint(format!("Failed to wait for pylint: {}", e)))?;
        let stderr_text = stderr_reader.join().unwrap_or_default();

        check_exit_status(status.code(), &stdout_text, &stderr_text)?;
        let output = parse_pylint_output(&stdout_text)?;

        debug!("pylint reported {} messages", output.diagnostics.len());
        Ok(LintRun {
            diagnostics: output.diagnostics,
            files_linted: files.len(),
            statistics: output.statistics,
        })
    }
}

/// pylint's exit status is a bit field of message categories found, so a
/// non-zero status with output is a successful run. Signals, usage errors
/// and failures without any output are not.
fn check_exit_status(code: Option<i32>, stdout: &str, stderr: &str) -> MiningResult<()> {
    match code {
        None => Err(MiningError::lint("pylint was terminated by a signal")),
        Some(0) => Ok(()),
        Some(code) if code & USAGE_ERROR_BIT != 0 => Err(MiningError::lint(format!(
            "pylint usage error (exit {}): {}",
            code,
            stderr.trim()
        ))),
        Some(code) if stdout.trim().is_empty() => Err(MiningError::lint(format!(
            "pylint failed with exit {} and no output: {}",
            code,
            stderr.trim()
        ))),
        Some(_) => Ok(()),
    }
}

/// Parse pylint's `json2` report or a bare `json` message list; empty output means no messages
pub fn parse_pylint_output(output: &str) -> MiningResult<PylintOutput> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(PylintOutput::default());
    }
    let raw: RawPylintOutput = serde_json::from_str(trimmed)
        .map_err(|e| MiningError::lint(format!("Unreadable pylint output: {}", e)))?;
    Ok(match raw {
        RawPylintOutput::Messages(diagnostics) => PylintOutput {
            diagnostics,
            statistics: None,
        },
        RawPylintOutput::Report { messages, statistics } => PylintOutput {
            diagnostics: messages,
            statistics,
        },
    })
}

/// Pull the complexity value out of a `too-complex` message:
/// the first whitespace-separated token made only of digits.
pub fn mccabe_complexity(message: &str) -> Option<u32> {
    message
        .split_whitespace()
        .find(|token| !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()))
        .and_then(|token| token.parse().ok())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageIdCount {
    pub count: u64,
    pub symbol: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryMessages {
    pub total: u64,
    pub message_ids: BTreeMap<String, MessageIdCount>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleMessages {
    pub total_messages: u64,
    pub categories: BTreeMap<String, CategoryMessages>,
}

/// Snapshot-wide lint statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LintStats {
    pub by_category: BTreeMap<String, u64>,
    pub total_messages: u64,
    pub avg_mccabe_complexity: f64,
    /// Distinct modules that produced at least one message
    pub modules_with_messages: usize,
    /// Modules pylint linted; the number of files handed to it when pylint reports no count
    pub modules_linted: usize,
    pub files_linted: usize,
    /// pylint's global score out of 10
    pub global_score: Option<f64>,
}

/// Lint diagnostics of one snapshot, grouped module -> category -> message id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LintReport {
    pub messages: BTreeMap<String, ModuleMessages>,
    pub stats: LintStats,
}

impl LintReport {
    pub fn from_run(run: &LintRun) -> Self {
        let mut messages: BTreeMap<String, ModuleMessages> = BTreeMap::new();
        let mut by_category: BTreeMap<String, u64> =
            LINT_CATEGORIES.iter().map(|c| (c.to_string(), 0)).collect();
        let mut complexities = Vec::new();

        for diagnostic in &run.diagnostics {
            let module = messages.entry(diagnostic.module.clone()).or_default();
            module.total_messages += 1;

            let category = module.categories.entry(diagnostic.category.clone()).or_default();
            category.total += 1;
            category
                .message_ids
                .entry(diagnostic.message_id.clone())
                .or_insert_with(|| MessageIdCount {
                    count: 0,
                    symbol: diagnostic.symbol.clone(),
                })
                .count += 1;

            *by_category.entry(diagnostic.category.clone()).or_insert(0) += 1;

            if diagnostic.symbol == TOO_COMPLEX_SYMBOL {
                match mccabe_complexity(&diagnostic.message) {
                    Some(value) => complexities.push(value),
                    None => warn!("No complexity value in message: {}", diagnostic.message),
                }
            }
        }

        let avg_mccabe_complexity = if complexities.is_empty() {
            0.0
        } else {
            complexities.iter().map(|&c| f64::from(c)).sum::<f64>() / complexities.len() as f64
        };

        let modules: BTreeSet<&str> = run.diagnostics.iter().map(|d| d.module.as_str()).collect();
        let modules_linted = run
            .statistics
            .as_ref()
            .map(|statistics| statistics.modules_linted)
            .unwrap_or(run.files_linted);

        Self {
            stats: LintStats {
                by_category,
                total_messages: run.diagnostics.len() as u64,
                avg_mccabe_complexity,
                modules_with_messages: modules.len(),
                modules_linted,
                files_linted: run.files_linted,
                global_score: run.statistics.as_ref().and_then(|statistics| statistics.score),
            },
            messages,
        }
    }

    /// Number of messages in a category across all modules
    pub fn category_total(&self, category: &str) -> u64 {
        self.stats.by_category.get(category).copied().unwrap_or(0)
    }
}
