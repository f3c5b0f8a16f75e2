//! Run logging
//!
//! A `log::Log` implementation shared by every worker thread. Lines carry the
//! module target so that a failure can be traced back to the repository,
//! commit or file being processed. Text and JSON-lines formats are supported,
//! written to stderr, a log file, or both, each with its own level.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use log::{Level, LevelFilter};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(format!("Invalid log format: {}. Valid options: text, json", s)),
        }
    }
}

/// Where log lines go
#[derive(Debug, Clone, PartialEq)]
pub enum LogDestination {
    Console,
    File(PathBuf),
    Both(PathBuf),
}

impl LogDestination {
    fn file_path(&self) -> Option<&Path> {
        match self {
            LogDestination::Console => None,
            LogDestination::File(path) | LogDestination::Both(path) => Some(path),
        }
    }

    fn includes_console(&self) -> bool {
        !matches!(self, LogDestination::File(_))
    }
}

/// One JSON log line
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonLogEntry {
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub console_level: LevelFilter,
    pub file_level: Option<LevelFilter>,
    pub format: LogFormat,
    pub destination: LogDestination,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            console_level: LevelFilter::Info,
            file_level: None,
            format: LogFormat::Text,
            destination: LogDestination::Console,
        }
    }
}

impl LogConfig {
    /// Highest level any destination will accept
    pub fn max_level(&self) -> LevelFilter {
        let console = if self.destination.includes_console() {
            self.console_level
        } else {
            LevelFilter::Off
        };
        match self.file_level {
            Some(file_level) if file_level > console => file_level,
            _ => console,
        }
    }
}

pub struct MinerLogger {
    config: LogConfig,
    file: Mutex<Option<File>>,
}

impl MinerLogger {
    /// Create a logger, opening the log file (and its directory) if one is configured
    pub fn new(config: LogConfig) -> Result<Self> {
        let file = match config.destination.file_path() {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
                }
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open log file: {}", path.display()))?;
                Some(file)
            }
            None => None,
        };

        Ok(Self {
            config,
            file: Mutex::new(file),
        })
    }

    fn format_timestamp() -> String {
        let now: DateTime<Local> = Local::now();
        now.format("%Y-%m-%d %H:%M:%S").to_string()
    }

    fn format_text_message(&self, level: Level, target: &str, message: &str) -> String {
        format!(
            "{} [{}] {}: {}",
            Self::format_timestamp(),
            level.to_string().to_uppercase(),
            target,
            message
        )
    }

    fn format_json_message(&self, level: Level, target: &str, message: &str) -> Result<String> {
        let entry = JsonLogEntry {
            timestamp: Self::format_timestamp(),
            level: level.to_string().to_uppercase(),
            target: target.to_string(),
            message: message.to_string(),
            detail: None,
        };
        serde_json::to_string(&entry).context("Failed to serialize log entry to JSON")
    }

    fn should_log_to_console(&self, level: Level) -> bool {
        self.config.destination.includes_console() && level <= self.config.console_level
    }

    fn should_log_to_file(&self, level: Level) -> bool {
        match self.config.file_level {
            Some(file_level) => self.config.destination.file_path().is_some() && level <= file_level,
            None => false,
        }
    }

    fn write_to_file(&self, line: &str) -> io::Result<()> {
        let mut guard = self.file.lock();
        match guard.as_mut() {
            Some(file) => writeln!(file, "{}", line),
            None => Ok(()),
        }
    }
}

impl log::Log for MinerLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.should_log_to_console(metadata.level()) || self.should_log_to_file(metadata.level())
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let level = record.level();
        let target = record.target();
        let message = record.args().to_string();

        let line = match self.config.format {
            LogFormat::Text => self.format_text_message(level, target, &message),
            LogFormat::Json => match self.format_json_message(level, target, &message) {
                Ok(json) => json,
                Err(e) => {
                    eprintln!("JSON formatting error: {}. Falling back to text format.", e);
                    self.format_text_message(level, target, &message)
                }
            },
        };

        if self.should_log_to_console(level) {
            let _ = writeln!(io::stderr(), "{}", line);
        }
        if self.should_log_to_file(level) {
            if let Err(e) = self.write_to_file(&line) {
                eprintln!("File logging error: {}", e);
            }
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
        if let Some(file) = self.file.lock().as_mut() {
            let _ = file.flush();
        }
    }
}

/// Install the global logger
pub fn init_logger(config: LogConfig) -> Result<()> {
    let max_level = config.max_level();
    let logger = MinerLogger::new(config)?;

    log::set_boxed_logger(Box::new(logger)).context("Failed to set global logger")?;
    log::set_max_level(max_level);
    Ok(())
}

/// Convert string to LevelFilter
pub fn parse_log_level(level_str: &str) -> Result<LevelFilter> {
    match level_str.to_lowercase().as_str() {
        "error" => Ok(LevelFilter::Error),
        "warn" => Ok(LevelFilter::Warn),
        "info" => Ok(LevelFilter::Info),
        "debug" => Ok(LevelFilter::Debug),
        "trace" => Ok(LevelFilter::Trace),
        "off" => Ok(LevelFilter::Off),
        _ => Err(anyhow::anyhow!(
            "Invalid log level: {}. Valid levels: error, warn, info, debug, trace, off",
            level_str
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;
    use tempfile::TempDir;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("text".parse::<LogFormat>().unwrap(), LogFormat::Text);
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("yaml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_log_level_parsing() {
        assert_eq!(parse_log_level("warn").unwrap(), LevelFilter::Warn);
        assert_eq!(parse_log_level("DEBUG").unwrap(), LevelFilter::Debug);
        assert_eq!(parse_log_level("off").unwrap(), LevelFilter::Off);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_text_line_includes_target() {
        let logger = MinerLogger::new(LogConfig::default()).unwrap();
        let line = logger.format_text_message(Level::Warn, "repo_miner::mining::history", "commit skipped");

        assert!(line.contains("[WARN] repo_miner::mining::history: commit skipped"));
        assert_eq!(line.chars().nth(4), Some('-'));
        assert_eq!(line.chars().nth(10), Some(' '));
    }

    #[test]
    fn test_json_line_fields() {
        let logger = MinerLogger::new(LogConfig::default()).unwrap();
        let line = logger.format_json_message(Level::Info, "repo_miner::git", "cloned").unwrap();

        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["level"], "INFO");
        assert_eq!(value["target"], "repo_miner::git");
        assert_eq!(value["message"], "cloned");
        assert!(value.get("detail").is_none());
    }

    #[test]
    fn test_max_level_takes_most_verbose_destination() {
        let config = LogConfig {
            console_level: LevelFilter::Warn,
            file_level: Some(LevelFilter::Debug),
            format: LogFormat::Text,
            destination: LogDestination::Both(PathBuf::from("run.log")),
        };
        assert_eq!(config.max_level(), LevelFilter::Debug);

        let file_only = LogConfig {
            console_level: LevelFilter::Trace,
            file_level: Some(LevelFilter::Info),
            format: LogFormat::Text,
            destination: LogDestination::File(PathBuf::from("run.log")),
        };
        assert_eq!(file_only.max_level(), LevelFilter::Info);
    }

    #[test]
    fn test_global_logger_installs_once() {
        let config = LogConfig {
            console_level: LevelFilter::Off,
            ..LogConfig::default()
        };
        assert!(init_logger(config.clone()).is_ok());
        assert!(init_logger(config).is_err());
    }

    #[test]
    fn test_file_destination_writes_lines() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("logs").join("run.log");
        let logger = MinerLogger::new(LogConfig {
            console_level: LevelFilter::Off,
            file_level: Some(LevelFilter::Info),
            format: LogFormat::Text,
            destination: LogDestination::File(path.clone()),
        })
        .unwrap();

        logger.log(
            &log::Record::builder()
                .args(format_args!("snapshot recorded"))
                .level(Level::Info)
                .target("repo_miner::mining")
                .build(),
        );
        logger.log(
            &log::Record::builder()
                .args(format_args!("too chatty"))
                .level(Level::Debug)
                .target("repo_miner::mining")
                .build(),
        );
        logger.flush();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("snapshot recorded"));
        assert!(!content.contains("too chatty"));
    }
}
