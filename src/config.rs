//! Configuration file handling
//!
//! TOML files are discovered in a fixed order and flattened into
//! `section -> key -> string`. Lookups fall back to the `[base]` section, and
//! `--config-name` selects a section that overrides everything else.
//! [`MiningConfig`] is the typed view of the `[mining]` and `[filters]`
//! sections used by the pipeline.

use anyhow::{Context, Result};
use log::{debug, info};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use toml::Value;

use crate::error::{MiningError, MiningResult};
use crate::mining::files::{DEFAULT_EXCLUDED_DIRS, DEFAULT_IGNORE_PREFIXES, DEFAULT_LARGE_SNAPSHOT_THRESHOLD};
use crate::mining::DEFAULT_TEST_MODULES;

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "REPO_MINER_CONFIG";

/// Configuration storage - section_name -> key -> value
pub type Configuration = HashMap<String, HashMap<String, String>>;

/// Configuration manager
#[derive(Debug, Default)]
pub struct ConfigManager {
    config: Configuration,
    config_file_path: Option<PathBuf>,
    selected_section: Option<String>,
}

impl ConfigManager {
    /// Create a new ConfigManager from a Configuration (primarily for testing)
    pub fn from_config(config: Configuration) -> Self {
        Self {
            config,
            config_file_path: None,
            selected_section: None,
        }
    }

    /// Load configuration using the discovery hierarchy
    pub fn load() -> Result<Self> {
        debug!("Starting configuration discovery");

        for path in discover_config_files() {
            debug!("Attempting to load config from: {}", path.display());
            if path.exists() {
                return Self::load_from_file(path);
            }
        }

        info!("No configuration file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from an explicit file path
    pub fn load_from_file(path: PathBuf) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = parse_toml_config(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        info!("Loaded configuration from: {}", path.display());
        Ok(Self {
            config,
            config_file_path: Some(path),
            selected_section: None,
        })
    }

    /// File the configuration came from, if any
    pub fn config_file_path(&self) -> Option<&PathBuf> {
        self.config_file_path.as_ref()
    }

    /// Get value with fallback: selected section, then `section`, then `[base]`
    pub fn get_value(&self, section: &str, key: &str) -> Option<&String> {
        if let Some(selected) = &self.selected_section {
            if let Some(value) = self.config.get(selected).and_then(|s| s.get(key)) {
                return Some(value);
            }
        }

        if let Some(value) = self.config.get(section).and_then(|s| s.get(key)) {
            return Some(value);
        }

        self.config.get("base").and_then(|s| s.get(key))
    }

    /// Select configuration section for --config-name
    pub fn select_section(&mut self, section: String) {
        debug!("Selecting configuration section: {}", section);
        self.selected_section = Some(section);
    }

    pub fn get_bool(&self, section: &str, key: &str) -> Result<Option<bool>> {
        match self.get_value(section, key) {
            Some(value) => match value.to_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(anyhow::anyhow!("Invalid boolean value for {}.{}: {}", section, key, value)),
            },
            None => Ok(None),
        }
    }

    pub fn get_usize(&self, section: &str, key: &str) -> Result<Option<usize>> {
        self.get_value(section, key)
            .map(|value| {
                value
                    .parse::<usize>()
                    .with_context(|| format!("Invalid number for {}.{}: {}", section, key, value))
            })
            .transpose()
    }

    pub fn get_log_level(&self, section: &str, key: &str) -> Result<Option<log::LevelFilter>> {
        match self.get_value(section, key) {
            Some(value) => Ok(Some(crate::logging::parse_log_level(value)?)),
            None => Ok(None),
        }
    }

    pub fn get_path(&self, section: &str, key: &str) -> Option<PathBuf> {
        self.get_value(section, key).map(PathBuf::from)
    }

    /// Comma-separated list; TOML arrays are stored in this form
    pub fn get_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.get_value(section, key).map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// Typed mining settings from `[mining]` and `[filters]`
    pub fn mining_config(&self) -> Result<MiningConfig> {
        let mut config = MiningConfig::default();

        if let Some(path) = self.get_path("mining", "repositories-dir") {
            config.repositories_dir = path;
        }
        if let Some(path) = self.get_path("mining", "output-dir") {
            config.output_dir = path;
        }
        if let Some(path) = self.get_path("mining", "repos-file") {
            config.repos_file = path;
        }
        if let Some(size) = self.get_usize("mining", "chunk-size")? {
            config.chunk_size = size;
        }
        if let Some(parallel) = self.get_bool("mining", "parallel")? {
            config.parallel = parallel;
        }
        if let Some(workers) = self.get_usize("mining", "max-workers")? {
            config.max_workers = workers;
        }
        if let Some(persist) = self.get_bool("mining", "persist-repos")? {
            config.persist_repos = persist;
        }
        if let Some(secs) = self.get_usize("mining", "snapshot-timeout-secs")? {
            config.snapshot_timeout = (secs > 0).then(|| Duration::from_secs(secs as u64));
        }
        if let Some(threshold) = self.get_usize("mining", "large-snapshot-threshold")? {
            config.large_snapshot_threshold = threshold;
        }
        if let Some(command) = self.get_value("mining", "pylint-command") {
            config.pylint_command = command.clone();
        }
        if let Some(rcfile) = self.get_path("mining", "pylint-rcfile") {
            config.pylint_rcfile = Some(rcfile);
        }
        if let Some(max) = self.get_usize("mining", "max-commits")? {
            config.max_commits = Some(max);
        }

        if let Some(dirs) = self.get_list("filters", "exclude-dirs") {
            config.exclude_dirs = dirs;
        }
        if let Some(prefixes) = self.get_list("filters", "ignore-prefixes") {
            config.ignore_prefixes = prefixes;
        }
        if let Some(modules) = self.get_list("filters", "test-modules") {
            config.test_modules = modules;
        }

        Ok(config)
    }
}

/// Settings of a mining run
#[derive(Debug, Clone, PartialEq)]
pub struct MiningConfig {
    pub repositories_dir: PathBuf,
    pub output_dir: PathBuf,
    pub repos_file: PathBuf,
    pub chunk_size: usize,
    pub parallel: bool,
    pub max_workers: usize,
    pub persist_repos: bool,
    pub snapshot_timeout: Option<Duration>,
    pub large_snapshot_threshold: usize,
    pub pylint_command: String,
    pub pylint_rcfile: Option<PathBuf>,
    pub exclude_dirs: Vec<String>,
    pub ignore_prefixes: Vec<String>,
    pub test_modules: Vec<String>,
    pub max_commits: Option<usize>,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            repositories_dir: PathBuf::from("out/repositories"),
            output_dir: PathBuf::from("out/data"),
            repos_file: PathBuf::from("repos.txt"),
            chunk_size: 1,
            parallel: false,
            max_workers: num_cpus::get(),
            persist_repos: true,
            snapshot_timeout: None,
            large_snapshot_threshold: DEFAULT_LARGE_SNAPSHOT_THRESHOLD,
            pylint_command: "pylint".to_string(),
            pylint_rcfile: None,
            exclude_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|s| s.to_string()).collect(),
            ignore_prefixes: DEFAULT_IGNORE_PREFIXES.iter().map(|s| s.to_string()).collect(),
            test_modules: DEFAULT_TEST_MODULES.iter().map(|s| s.to_string()).collect(),
            max_commits: None,
        }
    }
}

impl MiningConfig {
    pub fn validate(&self) -> MiningResult<()> {
        if self.chunk_size == 0 {
            return Err(MiningError::configuration("chunk-size must be at least 1"));
        }
        if self.max_workers == 0 {
            return Err(MiningError::configuration("max-workers must be at least 1"));
        }
        if self.test_modules.is_empty() {
            return Err(MiningError::configuration("test-modules must name at least one module"));
        }
        if self.max_commits == Some(0) {
            return Err(MiningError::configuration("max-commits must be at least 1"));
        }
        Ok(())
    }
}

/// Configuration files in order of precedence
fn discover_config_files() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        paths.push(PathBuf::from(env_path));
    }
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("repo-miner").join("config.toml"));
    }
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".repo-miner.toml"));
    }
    paths.push(PathBuf::from("./.repo-miner.toml"));

    debug!("Config discovery paths: {:?}", paths);
    paths
}

fn parse_toml_config(content: &str) -> Result<Configuration> {
    let toml_value: Value = content.parse().context("Failed to parse TOML content")?;

    let mut config = Configuration::new();
    if let Value::Table(table) = toml_value {
        flatten_toml_table(&table, String::new(), &mut config);
    }
    Ok(config)
}

/// Flatten nested tables into `section.subsection` names
fn flatten_toml_table(table: &toml::Table, prefix: String, config: &mut Configuration) {
    for (key, value) in table {
        let section_name = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        match value {
            Value::Table(subtable) if subtable.values().any(|v| matches!(v, Value::Table(_))) => {
                flatten_toml_table(subtable, section_name, config);
            }
            Value::Table(subtable) => {
                let section = subtable
                    .iter()
                    .map(|(k, v)| (k.clone(), toml_value_to_string(v)))
                    .collect();
                config.insert(section_name, section);
            }
            _ => {
                config
                    .entry(prefix.clone())
                    .or_default()
                    .insert(key.clone(), toml_value_to_string(value));
            }
        }
    }
}

fn toml_value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Integer(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Array(items) => items.iter().map(toml_value_to_string).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_toml_value_to_string_conversion() {
        assert_eq!(toml_value_to_string(&Value::String("out".to_string())), "out");
        assert_eq!(toml_value_to_string(&Value::Integer(42)), "42");
        assert_eq!(toml_value_to_string(&Value::Boolean(false)), "false");
        let array = Value::Array(vec![Value::String("venv".into()), Value::String("build".into())]);
        assert_eq!(toml_value_to_string(&array), "venv,build");
    }

    #[test]
    fn test_parse_sections() {
        let config = parse_toml_config(
            r#"
[base]
log-format = "json"

[mining]
chunk-size = 4
parallel = true

[profiles.ci]
max-commits = 50
"#,
        )
        .unwrap();

        assert_eq!(config["base"]["log-format"], "json");
        assert_eq!(config["mining"]["chunk-size"], "4");
        assert_eq!(config["profiles.ci"]["max-commits"], "50");
    }

    #[test]
    fn test_value_fallback_and_selection() {
        let mut config = Configuration::new();
        config.insert("base".to_string(), HashMap::from([("parallel".to_string(), "false".to_string())]));
        config.insert("mining".to_string(), HashMap::from([("chunk-size".to_string(), "2".to_string())]));
        config.insert("fast".to_string(), HashMap::from([("chunk-size".to_string(), "8".to_string())]));

        let mut manager = ConfigManager::from_config(config);
        assert_eq!(manager.get_value("mining", "parallel").unwrap(), "false");
        assert_eq!(manager.get_value("mining", "chunk-size").unwrap(), "2");

        manager.select_section("fast".to_string());
        assert_eq!(manager.get_value("mining", "chunk-size").unwrap(), "8");
    }

    #[test]
    fn test_mining_config_defaults() {
        let config = ConfigManager::default().mining_config().unwrap();
        assert_eq!(config.chunk_size, 1);
        assert!(!config.parallel);
        assert!(config.persist_repos);
        assert_eq!(config.large_snapshot_threshold, 1000);
        assert_eq!(config.test_modules, vec!["unittest", "pytest", "nose2"]);
        assert!(config.max_workers >= 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mining_config_from_file() {
        let temp_file = NamedTempFile::new().unwrap();
        fs::write(
            &temp_file,
            r#"
[mining]
output-dir = "/tmp/miner-out"
chunk-size = 3
parallel = true
max-workers = 2
persist-repos = false
snapshot-timeout-secs = 120
max-commits = 25

[filters]
exclude-dirs = ["docs", "examples"]
test-modules = ["pytest"]
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_from_file(temp_file.path().to_path_buf()).unwrap();
        let config = manager.mining_config().unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/tmp/miner-out"));
        assert_eq!(config.chunk_size, 3);
        assert!(config.parallel);
        assert_eq!(config.max_workers, 2);
        assert!(!config.persist_repos);
        assert_eq!(config.snapshot_timeout, Some(Duration::from_secs(120)));
        assert_eq!(config.max_commits, Some(25));
        assert_eq!(config.exclude_dirs, vec!["docs", "examples"]);
        assert_eq!(config.test_modules, vec!["pytest"]);
        assert_eq!(manager.config_file_path().unwrap(), temp_file.path());
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let mut config = Configuration::new();
        config.insert("mining".to_string(), HashMap::from([("chunk-size".to_string(), "many".to_string())]));
        assert!(ConfigManager::from_config(config).mining_config().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_settings() {
        let mut config = MiningConfig::default();
        config.chunk_size = 0;
        assert!(config.validate().unwrap_err().is_fatal());

        let mut config = MiningConfig::default();
        config.test_modules.clear();
        assert!(config.validate().is_err());

        let mut config = MiningConfig::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());
    }
}
