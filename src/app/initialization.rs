//! Application initialization and configuration

use anyhow::{Context, Result};
use log::{debug, error, LevelFilter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::config::{ConfigManager, MiningConfig};
use crate::{cli, git, logging};

pub fn load_configuration(args: &cli::Args) -> Result<ConfigManager> {
    let mut manager = if let Some(config_file) = &args.config_file {
        debug!("Loading configuration from explicit file: {}", config_file.display());
        ConfigManager::load_from_file(config_file.clone())?
    } else {
        ConfigManager::load()?
    };

    if let Some(section_name) = &args.config_name {
        manager.select_section(section_name.clone());
    }

    Ok(manager)
}

/// Logging settings from the command line, falling back to `[base]`.
///
/// With `log-to-file = true` and no `--log-file`, lines also go to
/// `<output-dir>/logs/<run_name>.log`.
pub fn configure_logging(args: &cli::Args, config: &ConfigManager, run_name: &str) -> Result<logging::LogConfig> {
    let console_level = if args.debug {
        LevelFilter::Trace
    } else if args.verbose {
        LevelFilter::Debug
    } else if args.quiet {
        LevelFilter::Error
    } else {
        match config.get_log_level("base", "console-level") {
            Ok(Some(level)) => level,
            Ok(None) => LevelFilter::Info,
            Err(e) => {
                debug!("Invalid console-level in config, using default: {}", e);
                LevelFilter::Info
            }
        }
    };

    let format = if args.log_format != "text" {
        logging::LogFormat::from_str(&args.log_format).map_err(|e| anyhow::anyhow!(e))?
    } else {
        match config.get_value("base", "log-format") {
            Some(format_str) => logging::LogFormat::from_str(format_str).unwrap_or(logging::LogFormat::Text),
            None => logging::LogFormat::Text,
        }
    };

    let log_to_file = config.get_bool("base", "log-to-file")?.unwrap_or(false);
    let log_file_path = args
        .log_file
        .clone()
        .or_else(|| config.get_path("base", "log-file"))
        .or_else(|| {
            log_to_file.then(|| {
                let output_dir = config
                    .get_path("mining", "output-dir")
                    .unwrap_or_else(|| MiningConfig::default().output_dir);
                output_dir.join("logs").join(format!("{}.log", run_name))
            })
        });

    let file_log_level = match &args.log_file_level {
        Some(level_str) => Some(logging::parse_log_level(level_str)?),
        None => match config.get_log_level("base", "file-log-level") {
            Ok(level) => level,
            Err(e) => {
                debug!("Invalid file-log-level in config, using None: {}", e);
                None
            }
        },
    };

    let (destination, file_level) = match (log_file_path, file_log_level) {
        (Some(file_path), level) => (logging::LogDestination::Both(file_path), Some(level.unwrap_or(console_level))),
        (None, None) => (logging::LogDestination::Console, None),
        (None, Some(_)) => {
            error!("Log file level specified without log file");
            return Err(anyhow::anyhow!("Log file level specified without log file"));
        }
    };

    Ok(logging::LogConfig {
        console_level,
        file_level,
        format,
        destination,
    })
}

/// Mining settings: configuration file values overridden by `mine` flags
pub fn resolve_mining_config(args: &cli::MineArgs, config: &ConfigManager) -> Result<MiningConfig> {
    let mut mining = config.mining_config().context("Invalid [mining] or [filters] configuration")?;
    apply_repository_args(&args.source, &mut mining);

    if let Some(size) = args.chunk_size {
        mining.chunk_size = size;
    }
    if args.parallel {
        mining.parallel = true;
    }
    if let Some(workers) = args.max_workers {
        mining.max_workers = workers;
    }
    if args.no_persist {
        mining.persist_repos = false;
    }
    if let Some(secs) = args.snapshot_timeout {
        mining.snapshot_timeout = (secs > 0).then(|| Duration::from_secs(secs));
    }
    if let Some(max) = args.max_commits {
        mining.max_commits = Some(max);
    }

    mining.validate()?;
    debug!("Mining configuration: {:?}", mining);
    Ok(mining)
}

pub fn apply_repository_args(args: &cli::RepositoryArgs, mining: &mut MiningConfig) {
    if let Some(dir) = &args.repositories_dir {
        mining.repositories_dir = dir.clone();
    }
    if let Some(file) = &args.repos_file {
        mining.repos_file = file.clone();
    }
}

/// Repositories named on the command line, or else those listed in the repos file
pub fn collect_repositories(args: &cli::RepositoryArgs, repos_file: &Path) -> Result<Vec<String>> {
    if !args.repositories.is_empty() {
        return Ok(args.repositories.iter().map(|r| git::sanitize_url(r)).collect());
    }
    git::read_repository_list(repos_file)
        .with_context(|| format!("Failed to read repository list: {}", repos_file.display()))
}

/// Run directory for a mining run: an explicit `--output-dir` is used as given
pub fn run_directory(args: &cli::MineArgs, mining: &MiningConfig, run_name: &str) -> PathBuf {
    match &args.output_dir {
        Some(dir) => dir.clone(),
        None => mining.output_dir.join(run_name),
    }
}
