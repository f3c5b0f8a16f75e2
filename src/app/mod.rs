//! Application orchestration module

pub mod execution;
pub mod initialization;

use anyhow::Result;
use chrono::Local;
use log::info;
use std::io::IsTerminal;

use crate::cli::{Args, Command};
use crate::config::ConfigManager;
use crate::mining::AnalysisKinds;
use crate::output::{format_run_summary, run_directory_name};

pub use execution::{run_clone, run_mining, run_stargazers, write_series, MiningRun};
pub use initialization::{configure_logging, load_configuration, resolve_mining_config};

/// Dispatch a parsed command line
pub fn execute(args: &Args, config: &ConfigManager, run_name: &str) -> Result<()> {
    match &args.command {
        Command::Mine(mine) => {
            let mining = resolve_mining_config(mine, config)?;
            let repositories = initialization::collect_repositories(&mine.source, &mining.repos_file)?;
            let run_directory = initialization::run_directory(mine, &mining, run_name);

            let run = MiningRun::new(mining, repositories, run_directory)
                .with_kinds(AnalysisKinds {
                    lint: mine.lint_enabled(),
                    tests: mine.tests_enabled(),
                })
                .with_git_metrics(mine.git_enabled());

            let outcomes = run_mining(&run)?;
            let use_color = !args.no_color && std::io::stdout().is_terminal();
            print!("{}", format_run_summary(&outcomes, use_color));
            info!("Results written to {}", run.writer().directory().display());
            Ok(())
        }
        Command::Clone(source) => {
            let mut mining = config.mining_config()?;
            initialization::apply_repository_args(source, &mut mining);
            let repositories = initialization::collect_repositories(source, &mining.repos_file)?;
            for path in run_clone(&mining.repositories_dir, &repositories)? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Command::Stargazers(stars) => {
            let output_dir = match &stars.output_dir {
                Some(dir) => dir.clone(),
                None => stars
                    .input
                    .parent()
                    .map(|parent| parent.to_path_buf())
                    .unwrap_or_default(),
            };
            run_stargazers(&stars.input, &output_dir)?;
            Ok(())
        }
    }
}

/// Name shared by the run directory and the default log file
pub fn current_run_name() -> String {
    run_directory_name(&Local::now())
}
