use anyhow::Result;
use clap::{Args as ClapArgs, Parser, Subcommand};
use log::debug;
use std::path::PathBuf;

/// Mine the commit history of Python repositories
#[derive(Parser, Debug)]
#[command(name = "repo-miner")]
#[command(about = "Mine commit histories of Python repositories for lint, test and process metrics")]
#[command(version)]
pub struct Args {
    /// Verbose output (debug level logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet output (error level logging only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Debug output (trace level logging)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log format: text or json
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// Log file path for file output
    #[arg(long, value_name = "FILE", global = true)]
    pub log_file: Option<PathBuf>,

    /// Log level for file output (independent of console level)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_file_level: Option<String>,

    /// Configuration file path
    #[arg(long, value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Configuration section name
    #[arg(long, value_name = "SECTION", global = true)]
    pub config_name: Option<String>,

    /// Disable coloured output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyse every commit of each repository and merge the results into the output directory
    Mine(MineArgs),
    /// Clone repositories into the repositories directory without analysing them
    Clone(RepositoryArgs),
    /// Turn a raw stargazer dump into cumulative stars per day
    Stargazers(StargazersArgs),
}

/// Where the repository list comes from
#[derive(ClapArgs, Debug, Default, Clone)]
pub struct RepositoryArgs {
    /// File with one repository URL or path per line
    #[arg(long, value_name = "FILE")]
    pub repos_file: Option<PathBuf>,

    /// Directory holding local clones
    #[arg(long, value_name = "DIR")]
    pub repositories_dir: Option<PathBuf>,

    /// Repository URLs or local paths (takes precedence over --repos-file)
    #[arg(value_name = "REPOSITORY")]
    pub repositories: Vec<String>,
}

#[derive(ClapArgs, Debug, Default, Clone)]
pub struct MineArgs {
    #[command(flatten)]
    pub source: RepositoryArgs,

    /// Run the linter on each snapshot (default)
    #[arg(long, overrides_with = "no_lint")]
    pub lint: bool,

    /// Skip lint analysis
    #[arg(long)]
    pub no_lint: bool,

    /// Classify test and production statements (default)
    #[arg(long, overrides_with = "no_tests")]
    pub tests: bool,

    /// Skip test analysis
    #[arg(long)]
    pub no_tests: bool,

    /// Compute git process metrics (default)
    #[arg(long, overrides_with = "no_git")]
    pub git: bool,

    /// Skip git process metrics
    #[arg(long)]
    pub no_git: bool,

    /// Number of repositories per chunk
    #[arg(long, value_name = "N")]
    pub chunk_size: Option<usize>,

    /// Process the repositories of a chunk in parallel
    #[arg(long)]
    pub parallel: bool,

    /// Worker threads for parallel processing
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,

    /// Remove cloned repositories after their chunk
    #[arg(long)]
    pub no_persist: bool,

    /// Run directory to merge results into (reused as-is when given again)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Time limit per snapshot in seconds
    #[arg(long, value_name = "SECONDS")]
    pub snapshot_timeout: Option<u64>,

    /// Only analyse the newest N commits of each repository
    #[arg(long, value_name = "N")]
    pub max_commits: Option<usize>,
}

impl MineArgs {
    pub fn lint_enabled(&self) -> bool {
        !self.no_lint
    }

    pub fn tests_enabled(&self) -> bool {
        !self.no_tests
    }

    pub fn git_enabled(&self) -> bool {
        !self.no_git
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StargazersArgs {
    /// Raw stargazer dump: repository -> GraphQL response
    #[arg(long, value_name = "FILE")]
    pub input: PathBuf,

    /// Directory for the cleaned and over-time files (defaults to the input's directory)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

/// Parse command line arguments
pub fn parse_args() -> Args {
    let args = Args::parse();
    debug!("Parsed CLI arguments: {:?}", args);
    args
}

/// Validate CLI argument combinations
pub fn validate_args(args: &Args) -> Result<()> {
    let log_flags_count = [args.verbose, args.quiet, args.debug]
        .iter()
        .filter(|&&flag| flag)
        .count();

    if log_flags_count > 1 {
        return Err(anyhow::anyhow!(
            "Conflicting log level flags: only one of --verbose, --quiet, or --debug may be specified"
        ));
    }

    match args.log_format.to_lowercase().as_str() {
        "text" | "json" => {}
        _ => {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}'. Valid options: text, json",
                args.log_format
            ))
        }
    }

    if let Some(ref level) = args.log_file_level {
        match level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" | "off" => {}
            _ => {
                return Err(anyhow::anyhow!(
                    "Invalid log file level '{}'. Valid levels: error, warn, info, debug, trace, off",
                    level
                ))
            }
        }
    }

    if args.log_file_level.is_some() && args.log_file.is_none() {
        return Err(anyhow::anyhow!("--log-file-level requires --log-file to be specified"));
    }

    if let Command::Mine(mine) = &args.command {
        if mine.chunk_size == Some(0) {
            return Err(anyhow::anyhow!("--chunk-size must be at least 1"));
        }
        if mine.max_workers == Some(0) {
            return Err(anyhow::anyhow!("--max-workers must be at least 1"));
        }
        if !(mine.lint_enabled() || mine.tests_enabled() || mine.git_enabled()) {
            return Err(anyhow::anyhow!("Nothing to do: --no-lint, --no-tests and --no-git are all set"));
        }
    }

    Ok(())
}
