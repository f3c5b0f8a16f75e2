use anyhow::Result;
use log::error;
use std::process;

use repo_miner::{app, cli, logging};

fn main() {
    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::args::parse_args();
    cli::args::validate_args(&args)?;

    let config_manager = app::load_configuration(&args)?;
    let run_name = app::current_run_name();

    let log_config = app::configure_logging(&args, &config_manager, &run_name)?;
    logging::init_logger(log_config)?;

    app::execute(&args, &config_manager, &run_name)
}
