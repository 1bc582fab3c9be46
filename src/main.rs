// fryler - personal assistant daemon
// Main entry point

use anyhow::Result;
use clap::Parser;

use fryler::cli::{self, Cli, Command};
use fryler::config::load_config;
use fryler::logging::{self, LOG_FILE_NAME};
use fryler::monitoring;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        monitoring::log_fatal("fatal", &format!("{:#}", e));
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;

    // Only the daemon keeps a log file; other commands log to stderr
    let log_file = matches!(cli.command, Command::Daemon)
        .then(|| config.logs_dir().join(LOG_FILE_NAME));
    logging::init(cli.verbose, log_file.as_deref())?;
    monitoring::install_panic_hook();

    cli::run(cli, config).await
}
