mod cli;
mod config;
mod detect;
mod ingest;
mod logging;
mod query;
mod review;
mod run;
mod scripts;

use anyhow::Result;
use clap::Parser;

use crate::cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let verbose = if cli.verbose {
        true
    } else {
        logging::env_flag()
    };
    logging::init(verbose);
    match cli.command {
        Command::Run { config } => run::run_from_config(&config).await,
        Command::Analyze(args) => run::analyze(args).await,
        Command::Index(args) => ingest::run(args).await,
        Command::Query(args) => query::run(args).await,
    }
}
