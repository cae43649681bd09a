mod cli;
mod config;
mod logging;
mod run;

use std::process::ExitCode;

use clap::Parser;
use folio_logging::folio_error;
use log::LevelFilter;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    logging::initialize(cli.log, &cli.log_file, level);

    match run::run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            folio_error!("{:#}", err);
            eprintln!("folio: {err:#}");
            ExitCode::from(2)
        }
    }
}
