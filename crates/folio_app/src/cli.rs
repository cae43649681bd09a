use std::path::PathBuf;

use clap::Parser;
use url::Url;

use crate::logging::LogDestination;

/// Download image collections chapter by chapter.
#[derive(Debug, Parser)]
#[command(name = "folio", version)]
pub struct Cli {
    /// Collection or chapter pages to download.
    #[arg(required = true)]
    pub urls: Vec<Url>,

    /// Directory the collections are written under.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Pack each chapter into an archive instead of a folder.
    #[arg(long)]
    pub archive: bool,

    /// Guess image locations from two calibration pages instead of fetching every page.
    #[arg(long)]
    pub predict: bool,

    /// Only download the newest listed chapter.
    #[arg(long)]
    pub latest_only: bool,

    /// RON file with host rules, timeouts and selector overrides.
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = LogDestination::File)]
    pub log: LogDestination,

    #[arg(long, default_value = "folio.log")]
    pub log_file: PathBuf,

    /// Log at debug level.
    #[arg(short, long)]
    pub verbose: bool,
}
