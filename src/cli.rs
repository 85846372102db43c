//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download files over HTTP concurrently.
///
/// Every URL is saved into the download directory under a name derived from
/// the URL; existing files are never overwritten (`name (2).ext`, ...).
/// Press Ctrl-C to stop all downloads; partial files are kept.
#[derive(Parser, Debug)]
#[command(name = "download-manager")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to download
    #[arg(required = true, value_name = "URL")]
    pub urls: Vec<String>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent downloads (1-100) [default: 4]
    #[arg(short = 't', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub threads: Option<u8>,

    /// Directory to save files into [default: ./downloads]
    #[arg(short = 'd', long = "dir", value_name = "DIR")]
    pub download_dir: Option<PathBuf>,

    /// User-Agent header sent with every request
    #[arg(long, value_name = "UA")]
    pub user_agent: Option<String>,

    /// Maximum redirects followed per attempt (0-50) [default: 5]
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=50))]
    pub max_redirects: Option<u32>,

    /// Config file to read instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Print the final summary as JSON
    #[arg(long)]
    pub json: bool,
}
