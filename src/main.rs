//! CLI entry point for the download manager.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use download_manager::{
    CompletionListener, DownloadManager, DownloadState, ItemState, ManagerOptions,
};
use tracing::{debug, info, warn};

mod app_config;
mod cli;

use app_config::{FileConfig, load_config};
use cli::Args;

/// How often progress is logged while downloads run.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let loaded = load_config(args.config.as_deref())?;
    if loaded.loaded_from_file
        && let Some(path) = &loaded.path
    {
        debug!(path = %path.display(), "loaded config file");
    }
    let options = build_options(&args, loaded.config);

    std::fs::create_dir_all(&options.download_dir).with_context(|| {
        format!(
            "Failed to create download directory '{}'",
            options.download_dir.display()
        )
    })?;

    let manager = DownloadManager::new(options).context("Failed to start download manager")?;
    info!(
        urls = args.urls.len(),
        threads = manager.threads_count(),
        dir = %manager.download_dir().display(),
        "Download manager starting"
    );

    let mut rejected = 0usize;
    for url in &args.urls {
        match manager.add(url, Some(completion_logger(url))) {
            Ok(item) => debug!(item_id = item.id, file = %item.file.display(), "queued"),
            Err(e) => {
                warn!(url = %url, error = %e, "Could not queue download");
                rejected += 1;
            }
        }
    }

    let signal_manager = manager.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping all downloads");
            signal_manager.stop_all();
        }
    });

    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    let state = loop {
        ticker.tick().await;
        let state = manager.get_state();
        if state.all_terminal() {
            break state;
        }
        info!(
            received = state.received,
            total = %state.total,
            active = state.count(ItemState::Started),
            queued = state.count(ItemState::New),
            "Downloading"
        );
    };

    manager.shutdown().await;

    info!(
        done = state.count(ItemState::Done),
        failed = state.count(ItemState::Error),
        stopped = state.count(ItemState::Stopped),
        received = state.received,
        "Download complete"
    );

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&state).context("Failed to serialize summary")?
        );
    } else {
        print_summary(&state);
    }

    if rejected > 0 || state.count(ItemState::Error) > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Merges CLI flags over config file values over library defaults.
fn build_options(args: &Args, file: FileConfig) -> ManagerOptions {
    let defaults = ManagerOptions::default();
    ManagerOptions {
        threads: args
            .threads
            .map(usize::from)
            .or(file.threads)
            .unwrap_or(defaults.threads),
        download_dir: args
            .download_dir
            .clone()
            .or(file.download_dir)
            .unwrap_or(defaults.download_dir),
        user_agent: args
            .user_agent
            .clone()
            .or(file.user_agent)
            .unwrap_or(defaults.user_agent),
        redirect_limit: args
            .max_redirects
            .or(file.redirect_limit)
            .unwrap_or(defaults.redirect_limit),
        connect_timeout_secs: file
            .connect_timeout_secs
            .unwrap_or(defaults.connect_timeout_secs),
        read_timeout_secs: file
            .read_timeout_secs
            .unwrap_or(defaults.read_timeout_secs),
    }
}

fn completion_logger(url: &str) -> CompletionListener {
    let url = url.to_string();
    Arc::new(move |state: ItemState| match state {
        ItemState::Done => info!(url = %url, "Downloaded"),
        ItemState::Error => warn!(url = %url, "Download failed"),
        _ => debug!(url = %url, %state, "Download ended"),
    })
}

fn print_summary(state: &DownloadState) {
    for item in &state.items {
        let detail = match item.failure() {
            Some(error) => error.to_string(),
            None => format!("{} bytes", item.received),
        };
        println!(
            "#{:<3} {:<7}  {}  ({detail})",
            item.id,
            item.state.as_str(),
            item.file.display(),
        );
    }
}
