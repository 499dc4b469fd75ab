//! Foreground indexing daemon.
//!
//! `run` serves the control socket while one indexing pass walks the
//! repository; `monitor` attaches to a running daemon and renders its
//! progress. The supervisor in the host process launches this binary
//! with the repository id and credentials in the environment.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use snapsearch::config::{Paths, RepoCatalog, Repository, Settings, ENV_REPOSITORY};
use snapsearch::daemon::{ControlClient, ControlServer};
use snapsearch::index::{IndexStats, ManifestIndexer, RepositoryIndexer};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snapsearchd")]
#[command(about = "Indexing daemon for snapsearch")]
struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one indexing pass with the control socket up
    Run {
        /// Reindex even when the manifest is already up to date
        #[arg(short, long)]
        force: bool,
    },
    /// Attach to a running daemon and show its progress
    Monitor,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = Paths::resolve(cli.data_dir.as_deref())?;

    match cli.command {
        Commands::Run { force } => run(&paths, force),
        Commands::Monitor => monitor(&paths),
    }
}

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("SNAPSEARCH_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("info"),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

fn run(paths: &Paths, force: bool) -> Result<()> {
    let settings = Settings::load(paths)?;
    let repo = select_repository(&settings)?;
    info!(repository = %repo.id, source = %repo.source.display(), "starting indexing run");

    let indexer = ManifestIndexer::new(&repo.source, paths.manifest_file(&repo.id));
    if !force && !indexer.needs_run()? {
        println!("Index is up to date.");
        return Ok(());
    }

    let server = ControlServer::new(paths.socket_file());
    let accept = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };

    // Give the control socket a moment to bind; a second daemon or a
    // bad socket path surfaces here instead of after a full run.
    thread::sleep(Duration::from_millis(100));
    if accept.is_finished() {
        return match accept.join() {
            Ok(result) => result.and(Err(anyhow!("control server exited early"))),
            Err(_) => Err(anyhow!("control server thread panicked")),
        };
    }

    let progress = {
        let server = Arc::clone(&server);
        move |stats: &IndexStats| server.record_stats(stats)
    };
    let outcome = indexer.run(&progress, server.cancel_token());

    server.initiate_shutdown();
    match accept.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, "control server exited with an error"),
        Err(_) => warn!("control server thread panicked"),
    }

    match outcome {
        Ok(stats) => {
            println!(
                "Indexed {} of {} files ({} errors).",
                stats.indexed_files, stats.scanned_files, stats.errors
            );
            Ok(())
        }
        Err(err) if err.is_cancelled() => {
            println!("Indexing cancelled.");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

/// The repository named in the environment, falling back to the
/// preferred one from the settings.
fn select_repository(settings: &Settings) -> Result<Repository> {
    if let Ok(id) = std::env::var(ENV_REPOSITORY) {
        return settings
            .repositories
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .with_context(|| format!("repository '{id}' is not configured"));
    }
    settings
        .preferred()
        .context("no repository configured; add one with 'snapsearch repo add'")
}

fn monitor(paths: &Paths) -> Result<()> {
    let client = ControlClient::new(paths.socket_file());
    if !client.ping() {
        bail!("daemon is not running");
    }

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(80));

    loop {
        match client.stats() {
            Ok(stats) => spinner.set_message(render_stats(&stats)),
            Err(_) => break,
        }
        thread::sleep(Duration::from_millis(200));
    }

    spinner.finish_with_message("Daemon exited.");
    Ok(())
}

fn render_stats(stats: &IndexStats) -> String {
    let total = stats.total_snapshots.max(1);
    let current = (stats.scanned_snapshots + 1).min(total);
    match stats.current_snapshot_percent() {
        Some(pct) => format!(
            "Snapshot {current}/{total}: {pct}% ({}/{} files)",
            stats.current_snapshot_files, stats.current_snapshot_total_files
        ),
        None => format!(
            "Snapshot {current}/{total}: {} files scanned",
            stats.scanned_files
        ),
    }
}
