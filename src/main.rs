use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use snapsearch::config::{Paths, RepoCatalog, Repository, Settings};
use snapsearch::daemon::{ControlClient, Supervisor, SupervisorOptions};
use snapsearch::download::{DownloadEvent, DownloadManager, DownloadRecord, DownloadStore};
use snapsearch::index::{ManifestIndex, SearchIndexClient};
use snapsearch::query::parse_query;
use std::path::PathBuf;
use std::sync::{mpsc, Arc, Mutex};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "snapsearch")]
#[command(about = "Search and fetch single files from snapshot backups")]
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
    /// Search the index
    Search {
        /// Query in the snapsearch query language
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Show how a query compiles to the engine syntax
    Parse {
        #[arg(trailing_var_arg = true, required = true)]
        query: Vec<String>,
    },
    /// Download a file by id
    Download {
        /// File id as printed by search
        id: String,

        /// Open the file once the download finishes
        #[arg(long)]
        open: bool,

        /// Copy the file into this directory once the download finishes
        #[arg(long, value_name = "DIR")]
        export: Option<PathBuf>,
    },
    /// List downloaded files, newest first
    Downloads,
    /// Remove a downloaded file and its record
    Remove {
        /// File id as printed by downloads
        id: String,
    },
    /// Manage configured repositories
    Repo {
        #[command(subcommand)]
        action: RepoAction,
    },
    /// Control the indexing daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand)]
enum RepoAction {
    /// Register a directory tree as a searchable repository
    Add {
        /// Stable repository id
        id: String,

        /// Root of the tree to index
        path: PathBuf,

        /// Human-readable name (defaults to the id)
        #[arg(long)]
        name: Option<String>,
    },
    /// Remove a repository from the settings
    Remove {
        /// Id of the repository to remove
        id: String,
    },
    /// List configured repositories
    List,
    /// Mark a repository as the preferred one
    Prefer {
        /// Id of the repository to prefer
        id: String,
    },
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Supervise the indexing daemon (runs in the foreground)
    Start,
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let paths = Paths::resolve(cli.data_dir.as_deref())?;
    let settings = Settings::load(&paths)?;

    match cli.command {
        Commands::Search { query } => run_search(&paths, &settings, &query.join(" ")),
        Commands::Parse { query } => run_parse(&query.join(" ")),
        Commands::Download { id, open, export } => {
            run_download(&paths, &settings, &id, open, export.as_deref())
        }
        Commands::Downloads => run_downloads(&paths, &settings),
        Commands::Remove { id } => run_remove(&paths, &settings, &id),
        Commands::Repo { action } => handle_repo_command(&paths, settings, action),
        Commands::Daemon { action } => handle_daemon_command(&paths, &settings, action),
    }
}

fn init_tracing(verbose: u8) {
    let filter = if let Ok(env) = std::env::var("SNAPSEARCH_LOG") {
        EnvFilter::new(env)
    } else {
        match verbose {
            0 => EnvFilter::new("warn"),
            1 => EnvFilter::new("info"),
            2 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// The preferred repository and a search client over its manifest.
fn open_index(paths: &Paths, settings: &Settings) -> Result<(Repository, Arc<ManifestIndex>)> {
    let repo = settings
        .preferred()
        .context("no repository configured; add one with 'snapsearch repo add'")?;
    let index = ManifestIndex::new(paths.manifest_file(&repo.id));
    Ok((repo, Arc::new(index)))
}

fn open_manager(
    paths: &Paths,
    settings: &Settings,
) -> Result<(Repository, Arc<DownloadManager>)> {
    let (repo, index) = open_index(paths, settings)?;
    let store_file = paths.store_file(&repo.id);
    if let Some(parent) = store_file.parent() {
        std::fs::create_dir_all(parent).context("Failed to create repository directory")?;
    }
    let store = DownloadStore::open(&store_file)?;
    let manager = DownloadManager::new(
        index,
        store,
        paths.downloads_dir(),
        settings.opener.clone(),
        settings.download_workers,
    )?;
    Ok((repo, Arc::new(manager)))
}

fn run_search(paths: &Paths, settings: &Settings, raw: &str) -> Result<()> {
    let query = parse_query(raw)?;
    let (repo, index) = open_index(paths, settings)?;
    let results = index.search(&query)?;

    if results.is_empty() {
        println!("No matches.");
        return Ok(());
    }

    for file in &results {
        println!("{}  {:>10}  {}", file.id, format_size(file.size), file.path);
    }
    println!();
    println!("{} matching files in '{}'", results.len(), repo.name);

    Ok(())
}

fn run_parse(raw: &str) -> Result<()> {
    let query = parse_query(raw)?;
    println!("{query}");
    Ok(())
}

fn run_download(
    paths: &Paths,
    settings: &Settings,
    id: &str,
    open: bool,
    export: Option<&std::path::Path>,
) -> Result<()> {
    let (_, manager) = open_manager(paths, settings)?;

    if manager.was_downloaded(id)? {
        println!("Already downloaded: {}", manager.local_path(id).display());
    } else {
        wait_for_download(&manager, id)?;
        println!("Downloaded {} -> {}", id, manager.local_path(id).display());
    }

    if open || export.is_some() {
        let record = find_record(&manager, id)?;
        if let Some(dir) = export {
            let dest = manager.export(&record, &record.file.name, dir)?;
            println!("Exported to {}", dest.display());
        }
        if open {
            manager.open(&record.local_path)?;
        }
    }

    Ok(())
}

/// Enqueue the transfer and block until its terminal event arrives.
fn wait_for_download(manager: &Arc<DownloadManager>, id: &str) -> Result<()> {
    let (tx, rx) = mpsc::channel();
    let tx = Mutex::new(tx);
    manager.events().subscribe(move |event: &DownloadEvent| {
        if let Ok(tx) = tx.lock() {
            let _ = tx.send(event.clone());
        }
    });

    manager.download(id);

    loop {
        let event = rx
            .recv()
            .context("download workers stopped unexpectedly")?;
        match event {
            DownloadEvent::Finished { id: done } if done == id => return Ok(()),
            DownloadEvent::Failed { id: done, message } if done == id => {
                bail!("download failed: {message}")
            }
            _ => {}
        }
    }
}

fn find_record(manager: &Arc<DownloadManager>, id: &str) -> Result<DownloadRecord> {
    manager
        .downloaded()?
        .into_iter()
        .find(|r| r.file.id == id)
        .with_context(|| format!("no download record for '{id}'"))
}

fn run_downloads(paths: &Paths, settings: &Settings) -> Result<()> {
    let (repo, manager) = open_manager(paths, settings)?;
    let records = manager.downloaded()?;

    if records.is_empty() {
        println!("No downloads yet.");
        return Ok(());
    }

    for record in &records {
        println!(
            "{}  {:>10}  {}  {}",
            record.file.id,
            format_size(record.file.size),
            record.completed_at.format("%Y-%m-%d %H:%M"),
            record.file.path,
        );
    }
    println!();
    println!("{} downloads from '{}'", records.len(), repo.name);

    Ok(())
}

fn run_remove(paths: &Paths, settings: &Settings, id: &str) -> Result<()> {
    let (_, manager) = open_manager(paths, settings)?;
    manager.remove(id)?;
    println!("Removed {id}");
    Ok(())
}

fn handle_repo_command(paths: &Paths, mut settings: Settings, action: RepoAction) -> Result<()> {
    match action {
        RepoAction::Add { id, path, name } => {
            if !path.is_dir() {
                bail!("path is not a directory: {}", path.display());
            }
            let source = path
                .canonicalize()
                .with_context(|| format!("cannot resolve path {}", path.display()))?;
            if settings.repositories.iter().any(|r| r.id == id) {
                bail!("repository '{id}' already exists");
            }

            settings.repositories.push(Repository {
                id: id.clone(),
                name: name.unwrap_or_else(|| id.clone()),
                source: source.clone(),
            });
            settings.save(paths)?;
            println!("Added repository '{id}' -> {}", source.display());
        }

        RepoAction::Remove { id } => {
            let before = settings.repositories.len();
            settings.repositories.retain(|r| r.id != id);
            if settings.repositories.len() == before {
                bail!("repository '{id}' is not configured");
            }
            if settings.preferred_repository.as_deref() == Some(id.as_str()) {
                settings.preferred_repository = None;
            }
            settings.save(paths)?;
            println!("Removed repository '{id}'");
        }

        RepoAction::List => {
            if settings.repositories.is_empty() {
                println!("No repositories configured.");
                return Ok(());
            }
            let preferred = settings.preferred().map(|r| r.id);
            for repo in &settings.repositories {
                let marker = if Some(&repo.id) == preferred.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {}\t{}\t{}", repo.id, repo.name, repo.source.display());
            }
        }

        RepoAction::Prefer { id } => {
            if !settings.repositories.iter().any(|r| r.id == id) {
                bail!("repository '{id}' is not configured");
            }
            settings.preferred_repository = Some(id.clone());
            settings.save(paths)?;
            println!("Preferred repository is now '{id}'");
        }
    }

    Ok(())
}

fn handle_daemon_command(paths: &Paths, settings: &Settings, action: DaemonAction) -> Result<()> {
    let client = ControlClient::new(paths.socket_file());

    match action {
        DaemonAction::Start => {
            if client.ping() {
                println!("Daemon is already running");
                return Ok(());
            }

            println!(
                "Supervising the indexing daemon (socket: {}, Ctrl+C to stop)...",
                paths.socket_file().display()
            );
            let catalog: Arc<dyn RepoCatalog> = Arc::new(settings.clone());
            let supervisor =
                Supervisor::new(paths, catalog, SupervisorOptions::from_settings(settings));
            supervisor.run();

            // The supervisor works on background timers; keep the
            // process alive until the user interrupts it.
            loop {
                std::thread::park();
            }
        }

        DaemonAction::Stop => {
            if !client.ping() {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");
            client.kill()?;
            println!("Daemon stopped");
        }

        DaemonAction::Status => {
            if !client.ping() {
                println!("Daemon is not running");
                return Ok(());
            }

            let stats = client.stats()?;
            println!("snapsearchd status:");
            if let Ok(proc) = client.proc_stats() {
                println!("  Pid: {}", proc.pid);
                println!("  Memory: {}", format_size(proc.rss));
                println!("  Cpu time: {}s", proc.cpu_time);
                println!("  Uptime: {}s", proc.elapsed);
            }
            println!(
                "  Snapshots: {}/{}",
                stats.scanned_snapshots, stats.total_snapshots
            );
            println!("  Files scanned: {}", stats.scanned_files);
            println!("  Files indexed: {}", stats.indexed_files);
            if stats.errors > 0 {
                println!("  Errors: {}", stats.errors);
            }
            if let Some(pct) = stats.current_snapshot_percent() {
                println!(
                    "  Current snapshot: {}% ({}/{} files)",
                    pct, stats.current_snapshot_files, stats.current_snapshot_total_files
                );
            }
        }
    }

    Ok(())
}

/// Format byte size to human readable
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
