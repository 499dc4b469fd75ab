//! Settings and on-disk layout.
//!
//! Everything snapsearch persists lives under a single data directory:
//! the JSON settings file, one subdirectory per repository (manifest and
//! download store), the exported downloads tree, and the daemon control
//! socket. The directory is resolved once at startup and handed down to
//! the components that need it.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Overrides the resolved data directory when set.
pub const ENV_DATA_DIR: &str = "SNAPSEARCH_DATA_DIR";
/// Repository id handed to the indexer process.
pub const ENV_REPOSITORY: &str = "SNAPSEARCH_REPOSITORY";
/// Repository password handed to the indexer process. Never passed on
/// the command line.
pub const ENV_PASSWORD: &str = "SNAPSEARCH_PASSWORD";

const APP_NAME: &str = "snapsearch";
const CONFIG_FILE: &str = "config.json";
const SOCKET_FILE: &str = "snapsearchd.sock";
const MANIFEST_FILE: &str = "manifest.jsonl";
const STORE_FILE: &str = "downloads.redb";

/// Resolved data directory with helpers for every path the application
/// touches. Constructed once and passed to whatever needs disk access.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The SNAPSEARCH_DATA_DIR environment variable
    /// 3. The platform data directory (~/.local/share/snapsearch/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(ENV_DATA_DIR) {
            PathBuf::from(val)
        } else {
            dirs::data_dir()
                .context("Could not determine user data directory")?
                .join(APP_NAME)
        };

        std::fs::create_dir_all(&root).with_context(|| {
            format!("Failed to create data directory: {}", root.display())
        })?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    /// Unix socket the daemon listens on.
    pub fn socket_file(&self) -> PathBuf {
        self.root.join(SOCKET_FILE)
    }

    /// Root of the exported downloads tree.
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    /// Per-repository state directory.
    pub fn repository_dir(&self, repository: &str) -> PathBuf {
        self.root.join("repositories").join(repository)
    }

    /// Snapshot manifest for a repository.
    pub fn manifest_file(&self, repository: &str) -> PathBuf {
        self.repository_dir(repository).join(MANIFEST_FILE)
    }

    /// Completed-downloads database for a repository.
    pub fn store_file(&self, repository: &str) -> PathBuf {
        self.repository_dir(repository).join(STORE_FILE)
    }
}

/// A searchable repository: a name for display and the directory tree
/// its snapshots are taken from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Stable identifier, used in paths and environment variables.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Root of the tree this repository indexes.
    pub source: PathBuf,
}

/// Secrets for one repository, sourced from the environment and passed
/// to child processes the same way.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub repository: String,
    pub password: String,
}

/// Access to the configured repositories and their secrets. The daemon
/// and the download manager only see this trait, not the settings file.
pub trait RepoCatalog: Send + Sync {
    /// The repository to index and search, if any is configured.
    fn preferred(&self) -> Option<Repository>;

    /// Credentials for a repository, if any are available.
    fn credentials(&self, repository: &Repository) -> Option<Credentials>;
}

/// Application settings, stored as JSON in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Repositories available for indexing and search.
    #[serde(default)]
    pub repositories: Vec<Repository>,

    /// Id of the repository to use when several are configured.
    #[serde(default)]
    pub preferred_repository: Option<String>,

    /// Command used to open finished downloads.
    #[serde(default = "default_opener")]
    pub opener: String,

    /// Number of concurrent download workers.
    #[serde(default = "default_download_workers")]
    pub download_workers: usize,

    /// Seconds between daemon liveness polls.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds between scheduled reindex runs.
    #[serde(default = "default_reindex_interval_secs")]
    pub reindex_interval_secs: u64,

    /// Seconds between checks for the first configured repository,
    /// while the daemon launch waits for one to appear.
    #[serde(default = "default_first_boot_wait_secs")]
    pub first_boot_wait_secs: u64,
}

fn default_opener() -> String {
    "xdg-open".to_string()
}

fn default_download_workers() -> usize {
    5
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_reindex_interval_secs() -> u64 {
    3600
}

fn default_first_boot_wait_secs() -> u64 {
    10
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            repositories: Vec::new(),
            preferred_repository: None,
            opener: default_opener(),
            download_workers: default_download_workers(),
            poll_interval_secs: default_poll_interval_secs(),
            reindex_interval_secs: default_reindex_interval_secs(),
            first_boot_wait_secs: default_first_boot_wait_secs(),
        }
    }
}

impl Settings {
    /// Load settings from the data directory, falling back to defaults
    /// when no settings file exists yet.
    pub fn load(paths: &Paths) -> Result<Self> {
        let path = paths.config_file();
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)
            .context("Failed to read settings file")?;
        let settings = serde_json::from_str(&contents)
            .context("Failed to parse settings file")?;

        Ok(settings)
    }

    /// Save settings to the data directory.
    pub fn save(&self, paths: &Paths) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)
            .context("Failed to serialize settings")?;
        std::fs::write(paths.config_file(), contents)
            .context("Failed to write settings file")?;

        Ok(())
    }

    fn find(&self, id: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.id == id)
    }
}

impl RepoCatalog for Settings {
    fn preferred(&self) -> Option<Repository> {
        if let Some(id) = &self.preferred_repository {
            return self.find(id).cloned();
        }
        self.repositories.first().cloned()
    }

    fn credentials(&self, repository: &Repository) -> Option<Credentials> {
        let password = std::env::var(ENV_PASSWORD).ok()?;
        Some(Credentials {
            repository: repository.id.clone(),
            password,
        })
    }
}
