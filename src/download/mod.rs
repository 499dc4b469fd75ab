//! Bounded-concurrency download manager.
//!
//! Transfers are enqueued without blocking and executed on a fixed-size
//! worker pool. Content is streamed to a temporary file next to its
//! final destination and committed with an atomic rename, then recorded
//! in the per-repository [`DownloadStore`]. Observers follow the
//! lifecycle through [`DownloadEvent`]s: per id the order is always
//! started, then finished or failed, then queue-empty when that id was
//! the last one in flight.
//!
//! Failures are terminal per request. Nothing retries, and a failed
//! transfer never leaves a partial file under the final path.

pub mod store;

use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use rayon::ThreadPool;
use tracing::{debug, info, warn};

use crate::events::EventBus;
use crate::index::{IndexError, RemoteFile, SearchIndexClient};

pub use store::{DownloadRecord, DownloadStore};

pub type DownloadResult<T> = std::result::Result<T, DownloadError>;

/// Errors surfaced by the download manager and its durable store
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("file {0} already downloaded")]
    AlreadyDownloaded(String),

    #[error("file '{0}' has not been downloaded")]
    UnknownDownload(String),

    #[error("can't copy non-regular source file {}", .0.display())]
    NotRegular(PathBuf),

    #[error("target '{}' should be a valid directory", .0.display())]
    NotADirectory(PathBuf),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("worker pool error: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("database error: {0}")]
    Redb(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),
}

/// Lifecycle notifications published through the event bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    Started { id: String },
    Failed { id: String, message: String },
    Finished { id: String },
    QueueEmpty,
}

/// What to do with the file once the transfer has committed.
enum PostAction {
    None,
    Open,
    Export { name: String, target_dir: PathBuf },
}

pub struct DownloadManager {
    index: Arc<dyn SearchIndexClient>,
    store: DownloadStore,
    downloads_dir: PathBuf,
    opener: String,
    pool: ThreadPool,
    in_progress: Mutex<Vec<RemoteFile>>,
    events: EventBus<DownloadEvent>,
}

impl DownloadManager {
    pub fn new(
        index: Arc<dyn SearchIndexClient>,
        store: DownloadStore,
        downloads_dir: PathBuf,
        opener: String,
        workers: usize,
    ) -> DownloadResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("download-{i}"))
            .build()?;

        Ok(Self {
            index,
            store,
            downloads_dir,
            opener,
            pool,
            in_progress: Mutex::new(Vec::new()),
            events: EventBus::new(),
        })
    }

    /// Bus the lifecycle events are published on.
    pub fn events(&self) -> &EventBus<DownloadEvent> {
        &self.events
    }

    /// Enqueue a transfer. Returns immediately; completion is reported
    /// through the event bus.
    pub fn download(self: &Arc<Self>, id: &str) {
        self.submit(id.to_string(), PostAction::None);
    }

    /// Enqueue a transfer and open the file with the configured opener
    /// once it commits.
    pub fn download_and_open(self: &Arc<Self>, id: &str) {
        self.submit(id.to_string(), PostAction::Open);
    }

    /// Enqueue a transfer and copy the committed file into `target_dir`
    /// under `name`, avoiding collisions with a numeric suffix.
    pub fn download_and_export(
        self: &Arc<Self>,
        id: &str,
        name: &str,
        target_dir: &Path,
    ) {
        self.submit(
            id.to_string(),
            PostAction::Export {
                name: name.to_string(),
                target_dir: target_dir.to_path_buf(),
            },
        );
    }

    fn submit(self: &Arc<Self>, id: String, action: PostAction) {
        let manager = Arc::clone(self);
        self.pool.spawn(move || manager.run_request(&id, action));
    }

    /// Whether the durable store has a record for this id. Absence is
    /// an answer, not an error.
    pub fn was_downloaded(&self, id: &str) -> DownloadResult<bool> {
        Ok(self.store.get(id)?.is_some())
    }

    /// Advisory check against the in-flight list. The answer can be
    /// stale by the time the caller acts on it.
    pub fn is_in_progress(&self, id: &str) -> bool {
        self.lock_in_progress().iter().any(|f| f.id == id)
    }

    /// Snapshot of the in-flight list.
    pub fn in_progress(&self) -> Vec<RemoteFile> {
        self.lock_in_progress().clone()
    }

    /// Completed downloads, newest first.
    pub fn downloaded(&self) -> DownloadResult<Vec<DownloadRecord>> {
        let mut records = self.store.all()?;
        records.sort_by(|a, b| b.completed_at.cmp(&a.completed_at));
        Ok(records)
    }

    /// Forget a completed download. The durable record goes first; only
    /// once it is gone is the file deleted, so a surviving record always
    /// points at a file that still exists.
    pub fn remove(&self, id: &str) -> DownloadResult<()> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| DownloadError::UnknownDownload(id.to_string()))?;
        self.store.remove(id)?;

        match std::fs::remove_file(&record.local_path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => {
                Err(err.into())
            }
            _ => Ok(()),
        }
    }

    /// Final on-disk location for a file id, sharded by the first two
    /// characters to keep directory fan-out flat.
    pub fn local_path(&self, id: &str) -> PathBuf {
        let shard = id.get(..2).unwrap_or(id);
        self.downloads_dir.join(shard).join(id)
    }

    /// Copy a committed download into `target_dir` under `name`. On a
    /// name collision a numeric suffix is inserted before the extension
    /// until a free path is found. Returns the path written.
    pub fn export(
        &self,
        record: &DownloadRecord,
        name: &str,
        target_dir: &Path,
    ) -> DownloadResult<PathBuf> {
        let source = &record.local_path;
        if !std::fs::metadata(source)?.is_file() {
            return Err(DownloadError::NotRegular(source.clone()));
        }
        if !std::fs::metadata(target_dir)?.is_dir() {
            return Err(DownloadError::NotADirectory(target_dir.to_path_buf()));
        }

        let dest = safe_export_name(&target_dir.join(name));
        std::fs::copy(source, &dest)?;
        info!(id = %record.file.id, dest = %dest.display(), "exported file");
        Ok(dest)
    }

    /// Hand a file to the configured opener. A nonzero exit is logged,
    /// not surfaced; desktop openers report little of value.
    pub fn open(&self, path: &Path) -> DownloadResult<()> {
        debug!(path = %path.display(), "opening");
        let status = Command::new(&self.opener).arg(path).status()?;
        if !status.success() {
            warn!(path = %path.display(), %status, "opener exited nonzero");
        }
        Ok(())
    }

    fn run_request(&self, id: &str, action: PostAction) {
        let committed = match self.transfer(id) {
            Ok(record) => self.commit(record),
            Err(err) => {
                self.fail(id, &err);
                None
            }
        };

        if let Some(record) = committed {
            self.post_action(&record, &action);
        }
    }

    /// Steps up to and including the atomic rename. On success the file
    /// is in place but not yet recorded; the id stays on the in-flight
    /// list either way, for [`Self::commit`] or [`Self::fail`] to take
    /// off.
    fn transfer(&self, id: &str) -> DownloadResult<DownloadRecord> {
        let file = self
            .index
            .lookup(id)?
            .ok_or_else(|| IndexError::UnknownFile(id.to_string()))?;

        let dest = self.local_path(id);
        if dest.exists() {
            return Err(DownloadError::AlreadyDownloaded(id.to_string()));
        }

        self.lock_in_progress().push(file.clone());
        self.events.emit(&DownloadEvent::Started { id: id.to_string() });

        self.fetch_to(&file, &dest)?;

        Ok(DownloadRecord {
            file,
            local_path: dest,
            completed_at: Utc::now(),
        })
    }

    /// Make the record durable and take the id off the in-flight list
    /// under a single lock hold, so no observer sees the id in both
    /// places or in neither mid-transfer.
    fn commit(&self, record: DownloadRecord) -> Option<DownloadRecord> {
        let id = record.file.id.clone();
        let (put, drained) = {
            let mut list = self.lock_in_progress();
            let put = self.store.put(&record);
            let before = list.len();
            list.retain(|f| f.id != id);
            (put, before != list.len() && list.is_empty())
        };

        let committed = match put {
            Ok(()) => {
                info!(id, path = %record.local_path.display(), "downloaded");
                self.events
                    .emit(&DownloadEvent::Finished { id: id.clone() });
                Some(record)
            }
            Err(err) => {
                // The rename already happened: the file is on disk with
                // no record. Harmless but worth shouting about, since
                // `downloaded` will under-report until the file is
                // removed.
                warn!(
                    id,
                    path = %record.local_path.display(),
                    error = %err,
                    "download committed on disk but its record could not be written"
                );
                self.events.emit(&DownloadEvent::Failed {
                    id: id.clone(),
                    message: err.to_string(),
                });
                None
            }
        };

        if drained {
            self.events.emit(&DownloadEvent::QueueEmpty);
        }
        committed
    }

    fn fail(&self, id: &str, err: &DownloadError) {
        warn!(id, error = %err, "download failed");
        let drained = {
            let mut list = self.lock_in_progress();
            let before = list.len();
            list.retain(|f| f.id != id);
            before != list.len() && list.is_empty()
        };

        self.events.emit(&DownloadEvent::Failed {
            id: id.to_string(),
            message: err.to_string(),
        });
        if drained {
            self.events.emit(&DownloadEvent::QueueEmpty);
        }
    }

    /// Stream content into `<dest>.tmp` and rename it over `dest`. The
    /// temporary file lives in the destination directory so the rename
    /// never crosses a filesystem boundary.
    fn fetch_to(&self, file: &RemoteFile, dest: &Path) -> DownloadResult<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = temp_path(dest);
        if let Err(err) = self.stream_into(file, &tmp, dest) {
            let _ = std::fs::remove_file(&tmp);
            return Err(err);
        }
        Ok(())
    }

    fn stream_into(
        &self,
        file: &RemoteFile,
        tmp: &Path,
        dest: &Path,
    ) -> DownloadResult<()> {
        let mut out = BufWriter::new(std::fs::File::create(tmp)?);
        self.index.fetch(&file.id, &mut out)?;
        out.flush()?;
        std::fs::rename(tmp, dest)?;
        Ok(())
    }

    fn post_action(&self, record: &DownloadRecord, action: &PostAction) {
        match action {
            PostAction::None => {}
            PostAction::Open => {
                if let Err(err) = self.open(&record.local_path) {
                    warn!(id = %record.file.id, error = %err, "error opening file");
                }
            }
            PostAction::Export { name, target_dir } => {
                if let Err(err) = self.export(record, name, target_dir) {
                    warn!(name, error = %err, "error exporting file");
                }
            }
        }
    }

    fn lock_in_progress(&self) -> std::sync::MutexGuard<'_, Vec<RemoteFile>> {
        self.in_progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for DownloadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadManager")
            .field("downloads_dir", &self.downloads_dir)
            .finish_non_exhaustive()
    }
}

fn temp_path(dest: &Path) -> PathBuf {
    let mut os = dest.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

/// First free variant of `desired`, counting `name_1.ext`, `name_2.ext`
/// and so on. Terminates because the counter strictly advances.
fn safe_export_name(desired: &Path) -> PathBuf {
    let mut candidate = desired.to_path_buf();
    let mut count = 0;
    while candidate.exists() {
        count += 1;
        candidate = numbered(desired, count);
    }
    candidate
}

fn numbered(desired: &Path, count: u32) -> PathBuf {
    let name = match desired.file_name() {
        Some(name) => name.to_string_lossy(),
        None => return desired.to_path_buf(),
    };
    let (stem, ext) = match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name.as_ref(), ""),
    };
    desired.with_file_name(format!("{stem}_{count}{ext}"))
}
