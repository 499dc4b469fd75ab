//! Indexing daemon supervisor
//!
//! Lives in the interactive process and keeps one `snapsearchd` going:
//! launches it when needed, relaunches it on a schedule, and tracks
//! whether one is alive by polling the control socket. The running
//! state is derived purely from liveness polling, so a daemon started
//! by a previous session or by hand is picked up the same way as one
//! launched here.
//!
//! At-most-one indexing is enforced by the liveness probe plus the
//! server's own startup bind, not by any lock held here.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use crate::config::{self, RepoCatalog, Settings};
use crate::daemon::client::ControlClient;
use crate::events::EventBus;

/// Granularity of interruptible sleeps; bounds shutdown latency.
const TICK: Duration = Duration::from_millis(100);

/// Edge-triggered daemon state transitions, emitted at most once per
/// transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonEvent {
    Started,
    Stopped,
}

/// Tunables for the supervisor, defaulted from [`Settings`].
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// Name of the indexing binary looked up on PATH.
    pub binary: String,
    /// Liveness poll cadence.
    pub poll_interval: Duration,
    /// Scheduled relaunch cadence.
    pub reindex_interval: Duration,
    /// Wait between checks for the first configured repository.
    pub first_boot_wait: Duration,
}

impl SupervisorOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            binary: "snapsearchd".to_string(),
            poll_interval: Duration::from_secs(settings.poll_interval_secs),
            reindex_interval: Duration::from_secs(
                settings.reindex_interval_secs,
            ),
            first_boot_wait: Duration::from_secs(
                settings.first_boot_wait_secs,
            ),
        }
    }
}

pub struct Supervisor {
    client: ControlClient,
    socket_path: PathBuf,
    data_dir: PathBuf,
    catalog: Arc<dyn RepoCatalog>,
    options: SupervisorOptions,
    running: Mutex<bool>,
    events: EventBus<DaemonEvent>,
    stop: AtomicBool,
    timers: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(
        paths: &config::Paths,
        catalog: Arc<dyn RepoCatalog>,
        options: SupervisorOptions,
    ) -> Arc<Self> {
        let socket_path = paths.socket_file();
        Arc::new(Self {
            client: ControlClient::new(&socket_path),
            socket_path,
            data_dir: paths.root().to_path_buf(),
            catalog,
            options,
            running: Mutex::new(false),
            events: EventBus::new(),
            stop: AtomicBool::new(false),
            timers: Mutex::new(Vec::new()),
        })
    }

    /// Bus for [`DaemonEvent`] transitions.
    pub fn events(&self) -> &EventBus<DaemonEvent> {
        &self.events
    }

    /// Last state the liveness poller observed.
    pub fn is_running(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Kick off the first launch and both timers: the liveness poller
    /// and the scheduled relauncher. Non-blocking.
    pub fn run(self: &Arc<Self>) {
        self.start();

        let poller = {
            let sup = Arc::clone(self);
            thread::spawn(move || sup.poll_loop())
        };
        let scheduler = {
            let sup = Arc::clone(self);
            thread::spawn(move || sup.reindex_loop())
        };

        let mut timers =
            self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        timers.push(poller);
        timers.push(scheduler);
    }

    /// Launch the daemon unless one is already answering. Non-blocking;
    /// the worker thread stays busy for the whole daemon run.
    pub fn start(self: &Arc<Self>) {
        let sup = Arc::clone(self);
        thread::spawn(move || sup.launch_worker());
    }

    /// Ask a running daemon to cancel and exit. Does not wait: the exit
    /// shows up as a Stopped transition on a later poll.
    pub fn stop(&self) {
        if let Err(err) = self.client.kill() {
            debug!(error = %err, "kill request failed, daemon likely not running");
        }
    }

    /// Stop the supervisor's own timer threads. The daemon itself is
    /// left alone.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
        let handles: Vec<_> = {
            let mut timers =
                self.timers.lock().unwrap_or_else(PoisonError::into_inner);
            timers.drain(..).collect()
        };
        for handle in handles {
            let _ = handle.join();
        }
    }

    fn poll_loop(&self) {
        while !self.stop.load(Ordering::SeqCst) {
            self.set_running(self.client.ping());
            if !self.sleep_while_active(self.options.poll_interval) {
                return;
            }
        }
    }

    fn reindex_loop(self: &Arc<Self>) {
        let mut next = Instant::now() + self.options.reindex_interval;
        loop {
            if !self.sleep_while_active(TICK) {
                return;
            }
            if Instant::now() >= next {
                debug!("scheduled reindex, trying to start the daemon");
                self.start();
                next = Instant::now() + self.options.reindex_interval;
            }
        }
    }

    /// The launch path: liveness no-op, stale socket cleanup, first-boot
    /// wait, PATH lookup, then a blocking child run.
    fn launch_worker(&self) {
        if self.client.ping() {
            debug!("daemon already running, skipping launch");
            self.set_running(true);
            return;
        }

        if self.socket_path.exists() {
            warn!(
                path = %self.socket_path.display(),
                "socket file found, but looks stale, removing"
            );
            let _ = std::fs::remove_file(&self.socket_path);
        }

        let repo = loop {
            if self.stop.load(Ordering::SeqCst) {
                return;
            }
            if let Some(repo) = self.catalog.preferred() {
                break repo;
            }
            debug!("waiting for a repository to be configured");
            if !self.sleep_while_active(self.options.first_boot_wait) {
                return;
            }
        };

        let binary = match find_in_path(&self.options.binary) {
            Some(binary) => binary,
            None => {
                error!(
                    binary = %self.options.binary,
                    "cannot find the indexing binary on PATH"
                );
                return;
            }
        };

        info!(
            binary = %binary.display(),
            repository = %repo.id,
            "starting the indexing daemon"
        );

        let mut command = Command::new(&binary);
        command
            .arg("run")
            .env(config::ENV_DATA_DIR, &self.data_dir)
            .env(config::ENV_REPOSITORY, &repo.id);
        if let Some(credentials) = self.catalog.credentials(&repo) {
            command.env(config::ENV_PASSWORD, credentials.password);
        }

        match command.status() {
            Ok(status) if status.success() => {
                debug!("indexing daemon exited cleanly")
            }
            Ok(status) => {
                warn!(%status, "indexing daemon exited with an error")
            }
            Err(err) => error!(error = %err, "error running the indexing daemon"),
        }

        self.set_running(false);
    }

    /// Flip the running flag and emit the transition exactly once.
    fn set_running(&self, now: bool) {
        let transitioned = {
            let mut running =
                self.running.lock().unwrap_or_else(PoisonError::into_inner);
            let transitioned = *running != now;
            *running = now;
            transitioned
        };

        if transitioned {
            if now {
                info!("indexing daemon is up");
                self.events.emit(&DaemonEvent::Started);
            } else {
                info!("indexing daemon is down");
                self.events.emit(&DaemonEvent::Stopped);
            }
        }
    }

    /// Sleep in small ticks so shutdown is prompt. Returns false once
    /// the stop flag is raised.
    fn sleep_while_active(&self, total: Duration) -> bool {
        let deadline = Instant::now() + total;
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(TICK.min(remaining));
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("socket_path", &self.socket_path)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Resolve a binary name against PATH, like the shell would.
fn find_in_path(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let path = Path::new(name);
        return path.is_file().then(|| path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::config::{Credentials, Paths, Repository};

    struct FixedCatalog {
        repo: Option<Repository>,
    }

    impl RepoCatalog for FixedCatalog {
        fn preferred(&self) -> Option<Repository> {
            self.repo.clone()
        }

        fn credentials(&self, repository: &Repository) -> Option<Credentials> {
            Some(Credentials {
                repository: repository.id.clone(),
                password: "secret".to_string(),
            })
        }
    }

    fn options(binary: &str) -> SupervisorOptions {
        SupervisorOptions {
            binary: binary.to_string(),
            poll_interval: Duration::from_millis(20),
            reindex_interval: Duration::from_secs(3600),
            first_boot_wait: Duration::from_millis(10),
        }
    }

    fn repo() -> Option<Repository> {
        Some(Repository {
            id: "media".to_string(),
            name: "Media".to_string(),
            source: PathBuf::from("/srv/media"),
        })
    }

    fn supervisor(
        binary: &str,
        repo: Option<Repository>,
    ) -> (tempfile::TempDir, Arc<Supervisor>) {
        let tmp = tempfile::tempdir().unwrap();
        let paths = Paths::resolve(Some(tmp.path())).unwrap();
        let catalog = Arc::new(FixedCatalog { repo });
        let sup = Supervisor::new(&paths, catalog, options(binary));
        (tmp, sup)
    }

    #[test]
    fn test_find_in_path() {
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("no-such-binary-snapsearch-test").is_none());
    }

    #[test]
    fn test_find_in_path_explicit_path() {
        let sh = find_in_path("sh").unwrap();
        assert_eq!(find_in_path(&sh.to_string_lossy()), Some(sh));
        assert!(find_in_path("/no/such/dir/sh").is_none());
    }

    #[test]
    fn test_set_running_debounces_transitions() {
        let (_tmp, sup) = supervisor("true", repo());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sup.events().subscribe(move |event: &DaemonEvent| {
            sink.lock().unwrap().push(*event);
        });

        sup.set_running(true);
        sup.set_running(true);
        sup.set_running(false);
        sup.set_running(false);
        sup.set_running(true);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                DaemonEvent::Started,
                DaemonEvent::Stopped,
                DaemonEvent::Started,
            ]
        );
    }

    #[test]
    fn test_launch_worker_missing_binary_fails_fast() {
        let (_tmp, sup) = supervisor("no-such-binary-snapsearch-test", repo());
        sup.launch_worker();
        assert!(!sup.is_running());
    }

    #[test]
    fn test_launch_worker_runs_child_to_completion() {
        // `true` ignores the run argument and the environment and exits
        // cleanly, standing in for a short daemon run.
        let (_tmp, sup) = supervisor("true", repo());
        sup.launch_worker();
        assert!(!sup.is_running());
    }

    #[test]
    fn test_launch_worker_interrupted_first_boot_wait() {
        let (_tmp, sup) = supervisor("true", None);
        sup.stop.store(true, Ordering::SeqCst);
        // Returns instead of waiting forever for a repository.
        sup.launch_worker();
        assert!(!sup.is_running());
    }

    #[test]
    fn test_poller_without_daemon_stays_stopped() {
        let (_tmp, sup) = supervisor("no-such-binary-snapsearch-test", None);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        sup.events().subscribe(move |event: &DaemonEvent| {
            sink.lock().unwrap().push(*event);
        });

        sup.run();
        thread::sleep(Duration::from_millis(80));
        sup.shutdown();

        assert!(!sup.is_running());
        // false -> false polls must not produce edges.
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_shutdown_joins_timers() {
        let (_tmp, sup) = supervisor("no-such-binary-snapsearch-test", None);
        sup.run();
        sup.shutdown();
        assert!(sup
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty());
    }

    #[test]
    fn test_stop_without_daemon_is_quiet() {
        let (_tmp, sup) = supervisor("true", repo());
        // No daemon to kill; must not panic or block.
        sup.stop();
        assert!(!sup.is_running());
    }
}
