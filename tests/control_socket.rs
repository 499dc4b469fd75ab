//! Control socket integration tests: server, client and supervisor
//! talking over a real Unix socket in a temp directory.

use snapsearch::config::{Credentials, Paths, RepoCatalog, Repository};
use snapsearch::daemon::{ControlClient, ControlServer, DaemonEvent, Supervisor, SupervisorOptions};
use snapsearch::index::IndexStats;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    false
}

fn start_server(
    socket: PathBuf,
) -> (Arc<ControlServer>, thread::JoinHandle<anyhow::Result<()>>) {
    let server = ControlServer::new(socket.clone());
    let handle = {
        let server = Arc::clone(&server);
        thread::spawn(move || server.run())
    };
    assert!(
        wait_until(Duration::from_secs(2), || ControlClient::new(&socket).ping()),
        "server did not come up in time"
    );
    (server, handle)
}

fn socket_in(tmp: &Path) -> PathBuf {
    tmp.join("snapsearchd.sock")
}

#[test]
fn test_routes_over_real_socket() {
    let tmp = TempDir::new().unwrap();
    let socket = socket_in(tmp.path());
    let (server, handle) = start_server(socket.clone());
    let client = ControlClient::new(&socket);

    assert!(client.ping());
    assert_eq!(client.pid().unwrap(), std::process::id() as i32);

    // Stats reflect the latest snapshot the server recorded.
    assert_eq!(client.stats().unwrap(), IndexStats::default());
    let stats = IndexStats {
        scanned_files: 7,
        indexed_files: 6,
        total_snapshots: 1,
        ..Default::default()
    };
    server.record_stats(&stats);
    assert_eq!(client.stats().unwrap(), stats);

    let proc = client.proc_stats().unwrap();
    assert_eq!(proc.pid, std::process::id() as i32);
    assert!(proc.rss > 0);

    server.initiate_shutdown();
    handle.join().unwrap().unwrap();
    assert!(!socket.exists());
}

#[test]
fn test_kill_request_shuts_the_server_down() {
    let tmp = TempDir::new().unwrap();
    let socket = socket_in(tmp.path());
    let (server, handle) = start_server(socket.clone());
    let client = ControlClient::new(&socket);

    client.kill().unwrap();
    handle.join().unwrap().unwrap();

    assert!(server.cancel_token().load(Ordering::SeqCst));
    assert!(!socket.exists());
    assert!(!client.ping());
}

#[test]
fn test_second_server_is_refused() {
    let tmp = TempDir::new().unwrap();
    let socket = socket_in(tmp.path());
    let (server, handle) = start_server(socket.clone());

    let second = ControlServer::new(socket.clone());
    let err = second.run().unwrap_err();
    assert!(err.to_string().contains("already running"));

    // The running daemon is unaffected by the failed start.
    assert!(ControlClient::new(&socket).ping());

    server.initiate_shutdown();
    handle.join().unwrap().unwrap();
}

#[test]
fn test_stale_socket_file_is_replaced() {
    let tmp = TempDir::new().unwrap();
    let socket = socket_in(tmp.path());
    std::fs::write(&socket, b"").unwrap();

    let (server, handle) = start_server(socket.clone());
    assert!(ControlClient::new(&socket).ping());

    server.initiate_shutdown();
    handle.join().unwrap().unwrap();
}

struct EmptyCatalog;

impl RepoCatalog for EmptyCatalog {
    fn preferred(&self) -> Option<Repository> {
        None
    }

    fn credentials(&self, _repository: &Repository) -> Option<Credentials> {
        None
    }
}

#[test]
fn test_supervisor_tracks_external_daemon() {
    let tmp = TempDir::new().unwrap();
    let paths = Paths::resolve(Some(tmp.path())).unwrap();
    let (server, handle) = start_server(paths.socket_file());

    let options = SupervisorOptions {
        binary: "snapsearchd-test-missing".to_string(),
        poll_interval: Duration::from_millis(20),
        reindex_interval: Duration::from_secs(3600),
        first_boot_wait: Duration::from_millis(10),
    };
    let supervisor = Supervisor::new(&paths, Arc::new(EmptyCatalog), options);

    let events: Arc<Mutex<Vec<DaemonEvent>>> = Arc::default();
    {
        let events = Arc::clone(&events);
        supervisor.events().subscribe(move |event: &DaemonEvent| {
            events.lock().unwrap().push(*event);
        });
    }

    // The daemon is already up, so the supervisor reports it running
    // without launching anything.
    supervisor.run();
    assert!(wait_until(Duration::from_secs(2), || supervisor.is_running()));

    server.initiate_shutdown();
    handle.join().unwrap().unwrap();
    assert!(wait_until(Duration::from_secs(2), || !supervisor.is_running()));

    supervisor.shutdown();

    let events = events.lock().unwrap();
    assert_eq!(events.first(), Some(&DaemonEvent::Started));
    assert_eq!(events.last(), Some(&DaemonEvent::Stopped));
}
