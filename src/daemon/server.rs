//! Control server embedded in the indexing daemon
//!
//! Listens on the well-known Unix socket and serves the control routes
//! while an indexing run is in flight. The indexing side feeds progress
//! snapshots in through [`ControlServer::record_stats`] and watches the
//! shared cancel flag; `POST /kill` raises it and shuts the listener
//! down.

use std::io::{BufReader, BufWriter};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::daemon::client::ControlClient;
use crate::daemon::http::{
    read_request, write_response, Request, Response,
};
use crate::daemon::procstats::ProcStats;
use crate::index::IndexStats;

/// Connection timeout; control exchanges are one round-trip.
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ControlServer {
    socket_path: PathBuf,
    latest: Mutex<IndexStats>,
    cancel: AtomicBool,
    shutdown: AtomicBool,
}

impl ControlServer {
    /// Create a server for the given socket path, wrapped in Arc so
    /// connection threads can share it.
    pub fn new(socket_path: PathBuf) -> Arc<Self> {
        Arc::new(Self {
            socket_path,
            latest: Mutex::new(IndexStats::default()),
            cancel: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
        })
    }

    /// Flag the indexing run polls for cancellation.
    pub fn cancel_token(&self) -> &AtomicBool {
        &self.cancel
    }

    /// Store the latest progress snapshot; `GET /stats` serves it.
    pub fn record_stats(&self, stats: &IndexStats) {
        *self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = stats.clone();
    }

    /// Raise the cancel flag and stop accepting connections. Also used
    /// by the kill route.
    pub fn initiate_shutdown(&self) {
        self.cancel.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        // Nudge the accept loop out of its blocking accept.
        let _ = UnixStream::connect(&self.socket_path);
    }

    /// Bind the socket and serve until shut down (blocking).
    ///
    /// If the socket file already exists it is probed first: a live
    /// answer means another daemon owns it and startup fails; anything
    /// else is a stale file and gets removed.
    pub fn run(self: &Arc<Self>) -> Result<()> {
        if self.socket_path.exists() {
            if ControlClient::new(&self.socket_path).ping() {
                bail!("another indexing daemon is already running");
            }
            warn!(
                path = %self.socket_path.display(),
                "socket file found, but looks stale, removing"
            );
            std::fs::remove_file(&self.socket_path)?;
        }

        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(&self.socket_path).with_context(
            || format!("Failed to bind to {}", self.socket_path.display()),
        )?;

        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(
                &self.socket_path,
                std::fs::Permissions::from_mode(0o600),
            )?;
        }

        info!(path = %self.socket_path.display(), "control socket listening");

        for stream in listener.incoming() {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match stream {
                Ok(stream) => {
                    let _ = stream.set_read_timeout(Some(CONNECTION_TIMEOUT));
                    let _ = stream.set_write_timeout(Some(CONNECTION_TIMEOUT));

                    let server = Arc::clone(self);
                    thread::spawn(move || {
                        if let Err(err) = server.handle_connection(stream) {
                            debug!(error = %err, "connection error");
                        }
                    });
                }
                Err(err) => {
                    warn!(error = %err, "accept error");
                }
            }
        }

        let _ = std::fs::remove_file(&self.socket_path);
        Ok(())
    }

    /// One request, one response, close.
    fn handle_connection(&self, stream: UnixStream) -> Result<()> {
        let mut reader = BufReader::new(stream.try_clone()?);
        let mut writer = BufWriter::new(stream);

        let request = match read_request(&mut reader) {
            Ok(request) => request,
            Err(err)
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                // Disconnect before a request; the shutdown nudge does
                // this on purpose.
                return Ok(());
            }
            Err(err) => {
                let response =
                    Response::text(400, &format!("bad request: {err}\n"));
                write_response(&mut writer, &response)?;
                return Ok(());
            }
        };

        let (response, exit_after) = self.route(&request);
        write_response(&mut writer, &response)?;

        if exit_after {
            self.initiate_shutdown();
        }
        Ok(())
    }

    /// Dispatch a request. The bool asks the caller to shut the server
    /// down after the response is on the wire.
    fn route(&self, request: &Request) -> (Response, bool) {
        match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/") => {
                (Response::text(200, "snapsearchd daemon socket"), false)
            }
            ("GET", "/ping") => (Response::text(200, "pong"), false),
            ("GET", "/stats") => {
                let stats = self
                    .latest
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                (self.json_response(&stats), false)
            }
            ("GET", "/procstats") => match ProcStats::current() {
                Ok(stats) => (self.json_response(&stats), false),
                Err(err) => {
                    (Response::text(500, &format!("{err}\n")), false)
                }
            },
            ("GET", "/pid") => {
                (Response::text(200, &std::process::id().to_string()), false)
            }
            ("POST", "/kill") => (Response::text(200, "shutting down"), true),
            _ => (Response::not_found(), false),
        }
    }

    fn json_response(&self, value: &impl serde::Serialize) -> Response {
        match serde_json::to_vec(value) {
            Ok(body) => Response::json(body),
            Err(err) => Response::text(500, &format!("{err}\n")),
        }
    }
}

impl std::fmt::Debug for ControlServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlServer")
            .field("socket_path", &self.socket_path)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str, path: &str) -> Request {
        Request {
            method: method.to_string(),
            path: path.to_string(),
        }
    }

    fn test_server() -> Arc<ControlServer> {
        ControlServer::new(PathBuf::from("/tmp/unused-test.sock"))
    }

    #[test]
    fn test_route_banner_and_ping() {
        let server = test_server();

        let (banner, exit) = server.route(&request("GET", "/"));
        assert_eq!(banner.body_text(), "snapsearchd daemon socket");
        assert!(!exit);

        let (pong, _) = server.route(&request("GET", "/ping"));
        assert_eq!(pong.status, 200);
        assert_eq!(pong.body, b"pong");
    }

    #[test]
    fn test_route_stats_serves_latest_snapshot() {
        let server = test_server();

        let (initial, _) = server.route(&request("GET", "/stats"));
        let decoded: IndexStats =
            serde_json::from_slice(&initial.body).unwrap();
        assert_eq!(decoded, IndexStats::default());

        let stats = IndexStats {
            scanned_files: 12,
            indexed_files: 10,
            ..IndexStats::default()
        };
        server.record_stats(&stats);

        let (updated, _) = server.route(&request("GET", "/stats"));
        let decoded: IndexStats =
            serde_json::from_slice(&updated.body).unwrap();
        assert_eq!(decoded.scanned_files, 12);
        assert_eq!(decoded.indexed_files, 10);
    }

    #[test]
    fn test_route_pid_is_own_process() {
        let server = test_server();
        let (response, _) = server.route(&request("GET", "/pid"));
        assert_eq!(
            response.body_text().parse::<u32>().unwrap(),
            std::process::id()
        );
    }

    #[test]
    fn test_route_kill_requests_exit() {
        let server = test_server();
        let (response, exit) = server.route(&request("POST", "/kill"));

        assert_eq!(response.status, 200);
        assert!(exit);
        // The flags flip in initiate_shutdown, which the connection
        // handler calls after writing the response.
        assert!(!server.cancel_token().load(Ordering::SeqCst));
    }

    #[test]
    fn test_unknown_routes_are_not_found() {
        let server = test_server();

        let (response, exit) = server.route(&request("GET", "/nope"));
        assert_eq!(response.status, 404);
        assert!(!exit);

        let (response, _) = server.route(&request("DELETE", "/ping"));
        assert_eq!(response.status, 404);
    }

    #[test]
    fn test_initiate_shutdown_raises_cancel() {
        let server = test_server();
        server.initiate_shutdown();
        assert!(server.cancel_token().load(Ordering::SeqCst));
    }
}
