//! Client for the daemon control socket
//!
//! Connects per call: control exchanges are single-shot and the server
//! closes the connection after each response, so holding a stream open
//! buys nothing.

use std::io::{BufReader, BufWriter};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use crate::daemon::http::{read_response, write_request, Response};
use crate::daemon::procstats::ProcStats;
use crate::index::IndexStats;

/// Read/write timeout. Control replies are immediate; anything slower
/// is treated as a dead daemon.
const IO_TIMEOUT: Duration = Duration::from_secs(2);

pub type ControlResult<T> = std::result::Result<T, ControlError>;

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("daemon is not running")]
    NotRunning,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("daemon error: {0}")]
    Server(String),

    #[error("invalid response from daemon")]
    InvalidResponse,
}

/// Issues control requests against a daemon socket path.
#[derive(Debug, Clone)]
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.socket_path
    }

    /// Liveness probe. Any failure, from a missing socket to a garbled
    /// reply, is just "not running".
    pub fn ping(&self) -> bool {
        matches!(
            self.request("GET", "/ping"),
            Ok(response) if response.status == 200 && response.body == b"pong"
        )
    }

    /// Progress counters of the current indexing run.
    pub fn stats(&self) -> ControlResult<IndexStats> {
        let response = self.expect_ok(self.request("GET", "/stats")?)?;
        serde_json::from_slice(&response.body)
            .map_err(|_| ControlError::InvalidResponse)
    }

    /// Resource usage of the daemon process.
    pub fn proc_stats(&self) -> ControlResult<ProcStats> {
        let response = self.expect_ok(self.request("GET", "/procstats")?)?;
        serde_json::from_slice(&response.body)
            .map_err(|_| ControlError::InvalidResponse)
    }

    /// Pid of the daemon process.
    pub fn pid(&self) -> ControlResult<i32> {
        let response = self.expect_ok(self.request("GET", "/pid")?)?;
        response
            .body_text()
            .trim()
            .parse()
            .map_err(|_| ControlError::InvalidResponse)
    }

    /// Ask the daemon to cancel any in-flight run and exit.
    pub fn kill(&self) -> ControlResult<()> {
        self.expect_ok(self.request("POST", "/kill")?)?;
        Ok(())
    }

    fn request(&self, method: &str, path: &str) -> ControlResult<Response> {
        if !self.socket_path.exists() {
            return Err(ControlError::NotRunning);
        }

        let stream = UnixStream::connect(&self.socket_path)
            .map_err(|_| ControlError::NotRunning)?;
        let _ = stream.set_read_timeout(Some(IO_TIMEOUT));
        let _ = stream.set_write_timeout(Some(IO_TIMEOUT));

        let mut writer = BufWriter::new(stream.try_clone()?);
        let mut reader = BufReader::new(stream);

        write_request(&mut writer, method, path)?;
        Ok(read_response(&mut reader)?)
    }

    fn expect_ok(&self, response: Response) -> ControlResult<Response> {
        if response.status == 200 {
            Ok(response)
        } else {
            Err(ControlError::Server(response.body_text()))
        }
    }
}
