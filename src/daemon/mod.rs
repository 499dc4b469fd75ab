//! Indexing daemon control plane
//!
//! The indexing run lives in a separate `snapsearchd` process. This
//! module holds both halves of the arrangement: the control server the
//! daemon embeds ([`ControlServer`]), the socket client everything else
//! talks through ([`ControlClient`]), and the supervisor that launches
//! and watches the daemon from the interactive side ([`Supervisor`]).
//!
//! The protocol is plain HTTP/1.1 over a Unix socket at a well-known
//! path in the data directory, with one request per connection.

pub mod client;
pub mod http;
pub mod procstats;
pub mod server;
pub mod supervisor;

pub use client::{ControlClient, ControlError, ControlResult};
pub use procstats::ProcStats;
pub use server::ControlServer;
pub use supervisor::{DaemonEvent, Supervisor, SupervisorOptions};
