//! # snapsearch - Snapshot Search and Fetch
//!
//! snapsearch finds files across repository snapshots with a small
//! filter query language, fetches them by content id with bounded
//! concurrency, and keeps the index fresh through a supervised
//! background daemon.
//!
//! ## Architecture
//!
//! The crate is organized into these main modules:
//!
//! - [`query`] - Scanner and parser for the filter query language
//! - [`index`] - Index engine contract and the manifest implementation
//! - [`download`] - Worker-pool download manager with a durable cache
//! - [`daemon`] - Control socket server, client and daemon supervisor
//! - [`events`] - Minimal in-process event bus
//! - [`config`] - Settings file and data-directory layout
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use snapsearch::config::Paths;
//! use snapsearch::download::{DownloadManager, DownloadStore};
//! use snapsearch::index::{ManifestIndex, SearchIndexClient};
//! use snapsearch::query::parse_query;
//!
//! let paths = Paths::resolve(None).unwrap();
//! let index = Arc::new(ManifestIndex::new(paths.manifest_file("media")));
//!
//! // Translate the user query and run it against the index.
//! let query = parse_query("type:audio size:>100MB swamp").unwrap();
//! for file in index.search(&query).unwrap() {
//!     println!("{}  {}", file.id, file.path);
//! }
//!
//! // Fetch one result by id.
//! let store = DownloadStore::open(&paths.store_file("media")).unwrap();
//! let manager = Arc::new(
//!     DownloadManager::new(index, store, paths.downloads_dir(), "xdg-open".into(), 5)
//!         .unwrap(),
//! );
//! manager.download("1db57f563dd3464b");
//! ```
//!
//! ## Moving parts
//!
//! Queries are translated, not evaluated: the parser rewrites
//! `type:`/`size:`/date filters into the index engine's syntax and the
//! engine does the matching. Downloads commit with a temp-file rename
//! and only then become durable records, so a crash never leaves a
//! half-visible file. The daemon is watched over a Unix control socket
//! speaking plain HTTP, and the supervisor derives its running state
//! purely from liveness polls.

pub mod config;
pub mod daemon;
pub mod download;
pub mod events;
pub mod index;
pub mod query;
