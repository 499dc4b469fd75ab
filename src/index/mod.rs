//! Index engine contract and the built-in manifest implementation
//!
//! The search engine proper is an external collaborator; this module
//! defines the call contracts the rest of the crate programs against
//! ([`SearchIndexClient`], [`RepositoryIndexer`]) plus a small
//! manifest-backed implementation that makes the binaries usable end to
//! end.

pub mod manifest;
pub mod types;

pub use manifest::{ManifestEntry, ManifestIndex, ManifestIndexer};
pub use types::{
    IndexError, IndexResult, IndexStats, RemoteFile, RepositoryIndexer, SearchIndexClient,
};
