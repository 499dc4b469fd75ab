//! Shared types for the index engine contract

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use thiserror::Error;

/// A file known to the search index
///
/// Identity is the content-addressed id, a fixed-length lowercase hex
/// string. The download side treats this as read-only metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Content fingerprint; lookup key for index and download cache
    pub id: String,
    /// Display name (base name)
    pub name: String,
    /// Path inside the indexed tree
    pub path: String,
    /// Declared size in bytes
    pub size: u64,
    /// Content hash; equal for identically-byted files under different names
    pub bhash: String,
}

/// Progress counters for one indexing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    pub scanned_files: u64,
    pub indexed_files: u64,
    pub scanned_snapshots: u32,
    pub total_snapshots: u32,
    pub current_snapshot_files: u64,
    pub current_snapshot_total_files: u64,
    pub errors: u64,
}

impl IndexStats {
    /// Completion of the current snapshot in percent, if the total is known
    pub fn current_snapshot_percent(&self) -> Option<u8> {
        if self.current_snapshot_total_files == 0 {
            return None;
        }
        let pct = self.current_snapshot_files * 100 / self.current_snapshot_total_files;
        Some(pct.min(100) as u8)
    }
}

/// Result type for index operations
pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Errors surfaced by index implementations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("manifest entry is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("no index manifest at {0}")]
    MissingManifest(PathBuf),

    #[error("file '{0}' is not in the index")]
    UnknownFile(String),

    #[error("content mismatch for '{id}': source changed since indexing")]
    ContentMismatch { id: String },

    #[error("indexing cancelled")]
    Cancelled,
}

impl IndexError {
    /// Cancellation is a clean stop, not a failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, IndexError::Cancelled)
    }
}

/// Read side of the index engine: metadata lookup, content fetch, search
pub trait SearchIndexClient: Send + Sync {
    /// Resolve file metadata by id; `None` when the id is unknown
    fn lookup(&self, id: &str) -> IndexResult<Option<RemoteFile>>;

    /// Stream file content into `dest`; returns the number of bytes written
    fn fetch(&self, id: &str, dest: &mut dyn Write) -> IndexResult<u64>;

    /// Evaluate an engine-syntax query and return matching files
    fn search(&self, query: &str) -> IndexResult<Vec<RemoteFile>>;
}

/// Write side of the index engine: one full indexing run
pub trait RepositoryIndexer: Send + Sync {
    /// Whether a run would pick up new data
    fn needs_run(&self) -> IndexResult<bool>;

    /// Run a full indexing pass, reporting progress after each file.
    /// Checks `cancel` between files and returns [`IndexError::Cancelled`]
    /// when it is set.
    fn run(
        &self,
        progress: &(dyn Fn(&IndexStats) + Sync),
        cancel: &AtomicBool,
    ) -> IndexResult<IndexStats>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_percent() {
        let mut stats = IndexStats::default();
        assert_eq!(stats.current_snapshot_percent(), None);

        stats.current_snapshot_total_files = 200;
        stats.current_snapshot_files = 50;
        assert_eq!(stats.current_snapshot_percent(), Some(25));

        stats.current_snapshot_files = 200;
        assert_eq!(stats.current_snapshot_percent(), Some(100));
    }

    #[test]
    fn test_stats_json_roundtrip() {
        let stats = IndexStats {
            scanned_files: 10,
            indexed_files: 9,
            scanned_snapshots: 1,
            total_snapshots: 1,
            current_snapshot_files: 9,
            current_snapshot_total_files: 10,
            errors: 1,
        };

        let json = serde_json::to_string(&stats).unwrap();
        let decoded: IndexStats = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn test_cancelled_is_clean_stop() {
        assert!(IndexError::Cancelled.is_cancelled());
        assert!(!IndexError::MissingManifest(PathBuf::from("/x")).is_cancelled());
    }
}
