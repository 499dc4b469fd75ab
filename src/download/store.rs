//! Durable record of completed downloads.
//!
//! Each repository keeps a small redb database mapping file ids to the
//! [`DownloadRecord`] written when a transfer commits. A file is only
//! considered downloaded once its record is here, so the write happens
//! after the exported copy is fully in place.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};

use super::DownloadResult;
use crate::index::RemoteFile;

const DOWNLOADS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("downloads");

/// One committed download: the remote file it came from, where the
/// exported copy lives, and when the transfer finished.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub file: RemoteFile,
    pub local_path: PathBuf,
    pub completed_at: DateTime<Utc>,
}

pub struct DownloadStore {
    db: Database,
    #[cfg(test)]
    fail_next_put: std::sync::atomic::AtomicBool,
}

impl DownloadStore {
    pub fn open(path: &Path) -> DownloadResult<Self> {
        let db = Database::create(path)?;

        // Ensure the table exists by opening it in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOWNLOADS)?;
        txn.commit()?;

        Ok(Self {
            db,
            #[cfg(test)]
            fail_next_put: std::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Make the next [`Self::put`] fail, standing in for a database
    /// that breaks between a transfer's rename and its record write.
    #[cfg(test)]
    pub(crate) fn fail_next_put(&self) {
        self.fail_next_put
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }

    /// Insert or replace the record for a file id. Returns once the
    /// transaction has committed.
    pub fn put(&self, record: &DownloadRecord) -> DownloadResult<()> {
        #[cfg(test)]
        if self
            .fail_next_put
            .swap(false, std::sync::atomic::Ordering::SeqCst)
        {
            return Err(std::io::Error::other("record store unavailable").into());
        }

        let data = serde_json::to_vec(record)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOWNLOADS)?;
            table.insert(record.file.id.as_str(), data.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> DownloadResult<Option<DownloadRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOWNLOADS)?;
        match table.get(id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, id: &str) -> DownloadResult<bool> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut table = txn.open_table(DOWNLOADS)?;
            table.remove(id)?.is_some()
        };
        txn.commit()?;
        Ok(removed)
    }

    /// All records, ordered by file id.
    pub fn all(&self) -> DownloadResult<Vec<DownloadRecord>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOWNLOADS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_k, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }
}

impl std::fmt::Debug for DownloadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, DownloadStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store =
            DownloadStore::open(&tmp.path().join("downloads.redb")).unwrap();
        (tmp, store)
    }

    fn record(id: &str, name: &str) -> DownloadRecord {
        DownloadRecord {
            file: RemoteFile {
                id: id.to_string(),
                name: name.to_string(),
                path: format!("music/{name}"),
                size: 1024,
                bhash: "00000000000000aa".to_string(),
            },
            local_path: PathBuf::from("/data/downloads/ab").join(name),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_records_crud() {
        let (_tmp, store) = test_store();

        assert_eq!(store.all().unwrap(), vec![]);
        assert_eq!(store.get("ab12").unwrap(), None);

        let rec = record("ab12", "song.mp3");
        store.put(&rec).unwrap();
        assert_eq!(store.get("ab12").unwrap(), Some(rec.clone()));

        let all = store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file.name, "song.mp3");

        assert!(store.remove("ab12").unwrap());
        assert!(!store.remove("ab12").unwrap());
        assert_eq!(store.get("ab12").unwrap(), None);
    }

    #[test]
    fn test_put_replaces_existing() {
        let (_tmp, store) = test_store();

        store.put(&record("ab12", "song.mp3")).unwrap();
        let mut updated = record("ab12", "song.mp3");
        updated.local_path = PathBuf::from("/elsewhere/song.mp3");
        store.put(&updated).unwrap();

        assert_eq!(store.all().unwrap().len(), 1);
        assert_eq!(
            store.get("ab12").unwrap().unwrap().local_path,
            PathBuf::from("/elsewhere/song.mp3")
        );
    }

    #[test]
    fn test_all_ordered_by_id() {
        let (_tmp, store) = test_store();

        store.put(&record("cc", "c.mp3")).unwrap();
        store.put(&record("aa", "a.mp3")).unwrap();
        store.put(&record("bb", "b.mp3")).unwrap();

        let ids: Vec<_> =
            store.all().unwrap().into_iter().map(|r| r.file.id).collect();
        assert_eq!(ids, vec!["aa", "bb", "cc"]);
    }

    #[test]
    fn test_injected_put_failure_is_one_shot() {
        let (_tmp, store) = test_store();

        store.fail_next_put();
        assert!(store.put(&record("ab12", "song.mp3")).is_err());
        assert_eq!(store.get("ab12").unwrap(), None);

        // The flag resets; the retry commits normally.
        store.put(&record("ab12", "song.mp3")).unwrap();
        assert!(store.get("ab12").unwrap().is_some());
    }

    #[test]
    fn test_reopen_preserves_records() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("downloads.redb");

        {
            let store = DownloadStore::open(&path).unwrap();
            store.put(&record("ab12", "song.mp3")).unwrap();
        }

        {
            let store = DownloadStore::open(&path).unwrap();
            let found = store.get("ab12").unwrap().unwrap();
            assert_eq!(found.file.path, "music/song.mp3");
        }
    }
}
