//! Manifest-backed index implementation
//!
//! The indexer half walks a source tree, hashes every file into a
//! content-addressed id, and appends one JSON object per line to a manifest
//! written atomically (temp file, then rename). The client half serves
//! lookups, fetches, and query evaluation from that manifest. It is a
//! self-contained stand-in honoring the engine contract, not a full-text
//! engine: query clauses are evaluated per entry with must/should
//! semantics.

use chrono::{DateTime, Utc};
use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::fs::{self, File};
use std::hash::Hasher;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

use super::types::{
    IndexError, IndexResult, IndexStats, RemoteFile, RepositoryIndexer, SearchIndexClient,
};

/// Read buffer for hashing and fetching
const READ_CHUNK: usize = 64 * 1024;

/// One manifest line: the indexed file plus engine-side bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub file: RemoteFile,
    /// Absolute path content is served from
    pub source: PathBuf,
    /// File modification time at indexing
    pub modified: DateTime<Utc>,
    /// When this entry was (re)indexed
    pub updated: DateTime<Utc>,
}

/// Read side: lookup, fetch, and search over a manifest file
pub struct ManifestIndex {
    manifest_path: PathBuf,
}

impl ManifestIndex {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }

    /// Load every manifest entry; errors if no manifest has been written yet
    pub fn entries(&self) -> IndexResult<Vec<ManifestEntry>> {
        if !self.manifest_path.exists() {
            return Err(IndexError::MissingManifest(self.manifest_path.clone()));
        }

        let reader = BufReader::new(File::open(&self.manifest_path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    fn find(&self, id: &str) -> IndexResult<Option<ManifestEntry>> {
        Ok(self.entries()?.into_iter().find(|e| e.file.id == id))
    }
}

impl SearchIndexClient for ManifestIndex {
    fn lookup(&self, id: &str) -> IndexResult<Option<RemoteFile>> {
        Ok(self.find(id)?.map(|e| e.file))
    }

    fn fetch(&self, id: &str, dest: &mut dyn Write) -> IndexResult<u64> {
        let entry = self
            .find(id)?
            .ok_or_else(|| IndexError::UnknownFile(id.to_string()))?;

        // Hash while streaming so a source file that changed since indexing
        // is detected instead of served silently
        let mut file = File::open(&entry.source)?;
        let mut hasher = DefaultHasher::new();
        let mut buf = vec![0u8; READ_CHUNK];
        let mut total = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.write(&buf[..n]);
            dest.write_all(&buf[..n])?;
            total += n as u64;
        }

        let bhash = format!("{:016x}", hasher.finish());
        if bhash != entry.file.bhash {
            return Err(IndexError::ContentMismatch {
                id: id.to_string(),
            });
        }

        Ok(total)
    }

    fn search(&self, query: &str) -> IndexResult<Vec<RemoteFile>> {
        let entries = self.entries()?;
        debug!(query, entries = entries.len(), "evaluating query");
        Ok(entries
            .into_iter()
            .filter(|e| matches_query(e, query))
            .map(|e| e.file)
            .collect())
    }
}

/// Write side: one indexing pass over a source tree
pub struct ManifestIndexer {
    source: PathBuf,
    manifest_path: PathBuf,
}

impl ManifestIndexer {
    pub fn new(source: impl Into<PathBuf>, manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            manifest_path: manifest_path.into(),
        }
    }

    /// Walk the source tree; nothing is skipped (backup semantics)
    fn collect_files(&self, cancel: &AtomicBool) -> IndexResult<Vec<(PathBuf, String)>> {
        let walker = WalkBuilder::new(&self.source)
            .hidden(false)
            .ignore(false)
            .parents(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build();

        let mut files = Vec::new();
        for entry in walker {
            if cancel.load(Ordering::Relaxed) {
                return Err(IndexError::Cancelled);
            }
            let entry = match entry {
                Ok(e) => e,
                Err(err) => {
                    warn!(error = %err, "walk error");
                    continue;
                }
            };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let rel = path
                .strip_prefix(&self.source)
                .unwrap_or(path)
                .to_string_lossy()
                .into_owned();
            files.push((path.to_path_buf(), rel));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }

    fn index_file(path: &Path, rel: &str, updated: DateTime<Utc>) -> IndexResult<ManifestEntry> {
        let (id, bhash, size) = hash_file(path, rel)?;
        let meta = fs::metadata(path)?;
        let modified = meta.modified().map(DateTime::<Utc>::from).unwrap_or(updated);
        let name = Path::new(rel)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel.to_string());

        Ok(ManifestEntry {
            file: RemoteFile {
                id,
                name,
                path: rel.to_string(),
                size,
                bhash,
            },
            source: path.to_path_buf(),
            modified,
            updated,
        })
    }

    /// Write all entries, then atomically swap the manifest into place
    fn write_manifest(&self, entries: &[ManifestEntry]) -> IndexResult<()> {
        if let Some(parent) = self.manifest_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = temp_path(&self.manifest_path);
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for entry in entries {
                serde_json::to_writer(&mut writer, entry)?;
                writer.write_all(b"\n")?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp_path, &self.manifest_path)?;
        Ok(())
    }
}

impl RepositoryIndexer for ManifestIndexer {
    fn needs_run(&self) -> IndexResult<bool> {
        let manifest_mtime = match fs::metadata(&self.manifest_path) {
            Ok(meta) => meta.modified()?,
            Err(_) => return Ok(true),
        };

        let cancel = AtomicBool::new(false);
        for (path, _) in self.collect_files(&cancel)? {
            let mtime = fs::metadata(&path)?.modified()?;
            if mtime > manifest_mtime {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn run(
        &self,
        progress: &(dyn Fn(&IndexStats) + Sync),
        cancel: &AtomicBool,
    ) -> IndexResult<IndexStats> {
        let files = self.collect_files(cancel)?;
        let mut stats = IndexStats {
            total_snapshots: 1,
            current_snapshot_total_files: files.len() as u64,
            ..Default::default()
        };
        progress(&stats);

        let updated = Utc::now();
        let mut entries = Vec::with_capacity(files.len());
        for (path, rel) in &files {
            if cancel.load(Ordering::Relaxed) {
                return Err(IndexError::Cancelled);
            }

            stats.scanned_files += 1;
            stats.current_snapshot_files += 1;
            match Self::index_file(path, rel, updated) {
                Ok(entry) => {
                    entries.push(entry);
                    stats.indexed_files += 1;
                }
                Err(err) => {
                    stats.errors += 1;
                    warn!(path = %path.display(), error = %err, "skipping unreadable file");
                }
            }
            progress(&stats);
        }

        self.write_manifest(&entries)?;
        stats.scanned_snapshots = 1;
        progress(&stats);

        Ok(stats)
    }
}

/// Temp name colocated with the final path so the rename stays on one
/// filesystem
fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Hash a file into (id, bhash, size). The id folds in the relative path so
/// renamed copies of the same bytes stay distinct; bhash covers content
/// only.
fn hash_file(path: &Path, rel: &str) -> IndexResult<(String, String, u64)> {
    let mut id_hasher = DefaultHasher::new();
    let mut content_hasher = DefaultHasher::new();
    id_hasher.write(rel.as_bytes());

    let mut file = File::open(path)?;
    let mut buf = vec![0u8; READ_CHUNK];
    let mut total = 0u64;
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        id_hasher.write(&buf[..n]);
        content_hasher.write(&buf[..n]);
        total += n as u64;
    }

    Ok((
        format!("{:016x}", id_hasher.finish()),
        format!("{:016x}", content_hasher.finish()),
        total,
    ))
}

/// Must/should clause evaluation: every `+` clause must match; if any bare
/// clause exists, at least one must match
fn matches_query(entry: &ManifestEntry, query: &str) -> bool {
    let mut any_optional = false;
    let mut optional_hit = false;

    for raw in query.split_whitespace() {
        let (mandatory, text) = match raw.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, raw),
        };

        let hit = clause_matches(entry, text);
        if mandatory {
            if !hit {
                return false;
            }
        } else {
            any_optional = true;
            optional_hit |= hit;
        }
    }

    !any_optional || optional_hit
}

fn clause_matches(entry: &ManifestEntry, clause: &str) -> bool {
    if let Some((field, value)) = clause.split_once(':') {
        match field.to_lowercase().as_str() {
            "_id" => return entry.file.id == value,
            "bhash" => return entry.file.bhash == value,
            "ext" => {
                return Path::new(&entry.file.path)
                    .extension()
                    .map(|e| e.to_string_lossy().eq_ignore_ascii_case(value))
                    .unwrap_or(false);
            }
            "size" => return ordered_clause_matches(entry.file.size as i64, value, |s| {
                s.parse::<i64>().ok()
            }),
            "mtime" => return time_clause_matches(entry.modified, value),
            "updated" => return time_clause_matches(entry.updated, value),
            _ => {}
        }
    }

    // Plain words match name or path, case-insensitively
    let needle = clause.to_lowercase();
    entry.file.name.to_lowercase().contains(&needle)
        || entry.file.path.to_lowercase().contains(&needle)
}

fn time_clause_matches(actual: DateTime<Utc>, value: &str) -> bool {
    ordered_clause_matches(actual.timestamp(), value, |raw| {
        DateTime::parse_from_rfc3339(raw.trim_matches('"'))
            .ok()
            .map(|dt| dt.timestamp())
    })
}

fn ordered_clause_matches<P>(actual: i64, value: &str, parse: P) -> bool
where
    P: Fn(&str) -> Option<i64>,
{
    let (op, raw) = split_op(value);
    let Some(wanted) = parse(raw) else {
        return false;
    };
    match op {
        ">=" => actual >= wanted,
        "<=" => actual <= wanted,
        ">" => actual > wanted,
        "<" => actual < wanted,
        _ => actual == wanted,
    }
}

fn split_op(value: &str) -> (&str, &str) {
    for op in [">=", "<=", ">", "<", "="] {
        if let Some(rest) = value.strip_prefix(op) {
            return (op, rest);
        }
    }
    ("", value)
}
