//! Durable per-entry state, persisted as an append-only `map.jsonl` beside
//! the artifacts plus an in-memory index built by a sequential scan at
//! startup. Updates append a full record and fsync before the orchestrator
//! advances the entry, so a crash loses at most one in-flight stage.

use models::MapRecord;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("i/o failure on state file {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode entry record")]
    Encode(#[from] serde_json::Error),
}

/// What startup recovery did to the loaded records.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryStats {
    pub entries: usize,
    /// Entries whose in-flight stage was demoted back to pending.
    pub demoted: usize,
    /// Unparseable lines skipped during the scan (torn tail writes).
    pub skipped_lines: usize,
}

struct Inner {
    writer: BufWriter<File>,
    index: HashMap<String, MapRecord>,
    /// Superseded records in the file; drives compaction.
    dead: usize,
}

/// Single-writer, multi-reader store. Readers snapshot the in-memory index;
/// all appends serialize through one internal lock.
pub struct StateStore {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl StateStore {
    /// Open (or create) the map file, scan it into the index, and apply the
    /// recovery rule: a stage recorded as in-progress belonged to a worker
    /// that died mid-stage, and is demoted to pending.
    pub fn open(path: &Path) -> Result<(Self, RecoveryStats), Error> {
        let io = |source| Error::Io {
            path: path.to_owned(),
            source,
        };

        let mut index = HashMap::new();
        let mut total_records = 0usize;
        let mut stats = RecoveryStats::default();

        match File::open(path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line.map_err(io)?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<MapRecord>(&line) {
                        Ok(record) => {
                            total_records += 1;
                            index.insert(record.id.clone(), record);
                        }
                        Err(err) => {
                            stats.skipped_lines += 1;
                            tracing::warn!(?err, "skipping unparseable map record");
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(io(source)),
        }

        let mut demoted_ids = Vec::new();
        for record in index.values_mut() {
            if record.status.demote_in_progress() {
                demoted_ids.push(record.id.clone());
            }
        }
        stats.demoted = demoted_ids.len();
        stats.entries = index.len();

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io)?;

        let store = Self {
            path: path.to_owned(),
            inner: Mutex::new(Inner {
                writer: BufWriter::new(file),
                index,
                dead: total_records.saturating_sub(stats.entries),
            }),
        };

        // Demotions must be durable before any new work references them.
        for id in demoted_ids {
            if let Some(record) = store.get(&id) {
                store.upsert(&record)?;
            }
        }

        Ok((store, stats))
    }

    /// Append a full record for this entry and fsync. The in-memory index is
    /// updated only after the write is durable.
    pub fn upsert(&self, record: &MapRecord) -> Result<(), Error> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let io = |source| Error::Io {
            path: self.path.clone(),
            source,
        };
        inner.writer.write_all(line.as_bytes()).map_err(io)?;
        inner.writer.flush().map_err(io)?;
        inner.writer.get_ref().sync_data().map_err(io)?;

        if inner.index.insert(record.id.clone(), record.clone()).is_some() {
            inner.dead += 1;
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<MapRecord> {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .index
            .get(id)
            .cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .index
            .contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .index
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A point-in-time copy of every live record, for resume scheduling and
    /// the diagnostic reporter.
    pub fn snapshot(&self) -> Vec<MapRecord> {
        self.inner
            .lock()
            .expect("state store lock poisoned")
            .index
            .values()
            .cloned()
            .collect()
    }

    /// Rewrite the file with only live records once dead ones dominate.
    /// Returns whether a compaction ran.
    pub fn compact_if_needed(&self) -> Result<bool, Error> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        if inner.dead <= inner.index.len() || inner.dead < 1024 {
            return Ok(false);
        }
        let io = |source| Error::Io {
            path: self.path.clone(),
            source,
        };

        let tmp = self.path.with_extension("jsonl.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp).map_err(io)?);
            for record in inner.index.values() {
                let mut line = serde_json::to_string(record)?;
                line.push('\n');
                writer.write_all(line.as_bytes()).map_err(io)?;
            }
            writer.flush().map_err(io)?;
            writer.get_ref().sync_data().map_err(io)?;
        }
        std::fs::rename(&tmp, &self.path).map_err(io)?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(io)?;
        inner.writer = BufWriter::new(file);
        let dead = std::mem::take(&mut inner.dead);
        tracing::info!(live = inner.index.len(), dead, "compacted state store");
        Ok(true)
    }

    /// Truncate everything; used by `--reset`.
    pub fn reset(&self) -> Result<(), Error> {
        let mut inner = self.inner.lock().expect("state store lock poisoned");
        let io = |source| Error::Io {
            path: self.path.clone(),
            source,
        };
        let file = File::create(&self.path).map_err(io)?;
        inner.writer = BufWriter::new(file);
        inner.index.clear();
        inner.dead = 0;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use models::{Entry, Identifiers, Stage, StageStatus};

    fn record(id: &str) -> MapRecord {
        Entry::new(id.to_string(), Identifiers::default()).to_map_record()
    }

    #[test]
    fn test_open_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, stats) = StateStore::open(&tmp.path().join("map.jsonl")).unwrap();
        assert_eq!(stats, RecoveryStats::default());
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("map.jsonl");

        let (store, _) = StateStore::open(&path).unwrap();
        let mut a = record("aaaaaaaa");
        store.upsert(&a).unwrap();
        a.status.set(Stage::Metadata, StageStatus::success());
        store.upsert(&a).unwrap();
        store.upsert(&record("bbbbbbbb")).unwrap();
        drop(store);

        let (store, stats) = StateStore::open(&path).unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.demoted, 0);
        assert!(store.get("aaaaaaaa").unwrap().status.metadata.is_success());
        assert!(store.contains("bbbbbbbb"));
    }

    #[test]
    fn test_recovery_demotes_in_progress() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("map.jsonl");

        let (store, _) = StateStore::open(&path).unwrap();
        let mut a = record("aaaaaaaa");
        a.status.set(Stage::Pdf, StageStatus::InProgress);
        store.upsert(&a).unwrap();
        drop(store);

        let (store, stats) = StateStore::open(&path).unwrap();
        assert_eq!(stats.demoted, 1);
        assert_eq!(store.get("aaaaaaaa").unwrap().status.pdf, StageStatus::Pending);

        // The demotion is durable: a third open sees it without recovering.
        drop(store);
        let (_, stats) = StateStore::open(&path).unwrap();
        assert_eq!(stats.demoted, 0);
    }

    #[test]
    fn test_torn_tail_line_is_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("map.jsonl");

        let (store, _) = StateStore::open(&path).unwrap();
        store.upsert(&record("aaaaaaaa")).unwrap();
        drop(store);

        use std::io::Write as _;
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"id\": \"bbbb").unwrap();
        drop(file);

        let (store, stats) = StateStore::open(&path).unwrap();
        assert_eq!(stats.skipped_lines, 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_reset() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("map.jsonl");
        let (store, _) = StateStore::open(&path).unwrap();
        store.upsert(&record("aaaaaaaa")).unwrap();
        store.reset().unwrap();
        assert!(store.is_empty());
        drop(store);
        let (store, _) = StateStore::open(&path).unwrap();
        assert!(store.is_empty());
    }
}
