//! history.rs — durable set of already-delivered identifiers.
//!
//! Records are appended (one JSON line each) as items are delivered and are
//! removed only by [`HistoryWriter::compact`]. Lookups take a shared lock on the
//! in-memory index; appends and compaction go through the single
//! [`HistoryWriter`], so they never interleave.

use chrono::{DateTime, Duration, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::StoreError;

/// One delivered item. Never updated once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub first_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    first_seen: DateTime<Utc>,
    /// Insertion sequence; breaks first_seen ties in FIFO eviction.
    seq: u64,
}

#[derive(Debug, Default)]
struct Index {
    records: HashMap<String, Entry>,
    next_seq: u64,
}

impl Index {
    fn insert(&mut self, id: String, first_seen: DateTime<Utc>) -> bool {
        if self.records.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(id, Entry { first_seen, seq });
        true
    }

    /// Records oldest first.
    fn ordered(&self) -> Vec<DeliveryRecord> {
        let mut rows: Vec<(&String, &Entry)> = self.records.iter().collect();
        rows.sort_by_key(|(_, e)| (e.first_seen, e.seq));
        rows.into_iter()
            .map(|(id, e)| DeliveryRecord {
                id: id.clone(),
                first_seen: e.first_seen,
            })
            .collect()
    }
}

/// Age and size bounds enforced by compaction.
#[derive(Debug, Clone, Copy)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_records: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CompactionReport {
    pub expired: usize,
    pub evicted: usize,
    pub remaining: usize,
}

#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    index: RwLock<Index>,
    writer: Mutex<Journal>,
}

#[derive(Debug)]
struct Journal {
    file: File,
}

impl HistoryStore {
    /// Open (or create) the journal at `path` and load it into memory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let (index, torn) = load_index(&path)?;
        let file = if torn {
            // rewrite so the next append doesn't land on the broken line
            tracing::warn!(path = %path.display(), "dropping torn final history line");
            rewrite(&path, &index.ordered())?
        } else {
            OpenOptions::new().create(true).append(true).open(&path)?
        };
        gauge!("courier_history_size").set(index.records.len() as f64);
        tracing::info!(path = %path.display(), records = index.records.len(), "history loaded");

        Ok(Self {
            path,
            index: RwLock::new(index),
            writer: Mutex::new(Journal { file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, id: &str) -> Result<bool, StoreError> {
        let idx = self.index.read().map_err(|_| StoreError::Poisoned)?;
        Ok(idx.records.contains_key(id))
    }

    pub fn len(&self) -> usize {
        self.index.read().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records, oldest first.
    pub fn snapshot(&self) -> Result<Vec<DeliveryRecord>, StoreError> {
        let idx = self.index.read().map_err(|_| StoreError::Poisoned)?;
        Ok(idx.ordered())
    }

    /// Exclusive writer. Held by a pipeline run for its whole delivery phase and
    /// by the maintenance cycle while compacting.
    pub async fn writer(&self) -> HistoryWriter<'_> {
        HistoryWriter {
            store: self,
            journal: self.writer.lock().await,
        }
    }

    /// Convenience: take the writer and compact.
    pub async fn compact(&self, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<CompactionReport, StoreError> {
        self.writer().await.compact(policy, now)
    }
}

pub struct HistoryWriter<'a> {
    store: &'a HistoryStore,
    journal: MutexGuard<'a, Journal>,
}

impl HistoryWriter<'_> {
    /// Append a record for `id`. Returns `false` if it was already present.
    pub fn record(&mut self, id: &str, now: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.store.contains(id)? {
            return Ok(false);
        }
        let rec = DeliveryRecord {
            id: id.to_string(),
            first_seen: now,
        };
        let mut line = serde_json::to_string(&rec).map_err(|e| StoreError::Corrupt {
            line: 0,
            reason: e.to_string(),
        })?;
        line.push('\n');
        self.journal.file.write_all(line.as_bytes())?;
        self.journal.file.flush()?;
        self.journal.file.sync_data()?;

        let mut idx = self.store.index.write().map_err(|_| StoreError::Poisoned)?;
        idx.insert(rec.id, rec.first_seen);
        gauge!("courier_history_size").set(idx.records.len() as f64);
        Ok(true)
    }

    /// Drop records older than `max_age`, then evict oldest-first until at most
    /// `max_records` remain.
    ///
    /// The journal is rewritten atomically before the index changes; if the
    /// rewrite fails, both still hold every record.
    pub fn compact(&mut self, policy: RetentionPolicy, now: DateTime<Utc>) -> Result<CompactionReport, StoreError> {
        let cutoff = now - policy.max_age;
        let all = self.store.snapshot()?;
        let before = all.len();

        let fresh: Vec<DeliveryRecord> = all.into_iter().filter(|r| r.first_seen >= cutoff).collect();
        let expired = before - fresh.len();
        let evicted = fresh.len().saturating_sub(policy.max_records);
        let kept: Vec<DeliveryRecord> = fresh.into_iter().skip(evicted).collect();

        if expired > 0 || evicted > 0 {
            // the rewritten file replaces the journal inode; append through its handle
            self.journal.file = rewrite(&self.store.path, &kept)?;

            let keep: HashSet<&str> = kept.iter().map(|r| r.id.as_str()).collect();
            let mut idx = self.store.index.write().map_err(|_| StoreError::Poisoned)?;
            idx.records.retain(|id, _| keep.contains(id.as_str()));
        }

        gauge!("courier_history_size").set(kept.len() as f64);
        let report = CompactionReport {
            expired,
            evicted,
            remaining: kept.len(),
        };
        tracing::info!(?report, "history compacted");
        Ok(report)
    }
}

/// Returns the index and whether a torn final line was skipped.
fn load_index(path: &Path) -> Result<(Index, bool), StoreError> {
    let mut index = Index::default();
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((index, false)),
        Err(e) => return Err(e.into()),
    };

    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    let last_content = lines.iter().rposition(|l| !l.trim().is_empty());
    let mut torn = false;

    for (i, raw) in lines.iter().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DeliveryRecord>(line) {
            Ok(rec) => {
                index.insert(rec.id, rec.first_seen);
            }
            Err(_) if Some(i) == last_content => torn = true,
            Err(e) => {
                return Err(StoreError::Corrupt {
                    line: i + 1,
                    reason: e.to_string(),
                })
            }
        }
    }
    Ok((index, torn))
}

/// Atomically replace the journal with `records`. Returns a handle positioned
/// at the end of the new file.
fn rewrite(path: &Path, records: &[DeliveryRecord]) -> Result<File, StoreError> {
    let tmp = path.with_extension("jsonl.tmp");
    let mut f = File::create(&tmp)?;
    for rec in records {
        let line = serde_json::to_string(rec).map_err(|e| StoreError::Corrupt {
            line: 0,
            reason: e.to_string(),
        })?;
        writeln!(f, "{line}")?;
    }
    f.sync_all()?;
    fs::rename(tmp, path)?;
    Ok(f)
}

#[cfg(test)]
impl HistoryStore {
    /// Poison the index lock so every later lookup fails.
    pub(crate) fn poison(&self) {
        let _ = std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = self.index.write();
                panic!("poisoning history index");
            })
            .join()
        });
    }
}
