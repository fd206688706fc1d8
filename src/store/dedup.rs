// src/store/dedup.rs
//! Dedup ledger: which source items have already been published.
//!
//! The file-backed store is an append-only JSON Lines log
//! (`{"item_id": "...", "published_at": "..."}` per line, plus the optional
//! `channel_id`/`title_key` pair used by the near-duplicate check). Each
//! append is flushed and synced before `insert_if_absent` reports success,
//! so a record survives a crash or restart the moment the caller sees `true`.
//!
//! Only newline-terminated lines count as committed. Bytes after the last
//! `\n` belong to an append that never reported success and are cut off,
//! both on open and before the next append.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::ensure_parent;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    pub item_id: String,
    pub published_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    /// Order-insensitive title fingerprint, see `scoring::text::title_key`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_key: Option<String>,
}

impl DedupRecord {
    pub fn new(item_id: &str, published_at: DateTime<Utc>) -> Self {
        Self {
            item_id: item_id.to_string(),
            published_at,
            channel_id: None,
            title_key: None,
        }
    }

    pub fn with_title_key(mut self, channel_id: &str, title_key: &str) -> Self {
        if !title_key.is_empty() {
            self.channel_id = Some(channel_id.to_string());
            self.title_key = Some(title_key.to_string());
        }
        self
    }

    fn is_similar(&self, channel_id: &str, title_key: &str, since: DateTime<Utc>) -> bool {
        self.published_at >= since
            && self.channel_id.as_deref() == Some(channel_id)
            && self.title_key.as_deref() == Some(title_key)
    }
}

/// At-most-once ledger. `insert_record` is the only write path and the
/// only operation that must be atomic across concurrent callers.
pub trait DedupStore: Send + Sync {
    fn contains(&self, item_id: &str) -> Result<bool, StoreError>;

    /// `Ok(true)` if newly recorded, `Ok(false)` if a record for the same
    /// item id already existed.
    fn insert_record(&self, rec: DedupRecord) -> Result<bool, StoreError>;

    fn insert_if_absent(&self, item_id: &str, published_at: DateTime<Utc>) -> Result<bool, StoreError> {
        self.insert_record(DedupRecord::new(item_id, published_at))
    }

    /// Item id of a record from `channel_id` with the same title key,
    /// published at or after `since`.
    fn find_similar(
        &self,
        channel_id: &str,
        title_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError>;

    /// Number of records published at or after `since`.
    fn published_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

fn find_in<'a>(
    records: impl Iterator<Item = &'a DedupRecord>,
    channel_id: &str,
    title_key: &str,
    since: DateTime<Utc>,
) -> Option<String> {
    if title_key.is_empty() {
        return None;
    }
    records
        .filter(|r| r.is_similar(channel_id, title_key, since))
        .min_by_key(|r| r.published_at)
        .map(|r| r.item_id.clone())
}

// ------------------------------------------------------------
// File-backed store
// ------------------------------------------------------------

#[derive(Debug)]
struct Ledger {
    index: HashMap<String, DedupRecord>,
    file: File,
    /// Length of the committed prefix of the log.
    committed_len: u64,
    /// Set when a failed append could not be rolled back.
    broken: bool,
}

#[derive(Debug)]
pub struct FileDedupStore {
    path: PathBuf,
    inner: Mutex<Ledger>,
}

impl FileDedupStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        ensure_parent(path)?;
        let (index, committed_len) = load_index(path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| StoreError::io(path, e))?;
        tracing::info!(
            target: "dedup",
            path = %path.display(),
            records = index.len(),
            "dedup ledger opened"
        );
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Ledger {
                index,
                file,
                committed_len,
                broken: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, Ledger>, StoreError> {
        let g = self
            .inner
            .lock()
            .map_err(|_| StoreError::Unavailable("dedup ledger lock poisoned".into()))?;
        if g.broken {
            return Err(StoreError::Unavailable(format!(
                "dedup ledger {} has an unrecoverable partial write; reopen required",
                self.path.display()
            )));
        }
        Ok(g)
    }
}

impl Ledger {
    /// Append one line at the committed end of the log and sync it. On
    /// failure the log is cut back to its committed length.
    fn append(&mut self, path: &Path, line: &[u8]) -> Result<(), StoreError> {
        let on_disk = self.file.metadata().map_err(|e| StoreError::io(path, e))?.len();
        if on_disk != self.committed_len {
            tracing::warn!(
                target: "dedup",
                path = %path.display(),
                committed = self.committed_len,
                on_disk,
                "discarding uncommitted bytes at the end of the ledger"
            );
            self.file
                .set_len(self.committed_len)
                .map_err(|e| StoreError::io(path, e))?;
        }

        let file = &mut self.file;
        let written = file
            .write_all(line)
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data());
        if let Err(e) = written {
            if let Err(rollback) = self.file.set_len(self.committed_len) {
                tracing::error!(
                    target: "dedup",
                    path = %path.display(),
                    error = %rollback,
                    "could not roll back a failed append"
                );
                self.broken = true;
            }
            return Err(StoreError::io(path, e));
        }
        self.committed_len += line.len() as u64;
        Ok(())
    }
}

impl DedupStore for FileDedupStore {
    fn contains(&self, item_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.index.contains_key(item_id))
    }

    fn insert_record(&self, rec: DedupRecord) -> Result<bool, StoreError> {
        let mut g = self.lock()?;
        if g.index.contains_key(&rec.item_id) {
            return Ok(false);
        }

        let mut line = serde_json::to_string(&rec).map_err(|e| StoreError::Corrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        line.push('\n');
        g.append(&self.path, line.as_bytes())?;

        g.index.insert(rec.item_id.clone(), rec);
        Ok(true)
    }

    fn find_similar(
        &self,
        channel_id: &str,
        title_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        Ok(find_in(self.lock()?.index.values(), channel_id, title_key, since))
    }

    fn published_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self
            .lock()?
            .index
            .values()
            .filter(|r| r.published_at >= since)
            .count())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.index.len())
    }
}

/// Parse the committed prefix of the log and cut off anything after it.
fn load_index(path: &Path) -> Result<(HashMap<String, DedupRecord>, u64), StoreError> {
    let mut index = HashMap::new();
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((index, 0)),
        Err(e) => return Err(StoreError::io(path, e)),
    };

    let committed = bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1);
    if committed < bytes.len() {
        tracing::warn!(
            target: "dedup",
            path = %path.display(),
            dropped_bytes = bytes.len() - committed,
            "ignoring torn trailing record"
        );
        truncate_to(path, committed as u64)?;
    }

    let text = std::str::from_utf8(&bytes[..committed]).map_err(|e| StoreError::Corrupt {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })?;
    for (n, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let rec = serde_json::from_str::<DedupRecord>(line).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("line {}: {e}", n + 1),
        })?;
        // First record wins; later duplicates cannot exist through the API.
        index.entry(rec.item_id.clone()).or_insert(rec);
    }
    Ok((index, committed as u64))
}

fn truncate_to(path: &Path, len: u64) -> Result<(), StoreError> {
    let f = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;
    f.set_len(len).map_err(|e| StoreError::io(path, e))?;
    f.sync_all().map_err(|e| StoreError::io(path, e))
}

// ------------------------------------------------------------
// In-memory store (tests, dry runs)
// ------------------------------------------------------------

/// Non-durable store. `set_available(false)` makes every call fail with
/// `StoreError::Unavailable`, to exercise the backoff path.
#[derive(Debug, Default)]
pub struct MemoryDedupStore {
    index: Mutex<HashMap<String, DedupRecord>>,
    unavailable: AtomicBool,
}

impl MemoryDedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<DedupRecord> {
        let g = match self.index.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        };
        let mut v: Vec<DedupRecord> = g.values().cloned().collect();
        v.sort_by(|a, b| a.item_id.cmp(&b.item_id));
        v
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, DedupRecord>>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        self.index
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

impl DedupStore for MemoryDedupStore {
    fn contains(&self, item_id: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(item_id))
    }

    fn insert_record(&self, rec: DedupRecord) -> Result<bool, StoreError> {
        let mut g = self.lock()?;
        if g.contains_key(&rec.item_id) {
            return Ok(false);
        }
        g.insert(rec.item_id.clone(), rec);
        Ok(true)
    }

    fn find_similar(
        &self,
        channel_id: &str,
        title_key: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        Ok(find_in(self.lock()?.values(), channel_id, title_key, since))
    }

    fn published_since(&self, since: DateTime<Utc>) -> Result<usize, StoreError> {
        Ok(self.lock()?.values().filter(|r| r.published_at >= since).count())
    }

    fn len(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.len())
    }
}
