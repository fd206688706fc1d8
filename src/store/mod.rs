// src/store/mod.rs
//! Durable pipeline state: the dedup ledger of published items and the
//! quota window. Both are owned by this process only; coordination is
//! intra-process (mutex-guarded).

pub mod dedup;
pub mod quota;

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::StoreError;

pub use dedup::{DedupRecord, DedupStore, FileDedupStore, MemoryDedupStore};
pub use quota::{QuotaLedger, QuotaState, WindowPolicy};

/// Write `bytes` to `path` via a sibling temp file + rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    ensure_parent(path)?;
    let tmp = path.with_extension("tmp");
    let mut f = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    f.write_all(bytes).map_err(|e| StoreError::io(&tmp, e))?;
    f.sync_all().map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| StoreError::io(path, e))?;
    Ok(())
}

pub(crate) fn ensure_parent(path: &Path) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
    }
    Ok(())
}
