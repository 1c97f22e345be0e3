//! Durable store collaborator
//!
//! The engine does not own a storage engine. It persists two named records
//! through this trait — the serialized sync queue and the serialized cache
//! map — each read once at startup and rewritten after every mutating
//! operation. Implementations decide where the bytes live.

use crate::error::{FieldSyncError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;

/// Record name for the serialized sync-queue array
pub const QUEUE_RECORD: &str = "sync_queue";
/// Record name for the serialized cache map
pub const CACHE_RECORD: &str = "cache";

/// Key-value persistence seam
///
/// Methods take `&self` so implementations can pool connections or use
/// interior mutability, matching the rest of the crate's collaborator
/// traits.
pub trait StateStore: Send + Sync {
    /// Read a named record, `None` if it was never written
    fn read_record(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Overwrite a named record
    fn write_record(&self, name: &str, bytes: &[u8]) -> Result<()>;
}

/// In-memory store, used in tests and as a null durable layer
#[derive(Default)]
pub struct MemoryStateStore {
    records: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn read_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().get(name).cloned())
    }

    fn write_record(&self, name: &str, bytes: &[u8]) -> Result<()> {
        self.records.lock().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// File-backed store: one JSON file per record inside a directory
///
/// Writes go through a temp file + rename so a crash mid-write leaves the
/// previous record intact.
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Open (creating if needed) a store rooted at `dir`
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn record_path(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(FieldSyncError::InvalidInput(format!(
                "Invalid record name: {:?}",
                name
            )));
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }
}

impl StateStore for FileStateStore {
    fn read_record(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(name)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FieldSyncError::Persistence(format!(
                "Reading record {}: {}",
                name, e
            ))),
        }
    }

    fn write_record(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.record_path(name)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)
            .and_then(|_| std::fs::rename(&tmp, &path))
            .map_err(|e| FieldSyncError::Persistence(format!("Writing record {}: {}", name, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStateStore::new();
        assert!(store.read_record(QUEUE_RECORD).unwrap().is_none());

        store.write_record(QUEUE_RECORD, b"[]").unwrap();
        assert_eq!(store.read_record(QUEUE_RECORD).unwrap().unwrap(), b"[]");

        store.write_record(QUEUE_RECORD, b"[1]").unwrap();
        assert_eq!(store.read_record(QUEUE_RECORD).unwrap().unwrap(), b"[1]");
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();

        assert!(store.read_record(CACHE_RECORD).unwrap().is_none());
        store.write_record(CACHE_RECORD, b"{}").unwrap();
        assert_eq!(store.read_record(CACHE_RECORD).unwrap().unwrap(), b"{}");

        // Reopen sees the same bytes
        let reopened = FileStateStore::open(dir.path()).unwrap();
        assert_eq!(reopened.read_record(CACHE_RECORD).unwrap().unwrap(), b"{}");
    }

    #[test]
    fn test_record_io_failure_surfaces_as_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();
        // A directory squatting on the record path makes the read fail
        // with something other than NotFound
        std::fs::create_dir(dir.path().join("cache.json")).unwrap();

        let err = store.read_record(CACHE_RECORD).unwrap_err();
        assert!(matches!(err, FieldSyncError::Persistence(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_file_store_rejects_bad_names() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::open(dir.path()).unwrap();

        assert!(store.write_record("../escape", b"x").is_err());
        assert!(store.read_record("").is_err());
    }
}
