//! Lockout persistence
//!
//! A single JSON record. Present and active means LOCKED, for every
//! process that shares the path, until an operator reset removes it.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{GasketError, GasketResult};
use crate::types::LockoutRecord;

/// Durable home of the lockout record
pub trait LockoutStore: Send + Sync {
    /// Current record, `None` when unlocked
    fn load(&self) -> GasketResult<Option<LockoutRecord>>;

    /// Persist the record
    fn save(&self, record: &LockoutRecord) -> GasketResult<()>;

    /// Remove the record (operator reset)
    fn clear(&self) -> GasketResult<()>;
}

/// Record stored as pretty JSON on disk
#[derive(Debug, Clone)]
pub struct FileLockoutStore {
    path: PathBuf,
}

impl FileLockoutStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LockoutStore for FileLockoutStore {
    fn load(&self) -> GasketResult<Option<LockoutRecord>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(GasketError::Storage(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let record: LockoutRecord = serde_json::from_str(&json)?;
        Ok(record.active.then_some(record))
    }

    fn save(&self, record: &LockoutRecord) -> GasketResult<()> {
        let json = serde_json::to_string_pretty(record)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| GasketError::Storage(format!("cannot create {}: {e}", dir.display())))?;
        }

        // Write-then-rename so a reader never sees half a record.
        let tmp = self.tmp_path();
        std::fs::write(&tmp, json)
            .map_err(|e| GasketError::Storage(format!("cannot write {}: {e}", tmp.display())))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| {
            GasketError::Storage(format!("cannot rename onto {}: {e}", self.path.display()))
        })
    }

    fn clear(&self) -> GasketResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GasketError::Storage(format!(
                "cannot remove {}: {e}",
                self.path.display()
            ))),
        }
    }
}

/// Process-local store for tests and the offline demo
#[derive(Debug, Default)]
pub struct MemoryLockoutStore {
    record: Mutex<Option<LockoutRecord>>,
}

impl MemoryLockoutStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LockoutStore for MemoryLockoutStore {
    fn load(&self) -> GasketResult<Option<LockoutRecord>> {
        Ok(self.record.lock().clone().filter(|r| r.active))
    }

    fn save(&self, record: &LockoutRecord) -> GasketResult<()> {
        *self.record.lock() = Some(record.clone());
        Ok(())
    }

    fn clear(&self) -> GasketResult<()> {
        *self.record.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockoutStore::new(dir.path().join("lock.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_load_clear() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockoutStore::new(dir.path().join("nested").join("lock.json"));

        let record = LockoutRecord::new("CONSTITUTIONAL_BREACH");
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), Some(record));

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"active\": true"));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Clearing twice is fine.
        store.clear().unwrap();
    }

    #[test]
    fn test_inactive_record_is_unlocked() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLockoutStore::new(dir.path().join("lock.json"));
        let mut record = LockoutRecord::new("old");
        record.active = false;
        store.save(&record).unwrap();
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lock.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = FileLockoutStore::new(path);
        assert!(store.load().is_err());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryLockoutStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&LockoutRecord::new("x")).unwrap();
        assert_eq!(store.load().unwrap().map(|r| r.reason), Some("x".to_string()));
        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
    }
}
