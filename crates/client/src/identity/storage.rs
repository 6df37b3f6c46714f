//! Durable storage backends for identity values.
//!
//! Holds exactly two values: the bearer access token and the anonymous
//! session key. Backends are plain key/value stores; the trim, read-back
//! verification, and precedence rules live in [`IdentityStore`](super::IdentityStore).
//!
//! Several processes sharing one [`FileStorage`] file are not reconciled:
//! the last write wins.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;

/// Which identity value to address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StorageKey {
    /// Bearer access token of a signed-in account.
    AccessToken,
    /// Anonymous session key assigned by the server.
    SessionKey,
}

impl StorageKey {
    /// Stable name used by persistent backends.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AccessToken => "access_token",
            Self::SessionKey => "session_key",
        }
    }
}

/// Errors a storage backend can raise.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing file failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The backing file does not contain a valid document.
    #[error("malformed storage document: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Trait for identity storage backends.
///
/// Implementations must be safe to share between tasks; a `write` followed by
/// a `read` of the same key must observe the written value unless another
/// writer intervened.
pub trait SessionStorage: Send + Sync {
    /// Read a value. Returns `Ok(None)` if nothing is stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be read.
    fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError>;

    /// Store a value, overwriting any previous one.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    fn write(&self, key: StorageKey, value: &str) -> Result<(), StorageError>;

    /// Remove a value. Succeeds even if nothing was stored.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the backend cannot be written.
    fn remove(&self, key: StorageKey) -> Result<(), StorageError>;
}

// =============================================================================
// MemoryStorage
// =============================================================================

/// In-memory storage for tests and short-lived processes.
///
/// Does NOT persist values across restarts.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    values: Mutex<BTreeMap<StorageKey, String>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStorage for MemoryStorage {
    fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&key).cloned())
    }

    fn write(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        values.remove(&key);
        Ok(())
    }
}

// =============================================================================
// FileStorage
// =============================================================================

/// Storage backed by a small JSON document on disk.
///
/// Writes go to a sibling temp file which is then renamed over the target, so
/// a crash mid-write never leaves a truncated document behind.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileStorage {
    /// Create a store at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) if contents.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&self, document: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(document)?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn read(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.remove(key.as_str()))
    }

    fn write(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        document.insert(key.as_str().to_string(), value.to_string());
        self.save(&document)
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut document = self.load()?;
        if document.remove(key.as_str()).is_some() {
            self.save(&document)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.read(StorageKey::SessionKey).unwrap(), None);

        storage.write(StorageKey::SessionKey, "tok-001").unwrap();
        assert_eq!(
            storage.read(StorageKey::SessionKey).unwrap().as_deref(),
            Some("tok-001")
        );
        assert_eq!(storage.read(StorageKey::AccessToken).unwrap(), None);

        storage.remove(StorageKey::SessionKey).unwrap();
        assert_eq!(storage.read(StorageKey::SessionKey).unwrap(), None);
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("identity.json");

        FileStorage::new(&path)
            .write(StorageKey::AccessToken, "bearer-abc")
            .unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.read(StorageKey::AccessToken).unwrap().as_deref(),
            Some("bearer-abc")
        );
        assert_eq!(reopened.read(StorageKey::SessionKey).unwrap(), None);
    }

    #[test]
    fn test_file_storage_missing_file_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.json"));
        assert_eq!(storage.read(StorageKey::SessionKey).unwrap(), None);
        storage.remove(StorageKey::SessionKey).unwrap();
    }

    #[test]
    fn test_file_storage_rejects_malformed_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.json");
        fs::write(&path, "not json").unwrap();

        let err = FileStorage::new(&path)
            .read(StorageKey::SessionKey)
            .unwrap_err();
        assert!(matches!(err, StorageError::Malformed(_)));
    }
}
