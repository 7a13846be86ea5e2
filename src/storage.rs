//! File-backed persistence for the permanent-denial record
//!
//! Keeps the `permissions` preference set as a small JSON document. Writes go
//! to a temporary file first and are renamed over the real one, so a crash
//! mid-write leaves the previous state intact.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::permission::DenialBackend;

const DENIALS_FILENAME: &str = "permissions.json";
const DENIALS_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DenialsFile {
    version: u32,
    entries: BTreeMap<String, bool>,
}

/// JSON file backend for [`crate::permission::PermanentDenialStore`]
pub struct FileDenialBackend {
    storage_dir: PathBuf,
    // Mirror of the file; reads never touch the disk after open
    entries: Mutex<BTreeMap<String, bool>>,
}

impl FileDenialBackend {
    /// Open (or create) the denial record in `storage_dir`
    ///
    /// A missing file starts empty. A corrupted file is logged and also
    /// starts empty: losing marks only means the user is asked again.
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        if !storage_dir.exists() {
            fs::create_dir_all(&storage_dir)
                .map_err(|e| StorageError::Io(format!("Failed to create storage directory: {}", e)))?;
        }

        let path = storage_dir.join(DENIALS_FILENAME);
        let entries = if path.exists() {
            let json = fs::read_to_string(&path)
                .map_err(|e| StorageError::Io(format!("Failed to read denial record: {}", e)))?;
            match serde_json::from_str::<DenialsFile>(&json) {
                Ok(file) => file.entries,
                Err(e) => {
                    tracing::warn!("Ignoring corrupted denial record at {}: {}", path.display(), e);
                    BTreeMap::new()
                }
            }
        } else {
            tracing::debug!("No denial record at {}, starting fresh", path.display());
            BTreeMap::new()
        };

        tracing::info!("Opened denial record at {} ({} entries)", storage_dir.display(), entries.len());

        Ok(Self {
            storage_dir,
            entries: Mutex::new(entries),
        })
    }

    fn file_path(&self) -> PathBuf {
        self.storage_dir.join(DENIALS_FILENAME)
    }

    fn temp_path(&self) -> PathBuf {
        self.storage_dir.join(format!("{}.tmp", DENIALS_FILENAME))
    }

    fn persist(&self, entries: &BTreeMap<String, bool>) -> Result<(), StorageError> {
        let document = DenialsFile {
            version: DENIALS_VERSION,
            entries: entries.clone(),
        };
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StorageError::Serialization(format!("Failed to serialize denial record: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path)
                .map_err(|e| StorageError::Io(format!("Failed to create temp file: {}", e)))?;
            file.write_all(json.as_bytes())
                .map_err(|e| StorageError::Io(format!("Failed to write temp file: {}", e)))?;
            file.sync_all()
                .map_err(|e| StorageError::Io(format!("Failed to sync temp file: {}", e)))?;
        }

        let path = self.file_path();
        fs::rename(&temp_path, &path)
            .map_err(|e| StorageError::Io(format!("Failed to rename temp file: {}", e)))?;

        tracing::debug!("Saved denial record to {}", path.display());
        Ok(())
    }
}

impl DenialBackend for FileDenialBackend {
    fn get(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().get(key).copied().unwrap_or(false))
    }

    fn put(&self, key: &str, value: bool) -> Result<(), StorageError> {
        let mut entries = self.entries.lock();
        entries.insert(key.to_string(), value);
        self.persist(&entries)
    }
}

/// Storage errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{Permission, PermanentDenialStore};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_storage_creation() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("nested");
        let backend = FileDenialBackend::open(&dir).unwrap();
        assert!(dir.exists());
        assert!(!backend.get("android.permission.BLUETOOTH_SCAN").unwrap());
    }

    #[test]
    fn test_denials_survive_reopen() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = PermanentDenialStore::new(Arc::new(FileDenialBackend::open(temp_dir.path()).unwrap()));
            store.mark_permanently_denied(&[Permission::BLUETOOTH_CONNECT]);
        }

        let store = PermanentDenialStore::new(Arc::new(FileDenialBackend::open(temp_dir.path()).unwrap()));
        assert!(store.is_permanently_denied(&Permission::BLUETOOTH_CONNECT));
        assert!(!store.is_permanently_denied(&Permission::BLUETOOTH_SCAN));
        assert!(!temp_dir.path().join("permissions.json.tmp").exists());
    }

    #[test]
    fn test_corrupted_file_starts_empty() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join(DENIALS_FILENAME), "{not json").unwrap();

        let backend = FileDenialBackend::open(temp_dir.path()).unwrap();
        assert!(!backend.get("android.permission.BLUETOOTH").unwrap());

        backend.put("android.permission.BLUETOOTH", true).unwrap();
        let reopened = FileDenialBackend::open(temp_dir.path()).unwrap();
        assert!(reopened.get("android.permission.BLUETOOTH").unwrap());
    }
}
