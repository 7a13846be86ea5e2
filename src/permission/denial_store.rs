//! Durable record of permanently denied permissions
//!
//! A permission is marked once a denial round comes back with the platform's
//! rationale signal off (the user picked "don't ask again"). Marks never
//! expire; only an external reset (reinstall, clearing app data) removes them.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use super::Permission;
use crate::storage::StorageError;

/// Durable boolean key/value store backing [`PermanentDenialStore`]
pub trait DenialBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<bool, StorageError>;
    fn put(&self, key: &str, value: bool) -> Result<(), StorageError>;
}

/// In-memory backend (lost on restart)
#[derive(Debug, Default)]
pub struct MemoryDenialBackend {
    entries: Mutex<HashMap<String, bool>>,
}

impl MemoryDenialBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DenialBackend for MemoryDenialBackend {
    fn get(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.lock().get(key).copied().unwrap_or(false))
    }

    fn put(&self, key: &str, value: bool) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }
}

/// Tracks permissions the user refused with "don't ask again"
///
/// Reads and writes are best-effort: a failing backend is logged and reads
/// as "not permanently denied", which degrades to re-prompting.
#[derive(Clone)]
pub struct PermanentDenialStore {
    backend: Arc<dyn DenialBackend>,
}

impl PermanentDenialStore {
    pub fn new(backend: Arc<dyn DenialBackend>) -> Self {
        Self { backend }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryDenialBackend::new()))
    }

    pub fn is_permanently_denied(&self, permission: &Permission) -> bool {
        match self.backend.get(permission.as_str()) {
            Ok(denied) => denied,
            Err(e) => {
                tracing::warn!("Failed to read denial state for {}: {}", permission, e);
                false
            }
        }
    }

    pub fn mark_permanently_denied(&self, permissions: &[Permission]) {
        for permission in permissions {
            match self.backend.put(permission.as_str(), true) {
                Ok(()) => tracing::info!("Marked {} as permanently denied", permission),
                Err(e) => tracing::warn!("Failed to persist permanent denial of {}: {}", permission, e),
            }
        }
    }
}

impl std::fmt::Debug for PermanentDenialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermanentDenialStore").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenBackend;

    impl DenialBackend for BrokenBackend {
        fn get(&self, _key: &str) -> Result<bool, StorageError> {
            Err(StorageError::Io("disk unavailable".to_string()))
        }

        fn put(&self, _key: &str, _value: bool) -> Result<(), StorageError> {
            Err(StorageError::Io("disk unavailable".to_string()))
        }
    }

    #[test]
    fn test_mark_and_query() {
        let store = PermanentDenialStore::in_memory();
        assert!(!store.is_permanently_denied(&Permission::BLUETOOTH_SCAN));

        store.mark_permanently_denied(&[Permission::BLUETOOTH_SCAN]);
        assert!(store.is_permanently_denied(&Permission::BLUETOOTH_SCAN));
        assert!(!store.is_permanently_denied(&Permission::BLUETOOTH_CONNECT));
    }

    #[test]
    fn test_failing_backend_degrades_to_not_denied() {
        let store = PermanentDenialStore::new(Arc::new(BrokenBackend));
        store.mark_permanently_denied(&[Permission::BLUETOOTH_SCAN]);
        assert!(!store.is_permanently_denied(&Permission::BLUETOOTH_SCAN));
    }
}
