//! Key-value persistence used by the translation cache and reading sessions.

use crate::error::{AppError, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Durable key-value store.
///
/// Keys are `/`-separated paths so that everything belonging to a book can
/// be dropped with a single prefix delete.
pub trait Storage: Send + Sync {
    /// Read a value.
    fn read(&self, key: &str) -> Result<Option<String>>;

    /// Write (insert or overwrite) a value.
    fn write(&self, key: &str, value: &str) -> Result<()>;

    /// Delete every key starting with `prefix`, returning how many were removed.
    fn delete_all(&self, prefix: &str) -> Result<usize>;

    /// List keys starting with `prefix`, in key order.
    fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// In-memory storage, used for tests and when no database is configured.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail (simulates a full or read-only disk).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Persistence(format!("Write rejected for {}", key)));
        }
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete_all(&self, prefix: &str) -> Result<usize> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before - entries.len())
    }

    fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }
}
