use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use super::{validate_key, DurableStore, StorageError, StoreLock};

/// Names of the locks currently held, shared by every clone.
#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<BTreeSet<String>>,
    released: Condvar,
}

impl LockTable {
    fn held(&self) -> std::sync::MutexGuard<'_, BTreeSet<String>> {
        self.held.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct MemoryLock {
    table: Arc<LockTable>,
    key: String,
}

impl Drop for MemoryLock {
    fn drop(&mut self) {
        self.table.held().remove(&self.key);
        self.table.released.notify_all();
    }
}

/// In-process durable store.
///
/// Clones share the same underlying map, so dropping every consumer and
/// reopening them on a clone behaves like a process restart against the
/// same disk.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    values: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
    locks: Arc<LockTable>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `save`/`delete` fail until reset.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    fn guard(&self, key: &str) -> StoreLock {
        StoreLock::new(MemoryLock {
            table: Arc::clone(&self.locks),
            key: key.to_string(),
        })
    }

    fn values(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.values.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DurableStore for MemoryStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        validate_key(key)?;
        Ok(self.values().get(key).cloned())
    }

    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        validate_key(key)?;
        self.check_writable()?;
        self.values().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        self.check_writable()?;
        Ok(self.values().remove(key).is_some())
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        validate_key(prefix)?;
        let dir = format!("{}/", prefix);
        Ok(self
            .values()
            .keys()
            .filter(|k| k.strip_prefix(&dir).is_some_and(|rest| !rest.contains('/')))
            .cloned()
            .collect())
    }

    fn lock(&self, key: &str) -> Result<StoreLock, StorageError> {
        validate_key(key)?;
        let mut held = self.locks.held();
        while held.contains(key) {
            held = self
                .locks
                .released
                .wait(held)
                .unwrap_or_else(|e| e.into_inner());
        }
        held.insert(key.to_string());
        Ok(self.guard(key))
    }

    fn try_lock(&self, key: &str) -> Result<Option<StoreLock>, StorageError> {
        validate_key(key)?;
        if !self.locks.held().insert(key.to_string()) {
            return Ok(None);
        }
        Ok(Some(self.guard(key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_values() {
        let store = MemoryStore::new();
        let clone = store.clone();
        store.save("queue", b"data").unwrap();
        assert_eq!(clone.load("queue").unwrap(), Some(b"data".to_vec()));
    }

    #[test]
    fn test_fail_writes() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.save("queue", b"data"),
            Err(StorageError::Unavailable(_))
        ));
        store.set_fail_writes(false);
        store.save("queue", b"data").unwrap();
    }

    #[test]
    fn test_list_is_one_level_deep() {
        let store = MemoryStore::new();
        store.save("documents/a", b"{}").unwrap();
        store.save("documents/a/nested", b"{}").unwrap();
        store.save("documentsx", b"{}").unwrap();
        assert_eq!(store.list("documents").unwrap(), vec!["documents/a".to_string()]);
    }

    #[test]
    fn test_locks_are_shared_by_clones() {
        let store = MemoryStore::new();
        let clone = store.clone();

        let held = store.lock("queue").unwrap();
        assert!(clone.try_lock("queue").unwrap().is_none());
        assert!(clone.try_lock("conflicts").unwrap().is_some());
        drop(held);
        assert!(clone.try_lock("queue").unwrap().is_some());
    }

    #[test]
    fn test_lock_waits_for_release() {
        let store = MemoryStore::new();
        let held = store.lock("queue").unwrap();

        let clone = store.clone();
        let waiter = std::thread::spawn(move || {
            let _lock = clone.lock("queue").unwrap();
            clone.save("queue", b"second").unwrap();
        });

        std::thread::sleep(std::time::Duration::from_millis(50));
        store.save("queue", b"first").unwrap();
        drop(held);
        waiter.join().unwrap();
        assert_eq!(store.load("queue").unwrap(), Some(b"second".to_vec()));
    }
}
