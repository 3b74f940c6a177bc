//! Durable key-value storage used by the sync engine.
//!
//! Everything the engine must not lose across restarts goes through a
//! [`DurableStore`]: the operation queue, pending conflicts, per-document
//! sync records and the last-known copy of each document. Values are JSON.
//!
//! Keys are `/`-separated segments of `[A-Za-z0-9_-]`, for example `queue`
//! or `documents/<doc_id>`.

mod file;
mod memory;

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Errors that can occur during durable storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("Failed to (de)serialize '{key}': {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Key-value persistence that survives process restarts.
pub trait DurableStore: Send + Sync {
    /// Returns `Ok(None)` if nothing is stored under `key`.
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Stores `bytes` under `key`, replacing any previous value.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;

    /// Returns `Ok(true)` if a value was deleted, `Ok(false)` if none existed.
    fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Lists the keys stored directly below `prefix` (one segment deep).
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Blocks until the caller holds the exclusive lock named `key`.
    ///
    /// The lock is shared with every other handle on the same storage,
    /// including handles in other processes. It is released when the
    /// returned [`StoreLock`] is dropped. Not reentrant.
    fn lock(&self, key: &str) -> Result<StoreLock, StorageError>;

    /// Like [`DurableStore::lock`], but returns `Ok(None)` instead of
    /// waiting when someone else holds the lock.
    fn try_lock(&self, key: &str) -> Result<Option<StoreLock>, StorageError>;
}

/// An exclusive lock taken through [`DurableStore::lock`]. Released on drop.
pub struct StoreLock {
    _guard: Box<dyn Send>,
}

impl StoreLock {
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl fmt::Debug for StoreLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("StoreLock")
    }
}

/// Runs `f` on the JSON value under `key` while holding the lock of the same
/// name, then stores the result. A missing value starts as `T::default()`.
///
/// Nothing is written if `f` fails.
pub fn update_json<T, R, E>(
    store: &dyn DurableStore,
    key: &str,
    f: impl FnOnce(&mut T) -> Result<R, E>,
) -> Result<R, E>
where
    T: Serialize + DeserializeOwned + Default,
    E: From<StorageError>,
{
    let _lock = store.lock(key)?;
    let mut value: T = load_json(store, key)?.unwrap_or_default();
    let result = f(&mut value)?;
    save_json(store, key, &value)?;
    Ok(result)
}

/// Validates a storage key.
pub fn validate_key(key: &str) -> Result<(), StorageError> {
    let valid = !key.is_empty()
        && key.split('/').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(key.to_string()))
    }
}

/// Loads and deserializes a JSON value.
pub fn load_json<T: DeserializeOwned>(
    store: &dyn DurableStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.load(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StorageError::Serialization {
                key: key.to_string(),
                source,
            }),
        None => Ok(None),
    }
}

/// Serializes and stores a JSON value.
pub fn save_json<T: Serialize + ?Sized>(
    store: &dyn DurableStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StorageError::Serialization {
        key: key.to_string(),
        source,
    })?;
    store.save(key, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("queue").is_ok());
        assert!(validate_key("documents/doc-1").is_ok());
        assert!(validate_key("sync/a_b/c").is_ok());

        assert!(validate_key("").is_err());
        assert!(validate_key("/queue").is_err());
        assert!(validate_key("documents/").is_err());
        assert!(validate_key("../escape").is_err());
        assert!(validate_key("a b").is_err());
    }

    #[test]
    fn test_json_helpers() {
        let store = MemoryStore::new();
        assert_eq!(load_json::<Vec<u32>>(&store, "numbers").unwrap(), None);

        save_json(&store, "numbers", &vec![1u32, 2, 3]).unwrap();
        assert_eq!(
            load_json::<Vec<u32>>(&store, "numbers").unwrap(),
            Some(vec![1, 2, 3])
        );
    }

    #[test]
    fn test_update_json_writes_only_on_success() {
        let store = MemoryStore::new();
        let len = update_json(&store, "numbers", |v: &mut Vec<u32>| {
            v.push(7);
            Ok::<_, StorageError>(v.len())
        })
        .unwrap();
        assert_eq!(len, 1);

        let err = update_json(&store, "numbers", |v: &mut Vec<u32>| {
            v.clear();
            Err::<(), _>(StorageError::Unavailable("rejected".to_string()))
        })
        .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert_eq!(
            load_json::<Vec<u32>>(&store, "numbers").unwrap(),
            Some(vec![7])
        );
    }

    #[test]
    fn test_load_json_reports_corrupt_value() {
        let store = MemoryStore::new();
        store.save("numbers", b"not json").unwrap();
        let err = load_json::<Vec<u32>>(&store, "numbers").unwrap_err();
        assert!(matches!(err, StorageError::Serialization { .. }));
    }
}
