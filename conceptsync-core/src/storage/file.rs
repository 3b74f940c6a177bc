//! Filesystem-backed durable store.
//!
//! Each key maps to one JSON file below the data directory:
//! ```text
//! ~/.local/share/conceptsync/
//! ├── queue.json                     # pending + in-flight operations
//! ├── conflicts.json                 # unresolved conflicts
//! ├── documents/<doc_id>.json        # last-known document
//! └── sync/<doc_id>.json             # last confirmed remote state
//! ```
//!
//! Locks are advisory `flock`s on a `<key>.lock` file next to the value, so
//! every process pointed at the same directory sees them.

use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;

use super::{validate_key, DurableStore, StorageError, StoreLock};

/// File extension for stored values.
const VALUE_EXTENSION: &str = "json";
const LOCK_EXTENSION: &str = "lock";

/// Holds a `flock` until dropped.
struct FileLock {
    file: File,
}

impl Drop for FileLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Durable store that keeps one file per key.
#[derive(Clone, Debug)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    /// Creates a new storage instance with a custom data directory.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &PathBuf {
        &self.data_dir
    }

    /// Returns the full path for a key.
    pub fn key_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        validate_key(key)?;
        let mut path = self.data_dir.clone();
        path.extend(key.split('/'));
        path.set_extension(VALUE_EXTENSION);
        Ok(path)
    }

    fn open_lock_file(&self, key: &str) -> Result<(File, PathBuf), StorageError> {
        let mut path = self.key_path(key)?;
        path.set_extension(LOCK_EXTENSION);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Self::io_error(parent.to_path_buf()))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(Self::io_error(path.clone()))?;
        Ok((file, path))
    }

    fn io_error(path: PathBuf) -> impl FnOnce(io::Error) -> StorageError {
        move |source| StorageError::Io { path, source }
    }
}

impl DurableStore for FileStore {
    fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.key_path(key)?;

        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io { path, source: e }),
        }
    }

    /// Writes to a sibling temp file first and renames it into place, so a
    /// crash mid-write leaves the previous value intact.
    fn save(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Self::io_error(parent.to_path_buf()))?;
        }

        let tmp_path = path.with_extension(format!("{}.tmp", VALUE_EXTENSION));
        fs::write(&tmp_path, bytes).map_err(Self::io_error(tmp_path.clone()))?;
        fs::rename(&tmp_path, &path).map_err(Self::io_error(path))?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.key_path(key)?;

        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io { path, source: e }),
        }
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        validate_key(prefix)?;
        let mut dir = self.data_dir.clone();
        dir.extend(prefix.split('/'));

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::Io { path: dir, source: e }),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_error(dir.clone()))?;
            let path = entry.path();

            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some(VALUE_EXTENSION)
            {
                continue;
            }

            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                let key = format!("{}/{}", prefix, stem);
                if validate_key(&key).is_ok() {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    fn lock(&self, key: &str) -> Result<StoreLock, StorageError> {
        let (file, path) = self.open_lock_file(key)?;
        file.lock_exclusive().map_err(Self::io_error(path))?;
        Ok(StoreLock::new(FileLock { file }))
    }

    fn try_lock(&self, key: &str) -> Result<Option<StoreLock>, StorageError> {
        let (file, path) = self.open_lock_file(key)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(StoreLock::new(FileLock { file }))),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(e) => Err(StorageError::Io { path, source: e }),
        }
    }
}
