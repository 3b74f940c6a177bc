//! The remote store collaborator.
//!
//! The engine only needs three calls from whatever backs the single remote
//! copy of a document: create it, update it under an optimistic version
//! check, and fetch it. Transport, serialization and timeouts are the
//! implementation's business.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;

use crate::models::{Document, RemoteLink};

/// Errors reported by a remote store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network or server failure; the call may succeed later.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The remote resource no longer exists.
    #[error("Remote resource not found: {0}")]
    NotFound(String),

    /// The remote refused the request for a reason retrying won't fix.
    #[error("Remote rejected the request: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport(_))
    }
}

/// Result of creating a remote resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedResource {
    pub remote_id: String,
    pub remote_url: String,
    pub version: u64,
}

impl CreatedResource {
    pub fn link(&self) -> RemoteLink {
        RemoteLink::new(self.remote_id.clone(), self.remote_url.clone())
    }
}

/// Result of an optimistic update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Updated { version: u64 },
    /// The remote copy is not at the expected version; carries its current
    /// snapshot.
    VersionConflict(Box<Document>),
}

/// Backing store for the remote copy of documents.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn create_resource(&self, document: &Document) -> Result<CreatedResource, RemoteError>;

    async fn update_resource(
        &self,
        remote_id: &str,
        document: &Document,
        expected_version: u64,
    ) -> Result<UpdateOutcome, RemoteError>;

    async fn fetch_resource(&self, remote_id: &str) -> Result<Document, RemoteError>;
}

/// Remote store kept in process memory.
///
/// Useful for embedding and tests: it can be switched offline, and other
/// writers can be simulated with [`InMemoryRemoteStore::edit`].
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    resources: Mutex<BTreeMap<String, Document>>,
    next_id: AtomicU64,
    offline: AtomicBool,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            offline: AtomicBool::new(false),
        }
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Returns the stored copy of a resource.
    pub fn get(&self, remote_id: &str) -> Option<Document> {
        self.resources().get(remote_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.resources().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources().is_empty()
    }

    /// Applies an edit as another writer would, returning the new version.
    pub fn edit(&self, remote_id: &str, f: impl FnOnce(&mut Document)) -> Option<u64> {
        let mut resources = self.resources();
        let doc = resources.get_mut(remote_id)?;
        f(doc);
        doc.touch();
        Some(doc.version)
    }

    fn resources(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Document>> {
        self.resources.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_online(&self) -> Result<(), RemoteError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(RemoteError::Transport("remote store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn create_resource(&self, document: &Document) -> Result<CreatedResource, RemoteError> {
        self.check_online()?;
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = CreatedResource {
            remote_id: format!("res-{}", n),
            remote_url: format!("mem://res-{}", n),
            version: document.version,
        };
        let stored = document.clone().with_remote(created.link());
        self.resources().insert(created.remote_id.clone(), stored);
        Ok(created)
    }

    async fn update_resource(
        &self,
        remote_id: &str,
        document: &Document,
        expected_version: u64,
    ) -> Result<UpdateOutcome, RemoteError> {
        self.check_online()?;
        let mut resources = self.resources();
        let current = resources
            .get_mut(remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))?;

        if current.version != expected_version {
            return Ok(UpdateOutcome::VersionConflict(Box::new(current.clone())));
        }

        let link = current.remote.clone();
        *current = document.clone();
        current.remote = link;
        Ok(UpdateOutcome::Updated {
            version: current.version,
        })
    }

    async fn fetch_resource(&self, remote_id: &str) -> Result<Document, RemoteError> {
        self.check_online()?;
        self.get(remote_id)
            .ok_or_else(|| RemoteError::NotFound(remote_id.to_string()))
    }
}
