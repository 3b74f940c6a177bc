//! Remote store backed by a shared directory.
//!
//! Each remote resource is one JSON file, `<remote_dir>/<remote_id>.json`.
//! The directory is expected to exist (a mounted share, a synced folder);
//! when it is missing the remote counts as unreachable and every call fails
//! with a transport error, so queued operations are kept for later.

use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use conceptsync_core::sync::{CreatedResource, UpdateOutcome};
use conceptsync_core::{Document, RemoteError, RemoteLink, RemoteStore};

#[derive(Debug, Clone)]
pub struct DirectoryRemoteStore {
    root: PathBuf,
}

impl DirectoryRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns true if the shared directory can be reached.
    pub async fn is_reachable(&self) -> bool {
        fs::metadata(&self.root)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    fn resource_path(&self, remote_id: &str) -> Result<PathBuf, RemoteError> {
        let valid = !remote_id.is_empty()
            && remote_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RemoteError::Rejected(format!(
                "invalid remote id '{}'",
                remote_id
            )));
        }
        Ok(self.root.join(format!("{}.json", remote_id)))
    }

    async fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.is_reachable().await {
            Ok(())
        } else {
            Err(RemoteError::Transport(format!(
                "remote directory {} is unreachable",
                self.root.display()
            )))
        }
    }

    async fn read(&self, remote_id: &str) -> Result<Document, RemoteError> {
        self.ensure_reachable().await?;
        let path = self.resource_path(remote_id)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(RemoteError::NotFound(remote_id.to_string()))
            }
            Err(e) => return Err(transport(&path, e)),
        };
        serde_json::from_slice(&bytes).map_err(|e| {
            RemoteError::Rejected(format!("corrupt remote copy {}: {}", path.display(), e))
        })
    }

    async fn write(&self, remote_id: &str, document: &Document) -> Result<(), RemoteError> {
        let path = self.resource_path(remote_id)?;
        let bytes = serde_json::to_vec_pretty(document)
            .map_err(|e| RemoteError::Rejected(format!("cannot serialize document: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| transport(&tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| transport(&path, e))
    }

    fn link(&self, remote_id: &str) -> RemoteLink {
        RemoteLink::new(
            remote_id,
            format!("file://{}", self.root.join(format!("{}.json", remote_id)).display()),
        )
    }
}

fn transport(path: &Path, e: io::Error) -> RemoteError {
    RemoteError::Transport(format!("{}: {}", path.display(), e))
}

#[async_trait]
impl RemoteStore for DirectoryRemoteStore {
    async fn create_resource(&self, document: &Document) -> Result<CreatedResource, RemoteError> {
        self.ensure_reachable().await?;
        let remote_id = Uuid::new_v4().simple().to_string();
        let link = self.link(&remote_id);

        let stored = document.clone().with_remote(link.clone());
        self.write(&remote_id, &stored).await?;

        Ok(CreatedResource {
            remote_id,
            remote_url: link.remote_url,
            version: stored.version,
        })
    }

    async fn update_resource(
        &self,
        remote_id: &str,
        document: &Document,
        expected_version: u64,
    ) -> Result<UpdateOutcome, RemoteError> {
        let current = self.read(remote_id).await?;
        if current.version != expected_version {
            return Ok(UpdateOutcome::VersionConflict(Box::new(current)));
        }

        let stored = document.clone().with_remote(self.link(remote_id));
        self.write(remote_id, &stored).await?;
        Ok(UpdateOutcome::Updated {
            version: stored.version,
        })
    }

    async fn fetch_resource(&self, remote_id: &str) -> Result<Document, RemoteError> {
        self.read(remote_id).await
    }
}
