//! Sync error types.

use thiserror::Error;
use uuid::Uuid;

use super::remote::RemoteError;
use crate::conflict::MergeError;
use crate::document_id::DocumentId;
use crate::models::ValidationError;
use crate::storage::StorageError;

/// Errors that can occur during sync engine operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Another sync pass holds the document's lock.
    #[error("Already syncing '{resource_id}' (held by {holder})")]
    LockHeld { resource_id: String, holder: String },

    /// The document is malformed and was not queued.
    #[error("Invalid document: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Merge failed: {0}")]
    Merge(#[from] MergeError),

    #[error("Conflict not found: {0}")]
    ConflictNotFound(Uuid),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    /// The document has never been pushed, so there is no remote copy.
    #[error("Document '{0}' is not linked to a remote copy")]
    NotLinked(DocumentId),

    #[error("Remote store is unreachable (offline)")]
    Offline,
}

impl SyncError {
    /// Whether retrying the same call later could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncError::LockHeld { .. } | SyncError::Offline => true,
            SyncError::Remote(e) => e.is_transient(),
            SyncError::Storage(e) => {
                matches!(e, StorageError::Io { .. } | StorageError::Unavailable(_))
            }
            _ => false,
        }
    }
}
