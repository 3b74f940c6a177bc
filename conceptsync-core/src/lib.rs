//! Conceptsync Core Library
//!
//! Document model, conflict analysis and merging, durable storage and the
//! offline-first sync engine shared by conceptsync applications.

pub mod conflict;
pub mod document_id;
pub mod models;
pub mod storage;
pub mod sync;

pub use conflict::{
    analyze, merge, Conflict, ConflictAnalysis, ConflictDiff, ConflictInfo, DiffKind, Resolution,
    ResolutionMap, ResolutionStrategy,
};
pub use document_id::{DocumentId, DocumentIdError};
pub use models::{Document, DocumentMetadata, Node, Prompt, PromptCollection, RemoteLink, Visibility};
pub use storage::{DurableStore, FileStore, MemoryStore, StorageError};
pub use sync::{
    ConnectivitySignal, InMemoryRemoteStore, OperationKind, OrchestratorConfig, RemoteError,
    RemoteStore, SyncError, SyncOrchestrator, SyncReport, SyncStatus,
};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
