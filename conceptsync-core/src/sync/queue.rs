//! Durable operation queue.
//!
//! Operations move through two persisted lists: `pending` (waiting for a
//! sync pass) and `in_flight` (drained by a pass but not yet confirmed).
//! Both live under a single storage key so every transition is one write.
//! In-flight operations left behind by a handle that stopped mid-pass go
//! back to the front of the next drain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{Document, RemoteLink};
use crate::storage::{load_json, update_json, DurableStore, StorageError};

/// Storage key holding the queue state.
pub const QUEUE_KEY: &str = "queue";

/// What a queued operation asks the remote to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Create,
    Update,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Create => write!(f, "CREATE"),
            OperationKind::Update => write!(f, "UPDATE"),
        }
    }
}

/// A document snapshot waiting to be pushed to the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncOperation {
    pub id: Uuid,
    pub kind: OperationKind,
    pub document: Document,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_link: Option<RemoteLink>,
    /// Remote version this snapshot was based on, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_version: Option<u64>,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncOperation {
    pub fn new(kind: OperationKind, document: Document, remote_link: Option<RemoteLink>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            document,
            remote_link,
            base_version: None,
            enqueued_at: Utc::now(),
        }
    }

    pub fn create(document: Document) -> Self {
        Self::new(OperationKind::Create, document, None)
    }

    pub fn update(document: Document, remote_link: RemoteLink) -> Self {
        Self::new(OperationKind::Update, document, Some(remote_link))
    }

    pub fn with_base_version(mut self, version: u64) -> Self {
        self.base_version = Some(version);
        self
    }
}

impl fmt::Display for SyncOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} '{}' v{} (queued {})",
            self.kind,
            self.document.id,
            self.document.metadata.name,
            self.document.version,
            self.enqueued_at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct QueueState {
    #[serde(default)]
    pending: VecDeque<SyncOperation>,
    #[serde(default)]
    in_flight: Vec<SyncOperation>,
    /// Queue handle that drained the current in-flight set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    drained_by: Option<Uuid>,
}

/// Ordered, persisted log of operations not yet confirmed remotely.
///
/// Nothing is cached: every call reads the stored state, and every change
/// is a read-modify-write under the store lock named [`QUEUE_KEY`]. Several
/// handles, in this process or others, can share one store.
pub struct OperationQueue {
    store: Arc<dyn DurableStore>,
    handle_id: Uuid,
}

impl OperationQueue {
    /// Opens the queue stored in `store`, failing if the stored state cannot
    /// be read.
    pub fn open(store: Arc<dyn DurableStore>) -> Result<Self, StorageError> {
        let state: QueueState = load_json(store.as_ref(), QUEUE_KEY)?.unwrap_or_default();
        if !state.in_flight.is_empty() {
            debug!(
                count = state.in_flight.len(),
                "Found unconfirmed operations from an earlier pass"
            );
        }
        Ok(Self {
            store,
            handle_id: Uuid::new_v4(),
        })
    }

    /// Appends an operation and persists it before returning.
    pub fn enqueue(&self, op: SyncOperation) -> Result<(), StorageError> {
        self.update(|state| {
            state.pending.push_back(op);
            Ok(())
        })
    }

    /// Takes every pending operation, moving them to the in-flight set.
    ///
    /// In-flight operations drained by another handle that never confirmed
    /// them are taken too, ahead of the pending ones. Passes over a shared
    /// store must therefore not overlap. If the move cannot be persisted
    /// nothing is taken.
    pub fn drain(&self) -> Vec<SyncOperation> {
        let handle_id = self.handle_id;
        let result = self.update(|state| {
            let mut drained = Vec::new();
            if state.drained_by != Some(handle_id) && !state.in_flight.is_empty() {
                debug!(
                    count = state.in_flight.len(),
                    "Restoring unconfirmed operations"
                );
                drained.append(&mut state.in_flight);
            }
            drained.extend(state.pending.drain(..));
            state.in_flight.extend(drained.iter().cloned());
            state.drained_by = Some(handle_id);
            Ok(drained)
        });
        result.unwrap_or_else(|e| {
            warn!(error = %e, "Failed to persist drained queue");
            Vec::new()
        })
    }

    /// Confirms an in-flight operation, removing it for good.
    ///
    /// Returns `Ok(false)` if no in-flight operation has this id.
    pub fn acknowledge(&self, op_id: Uuid) -> Result<bool, StorageError> {
        self.update(|state| {
            let Some(pos) = state.in_flight.iter().position(|op| op.id == op_id) else {
                return Ok(false);
            };
            state.in_flight.remove(pos);
            Ok(true)
        })
    }

    /// Returns in-flight operations to the front of the queue, keeping their
    /// relative order, so they run before anything enqueued since the drain.
    /// Operations no longer in flight are skipped.
    pub fn requeue(&self, ops: Vec<SyncOperation>) -> Result<(), StorageError> {
        if ops.is_empty() {
            return Ok(());
        }
        self.update(|state| {
            for op in ops.into_iter().rev() {
                let Some(pos) = state.in_flight.iter().position(|o| o.id == op.id) else {
                    continue;
                };
                state.in_flight.remove(pos);
                state.pending.push_front(op);
            }
            Ok(())
        })
    }

    /// Number of operations waiting for the next pass.
    pub fn peek_count(&self) -> usize {
        self.snapshot().pending.len()
    }

    /// Pending plus in-flight operations.
    pub fn unconfirmed_count(&self) -> usize {
        let state = self.snapshot();
        state.pending.len() + state.in_flight.len()
    }

    /// Snapshot of every unconfirmed operation, in-flight first.
    pub fn pending(&self) -> Vec<SyncOperation> {
        let state = self.snapshot();
        state.in_flight.into_iter().chain(state.pending).collect()
    }

    fn snapshot(&self) -> QueueState {
        match load_json(self.store.as_ref(), QUEUE_KEY) {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to read queue");
                QueueState::default()
            }
        }
    }

    fn update<R>(
        &self,
        f: impl FnOnce(&mut QueueState) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        update_json(self.store.as_ref(), QUEUE_KEY, f)
    }
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.snapshot();
        f.debug_struct("OperationQueue")
            .field("pending", &state.pending.len())
            .field("in_flight", &state.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileStore, MemoryStore};
    use tempfile::TempDir;

    fn op(name: &str) -> SyncOperation {
        SyncOperation::create(Document::new(name))
    }

    #[test]
    fn test_enqueue_and_drain_in_order() {
        let queue = OperationQueue::open(Arc::new(MemoryStore::new())).unwrap();
        queue.enqueue(op("a")).unwrap();
        queue.enqueue(op("b")).unwrap();
        assert_eq!(queue.peek_count(), 2);

        let drained = queue.drain();
        let names: Vec<_> = drained
            .iter()
            .map(|o| o.document.metadata.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(queue.peek_count(), 0);
        assert_eq!(queue.unconfirmed_count(), 2);

        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_acknowledge() {
        let queue = OperationQueue::open(Arc::new(MemoryStore::new())).unwrap();
        let first = op("a");
        let first_id = first.id;
        queue.enqueue(first).unwrap();
        queue.drain();

        assert!(queue.acknowledge(first_id).unwrap());
        assert!(!queue.acknowledge(first_id).unwrap());
        assert_eq!(queue.unconfirmed_count(), 0);
    }

    #[test]
    fn test_requeue_goes_ahead_of_new_ops() {
        let queue = OperationQueue::open(Arc::new(MemoryStore::new())).unwrap();
        queue.enqueue(op("a")).unwrap();
        queue.enqueue(op("b")).unwrap();
        let drained = queue.drain();

        queue.enqueue(op("c")).unwrap();
        queue.requeue(drained).unwrap();

        let names: Vec<_> = queue
            .drain()
            .into_iter()
            .map(|o| o.document.metadata.name)
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_enqueue_failure_keeps_nothing() {
        let store = MemoryStore::new();
        let queue = OperationQueue::open(Arc::new(store.clone())).unwrap();

        store.set_fail_writes(true);
        let err = queue.enqueue(op("a")).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert_eq!(queue.peek_count(), 0);

        // a drain that cannot be persisted takes nothing
        store.set_fail_writes(false);
        queue.enqueue(op("b")).unwrap();
        store.set_fail_writes(true);
        assert!(queue.drain().is_empty());
        assert_eq!(queue.peek_count(), 1);

        store.set_fail_writes(false);
        assert_eq!(queue.drain().len(), 1);
    }

    #[test]
    fn test_survives_restart() {
        let temp_dir = TempDir::new().unwrap();
        let queued = op("kept");
        let queued_id = queued.id;

        {
            let queue = OperationQueue::open(Arc::new(FileStore::new(temp_dir.path()))).unwrap();
            queue.enqueue(queued).unwrap();
        }

        let queue = OperationQueue::open(Arc::new(FileStore::new(temp_dir.path()))).unwrap();
        let drained = queue.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id, queued_id);
    }

    #[test]
    fn test_in_flight_restored_first_after_restart() {
        let store = MemoryStore::new();
        {
            let queue = OperationQueue::open(Arc::new(store.clone())).unwrap();
            queue.enqueue(op("interrupted")).unwrap();
            queue.drain();
            queue.enqueue(op("later")).unwrap();
        }

        let queue = OperationQueue::open(Arc::new(store)).unwrap();
        assert_eq!(queue.peek_count(), 1);
        assert_eq!(queue.unconfirmed_count(), 2);
        let names: Vec<_> = queue
            .pending()
            .into_iter()
            .map(|o| o.document.metadata.name)
            .collect();
        assert_eq!(names, vec!["interrupted", "later"]);

        let drained: Vec<_> = queue
            .drain()
            .into_iter()
            .map(|o| o.document.metadata.name)
            .collect();
        assert_eq!(drained, vec!["interrupted", "later"]);
        assert_eq!(queue.unconfirmed_count(), 2);
        assert!(queue.drain().is_empty());
    }

    #[test]
    fn test_handles_on_one_store_see_each_other() {
        let temp_dir = TempDir::new().unwrap();
        let watcher = OperationQueue::open(Arc::new(FileStore::new(temp_dir.path()))).unwrap();
        watcher.enqueue(op("a")).unwrap();

        {
            let cli = OperationQueue::open(Arc::new(FileStore::new(temp_dir.path()))).unwrap();
            cli.enqueue(op("b")).unwrap();
        }
        assert_eq!(watcher.peek_count(), 2);

        let drained = watcher.drain();
        assert_eq!(drained.len(), 2);
        {
            let cli = OperationQueue::open(Arc::new(FileStore::new(temp_dir.path()))).unwrap();
            cli.enqueue(op("c")).unwrap();
        }
        for op in &drained {
            assert!(watcher.acknowledge(op.id).unwrap());
        }

        let reopened = OperationQueue::open(Arc::new(FileStore::new(temp_dir.path()))).unwrap();
        let names: Vec<_> = reopened
            .pending()
            .into_iter()
            .map(|o| o.document.metadata.name)
            .collect();
        assert_eq!(names, vec!["c"]);
    }

    #[test]
    fn test_concurrent_enqueue_from_separate_handles() {
        let store = MemoryStore::new();
        let writers: Vec<_> = (0..4)
            .map(|i| {
                let queue = OperationQueue::open(Arc::new(store.clone())).unwrap();
                std::thread::spawn(move || {
                    for j in 0..10 {
                        queue.enqueue(op(&format!("{}-{}", i, j))).unwrap();
                    }
                })
            })
            .collect();
        for w in writers {
            w.join().unwrap();
        }

        let queue = OperationQueue::open(Arc::new(store)).unwrap();
        assert_eq!(queue.peek_count(), 40);
    }

    #[test]
    fn test_requeue_skips_operations_no_longer_in_flight() {
        let queue = OperationQueue::open(Arc::new(MemoryStore::new())).unwrap();
        queue.enqueue(op("a")).unwrap();
        let drained = queue.drain();
        assert!(queue.acknowledge(drained[0].id).unwrap());

        queue.requeue(drained).unwrap();
        assert_eq!(queue.unconfirmed_count(), 0);
    }

    #[test]
    fn test_concurrent_enqueue_and_drain() {
        let queue = Arc::new(OperationQueue::open(Arc::new(MemoryStore::new())).unwrap());

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for j in 0..25 {
                        queue.enqueue(op(&format!("{}-{}", i, j))).unwrap();
                    }
                })
            })
            .collect();

        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.extend(queue.drain());
        }
        for w in writers {
            w.join().unwrap();
        }
        seen.extend(queue.drain());

        let mut ids: Vec<_> = seen.iter().map(|o| o.id).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 100);
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_operation_display() {
        let op = SyncOperation::update(Document::new("Map"), RemoteLink::new("r1", "mem://r1"));
        let text = op.to_string();
        assert!(text.starts_with("UPDATE "));
        assert!(text.contains("'Map' v1"));
    }
}
