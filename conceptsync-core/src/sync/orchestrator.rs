//! The sync orchestrator.
//!
//! [`SyncOrchestrator`] owns the operation queue, the lock table, the list of
//! pending conflicts and the status observers. Callers enqueue document
//! snapshots; a sync pass drains the queue and pushes each snapshot to the
//! remote store under the document's lock:
//!
//! ```text
//! IDLE -> LOCKED -> IN_FLIGHT -> SUCCESS  -> IDLE
//!                             -> CONFLICT -> (resolution) -> queued UPDATE
//!                             -> ERROR    -> IDLE
//! ```
//!
//! Queue, conflicts, sync records and the outcome of the last pass live in
//! the durable store and are re-read on use, so several engines, in one
//! process or several, can share a store. Shared values change under store
//! locks, taken in the order pass, conflicts, queue. Only connectivity and
//! the in-process syncing flag are kept in memory. No lock of any kind is
//! held across a remote call except the pass lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::SyncError;
use super::lock::{LockManager, DEFAULT_LOCK_TIMEOUT};
use super::queue::{OperationKind, OperationQueue, SyncOperation};
use super::remote::{RemoteStore, UpdateOutcome};
use super::status::{ListenerHandle, StatusBroadcaster, StatusSubscription, SyncStatus};
use crate::conflict::{
    analyze, merge, Conflict, ConflictAnalysis, ResolutionMap, ResolutionStrategy,
};
use crate::document_id::DocumentId;
use crate::models::{Document, RemoteLink};
use crate::storage::{load_json, save_json, update_json, DurableStore};

const CONFLICTS_KEY: &str = "conflicts";
const STATUS_KEY: &str = "status";
/// Store lock held for the whole of a pass.
const PASS_LOCK_KEY: &str = "sync-pass";
const DOCUMENTS_PREFIX: &str = "documents";
const RECORDS_PREFIX: &str = "sync";
const PASS_LABEL: &str = "sync pass";

fn document_key(id: &DocumentId) -> String {
    format!("{}/{}", DOCUMENTS_PREFIX, id)
}

fn record_key(id: &DocumentId) -> String {
    format!("{}/{}", RECORDS_PREFIX, id)
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// How long a document lock may be held before it is reclaimable.
    pub lock_timeout: Duration,
    /// Resolve conflicts with the built-in heuristic as soon as they are
    /// detected; the merge is pushed on the next pass.
    pub auto_resolve: bool,
    /// Run a pass when connectivity comes back and work is pending.
    pub sync_on_reconnect: bool,
    pub start_online: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            auto_resolve: false,
            sync_on_reconnect: true,
            start_online: true,
        }
    }
}

/// What the engine last confirmed about a document's remote copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    pub remote_link: RemoteLink,
    pub remote_version: u64,
    pub synced_at: DateTime<Utc>,
}

/// Why a sync pass did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    /// A pass is running in this engine or in another one sharing the store.
    AlreadySyncing,
    /// The store's pass lock could not be taken.
    StorageUnavailable,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Offline => write!(f, "offline"),
            SkipReason::AlreadySyncing => write!(f, "already syncing"),
            SkipReason::StorageUnavailable => write!(f, "local storage unavailable"),
        }
    }
}

/// Result of one queued operation within a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationOutcome {
    Created {
        document_id: DocumentId,
        remote_id: String,
        version: u64,
    },
    Updated {
        document_id: DocumentId,
        version: u64,
    },
    /// The remote copy had moved on; a conflict now holds both snapshots.
    Conflict {
        document_id: DocumentId,
        conflict_id: Uuid,
        auto_resolved: bool,
    },
    /// A newer snapshot replaced the local side of a pending conflict.
    FoldedIntoConflict {
        document_id: DocumentId,
        conflict_id: Uuid,
    },
    /// Another pass holds the document's lock; the operation stays queued.
    LockHeld {
        document_id: DocumentId,
        holder: String,
    },
    /// An earlier operation for the same document failed in this pass.
    Deferred { document_id: DocumentId },
    Failed {
        document_id: DocumentId,
        error: String,
        retryable: bool,
    },
}

impl OperationOutcome {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            OperationOutcome::Created { document_id, .. }
            | OperationOutcome::Updated { document_id, .. }
            | OperationOutcome::Conflict { document_id, .. }
            | OperationOutcome::FoldedIntoConflict { document_id, .. }
            | OperationOutcome::LockHeld { document_id, .. }
            | OperationOutcome::Deferred { document_id }
            | OperationOutcome::Failed { document_id, .. } => document_id,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            OperationOutcome::Created { .. } | OperationOutcome::Updated { .. }
        )
    }
}

impl fmt::Display for OperationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationOutcome::Created {
                document_id,
                remote_id,
                version,
            } => write!(f, "{}: created {} (v{})", document_id, remote_id, version),
            OperationOutcome::Updated {
                document_id,
                version,
            } => write!(f, "{}: updated (v{})", document_id, version),
            OperationOutcome::Conflict {
                document_id,
                conflict_id,
                auto_resolved,
            } => {
                write!(f, "{}: conflict {}", document_id, conflict_id)?;
                if *auto_resolved {
                    write!(f, " (auto-resolved, merge queued)")?;
                }
                Ok(())
            }
            OperationOutcome::FoldedIntoConflict {
                document_id,
                conflict_id,
            } => write!(f, "{}: waiting on conflict {}", document_id, conflict_id),
            OperationOutcome::LockHeld {
                document_id,
                holder,
            } => write!(f, "{}: already syncing (held by {})", document_id, holder),
            OperationOutcome::Deferred { document_id } => {
                write!(f, "{}: deferred to next sync", document_id)
            }
            OperationOutcome::Failed {
                document_id,
                error,
                retryable,
            } => {
                write!(f, "{}: failed: {}", document_id, error)?;
                if *retryable {
                    write!(f, " (will retry)")?;
                }
                Ok(())
            }
        }
    }
}

/// Summary of a [`SyncOrchestrator::manual_sync`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub skipped: Option<SkipReason>,
    pub outcomes: Vec<OperationOutcome>,
}

impl SyncReport {
    fn not_run(reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            outcomes: Vec::new(),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped.is_some()
    }

    pub fn synced_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn conflict_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, OperationOutcome::Conflict { .. }))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, OperationOutcome::Failed { .. }))
            .count()
    }
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(reason) = self.skipped {
            return write!(f, "Sync skipped: {}", reason);
        }
        write!(
            f,
            "Synced {} of {} operation(s), {} conflict(s), {} failure(s)",
            self.synced_count(),
            self.outcomes.len(),
            self.conflict_count(),
            self.failure_count()
        )
    }
}

/// Remote copy fetched by [`SyncOrchestrator::refresh`], diffed against the
/// last-known local document.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshReport {
    pub local: Document,
    pub remote: Document,
    pub analysis: ConflictAnalysis,
}

impl RefreshReport {
    pub fn is_current(&self) -> bool {
        self.analysis.is_empty()
    }
}

#[derive(Debug, Default)]
struct EngineState {
    online: bool,
    last_sync_time: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Outcome of the last pass, kept under [`STATUS_KEY`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct PassRecord {
    #[serde(default)]
    last_sync_time: Option<DateTime<Utc>>,
    #[serde(default)]
    last_error: Option<String>,
}

struct Inner {
    remote: Arc<dyn RemoteStore>,
    store: Arc<dyn DurableStore>,
    queue: OperationQueue,
    locks: LockManager,
    broadcaster: StatusBroadcaster,
    config: OrchestratorConfig,
    syncing: AtomicBool,
    state: Mutex<EngineState>,
}

/// Clears the syncing flag however a pass ends.
struct PassGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> PassGuard<'a> {
    fn begin(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Offline-first sync engine for one remote store.
///
/// Cheap to clone; clones share the same engine.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Opens the engine on `store`, picking up queued operations, pending
    /// conflicts and the outcome of the last pass.
    pub fn open(
        remote: Arc<dyn RemoteStore>,
        store: Arc<dyn DurableStore>,
        config: OrchestratorConfig,
    ) -> Result<Self, SyncError> {
        let queue = OperationQueue::open(Arc::clone(&store))?;
        let conflicts: Vec<Conflict> =
            load_json(store.as_ref(), CONFLICTS_KEY)?.unwrap_or_default();
        let last_pass: PassRecord = load_json(store.as_ref(), STATUS_KEY)?.unwrap_or_default();

        info!(
            pending = queue.unconfirmed_count(),
            conflicts = conflicts.len(),
            "Sync engine opened"
        );

        let state = EngineState {
            online: config.start_online,
            last_sync_time: last_pass.last_sync_time,
            last_error: last_pass.last_error,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                store,
                queue,
                locks: LockManager::with_timeout(config.lock_timeout),
                broadcaster: StatusBroadcaster::new(),
                config,
                syncing: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    /// The engine's lock table.
    pub fn locks(&self) -> &LockManager {
        &self.inner.locks
    }

    /// Validates `document` and queues it for the next pass.
    ///
    /// The snapshot also becomes the last-known local copy. If it cannot be
    /// queued the previous copy is put back. No network I/O happens here.
    pub fn enqueue_sync(
        &self,
        kind: OperationKind,
        mut document: Document,
        remote_link: Option<RemoteLink>,
    ) -> Result<Uuid, SyncError> {
        document.validate()?;

        if document.remote.is_none() {
            document.remote = remote_link
                .clone()
                .or_else(|| self.sync_record(&document.id).map(|r| r.remote_link));
        }
        let store = self.inner.store.as_ref();
        let key = document_key(&document.id);
        let previous = store.load(&key)?;
        save_json(store, &key, &document)?;

        let op = SyncOperation::new(kind, document, remote_link);
        let op_id = op.id;
        let document_id = op.document.id.clone();
        let version = op.document.version;
        if let Err(e) = self.inner.queue.enqueue(op) {
            let restored = match previous {
                Some(bytes) => store.save(&key, &bytes),
                None => store.delete(&key).map(|_| ()),
            };
            if let Err(restore_error) = restored {
                warn!(
                    document_id = %document_id,
                    error = %restore_error,
                    "Failed to restore document after queue write failed"
                );
            }
            return Err(e.into());
        }
        debug!(
            op_id = %op_id,
            document_id = %document_id,
            %kind,
            version,
            "Queued sync operation"
        );

        self.publish();
        Ok(op_id)
    }

    /// Runs one sync pass over everything queued.
    ///
    /// Returns without doing anything if the engine is offline or a pass is
    /// already running, here or in another engine on the same store.
    /// Operations for a document whose lock is held, or whose earlier
    /// operation failed transiently, stay queued in order.
    pub async fn manual_sync(&self) -> SyncReport {
        if !self.is_online() {
            info!("Skipping sync: offline");
            return SyncReport::not_run(SkipReason::Offline);
        }
        let Some(pass) = PassGuard::begin(&self.inner.syncing) else {
            info!("Skipping sync: a pass is already running");
            return SyncReport::not_run(SkipReason::AlreadySyncing);
        };
        let shared_pass = match self.inner.store.try_lock(PASS_LOCK_KEY) {
            Ok(Some(lock)) => lock,
            Ok(None) => {
                info!("Skipping sync: another engine is syncing this store");
                return SyncReport::not_run(SkipReason::AlreadySyncing);
            }
            Err(e) => {
                drop(pass);
                warn!(error = %e, "Skipping sync: cannot lock local storage");
                self.state().last_error = Some(e.to_string());
                self.publish();
                return SyncReport::not_run(SkipReason::StorageUnavailable);
            }
        };
        self.publish();

        let ops = self.inner.queue.drain();
        info!(operations = ops.len(), "Sync pass started");

        let mut report = SyncReport::default();
        let mut halted: HashSet<DocumentId> = HashSet::new();
        let mut retry = Vec::new();

        for op in ops {
            let document_id = op.document.id.clone();
            if halted.contains(&document_id) {
                report
                    .outcomes
                    .push(OperationOutcome::Deferred { document_id });
                retry.push(op);
                continue;
            }

            let (outcome, unfinished) = self.process(op).await;
            if let Some(op) = unfinished {
                halted.insert(document_id);
                retry.push(op);
            }
            report.outcomes.push(outcome);
        }

        if let Err(e) = self.inner.queue.requeue(retry) {
            warn!(error = %e, "Failed to persist requeued operations");
        }

        let record = {
            let mut state = self.state();
            state.last_sync_time = Some(Utc::now());
            if report.failure_count() == 0 {
                state.last_error = None;
            }
            PassRecord {
                last_sync_time: state.last_sync_time,
                last_error: state.last_error.clone(),
            }
        };
        if let Err(e) = save_json(self.inner.store.as_ref(), STATUS_KEY, &record) {
            warn!(error = %e, "Failed to persist sync status");
        }
        drop(shared_pass);
        drop(pass);

        info!(
            synced = report.synced_count(),
            conflicts = report.conflict_count(),
            failures = report.failure_count(),
            "Sync pass finished"
        );
        self.publish();
        report
    }

    /// Pushes one operation. Returns the operation back if it must stay
    /// queued.
    async fn process(&self, op: SyncOperation) -> (OperationOutcome, Option<SyncOperation>) {
        let document_id = op.document.id.clone();

        match self.fold_into_conflict(&op) {
            Ok(Some(conflict_id)) => {
                self.acknowledge(&op);
                return (
                    OperationOutcome::FoldedIntoConflict {
                        document_id,
                        conflict_id,
                    },
                    None,
                );
            }
            Ok(None) => {}
            Err(e) => return self.fail(op, e),
        }

        let _lock = match self.inner.locks.guard(document_id.as_str(), PASS_LABEL) {
            Ok(guard) => guard,
            Err(SyncError::LockHeld { holder, .. }) => {
                warn!(document_id = %document_id, holder = %holder, "Already syncing");
                return (
                    OperationOutcome::LockHeld {
                        document_id,
                        holder,
                    },
                    Some(op),
                );
            }
            Err(e) => return self.fail(op, e),
        };

        let result = match self.link_for(&op) {
            None => {
                if op.kind == OperationKind::Update {
                    debug!(document_id = %document_id, "No remote link; creating instead");
                }
                self.push_create(&op).await
            }
            Some(link) => self.push_update(&op, link).await,
        };

        match result {
            Ok(outcome) => {
                self.acknowledge(&op);
                (outcome, None)
            }
            Err(e) => self.fail(op, e),
        }
    }

    async fn push_create(&self, op: &SyncOperation) -> Result<OperationOutcome, SyncError> {
        let created = self.inner.remote.create_resource(&op.document).await?;
        let link = created.link();
        info!(
            document_id = %op.document.id,
            remote_id = %created.remote_id,
            version = created.version,
            "Created remote copy"
        );

        let document = op.document.clone().with_remote(link.clone());
        self.record_success(&document, link, created.version);

        Ok(OperationOutcome::Created {
            document_id: document.id,
            remote_id: created.remote_id,
            version: created.version,
        })
    }

    async fn push_update(
        &self,
        op: &SyncOperation,
        link: RemoteLink,
    ) -> Result<OperationOutcome, SyncError> {
        let expected = self.expected_version(op);
        let outcome = self
            .inner
            .remote
            .update_resource(&link.remote_id, &op.document, expected)
            .await?;

        match outcome {
            UpdateOutcome::Updated { version } => {
                debug!(document_id = %op.document.id, version, "Updated remote copy");
                let document = op.document.clone().with_remote(link.clone());
                self.record_success(&document, link, version);
                Ok(OperationOutcome::Updated {
                    document_id: document.id,
                    version,
                })
            }
            UpdateOutcome::VersionConflict(remote) => {
                self.raise_conflict(op, link, *remote, expected)
            }
        }
    }

    fn raise_conflict(
        &self,
        op: &SyncOperation,
        link: RemoteLink,
        remote: Document,
        expected: u64,
    ) -> Result<OperationOutcome, SyncError> {
        let local = op.document.clone().with_remote(link.clone());
        let conflict = Conflict::new(local, remote, link, expected);
        let conflict_id = conflict.id;
        let document_id = conflict.document_id.clone();
        info!(
            document_id = %document_id,
            conflict_id = %conflict_id,
            local_version = conflict.local_version(),
            remote_version = conflict.remote_version(),
            "Version conflict"
        );

        self.update_conflicts(|conflicts| {
            conflicts.push(conflict);
            Ok(())
        })?;

        let mut auto_resolved = false;
        if self.inner.config.auto_resolve {
            match self.resolve(conflict_id, ResolutionStrategy::Auto, None) {
                Ok(_) => auto_resolved = true,
                Err(e) => warn!(conflict_id = %conflict_id, error = %e, "Auto-resolution failed"),
            }
        }

        Ok(OperationOutcome::Conflict {
            document_id,
            conflict_id,
            auto_resolved,
        })
    }

    /// Replaces the local side of a pending conflict for the same document.
    fn fold_into_conflict(&self, op: &SyncOperation) -> Result<Option<Uuid>, SyncError> {
        let pending: Vec<Conflict> =
            load_json(self.inner.store.as_ref(), CONFLICTS_KEY)?.unwrap_or_default();
        if !pending.iter().any(|c| c.document_id == op.document.id) {
            return Ok(None);
        }

        self.update_conflicts(|conflicts| {
            let Some(conflict) = conflicts
                .iter_mut()
                .find(|c| c.document_id == op.document.id)
            else {
                return Ok(None);
            };
            if op.document.version >= conflict.local.version {
                conflict.local = op
                    .document
                    .clone()
                    .with_remote(conflict.remote_link.clone());
            }
            debug!(conflict_id = %conflict.id, "Folded operation into pending conflict");
            Ok(Some(conflict.id))
        })
    }

    fn fail(&self, op: SyncOperation, error: SyncError) -> (OperationOutcome, Option<SyncOperation>) {
        let retryable = error.is_transient();
        warn!(
            document_id = %op.document.id,
            error = %error,
            retryable,
            "Sync operation failed"
        );
        self.state().last_error = Some(error.to_string());

        let outcome = OperationOutcome::Failed {
            document_id: op.document.id.clone(),
            error: error.to_string(),
            retryable,
        };
        if retryable {
            (outcome, Some(op))
        } else {
            self.acknowledge(&op);
            (outcome, None)
        }
    }

    fn acknowledge(&self, op: &SyncOperation) {
        if let Err(e) = self.inner.queue.acknowledge(op.id) {
            warn!(op_id = %op.id, error = %e, "Failed to persist acknowledgement");
        }
    }

    fn link_for(&self, op: &SyncOperation) -> Option<RemoteLink> {
        op.remote_link
            .clone()
            .or_else(|| self.sync_record(&op.document.id).map(|r| r.remote_link))
            .or_else(|| op.document.remote.clone())
    }

    /// Remote version an update is checked against. Without any history the
    /// check is against 0, which conflicts with whatever exists remotely.
    fn expected_version(&self, op: &SyncOperation) -> u64 {
        op.base_version
            .or_else(|| self.sync_record(&op.document.id).map(|r| r.remote_version))
            .unwrap_or(0)
    }

    fn record_success(&self, document: &Document, link: RemoteLink, version: u64) {
        let record = SyncRecord {
            remote_link: link,
            remote_version: version,
            synced_at: Utc::now(),
        };
        if let Err(e) = save_json(
            self.inner.store.as_ref(),
            &record_key(&document.id),
            &record,
        ) {
            warn!(document_id = %document.id, error = %e, "Failed to persist sync record");
        }
        self.save_last_known(document);
    }

    /// Stores `document` as the last-known copy unless a newer local
    /// snapshot is already stored, in which case only its link is updated.
    fn save_last_known(&self, document: &Document) {
        let store = self.inner.store.as_ref();
        let key = document_key(&document.id);
        let to_save = match load_json::<Document>(store, &key) {
            Ok(Some(mut existing)) if existing.version > document.version => {
                existing.remote = document.remote.clone().or(existing.remote);
                existing
            }
            _ => document.clone(),
        };
        if let Err(e) = save_json(store, &key, &to_save) {
            warn!(document_id = %document.id, error = %e, "Failed to persist document");
        }
    }

    /// Merges a pending conflict, queues the result as an update and drops
    /// the conflict. Returns the merged document.
    pub fn resolve_conflict(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        custom_resolutions: Option<&ResolutionMap>,
    ) -> Result<Document, SyncError> {
        let merged = self.resolve(conflict_id, strategy, custom_resolutions)?;
        self.publish();
        Ok(merged)
    }

    fn resolve(
        &self,
        conflict_id: Uuid,
        strategy: ResolutionStrategy,
        custom_resolutions: Option<&ResolutionMap>,
    ) -> Result<Document, SyncError> {
        let (merged, document_id) = self.update_conflicts(|conflicts| {
            let index = conflicts
                .iter()
                .position(|c| c.id == conflict_id)
                .ok_or(SyncError::ConflictNotFound(conflict_id))?;

            let conflict = &conflicts[index];
            let analysis = conflict.analyze();
            let resolutions = strategy.resolutions(&analysis, custom_resolutions);
            let merged = merge(&conflict.local, &conflict.remote, &analysis, &resolutions)?
                .with_remote(conflict.remote_link.clone());

            let op = SyncOperation::update(merged.clone(), conflict.remote_link.clone())
                .with_base_version(conflict.remote_version());
            self.inner.queue.enqueue(op)?;

            let conflict = conflicts.remove(index);
            Ok((merged, conflict.document_id))
        })?;
        self.save_last_known(&merged);

        info!(
            conflict_id = %conflict_id,
            document_id = %document_id,
            ?strategy,
            version = merged.version,
            "Conflict resolved; merge queued"
        );
        Ok(merged)
    }

    /// Discards every pending conflict without merging. Returns how many
    /// were dropped.
    pub fn clear_all_conflicts(&self) -> Result<usize, SyncError> {
        let cleared = self.update_conflicts(|conflicts| {
            let cleared = conflicts.len();
            conflicts.clear();
            Ok(cleared)
        })?;
        info!(cleared, "Cleared pending conflicts");
        self.publish();
        Ok(cleared)
    }

    fn update_conflicts<R>(
        &self,
        f: impl FnOnce(&mut Vec<Conflict>) -> Result<R, SyncError>,
    ) -> Result<R, SyncError> {
        update_json(self.inner.store.as_ref(), CONFLICTS_KEY, f)
    }

    fn load_conflicts(&self) -> Vec<Conflict> {
        match load_json(self.inner.store.as_ref(), CONFLICTS_KEY) {
            Ok(conflicts) => conflicts.unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, "Failed to read conflicts");
                Vec::new()
            }
        }
    }

    pub fn conflicts(&self) -> Vec<Conflict> {
        self.load_conflicts()
    }

    pub fn conflict(&self, conflict_id: Uuid) -> Option<Conflict> {
        self.load_conflicts()
            .into_iter()
            .find(|c| c.id == conflict_id)
    }

    /// Every unconfirmed operation, oldest first.
    pub fn pending_operations(&self) -> Vec<SyncOperation> {
        self.inner.queue.pending()
    }

    pub fn status(&self) -> SyncStatus {
        let (is_online, last_sync_time, last_error) = {
            let state = self.state();
            (state.online, state.last_sync_time, state.last_error.clone())
        };
        SyncStatus {
            is_online,
            is_syncing: self.inner.syncing.load(Ordering::SeqCst),
            pending_operations: self.inner.queue.unconfirmed_count(),
            last_sync_time,
            last_error,
            conflicts: self.load_conflicts().iter().map(Conflict::info).collect(),
        }
    }

    /// Calls `listener` with a copy of the status on every transition until
    /// the returned handle is dropped.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        self.inner.broadcaster.add_listener(listener)
    }

    pub fn subscribe(&self) -> StatusSubscription {
        self.inner.broadcaster.subscribe()
    }

    fn publish(&self) {
        let status = self.status();
        self.inner.broadcaster.publish(&status);
    }

    pub fn is_online(&self) -> bool {
        self.state().online
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::SeqCst)
    }

    pub fn set_online(&self, online: bool) {
        let changed = {
            let mut state = self.state();
            let changed = state.online != online;
            state.online = online;
            changed
        };
        if changed {
            info!(online, "Connectivity changed");
            self.publish();
        }
    }

    /// Follows a connectivity signal until its sender is dropped.
    ///
    /// With `sync_on_reconnect`, going from offline to online runs a pass if
    /// anything is queued.
    pub fn follow_connectivity(&self, mut signal: watch::Receiver<bool>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let online = *signal.borrow_and_update();
            orchestrator.apply_connectivity(online).await;
            while signal.changed().await.is_ok() {
                let online = *signal.borrow_and_update();
                orchestrator.apply_connectivity(online).await;
            }
            debug!("Connectivity signal closed");
        })
    }

    async fn apply_connectivity(&self, online: bool) {
        let was_online = self.is_online();
        self.set_online(online);
        if online
            && !was_online
            && self.inner.config.sync_on_reconnect
            && self.inner.queue.unconfirmed_count() > 0
        {
            let report = self.manual_sync().await;
            info!(%report, "Reconnect sync finished");
        }
    }

    /// Last-known local copy of a document.
    pub fn document(&self, id: &DocumentId) -> Result<Option<Document>, SyncError> {
        Ok(load_json(self.inner.store.as_ref(), &document_key(id))?)
    }

    /// Ids of every document with a last-known copy.
    pub fn documents(&self) -> Result<Vec<DocumentId>, SyncError> {
        let keys = self.inner.store.list(DOCUMENTS_PREFIX)?;
        let prefix = format!("{}/", DOCUMENTS_PREFIX);
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter_map(|id| DocumentId::parse(id).ok())
            .collect())
    }

    /// What the engine last confirmed about a document's remote copy.
    pub fn sync_record(&self, id: &DocumentId) -> Option<SyncRecord> {
        match load_json::<SyncRecord>(self.inner.store.as_ref(), &record_key(id)) {
            Ok(record) => record,
            Err(e) => {
                warn!(document_id = %id, error = %e, "Failed to load sync record");
                None
            }
        }
    }

    /// Fetches the remote copy of a linked document and diffs it against the
    /// last-known local copy.
    pub async fn refresh(&self, id: &DocumentId) -> Result<RefreshReport, SyncError> {
        if !self.is_online() {
            return Err(SyncError::Offline);
        }
        let local = self
            .document(id)?
            .ok_or_else(|| SyncError::DocumentNotFound(id.clone()))?;
        let link = self
            .sync_record(id)
            .map(|r| r.remote_link)
            .or_else(|| local.remote.clone())
            .ok_or_else(|| SyncError::NotLinked(id.clone()))?;

        let remote = self.inner.remote.fetch_resource(&link.remote_id).await?;
        let analysis = analyze(&local, &remote);
        debug!(document_id = %id, differences = analysis.summary.total(), "Refreshed remote copy");

        Ok(RefreshReport {
            local,
            remote,
            analysis,
        })
    }

    fn state(&self) -> MutexGuard<'_, EngineState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("queue", &self.inner.queue)
            .field("locks", &self.inner.locks)
            .field("config", &self.inner.config)
            .finish()
    }
}
