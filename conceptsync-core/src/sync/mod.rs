//! Offline-first sync engine.
//!
//! - [`OperationQueue`]: durable log of snapshots waiting to be pushed
//! - [`LockManager`]: per-document locks that expire after a timeout
//! - [`SyncOrchestrator`]: drives passes against a [`RemoteStore`], turns
//!   version drift into conflicts and reports [`SyncStatus`] to observers

mod connectivity;
mod error;
mod lock;
mod orchestrator;
mod queue;
mod remote;
mod status;

pub use connectivity::ConnectivitySignal;
pub use error::SyncError;
pub use lock::{LockGuard, LockManager, LockRecord, LockToken, DEFAULT_LOCK_TIMEOUT};
pub use orchestrator::{
    OperationOutcome, OrchestratorConfig, RefreshReport, SkipReason, SyncOrchestrator, SyncRecord,
    SyncReport,
};
pub use queue::{OperationKind, OperationQueue, SyncOperation, QUEUE_KEY};
pub use remote::{CreatedResource, InMemoryRemoteStore, RemoteError, RemoteStore, UpdateOutcome};
pub use status::{ListenerHandle, StatusBroadcaster, StatusSubscription, SyncStatus};
