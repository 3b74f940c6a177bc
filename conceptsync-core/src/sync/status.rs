//! Sync status and its observers.
//!
//! Observers can register a callback with [`StatusBroadcaster::add_listener`]
//! or pull updates from a [`StatusSubscription`]. Both get a copy of the
//! status on every transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use tokio::sync::broadcast;

use crate::conflict::ConflictInfo;

const CHANNEL_CAPACITY: usize = 64;

/// Snapshot of the engine's state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub is_online: bool,
    pub is_syncing: bool,
    pub pending_operations: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub conflicts: Vec<ConflictInfo>,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Connectivity: {}",
            if self.is_online { "online" } else { "offline" }
        )?;
        writeln!(f, "Syncing:      {}", if self.is_syncing { "yes" } else { "no" })?;
        writeln!(f, "Pending:      {}", self.pending_operations)?;
        match self.last_sync_time {
            Some(t) => writeln!(f, "Last sync:    {}", t.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => writeln!(f, "Last sync:    never")?,
        }
        if let Some(ref error) = self.last_error {
            writeln!(f, "Last error:   {}", error)?;
        }
        write!(f, "Conflicts:    {}", self.conflicts.len())
    }
}

type Listener = Arc<dyn Fn(&SyncStatus) + Send + Sync>;
type Registry = Mutex<BTreeMap<u64, Listener>>;

/// Fans status updates out to listeners and subscribers.
pub struct StatusBroadcaster {
    listeners: Arc<Registry>,
    next_id: AtomicU64,
    sender: broadcast::Sender<SyncStatus>,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            listeners: Arc::new(Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Registers a callback; it stays registered until the handle is dropped
    /// or [`ListenerHandle::unsubscribe`] is called.
    pub fn add_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&SyncStatus) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        lock_registry(&self.listeners).insert(id, Arc::new(listener));
        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.listeners),
            detached: false,
        }
    }

    pub fn subscribe(&self) -> StatusSubscription {
        StatusSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn listener_count(&self) -> usize {
        lock_registry(&self.listeners).len()
    }

    /// Delivers `status` to every listener and subscriber.
    ///
    /// Callbacks run outside the registry lock, so a listener may add or
    /// remove listeners while being notified.
    pub fn publish(&self, status: &SyncStatus) {
        let listeners: Vec<Listener> = lock_registry(&self.listeners).values().cloned().collect();
        for listener in listeners {
            listener(status);
        }
        // no subscribers is fine
        let _ = self.sender.send(status.clone());
    }
}

impl fmt::Debug for StatusBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusBroadcaster")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

fn lock_registry(registry: &Registry) -> MutexGuard<'_, BTreeMap<u64, Listener>> {
    registry.lock().unwrap_or_else(|e| e.into_inner())
}

/// Keeps a listener registered.
#[must_use = "dropping the handle unregisters the listener"]
#[derive(Debug)]
pub struct ListenerHandle {
    id: u64,
    registry: Weak<Registry>,
    detached: bool,
}

impl ListenerHandle {
    /// Unregisters the listener now.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Keeps the listener registered for the broadcaster's lifetime.
    pub fn detach(mut self) {
        self.detached = true;
    }

    fn remove(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            lock_registry(&registry).remove(&self.id);
        }
        self.detached = true;
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if !self.detached {
            self.remove();
        }
    }
}

/// Pull-based stream of status updates.
#[derive(Debug)]
pub struct StatusSubscription {
    receiver: broadcast::Receiver<SyncStatus>,
}

impl StatusSubscription {
    /// Waits for the next update. If this subscriber fell behind, older
    /// updates are skipped. Returns `None` once the broadcaster is gone.
    pub async fn recv(&mut self) -> Option<SyncStatus> {
        loop {
            match self.receiver.recv().await {
                Ok(status) => return Some(status),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns an update if one is already waiting.
    pub fn try_recv(&mut self) -> Option<SyncStatus> {
        loop {
            match self.receiver.try_recv() {
                Ok(status) => return Some(status),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
