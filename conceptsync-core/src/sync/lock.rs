//! Per-document locks with timeout-based reclamation.
//!
//! Every resource id gets its own slot in an id-to-record map. The map lock
//! is only held long enough to find or create a slot, so documents never
//! wait on each other; acquiring the same id is serialized by the slot's
//! own mutex.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::SyncError;

/// Locks older than this are treated as abandoned.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// Proof of ownership returned by [`LockManager::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockToken(Uuid);

impl LockToken {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A held lock.
#[derive(Debug, Clone)]
pub struct LockRecord {
    pub resource_id: String,
    pub token: LockToken,
    pub label: String,
    pub acquired_at: DateTime<Utc>,
    started: Instant,
}

impl LockRecord {
    fn is_expired(&self, timeout: Duration) -> bool {
        self.started.elapsed() >= timeout
    }
}

type Slot = Arc<Mutex<Option<LockRecord>>>;

/// Table of per-resource locks.
#[derive(Debug)]
pub struct LockManager {
    slots: Mutex<HashMap<String, Slot>>,
    timeout: Duration,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Takes the lock for `resource_id`.
    ///
    /// Fails with [`SyncError::LockHeld`] while another non-expired lock
    /// exists. An expired lock is reclaimed.
    pub fn acquire(&self, resource_id: &str, label: &str) -> Result<LockToken, SyncError> {
        let slot = self.slot(resource_id);
        let mut current = lock_slot(&slot);

        if let Some(existing) = current.as_ref() {
            if !existing.is_expired(self.timeout) {
                return Err(SyncError::LockHeld {
                    resource_id: resource_id.to_string(),
                    holder: existing.label.clone(),
                });
            }
            warn!(
                resource_id,
                holder = %existing.label,
                acquired_at = %existing.acquired_at,
                "Reclaiming expired lock"
            );
        }

        let token = LockToken::new();
        *current = Some(LockRecord {
            resource_id: resource_id.to_string(),
            token,
            label: label.to_string(),
            acquired_at: Utc::now(),
            started: Instant::now(),
        });
        debug!(resource_id, label, %token, "Lock acquired");
        Ok(token)
    }

    /// Releases the lock if `token` still owns it.
    ///
    /// A mismatch (typically a caller whose lock already expired and was
    /// reclaimed) is logged and otherwise ignored. Returns whether a lock was
    /// removed.
    pub fn release(&self, resource_id: &str, token: LockToken) -> bool {
        let slot = self.slot(resource_id);
        let mut current = lock_slot(&slot);

        match current.as_ref() {
            Some(existing) if existing.token == token => {
                *current = None;
                debug!(resource_id, %token, "Lock released");
                true
            }
            Some(existing) => {
                warn!(
                    resource_id,
                    %token,
                    owner = %existing.token,
                    "Ignoring release with stale lock token"
                );
                false
            }
            None => {
                warn!(resource_id, %token, "Ignoring release of a lock that is not held");
                false
            }
        }
    }

    /// Acquires a lock that is released when the guard drops.
    pub fn guard(&self, resource_id: &str, label: &str) -> Result<LockGuard<'_>, SyncError> {
        let token = self.acquire(resource_id, label)?;
        Ok(LockGuard {
            manager: self,
            resource_id: resource_id.to_string(),
            token,
        })
    }

    /// Current non-expired holder of `resource_id`.
    pub fn holder(&self, resource_id: &str) -> Option<LockRecord> {
        let slot = self.slots().get(resource_id).cloned()?;
        let current = lock_slot(&slot);
        current
            .as_ref()
            .filter(|record| !record.is_expired(self.timeout))
            .cloned()
    }

    /// Number of non-expired locks.
    pub fn held_count(&self) -> usize {
        let slots: Vec<Slot> = self.slots().values().cloned().collect();
        slots
            .iter()
            .filter(|slot| {
                lock_slot(slot)
                    .as_ref()
                    .is_some_and(|record| !record.is_expired(self.timeout))
            })
            .count()
    }

    fn slot(&self, resource_id: &str) -> Slot {
        Arc::clone(self.slots().entry(resource_id.to_string()).or_default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_slot(slot: &Slot) -> MutexGuard<'_, Option<LockRecord>> {
    slot.lock().unwrap_or_else(|e| e.into_inner())
}

/// Releases its lock on drop.
#[derive(Debug)]
pub struct LockGuard<'a> {
    manager: &'a LockManager,
    resource_id: String,
    token: LockToken,
}

impl LockGuard<'_> {
    pub fn token(&self) -> LockToken {
        self.token
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.manager.release(&self.resource_id, self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_acquire_release_cycle() {
        let locks = LockManager::new();

        let token = locks.acquire("L", "T1").unwrap();
        let err = locks.acquire("L", "T1").unwrap_err();
        assert!(matches!(err, SyncError::LockHeld { .. }));

        // wrong token leaves the lock in place
        assert!(!locks.release("L", LockToken::new()));
        assert!(locks.acquire("L", "T1").is_err());
        assert_eq!(locks.holder("L").unwrap().token, token);

        assert!(locks.release("L", token));
        assert!(locks.holder("L").is_none());
        locks.acquire("L", "T1").unwrap();
    }

    #[test]
    fn test_distinct_resources_are_independent() {
        let locks = LockManager::new();
        locks.acquire("a", "one").unwrap();
        locks.acquire("b", "two").unwrap();
        assert_eq!(locks.held_count(), 2);
        assert_eq!(locks.holder("b").unwrap().label, "two");
    }

    #[test]
    fn test_expired_lock_is_reclaimable() {
        let locks = LockManager::with_timeout(Duration::from_millis(20));
        let stale = locks.acquire("L", "slow").unwrap();

        std::thread::sleep(Duration::from_millis(40));
        assert!(locks.holder("L").is_none());
        assert_eq!(locks.held_count(), 0);

        let fresh = locks.acquire("L", "fast").unwrap();
        assert_ne!(stale, fresh);

        // a late release from the timed-out owner must not clobber the new lock
        assert!(!locks.release("L", stale));
        assert_eq!(locks.holder("L").unwrap().token, fresh);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let locks = LockManager::new();
        {
            let guard = locks.guard("doc", "pass").unwrap();
            assert_eq!(guard.resource_id(), "doc");
            assert!(locks.guard("doc", "other").is_err());
        }
        assert_eq!(locks.held_count(), 0);
        locks.guard("doc", "again").unwrap();
    }

    #[test]
    fn test_guard_releases_on_panic() {
        let locks = LockManager::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = locks.guard("doc", "pass").unwrap();
            panic!("boom");
        }));
        assert!(result.is_err());
        assert!(locks.holder("doc").is_none());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let locks = Arc::new(LockManager::new());
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let locks = Arc::clone(&locks);
                let wins = Arc::clone(&wins);
                std::thread::spawn(move || {
                    if locks.acquire("shared", &format!("t{}", i)).is_ok() {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
