//! Online/offline signal.

use tokio::sync::watch;

/// Pushes connectivity transitions to whoever follows them.
///
/// Hand [`ConnectivitySignal::subscribe`] to
/// [`SyncOrchestrator::follow_connectivity`](super::SyncOrchestrator::follow_connectivity)
/// and call [`ConnectivitySignal::set_online`] from whatever detects network
/// changes.
#[derive(Debug)]
pub struct ConnectivitySignal {
    sender: watch::Sender<bool>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self { sender }
    }

    /// Records the current state. Followers are only woken on a change.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
    }

    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}
