//! The derived-runtime-state store.
//!
//! One immutable [`StateSnapshot`] describes everything the frontend layer
//! needs to render: server connectivity, share-scan progress, version, and
//! pending-action flags. Updates build a modified copy and publish it as a
//! whole; observers are stateless and always receive the full snapshot.

use crate::session::SessionPhase;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::watch;

/// Server connectivity as last observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerState {
    /// Current session phase.
    pub phase: SessionPhase,
    /// Server address in use.
    pub address: String,
    /// Username of the logged-in session, when logged in.
    pub username: Option<String>,
}

/// Share-scan progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShareScanState {
    /// True while a refill is running.
    pub filling: bool,
    /// Fill progress, 0.0 to 1.0.
    pub progress: f32,
    /// Directory count of the active catalog.
    pub directories: u64,
    /// File count of the active catalog.
    pub files: u64,
    /// True when the last refill failed.
    pub faulted: bool,
}

/// Actions the operator still needs to take for configuration to fully
/// apply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingActions {
    /// A reconnect to the overlay server is required.
    pub reconnect: bool,
    /// A daemon restart is required.
    pub restart: bool,
    /// A share rescan is required.
    pub rescan: bool,
}

/// The complete derived runtime state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateSnapshot {
    /// Daemon version string.
    pub version: String,
    /// Server connectivity.
    pub server: ServerState,
    /// Share-scan progress.
    pub shares: ShareScanState,
    /// Pending operator actions.
    pub pending: PendingActions,
}

impl StateSnapshot {
    /// Copy with a replaced server state.
    #[must_use]
    pub fn with_server(&self, server: ServerState) -> Self {
        StateSnapshot {
            server,
            ..self.clone()
        }
    }

    /// Copy with a replaced share-scan state.
    #[must_use]
    pub fn with_shares(&self, shares: ShareScanState) -> Self {
        StateSnapshot {
            shares,
            ..self.clone()
        }
    }

    /// Copy with replaced pending-action flags.
    #[must_use]
    pub fn with_pending(&self, pending: PendingActions) -> Self {
        StateSnapshot {
            pending,
            ..self.clone()
        }
    }
}

/// Atomic swap-and-broadcast holder of the current [`StateSnapshot`].
pub struct StateStore {
    current: ArcSwap<StateSnapshot>,
    sender: watch::Sender<Arc<StateSnapshot>>,
    // Serializes read-modify-write updates so none is lost.
    update_lock: Mutex<()>,
}

impl StateStore {
    /// Create a store with the given initial snapshot.
    #[must_use]
    pub fn new(initial: StateSnapshot) -> Self {
        let initial = Arc::new(initial);
        let (sender, _) = watch::channel(Arc::clone(&initial));
        StateStore {
            current: ArcSwap::new(initial),
            sender,
            update_lock: Mutex::new(()),
        }
    }

    /// The current snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StateSnapshot> {
        self.current.load_full()
    }

    /// Apply a pure update and broadcast the resulting snapshot.
    pub fn update(&self, f: impl FnOnce(&StateSnapshot) -> StateSnapshot) {
        let _guard = self.update_lock.lock();
        let next = Arc::new(f(&self.current.load()));
        self.current.store(Arc::clone(&next));
        let _ = self.sender.send(next);
    }

    /// Subscribe to snapshot broadcasts. The receiver starts at the current
    /// snapshot.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<StateSnapshot>> {
        self.sender.subscribe()
    }
}

impl Default for StateStore {
    fn default() -> Self {
        StateStore::new(StateSnapshot::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_swaps_whole_snapshot() {
        let store = StateStore::default();

        store.update(|s| {
            s.with_shares(ShareScanState {
                filling: true,
                progress: 0.3,
                ..s.shares.clone()
            })
        });

        let snap = store.snapshot();
        assert!(snap.shares.filling);
        assert_eq!(snap.shares.progress, 0.3);
        // Untouched sections carried over.
        assert_eq!(snap.server, ServerState::default());
    }

    #[tokio::test]
    async fn test_subscribers_receive_full_snapshots() {
        let store = StateStore::default();
        let mut rx = store.subscribe();

        store.update(|s| {
            s.with_pending(PendingActions {
                rescan: true,
                ..s.pending
            })
        });

        rx.changed().await.unwrap();
        let snap = rx.borrow_and_update().clone();
        assert!(snap.pending.rescan);
        assert!(!snap.pending.restart);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let store = Arc::new(StateStore::default());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    for _ in 0..250 {
                        store.update(|s| {
                            let mut shares = s.shares.clone();
                            shares.files += 1;
                            s.with_shares(shares)
                        });
                    }
                });
            }
        });
        assert_eq!(store.snapshot().shares.files, 1000);
    }
}
