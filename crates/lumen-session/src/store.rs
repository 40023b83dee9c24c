use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::trace;

use crate::reducer::{reduce, Action};
use crate::state::SessionState;

/// Owns the session state and publishes a fresh snapshot after every action.
///
/// Subscribers hold a `watch::Receiver`, so a slow reader sees the latest
/// snapshot rather than a backlog. Snapshots are shared `Arc`s and never
/// mutated after publication.
#[derive(Clone)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    // serializes reduce + publish so snapshots are linearizable
    dispatch_lock: Mutex<()>,
    tx: watch::Sender<Arc<SessionState>>,
    revision: AtomicU64,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Arc::new(SessionState::default()));
        Self {
            inner: Arc::new(StoreInner {
                dispatch_lock: Mutex::new(()),
                tx,
                revision: AtomicU64::new(0),
            }),
        }
    }

    /// Apply an action and publish the result. Returns the new snapshot.
    pub fn dispatch(&self, action: Action) -> Arc<SessionState> {
        let _guard = self.inner.dispatch_lock.lock();
        let current = self.inner.tx.borrow().clone();
        trace!(action = action.name(), "dispatch");
        let next = Arc::new(reduce(&current, action));
        self.inner.tx.send_replace(next.clone());
        self.inner.revision.fetch_add(1, Ordering::Relaxed);
        next
    }

    /// Number of actions applied so far.
    pub fn revision(&self) -> u64 {
        self.inner.revision.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Arc<SessionState> {
        self.inner.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.inner.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }
}
