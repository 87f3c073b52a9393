//! State-change observer registry
//!
//! Subscribers receive one ordered notification per session transition,
//! carrying the new state or its absence. The registry snapshots the
//! subscriber list before dispatch so a callback that subscribes or
//! unsubscribes cannot interleave with the delivery in progress.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::AuthorizationState;

/// Callback invoked on every session state transition
pub type StateObserver = Arc<dyn Fn(Option<&AuthorizationState>) + Send + Sync>;

/// Handle returned by [`ObserverRegistry::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Ordered subscription list with at-most-once delivery per transition
#[derive(Default)]
pub struct ObserverRegistry {
    observers: Mutex<Vec<(u64, StateObserver)>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; it will be invoked on every subsequent
    /// transition in subscription order
    pub fn subscribe(&self, observer: StateObserver) -> ObserverId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.observers.lock().push((id, observer));
        ObserverId(id)
    }

    /// Remove an observer; returns `false` if it was already gone
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id.0);
        observers.len() != before
    }

    /// Deliver one notification to every current subscriber
    ///
    /// The list is snapshotted first and the lock released before any
    /// callback runs, so re-entrant subscribe/unsubscribe cannot deadlock or
    /// see a partially delivered transition.
    pub fn notify(&self, state: Option<&AuthorizationState>) {
        let snapshot: Vec<StateObserver> =
            self.observers.lock().iter().map(|(_, observer)| Arc::clone(observer)).collect();

        for observer in snapshot {
            observer(state);
        }
    }

    /// Number of registered observers
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    /// Whether no observers are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.lock().is_empty()
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry").field("observers", &self.len()).finish()
    }
}
