//! Change notification hub.
//!
//! Every committed transaction on the shared document is fanned out to the
//! registered observers, synchronously, in registration order. Dispatch
//! happens once the transaction has been released, so an observer sees the
//! committed state and may read or edit the document.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// Where a committed change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// Made through this client's accessor methods
    Local,
    /// Received from a peer through the sync transport
    Remote,
}

/// A committed change to the shared document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
    pub origin: ChangeOrigin,
    /// The change as a v1-encoded Yjs update
    pub update: Vec<u8>,
}

/// Handle returned by [`ObserverHub::add`], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub type ObserverFn = dyn Fn(&DocumentChange) + Send + Sync + 'static;

/// Per-client set of change observers. Cloning shares the same set.
#[derive(Clone, Default)]
pub struct ObserverHub {
    observers: Arc<RwLock<Vec<(ObserverId, Arc<ObserverFn>)>>>,
    next_id: Arc<AtomicU64>,
}

impl ObserverHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&DocumentChange) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, Arc::new(callback)));
        id
    }

    /// Returns whether the observer was registered.
    pub fn remove(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    /// Invoke every observer once with `change`.
    ///
    /// The list is copied before dispatch so observers may add or remove
    /// observers. A panicking observer is logged and skipped.
    pub fn dispatch(&self, change: &DocumentChange) {
        let observers: Vec<(ObserverId, Arc<ObserverFn>)> = self.observers.read().clone();
        for (id, observer) in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(change))).is_err() {
                log::warn!("Change observer {id:?} panicked; continuing with the rest");
            }
        }
    }
}

impl std::fmt::Debug for ObserverHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHub")
            .field("observers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn change() -> DocumentChange {
        DocumentChange {
            origin: ChangeOrigin::Local,
            update: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_dispatch_reaches_every_observer_once() {
        let hub = ObserverHub::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let calls = calls.clone();
            hub.add(move |c| {
                assert_eq!(c.update, vec![1, 2, 3]);
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        hub.dispatch(&change());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_remove_observer() {
        let hub = ObserverHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let id = hub.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(hub.remove(id));
        assert!(!hub.remove(id));
        assert!(hub.is_empty());

        hub.dispatch(&change());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_panicking_observer_is_isolated() {
        let hub = ObserverHub::new();
        let calls = Arc::new(AtomicUsize::new(0));

        hub.add(|_| panic!("observer failure"));
        let counter = calls.clone();
        hub.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        hub.dispatch(&change());
        hub.dispatch(&change());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(hub.len(), 2);
    }

    #[test]
    fn test_observer_can_unregister_itself() {
        let hub = ObserverHub::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let slot: Arc<RwLock<Option<ObserverId>>> = Arc::new(RwLock::new(None));
        let (inner_hub, inner_slot, counter) = (hub.clone(), slot.clone(), calls.clone());
        let id = hub.add(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *inner_slot.read() {
                inner_hub.remove(id);
            }
        });
        *slot.write() = Some(id);

        hub.dispatch(&change());
        hub.dispatch(&change());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clones_share_observers() {
        let hub = ObserverHub::new();
        let other = hub.clone();
        other.add(|_| {});
        assert_eq!(hub.len(), 1);
    }
}
