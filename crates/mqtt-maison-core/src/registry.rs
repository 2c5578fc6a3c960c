//! Multi-listener event fan-out.
//!
//! An [`EventRegistry`] stores callbacks keyed by a strictly increasing id and
//! invokes all of them on [`EventRegistry::fire`]. Listener slots live in an
//! ordered map, so fan-out order is registration order and ids are never
//! reused within a registry.
//!
//! The listener map sits behind a mutex that is never held while a callback
//! runs. Callbacks may therefore register, unregister, or fire on the same
//! registry without deadlocking, and the registry can be shared across
//! threads.

use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Identifier of a registered listener, unique within its registry.
pub type ListenerId = u64;

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Slots<T> {
    listeners: BTreeMap<ListenerId, Callback<T>>,
    next_id: ListenerId,
}

impl<T> Slots<T> {
    fn mint_id(&mut self) -> ListenerId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Generic one-to-many event dispatcher.
///
/// Cloning produces another handle to the same set of listeners.
pub struct EventRegistry<T> {
    slots: Arc<Mutex<Slots<T>>>,
}

impl<T> Clone for EventRegistry<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}

impl<T> Default for EventRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for EventRegistry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = lock(&self.slots);
        f.debug_struct("EventRegistry")
            .field("listeners", &slots.listeners.len())
            .field("next_id", &slots.next_id)
            .finish()
    }
}

impl<T> EventRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                listeners: BTreeMap::new(),
                next_id: 0,
            })),
        }
    }

    /// Register a callback.
    ///
    /// Returns the handle that removes exactly this callback again.
    pub fn register<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&T) + Send + Sync + 'static,
        T: 'static,
    {
        let mut slots = lock(&self.slots);
        let id = slots.mint_id();
        slots.listeners.insert(id, Arc::new(callback));

        let slots: Weak<Mutex<Slots<T>>> = Arc::downgrade(&self.slots);
        ListenerHandle {
            id,
            remove: Arc::new(move |id| {
                if let Some(slots) = slots.upgrade() {
                    lock(&slots).listeners.remove(&id);
                }
            }),
        }
    }

    /// Invoke every listener registered at the moment this call starts.
    ///
    /// Listeners added or removed by a callback during the fan-out take
    /// effect on the next call. A panicking listener is logged and does not
    /// prevent the remaining listeners from running.
    pub fn fire(&self, event: &T) -> FireSummary {
        let snapshot: Vec<(ListenerId, Callback<T>)> = lock(&self.slots)
            .listeners
            .iter()
            .map(|(id, callback)| (*id, Arc::clone(callback)))
            .collect();

        let mut summary = FireSummary::default();
        for (id, callback) in snapshot {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            match outcome {
                Ok(()) => summary.delivered += 1,
                Err(cause) => {
                    tracing::error!(
                        listener_id = id,
                        cause = panic_message(cause.as_ref()),
                        "Event listener panicked"
                    );
                    summary.failed.push(id);
                }
            }
        }
        summary
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.slots).listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every listener.
    pub fn clear(&self) {
        let removed = std::mem::take(&mut lock(&self.slots).listeners);
        drop(removed);
    }

    /// Whether both values are handles to the same listener set.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slots, &other.slots)
    }
}

/// Outcome of a single [`EventRegistry::fire`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FireSummary {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Ids of listeners that panicked
    pub failed: Vec<ListenerId>,
}

/// Capability that removes one registered listener.
///
/// Unregistering is idempotent, and a handle outliving its registry is
/// harmless.
#[derive(Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    remove: Arc<dyn Fn(ListenerId) + Send + Sync>,
}

impl ListenerHandle {
    /// Id of the listener this handle controls.
    #[must_use]
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the listener from its registry.
    pub fn unregister(&self) {
        (self.remove)(self.id);
    }

    /// Run `after` following every removal through this handle.
    ///
    /// `after` is called on each `unregister`, so it must tolerate repeats.
    #[must_use]
    pub fn and_then<F>(self, after: F) -> Self
    where
        F: Fn(ListenerId) + Send + Sync + 'static,
    {
        let remove = self.remove;
        Self {
            id: self.id,
            remove: Arc::new(move |id| {
                remove(id);
                after(id);
            }),
        }
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

fn lock<T>(slots: &Mutex<Slots<T>>) -> MutexGuard<'_, Slots<T>> {
    // Callbacks never run under the lock, so a poisoned map is still consistent.
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(cause: &(dyn std::any::Any + Send)) -> &str {
    cause
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
