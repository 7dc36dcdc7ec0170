//! Publish/subscribe primitive shared by the store, the overlay gate, the
//! pollers and the reward phase controller.
//!
//! Listeners are invoked synchronously, in subscription order, outside of any
//! lock. A panicking listener is logged and skipped; the remaining listeners
//! still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

/// Boxed listener callback.
pub type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct ListenerTable<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

/// Ordered set of listeners for events of type `T`.
pub struct ListenerSet<T> {
    label: &'static str,
    table: Arc<Mutex<ListenerTable<T>>>,
}

impl<T: 'static> ListenerSet<T> {
    /// Create an empty set. `label` names the owner in panic logs.
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            table: Arc::new(Mutex::new(ListenerTable {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    /// Register a listener. Keep the returned handle to unsubscribe later.
    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut table = lock(&self.table);
            let id = table.next_id;
            table.next_id += 1;
            table.entries.push((id, Arc::new(listener)));
            id
        };

        let weak: Weak<Mutex<ListenerTable<T>>> = Arc::downgrade(&self.table);
        Subscription {
            remove: Some(Box::new(move || {
                if let Some(table) = weak.upgrade() {
                    lock(&table).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    /// Deliver `event` to every listener registered at call time.
    pub fn emit(&self, event: &T) {
        let listeners: Vec<Listener<T>> = lock(&self.table)
            .entries
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::warn!(owner = self.label, "listener panicked; continuing with the rest");
            }
        }
    }

    /// Drop every listener.
    pub fn clear(&self) {
        lock(&self.table).entries.clear();
    }

    pub fn len(&self) -> usize {
        lock(&self.table).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle returned by `subscribe`. Dropping it keeps the listener registered.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Remove the listener. Safe to call after the owner is gone.
    pub fn unsubscribe(mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

/// Run `f`, logging and swallowing a panic. Returns `None` when it panicked.
pub(crate) fn isolate<R>(owner: &'static str, hook: &'static str, f: impl FnOnce() -> R) -> Option<R> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(owner, hook, "callback panicked");
            None
        }
    }
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
