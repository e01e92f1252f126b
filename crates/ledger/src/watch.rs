//! Snapshot subscriptions: an explicit observer registry.
//!
//! Observers register a callback and get back a [`Subscription`] acting as
//! the disposer; dropping or cancelling it unregisters the callback. There is
//! no ambient global state: each ledger/catalog instance owns its registries.
//!
//! Delivery model: observers receive a **full current snapshot** after every
//! successful mutation (and once on registration). Cancellation stops
//! delivery; it has no effect on in-flight writes or deliveries.
//!
//! Callbacks run outside the registry lock, so a callback may re-enter the
//! registry (register, cancel, or trigger a further notification) without
//! deadlocking.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&[T]) + Send + Sync>;

struct Slot<K, T> {
    key: K,
    callback: Callback<T>,
}

struct Slots<K, T> {
    next_id: u64,
    entries: HashMap<u64, Slot<K, T>>,
}

/// Registry of snapshot observers, keyed by a filter value.
///
/// The key selects which snapshot an observer receives (e.g. "logs for item
/// X" vs "all logs"); registries with a single snapshot use `()`.
pub struct WatcherRegistry<K, T> {
    slots: Arc<Mutex<Slots<K, T>>>,
}

impl<K, T> Default for WatcherRegistry<K, T> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Slots {
                next_id: 0,
                entries: HashMap::new(),
            })),
        }
    }
}

impl<K, T> WatcherRegistry<K, T>
where
    K: Clone + PartialEq + Send + 'static,
    T: 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer; the returned [`Subscription`] unregisters it.
    pub fn register(&self, key: K, callback: impl Fn(&[T]) + Send + Sync + 'static) -> Subscription {
        let id = {
            let mut slots = match self.slots.lock() {
                Ok(slots) => slots,
                // A poisoned registry cannot deliver anyway; hand back an
                // inert subscription rather than panicking the caller.
                Err(_) => return Subscription { canceller: None },
            };
            let id = slots.next_id;
            slots.next_id += 1;
            slots.entries.insert(
                id,
                Slot {
                    key,
                    callback: Arc::new(callback),
                },
            );
            id
        };

        let weak: Weak<Mutex<Slots<K, T>>> = Arc::downgrade(&self.slots);
        Subscription {
            canceller: Some(Box::new(move || {
                if let Some(slots) = weak.upgrade() {
                    if let Ok(mut slots) = slots.lock() {
                        slots.entries.remove(&id);
                    }
                }
            })),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().map(|s| s.entries.is_empty()).unwrap_or(true)
    }

    /// The distinct keys currently observed (each needs one snapshot).
    pub fn distinct_keys(&self) -> Vec<K> {
        let slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(_) => return Vec::new(),
        };
        let mut keys: Vec<K> = Vec::new();
        for slot in slots.entries.values() {
            if !keys.contains(&slot.key) {
                keys.push(slot.key.clone());
            }
        }
        keys
    }

    /// Deliver a snapshot to every observer registered under `key`.
    ///
    /// The matching callbacks are collected under the lock and invoked after
    /// it is released: a callback that re-enters the registry must not
    /// deadlock. An observer cancelled by another callback of the same
    /// delivery may still receive this in-flight snapshot.
    pub fn notify(&self, key: &K, snapshot: &[T]) {
        let callbacks: Vec<Callback<T>> = {
            let slots = match self.slots.lock() {
                Ok(slots) => slots,
                Err(_) => return,
            };
            slots
                .entries
                .values()
                .filter(|slot| &slot.key == key)
                .map(|slot| slot.callback.clone())
                .collect()
        };
        for callback in callbacks {
            callback(snapshot);
        }
    }
}

/// Disposer for a registered observer.
///
/// Cancelling (or dropping) stops delivery. In-flight writes are unaffected.
pub struct Subscription {
    canceller: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn cancel(mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.canceller.take() {
            cancel();
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.canceller.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn notify_reaches_matching_observers_only() {
        let registry: WatcherRegistry<u8, i64> = WatcherRegistry::new();
        let hits_a = Arc::new(AtomicUsize::new(0));
        let hits_b = Arc::new(AtomicUsize::new(0));

        let a = hits_a.clone();
        let _sub_a = registry.register(1, move |_| {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = hits_b.clone();
        let _sub_b = registry.register(2, move |_| {
            b.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&1, &[42]);
        assert_eq!(hits_a.load(Ordering::SeqCst), 1);
        assert_eq!(hits_b.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancel_stops_delivery() {
        let registry: WatcherRegistry<(), i64> = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = hits.clone();
        let sub = registry.register((), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        registry.notify(&(), &[1]);
        sub.cancel();
        registry.notify(&(), &[2]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_unregisters_too() {
        let registry: WatcherRegistry<(), i64> = WatcherRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        {
            let h = hits.clone();
            let _sub = registry.register((), move |_| {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        registry.notify(&(), &[1]);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn callbacks_may_reenter_the_registry() {
        let registry: Arc<WatcherRegistry<(), i64>> = Arc::new(WatcherRegistry::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = registry.clone();
        let h = hits.clone();
        let _sub = registry.register((), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            // Registering (and dropping, which cancels) from inside a
            // delivery must not deadlock.
            let fresh = inner.register((), |_| {});
            fresh.cancel();
        });

        registry.notify(&(), &[1]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn distinct_keys_deduplicates() {
        let registry: WatcherRegistry<u8, i64> = WatcherRegistry::new();
        let _a = registry.register(1, |_| {});
        let _b = registry.register(1, |_| {});
        let _c = registry.register(7, |_| {});

        let mut keys = registry.distinct_keys();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 7]);
    }
}
