//! Subscriber lists for reactive cells.
//!
//! Every cell owns two lists: one notified synchronously on every change
//! (dirty propagation into memos) and one scheduled as a deferred write
//! notification (effects and memo forwarding). Both lists share the types in
//! this module.
//!
//! # Cancellation
//!
//! A notification pass works on a snapshot of the list. Removing a subscriber
//! clears its `active` flag before it is taken out of the table, so a
//! subscriber that was cancelled after the snapshot was taken is skipped.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

/// Callback invoked when a subscribed cell changes.
pub type Notify = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// A single entry in a subscriber list.
pub struct Subscriber {
    id: SubscriberId,
    active: AtomicBool,
    notify: Notify,
}

impl Subscriber {
    fn new(notify: Notify) -> Self {
        Self {
            id: SubscriberId::new(),
            active: AtomicBool::new(true),
            notify,
        }
    }

    /// Get the subscriber's unique ID.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Whether the subscriber is still registered.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Invoke the callback unless the subscriber was removed.
    pub fn notify(&self) {
        if self.is_active() {
            (self.notify)();
        }
    }
}

type Table = Mutex<IndexMap<SubscriberId, Arc<Subscriber>>>;

/// An ordered, thread-safe list of subscribers.
///
/// Cloning yields another handle to the same list.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    table: Arc<Table>,
}

impl Subscribers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays registered until the returned
    /// [`Subscription`] is cancelled.
    pub(crate) fn subscribe(&self, notify: Notify) -> Subscription {
        let subscriber = Arc::new(Subscriber::new(notify));
        self.table
            .lock()
            .insert(subscriber.id(), Arc::clone(&subscriber));
        Subscription {
            table: Arc::downgrade(&self.table),
            subscriber,
        }
    }

    /// The current subscribers in registration order.
    pub(crate) fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.table.lock().values().cloned().collect()
    }

    /// Notify every current subscriber, in registration order.
    pub(crate) fn notify_all(&self) {
        for subscriber in self.snapshot() {
            subscriber.notify();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.table.lock().len()
    }
}

/// Handle to a registered subscriber.
///
/// Dropping the handle leaves the subscriber registered; call
/// [`unsubscribe`](Subscription::unsubscribe) to remove it.
pub struct Subscription {
    table: Weak<Table>,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    /// Remove the subscriber. Idempotent.
    pub fn unsubscribe(&self) {
        self.subscriber.active.store(false, Ordering::Release);
        if let Some(table) = self.table.upgrade() {
            table.lock().shift_remove(&self.subscriber.id());
        }
    }

    /// Whether the subscriber is still registered.
    pub fn is_active(&self) -> bool {
        self.subscriber.is_active()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.subscriber.id())
            .field("active", &self.is_active())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    fn counter(count: &Arc<AtomicI32>) -> Notify {
        let count_clone = count.clone();
        Arc::new(move || {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn notify_all_reaches_every_subscriber() {
        let count = Arc::new(AtomicI32::new(0));
        let list = Subscribers::new();
        let _a = list.subscribe(counter(&count));
        let _b = list.subscribe(counter(&count));

        list.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn unsubscribe_removes_and_deactivates() {
        let count = Arc::new(AtomicI32::new(0));
        let list = Subscribers::new();
        let subscription = list.subscribe(counter(&count));

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert!(!subscription.is_active());
        assert_eq!(list.len(), 0);

        list.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_snapshot_skips_removed_subscribers() {
        let count = Arc::new(AtomicI32::new(0));
        let list = Subscribers::new();
        let subscription = list.subscribe(counter(&count));

        let snapshot = list.snapshot();
        subscription.unsubscribe();
        for subscriber in snapshot {
            subscriber.notify();
        }
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn dropping_a_subscription_keeps_it_registered() {
        let count = Arc::new(AtomicI32::new(0));
        let list = Subscribers::new();
        drop(list.subscribe(counter(&count)));

        list.notify_all();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
