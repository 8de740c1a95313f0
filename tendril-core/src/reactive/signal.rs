//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tells its readers when that value changes.
//!
//! # How Signals Work
//!
//! 1. When a signal is read while a body is recording, the read and the
//!    observed value are captured as a dependency of that body.
//!
//! 2. When a signal is written with a value equal to the current one,
//!    nothing happens.
//!
//! 3. Otherwise the value is stored, dependent memos are marked dirty right
//!    away and a write notification is scheduled for dependent effects.
//!
//! # Thread Safety
//!
//! The value sits behind a `parking_lot::RwLock`. Writes additionally take
//! the owning context's serialization lock, so the compare-and-store and the
//! propagation it triggers are atomic with respect to other writers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::context::RecordingId;
use super::dependency::Dependency;
use super::readable::Readable;
use super::runtime::RuntimeRef;
use super::subscriber::{Notify, Subscribers, Subscription};
use crate::error::Result;

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique cell ID.
pub(crate) fn next_cell_id() -> CellId {
    CellId(CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Identity of a reactive cell (signal or memo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for CellId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// A reactive signal holding a value of type T.
///
/// Created through [`Context::create_signal`](crate::Context::create_signal).
/// Clones share the same cell.
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
///
/// let cx = Context::new();
/// let count = cx.create_signal(0);
///
/// count.set(5);
/// count.update(|v| v + 1);
/// assert_eq!(count.get(), 6);
/// ```
pub struct Signal<T> {
    inner: Arc<SignalInner<T>>,
}

struct SignalInner<T> {
    id: CellId,
    runtime: RuntimeRef,
    /// The recording this signal was created in.
    created_in: Option<RecordingId>,
    value: RwLock<T>,
    name: RwLock<Option<Arc<str>>>,
    /// Notified on every change, before `set` returns.
    propagators: Subscribers,
    /// Notified through a write notification.
    observers: Subscribers,
}

impl<T> Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new_in(runtime: RuntimeRef, created_in: Option<RecordingId>, value: T) -> Self {
        Self {
            inner: Arc::new(SignalInner {
                id: next_cell_id(),
                runtime,
                created_in,
                value: RwLock::new(value),
                name: RwLock::new(None),
                propagators: Subscribers::new(),
                observers: Subscribers::new(),
            }),
        }
    }

    /// Get the signal's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get the current value, registering a dependency on the recording body.
    ///
    /// # Panics
    ///
    /// Panics when read inside the recording that created the signal. Use
    /// [`try_get`](Signal::try_get) to handle that case.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`get`](Signal::get).
    pub fn try_get(&self) -> Result<T> {
        let value = self.get_untracked();
        self.inner.runtime.track(self.inner.id, self.inner.created_in, || {
            Dependency::new(self.inner.id, self.label(), self.clone(), value.clone())
        })?;
        Ok(value)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    /// Borrow the current value without cloning or tracking it.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.value.read())
    }

    /// Set a new value and notify dependents.
    ///
    /// A value equal to the current one is ignored.
    pub fn set(&self, value: T) {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        {
            let mut current = self.inner.value.write();
            if *current == value {
                return;
            }
            *current = value;
        }
        trace!(cell = %self.inner.id, "signal written");

        self.inner.propagators.notify_all();
        self.inner.runtime.publish(&self.inner.observers);
    }

    /// Update the value using a function of the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let new_value = self.with_untracked(f);
        self.set(new_value);
    }

    /// Mutate a copy of the value in place, then store it.
    pub fn set_with<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let mut next = self.get_untracked();
        f(&mut next);
        self.set(next);
    }

    /// Set a debug name, shown in effect trees.
    pub fn name(self, name: impl Into<Arc<str>>) -> Self {
        self.set_name(name);
        self
    }

    pub fn set_name(&self, name: impl Into<Arc<str>>) {
        *self.inner.name.write() = Some(name.into());
    }

    /// A read-only handle to this signal.
    pub fn read_only(&self) -> super::ReadSignal<T> {
        super::ReadSignal::new(self.clone())
    }

    /// Get the number of registered subscribers, effects and memos alike.
    pub fn subscriber_count(&self) -> usize {
        self.inner.propagators.len() + self.inner.observers.len()
    }

    fn label(&self) -> Option<Arc<str>> {
        self.inner.name.read().clone()
    }
}

impl<T> Readable<T> for Signal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn try_get(&self) -> Result<T> {
        Signal::try_get(self)
    }

    fn get_untracked(&self) -> T {
        Signal::get_untracked(self)
    }

    fn on_dirty_effect(&self, notify: Notify) -> Subscription {
        self.inner.observers.subscribe(notify)
    }

    fn propagate_dirty(&self, notify: Notify) -> Subscription {
        self.inner.propagators.subscribe(notify)
    }
}

impl<T> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Signal<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.inner.id)
            .field("name", &*self.inner.name.read())
            .field("value", &*self.inner.value.read())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ReactiveError;
    use crate::Context;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn signal_get_and_set() {
        let cx = Context::new();
        let signal = cx.create_signal(0);
        assert_eq!(signal.get(), 0);

        signal.set(42);
        assert_eq!(signal.get(), 42);
    }

    #[test]
    fn signal_update() {
        let cx = Context::new();
        let signal = cx.create_signal(10);
        signal.update(|v| v + 5);
        assert_eq!(signal.get(), 15);

        signal.set_with(|v| *v *= 2);
        assert_eq!(signal.get(), 30);
    }

    #[test]
    fn signal_notifies_subscribers() {
        let cx = Context::new();
        let signal = cx.create_signal(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let _subscription = signal.on_dirty_effect(Arc::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        signal.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        signal.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        signal.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn signal_unsubscribe() {
        let cx = Context::new();
        let signal = cx.create_signal(0);
        let call_count = Arc::new(AtomicI32::new(0));
        let call_count_clone = call_count.clone();

        let subscription = signal.propagate_dirty(Arc::new(move || {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        signal.set(1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        signal.set(2);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert_eq!(signal.subscriber_count(), 0);
    }

    #[test]
    fn signal_clone_shares_state() {
        let cx = Context::new();
        let signal1 = cx.create_signal(0);
        let signal2 = signal1.clone();

        signal1.set(42);
        assert_eq!(signal2.get(), 42);

        signal2.set(100);
        assert_eq!(signal1.get(), 100);
    }

    #[test]
    fn signal_ids_are_unique() {
        let cx = Context::new();
        let s1 = cx.create_signal(0);
        let s2 = cx.create_signal(0);
        let s3 = cx.create_signal(0);

        assert_ne!(s1.id(), s2.id());
        assert_ne!(s2.id(), s3.id());
        assert_ne!(s1.id(), s3.id());
    }

    #[test]
    fn reading_inside_the_creating_effect_fails() {
        let cx = Context::new();
        let outcome = Arc::new(parking_lot::Mutex::new(None));

        let outcome_clone = outcome.clone();
        let cx_clone = cx.clone();
        cx.create_effect(move || {
            let local = cx_clone.create_signal(1);
            local.set(5);
            *outcome_clone.lock() = Some(local.try_get());
        });

        match outcome.lock().take() {
            Some(Err(ReactiveError::SelfDependency { .. })) => {}
            other => panic!("expected a self-dependency error, got {other:?}"),
        };
    }

    #[test]
    fn signal_outlives_its_context() {
        let signal = Context::new().create_signal(1);
        signal.set(2);
        assert_eq!(signal.get(), 2);
    }
}
