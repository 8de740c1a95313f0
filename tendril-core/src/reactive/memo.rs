//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when one of its
//! dependencies has actually changed.
//!
//! # How Memos Work
//!
//! 1. On first access, the memo runs its computation and caches the result.
//!
//! 2. When a dependency is written, the memo is marked "maybe dirty" right
//!    away and remembers which dependency was written. This mark propagates
//!    to memos that read this one, but only when this memo was clean.
//!
//! 3. On next access, the memo asks each remembered dependency whether its
//!    value differs from the one observed during the last computation.
//!
//! 4. If one does, recompute. Otherwise, mark clean and return the cache.
//!
//! # Why This Matters
//!
//! - A signal changes
//! - 10 memos depend on it
//! - Only the memos actually read will recompute
//! - An effect reading a memo whose recomputed value is unchanged does not
//!   re-run
//!
//! # Purity
//!
//! A memo body may only read. Registering a cleanup, creating an effect or
//! writing a signal inside it is reported as
//! [`ReactiveError::MemoSideEffect`](crate::ReactiveError::MemoSideEffect).

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{trace, warn};

use super::context::{Recording, RecordingId, Scope};
use super::dependency::Dependency;
use super::readable::Readable;
use super::runtime::{ContextInner, RuntimeRef};
use super::signal::{next_cell_id, CellId};
use super::subscriber::{Notify, Subscribers, Subscription};
use crate::error::{ReactiveError, Result};

/// Dirty state for a memo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoState {
    /// The cached value is up-to-date.
    Clean,

    /// A dependency was written. Need to check whether its value changed.
    MaybeDirty,

    /// The memo definitely needs to recompute.
    Dirty,
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Created through [`Context::create_memo`](crate::Context::create_memo).
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
///
/// let cx = Context::new();
/// let count = cx.create_signal(2);
/// let count_clone = count.clone();
/// let squared = cx.create_memo(move || count_clone.get() * count_clone.get());
///
/// assert_eq!(squared.get(), 4);
/// count.set(3);
/// assert_eq!(squared.get(), 9);
/// ```
pub struct Memo<T> {
    inner: Arc<MemoInner<T>>,
}

struct MemoInner<T> {
    id: CellId,
    runtime: RuntimeRef,
    created_in: Option<RecordingId>,
    compute: Box<dyn Fn() -> T + Send + Sync>,
    slot: Mutex<MemoSlot<T>>,
    name: RwLock<Option<Arc<str>>>,
    propagators: Subscribers,
    observers: Subscribers,
}

struct MemoSlot<T> {
    cache: Option<T>,
    /// Set by `mark_dirty` and by failed computations.
    forced: bool,
    /// Dependencies written since the last computation.
    dirty: IndexMap<CellId, Dependency>,
    subscriptions: SmallVec<[Subscription; 4]>,
}

/// What a read has to do.
enum Pull<T> {
    Cached(T),
    Confirm(Vec<Dependency>),
    Compute,
}

impl<T: Clone> MemoSlot<T> {
    fn state(&self) -> MemoState {
        if self.cache.is_none() || self.forced {
            MemoState::Dirty
        } else if !self.dirty.is_empty() {
            MemoState::MaybeDirty
        } else {
            MemoState::Clean
        }
    }

    fn pull(&self) -> Pull<T> {
        match (&self.cache, self.state()) {
            (Some(value), MemoState::Clean) => Pull::Cached(value.clone()),
            (Some(_), MemoState::MaybeDirty) => Pull::Confirm(self.dirty.values().cloned().collect()),
            _ => Pull::Compute,
        }
    }
}

impl<T> MemoInner<T> {
    fn mark_dependency_dirty(&self, dependency: Dependency) {
        let was_clean = {
            let mut slot = self.slot.lock();
            let was_clean = slot.cache.is_some() && !slot.forced && slot.dirty.is_empty();
            slot.dirty.insert(dependency.cell(), dependency);
            was_clean
        };
        if was_clean {
            self.propagators.notify_all();
        }
    }

    /// Forward a dependency's write notification to this memo's observers.
    fn queue_observers(&self) {
        self.runtime.publish(&self.observers);
    }
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        for subscription in self.slot.get_mut().subscriptions.drain(..) {
            subscription.unsubscribe();
        }
    }
}

impl<T> Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new_in<F>(runtime: RuntimeRef, created_in: Option<RecordingId>, compute: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(MemoInner {
                id: next_cell_id(),
                runtime,
                created_in,
                compute: Box::new(compute),
                slot: Mutex::new(MemoSlot {
                    cache: None,
                    forced: false,
                    dirty: IndexMap::new(),
                    subscriptions: SmallVec::new(),
                }),
                name: RwLock::new(None),
                propagators: Subscribers::new(),
                observers: Subscribers::new(),
            }),
        }
    }

    /// Get the memo's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get the value, computing it if needed, and register a dependency on
    /// the recording body.
    ///
    /// # Panics
    ///
    /// Panics on a self-dependency or when the body performs a side effect.
    /// Use [`try_get`](Memo::try_get) to handle those cases.
    pub fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`get`](Memo::get).
    pub fn try_get(&self) -> Result<T> {
        let value = self.try_get_untracked()?;
        self.inner.runtime.track(self.inner.id, self.inner.created_in, || {
            Dependency::new(self.inner.id, self.label(), self.clone(), value.clone())
        })?;
        Ok(value)
    }

    /// Get the value without registering a dependency.
    ///
    /// # Panics
    ///
    /// Panics when the body performs a side effect.
    pub fn get_untracked(&self) -> T {
        match self.try_get_untracked() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// Fallible form of [`get_untracked`](Memo::get_untracked).
    pub fn try_get_untracked(&self) -> Result<T> {
        if let Pull::Cached(value) = self.inner.slot.lock().pull() {
            return Ok(value);
        }

        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let pull = self.inner.slot.lock().pull();
        match pull {
            Pull::Cached(value) => Ok(value),
            Pull::Compute => self.recompute(runtime.as_ref()),
            Pull::Confirm(dependencies) => {
                if dependencies.iter().any(Dependency::is_changed) {
                    return self.recompute(runtime.as_ref());
                }
                let cached = {
                    let mut slot = self.inner.slot.lock();
                    slot.dirty.clear();
                    slot.cache.clone()
                };
                match cached {
                    Some(value) => Ok(value),
                    None => self.recompute(runtime.as_ref()),
                }
            }
        }
    }

    fn recompute(&self, runtime: Option<&Arc<ContextInner>>) -> Result<T> {
        let stale = {
            let mut slot = self.inner.slot.lock();
            slot.dirty.clear();
            slot.forced = false;
            std::mem::take(&mut slot.subscriptions)
        };
        for subscription in &stale {
            subscription.unsubscribe();
        }

        let frame = Recording::enter(self.inner.runtime.id(), Scope::memo(self.inner.id));
        let value = (self.inner.compute)();
        let capture = frame.finish();

        if let Some(kind) = capture.side_effect() {
            if let Some(runtime) = runtime {
                for effect in &capture.nested {
                    runtime.cancel(*effect);
                }
            }
            self.inner.slot.lock().forced = true;
            warn!(memo = %self.inner.id, %kind, "memo body performed a side effect");
            return Err(ReactiveError::MemoSideEffect {
                memo: self.inner.id,
                kind,
            });
        }

        let subscriptions: SmallVec<[Subscription; 4]> = capture
            .dependencies
            .into_values()
            .flat_map(|dependency| self.watch(dependency))
            .collect();
        trace!(memo = %self.inner.id, dependencies = subscriptions.len() / 2, "memo recomputed");

        let mut slot = self.inner.slot.lock();
        slot.cache = Some(value.clone());
        slot.subscriptions = subscriptions;
        Ok(value)
    }

    /// Subscribe to both lists of `dependency`.
    fn watch(&self, dependency: Dependency) -> [Subscription; 2] {
        let memo: Weak<MemoInner<T>> = Arc::downgrade(&self.inner);
        let marker = dependency.clone();
        let dirty = dependency.propagate_dirty(Arc::new(move || {
            if let Some(memo) = memo.upgrade() {
                memo.mark_dependency_dirty(marker.clone());
            }
        }));

        let memo = Arc::downgrade(&self.inner);
        let queue = dependency.on_dirty_effect(Arc::new(move || {
            if let Some(memo) = memo.upgrade() {
                memo.queue_observers();
            }
        }));
        [dirty, queue]
    }

    /// Force the next read to recompute and notify dependents.
    pub fn mark_dirty(&self) {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        self.inner.slot.lock().forced = true;
        self.inner.propagators.notify_all();
        self.inner.runtime.publish(&self.inner.observers);
    }

    /// Get the current dirty state.
    pub fn state(&self) -> MemoState {
        self.inner.slot.lock().state()
    }

    /// Check if the memo has a cached value.
    pub fn has_value(&self) -> bool {
        self.inner.slot.lock().cache.is_some()
    }

    /// Set a debug name, shown in effect trees.
    pub fn name(self, name: impl Into<Arc<str>>) -> Self {
        *self.inner.name.write() = Some(name.into());
        self
    }

    /// Get the number of registered subscribers, effects and memos alike.
    pub fn subscriber_count(&self) -> usize {
        self.inner.propagators.len() + self.inner.observers.len()
    }

    fn label(&self) -> Option<Arc<str>> {
        self.inner.name.read().clone()
    }
}

impl<T> Readable<T> for Memo<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn try_get(&self) -> Result<T> {
        Memo::try_get(self)
    }

    fn get_untracked(&self) -> T {
        Memo::get_untracked(self)
    }

    fn on_dirty_effect(&self, notify: Notify) -> Subscription {
        self.inner.observers.subscribe(notify)
    }

    fn propagate_dirty(&self, notify: Notify) -> Subscription {
        self.inner.propagators.subscribe(notify)
    }
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Memo<T>
where
    T: Clone + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = self.inner.slot.lock();
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("state", &slot.state())
            .field("cached", &slot.cache)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
