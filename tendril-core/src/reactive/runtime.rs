//! Reactive Runtime
//!
//! The [`Context`] is the central coordinator that connects signals, memos
//! and effects. It owns the effect arena, the serialization lock and the
//! post-effect hook, and it decides when a write is delivered.
//!
//! # How It Works
//!
//! 1. When a cell is read while a body is recording, the read is captured in
//!    the body's frame together with the observed value.
//!
//! 2. When the body returns, the runtime subscribes the effect to every
//!    captured cell.
//!
//! 3. When a cell is written, the runtime:
//!    a. Marks dependent memos dirty, synchronously
//!    b. Queues a write notification on the active recording, if any
//!    c. Otherwise delivers the notification before `set` returns
//!    d. Memos stay lazy: they recompute on the next read
//!
//! # Thread Safety
//!
//! Recording frames are thread-local. Everything that mutates the reactive
//! graph (writes, effect runs, memo recomputation and cancellation) takes the
//! context's reentrant serialization lock, so at most one thread propagates
//! through a context at a time and a thread may re-enter its own propagation.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard, RwLock};
use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::{self as recording, Capture, Cleanup, Producer, Recording, RecordingId, Scope};
use super::dependency::Dependency;
use super::effect::EffectHandle;
use super::memo::Memo;
use super::signal::{CellId, Signal};
use super::subscriber::Subscribers;
use crate::collections::{ListSignal, MapSignal, SetSignal};
use crate::config::ContextOptions;
use crate::error::Result;
use crate::graph::{DeferredQueue, DependencyFilter, EffectId, EffectNode};

/// Unique identifier for a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(u64);

impl ContextId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked after every completed effect run.
pub type PostEffectHook = Arc<dyn Fn(&EffectHandle) + Send + Sync>;

pub(crate) struct ContextInner {
    pub(crate) id: ContextId,
    pub(crate) options: ContextOptions,
    serial: ReentrantMutex<()>,
    pub(crate) effects: Mutex<SlotMap<EffectId, EffectNode>>,
    pub(crate) hook: RwLock<Option<PostEffectHook>>,
}

impl ContextInner {
    /// Enter the context's serialized section.
    pub(crate) fn serialize(&self) -> ReentrantMutexGuard<'_, ()> {
        self.serial.lock()
    }

    pub(crate) fn downgrade(self: &Arc<Self>) -> RuntimeRef {
        RuntimeRef {
            id: self.id,
            inner: Arc::downgrade(self),
        }
    }

    /// Create an effect. It runs now unless a recording adopts it.
    pub(crate) fn create_effect(self: &Arc<Self>, body: crate::graph::Body) -> EffectId {
        let id = self.effects.lock().insert(EffectNode::effect(body));
        trace!(context = %self.options.label, effect = ?id, "effect created");
        if !recording::adopt(self.id, id) {
            self.run_effect(id);
        }
        id
    }

    /// Run `block` as a root recording and process what it captured.
    ///
    /// Nested effects run first, then deferred writes are drained.
    pub(crate) fn run_root(self: &Arc<Self>, block: impl FnOnce()) -> EffectId {
        let _serial = self.serialize();
        let frame = Recording::enter(self.id, Scope::root());
        block();
        let Capture {
            nested,
            deferred,
            cleanups,
            ..
        } = frame.finish();

        let root = {
            let mut effects = self.effects.lock();
            let mut node = EffectNode::root();
            node.cleanups = cleanups;
            let root = effects.insert(node);
            attach(&mut effects, root, &nested, &DependencyFilter::default());
            root
        };
        trace!(context = %self.options.label, root = ?root, nested = nested.len(), "root block finished");

        for child in nested {
            self.run_effect(child);
        }
        let spawned = self.drain(deferred);
        attach(&mut self.effects.lock(), root, &spawned, &DependencyFilter::default());
        for child in spawned {
            self.run_effect(child);
        }
        root
    }

    /// Deliver queued write notifications.
    ///
    /// Returns the effects created by notification jobs; the caller owns and
    /// runs them.
    pub(crate) fn drain(self: &Arc<Self>, deferred: VecDeque<Producer>) -> SmallVec<[EffectId; 4]> {
        if deferred.is_empty() {
            return SmallVec::new();
        }
        DeferredQueue::new(deferred).drain(|subscriber| {
            let frame = Recording::enter(self.id, Scope::drain());
            subscriber.notify();
            frame.finish()
        })
    }

    /// Deliver a single write notification right away.
    fn flush(self: &Arc<Self>, producer: Producer) {
        let _serial = self.serialize();
        let spawned = self.drain(VecDeque::from([producer]));
        for effect in spawned {
            self.run_effect(effect);
        }
    }

    pub(crate) fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _frame = Recording::enter(self.id, Scope::Untracked);
        f()
    }

    /// Create a group node owning a collection reconciler.
    ///
    /// The group is adopted by the active recording, if any.
    pub(crate) fn create_group(self: &Arc<Self>, cleanup: Cleanup) -> EffectId {
        let mut node = EffectNode::group();
        node.cleanups.push(cleanup);
        let id = self.effects.lock().insert(node);
        recording::adopt(self.id, id);
        id
    }

    /// Create an effect owned by `group` and run it immediately, untracked.
    ///
    /// Returns `None` when the group has been cancelled.
    pub(crate) fn spawn_child(self: &Arc<Self>, group: EffectId, body: crate::graph::Body) -> Option<EffectId> {
        let _serial = self.serialize();
        let id = {
            let mut effects = self.effects.lock();
            if !effects.contains_key(group) {
                return None;
            }
            let mut node = EffectNode::effect(body);
            node.parent = Some(group);
            let id = effects.insert(node);
            if let Some(owner) = effects.get_mut(group) {
                owner.children.push(id);
            }
            id
        };
        self.untracked(|| self.run_effect(id));
        Some(id)
    }
}

/// Make `children` owned by `owner`, if the owner still exists.
pub(crate) fn attach(
    effects: &mut SlotMap<EffectId, EffectNode>,
    owner: EffectId,
    children: &[EffectId],
    filter: &DependencyFilter,
) {
    if children.is_empty() || !effects.contains_key(owner) {
        return;
    }
    for child in children {
        if let Some(node) = effects.get_mut(*child) {
            node.parent = Some(owner);
            node.filter = filter.clone();
        }
    }
    if let Some(node) = effects.get_mut(owner) {
        for child in children {
            if !node.children.contains(child) {
                node.children.push(*child);
            }
        }
    }
}

/// The handle cells keep to the context that created them.
///
/// Cells never keep their context alive. A cell whose context has been
/// dropped still stores values but notifies nobody asynchronously.
#[derive(Clone)]
pub(crate) struct RuntimeRef {
    id: ContextId,
    inner: Weak<ContextInner>,
}

impl RuntimeRef {
    pub(crate) fn id(&self) -> ContextId {
        self.id
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<ContextInner>> {
        self.inner.upgrade()
    }

    pub(crate) fn current_recording(&self) -> Option<RecordingId> {
        recording::current_recording(self.id)
    }

    pub(crate) fn is_recording(&self) -> bool {
        self.current_recording().is_some()
    }

    /// Record a read of `cell` in the active recording.
    pub(crate) fn track(
        &self,
        cell: CellId,
        created_in: Option<RecordingId>,
        dependency: impl FnOnce() -> Dependency,
    ) -> Result<()> {
        recording::track(self.id, cell, created_in, dependency)
    }

    /// Schedule a write notification for `observers`.
    ///
    /// Inside a recording the notification is queued on it; otherwise it is
    /// delivered before this returns.
    pub(crate) fn publish(&self, observers: &Subscribers) {
        let list = observers.clone();
        let producer: Producer = Box::new(move || list.snapshot());
        if let Err(producer) = recording::defer(self.id, producer) {
            match self.upgrade() {
                Some(runtime) => runtime.flush(producer),
                None => {
                    for subscriber in producer() {
                        subscriber.notify();
                    }
                }
            }
        }
    }
}

static GLOBAL: OnceLock<Context> = OnceLock::new();

/// A reactive context.
///
/// Owns the effects created through it and hands out signals, memos and
/// collections bound to it. Cloning yields another handle to the same
/// context.
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
/// use std::sync::atomic::{AtomicI32, Ordering};
/// use std::sync::Arc;
///
/// let cx = Context::new();
/// let count = cx.create_signal(0);
/// let seen = Arc::new(AtomicI32::new(-1));
///
/// let seen_clone = seen.clone();
/// let count_clone = count.clone();
/// cx.create_effect(move || seen_clone.store(count_clone.get(), Ordering::SeqCst));
///
/// count.set(5);
/// assert_eq!(seen.load(Ordering::SeqCst), 5);
/// ```
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context with default options.
    pub fn new() -> Self {
        Self::with_options(ContextOptions::default())
    }

    /// Create a context with the given options.
    pub fn with_options(options: ContextOptions) -> Self {
        let inner = Arc::new(ContextInner {
            id: ContextId::new(),
            options,
            serial: ReentrantMutex::new(()),
            effects: Mutex::new(SlotMap::with_key()),
            hook: RwLock::new(None),
        });
        debug!(context = %inner.options.label, id = ?inner.id, "context created");
        Self { inner }
    }

    /// The process-wide default context, created on first use.
    pub fn global() -> &'static Context {
        GLOBAL.get_or_init(|| Context::with_options(ContextOptions::new().label("global")))
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn label(&self) -> &str {
        &self.inner.options.label
    }

    pub fn options(&self) -> &ContextOptions {
        &self.inner.options
    }

    /// Create a signal holding `value`.
    pub fn create_signal<T>(&self, value: T) -> Signal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        Signal::new_in(self.runtime(), self.runtime().current_recording(), value)
    }

    /// Create a signal holding `None`.
    pub fn create_null_signal<T>(&self) -> Signal<Option<T>>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        self.create_signal(None)
    }

    /// Create a lazily evaluated, cached derivation.
    ///
    /// `compute` does not run until the memo is first read.
    pub fn create_memo<T, F>(&self, compute: F) -> Memo<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Memo::new_in(self.runtime(), self.runtime().current_recording(), compute)
    }

    /// Create an effect.
    ///
    /// Outside of a recording the effect runs before this returns. Inside
    /// one it becomes a nested effect of the recording body and runs after
    /// that body returns.
    pub fn create_effect<F>(&self, body: F) -> EffectHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = self.inner.create_effect(Arc::new(body));
        EffectHandle::new(&self.inner, id)
    }

    /// Run `block` as a root: effects it creates become its children and
    /// writes it performs are delivered when it returns.
    ///
    /// Cancelling the returned handle cancels everything the block created
    /// and runs the cleanups it registered.
    pub fn run<F>(&self, block: F) -> EffectHandle
    where
        F: FnOnce(),
    {
        let id = self.inner.run_root(block);
        EffectHandle::new(&self.inner, id)
    }

    /// Run `f` with recording suspended.
    ///
    /// Reads inside `f` register no dependency, writes are delivered
    /// immediately and effects created inside run immediately.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        self.inner.untracked(f)
    }

    /// Register a cleanup on the effect currently recording.
    ///
    /// The cleanup runs before the effect's next run and when the effect is
    /// cancelled.
    ///
    /// # Panics
    ///
    /// Panics when called outside an effect or inside a memo body. Use
    /// [`try_cleanup`](Context::try_cleanup) to handle that case.
    pub fn cleanup<F>(&self, cleanup: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Err(err) = self.try_cleanup(cleanup) {
            panic!("{err}");
        }
    }

    /// Fallible form of [`cleanup`](Context::cleanup).
    pub fn try_cleanup<F>(&self, cleanup: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        recording::push_cleanup(self.inner.id, Box::new(cleanup))
    }

    /// Create a reactive list.
    pub fn create_list_signal<T>(&self, items: impl IntoIterator<Item = T>) -> ListSignal<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        ListSignal::new_in(self.runtime(), self.runtime().current_recording(), items)
    }

    /// Create a reactive set.
    pub fn create_set_signal<T>(&self, items: impl IntoIterator<Item = T>) -> SetSignal<T>
    where
        T: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    {
        SetSignal::new_in(self.runtime(), self.runtime().current_recording(), items)
    }

    /// Create a reactive map.
    pub fn create_map_signal<K, V>(&self, entries: impl IntoIterator<Item = (K, V)>) -> MapSignal<K, V>
    where
        K: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        MapSignal::new_in(self.runtime(), self.runtime().current_recording(), entries)
    }

    /// Install a hook called after every completed effect run, replacing any
    /// previous hook.
    pub fn set_post_effect_hook<F>(&self, hook: F)
    where
        F: Fn(&EffectHandle) + Send + Sync + 'static,
    {
        *self.inner.hook.write() = Some(Arc::new(hook));
    }

    pub fn clear_post_effect_hook(&self) {
        *self.inner.hook.write() = None;
    }

    /// Whether a body of this context is recording on the current thread.
    pub fn is_recording(&self) -> bool {
        self.runtime().is_recording()
    }

    /// Number of live effect, root and group nodes.
    pub fn effect_count(&self) -> usize {
        self.inner.effects.lock().len()
    }

    pub(crate) fn runtime(&self) -> RuntimeRef {
        self.inner.downgrade()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("label", &self.inner.options.label)
            .field("effects", &self.effect_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn context_ids_are_unique() {
        assert_ne!(Context::new().id(), Context::new().id());
    }

    #[test]
    fn global_context_is_shared() {
        assert_eq!(Context::global().id(), Context::global().id());
        assert_eq!(Context::global().label(), "global");
    }

    #[test]
    fn is_recording_follows_bodies() {
        let cx = Context::new();
        assert!(!cx.is_recording());

        let seen = Arc::new(AtomicI32::new(0));
        let seen_clone = seen.clone();
        let cx_clone = cx.clone();
        cx.create_effect(move || {
            if cx_clone.is_recording() {
                seen_clone.fetch_add(1, Ordering::SeqCst);
            }
            let inner = cx_clone.untracked(|| cx_clone.is_recording());
            assert!(!inner);
        });

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(!cx.is_recording());
    }

    #[test]
    fn other_contexts_do_not_record_into_each_other() {
        let a = Context::new();
        let b = Context::new();
        let runs = Arc::new(AtomicI32::new(0));
        let signal = b.create_signal(0);

        let runs_clone = runs.clone();
        let signal_clone = signal.clone();
        a.create_effect(move || {
            runs_clone.fetch_add(1, Ordering::SeqCst);
            signal_clone.get();
        });

        signal.set(1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_returns_a_cancellable_root() {
        let cx = Context::new();
        let cleaned = Arc::new(AtomicI32::new(0));

        let cleaned_clone = cleaned.clone();
        let cx_clone = cx.clone();
        let root = cx.run(move || {
            cx_clone.cleanup(move || {
                cleaned_clone.fetch_add(1, Ordering::SeqCst);
            });
        });

        assert_eq!(cleaned.load(Ordering::SeqCst), 0);
        root.cancel();
        root.cancel();
        assert_eq!(cleaned.load(Ordering::SeqCst), 1);
        assert_eq!(cx.effect_count(), 0);
    }

    #[test]
    fn null_signal_starts_empty() {
        let cx = Context::new();
        let name = cx.create_null_signal::<String>();
        assert_eq!(name.get(), None);
        name.set(Some("ada".to_string()));
        assert_eq!(name.get_untracked().as_deref(), Some("ada"));
    }

    #[test]
    fn cleanup_outside_effect_is_an_error() {
        let cx = Context::new();
        assert_eq!(
            cx.try_cleanup(|| {}),
            Err(crate::error::ReactiveError::CleanupOutsideEffect)
        );
    }

    #[test]
    #[should_panic(expected = "cleanup was called outside of an effect")]
    fn cleanup_outside_effect_panics() {
        Context::new().cleanup(|| {});
    }
}
