//! Reactive set.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};

use super::{register, Reconcilers, Shape};
use crate::graph::EffectId;
use crate::reactive::context::RecordingId;
use crate::reactive::runtime::ContextInner;
use crate::reactive::{EffectHandle, Mapper, RuntimeRef};

type OnAdd<T> = dyn Fn(T) + Send + Sync;

/// An insertion-ordered set with reactive structure.
///
/// Elements are values, not cells: content reads track the set as a whole.
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
///
/// let cx = Context::new();
/// let tags = cx.create_set_signal(["a", "b"]);
/// assert!(tags.insert("c"));
/// assert!(!tags.insert("a"));
/// assert_eq!(tags.len(), 3);
/// ```
pub struct SetSignal<T> {
    inner: Arc<SetInner<T>>,
}

struct SetInner<T> {
    runtime: RuntimeRef,
    items: RwLock<IndexSet<T>>,
    shape: Shape,
    reconcilers: Arc<Reconcilers<SetReconciler<T>>>,
}

struct SetReconciler<T> {
    group: EffectId,
    callback: Arc<OnAdd<T>>,
    effects: Mutex<IndexMap<T, EffectId>>,
}

impl<T> SetReconciler<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn added(&self, runtime: &Arc<ContextInner>, value: T) {
        let callback = Arc::clone(&self.callback);
        let element = value.clone();
        let body = Arc::new(move || callback(element.clone()));
        if let Some(effect) = runtime.spawn_child(self.group, body) {
            self.effects.lock().insert(value, effect);
        }
    }

    fn removed(&self, runtime: &Arc<ContextInner>, value: &T) {
        let effect = self.effects.lock().shift_remove(value);
        if let Some(effect) = effect {
            runtime.cancel(effect);
        }
    }
}

impl<T> SetSignal<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub(crate) fn new_in(
        runtime: RuntimeRef,
        created_in: Option<RecordingId>,
        items: impl IntoIterator<Item = T>,
    ) -> Self {
        let items: IndexSet<T> = items.into_iter().collect();
        Self {
            inner: Arc::new(SetInner {
                shape: Shape::new(&runtime, created_in, items.len()),
                runtime,
                items: RwLock::new(items),
                reconcilers: Arc::new(Reconcilers::new()),
            }),
        }
    }

    /// Number of elements. Tracks the size.
    pub fn len(&self) -> usize {
        self.inner.shape.track_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tracks the structure.
    pub fn contains(&self, value: &T) -> bool {
        self.inner.shape.track_contents();
        self.inner.items.read().contains(value)
    }

    /// All elements in insertion order. Tracks the structure.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.shape.track_contents();
        self.get_untracked().into_iter().collect()
    }

    pub fn get_untracked(&self) -> IndexSet<T> {
        self.inner.items.read().clone()
    }

    /// Add `value`. Returns `false` if it was already present.
    pub fn insert(&self, value: T) -> bool {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let len = {
            let mut items = self.inner.items.write();
            if !items.insert(value.clone()) {
                return false;
            }
            items.len()
        };
        self.inner.shape.changed(len);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                reconciler.added(runtime, value.clone());
            }
        }
        true
    }

    /// Remove `value`. Returns `false` if it was absent.
    pub fn remove(&self, value: &T) -> bool {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let len = {
            let mut items = self.inner.items.write();
            if !items.shift_remove(value) {
                return false;
            }
            items.len()
        };
        self.inner.shape.changed(len);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                reconciler.removed(runtime, value);
            }
        }
        true
    }

    /// Keep only the elements for which `keep` returns `true`.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) {
        let doomed: Vec<T> = self
            .inner
            .items
            .read()
            .iter()
            .filter(|value| !keep(value))
            .cloned()
            .collect();
        for value in &doomed {
            self.remove(value);
        }
    }

    pub fn clear(&self) {
        self.retain(|_| false);
    }

    /// Run `callback` once per element, current and future, inside an
    /// effect owned by the returned group.
    ///
    /// The element's effect is cancelled when the element is removed and
    /// when the group is cancelled.
    pub fn on_add<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            return EffectHandle::detached();
        };
        let _serial = runtime.serialize();
        let callback: Arc<OnAdd<T>> = Arc::new(callback);
        let existing = self.get_untracked();

        register(
            &runtime,
            &self.inner.reconcilers,
            |group| SetReconciler {
                group,
                callback,
                effects: Mutex::new(IndexMap::new()),
            },
            |reconciler| {
                for value in existing {
                    reconciler.added(&runtime, value);
                }
            },
        )
    }

    /// A storage-free view applying `mapper` to every element read.
    pub fn map<U, F>(&self, mapper: F) -> MappedSet<T, U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        MappedSet {
            source: self.clone(),
            mapper: Arc::new(mapper),
        }
    }

    /// Number of registered `on_add` reconcilers.
    pub fn reconciler_count(&self) -> usize {
        self.inner.reconcilers.len()
    }
}

impl<T> Clone for SetSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for SetSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.inner.items.read().iter()).finish()
    }
}

/// A transformed view of a [`SetSignal`].
///
/// Mapped elements are not deduplicated.
pub struct MappedSet<T, U> {
    source: SetSignal<T>,
    mapper: Mapper<T, U>,
}

impl<T, U> MappedSet<T, U>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
    U: 'static,
{
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    /// Whether some element maps to `value`. Tracks the structure.
    pub fn contains(&self, value: &U) -> bool
    where
        U: PartialEq,
    {
        self.to_vec().iter().any(|mapped| mapped == value)
    }

    pub fn to_vec(&self) -> Vec<U> {
        self.source.to_vec().into_iter().map(|value| (self.mapper)(value)).collect()
    }

    pub fn get_untracked(&self) -> Vec<U> {
        self.source
            .get_untracked()
            .into_iter()
            .map(|value| (self.mapper)(value))
            .collect()
    }

    /// [`SetSignal::on_add`] over mapped elements.
    pub fn on_add<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(U) + Send + Sync + 'static,
    {
        let mapper = Arc::clone(&self.mapper);
        self.source.on_add(move |value| callback(mapper(value)))
    }

    pub fn map<V, F>(&self, mapper: F) -> MappedSet<T, V>
    where
        V: 'static,
        F: Fn(U) -> V + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.mapper);
        MappedSet {
            source: self.source.clone(),
            mapper: Arc::new(move |value| mapper(inner(value))),
        }
    }
}

impl<T, U> Clone for MappedSet<T, U> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            mapper: Arc::clone(&self.mapper),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
