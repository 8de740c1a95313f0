//! Reactive list.

use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::{register, Reconcilers, Shape};
use crate::graph::EffectId;
use crate::reactive::context::RecordingId;
use crate::reactive::runtime::ContextInner;
use crate::reactive::{CellId, EffectHandle, Mapped, Mapper, ReadSignal, RuntimeRef, Signal};

type OnAdd<T> = dyn Fn(ReadSignal<T>, usize) + Send + Sync;

/// A list whose elements are individually reactive.
///
/// Each element lives in its own [`Signal`], so writing one element re-runs
/// only the effects that read it.
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
///
/// let cx = Context::new();
/// let list = cx.create_list_signal(["a", "b"]);
/// list.push("c");
/// assert_eq!(list.len(), 3);
/// assert_eq!(list.remove(0), Some("a"));
/// assert_eq!(list.get_untracked(), vec!["b", "c"]);
/// ```
pub struct ListSignal<T> {
    inner: Arc<ListInner<T>>,
}

struct ListInner<T> {
    runtime: RuntimeRef,
    created_in: Option<RecordingId>,
    items: RwLock<Vec<Signal<T>>>,
    shape: Shape,
    reconcilers: Arc<Reconcilers<ListReconciler<T>>>,
}

struct ListReconciler<T> {
    group: EffectId,
    callback: Arc<OnAdd<T>>,
    /// Element effects, by element cell.
    effects: Mutex<IndexMap<CellId, EffectId>>,
}

impl<T> ListInner<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Current position of the element held in `cell`.
    fn position(&self, cell: CellId) -> Option<usize> {
        self.items.read().iter().position(|item| item.id() == cell)
    }
}

impl<T> ListReconciler<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn added(
        &self,
        runtime: &Arc<ContextInner>,
        list: Weak<ListInner<T>>,
        cell: Signal<T>,
        index: usize,
    ) {
        let id = cell.id();
        let callback = Arc::clone(&self.callback);
        let body = Arc::new(move || {
            let index = list
                .upgrade()
                .and_then(|list| list.position(id))
                .unwrap_or(index);
            callback(ReadSignal::new(cell.clone()), index)
        });
        // The callback may itself change the list, so the effect is filed
        // under its cell rather than a position.
        if let Some(effect) = runtime.spawn_child(self.group, body) {
            self.effects.lock().insert(id, effect);
        }
    }

    fn removed(&self, runtime: &Arc<ContextInner>, cell: CellId) {
        let effect = self.effects.lock().shift_remove(&cell);
        if let Some(effect) = effect {
            runtime.cancel(effect);
        }
    }
}

impl<T> ListSignal<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new_in(
        runtime: RuntimeRef,
        created_in: Option<RecordingId>,
        items: impl IntoIterator<Item = T>,
    ) -> Self {
        let items: Vec<Signal<T>> = items
            .into_iter()
            .map(|item| Signal::new_in(runtime.clone(), created_in, item))
            .collect();
        Self {
            inner: Arc::new(ListInner {
                shape: Shape::new(&runtime, created_in, items.len()),
                runtime,
                created_in,
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

    /// Read the element at `index`. Tracks the structure and the element.
    pub fn get(&self, index: usize) -> Option<T> {
        self.get_signal(index).map(|cell| cell.get())
    }

    /// The signal holding the element at `index`. Tracks the structure.
    pub fn get_signal(&self, index: usize) -> Option<Signal<T>> {
        self.inner.shape.track_contents();
        self.inner.items.read().get(index).cloned()
    }

    /// All elements. Tracks the structure and every element.
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.shape.track_contents();
        let cells = self.inner.items.read().clone();
        cells.iter().map(Signal::get).collect()
    }

    /// All elements, without tracking.
    pub fn get_untracked(&self) -> Vec<T> {
        self.inner.items.read().iter().map(Signal::get_untracked).collect()
    }

    pub fn push(&self, value: T) {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let len = self.inner.items.read().len();
        self.insert(len, value);
    }

    /// Insert `value` at `index`, shifting later elements.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, value: T) {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let cell = Signal::new_in(self.inner.runtime.clone(), self.inner.created_in, value);
        let len = {
            let mut items = self.inner.items.write();
            items.insert(index, cell.clone());
            items.len()
        };
        self.inner.shape.changed(len);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                reconciler.added(runtime, Arc::downgrade(&self.inner), cell.clone(), index);
            }
        }
    }

    /// Replace the element at `index`, returning the previous value.
    ///
    /// Only effects reading that element re-run.
    pub fn set(&self, index: usize, value: T) -> Option<T> {
        let cell = self.inner.items.read().get(index).cloned()?;
        let previous = cell.get_untracked();
        cell.set(value);
        Some(previous)
    }

    /// Remove and return the element at `index`.
    pub fn remove(&self, index: usize) -> Option<T> {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let (removed, len) = {
            let mut items = self.inner.items.write();
            if index >= items.len() {
                return None;
            }
            let removed = items.remove(index);
            (removed, items.len())
        };
        self.inner.shape.changed(len);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                reconciler.removed(runtime, removed.id());
            }
        }
        Some(removed.get_untracked())
    }

    pub fn pop(&self) -> Option<T> {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let len = self.inner.items.read().len();
        len.checked_sub(1).and_then(|last| self.remove(last))
    }

    /// Remove every element, last first.
    pub fn clear(&self) {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let removed = std::mem::take(&mut *self.inner.items.write());
        if removed.is_empty() {
            return;
        }
        self.inner.shape.changed(0);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                for cell in removed.iter().rev() {
                    reconciler.removed(runtime, cell.id());
                }
            }
        }
    }

    /// Run `callback` once per element, current and future, inside an
    /// effect owned by the returned group.
    ///
    /// The element's effect is cancelled when the element is removed and
    /// when the group is cancelled, running any cleanup the callback
    /// registered. The index passed to `callback` is the element's position
    /// when its effect runs; a later shift alone does not re-run it.
    pub fn on_add<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(ReadSignal<T>, usize) + Send + Sync + 'static,
    {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            return EffectHandle::detached();
        };
        let _serial = runtime.serialize();
        let callback: Arc<OnAdd<T>> = Arc::new(callback);
        let existing = self.inner.items.read().clone();

        register(
            &runtime,
            &self.inner.reconcilers,
            |group| ListReconciler {
                group,
                callback,
                effects: Mutex::new(IndexMap::new()),
            },
            |reconciler| {
                for (index, cell) in existing.into_iter().enumerate() {
                    reconciler.added(&runtime, Arc::downgrade(&self.inner), cell, index);
                }
            },
        )
    }

    /// A storage-free view applying `mapper` to every element read.
    pub fn map<U, F>(&self, mapper: F) -> MappedList<T, U>
    where
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        MappedList {
            source: self.clone(),
            mapper: Arc::new(mapper),
        }
    }

    /// Number of registered `on_add` reconcilers.
    pub fn reconciler_count(&self) -> usize {
        self.inner.reconcilers.len()
    }
}

impl<T> Clone for ListSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ListSignal<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.get_untracked()).finish()
    }
}

/// A transformed view of a [`ListSignal`].
///
/// Holds no values; every read maps the source element.
pub struct MappedList<T, U> {
    source: ListSignal<T>,
    mapper: Mapper<T, U>,
}

impl<T, U> MappedList<T, U>
where
    T: Clone + PartialEq + Send + Sync + 'static,
    U: 'static,
{
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<U> {
        self.source.get(index).map(|value| (self.mapper)(value))
    }

    pub fn get_signal(&self, index: usize) -> Option<Mapped<T, U>> {
        self.source
            .get_signal(index)
            .map(|cell| Mapped::from_parts(ReadSignal::new(cell), Arc::clone(&self.mapper)))
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

    /// [`ListSignal::on_add`] over mapped elements.
    pub fn on_add<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(ReadSignal<U>, usize) + Send + Sync + 'static,
    {
        let mapper = Arc::clone(&self.mapper);
        self.source.on_add(move |cell, index| {
            callback(ReadSignal::new(Mapped::from_parts(cell, Arc::clone(&mapper))), index)
        })
    }

    pub fn map<V, F>(&self, mapper: F) -> MappedList<T, V>
    where
        V: 'static,
        F: Fn(U) -> V + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.mapper);
        MappedList {
            source: self.source.clone(),
            mapper: Arc::new(move |value| mapper(inner(value))),
        }
    }
}

impl<T, U> Clone for MappedList<T, U> {
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
