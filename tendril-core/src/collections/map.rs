//! Reactive map.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use super::{register, Reconcilers, Shape};
use crate::graph::EffectId;
use crate::reactive::context::RecordingId;
use crate::reactive::runtime::ContextInner;
use crate::reactive::{EffectHandle, Mapped, Mapper, Memo, ReadSignal, RuntimeRef, Signal};

type OnPut<K, V> = dyn Fn(K, ReadSignal<V>) + Send + Sync;

/// An insertion-ordered map whose values are individually reactive.
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
///
/// let cx = Context::new();
/// let scores = cx.create_map_signal([("ada", 3)]);
/// assert_eq!(scores.put("ada", 4), Some(3));
/// assert_eq!(scores.put("bob", 1), None);
/// assert_eq!(scores.get(&"ada"), Some(4));
/// ```
pub struct MapSignal<K, V> {
    inner: Arc<MapInner<K, V>>,
}

struct MapInner<K, V> {
    runtime: RuntimeRef,
    created_in: Option<RecordingId>,
    entries: RwLock<IndexMap<K, Signal<V>>>,
    shape: Shape,
    reconcilers: Arc<Reconcilers<MapReconciler<K, V>>>,
}

struct MapReconciler<K, V> {
    group: EffectId,
    callback: Arc<OnPut<K, V>>,
    effects: Mutex<IndexMap<K, EffectId>>,
}

impl<K, V> MapReconciler<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    fn added(&self, runtime: &Arc<ContextInner>, key: K, cell: Signal<V>) {
        let callback = Arc::clone(&self.callback);
        let entry_key = key.clone();
        let body = Arc::new(move || callback(entry_key.clone(), ReadSignal::new(cell.clone())));
        if let Some(effect) = runtime.spawn_child(self.group, body) {
            self.effects.lock().insert(key, effect);
        }
    }

    fn removed(&self, runtime: &Arc<ContextInner>, key: &K) {
        let effect = self.effects.lock().shift_remove(key);
        if let Some(effect) = effect {
            runtime.cancel(effect);
        }
    }
}

impl<K, V> MapSignal<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new_in(
        runtime: RuntimeRef,
        created_in: Option<RecordingId>,
        entries: impl IntoIterator<Item = (K, V)>,
    ) -> Self {
        let entries: IndexMap<K, Signal<V>> = entries
            .into_iter()
            .map(|(key, value)| (key, Signal::new_in(runtime.clone(), created_in, value)))
            .collect();
        Self {
            inner: Arc::new(MapInner {
                shape: Shape::new(&runtime, created_in, entries.len()),
                runtime,
                created_in,
                entries: RwLock::new(entries),
                reconcilers: Arc::new(Reconcilers::new()),
            }),
        }
    }

    /// Number of entries. Tracks the size.
    pub fn len(&self) -> usize {
        self.inner.shape.track_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read the value under `key`. Tracks the structure and that value.
    pub fn get(&self, key: &K) -> Option<V> {
        self.get_signal(key).map(|cell| cell.get())
    }

    /// The signal holding the value under `key`. Tracks the structure.
    pub fn get_signal(&self, key: &K) -> Option<Signal<V>> {
        self.inner.shape.track_contents();
        self.inner.entries.read().get(key).cloned()
    }

    /// Tracks the structure.
    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.shape.track_contents();
        self.inner.entries.read().contains_key(key)
    }

    /// Keys in insertion order. Tracks the structure.
    pub fn keys(&self) -> Vec<K> {
        self.inner.shape.track_contents();
        self.inner.entries.read().keys().cloned().collect()
    }

    pub fn get_untracked(&self) -> IndexMap<K, V> {
        self.inner
            .entries
            .read()
            .iter()
            .map(|(key, cell)| (key.clone(), cell.get_untracked()))
            .collect()
    }

    /// Store `value` under `key`, returning the previous value.
    ///
    /// Replacing a value only re-runs effects reading that value; a new key
    /// is a structural change.
    pub fn put(&self, key: K, value: V) -> Option<V> {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());

        let existing = self.inner.entries.read().get(&key).cloned();
        if let Some(cell) = existing {
            let previous = cell.get_untracked();
            cell.set(value);
            return Some(previous);
        }

        let cell = Signal::new_in(self.inner.runtime.clone(), self.inner.created_in, value);
        let len = {
            let mut entries = self.inner.entries.write();
            entries.insert(key.clone(), cell.clone());
            entries.len()
        };
        self.inner.shape.changed(len);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                reconciler.added(runtime, key.clone(), cell.clone());
            }
        }
        None
    }

    /// Remove the entry under `key`, returning its value.
    pub fn remove(&self, key: &K) -> Option<V> {
        let runtime = self.inner.runtime.upgrade();
        let _serial = runtime.as_ref().map(|runtime| runtime.serialize());
        let (removed, len) = {
            let mut entries = self.inner.entries.write();
            let removed = entries.shift_remove(key)?;
            (removed, entries.len())
        };
        self.inner.shape.changed(len);

        if let Some(runtime) = &runtime {
            for reconciler in self.inner.reconcilers.snapshot() {
                reconciler.removed(runtime, key);
            }
        }
        Some(removed.get_untracked())
    }

    pub fn clear(&self) {
        let keys: Vec<K> = self.inner.entries.read().keys().cloned().collect();
        for key in &keys {
            self.remove(key);
        }
    }

    /// A memo of the value under the key `key` currently returns.
    ///
    /// Re-evaluates when the key changes, when the entry is added or removed
    /// and when its value changes.
    pub fn select<F>(&self, key: F) -> Memo<Option<V>>
    where
        F: Fn() -> K + Send + Sync + 'static,
    {
        let map = self.clone();
        Memo::new_in(
            self.inner.runtime.clone(),
            self.inner.runtime.current_recording(),
            move || map.get(&key()),
        )
    }

    /// Run `callback` once per entry, current and future, inside an effect
    /// owned by the returned group.
    ///
    /// The entry's effect is cancelled when the key is removed and when the
    /// group is cancelled. Replacing a value does not re-add the entry.
    pub fn on_put<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(K, ReadSignal<V>) + Send + Sync + 'static,
    {
        let Some(runtime) = self.inner.runtime.upgrade() else {
            return EffectHandle::detached();
        };
        let _serial = runtime.serialize();
        let callback: Arc<OnPut<K, V>> = Arc::new(callback);
        let existing = self.inner.entries.read().clone();

        register(
            &runtime,
            &self.inner.reconcilers,
            |group| MapReconciler {
                group,
                callback,
                effects: Mutex::new(IndexMap::new()),
            },
            |reconciler| {
                for (key, cell) in existing {
                    reconciler.added(&runtime, key, cell);
                }
            },
        )
    }

    /// A storage-free view applying `mapper` to every value read.
    pub fn map_values<U, F>(&self, mapper: F) -> MappedMap<K, V, U>
    where
        U: 'static,
        F: Fn(V) -> U + Send + Sync + 'static,
    {
        MappedMap {
            source: self.clone(),
            mapper: Arc::new(mapper),
        }
    }

    /// Number of registered `on_put` reconcilers.
    pub fn reconciler_count(&self) -> usize {
        self.inner.reconcilers.len()
    }
}

impl<K, V> Clone for MapSignal<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> fmt::Debug for MapSignal<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + fmt::Debug + 'static,
    V: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.get_untracked()).finish()
    }
}

/// A transformed view of a [`MapSignal`]'s values.
pub struct MappedMap<K, V, U> {
    source: MapSignal<K, V>,
    mapper: Mapper<V, U>,
}

impl<K, V, U> MappedMap<K, V, U>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
    U: 'static,
{
    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn get(&self, key: &K) -> Option<U> {
        self.source.get(key).map(|value| (self.mapper)(value))
    }

    pub fn get_signal(&self, key: &K) -> Option<Mapped<V, U>> {
        self.source
            .get_signal(key)
            .map(|cell| Mapped::from_parts(ReadSignal::new(cell), Arc::clone(&self.mapper)))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.source.contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.source.keys()
    }

    pub fn get_untracked(&self) -> IndexMap<K, U> {
        self.source
            .get_untracked()
            .into_iter()
            .map(|(key, value)| (key, (self.mapper)(value)))
            .collect()
    }

    /// [`MapSignal::select`] with the mapper applied on read.
    pub fn select<F>(&self, key: F) -> Mapped<Option<V>, Option<U>>
    where
        F: Fn() -> K + Send + Sync + 'static,
    {
        let mapper = Arc::clone(&self.mapper);
        Mapped::new(self.source.select(key), move |value: Option<V>| value.map(|value| mapper(value)))
    }

    /// [`MapSignal::on_put`] over mapped values.
    pub fn on_put<F>(&self, callback: F) -> EffectHandle
    where
        F: Fn(K, ReadSignal<U>) + Send + Sync + 'static,
    {
        let mapper = Arc::clone(&self.mapper);
        self.source.on_put(move |key, cell| {
            callback(key, ReadSignal::new(Mapped::from_parts(cell, Arc::clone(&mapper))))
        })
    }

    pub fn map_values<W, F>(&self, mapper: F) -> MappedMap<K, V, W>
    where
        W: 'static,
        F: Fn(U) -> W + Send + Sync + 'static,
    {
        let inner = Arc::clone(&self.mapper);
        MappedMap {
            source: self.source.clone(),
            mapper: Arc::new(move |value| mapper(inner(value))),
        }
    }
}

impl<K, V, U> Clone for MappedMap<K, V, U> {
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

#[cfg(test)]
mod tests {
    use crate::prelude::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn replacing_a_value_is_not_structural() {
        let cx = Context::new();
        let map = cx.create_map_signal([("a", 1)]);
        let sizes = Arc::new(Mutex::new(Vec::new()));

        let sizes_clone = sizes.clone();
        let map_clone = map.clone();
        cx.create_effect(move || sizes_clone.lock().push(map_clone.len()));

        assert_eq!(map.put("a", 2), Some(1));
        assert_eq!(map.put("b", 3), None);
        assert_eq!(map.remove(&"a"), Some(2));
        assert_eq!(map.remove(&"a"), None);
        assert_eq!(*sizes.lock(), vec![1, 2, 1]);
    }

    #[test]
    fn select_follows_the_selected_key() {
        let cx = Context::new();
        let map = cx.create_map_signal([("a", 1), ("b", 2)]);
        let key = cx.create_signal("a");
        let seen = Arc::new(Mutex::new(Vec::new()));

        let key_clone = key.clone();
        let selected = map.select(move || key_clone.get());
        let seen_clone = seen.clone();
        cx.create_effect(move || seen_clone.lock().push(selected.get()));

        map.put("b", 20);
        key.set("b");
        map.put("b", 21);
        map.remove(&"b");
        assert_eq!(*seen.lock(), vec![Some(1), Some(20), Some(21), None]);
    }

    #[test]
    fn unrelated_structure_changes_do_not_rerun_selectors() {
        let cx = Context::new();
        let map = cx.create_map_signal([("a", 1)]);
        let runs = Arc::new(AtomicI32::new(0));

        let selected = map.select(|| "a");
        let runs_clone = runs.clone();
        cx.create_effect(move || {
            selected.get();
            runs_clone.fetch_add(1, Ordering::SeqCst);
        });

        map.put("z", 9);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_put_runs_per_key_and_cleans_up_on_removal() {
        let cx = Context::new();
        let map = cx.create_map_signal([("a", 1)]);
        let log = Arc::new(Mutex::new(Vec::new()));

        let log_clone = log.clone();
        let cx_clone = cx.clone();
        let mapped = map.map_values(|value| value * 100);
        let group = mapped.on_put(move |key, cell| {
            log_clone.lock().push(format!("put {key}={}", cell.get()));
            let log = log_clone.clone();
            cx_clone.cleanup(move || log.lock().push(format!("drop {key}")));
        });

        map.put("b", 2);
        map.put("a", 3);
        map.remove(&"b");
        group.cancel();

        assert_eq!(
            *log.lock(),
            vec!["put a=100", "put b=200", "drop a", "put a=300", "drop b", "drop a"]
        );
    }
}
