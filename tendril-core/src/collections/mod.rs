//! Reactive Collections
//!
//! Lists, sets and maps whose structure is reactive.
//!
//! # Overview
//!
//! Every collection carries two signals of its own:
//!
//! - `size`, read by `len` and `is_empty`
//! - `revision`, bumped on every structural change and read by content
//!   queries such as `to_vec` or `contains`
//!
//! Lists and maps additionally keep one signal per element or value, so an
//! effect that reads a single element re-runs only when that element
//! changes.
//!
//! # Reconcilers
//!
//! `on_add` (and `on_put` on maps) registers a callback that runs once per
//! element, inside an effect owned by a group node. The group is adopted by
//! whatever body is recording, so it is cancelled together with its owner.
//! Removing an element cancels that element's effect, which runs the
//! cleanups the callback registered.

mod list;
mod map;
mod set;

pub use list::{ListSignal, MappedList};
pub use map::{MapSignal, MappedMap};
pub use set::{MappedSet, SetSignal};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::graph::EffectId;
use crate::reactive::context::RecordingId;
use crate::reactive::runtime::ContextInner;
use crate::reactive::{EffectHandle, RuntimeRef, Signal};

/// Size and revision signals of a collection.
pub(crate) struct Shape {
    size: Signal<usize>,
    revision: Signal<u64>,
}

impl Shape {
    fn new(runtime: &RuntimeRef, created_in: Option<RecordingId>, len: usize) -> Self {
        Self {
            size: Signal::new_in(runtime.clone(), created_in, len),
            revision: Signal::new_in(runtime.clone(), created_in, 0),
        }
    }

    /// Record a structural change leaving `len` elements.
    fn changed(&self, len: usize) {
        self.size.set(len);
        self.revision.update(|revision| revision.wrapping_add(1));
    }

    fn track_len(&self) -> usize {
        self.size.get()
    }

    fn track_contents(&self) {
        self.revision.get();
    }
}

/// The reconcilers registered on one collection.
pub(crate) struct Reconcilers<R> {
    next_key: AtomicU64,
    entries: Mutex<IndexMap<u64, Arc<R>>>,
}

impl<R> Reconcilers<R> {
    fn new() -> Self {
        Self {
            next_key: AtomicU64::new(0),
            entries: Mutex::new(IndexMap::new()),
        }
    }

    /// Current reconcilers in registration order.
    fn snapshot(&self) -> Vec<Arc<R>> {
        self.entries.lock().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Register a reconciler under a new group node and seed it.
///
/// The group's cleanup unregisters the reconciler. `seed` runs after
/// registration so elements added by the seeding callbacks are reconciled
/// too.
fn register<R>(
    runtime: &Arc<ContextInner>,
    reconcilers: &Arc<Reconcilers<R>>,
    build: impl FnOnce(EffectId) -> R,
    seed: impl FnOnce(&R),
) -> EffectHandle
where
    R: Send + Sync + 'static,
{
    let key = reconcilers.next_key.fetch_add(1, Ordering::Relaxed);
    let registry = Arc::downgrade(reconcilers);
    let group = runtime.create_group(Box::new(move || {
        if let Some(registry) = registry.upgrade() {
            registry.entries.lock().shift_remove(&key);
        }
    }));

    let reconciler = Arc::new(build(group));
    reconcilers.entries.lock().insert(key, Arc::clone(&reconciler));
    seed(&reconciler);
    EffectHandle::new(runtime, group)
}
