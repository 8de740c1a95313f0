//! Effect Implementation
//!
//! An effect is a side-effecting computation that re-runs whenever one of
//! the cells it read changes value.
//!
//! # How Effects Work
//!
//! 1. Before a run, the effect releases what its previous run acquired: it
//!    unsubscribes, cancels its nested effects and runs its cleanups.
//!
//! 2. The body runs inside a recording frame. Reads, writes, nested effects
//!    and cleanups are captured.
//!
//! 3. The effect subscribes to every captured read its ancestors do not
//!    already depend on. A notification re-runs the effect only if the
//!    cell's value differs from the one observed.
//!
//! 4. Deferred writes are delivered, then nested effects run in creation
//!    order.
//!
//! # Ownership
//!
//! Effects form a tree. An effect created while another body is recording
//! belongs to that body's owner and is cancelled when the owner re-runs or
//! is cancelled. Dropping an [`EffectHandle`] cancels nothing.

use std::fmt::{self, Write as _};
use std::sync::{Arc, Weak};

use slotmap::SlotMap;
use smallvec::SmallVec;
use tracing::{debug, trace};

use super::context::{Capture, Recording, Scope};
use super::dependency::Dependency;
use super::runtime::{attach, ContextInner};
use super::subscriber::Subscription;
use crate::graph::{EffectId, EffectNode, Owned};

impl ContextInner {
    /// Run the effect `id`. Does nothing for cancelled, root and group nodes.
    pub(crate) fn run_effect(self: &Arc<Self>, id: EffectId) {
        let _serial = self.serialize();
        let (body, filter) = {
            let effects = self.effects.lock();
            match effects.get(id).and_then(|node| Some((node.body()?, node.filter.clone()))) {
                Some(entry) => entry,
                None => return,
            }
        };
        self.release(id);

        let frame = Recording::enter(self.id, Scope::Effect(id));
        body();
        let Capture {
            dependencies,
            nested,
            deferred,
            cleanups,
        } = frame.finish();

        let dependencies: Vec<Dependency> = dependencies
            .into_values()
            .filter(|dependency| filter.admits(dependency.cell()))
            .collect();
        let child_filter = filter.extend(dependencies.iter().map(Dependency::cell));
        let subscriptions: SmallVec<[Subscription; 4]> = dependencies
            .iter()
            .map(|dependency| self.watch(id, dependency))
            .collect();
        trace!(effect = ?id, dependencies = dependencies.len(), nested = nested.len(), "effect ran");

        let orphaned = {
            let mut effects = self.effects.lock();
            if let Some(node) = effects.get_mut(id) {
                node.dependencies = dependencies;
                node.subscriptions = subscriptions;
                node.children = nested.clone();
                node.cleanups = cleanups;
                node.runs += 1;
                attach(&mut effects, id, &nested, &child_filter);
                None
            } else {
                Some(Owned {
                    subscriptions,
                    children: nested.clone(),
                    cleanups,
                })
            }
        };

        if let Some(orphaned) = orphaned {
            // Cancelled by its own body.
            self.dispose(orphaned);
            for effect in self.drain(deferred) {
                self.run_effect(effect);
            }
            return;
        }

        let spawned = self.drain(deferred);
        attach(&mut self.effects.lock(), id, &spawned, &child_filter);
        for child in nested.into_iter().chain(spawned) {
            self.run_effect(child);
        }
        self.after_run(id);
    }

    /// Subscribe effect `id` to `dependency`.
    fn watch(self: &Arc<Self>, id: EffectId, dependency: &Dependency) -> Subscription {
        let runtime = Arc::downgrade(self);
        let trigger = dependency.clone();
        dependency.on_dirty_effect(Arc::new(move || {
            if !trigger.is_changed() {
                return;
            }
            if let Some(runtime) = runtime.upgrade() {
                runtime.run_effect(id);
            }
        }))
    }

    /// Drop everything the last run of `id` acquired.
    fn release(self: &Arc<Self>, id: EffectId) {
        let owned = self.effects.lock().get_mut(id).map(EffectNode::take_owned);
        if let Some(owned) = owned {
            self.dispose(owned);
        }
    }

    fn dispose(self: &Arc<Self>, owned: Owned) {
        for subscription in &owned.subscriptions {
            subscription.unsubscribe();
        }
        for child in owned.children {
            self.cancel(child);
        }
        if !owned.cleanups.is_empty() {
            self.untracked(|| {
                for cleanup in owned.cleanups {
                    cleanup();
                }
            });
        }
    }

    /// Cancel `id` and its subtree. Idempotent.
    pub(crate) fn cancel(self: &Arc<Self>, id: EffectId) {
        let _serial = self.serialize();
        let removed = self.effects.lock().remove(id);
        let Some(mut node) = removed else {
            return;
        };
        if let Some(parent) = node.parent {
            if let Some(owner) = self.effects.lock().get_mut(parent) {
                owner.children.retain(|child| *child != id);
            }
        }
        trace!(effect = ?id, "effect cancelled");
        self.dispose(node.take_owned());
    }

    fn after_run(self: &Arc<Self>, id: EffectId) {
        if self.options.trace_effects {
            debug!(context = %self.options.label, tree = %self.format_tree(id), "effect run complete");
        }
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(&EffectHandle::new(self, id));
        }
    }

    pub(crate) fn format_tree(&self, id: EffectId) -> String {
        let effects = self.effects.lock();
        let mut out = String::new();
        write_tree(&effects, id, "", &mut out);
        out.truncate(out.trim_end().len());
        out
    }
}

fn write_tree(effects: &SlotMap<EffectId, EffectNode>, id: EffectId, indent: &str, out: &mut String) {
    let Some(node) = effects.get(id) else {
        return;
    };
    let _ = writeln!(out, "{indent}{}", node.label(id));
    let inner = format!("{indent}  ");
    for dependency in &node.dependencies {
        let _ = writeln!(out, "{inner}<- {}", dependency.label());
    }
    for child in &node.children {
        write_tree(effects, *child, &inner, out);
    }
}

/// Handle to an effect, root or group node.
///
/// # Example
///
/// ```rust
/// use tendril_core::Context;
///
/// let cx = Context::new();
/// let count = cx.create_signal(0).name("count");
/// let count_clone = count.clone();
/// let effect = cx.create_effect(move || { count_clone.get(); }).name("printer");
///
/// assert!(effect.format_as_tree().contains("<- count"));
/// effect.cancel();
/// assert!(effect.is_cancelled());
/// ```
#[derive(Clone)]
pub struct EffectHandle {
    runtime: Weak<ContextInner>,
    id: EffectId,
}

impl EffectHandle {
    pub(crate) fn new(runtime: &Arc<ContextInner>, id: EffectId) -> Self {
        Self {
            runtime: Arc::downgrade(runtime),
            id,
        }
    }

    /// A handle to nothing, already cancelled.
    pub(crate) fn detached() -> Self {
        Self {
            runtime: Weak::new(),
            id: EffectId::default(),
        }
    }

    pub fn id(&self) -> EffectId {
        self.id
    }

    /// Cancel the effect and everything it owns, running pending cleanups.
    /// Idempotent.
    pub fn cancel(&self) {
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.cancel(self.id);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.runtime
            .upgrade()
            .map_or(true, |runtime| !runtime.effects.lock().contains_key(self.id))
    }

    /// Set a debug name, shown by [`format_as_tree`](EffectHandle::format_as_tree).
    pub fn name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    pub fn set_name(&self, name: impl Into<String>) {
        if let Some(runtime) = self.runtime.upgrade() {
            if let Some(node) = runtime.effects.lock().get_mut(self.id) {
                node.name = Some(name.into());
            }
        }
    }

    /// Number of completed runs.
    pub fn run_count(&self) -> u64 {
        self.runtime
            .upgrade()
            .and_then(|runtime| runtime.effects.lock().get(self.id).map(|node| node.runs))
            .unwrap_or(0)
    }

    /// Render the effect's ownership subtree and the dependencies of each
    /// node, one node per line.
    pub fn format_as_tree(&self) -> String {
        match self.runtime.upgrade() {
            Some(runtime) => runtime.format_tree(self.id),
            None => String::new(),
        }
    }
}

impl fmt::Debug for EffectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectHandle")
            .field("id", &self.id)
            .field("run_count", &self.run_count())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use crate::Context;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn effect_runs_on_creation() {
        let cx = Context::new();
        let run_count = Arc::new(AtomicI32::new(0));
        let run_count_clone = run_count.clone();

        let effect = cx.create_effect(move || {
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_reruns_when_dependency_changes() {
        let cx = Context::new();
        let count = cx.create_signal(0);
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_clone = seen.clone();
        let count_clone = count.clone();
        let effect = cx.create_effect(move || seen_clone.lock().push(count_clone.get()));

        count.set(1);
        count.set(2);
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert_eq!(effect.run_count(), 3);
    }

    #[test]
    fn equal_writes_do_not_rerun() {
        let cx = Context::new();
        let count = cx.create_signal(3);
        let effect = {
            let count = count.clone();
            cx.create_effect(move || {
                count.get();
            })
        };

        count.set(3);
        assert_eq!(effect.run_count(), 1);
    }

    #[test]
    fn effect_does_not_run_after_cancel() {
        let cx = Context::new();
        let count = cx.create_signal(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let run_count_clone = run_count.clone();
        let count_clone = count.clone();
        let effect = cx.create_effect(move || {
            count_clone.get();
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        effect.cancel();
        assert!(effect.is_cancelled());
        count.set(1);
        assert_eq!(run_count.load(Ordering::SeqCst), 1);
        assert_eq!(count.subscriber_count(), 0);
    }

    #[test]
    fn dropping_the_handle_keeps_the_effect() {
        let cx = Context::new();
        let count = cx.create_signal(0);
        let run_count = Arc::new(AtomicI32::new(0));

        let run_count_clone = run_count.clone();
        let count_clone = count.clone();
        drop(cx.create_effect(move || {
            count_clone.get();
            run_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        count.set(1);
        assert_eq!(run_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn tree_lists_names_dependencies_and_children() {
        let cx = Context::new();
        let outer_signal = cx.create_signal(0).name("outer");
        let inner_signal = cx.create_signal(0).name("inner");

        let cx_clone = cx.clone();
        let effect = cx
            .create_effect(move || {
                outer_signal.get();
                let inner_signal = inner_signal.clone();
                cx_clone.create_effect(move || {
                    inner_signal.get();
                });
            })
            .name("parent");

        let tree = effect.format_as_tree();
        let lines: Vec<&str> = tree.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("effect \"parent\""));
        assert!(lines[1].starts_with("  <- outer"));
        assert!(lines[2].starts_with("  effect "));
        assert!(lines[3].starts_with("    <- inner"));
    }

    #[test]
    fn post_effect_hook_sees_every_run() {
        let cx = Context::new();
        let count = cx.create_signal(0);
        let hooked = Arc::new(AtomicI32::new(0));

        let hooked_clone = hooked.clone();
        cx.set_post_effect_hook(move |handle| {
            assert!(!handle.is_cancelled());
            hooked_clone.fetch_add(1, Ordering::SeqCst);
        });

        let count_clone = count.clone();
        cx.create_effect(move || {
            count_clone.get();
        });
        count.set(1);
        assert_eq!(hooked.load(Ordering::SeqCst), 2);

        cx.clear_post_effect_hook();
        count.set(2);
        assert_eq!(hooked.load(Ordering::SeqCst), 2);
    }
}
