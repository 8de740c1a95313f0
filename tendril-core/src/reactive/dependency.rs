//! Dependency records.
//!
//! A [`Dependency`] is created each time a cell is read while a recording is
//! active. It remembers the value that was observed so the runtime can later
//! ask whether the cell has actually moved on. That question is what lets a
//! memo that recomputes to an equal value stop propagation.

use std::fmt;
use std::sync::Arc;

use super::readable::Readable;
use super::signal::CellId;
use super::subscriber::{Notify, Subscription};

/// Type-erased view of one observed read.
trait Probe: Send + Sync {
    fn is_changed(&self) -> bool;
    fn on_dirty_effect(&self, notify: Notify) -> Subscription;
    fn propagate_dirty(&self, notify: Notify) -> Subscription;
}

struct Observed<R, T> {
    source: R,
    last: T,
}

impl<R, T> Probe for Observed<R, T>
where
    R: Readable<T>,
    T: PartialEq + Send + Sync,
{
    fn is_changed(&self) -> bool {
        self.source.get_untracked() != self.last
    }

    fn on_dirty_effect(&self, notify: Notify) -> Subscription {
        self.source.on_dirty_effect(notify)
    }

    fn propagate_dirty(&self, notify: Notify) -> Subscription {
        self.source.propagate_dirty(notify)
    }
}

/// A cell read together with the value the reader observed.
#[derive(Clone)]
pub(crate) struct Dependency {
    cell: CellId,
    label: Option<Arc<str>>,
    probe: Arc<dyn Probe>,
}

impl Dependency {
    pub(crate) fn new<R, T>(cell: CellId, label: Option<Arc<str>>, source: R, last: T) -> Self
    where
        R: Readable<T> + 'static,
        T: PartialEq + Send + Sync + 'static,
    {
        Self {
            cell,
            label,
            probe: Arc::new(Observed { source, last }),
        }
    }

    pub(crate) fn cell(&self) -> CellId {
        self.cell
    }

    /// Whether the cell's current value differs from the observed one.
    ///
    /// For a memo this may recompute the memo.
    pub(crate) fn is_changed(&self) -> bool {
        self.probe.is_changed()
    }

    pub(crate) fn on_dirty_effect(&self, notify: Notify) -> Subscription {
        self.probe.on_dirty_effect(notify)
    }

    pub(crate) fn propagate_dirty(&self, notify: Notify) -> Subscription {
        self.probe.propagate_dirty(notify)
    }

    /// Cell name when one was set, otherwise its id.
    pub(crate) fn label(&self) -> String {
        match &self.label {
            Some(name) => format!("{name} ({})", self.cell),
            None => self.cell.to_string(),
        }
    }
}

impl fmt::Debug for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dependency")
            .field("cell", &self.cell)
            .field("label", &self.label)
            .finish()
    }
}
