//! Effect Nodes
//!
//! This module defines the nodes that live in a context's effect arena.

use std::sync::Arc;

use indexmap::IndexSet;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::reactive::context::Cleanup;
use crate::reactive::dependency::Dependency;
use crate::reactive::subscriber::Subscription;
use crate::reactive::CellId;

new_key_type! {
    /// Identifier of an effect node within its context.
    pub struct EffectId;
}

/// An effect body.
pub(crate) type Body = Arc<dyn Fn() + Send + Sync>;

/// The kind of node in the effect arena.
#[derive(Clone)]
pub(crate) enum NodeKind {
    /// A re-runnable effect.
    Effect(Body),

    /// The owner created by `Context::run`. Never re-runs.
    Root,

    /// The owner of a collection's per-element effects. Never re-runs.
    Group,
}

impl NodeKind {
    fn describe(&self) -> &'static str {
        match self {
            NodeKind::Effect(_) => "effect",
            NodeKind::Root => "root",
            NodeKind::Group => "group",
        }
    }
}

/// Cells a nested effect must not subscribe to.
///
/// A nested effect ignores every cell one of its ancestors already depends
/// on: the ancestor re-runs on such a change and recreates the nested effect
/// anyway.
#[derive(Clone, Default)]
pub(crate) struct DependencyFilter(Option<Arc<IndexSet<CellId>>>);

impl DependencyFilter {
    pub(crate) fn admits(&self, cell: CellId) -> bool {
        self.0.as_ref().map_or(true, |excluded| !excluded.contains(&cell))
    }

    /// This filter plus `cells`.
    pub(crate) fn extend(&self, cells: impl IntoIterator<Item = CellId>) -> Self {
        let mut excluded = self.0.as_deref().cloned().unwrap_or_default();
        excluded.extend(cells);
        if excluded.is_empty() {
            Self(None)
        } else {
            Self(Some(Arc::new(excluded)))
        }
    }
}

/// Resources a node holds from its last run.
#[derive(Default)]
pub(crate) struct Owned {
    pub(crate) subscriptions: SmallVec<[Subscription; 4]>,
    pub(crate) children: SmallVec<[EffectId; 4]>,
    pub(crate) cleanups: Vec<Cleanup>,
}

/// A node in the effect arena.
pub(crate) struct EffectNode {
    pub(crate) kind: NodeKind,
    pub(crate) name: Option<String>,
    pub(crate) parent: Option<EffectId>,
    pub(crate) filter: DependencyFilter,
    /// Dependencies of the last run, kept for tree dumps.
    pub(crate) dependencies: Vec<Dependency>,
    pub(crate) subscriptions: SmallVec<[Subscription; 4]>,
    pub(crate) children: SmallVec<[EffectId; 4]>,
    pub(crate) cleanups: Vec<Cleanup>,
    pub(crate) runs: u64,
}

impl EffectNode {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            name: None,
            parent: None,
            filter: DependencyFilter::default(),
            dependencies: Vec::new(),
            subscriptions: SmallVec::new(),
            children: SmallVec::new(),
            cleanups: Vec::new(),
            runs: 0,
        }
    }

    /// A new, not yet run effect.
    pub(crate) fn effect(body: Body) -> Self {
        Self::new(NodeKind::Effect(body))
    }

    pub(crate) fn root() -> Self {
        Self::new(NodeKind::Root)
    }

    pub(crate) fn group() -> Self {
        Self::new(NodeKind::Group)
    }

    /// The body, if this node re-runs.
    pub(crate) fn body(&self) -> Option<Body> {
        match &self.kind {
            NodeKind::Effect(body) => Some(Arc::clone(body)),
            NodeKind::Root | NodeKind::Group => None,
        }
    }

    /// Detach everything the last run acquired.
    pub(crate) fn take_owned(&mut self) -> Owned {
        self.dependencies.clear();
        Owned {
            subscriptions: std::mem::take(&mut self.subscriptions),
            children: std::mem::take(&mut self.children),
            cleanups: std::mem::take(&mut self.cleanups),
        }
    }

    pub(crate) fn label(&self, id: EffectId) -> String {
        match &self.name {
            Some(name) => format!("{} \"{}\" {:?}", self.kind.describe(), name, id),
            None => format!("{} {:?}", self.kind.describe(), id),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
