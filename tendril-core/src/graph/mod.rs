//! Effect Graph
//!
//! This module holds the ownership tree of effects and the queue that
//! delivers deferred writes to them.
//!
//! # Overview
//!
//! Every context owns an arena of [`EffectNode`]s keyed by [`EffectId`]:
//!
//! - Effect nodes re-run their body when a dependency changes
//! - Root nodes own whatever a `Context::run` block created
//! - Group nodes own the per-element effects of a collection reconciler
//!
//! Edges run from owner to owned. Cancelling a node cancels its subtree.
//! Dependency edges are not stored here: they live in the subscriber lists
//! of the cells themselves.

mod node;
mod scheduler;

pub use node::EffectId;
pub(crate) use node::{Body, DependencyFilter, EffectNode, Owned};
pub(crate) use scheduler::DeferredQueue;
