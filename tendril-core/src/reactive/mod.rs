//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos and
//! effects, all bound to a [`Context`].
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! while a body is recording, the body depends on it. When the value
//! changes, dependent effects re-run and dependent memos become dirty.
//!
//! ## Memos
//!
//! A Memo is a lazily evaluated, cached derivation. It recomputes only when
//! read after one of its dependencies actually changed, and it stops
//! propagation when it recomputes to an equal value.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that re-runs whenever its
//! dependencies change. Effects created inside another effect are nested:
//! they belong to that effect and are recreated on each of its runs.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: a thread-local stack of recording
//! frames captures every read, and each captured read subscribes the
//! recording body to the cell that was read.

pub(crate) mod context;
pub(crate) mod dependency;
mod effect;
mod memo;
mod readable;
pub(crate) mod runtime;
mod signal;
pub(crate) mod subscriber;

pub use effect::EffectHandle;
pub use memo::{Memo, MemoState};
pub use readable::{Mapped, ReadSignal, Readable};
pub(crate) use readable::Mapper;
pub use runtime::{Context, ContextId, PostEffectHook};
pub(crate) use runtime::RuntimeRef;
pub use signal::{CellId, Signal};
pub use subscriber::{Notify, Subscriber, SubscriberId, Subscription};
