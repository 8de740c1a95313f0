//! Tendril Core
//!
//! This crate provides the runtime for Tendril, a fine-grained reactive
//! state engine. It implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - Automatic dependency tracking and glitch-free propagation
//! - Nested effect ownership with cleanup
//! - Reactive lists, sets and maps with per-element reconciliation
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: The context, signals, memos, effects and dependency tracking
//! - `collections`: Reactive list, set and map signals
//! - `graph`: Effect arena and deferred notification queue
//! - `config`: Context options
//! - `error`: Usage errors reported by the runtime
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use tendril_core::prelude::*;
//!
//! let cx = Context::new();
//!
//! // Create a signal
//! let count = cx.create_signal(1);
//!
//! // Create a derived value
//! let count_clone = count.clone();
//! let doubled = cx.create_memo(move || count_clone.get() * 2);
//!
//! // Create an effect
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let seen_clone = seen.clone();
//! cx.create_effect(move || seen_clone.lock().push(doubled.get()));
//!
//! // Update the signal; the effect re-runs
//! count.set(5);
//! assert_eq!(*seen.lock(), vec![2, 10]);
//! ```

pub mod collections;
pub mod config;
pub mod error;
mod graph;
pub mod reactive;

pub use collections::{ListSignal, MapSignal, MappedList, MappedMap, MappedSet, SetSignal};
pub use config::ContextOptions;
pub use error::{ReactiveError, Result, SideEffect};
pub use graph::EffectId;
pub use reactive::{
    CellId, Context, ContextId, EffectHandle, Mapped, Memo, MemoState, PostEffectHook, ReadSignal,
    Readable, Signal,
};

/// Everything needed to build reactive state, in one import.
pub mod prelude {
    pub use crate::collections::{ListSignal, MapSignal, SetSignal};
    pub use crate::reactive::{
        Context, EffectHandle, Mapped, Memo, ReadSignal, Readable, Signal,
    };
}
