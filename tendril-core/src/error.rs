//! Error types for the reactive runtime.
//!
//! Every error here is a usage error: a violation of the rules of the
//! reactive model that should terminate the current effect run. None of them
//! is transient, so there is nothing to retry.

use std::fmt;

use thiserror::Error;

use crate::reactive::CellId;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// A construct a memo body is not allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    /// `cleanup()` was called.
    Cleanup,
    /// An effect was created.
    NestedEffect,
    /// A signal was written.
    Write,
}

impl fmt::Display for SideEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SideEffect::Cleanup => "cleanup",
            SideEffect::NestedEffect => "nested effect",
            SideEffect::Write => "signal write",
        };
        f.write_str(name)
    }
}

/// Usage errors raised by the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReactiveError {
    /// A cell was read inside the recording that created it.
    ///
    /// The read would make the effect depend on a cell it recreates on
    /// every run. Read the cell from a nested effect instead.
    #[error("{cell} was read inside the recording that created it")]
    SelfDependency { cell: CellId },

    /// `cleanup()` was called while no effect was recording.
    #[error("cleanup was called outside of an effect")]
    CleanupOutsideEffect,

    /// A memo body used a construct that needs an owning effect.
    #[error("memo {memo} performed a side effect ({kind}); memo bodies must be pure")]
    MemoSideEffect { memo: CellId, kind: SideEffect },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
