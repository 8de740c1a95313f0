//! Recording frames.
//!
//! While an effect body, a root block or a memo body runs, every read, write,
//! nested effect and cleanup it performs is captured into a frame on a
//! thread-local stack. When the body returns, the frame is popped and its
//! [`Capture`] is handed back to the runtime that opened it.
//!
//! # Implementation
//!
//! Frames are tagged with the [`ContextId`] of the context that pushed them.
//! A cell only records into the top frame, and only when that frame belongs
//! to the cell's own context. Reads of a foreign context's cells therefore
//! behave as if nothing were recording.
//!
//! Frames are pushed by [`Recording::enter`] and popped either by
//! [`Recording::finish`] or by the guard's `Drop`, so a panicking body never
//! leaves a stale frame behind.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::dependency::Dependency;
use super::runtime::ContextId;
use super::signal::CellId;
use super::subscriber::Subscriber;
use crate::error::{ReactiveError, Result, SideEffect};
use crate::graph::EffectId;

/// Deferred cleanup registered by an effect body.
pub(crate) type Cleanup = Box<dyn FnOnce() + Send>;

/// A deferred write notification.
///
/// The subscriber list is snapshotted when the producer is drained, not when
/// the write happens, so effects subscribed in between are still reached.
pub(crate) type Producer = Box<dyn FnOnce() -> Vec<Arc<Subscriber>> + Send>;

thread_local! {
    static RECORDING_STACK: RefCell<Vec<Frame>> = RefCell::new(Vec::new());
}

/// Identity of a recording, used to detect self-dependencies.
///
/// Effect recordings are identified by the effect, so every run of the same
/// effect counts as the same recording. All other recordings get a fresh
/// token each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordingId {
    Effect(EffectId),
    Token(u64),
}

fn next_token() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// What kind of body a frame is recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Scope {
    /// An effect body.
    Effect(EffectId),
    /// A block passed to `Context::run`, or a synchronous flush.
    Root(u64),
    /// A memo body.
    Memo { memo: CellId, token: u64 },
    /// One job of a deferred write queue.
    Drain(u64),
    /// Recording suspended by `untracked`.
    Untracked,
}

impl Scope {
    pub(crate) fn root() -> Self {
        Scope::Root(next_token())
    }

    pub(crate) fn memo(memo: CellId) -> Self {
        Scope::Memo {
            memo,
            token: next_token(),
        }
    }

    pub(crate) fn drain() -> Self {
        Scope::Drain(next_token())
    }

    fn recording(&self) -> Option<RecordingId> {
        match *self {
            Scope::Effect(id) => Some(RecordingId::Effect(id)),
            Scope::Root(token) | Scope::Drain(token) => Some(RecordingId::Token(token)),
            Scope::Memo { token, .. } => Some(RecordingId::Token(token)),
            Scope::Untracked => None,
        }
    }
}

/// Everything a body did while its frame was on top of the stack.
#[derive(Default)]
pub(crate) struct Capture {
    /// Cells read, keyed by cell; a repeated read keeps the latest value.
    pub(crate) dependencies: IndexMap<CellId, Dependency>,
    /// Effects created, in creation order. Not yet run.
    pub(crate) nested: SmallVec<[EffectId; 4]>,
    /// Write notifications, in write order.
    pub(crate) deferred: VecDeque<Producer>,
    /// Cleanups registered via `cleanup()`.
    pub(crate) cleanups: Vec<Cleanup>,
}

impl Capture {
    /// The first construct a pure body must not have used, if any.
    pub(crate) fn side_effect(&self) -> Option<SideEffect> {
        if !self.cleanups.is_empty() {
            Some(SideEffect::Cleanup)
        } else if !self.nested.is_empty() {
            Some(SideEffect::NestedEffect)
        } else if !self.deferred.is_empty() {
            Some(SideEffect::Write)
        } else {
            None
        }
    }
}

struct Frame {
    context: ContextId,
    scope: Scope,
    capture: Capture,
}

/// Guard for a pushed frame.
pub(crate) struct Recording {
    scope: Scope,
    finished: bool,
}

impl Recording {
    /// Push a frame for `scope`.
    pub(crate) fn enter(context: ContextId, scope: Scope) -> Self {
        RECORDING_STACK.with(|stack| {
            stack.borrow_mut().push(Frame {
                context,
                scope,
                capture: Capture::default(),
            });
        });
        Self {
            scope,
            finished: false,
        }
    }

    /// Pop the frame and return what it captured.
    pub(crate) fn finish(mut self) -> Capture {
        self.finished = true;
        self.pop().unwrap_or_default()
    }

    fn pop(&self) -> Option<Capture> {
        RECORDING_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            popped.map(|frame| {
                debug_assert_eq!(
                    frame.scope, self.scope,
                    "Recording mismatch: expected {:?}, got {:?}",
                    self.scope, frame.scope
                );
                frame.capture
            })
        })
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        if !self.finished {
            self.pop();
        }
    }
}

/// Run `f` on the top frame if it belongs to `context`.
fn with_top<R>(context: ContextId, f: impl FnOnce(&mut Frame) -> R) -> Option<R> {
    RECORDING_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.last_mut() {
            Some(frame) if frame.context == context => Some(f(frame)),
            _ => None,
        }
    })
}

/// The recording currently active for `context`, if any.
pub(crate) fn current_recording(context: ContextId) -> Option<RecordingId> {
    with_top(context, |frame| frame.scope.recording()).flatten()
}

/// Record a read of `cell`.
///
/// Fails when the active recording is the one that created the cell.
pub(crate) fn track(
    context: ContextId,
    cell: CellId,
    created_in: Option<RecordingId>,
    dependency: impl FnOnce() -> Dependency,
) -> Result<()> {
    with_top(context, |frame| {
        let Some(recording) = frame.scope.recording() else {
            return Ok(());
        };
        if created_in == Some(recording) {
            return Err(ReactiveError::SelfDependency { cell });
        }
        frame.capture.dependencies.insert(cell, dependency());
        Ok(())
    })
    .unwrap_or(Ok(()))
}

/// Queue a write notification on the active recording.
///
/// Hands the producer back when nothing is recording, in which case the
/// caller must flush it.
pub(crate) fn defer(context: ContextId, producer: Producer) -> Result<(), Producer> {
    let mut slot = Some(producer);
    let queued = with_top(context, |frame| {
        if frame.scope == Scope::Untracked {
            return false;
        }
        if let Some(producer) = slot.take() {
            frame.capture.deferred.push_back(producer);
        }
        true
    })
    .unwrap_or(false);

    match slot {
        Some(producer) if !queued => Err(producer),
        _ => Ok(()),
    }
}

/// Register a freshly created effect as nested in the active recording.
///
/// Returns `false` when nothing is recording and the effect must run now.
pub(crate) fn adopt(context: ContextId, effect: EffectId) -> bool {
    with_top(context, |frame| {
        if frame.scope == Scope::Untracked {
            return false;
        }
        frame.capture.nested.push(effect);
        true
    })
    .unwrap_or(false)
}

/// Register a cleanup on the effect or root block that is recording.
pub(crate) fn push_cleanup(context: ContextId, cleanup: Cleanup) -> Result<()> {
    with_top(context, |frame| match frame.scope {
        Scope::Effect(_) | Scope::Root(_) => {
            frame.capture.cleanups.push(cleanup);
            Ok(())
        }
        Scope::Memo { memo, .. } => Err(ReactiveError::MemoSideEffect {
            memo,
            kind: SideEffect::Cleanup,
        }),
        Scope::Drain(_) | Scope::Untracked => Err(ReactiveError::CleanupOutsideEffect),
    })
    .unwrap_or(Err(ReactiveError::CleanupOutsideEffect))
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> ContextId {
        ContextId::new()
    }

    #[test]
    fn frames_are_scoped_to_their_context() {
        let cx = context();
        let other = context();

        assert!(current_recording(cx).is_none());
        {
            let _frame = Recording::enter(cx, Scope::Root(1));
            assert_eq!(current_recording(cx), Some(RecordingId::Token(1)));
            assert!(current_recording(other).is_none());
        }
        assert!(current_recording(cx).is_none());
    }

    #[test]
    fn untracked_suspends_the_frame_below() {
        let cx = context();
        let _outer = Recording::enter(cx, Scope::Root(2));
        {
            let _untracked = Recording::enter(cx, Scope::Untracked);
            assert!(current_recording(cx).is_none());
            assert!(!adopt(cx, EffectId::default()));
            assert!(defer(cx, Box::new(Vec::new)).is_err());
        }
        assert_eq!(current_recording(cx), Some(RecordingId::Token(2)));
    }

    #[test]
    fn finish_returns_the_capture() {
        let cx = context();
        let frame = Recording::enter(cx, Scope::Root(3));
        assert!(adopt(cx, EffectId::default()));
        assert!(defer(cx, Box::new(Vec::new)).is_ok());
        assert!(push_cleanup(cx, Box::new(|| {})).is_ok());

        let capture = frame.finish();
        assert_eq!(capture.nested.len(), 1);
        assert_eq!(capture.deferred.len(), 1);
        assert_eq!(capture.cleanups.len(), 1);
        assert!(current_recording(cx).is_none());
    }

    #[test]
    fn cleanup_is_rejected_outside_effects() {
        let cx = context();
        assert_eq!(
            push_cleanup(cx, Box::new(|| {})),
            Err(ReactiveError::CleanupOutsideEffect)
        );

        let memo = CellId::from(11);
        let _frame = Recording::enter(cx, Scope::memo(memo));
        assert_eq!(
            push_cleanup(cx, Box::new(|| {})),
            Err(ReactiveError::MemoSideEffect {
                memo,
                kind: SideEffect::Cleanup
            })
        );
    }

    #[test]
    fn panicking_body_pops_its_frame() {
        let cx = context();
        let result = std::panic::catch_unwind(|| {
            let _frame = Recording::enter(cx, Scope::Root(4));
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(current_recording(cx).is_none());
    }
}
