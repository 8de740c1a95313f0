//! Deferred Write Queue
//!
//! Writes performed while a body is recording are not delivered right away.
//! They are queued on the recording and drained once the body has finished.
//!
//! # Algorithm
//!
//! The queue holds producers, one per write, in write order:
//!
//! 1. Pop the oldest producer and take its snapshot of subscribers
//! 2. Run each subscriber that is still active inside its own frame
//! 3. Append the writes that subscriber performed to the back of the queue
//! 4. Collect the effects it created
//! 5. Repeat until the queue is empty
//!
//! A write therefore reaches its observers only after every earlier write has
//! reached theirs, including writes made by those observers.

use std::collections::VecDeque;

use smallvec::SmallVec;

use super::node::EffectId;
use crate::reactive::context::{Capture, Producer};
use crate::reactive::subscriber::Subscriber;

/// FIFO of pending write notifications.
pub(crate) struct DeferredQueue {
    pending: VecDeque<Producer>,
    spawned: SmallVec<[EffectId; 4]>,
}

impl DeferredQueue {
    pub(crate) fn new(pending: VecDeque<Producer>) -> Self {
        Self {
            pending,
            spawned: SmallVec::new(),
        }
    }

    /// Drain the queue. `run_job` notifies one subscriber inside a fresh
    /// frame and returns what that frame captured.
    ///
    /// Returns the effects created by jobs; they have not run yet.
    pub(crate) fn drain(
        mut self,
        mut run_job: impl FnMut(&Subscriber) -> Capture,
    ) -> SmallVec<[EffectId; 4]> {
        while let Some(producer) = self.pending.pop_front() {
            for subscriber in producer() {
                if !subscriber.is_active() {
                    continue;
                }
                let capture = run_job(&subscriber);
                self.pending.extend(capture.deferred);
                self.spawned.extend(capture.nested);
            }
        }
        self.spawned
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
