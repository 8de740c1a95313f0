//! Read-side abstraction shared by signals, memos and views.

use std::fmt;
use std::sync::Arc;

use super::subscriber::{Notify, Subscription};
use crate::error::Result;

/// Anything that can be read reactively.
///
/// Implemented by [`Signal`](crate::Signal), [`Memo`](crate::Memo),
/// [`ReadSignal`] and [`Mapped`].
pub trait Readable<T>: Send + Sync {
    /// Read the value, registering a dependency on the recording body.
    fn try_get(&self) -> Result<T>;

    /// Read the value without registering a dependency.
    fn get_untracked(&self) -> T;

    /// Subscribe to write notifications, delivered after the writing body
    /// finishes. Effects use this list.
    fn on_dirty_effect(&self, notify: Notify) -> Subscription;

    /// Subscribe to synchronous dirty marking. Memos use this list.
    fn propagate_dirty(&self, notify: Notify) -> Subscription;

    /// Panicking form of [`try_get`](Readable::try_get).
    fn get(&self) -> T {
        match self.try_get() {
            Ok(value) => value,
            Err(err) => panic!("{err}"),
        }
    }

    /// A storage-free view applying `mapper` to every read.
    fn map<U, F>(&self, mapper: F) -> Mapped<T, U>
    where
        Self: Clone + Sized + 'static,
        T: 'static,
        U: 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Mapped::new(self.clone(), mapper)
    }
}

/// A type-erased, read-only handle to any [`Readable`].
pub struct ReadSignal<T> {
    source: Arc<dyn Readable<T>>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn new(source: impl Readable<T> + 'static) -> Self {
        Self {
            source: Arc::new(source),
        }
    }
}

impl<T> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> Readable<T> for ReadSignal<T> {
    fn try_get(&self) -> Result<T> {
        self.source.try_get()
    }

    fn get_untracked(&self) -> T {
        self.source.get_untracked()
    }

    fn on_dirty_effect(&self, notify: Notify) -> Subscription {
        self.source.on_dirty_effect(notify)
    }

    fn propagate_dirty(&self, notify: Notify) -> Subscription {
        self.source.propagate_dirty(notify)
    }
}

impl<T> fmt::Debug for ReadSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadSignal").finish_non_exhaustive()
    }
}

pub(crate) type Mapper<T, U> = Arc<dyn Fn(T) -> U + Send + Sync>;

/// A derived read with no storage of its own.
///
/// Reading a `Mapped` reads its source, so the dependency lands on the
/// source cell. The mapper runs on every read.
pub struct Mapped<T, U> {
    source: ReadSignal<T>,
    mapper: Mapper<T, U>,
}

impl<T: 'static, U: 'static> Mapped<T, U> {
    pub fn new<F>(source: impl Readable<T> + 'static, mapper: F) -> Self
    where
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        Self::from_parts(ReadSignal::new(source), Arc::new(mapper))
    }

    pub(crate) fn from_parts(source: ReadSignal<T>, mapper: Mapper<T, U>) -> Self {
        Self { source, mapper }
    }
}

impl<T, U> Clone for Mapped<T, U> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            mapper: Arc::clone(&self.mapper),
        }
    }
}

impl<T, U> Readable<U> for Mapped<T, U> {
    fn try_get(&self) -> Result<U> {
        self.source.try_get().map(|value| (self.mapper)(value))
    }

    fn get_untracked(&self) -> U {
        (self.mapper)(self.source.get_untracked())
    }

    fn on_dirty_effect(&self, notify: Notify) -> Subscription {
        self.source.on_dirty_effect(notify)
    }

    fn propagate_dirty(&self, notify: Notify) -> Subscription {
        self.source.propagate_dirty(notify)
    }
}

impl<T, U> fmt::Debug for Mapped<T, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mapped").finish_non_exhaustive()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
