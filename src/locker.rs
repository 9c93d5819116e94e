//! Capability traits shared by every lock strategy.
//!
//! Strategies are picked by constructing the factory you want; the traits
//! only describe what a handle can do once you have it.

use crate::cancel::CancelToken;
use crate::error::Result;

/// An in-memory lock that cannot fail or be cancelled.
///
/// Release happens when the guard returned by [`acquire`](Locker::acquire)
/// is dropped.
pub trait Locker {
    type Guard<'a>
    where
        Self: 'a;

    /// Block until the lock is held.
    fn acquire(&self) -> Self::Guard<'_>;

    /// Take the lock only if nobody holds it right now.
    fn try_acquire(&self) -> Option<Self::Guard<'_>>;

    /// Explicit form of dropping the guard.
    fn release(&self, guard: Self::Guard<'_>) {
        drop(guard);
    }
}

/// Observable lifecycle of a cancellable lock handle.
///
/// `Acquiring` and `Releasing` only exist inside a call, so they are not
/// represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Unlocked,
    Locked,
    /// A cancelled or failed acquire. Create a new handle to try again.
    Failed,
}

/// A lock whose acquisition may block indefinitely and therefore takes a
/// [`CancelToken`].
pub trait CancellableLocker {
    /// Block until the lock is held, the token fires, or an unexpected
    /// error occurs.
    fn acquire(&mut self, cancel: &CancelToken) -> Result<()>;

    /// A single non-blocking attempt. `Ok(false)` means someone else holds it.
    fn try_acquire(&mut self) -> Result<bool>;

    /// Give the lock back. Releasing a lock that is not held is not an error.
    ///
    /// Release always runs to completion; the token is accepted for symmetry
    /// with [`acquire`](Self::acquire).
    fn release(&mut self, cancel: &CancelToken) -> Result<()>;

    fn state(&self) -> LockState;
}

/// Factory of per-key in-memory locks.
pub trait KeyLocker {
    type Lock: Locker;

    fn get_lock(&self, key: &str) -> Self::Lock;
}

/// Factory of per-key cancellable locks.
pub trait CancellableKeyLocker {
    type Lock: CancellableLocker;

    fn get_lock(&self, key: &str) -> Self::Lock;
}
