//! Cancellation tokens for blocking lock acquisition.
//!
//! A [`CancelToken`] is shared between the thread waiting on a lock and
//! whoever may want to abort that wait. Waiting is a condvar wait bounded by
//! the retry interval, so a cancel wakes the waiter immediately instead of
//! after the next poll.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a token stopped a wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// [`CancelToken::cancel`] was called.
    Cancelled,
    /// The token's deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Cancelled => f.write_str("operation cancelled"),
            CancelReason::DeadlineExceeded => f.write_str("deadline exceeded"),
        }
    }
}

#[derive(Debug)]
struct Inner {
    reason: Mutex<Option<CancelReason>>,
    wakeup: Condvar,
    deadline: Option<Instant>,
}

/// Cloneable cancellation signal. All clones observe the same state.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A token that is never cancelled unless someone calls [`cancel`](Self::cancel).
    pub fn never() -> Self {
        Self::new()
    }

    /// A token that cancels itself with [`CancelReason::DeadlineExceeded`] at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    /// A timeout too large to represent as an `Instant` means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Instant::now().checked_add(timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                reason: Mutex::new(None),
                wakeup: Condvar::new(),
                deadline,
            }),
        }
    }

    /// Cancel the token and wake every thread waiting on it.
    ///
    /// The first reason wins; cancelling twice keeps the original reason.
    pub fn cancel(&self) {
        let mut reason = self.inner.reason.lock();
        if reason.is_none() {
            *reason = Some(CancelReason::Cancelled);
        }
        drop(reason);
        self.inner.wakeup.notify_all();
    }

    pub fn reason(&self) -> Option<CancelReason> {
        let reason = *self.inner.reason.lock();
        reason.or_else(|| self.expired())
    }

    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    fn expired(&self) -> Option<CancelReason> {
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Sleep for `interval` unless the token fires first.
    ///
    /// Returns `Ok(())` once the full interval elapsed, or the token's reason
    /// as soon as it is cancelled or its deadline passes.
    pub fn wait(&self, interval: Duration) -> Result<(), CancelReason> {
        // None: neither the interval nor a deadline ends the wait
        let until = match (Instant::now().checked_add(interval), self.inner.deadline) {
            (Some(end), Some(deadline)) => Some(end.min(deadline)),
            (end, deadline) => end.or(deadline),
        };

        let mut reason = self.inner.reason.lock();
        loop {
            if let Some(reason) = *reason {
                return Err(reason);
            }
            if let Some(expired) = self.expired() {
                return Err(expired);
            }
            match until {
                Some(until) if Instant::now() >= until => return Ok(()),
                Some(until) => {
                    self.inner.wakeup.wait_until(&mut reason, until);
                }
                None => self.inner.wakeup.wait(&mut reason),
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
