//! Mutual-exclusion primitives for per-node locking.
//!
//! The set variants consume a generic mutual-exclusion capability through
//! [`RawLock`]: acquire blocks until exclusive ownership is obtained, release
//! relinquishes it. There is no ownership transfer and no fairness
//! requirement in the trait itself; the concrete primitive decides both.
//!
//! Two primitives are provided:
//! - [`SpinLock`]: test-and-set with a test-and-test-and-set wait loop. The
//!   default node lock.
//! - [`FifoLock`]: array-based queuing lock. Grants ownership in ticket
//!   (FIFO) order under contention.
//!
//! # Tokens
//!
//! `acquire` returns a [`RawLock::Token`] that `release` consumes. For the
//! spinlock the token is `()`; for the queuing lock it is the slot ticket the
//! acquisition was assigned. Carrying the ticket in the token - rather than
//! in thread-local state - keeps the acquire/release pair referentially
//! transparent and testable without real threads.
//!
//! # Scoped Acquisition
//!
//! Callers should prefer [`RawLock::lock`], which returns a [`Held`] guard
//! releasing the lock on every exit path, including unwinding. A critical
//! section is then exactly the guard's lifetime.

mod queue;
mod spin;


pub use queue::FifoLock;
pub use spin::SpinLock;

// Under loom the primitives use loom's atomics and scheduler-visible yields
// so their interleavings can be model checked.
#[cfg(loom)]
pub(crate) mod sys {
    pub(crate) use loom::sync::atomic::{AtomicBool, AtomicUsize};

    pub(crate) fn spin_wait() {
        loom::thread::yield_now();
    }
}

#[cfg(not(loom))]
pub(crate) mod sys {
    pub(crate) use std::sync::atomic::{AtomicBool, AtomicUsize};

    pub(crate) fn spin_wait() {
        std::hint::spin_loop();
    }
}

/// A blocking mutual-exclusion capability.
///
/// `acquire` suspends the caller until exclusive ownership is granted; the
/// underlying primitive is free to spin internally. `release` relinquishes
/// ownership and must be passed the token the matching `acquire` returned.
pub trait RawLock: Send + Sync {
    /// Per-acquisition context returned by [`RawLock::acquire`] and consumed
    /// by [`RawLock::release`].
    type Token;

    /// Block until exclusive ownership is obtained.
    fn acquire(&self) -> Self::Token;

    /// Relinquish ownership.
    ///
    /// `token` must come from the `acquire` call that granted the ownership
    /// being released; releasing with a foreign token corrupts the lock
    /// state (the type system prevents this for callers going through
    /// [`RawLock::lock`]).
    fn release(&self, token: Self::Token);

    /// Acquire the lock for the duration of the returned guard.
    #[must_use = "dropping the guard immediately releases the lock"]
    fn lock(&self) -> Held<'_, Self>
    where
        Self: Sized,
    {
        let token = self.acquire();
        Held {
            lock: self,
            token: Some(token),
        }
    }
}

/// Scoped ownership of a [`RawLock`].
///
/// Releases the lock when dropped, including during unwinding, so a critical
/// section can never leak the lock on an early exit path.
#[must_use = "dropping the guard immediately releases the lock"]
pub struct Held<'a, L: RawLock> {
    lock: &'a L,
    token: Option<L::Token>,
}

impl<L: RawLock> Drop for Held<'_, L> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.lock.release(token);
        }
    }
}
