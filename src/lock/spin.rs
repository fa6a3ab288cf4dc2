//! Test-and-set spinlock.

use std::sync::atomic::Ordering;

use super::sys::{spin_wait, AtomicBool};
use super::RawLock;

/// A test-and-set spinlock.
///
/// Acquire attempts a compare-exchange on a single flag and, while the flag
/// is held, waits on plain loads (test-and-test-and-set) so the waiting
/// cacheline stays shared instead of bouncing.
///
/// The caller-visible contract is "block until ownership granted"; spinning
/// is an implementation detail. Suitable for short critical sections only.
#[derive(Debug, Default)]
pub struct SpinLock {
    locked: AtomicBool,
}

impl SpinLock {
    /// Create an unlocked spinlock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Whether the lock is currently held by someone.
    ///
    /// Momentary snapshot; only meaningful for diagnostics.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl RawLock for SpinLock {
    type Token = ();

    fn acquire(&self) {
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            while self.locked.load(Ordering::Relaxed) {
                spin_wait();
            }
        }
    }

    fn release(&self, (): ()) {
        self.locked.store(false, Ordering::Release);
    }
}
