//! FIFO array-based queuing lock.

use std::sync::atomic::Ordering;

use crossbeam_utils::CachePadded;

use super::sys::{spin_wait, AtomicBool, AtomicUsize};
use super::RawLock;

/// An array-based queuing lock granting ownership in FIFO order.
///
/// Each acquisition draws a ticket from a monotonically increasing counter
/// and waits on its own slot of a flag array; release passes the baton to the
/// next slot. Waiters therefore spin on distinct cachelines
/// ([`CachePadded`]) and ownership is granted strictly in arrival order.
///
/// The ticket is returned to the caller as the acquisition token instead of
/// being stashed in thread-local state, so a single thread can drive several
/// acquire/release pairs (e.g. in tests) and the pairing is explicit.
///
/// # Capacity
///
/// The slot array bounds the number of *simultaneous* contenders. With more
/// than `slots` threads inside `acquire` at once, two tickets alias the same
/// slot and the lock misbehaves. Capacity is rounded up to a power of two so
/// that ticket-counter wraparound keeps the slot sequence contiguous.
#[derive(Debug)]
pub struct FifoLock {
    flags: Box<[CachePadded<AtomicBool>]>,
    tail: AtomicUsize,
}

impl FifoLock {
    /// Default number of slots, enough for typical thread counts.
    pub const DEFAULT_SLOTS: usize = 64;

    /// Create a queuing lock supporting up to `slots` simultaneous
    /// contenders (rounded up to the next power of two).
    ///
    /// # Panics
    ///
    /// Panics if `slots` is zero.
    #[must_use]
    pub fn new(slots: usize) -> Self {
        assert!(slots > 0, "queuing lock needs at least one slot");
        let slots = slots.next_power_of_two();

        let flags: Box<[CachePadded<AtomicBool>]> = (0..slots)
            // Slot 0 starts open: the first ticket acquires immediately.
            .map(|i| CachePadded::new(AtomicBool::new(i == 0)))
            .collect();

        Self {
            flags,
            tail: AtomicUsize::new(0),
        }
    }

    /// Number of slots (maximum simultaneous contenders).
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.flags.len()
    }

    #[inline]
    fn slot_of(&self, ticket: usize) -> usize {
        // Power-of-two capacity, so the mask stays contiguous across
        // ticket-counter wraparound.
        ticket & (self.flags.len() - 1)
    }
}

impl Default for FifoLock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLOTS)
    }
}

impl RawLock for FifoLock {
    type Token = usize;

    fn acquire(&self) -> usize {
        let ticket = self.tail.fetch_add(1, Ordering::Relaxed);
        let slot = self.slot_of(ticket);

        while !self.flags[slot].load(Ordering::Acquire) {
            spin_wait();
        }
        // Consume the grant so the slot can be reused a full cycle later.
        self.flags[slot].store(false, Ordering::Relaxed);

        slot
    }

    fn release(&self, slot: usize) {
        let next = self.slot_of(slot.wrapping_add(1));
        self.flags[next].store(true, Ordering::Release);
    }
}
