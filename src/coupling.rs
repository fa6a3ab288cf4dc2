//! Fine-grained lock-coupling variant.
//!
//! Every operation - reads included - descends the chain hand-over-hand:
//! the lock on the next node is taken while the current node's lock is still
//! held, so at most two adjacent locks are held at any moment and they are
//! always acquired in ascending-key order. That total order on acquisition
//! is what rules out circular wait.
//!
//! # Protocol
//!
//! ```text
//! 1. head_lock.lock()                  // set-level lock, guards head read only
//! 2. lock(head); head_lock released    // couple into per-node locks
//! 3. lock(head.next)
//! 4. while curr.key < key: release(prev), advance, lock(new curr)
//! 5. apply under (prev, curr) locks    // no validation, no retry
//! 6. release both
//! ```
//!
//! The set-level lock in step 1 is deliberately a *partial* critical section:
//! it only makes the head read safe before the per-node coupling takes over.
//! Widening it to cover the whole traversal would serialize every operation
//! and change the variant's concurrency characteristics.
//!
//! Contention here manifests as wait time, never as a retry: the coupled
//! window guarantees each operation a consistent view of the pair it
//! mutates. Removal frees the victim immediately - any thread that could
//! contend for the victim's lock would first have to hold the predecessor's
//! lock, which the remover still owns.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize};

use crate::lock::{Held, RawLock, SpinLock};
use crate::ordering::{COUNT_ORD, LOCKED_ORD, WRITE_ORD};
use crate::set::{debug_assert_storable, ConcurrentSet, MAX_SENTINEL, MIN_SENTINEL};
use crate::tracing_helpers::trace_log;

struct Node<L> {
    key: i64,
    lock: L,
    /// Only read and written while this node's lock (and, for writes, the
    /// predecessor's) is held.
    next: AtomicPtr<Node<L>>,
}

impl<L: RawLock + Default> Node<L> {
    fn boxed(key: i64, next: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Self {
            key,
            lock: L::default(),
            next: AtomicPtr::new(next),
        }))
    }
}

/// The bracketing pair located by a coupled traversal, with both locks held.
/// Dropping the pair releases both locks.
struct LockedPair<'a, L: RawLock> {
    prev: &'a Node<L>,
    curr: &'a Node<L>,
    prev_held: Held<'a, L>,
    curr_held: Held<'a, L>,
}

/// Concurrent sorted set using hand-over-hand lock coupling.
///
/// All operations block; none retry. Reads are not optimized - `contains`
/// performs the same coupled traversal as the writers.
pub struct CouplingSet<L: RawLock = SpinLock> {
    head: *mut Node<L>,
    /// Set-level lock guarding only the initial head read.
    head_lock: L,
    len: AtomicUsize,
}

// SAFETY: the raw head pointer is what defeats the auto impls. All shared
// mutable state behind it is accessed under per-node locks (or, for the
// diagnostic walks, under `&mut self`), and `L: RawLock` is already
// `Send + Sync`.
unsafe impl<L: RawLock> Send for CouplingSet<L> {}
unsafe impl<L: RawLock> Sync for CouplingSet<L> {}

impl<L: RawLock + Default> CouplingSet<L> {
    /// Create an empty set: a head and tail sentinel and nothing between.
    #[must_use]
    pub fn new() -> Self {
        let tail = Node::boxed(MAX_SENTINEL, ptr::null_mut());
        let head = Node::boxed(MIN_SENTINEL, tail);
        Self {
            head,
            head_lock: L::default(),
            len: AtomicUsize::new(0),
        }
    }
}

impl<L: RawLock + Default> Default for CouplingSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawLock> CouplingSet<L> {
    /// Coupled descent to the unique pair with
    /// `prev.key < key <= curr.key`. Returns with both locks held.
    fn locate(&self, key: i64) -> LockedPair<'_, L> {
        let head_held = self.head_lock.lock();
        // SAFETY: the head sentinel lives as long as the set.
        let mut prev: &Node<L> = unsafe { &*self.head };
        let mut prev_held = prev.lock.lock();
        drop(head_held);

        // SAFETY: a locked node below the tail sentinel has a non-null
        // successor, and the successor cannot be unlinked or freed while we
        // hold this node's lock.
        let mut curr: &Node<L> = unsafe { &*prev.next.load(LOCKED_ORD) };
        let mut curr_held = curr.lock.lock();

        while curr.key < key {
            // curr.key < key < MAX_SENTINEL, so curr is not the tail and
            // curr.next is non-null.
            // SAFETY: protected by curr's lock, as above.
            let next: &Node<L> = unsafe { &*curr.next.load(LOCKED_ORD) };
            prev = curr;
            prev_held = curr_held; // releases the old predecessor's lock
            curr = next;
            curr_held = curr.lock.lock();
        }

        LockedPair {
            prev,
            curr,
            prev_held,
            curr_held,
        }
    }
}

impl<L: RawLock + Default> ConcurrentSet for CouplingSet<L> {
    fn contains(&self, key: i64) -> bool {
        debug_assert_storable(key);
        let pair = self.locate(key);
        pair.curr.key == key
        // Both locks release here.
    }

    fn add(&self, key: i64) -> bool {
        debug_assert_storable(key);
        let pair = self.locate(key);
        if pair.curr.key == key {
            return false;
        }

        let node = Node::boxed(key, ptr::from_ref(pair.curr).cast_mut());
        pair.prev.next.store(node, WRITE_ORD);
        self.len.fetch_add(1, COUNT_ORD);
        trace_log!(key, "coupling: spliced new node");
        true
    }

    fn remove(&self, key: i64) -> bool {
        debug_assert_storable(key);
        let LockedPair {
            prev,
            curr,
            prev_held,
            curr_held,
        } = self.locate(key);

        if curr.key != key {
            return false;
        }

        prev.next.store(curr.next.load(LOCKED_ORD), WRITE_ORD);
        self.len.fetch_sub(1, COUNT_ORD);
        trace_log!(key, "coupling: unlinked node");

        let victim: *mut Node<L> = ptr::from_ref(curr).cast_mut();
        drop(curr_held);
        // SAFETY: the victim is unlinked and we were the last to hold its
        // lock. Any thread that could try to lock it would have to hold the
        // predecessor's lock first, which we still do.
        unsafe { drop(Box::from_raw(victim)) };
        drop(prev_held);
        true
    }

    fn len(&self) -> usize {
        self.len.load(COUNT_ORD)
    }

    fn keys(&mut self) -> Vec<i64> {
        let mut out = Vec::with_capacity(self.len());
        // SAFETY: `&mut self` means no operation is in flight; plain walk.
        unsafe {
            let mut curr = (*self.head).next.load(LOCKED_ORD);
            while (*curr).key != MAX_SENTINEL {
                out.push((*curr).key);
                curr = (*curr).next.load(LOCKED_ORD);
            }
        }
        out
    }
}

impl<L: RawLock> Drop for CouplingSet<L> {
    fn drop(&mut self) {
        let mut curr = self.head;
        while !curr.is_null() {
            // SAFETY: exclusive access; every reachable node came from
            // `Box::into_raw` and is freed exactly once here.
            unsafe {
                let next = (*curr).next.load(LOCKED_ORD);
                drop(Box::from_raw(curr));
                curr = next;
            }
        }
    }
}
