//! Lazy synchronization variant.
//!
//! Traversal never locks. Writers lock only the final bracketing pair and
//! then *validate* before mutating; readers never lock at all. Deletion is
//! logical (a per-node flag) followed by physical unlink inside the same
//! critical section, which is what lets an unlocked reader decide membership
//! from the flag alone.
//!
//! # Write Protocol
//!
//! ```text
//! 1. guard = collector.enter()            // protect unsynchronized loads
//! 2. Unlocked search for (prev, curr)
//! 3. lock(prev); lock(curr)               // ascending-key order
//! 4. Validate: !prev.deleted && !curr.deleted && prev.next == curr
//! 5a. Valid   -> apply, return            // mutation is the linearization point
//! 5b. Invalid -> release both, retry from 2 (per RetryPolicy)
//! ```
//!
//! `contains` walks the chain unlocked and reports
//! `curr.key == key && !curr.deleted`; the flag read plus key comparison is
//! its linearization point. It completes in bounded time regardless of what
//! locks writers hold.
//!
//! # Reclamation
//!
//! The textbook algorithm frees a removed node inside the critical section
//! while an unlocked traversal may still be dereferencing it - a genuine
//! use-after-free. Here `remove` instead retires the node to a [`seize`]
//! collector; it is freed only after every guard that could have observed it
//! has been dropped.
//!
//! # Escalation
//!
//! With [`RetryPolicy::Bounded`], an operation that exhausts its retry
//! budget escalates: it takes the set's escalation mutex (serializing
//! fallback walkers among themselves) and redoes the operation with a
//! hand-over-hand coupled walk over the same per-node locks. The coupled
//! walk acquires locks in the same ascending-key order the fast path uses,
//! so it composes with concurrent fast-path writers, and it cannot fail
//! validation because nothing can slip between its sliding two-lock window.

use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize};

use parking_lot::Mutex;
use seize::{Collector, Guard, LocalGuard};

use crate::lock::{Held, RawLock, SpinLock};
use crate::ordering::{COUNT_ORD, LOCKED_ORD, READ_ORD, WRITE_ORD};
use crate::set::{debug_assert_storable, ConcurrentSet, MAX_SENTINEL, MIN_SENTINEL, RetryPolicy};
use crate::tracing_helpers::{trace_log, warn_log};


struct Node<L> {
    key: i64,
    lock: L,
    /// Read by unlocked traversals; written under this node's lock.
    next: AtomicPtr<Node<L>>,
    /// Set (under this node's lock) in the same critical section that
    /// unlinks the node. Read by unlocked traversals.
    deleted: AtomicBool,
}

impl<L: RawLock + Default> Node<L> {
    fn boxed(key: i64, next: *mut Self) -> *mut Self {
        Box::into_raw(Box::new(Self {
            key,
            lock: L::default(),
            next: AtomicPtr::new(next),
            deleted: AtomicBool::new(false),
        }))
    }
}

/// Seize reclaimer for a retired node.
///
/// # Safety
///
/// `ptr` must come from `Node::boxed` and must have been unlinked before
/// retirement; seize guarantees no guard can still observe it.
unsafe fn reclaim_node<L: RawLock>(ptr: *mut Node<L>, _collector: &Collector) {
    // SAFETY: per the function contract.
    unsafe { drop(Box::from_raw(ptr)) };
}

/// Concurrent sorted set with lazy synchronization.
///
/// Lock-free membership tests, validated two-lock writes, logical-then-
/// physical deletion, deferred reclamation.
pub struct LazySet<L: RawLock = SpinLock> {
    head: *mut Node<L>,
    collector: Collector,
    policy: RetryPolicy,
    /// Serializes escalated (coupled-walk) operations among themselves.
    escalation: Mutex<()>,
    len: AtomicUsize,
}

// SAFETY: the raw head pointer defeats the auto impls. Chain mutation is
// lock-protected, unlocked reads are validated or flag-checked, and
// reclamation is deferred through the collector.
unsafe impl<L: RawLock> Send for LazySet<L> {}
unsafe impl<L: RawLock> Sync for LazySet<L> {}

impl<L: RawLock + Default> LazySet<L> {
    /// Create an empty set with the default (unbounded) retry policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::Unbounded)
    }

    /// Create an empty set with an explicit retry policy for validated
    /// writes.
    #[must_use]
    pub fn with_retry_policy(policy: RetryPolicy) -> Self {
        let tail = Node::boxed(MAX_SENTINEL, ptr::null_mut());
        let head = Node::boxed(MIN_SENTINEL, tail);
        Self {
            head,
            collector: Collector::new(),
            policy,
            escalation: Mutex::new(()),
            len: AtomicUsize::new(0),
        }
    }
}

impl<L: RawLock + Default> Default for LazySet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawLock> LazySet<L> {
    /// Unlocked search for the bracketing pair with
    /// `prev.key < key <= curr.key`.
    ///
    /// The guard keeps every node this walk can touch alive, even ones a
    /// concurrent `remove` unlinks mid-walk.
    fn search(&self, key: i64, _guard: &LocalGuard<'_>) -> (*mut Node<L>, *mut Node<L>) {
        let mut prev = self.head;
        // SAFETY: sentinels are never freed; interior nodes reachable during
        // this guard's lifetime are retired, not freed, while it is live.
        unsafe {
            let mut curr = (*prev).next.load(READ_ORD);
            while (*curr).key < key {
                prev = curr;
                curr = (*curr).next.load(READ_ORD);
            }
            (prev, curr)
        }
    }

    /// The lazy validation step, evaluated with both locks held.
    fn validate(prev: &Node<L>, curr: &Node<L>) -> bool {
        !prev.deleted.load(LOCKED_ORD)
            && !curr.deleted.load(LOCKED_ORD)
            && ptr::eq(prev.next.load(LOCKED_ORD), curr)
    }
}

impl<L: RawLock + Default> LazySet<L> {
    /// Hand-over-hand walk used by escalated operations. Cannot fail
    /// validation: the sliding two-lock window admits no interleaving.
    fn locate_coupled(&self, key: i64) -> CoupledPair<'_, L> {
        // SAFETY: the head sentinel lives as long as the set.
        let mut prev: &Node<L> = unsafe { &*self.head };
        let mut prev_held = prev.lock.lock();

        // SAFETY: while a node's lock is held its successor cannot be
        // unlinked (that would need this very lock), hence not retired.
        let mut curr: &Node<L> = unsafe { &*prev.next.load(LOCKED_ORD) };
        let mut curr_held = curr.lock.lock();

        while curr.key < key {
            // SAFETY: curr is below the tail (curr.key < key < MAX), so its
            // successor exists and is protected by curr's lock.
            let next: &Node<L> = unsafe { &*curr.next.load(LOCKED_ORD) };
            prev = curr;
            prev_held = curr_held;
            curr = next;
            curr_held = curr.lock.lock();
        }

        CoupledPair {
            prev,
            curr,
            _prev_held: prev_held,
            _curr_held: curr_held,
        }
    }

    /// Escalated `add`: fully locked, never validates, never retries.
    fn add_coupled(&self, key: i64) -> bool {
        let _escalated = self.escalation.lock();
        let pair = self.locate_coupled(key);
        if pair.curr.key == key {
            return false;
        }
        let node = Node::boxed(key, ptr::from_ref(pair.curr).cast_mut());
        pair.prev.next.store(node, WRITE_ORD);
        self.len.fetch_add(1, COUNT_ORD);
        true
    }

    /// Escalated `remove`. Still defers deallocation: unlocked readers may
    /// hold the victim.
    fn remove_coupled(&self, key: i64, guard: &LocalGuard<'_>) -> bool {
        let _escalated = self.escalation.lock();
        let pair = self.locate_coupled(key);
        if pair.curr.key != key {
            return false;
        }
        pair.curr.deleted.store(true, WRITE_ORD);
        pair.prev
            .next
            .store(pair.curr.next.load(LOCKED_ORD), WRITE_ORD);
        self.len.fetch_sub(1, COUNT_ORD);
        // SAFETY: the node is unlinked; reclaim_node's contract holds.
        unsafe { guard.defer_retire(ptr::from_ref(pair.curr).cast_mut(), reclaim_node::<L>) };
        true
    }
}

/// Locked pair returned by the escalated walk.
struct CoupledPair<'a, L: RawLock> {
    prev: &'a Node<L>,
    curr: &'a Node<L>,
    _prev_held: Held<'a, L>,
    _curr_held: Held<'a, L>,
}

impl<L: RawLock + Default> ConcurrentSet for LazySet<L> {
    /// Never locks and never retries: walk, then decide from the key and the
    /// deleted flag. Completes regardless of writer lock holds.
    fn contains(&self, key: i64) -> bool {
        debug_assert_storable(key);
        let guard = self.collector.enter();
        let (_, curr) = self.search(key, &guard);
        // SAFETY: the guard keeps curr alive even if already unlinked.
        let curr = unsafe { &*curr };
        curr.key == key && !curr.deleted.load(READ_ORD)
    }

    fn add(&self, key: i64) -> bool {
        debug_assert_storable(key);
        let guard = self.collector.enter();
        let mut failures = 0_usize;

        loop {
            let (prev_ptr, curr_ptr) = self.search(key, &guard);
            // SAFETY: guard-protected; see `search`.
            let prev = unsafe { &*prev_ptr };
            let curr = unsafe { &*curr_ptr };

            let prev_held = prev.lock.lock();
            let curr_held = curr.lock.lock();

            if Self::validate(prev, curr) {
                if curr.key == key {
                    return false;
                }
                let node = Node::boxed(key, curr_ptr);
                prev.next.store(node, WRITE_ORD);
                self.len.fetch_add(1, COUNT_ORD);
                return true;
            }

            drop(curr_held);
            drop(prev_held);
            failures += 1;
            trace_log!(key, failures, "lazy add: validation failed, retrying");
            if self.policy.exhausted(failures) {
                warn_log!(key, failures, "lazy add: escalating to coupled walk");
                return self.add_coupled(key);
            }
        }
    }

    fn remove(&self, key: i64) -> bool {
        debug_assert_storable(key);
        let guard = self.collector.enter();
        let mut failures = 0_usize;

        loop {
            let (prev_ptr, curr_ptr) = self.search(key, &guard);
            // SAFETY: guard-protected; see `search`.
            let prev = unsafe { &*prev_ptr };
            let curr = unsafe { &*curr_ptr };

            let prev_held = prev.lock.lock();
            let curr_held = curr.lock.lock();

            if Self::validate(prev, curr) {
                if curr.key != key {
                    return false;
                }
                // Logical deletion first: unlocked readers racing this
                // critical section observe the flag and treat the node as
                // absent even while it is still reachable.
                curr.deleted.store(true, WRITE_ORD);
                prev.next.store(curr.next.load(LOCKED_ORD), WRITE_ORD);
                self.len.fetch_sub(1, COUNT_ORD);
                // SAFETY: unlinked above; reclaim_node's contract holds.
                unsafe { guard.defer_retire(curr_ptr, reclaim_node::<L>) };
                return true;
            }

            drop(curr_held);
            drop(prev_held);
            failures += 1;
            trace_log!(key, failures, "lazy remove: validation failed, retrying");
            if self.policy.exhausted(failures) {
                warn_log!(key, failures, "lazy remove: escalating to coupled walk");
                return self.remove_coupled(key, &guard);
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(COUNT_ORD)
    }

    fn keys(&mut self) -> Vec<i64> {
        let mut out = Vec::with_capacity(self.len());
        // SAFETY: `&mut self` means no operation is in flight, and at
        // quiescence every deleted node is already unlinked.
        unsafe {
            let mut curr = (*self.head).next.load(READ_ORD);
            while (*curr).key != MAX_SENTINEL {
                out.push((*curr).key);
                curr = (*curr).next.load(READ_ORD);
            }
        }
        out
    }
}

impl<L: RawLock> Drop for LazySet<L> {
    fn drop(&mut self) {
        // Frees the reachable chain; the collector's own drop frees retired
        // (already unlinked) nodes.
        let mut curr = self.head;
        while !curr.is_null() {
            // SAFETY: exclusive access; reachable nodes are owned by the
            // chain and are never also in the retired state.
            unsafe {
                let next = (*curr).next.load(READ_ORD);
                drop(Box::from_raw(curr));
                curr = next;
            }
        }
    }
}
