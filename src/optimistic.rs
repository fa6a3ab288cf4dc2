//! Optimistic synchronization variant.
//!
//! Every operation - `contains` included - traverses the chain without
//! locks, locks the bracketing pair it found, and then *validates* by
//! rescanning from the head: the predecessor must still be reachable and
//! still point at the candidate. There is no deletion flag; reachability is
//! re-established structurally each time, trading the lazy variant's O(1)
//! flag check for an O(position) rescan.
//!
//! # Protocol
//!
//! ```text
//! 1. guard = collector.enter()
//! 2. Unlocked search for (prev, curr)
//! 3. lock(prev); lock(curr)
//! 4. Rescan from head while node.key <= prev.key:
//!      found prev  -> valid iff prev.next == curr
//!      walked past -> invalid
//! 5a. Valid   -> contains reports curr.key == key;
//!                add splices if absent; remove unlinks if present
//! 5b. Invalid -> release both, retry from 2 (per RetryPolicy)
//! ```
//!
//! Deletion is physical only, and deallocation is deferred through the
//! [`seize`] collector exactly as in the lazy variant: an unlocked traversal
//! may still hold the unlinked node.
//!
//! Escalation under [`RetryPolicy::Bounded`] works as in the lazy variant: a
//! serialized hand-over-hand walk over the same per-node locks, which cannot
//! fail validation.

use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize};

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

/// Concurrent sorted set with optimistic synchronization.
///
/// Unlocked traversal for all operations, structural revalidation under a
/// two-lock critical section, physical-only deletion, deferred reclamation.
pub struct OptimisticSet<L: RawLock = SpinLock> {
    head: *mut Node<L>,
    collector: Collector,
    policy: RetryPolicy,
    /// Serializes escalated (coupled-walk) operations among themselves.
    escalation: Mutex<()>,
    len: AtomicUsize,
}

// SAFETY: the raw head pointer defeats the auto impls. Chain mutation is
// lock-protected and revalidated, and reclamation is deferred through the
// collector.
unsafe impl<L: RawLock> Send for OptimisticSet<L> {}
unsafe impl<L: RawLock> Sync for OptimisticSet<L> {}

impl<L: RawLock + Default> OptimisticSet<L> {
    /// Create an empty set with the default (unbounded) retry policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_retry_policy(RetryPolicy::Unbounded)
    }

    /// Create an empty set with an explicit retry policy.
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

impl<L: RawLock + Default> Default for OptimisticSet<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: RawLock> OptimisticSet<L> {
    /// Unlocked search for the bracketing pair with
    /// `prev.key < key <= curr.key`.
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

    /// Structural validation: rescan from the head to confirm `prev` is
    /// still reachable and still points at `curr`. Runs with both locks
    /// held; the rescan itself is unlocked (and guard-protected).
    fn validate(&self, prev: *mut Node<L>, curr: *mut Node<L>, _guard: &LocalGuard<'_>) -> bool {
        let mut node = self.head;
        // SAFETY: same protection argument as `search`; termination because
        // keys ascend strictly toward the tail sentinel.
        unsafe {
            let prev_key = (*prev).key;
            while (*node).key <= prev_key {
                if ptr::eq(node, prev) {
                    return ptr::eq((*prev).next.load(LOCKED_ORD), curr);
                }
                node = (*node).next.load(READ_ORD);
            }
        }
        false
    }
}

impl<L: RawLock + Default> OptimisticSet<L> {
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

    fn contains_coupled(&self, key: i64) -> bool {
        let _escalated = self.escalation.lock();
        let pair = self.locate_coupled(key);
        pair.curr.key == key
    }

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

    fn remove_coupled(&self, key: i64, guard: &LocalGuard<'_>) -> bool {
        let _escalated = self.escalation.lock();
        let pair = self.locate_coupled(key);
        if pair.curr.key != key {
            return false;
        }
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

impl<L: RawLock + Default> ConcurrentSet for OptimisticSet<L> {
    /// Unlike the lazy variant, reads here also lock and validate: with no
    /// deletion flag, reachability is the only membership evidence.
    fn contains(&self, key: i64) -> bool {
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

            if self.validate(prev_ptr, curr_ptr, &guard) {
                return curr.key == key;
            }

            drop(curr_held);
            drop(prev_held);
            failures += 1;
            trace_log!(key, failures, "optimistic contains: validation failed");
            if self.policy.exhausted(failures) {
                warn_log!(key, failures, "optimistic contains: escalating");
                return self.contains_coupled(key);
            }
        }
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

            if self.validate(prev_ptr, curr_ptr, &guard) {
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
            trace_log!(key, failures, "optimistic add: validation failed");
            if self.policy.exhausted(failures) {
                warn_log!(key, failures, "optimistic add: escalating");
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

            if self.validate(prev_ptr, curr_ptr, &guard) {
                if curr.key != key {
                    return false;
                }
                prev.next.store(curr.next.load(LOCKED_ORD), WRITE_ORD);
                self.len.fetch_sub(1, COUNT_ORD);
                // SAFETY: unlinked above; reclaim_node's contract holds.
                unsafe { guard.defer_retire(curr_ptr, reclaim_node::<L>) };
                return true;
            }

            drop(curr_held);
            drop(prev_held);
            failures += 1;
            trace_log!(key, failures, "optimistic remove: validation failed");
            if self.policy.exhausted(failures) {
                warn_log!(key, failures, "optimistic remove: escalating");
                return self.remove_coupled(key, &guard);
            }
        }
    }

    fn len(&self) -> usize {
        self.len.load(COUNT_ORD)
    }

    fn keys(&mut self) -> Vec<i64> {
        let mut out = Vec::with_capacity(self.len());
        // SAFETY: `&mut self` means no operation is in flight; plain walk.
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

impl<L: RawLock> Drop for OptimisticSet<L> {
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
