//! Multi-threaded stress tests for the three set variants.
//!
//! These hammer the properties the protocols must uphold under real
//! contention:
//! - exactly one winner for concurrent same-key `add` / `remove`
//! - no lost updates across disjoint key ranges
//! - producer/consumer convergence to the empty set
//! - sortedness and live-count consistency at quiescence
//!
//! Run with: `cargo test --test stress_tests --release`

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use chainset::{ConcurrentSet, CouplingSet, FifoLock, LazySet, OptimisticSet, RetryPolicy};

const THREADS: usize = 8;

/// Scenario: N threads race `add` on the same key; exactly one must win and
/// the key must end up stored exactly once.
fn duplicate_add_single_winner<S: ConcurrentSet + Default + Sync>() {
    let mut set = S::default();
    let wins = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                if set.add(10) {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 1);
    assert_eq!(set.len(), 1);
    assert_eq!(set.keys(), vec![10]);
}

/// Scenario: N threads race `remove` on the same present key; exactly one
/// must win.
fn duplicate_remove_single_winner<S: ConcurrentSet + Default + Sync>() {
    let mut set = S::default();
    assert!(set.add(10));
    let wins = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                if set.remove(10) {
                    wins.fetch_add(1, Ordering::Relaxed);
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 1);
    assert!(set.is_empty());
    assert!(set.keys().is_empty());
}

/// Scenario: one thread adds 1..=N in order while another busy-retries
/// `remove` for each key as it appears. Every remove eventually succeeds
/// exactly once and the set converges to empty.
fn producer_consumer_converges_to_empty<S: ConcurrentSet + Default + Sync>() {
    const N: i64 = 100;
    let mut set = S::default();

    thread::scope(|s| {
        let set = &set;
        s.spawn(move || {
            for k in 1..=N {
                assert!(set.add(k), "producer re-added {k}");
            }
        });
        s.spawn(move || {
            for k in 1..=N {
                // A remove may only succeed after the producer's add; busy
                // retry until it does.
                while !set.remove(k) {
                    std::hint::spin_loop();
                }
            }
        });
    });

    assert!(set.is_empty());
    assert!(set.keys().is_empty());
}

/// Disjoint key ranges from many threads: nothing lost, nothing duplicated.
fn disjoint_ranges_all_land<S: ConcurrentSet + Default + Sync>() {
    const PER_THREAD: i64 = 250;
    let mut set = S::default();

    thread::scope(|s| {
        for t in 0..THREADS as i64 {
            let set = &set;
            s.spawn(move || {
                let base = t * PER_THREAD;
                for k in base..base + PER_THREAD {
                    assert!(set.add(k));
                    assert!(set.contains(k));
                }
            });
        }
    });

    let expected = THREADS as i64 * PER_THREAD;
    assert_eq!(set.len() as i64, expected);
    let keys = set.keys();
    assert_eq!(keys.len() as i64, expected);
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "chain out of order");
}

/// Mixed churn on a small hot key range, then drain and verify consistency
/// between the boolean results and the final contents.
fn hot_range_churn_stays_consistent<S: ConcurrentSet + Default + Sync>() {
    const KEYS: i64 = 16;
    const ROUNDS: usize = 500;
    let mut set = S::default();
    let net = AtomicUsize::new(0); // adds that won minus removes that won

    thread::scope(|s| {
        for t in 0..THREADS {
            let set = &set;
            let net = &net;
            s.spawn(move || {
                for round in 0..ROUNDS {
                    let k = ((round + t) as i64) % KEYS;
                    if (round + t) % 2 == 0 {
                        if set.add(k) {
                            net.fetch_add(1, Ordering::Relaxed);
                        }
                    } else if set.remove(k) {
                        net.fetch_sub(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let keys = set.keys();
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "chain out of order");
    assert!(keys.iter().all(|k| (0..KEYS).contains(k)));
    assert_eq!(keys.len(), net.load(Ordering::Relaxed));
    assert_eq!(set.len(), keys.len());
}

macro_rules! variant_stress {
    ($variant:ident, $ty:ty) => {
        mod $variant {
            use super::*;

            #[test]
            fn duplicate_add_single_winner() {
                common::init_tracing();
                super::duplicate_add_single_winner::<$ty>();
            }

            #[test]
            fn duplicate_remove_single_winner() {
                common::init_tracing();
                super::duplicate_remove_single_winner::<$ty>();
            }

            #[test]
            fn producer_consumer_converges_to_empty() {
                common::init_tracing();
                super::producer_consumer_converges_to_empty::<$ty>();
            }

            #[test]
            fn disjoint_ranges_all_land() {
                common::init_tracing();
                super::disjoint_ranges_all_land::<$ty>();
            }

            #[test]
            fn hot_range_churn_stays_consistent() {
                common::init_tracing();
                super::hot_range_churn_stays_consistent::<$ty>();
            }
        }
    };
}

variant_stress!(coupling, CouplingSet);
variant_stress!(lazy, LazySet);
variant_stress!(optimistic, OptimisticSet);
variant_stress!(coupling_fifolock, CouplingSet<FifoLock>);

/// Escalation under contention: a tiny retry budget forces the coupled
/// fallback path while the fast path races it, and results must still be
/// exactly-once.
#[test]
fn bounded_retry_under_contention_is_exactly_once() {
    common::init_tracing();

    let mut set: LazySet = LazySet::with_retry_policy(RetryPolicy::Bounded { max_retries: 1 });
    let wins = AtomicUsize::new(0);

    thread::scope(|s| {
        let set = &set;
        for _ in 0..THREADS {
            s.spawn(|| {
                for k in 0..64 {
                    if set.add(k) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    assert_eq!(wins.load(Ordering::Relaxed), 64);
    assert_eq!(set.keys(), (0..64).collect::<Vec<i64>>());
}

/// Same, for the optimistic variant's escalation.
#[test]
fn bounded_retry_optimistic_under_contention_is_exactly_once() {
    common::init_tracing();

    let mut set: OptimisticSet =
        OptimisticSet::with_retry_policy(RetryPolicy::Bounded { max_retries: 0 });
    let wins = AtomicUsize::new(0);

    thread::scope(|s| {
        let set = &set;
        for _ in 0..THREADS {
            s.spawn(|| {
                for k in 0..64 {
                    if set.remove(k) {
                        wins.fetch_sub(1, Ordering::Relaxed);
                    }
                    if set.add(k) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    });

    let keys = set.keys();
    assert!(keys.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(keys.len(), wins.load(Ordering::Relaxed));
}
