//! # `chainset`
//!
//! A concurrent sorted set of `i64` keys backed by a singly linked list,
//! implemented under three distinct synchronization disciplines. All three
//! variants share one contract ([`ConcurrentSet`]) and one structural model
//! (a chain bounded by `i64::MIN` / `i64::MAX` sentinel nodes, sorted strictly
//! ascending); they differ only in how they stay correct under concurrency.
//!
//! | Variant | Traversal | Deletion | Retry |
//! |---------|-----------|----------|-------|
//! | [`CouplingSet`] | Hand-over-hand locked (all ops block) | Physical, under locks | None |
//! | [`LazySet`] | Unlocked; `contains` never locks | Logical flag, then unlink | Validated writes retry |
//! | [`OptimisticSet`] | Unlocked for every operation | Physical, under locks | All ops retry |
//!
//! ## Thread Safety
//!
//! Every variant is `Send + Sync` and takes `&self` for `contains`/`add`/
//! `remove`. The diagnostic [`ConcurrentSet::keys`] and
//! [`ConcurrentSet::dump`] operations take `&mut self`: they walk the chain
//! without any synchronization, so the exclusive borrow is what makes them
//! safe to call.
//!
//! ```rust
//! use chainset::{ConcurrentSet, LazySet};
//!
//! let set: LazySet = LazySet::new();
//! assert!(set.add(3));
//! assert!(set.add(1));
//! assert!(!set.add(3)); // already present
//! assert!(set.contains(1));
//! assert!(set.remove(3));
//! assert!(!set.contains(3));
//! ```
//!
//! ## Node Locks
//!
//! The variants are generic over the per-node mutual-exclusion primitive
//! through the [`RawLock`] trait. [`SpinLock`] (test-and-set) is the default;
//! [`FifoLock`] (array-based queuing lock) grants ownership in FIFO order
//! under contention. Any primitive providing acquire/release works.
//!
//! ## Memory Reclamation
//!
//! The lazy and optimistic variants let readers traverse the chain without
//! locks, so a removed node may still be referenced by an in-flight
//! traversal. Removed nodes are therefore retired through a [`seize`]
//! collector and freed only once no traversal can still hold them. The
//! coupling variant frees removed nodes immediately: its locking protocol
//! guarantees no other thread can reference an unlinked node.

#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod coupling;
pub mod lazy;
pub mod lock;
pub mod optimistic;
pub mod ordering;
pub mod set;

mod tracing_helpers;

pub use coupling::CouplingSet;
pub use lazy::LazySet;
pub use lock::{FifoLock, Held, RawLock, SpinLock};
pub use optimistic::OptimisticSet;
pub use set::{ConcurrentSet, RetryPolicy};
