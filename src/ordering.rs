//! Standard memory orderings for concurrent chain access.
//!
//! These constants ensure consistent ordering usage across the codebase
//! and make the intent clear at each access point.

use std::sync::atomic::Ordering;

/// Ordering for reading chain links during unsynchronized traversal.
/// Pairs with writers' Release stores.
pub const READ_ORD: Ordering = Ordering::Acquire;

/// Ordering for writing chain links and deletion flags under lock.
/// Pairs with readers' Acquire loads.
pub const WRITE_ORD: Ordering = Ordering::Release;

/// Ordering for loads inside a locked region.
/// Safe because the node lock provides synchronization.
pub const LOCKED_ORD: Ordering = Ordering::Relaxed;

/// Ordering for the live-key counter. Diagnostic only, never used to
/// establish happens-before.
pub const COUNT_ORD: Ordering = Ordering::Relaxed;
