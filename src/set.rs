//! The shared ordered-set contract and retry policy.
//!
//! All three variants implement [`ConcurrentSet`] with identical
//! caller-visible semantics; they differ only in the synchronization
//! discipline behind it. Operations return booleans and nothing else - there
//! is no error taxonomy. Concurrency defects are prevented by protocol, not
//! reported; a failed internal validation is never visible to the caller
//! except as latency.

/// Key stored in the head sentinel. Less than every storable key.
pub const MIN_SENTINEL: i64 = i64::MIN;

/// Key stored in the tail sentinel. Greater than every storable key.
pub const MAX_SENTINEL: i64 = i64::MAX;

/// Contract-violation check shared by every operation entry point.
/// Sentinel keys are never valid operation targets.
#[inline]
pub(crate) fn debug_assert_storable(key: i64) {
    debug_assert!(
        key != MIN_SENTINEL && key != MAX_SENTINEL,
        "sentinel keys cannot be stored, looked up, or removed"
    );
}

/// The shared operation surface of the three set variants.
///
/// `contains`, `add` and `remove` are safe to call from any number of threads
/// concurrently. `keys` and `dump` walk the chain without synchronization and
/// therefore require exclusive access, which the `&mut self` receiver
/// enforces statically.
///
/// Keys must lie strictly between [`MIN_SENTINEL`] and [`MAX_SENTINEL`].
pub trait ConcurrentSet {
    /// Whether a live node with `key` is currently reachable.
    fn contains(&self, key: i64) -> bool;

    /// Insert `key`. Returns `true` iff it was absent and is now linked in;
    /// `false` (no side effect) if already present.
    fn add(&self, key: i64) -> bool;

    /// Remove `key`. Returns `true` iff it was present and was unlinked;
    /// `false` if absent.
    fn remove(&self, key: i64) -> bool;

    /// Number of live keys. O(1), tracked incrementally.
    fn len(&self) -> usize;

    /// Whether the set holds no live keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered live keys, sentinels excluded. Diagnostic only.
    fn keys(&mut self) -> Vec<i64>;

    /// Textual rendering of [`ConcurrentSet::keys`]. Diagnostic only.
    fn dump(&mut self) -> String {
        format!("{:?}", self.keys())
    }
}

/// How a validated operation responds to repeated validation failure.
///
/// The reference algorithms retry without bound; an implementation targeting
/// predictable latency can cap the retries, after which the operation
/// escalates to a fully locked hand-over-hand walk that cannot fail
/// validation. Escalation is internal: the caller only ever sees the
/// documented boolean results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RetryPolicy {
    /// Retry until the operation validates. Matches the reference algorithm;
    /// only probabilistically livelock-free under adversarial scheduling.
    #[default]
    Unbounded,

    /// Retry at most `max_retries` times after the initial attempt, then
    /// fall back to the fully locked path.
    Bounded {
        /// Validation failures tolerated before escalating.
        max_retries: usize,
    },
}

impl RetryPolicy {
    /// Whether `failures` validation failures exhaust this policy.
    pub(crate) fn exhausted(self, failures: usize) -> bool {
        match self {
            Self::Unbounded => false,
            Self::Bounded { max_retries } => failures > max_retries,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_never_exhausts() {
        assert!(!RetryPolicy::Unbounded.exhausted(usize::MAX));
    }

    #[test]
    fn bounded_exhausts_after_budget() {
        let policy = RetryPolicy::Bounded { max_retries: 2 };
        assert!(!policy.exhausted(1));
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }
}
