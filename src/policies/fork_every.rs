//! # Worker recycling policy.
//!
//! [`ForkEvery`] determines how many test classes a single worker may execute
//! before it is discarded and replaced by a fresh one.
//!
//! - [`ForkEvery::Never`] a worker lives until the run ends (default).
//! - [`ForkEvery::After`] a worker is retired after `n` classes, strictly
//!   between two classes, never in the middle of one.
//!
//! ```text
//! ForkEvery::After(2), 5 classes, 1 member:
//!   worker-1: A B | worker-2: C D | worker-3: E
//! ```

use std::num::NonZeroU64;

/// Policy controlling when a pool member replaces its worker.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ForkEvery {
    /// Never replace a worker for having done too much work.
    #[default]
    Never,
    /// Replace a worker once it has executed this many classes.
    After(NonZeroU64),
}

impl ForkEvery {
    /// Builds the policy from a raw count; `0` and negatives mean [`ForkEvery::Never`].
    ///
    /// ## Example
    /// ```
    /// use testvisor::ForkEvery;
    ///
    /// assert_eq!(ForkEvery::from_count(0), ForkEvery::Never);
    /// assert_eq!(ForkEvery::from_count(-3), ForkEvery::Never);
    /// assert_eq!(ForkEvery::from_count(2).threshold(), Some(2));
    /// ```
    pub fn from_count(count: i64) -> Self {
        u64::try_from(count)
            .ok()
            .and_then(NonZeroU64::new)
            .map_or(ForkEvery::Never, ForkEvery::After)
    }

    /// Per-worker class limit, if any.
    #[inline]
    pub fn threshold(self) -> Option<u64> {
        match self {
            ForkEvery::Never => None,
            ForkEvery::After(n) => Some(n.get()),
        }
    }

    /// Returns `true` if a worker that already executed `processed` classes
    /// must be retired before taking the next one.
    #[inline]
    pub fn should_retire(self, processed: u64) -> bool {
        self.threshold().is_some_and(|n| processed >= n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_retire_at_threshold() {
        let p = ForkEvery::from_count(3);
        assert!(!p.should_retire(0));
        assert!(!p.should_retire(2));
        assert!(p.should_retire(3));
        assert!(!ForkEvery::Never.should_retire(u64::MAX));
    }
}
