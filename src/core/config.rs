//! # Global runtime configuration.
//!
//! Provides [`Config`] centralized settings for the orchestrator.
//!
//! Config is used in two ways:
//! 1. **Orchestrator creation**: `Orchestrator::builder(config, factory)`
//! 2. **Per-run limits**: parallelism clamp, stop acknowledgement bound, run timeout
//!
//! ## Sentinel values
//! - `run_timeout = 0s` → no run timeout
//! - `spawn_timeout = 0s` → wait for the factory indefinitely
//! - `max_workers = 0` → treated as 1 (a budget of zero could never make progress)

use std::num::NonZeroUsize;
use std::time::Duration;

/// Global configuration for the orchestrator.
///
/// ## Field semantics
/// - `max_workers`: global lease budget shared by every run (min 1)
/// - `stop_timeout`: how long a worker may take to acknowledge `Stop`
/// - `spawn_timeout`: how long the factory may take to hand over a worker (`0s` = none)
/// - `run_timeout`: whole-run deadline (`0s` = none)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `class_queue_capacity`: names buffered between class source and dispatcher
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of live workers across all runs of one orchestrator.
    ///
    /// Only used when the builder creates the lease coordinator; an injected
    /// coordinator brings its own budget.
    pub max_workers: usize,

    /// Bound on a worker's stop acknowledgement.
    ///
    /// A worker that does not answer `Stop` in time is terminated and reported
    /// as unresponsive; any unit still bound to it fails.
    pub stop_timeout: Duration,

    /// Bound on [`WorkerFactory::spawn`](crate::WorkerFactory::spawn).
    ///
    /// A spawn that takes longer fails the class it was started for.
    pub spawn_timeout: Duration,

    /// Whole-run deadline.
    ///
    /// - `Duration::ZERO` = no deadline
    /// - `> 0` = the run is cancelled with `CancelReason::TimedOut`
    pub run_timeout: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items. Minimum value is 1 (enforced by Bus).
    pub bus_capacity: usize,

    /// Capacity of the channel between the class source and the run task.
    ///
    /// Enumeration blocks when the dispatcher falls this far behind.
    pub class_queue_capacity: usize,
}

impl Config {
    /// Returns the run timeout as an `Option`.
    ///
    /// - `None` → run until every class resolved
    /// - `Some(d)` → cancel the run after `d`
    #[inline]
    pub fn run_deadline(&self) -> Option<Duration> {
        if self.run_timeout == Duration::ZERO {
            None
        } else {
            Some(self.run_timeout)
        }
    }

    /// Returns the spawn bound as an `Option` (`None` = unbounded).
    #[inline]
    pub fn spawn_deadline(&self) -> Option<Duration> {
        if self.spawn_timeout == Duration::ZERO {
            None
        } else {
            Some(self.spawn_timeout)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Lease budget clamped to a minimum of 1.
    #[inline]
    pub fn worker_budget(&self) -> usize {
        self.max_workers.max(1)
    }

    /// Number of parallel forks a run may use given a lease `budget`.
    ///
    /// # Example
    /// ```
    /// use testvisor::Config;
    ///
    /// let cfg = Config::default();
    /// assert_eq!(cfg.effective_parallelism(8, 4), 4);
    /// assert_eq!(cfg.effective_parallelism(2, 4), 2);
    /// assert_eq!(cfg.effective_parallelism(0, 4), 1);
    /// ```
    #[inline]
    pub fn effective_parallelism(&self, requested: usize, budget: usize) -> usize {
        requested.min(budget).max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `max_workers = available parallelism` (1 if unknown)
    /// - `stop_timeout = 10s`
    /// - `spawn_timeout = 60s`
    /// - `run_timeout = 0s` (none)
    /// - `bus_capacity = 1024`
    /// - `class_queue_capacity = 256`
    fn default() -> Self {
        Self {
            max_workers: std::thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or(1),
            stop_timeout: Duration::from_secs(10),
            spawn_timeout: Duration::from_secs(60),
            run_timeout: Duration::ZERO,
            bus_capacity: 1024,
            class_queue_capacity: 256,
        }
    }
}
