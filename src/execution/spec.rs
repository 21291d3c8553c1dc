//! # Execution specification for one test run.
//!
//! Defines [`ExecutionSpec`], the immutable bundle that describes *what* to run
//! (candidate classes, detector, classpath) and *how* (parallel forks, fork-every
//! threshold, worker launch options).
//!
//! A spec is created through [`ExecutionSpec::builder`] and passed to
//! [`Orchestrator::start`](crate::Orchestrator::start).
//!
//! ## Rules
//! - `max_parallel_forks` is at least 1; the orchestrator clamps it further to
//!   the lease budget.
//! - `fork_every` applies per pool member: each worker executes at most that
//!   many classes before it is replaced.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::unit::RunId;
use crate::detection::{CandidateSource, DetectorRef};
use crate::policies::ForkEvery;

/// Process-level options every worker of a run is launched with.
///
/// The runtime treats these as opaque and hands them to the
/// [`WorkerFactory`](crate::WorkerFactory) unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Executable to start (for example a `java` binary).
    pub program: Option<PathBuf>,
    /// Extra arguments (JVM flags, system properties, ...).
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: BTreeMap<String, String>,
    /// Working directory of the worker.
    pub working_dir: Option<PathBuf>,
}

/// Immutable run configuration.
///
/// ## Example
/// ```rust
/// use testvisor::{CandidateSource, ExecutionSpec, ForkEvery};
///
/// let spec = ExecutionSpec::builder("unit-tests")
///     .with_candidates(CandidateSource::names(["a.FooTest", "a.BarTest"]))
///     .with_max_parallel_forks(4)
///     .with_fork_every(ForkEvery::from_count(100))
///     .build();
///
/// assert_eq!(spec.run_id().as_str(), "unit-tests");
/// assert_eq!(spec.display_name(), "Test Run unit-tests");
/// assert_eq!(spec.max_parallel_forks(), 4);
/// ```
#[derive(Clone)]
pub struct ExecutionSpec {
    pub(super) run: RunId,
    pub(super) display_name: Arc<str>,
    pub(super) candidates: CandidateSource,
    pub(super) detector: Option<DetectorRef>,
    pub(super) classpath: Arc<[PathBuf]>,
    pub(super) max_parallel_forks: usize,
    pub(super) fork_every: ForkEvery,
    pub(super) launch: Arc<LaunchOptions>,
}

impl ExecutionSpec {
    #[inline]
    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    /// Human-readable run name used in logs and the completion.
    #[inline]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    #[inline]
    pub fn candidates(&self) -> &CandidateSource {
        &self.candidates
    }

    #[inline]
    pub fn detector(&self) -> Option<&DetectorRef> {
        self.detector.as_ref()
    }

    #[inline]
    pub fn classpath(&self) -> &Arc<[PathBuf]> {
        &self.classpath
    }

    /// Requested upper bound of concurrently live workers (before the budget clamp).
    #[inline]
    pub fn max_parallel_forks(&self) -> usize {
        self.max_parallel_forks
    }

    #[inline]
    pub fn fork_every(&self) -> ForkEvery {
        self.fork_every
    }

    #[inline]
    pub fn launch_options(&self) -> &Arc<LaunchOptions> {
        &self.launch
    }
}
