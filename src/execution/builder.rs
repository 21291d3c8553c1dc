use std::path::PathBuf;
use std::sync::Arc;

use super::spec::{ExecutionSpec, LaunchOptions};
use super::unit::RunId;
use crate::detection::{CandidateSource, DetectorRef};
use crate::policies::ForkEvery;

/// Builder for ExecutionSpec with fluent API
#[derive(Clone)]
pub struct ExecutionSpecBuilder {
    run: RunId,
    display_name: Option<Arc<str>>,
    candidates: CandidateSource,
    detector: Option<DetectorRef>,
    classpath: Vec<PathBuf>,
    max_parallel_forks: usize,
    fork_every: ForkEvery,
    launch: LaunchOptions,
}

impl ExecutionSpecBuilder {
    /// Creates a new builder for the given run identity
    pub fn new(run: impl Into<RunId>) -> Self {
        Self {
            run: run.into(),
            display_name: None,
            candidates: CandidateSource::default(),
            detector: None,
            classpath: Vec::new(),
            max_parallel_forks: 1,
            fork_every: ForkEvery::Never,
            launch: LaunchOptions::default(),
        }
    }

    /// Overrides the default `"Test Run <run id>"` display name
    pub fn with_display_name(mut self, name: impl Into<Arc<str>>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    pub fn with_candidates(mut self, candidates: CandidateSource) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_detector(mut self, detector: DetectorRef) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_classpath(mut self, classpath: impl IntoIterator<Item = PathBuf>) -> Self {
        self.classpath = classpath.into_iter().collect();
        self
    }

    /// Values below 1 are raised to 1
    pub fn with_max_parallel_forks(mut self, n: usize) -> Self {
        self.max_parallel_forks = n.max(1);
        self
    }

    pub fn with_fork_every(mut self, fork_every: ForkEvery) -> Self {
        self.fork_every = fork_every;
        self
    }

    pub fn with_launch_options(mut self, launch: LaunchOptions) -> Self {
        self.launch = launch;
        self
    }

    pub fn build(self) -> ExecutionSpec {
        let display_name = self
            .display_name
            .unwrap_or_else(|| Arc::from(format!("Test Run {}", self.run)));
        ExecutionSpec {
            run: self.run,
            display_name,
            candidates: self.candidates,
            detector: self.detector,
            classpath: Arc::from(self.classpath),
            max_parallel_forks: self.max_parallel_forks,
            fork_every: self.fork_every,
            launch: Arc::new(self.launch),
        }
    }
}

impl ExecutionSpec {
    /// Creates a builder for constructing ExecutionSpec with fluent API
    pub fn builder(run: impl Into<RunId>) -> ExecutionSpecBuilder {
        ExecutionSpecBuilder::new(run)
    }
}
