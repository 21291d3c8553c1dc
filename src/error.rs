//! Error types used by the testvisor runtime.
//!
//! Failures local to one unit of work or one worker never escape the run: they
//! are converted into terminal test events. The enums here describe *why* that
//! happened, for diagnostics, and the few conditions that reach the caller.
//!
//! - [`RunError`]: the run task itself could not produce a completion.
//! - [`WorkerError`]: a worker could not be started or died.
//! - [`LeaseError`]: lease coordinator misuse or shutdown.
//! - [`SubmitError`]: a unit of work was refused by the dispatcher.
//! - [`ProtocolViolation`]: a worker reported an event that does not fit the run state.
//! - [`DetectionError`]: a candidate class could not be inspected.
//!
//! Every type provides `as_label` (stable snake_case for logs/metrics).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::worker::WorkerId;

/// # Errors produced by the orchestrator boundary.
///
/// Everything that goes wrong *inside* a run is expressed as test events or as
/// the [`RunStatus`](crate::RunStatus) of the completion; this type only covers
/// the run task not finishing at all.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RunError {
    /// The task driving the run panicked or was aborted.
    #[error("run task terminated abnormally: {reason}")]
    Panicked {
        /// Panic payload or join error message.
        reason: String,
    },
}

impl RunError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RunError::Panicked { .. } => "run_panicked",
        }
    }
}

/// # Errors raised by a worker or its factory.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerError {
    /// The worker process could not be created.
    #[error("failed to start worker: {reason}")]
    Spawn {
        /// Factory-supplied reason.
        reason: String,
    },

    /// The factory did not hand over a worker in time.
    #[error("worker did not start within {timeout:?}")]
    SpawnTimedOut {
        /// The spawn bound that was exceeded.
        timeout: Duration,
    },

    /// The worker's event stream ended without a stop acknowledgement.
    #[error("worker terminated unexpectedly")]
    Crashed,

    /// The worker did not acknowledge a stop request in time and was killed.
    #[error("worker did not stop within {timeout:?}")]
    Unresponsive {
        /// The stop acknowledgement bound that was exceeded.
        timeout: Duration,
    },
}

impl WorkerError {
    /// Creates a spawn failure from any displayable reason.
    pub fn spawn(reason: impl Into<String>) -> Self {
        WorkerError::Spawn {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use testvisor::WorkerError;
    ///
    /// assert_eq!(WorkerError::Crashed.as_label(), "worker_crashed");
    /// assert_eq!(WorkerError::spawn("no java").as_label(), "worker_spawn_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            WorkerError::Spawn { .. } => "worker_spawn_failed",
            WorkerError::SpawnTimedOut { .. } => "worker_spawn_timed_out",
            WorkerError::Crashed => "worker_crashed",
            WorkerError::Unresponsive { .. } => "worker_unresponsive",
        }
    }
}

/// # Errors produced by the [`LeaseCoordinator`](crate::LeaseCoordinator).
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseError {
    /// The coordinator was shut down; no further leases are granted.
    #[error("lease coordinator is shut down")]
    Closed,

    /// The lease was issued by a different coordinator.
    #[error("lease #{lease} was not issued by this coordinator")]
    Foreign {
        /// Id of the offending lease.
        lease: u64,
    },
}

impl LeaseError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            LeaseError::Closed => "lease_closed",
            LeaseError::Foreign { .. } => "lease_foreign",
        }
    }
}

/// Error returned when the dispatcher refuses a unit of work.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
    /// A unit with the same test identity was already dispatched in this run.
    #[error("test class '{name}' was already dispatched")]
    Duplicate {
        /// Test class name.
        name: Arc<str>,
    },

    /// The dispatcher was stopped.
    #[error("dispatcher is stopped")]
    Closed,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::Duplicate { .. } => "submit_duplicate",
            SubmitError::Closed => "submit_closed",
        }
    }
}

/// # An event from a worker that does not match the run state.
///
/// Violations are reported and the offending event is dropped from the
/// consolidated stream; they never abort the run.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// The test identity was never dispatched or already reached a terminal event.
    #[error("event for unknown or finished test '{test}' from worker {worker}")]
    UnknownTest {
        /// Test identity named by the event.
        test: Arc<str>,
        /// Reporting worker.
        worker: WorkerId,
    },

    /// `Started` was reported twice.
    #[error("test '{test}' started twice on worker {worker}")]
    AlreadyStarted {
        /// Test identity.
        test: Arc<str>,
        /// Reporting worker.
        worker: WorkerId,
    },

    /// `Output` or `Completed` arrived before `Started`.
    #[error("{event} for test '{test}' before it started on worker {worker}")]
    NotStarted {
        /// Test identity.
        test: Arc<str>,
        /// Reporting worker.
        worker: WorkerId,
        /// Offending event kind (`output` / `completed`).
        event: &'static str,
    },

    /// The test is bound to another worker.
    #[error("worker {worker} reported test '{test}' owned by worker {owner}")]
    WrongWorker {
        /// Test identity.
        test: Arc<str>,
        /// Reporting worker.
        worker: WorkerId,
        /// Worker the test is assigned to.
        owner: WorkerId,
    },
}

impl ProtocolViolation {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProtocolViolation::UnknownTest { .. } => "protocol_unknown_test",
            ProtocolViolation::AlreadyStarted { .. } => "protocol_already_started",
            ProtocolViolation::NotStarted { .. } => "protocol_not_started",
            ProtocolViolation::WrongWorker { .. } => "protocol_wrong_worker",
        }
    }

    /// Test identity the violation refers to.
    pub fn test(&self) -> &Arc<str> {
        match self {
            ProtocolViolation::UnknownTest { test, .. }
            | ProtocolViolation::AlreadyStarted { test, .. }
            | ProtocolViolation::NotStarted { test, .. }
            | ProtocolViolation::WrongWorker { test, .. } => test,
        }
    }

    /// Worker that reported the offending event.
    pub fn worker(&self) -> WorkerId {
        match self {
            ProtocolViolation::UnknownTest { worker, .. }
            | ProtocolViolation::AlreadyStarted { worker, .. }
            | ProtocolViolation::NotStarted { worker, .. }
            | ProtocolViolation::WrongWorker { worker, .. } => *worker,
        }
    }
}

/// # Errors raised while discovering candidate classes.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DetectionError {
    /// The detector could not decide on a candidate.
    #[error("detector failed on '{candidate}': {reason}")]
    Detector {
        /// Candidate class name.
        candidate: Arc<str>,
        /// Detector-supplied reason.
        reason: String,
    },

    /// A candidate file or directory could not be read.
    #[error("cannot read candidate {path:?}: {source}")]
    Io {
        /// Offending path, when known.
        path: Option<PathBuf>,
        /// Underlying walk error.
        #[source]
        source: walkdir::Error,
    },

    /// An include/exclude pattern is not a valid glob.
    #[error("invalid class filter pattern: {source}")]
    Pattern {
        /// Underlying glob error (carries the pattern).
        #[source]
        source: globset::Error,
    },
}

impl DetectionError {
    /// Creates a detector failure for `candidate`.
    pub fn detector(candidate: impl Into<Arc<str>>, reason: impl Into<String>) -> Self {
        DetectionError::Detector {
            candidate: candidate.into(),
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DetectionError::Detector { .. } => "detector_failed",
            DetectionError::Io { .. } => "candidate_unreadable",
            DetectionError::Pattern { .. } => "invalid_pattern",
        }
    }
}
