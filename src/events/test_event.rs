//! # Consolidated per-test events.
//!
//! [`TestEvent`] is the element of the run's consolidated outcome stream, the
//! one the [`ResultAggregator`](crate::core) forwards after checking it
//! against the run state.
//!
//! ## Lifecycle of one test identity
//! ```text
//! Started ──► Output* ──► Completed(outcome, failure?)
//! ```
//! A forwarded `Output` or `Completed` always follows the `Started` of the
//! same identity. Events synthesized by the runtime (crash, cancellation,
//! spawn failure) carry `synthesized = true`; when the unit never reached a
//! worker, `worker` is `None`.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use crate::execution::RunId;
use crate::worker::WorkerId;

/// Final result of one test identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    /// The test class ran and passed.
    Passed,
    /// The test class ran and failed, or its worker died under it.
    Failed,
    /// The worker decided not to run the class.
    Skipped,
    /// The run was cancelled before the class finished.
    Cancelled,
}

impl TestOutcome {
    /// Returns `true` if this outcome marks the whole run as failed.
    #[inline]
    pub fn fails_run(self) -> bool {
        matches!(self, TestOutcome::Failed | TestOutcome::Cancelled)
    }

    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            TestOutcome::Passed => "passed",
            TestOutcome::Failed => "failed",
            TestOutcome::Skipped => "skipped",
            TestOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream a piece of test output was written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// What happened to a test identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestEventKind {
    /// The worker began executing the test class.
    Started,
    /// The test class wrote output.
    Output {
        stream: OutputStream,
        text: Arc<str>,
    },
    /// Terminal event: exactly one per dispatched unit.
    Completed {
        outcome: TestOutcome,
        failure: Option<Arc<str>>,
    },
}

/// One element of the consolidated outcome stream.
#[derive(Debug, Clone)]
pub struct TestEvent {
    /// Position in the run's consolidated stream (starts at 0).
    pub seq: u64,
    /// Wall-clock timestamp of forwarding.
    pub at: SystemTime,
    /// Run this event belongs to.
    pub run: RunId,
    /// Test identity (class name).
    pub test: Arc<str>,
    /// Worker that produced the event, if any.
    pub worker: Option<WorkerId>,
    /// Whether the runtime generated this event on the worker's behalf.
    pub synthesized: bool,
    /// Event payload.
    pub kind: TestEventKind,
}

impl TestEvent {
    /// Returns `true` for the terminal `Completed` event.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, TestEventKind::Completed { .. })
    }

    /// Returns the outcome if this is a terminal event.
    pub fn outcome(&self) -> Option<TestOutcome> {
        match self.kind {
            TestEventKind::Completed { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    /// Returns the failure detail if this is a terminal event carrying one.
    pub fn failure(&self) -> Option<&str> {
        match &self.kind {
            TestEventKind::Completed { failure, .. } => failure.as_deref(),
            _ => None,
        }
    }
}
