//! # Run handle and completion types.
//!
//! [`Orchestrator::start`](crate::Orchestrator::start) returns a [`RunHandle`]:
//! the caller's side of one run. It exposes the consolidated [`TestEvent`]
//! stream, the current [`RunPhase`], cancellation, and the final
//! [`RunCompletion`].
//!
//! ```text
//! Idle ──► Running ──► Draining ──► Stopped
//!             │                        ▲
//!             └──── cancel ────────────┘
//! ```

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::RunError;
use crate::events::{TestEvent, TestOutcome};
use crate::execution::RunId;

/// Lifecycle phase of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Created, nothing dispatched yet.
    Idle,
    /// Class source is being consumed and units dispatched.
    Running,
    /// Class source exhausted; waiting for in-flight units.
    Draining,
    /// Pool torn down, completion emitted.
    Stopped,
}

/// Why a run was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// [`RunHandle::cancel`] was called.
    Requested,
    /// The configured run timeout elapsed.
    TimedOut,
    /// An OS termination signal arrived during [`Orchestrator::execute`](crate::Orchestrator::execute).
    Signal,
    /// The lease coordinator was shut down while workers were still needed.
    LeasesClosed,
    /// Class enumeration died before the source was exhausted.
    SourceFailed,
}

impl CancelReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::Requested => "cancel requested",
            CancelReason::TimedOut => "run timed out",
            CancelReason::Signal => "shutdown signal received",
            CancelReason::LeasesClosed => "lease coordinator is shut down",
            CancelReason::SourceFailed => "class source failed",
        }
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final verdict of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Every unit passed or was skipped.
    Succeeded,
    /// At least one unit failed or was cancelled.
    Failed,
    /// The run was cancelled from outside.
    Cancelled(CancelReason),
    /// The run could not continue (e.g. no more leases).
    Aborted(Arc<str>),
}

impl RunStatus {
    pub fn as_label(&self) -> &'static str {
        match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled(_) => "cancelled",
            RunStatus::Aborted(_) => "aborted",
        }
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Succeeded)
    }
}

/// Per-outcome tally of terminal events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub cancelled: u64,
    /// Worker events dropped for not matching the run state.
    pub violations: u64,
}

impl RunSummary {
    pub(crate) fn record(&mut self, outcome: TestOutcome) {
        self.total += 1;
        match outcome {
            TestOutcome::Passed => self.passed += 1,
            TestOutcome::Failed => self.failed += 1,
            TestOutcome::Skipped => self.skipped += 1,
            TestOutcome::Cancelled => self.cancelled += 1,
        }
    }

    /// Returns `true` if any terminal outcome fails the run.
    #[inline]
    pub fn has_failures(&self) -> bool {
        self.failed > 0 || self.cancelled > 0
    }
}

/// Completion signal of one run.
#[derive(Debug, Clone)]
pub struct RunCompletion {
    pub run: RunId,
    pub display_name: Arc<str>,
    pub elapsed: Duration,
    pub summary: RunSummary,
    pub status: RunStatus,
}

impl RunCompletion {
    #[inline]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Cancellation state shared by everything working on one run.
///
/// The first recorded reason wins.
#[derive(Debug)]
pub(crate) struct RunControl {
    token: CancellationToken,
    reason: OnceLock<CancelReason>,
}

impl RunControl {
    pub(crate) fn new(token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            token,
            reason: OnceLock::new(),
        })
    }

    pub(crate) fn cancel(&self, reason: CancelReason) {
        let _ = self.reason.set(reason);
        self.token.cancel();
    }

    #[inline]
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn reason(&self) -> Option<CancelReason> {
        self.reason.get().copied()
    }
}

/// Caller's side of a started run.
///
/// Dropping the handle does not cancel the run.
#[derive(Debug)]
pub struct RunHandle {
    pub(crate) run: RunId,
    pub(crate) control: Arc<RunControl>,
    pub(crate) phase: watch::Receiver<RunPhase>,
    pub(crate) events: mpsc::UnboundedReceiver<TestEvent>,
    pub(crate) join: JoinHandle<RunCompletion>,
}

impl RunHandle {
    #[inline]
    pub fn run_id(&self) -> &RunId {
        &self.run
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> RunPhase {
        *self.phase.borrow()
    }

    /// Watch receiver for phase transitions.
    pub fn phases(&self) -> watch::Receiver<RunPhase> {
        self.phase.clone()
    }

    /// Requests cancellation; in-flight and queued units resolve as `Cancelled`.
    pub fn cancel(&self) {
        self.control.cancel(CancelReason::Requested);
    }

    /// Next consolidated test event, or `None` once the run has finished.
    pub async fn next_event(&mut self) -> Option<TestEvent> {
        self.events.recv().await
    }

    /// Waits for the run to complete.
    ///
    /// Events not yet taken with [`next_event`](Self::next_event) are discarded.
    pub async fn wait(self) -> Result<RunCompletion, RunError> {
        self.join.await.map_err(|e| RunError::Panicked {
            reason: e.to_string(),
        })
    }

    /// Drains the remaining events and waits for completion.
    pub async fn collect(mut self) -> Result<(Vec<TestEvent>, RunCompletion), RunError> {
        let mut out = Vec::new();
        while let Some(ev) = self.events.recv().await {
            out.push(ev);
        }
        let completion = self.wait().await?;
        Ok((out, completion))
    }
}
