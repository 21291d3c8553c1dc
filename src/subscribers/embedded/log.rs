//! # LogWriter: renders runtime events through `tracing`
//!
//! A minimal subscriber that turns incoming [`Event`]s into structured log
//! records under the `testvisor::events` target. Install any `tracing`
//! subscriber to see them.
//!
//! ## Example output (fmt subscriber)
//! ```text
//! INFO  testvisor::events: run started run="r1" name="Test Run r1"
//! DEBUG testvisor::events: worker started run="r1" worker=worker-1
//! INFO  testvisor::events: test completed run="r1" test="a.FooTest" outcome=passed
//! WARN  testvisor::events: test completed run="r1" test="a.BarTest" outcome=failed reason="expected 1"
//! WARN  testvisor::events: worker crashed run="r1" worker=worker-2 reason="worker terminated unexpectedly"
//! INFO  testvisor::events: run completed run="r1" status="failed" tests=2 elapsed_ms=31
//! ```

use async_trait::async_trait;
use tracing::{debug, info, trace, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

const TARGET: &str = "testvisor::events";

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let run = e.run.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        let worker = e.worker.map(|w| w.to_string()).unwrap_or_default();
        let test = e.test.as_deref().unwrap_or("");

        match e.kind {
            EventKind::RunStarted => {
                info!(target: TARGET, run, name = reason, "run started");
            }
            EventKind::RunDraining => {
                debug!(target: TARGET, run, dispatched = e.count, "run draining");
            }
            EventKind::RunCancelled => {
                warn!(target: TARGET, run, reason, "run cancelled");
            }
            EventKind::RunCompleted => {
                info!(
                    target: TARGET,
                    run,
                    status = reason,
                    tests = e.count,
                    elapsed_ms = e.elapsed_ms,
                    "run completed"
                );
            }
            EventKind::ShutdownRequested => {
                warn!(target: TARGET, run, signal = reason, "shutdown requested");
            }
            EventKind::WorkerStarted => {
                debug!(target: TARGET, run, worker = %worker, "worker started");
            }
            EventKind::WorkerRetired => {
                debug!(target: TARGET, run, worker = %worker, "worker retired");
            }
            EventKind::WorkerCrashed => {
                warn!(target: TARGET, run, worker = %worker, reason, "worker crashed");
            }
            EventKind::WorkerUnresponsive => {
                warn!(target: TARGET, run, worker = %worker, reason, "worker unresponsive");
            }
            EventKind::WorkerSpawnFailed => {
                warn!(target: TARGET, run, test, reason, "worker spawn failed");
            }
            EventKind::TestStarted => {
                debug!(target: TARGET, run, test, worker = %worker, "test started");
            }
            EventKind::TestOutput => {
                trace!(
                    target: TARGET,
                    run,
                    test,
                    stream = ?e.stream,
                    output = e.output.as_deref().unwrap_or(""),
                    "test output"
                );
            }
            EventKind::TestCompleted => {
                let outcome = e.outcome.map(|o| o.as_str()).unwrap_or("unknown");
                if e.outcome.is_some_and(|o| o.fails_run()) {
                    warn!(target: TARGET, run, test, outcome, reason, "test completed");
                } else {
                    info!(target: TARGET, run, test, outcome, "test completed");
                }
            }
            EventKind::ProtocolViolation => {
                warn!(target: TARGET, run, test, worker = %worker, reason, "protocol violation");
            }
            EventKind::DetectorFailed => {
                warn!(target: TARGET, run, candidate = test, reason, "detector failed");
            }
            EventKind::CandidateUnreadable => {
                warn!(target: TARGET, run, reason, "candidate unreadable");
            }
            EventKind::SubmitRejected => {
                warn!(target: TARGET, run, test, reason, "unit refused");
            }
            EventKind::SubscriberOverflow => {
                warn!(target: TARGET, reason, "subscriber overflow");
            }
            EventKind::SubscriberPanicked => {
                warn!(target: TARGET, reason, "subscriber panicked");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
