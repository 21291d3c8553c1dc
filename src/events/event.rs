//! # Runtime events emitted by the orchestrator, processors and aggregator.
//!
//! The [`EventKind`] enum classifies event types across five categories:
//! - **Run events**: run lifecycle (started, draining, cancelled, completed)
//! - **Worker events**: worker lifecycle (started, retired, crashed, spawn failure)
//! - **Test events**: the consolidated per-test stream, republished for subscribers
//! - **Diagnostics**: protocol violations, detector failures, refused submissions
//! - **Subscriber events**: overflow and panics inside subscribers
//!
//! The [`Event`] struct carries additional metadata such as timestamps, run id,
//! worker id, test name and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use testvisor::{Event, EventKind, TestOutcome};
//!
//! let ev = Event::new(EventKind::TestCompleted)
//!     .with_run("run-1")
//!     .with_test("com.acme.FooTest")
//!     .with_outcome(TestOutcome::Failed)
//!     .with_reason("worker terminated unexpectedly");
//!
//! assert_eq!(ev.kind, EventKind::TestCompleted);
//! assert_eq!(ev.test.as_deref(), Some("com.acme.FooTest"));
//! assert_eq!(ev.outcome, Some(TestOutcome::Failed));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use super::test_event::{OutputStream, TestEvent, TestEventKind, TestOutcome};
use crate::worker::WorkerId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `reason`: `subscriber=<name> panic=<info>`
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `reason`: `subscriber=<name> reason=<full|closed>`
    SubscriberOverflow,

    // === Run lifecycle ===
    /// Run entered `Running`.
    ///
    /// Sets:
    /// - `run`, `reason` (display name)
    RunStarted,

    /// Class source exhausted; waiting for in-flight units.
    ///
    /// Sets:
    /// - `run`, `count` (units dispatched)
    RunDraining,

    /// Run cancelled (handle, timeout, OS signal or lease shutdown).
    ///
    /// Sets:
    /// - `run`, `reason`
    RunCancelled,

    /// Run reached `Stopped`.
    ///
    /// Sets:
    /// - `run`, `elapsed_ms`, `count` (tests), `reason` (status label)
    RunCompleted,

    /// OS termination signal observed by [`Orchestrator::execute`](crate::Orchestrator::execute).
    ShutdownRequested,

    // === Worker lifecycle ===
    /// A worker was spawned and bound to a lease.
    ///
    /// Sets:
    /// - `run`, `worker`
    WorkerStarted,

    /// A worker acknowledged a stop request and was torn down.
    ///
    /// Sets:
    /// - `run`, `worker`
    WorkerRetired,

    /// A worker terminated without being asked to.
    ///
    /// Sets:
    /// - `run`, `worker`, `reason`
    WorkerCrashed,

    /// A worker ignored a stop request past `stop_timeout` and was terminated.
    ///
    /// Sets:
    /// - `run`, `worker`, `reason`
    WorkerUnresponsive,

    /// The factory failed to create a worker.
    ///
    /// Sets:
    /// - `run`, `worker` (id that was reserved), `test` (unit failed with it), `reason`
    WorkerSpawnFailed,

    // === Consolidated test stream ===
    /// A test class started.
    ///
    /// Sets:
    /// - `run`, `test`, `worker` (if any)
    TestStarted,

    /// A test class wrote output.
    ///
    /// Sets:
    /// - `run`, `test`, `worker`, `stream`, `output`
    TestOutput,

    /// A test class reached its terminal event.
    ///
    /// Sets:
    /// - `run`, `test`, `worker` (if any), `outcome`, `reason` (failure detail)
    TestCompleted,

    // === Diagnostics ===
    /// A worker event did not match the run state and was dropped.
    ///
    /// Sets:
    /// - `run`, `test`, `worker`, `reason`
    ProtocolViolation,

    /// The detector raised on a candidate; the candidate was rejected.
    ///
    /// Sets:
    /// - `run`, `test` (candidate), `reason`
    DetectorFailed,

    /// A candidate file or directory could not be read.
    ///
    /// Sets:
    /// - `run`, `reason`
    CandidateUnreadable,

    /// The dispatcher refused a unit of work.
    ///
    /// Sets:
    /// - `run`, `test`, `reason`
    SubmitRejected,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Run identity, if applicable.
    pub run: Option<Arc<str>>,
    /// Worker identity, if applicable.
    pub worker: Option<WorkerId>,
    /// Test class name, if applicable.
    pub test: Option<Arc<str>>,
    /// Human-readable reason (errors, failure detail, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Test outcome (only for `TestCompleted`).
    pub outcome: Option<TestOutcome>,
    /// Output stream (only for `TestOutput`).
    pub stream: Option<OutputStream>,
    /// Output text (only for `TestOutput`).
    pub output: Option<Arc<str>>,
    /// Generic counter (units processed, tests dispatched, ...).
    pub count: Option<u64>,
    /// Elapsed time in milliseconds (compact).
    pub elapsed_ms: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            run: None,
            worker: None,
            test: None,
            reason: None,
            outcome: None,
            stream: None,
            output: None,
            count: None,
            elapsed_ms: None,
        }
    }

    #[inline]
    pub fn with_run(mut self, run: impl Into<Arc<str>>) -> Self {
        self.run = Some(run.into());
        self
    }

    #[inline]
    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.worker = Some(worker);
        self
    }

    #[inline]
    pub fn with_test(mut self, test: impl Into<Arc<str>>) -> Self {
        self.test = Some(test.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_outcome(mut self, outcome: TestOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    #[inline]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Attaches an elapsed duration (stored as milliseconds).
    #[inline]
    pub fn with_elapsed(mut self, d: Duration) -> Self {
        self.elapsed_ms = Some(d.as_millis().min(u128::from(u64::MAX)) as u64);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} panic={info}"))
    }

    /// Republishes a consolidated test event on the bus.
    pub fn from_test_event(ev: &TestEvent) -> Self {
        let base = Event::new(match ev.kind {
            TestEventKind::Started => EventKind::TestStarted,
            TestEventKind::Output { .. } => EventKind::TestOutput,
            TestEventKind::Completed { .. } => EventKind::TestCompleted,
        })
        .with_run(ev.run.as_arc())
        .with_test(Arc::clone(&ev.test));

        let mut out = match ev.worker {
            Some(w) => base.with_worker(w),
            None => base,
        };
        match &ev.kind {
            TestEventKind::Started => {}
            TestEventKind::Output { stream, text } => {
                out.stream = Some(*stream);
                out.output = Some(Arc::clone(text));
            }
            TestEventKind::Completed { outcome, failure } => {
                out.outcome = Some(*outcome);
                out.reason = failure.clone();
            }
        }
        out
    }

    #[inline]
    pub fn is_test_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::TestStarted | EventKind::TestOutput | EventKind::TestCompleted
        )
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RunId;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::RunStarted);
        let b = Event::new(EventKind::RunStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_from_completed_test_event() {
        let te = TestEvent {
            seq: 3,
            at: SystemTime::now(),
            run: RunId::from("r"),
            test: Arc::from("a.BTest"),
            worker: Some(WorkerId::from_raw(2)),
            synthesized: true,
            kind: TestEventKind::Completed {
                outcome: TestOutcome::Failed,
                failure: Some(Arc::from("worker terminated unexpectedly")),
            },
        };
        let ev = Event::from_test_event(&te);
        assert_eq!(ev.kind, EventKind::TestCompleted);
        assert!(ev.is_test_event());
        assert_eq!(ev.worker, Some(WorkerId::from_raw(2)));
        assert_eq!(ev.outcome, Some(TestOutcome::Failed));
        assert_eq!(
            ev.reason.as_deref(),
            Some("worker terminated unexpectedly")
        );
    }
}
