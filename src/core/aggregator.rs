//! # Result aggregator: one coherent outcome stream per run.
//!
//! The aggregator is a single task that owns the run state. Every other
//! component talks to it through an [`AggregatorHandle`], so all bookkeeping of
//! "which unit is where" happens in one place without locks.
//!
//! ## Architecture
//! ```text
//! ParallelDispatcher ── Dispatched / Resolve ──┐
//! ForkingProcessor   ── Assigned / Resolve ────┤
//! Pump 1..N          ── Worker(msg) / Exited ──┼──► aggregator task ──► TestEvent stream
//! Orchestrator       ── CancelAll / Finish ────┘        │               (RunHandle)
//!                                                       ├──► Bus (Test*, ProtocolViolation)
//!                                                       └──► watch<Progress>
//! ```
//!
//! ## Unit state machine
//! ```text
//! Dispatched ──► Queued ──► Assigned(w) ──► Started(w) ──► (terminal, removed)
//!                  │            │                ▲
//!                  └────────────┴── synthesized Started + Completed
//! ```
//!
//! ## Rules
//! - Every dispatched unit yields exactly one terminal `Completed`.
//! - A forwarded `Output`/`Completed` always follows a `Started` of the same
//!   identity; synthesized terminals for never-started units are preceded by
//!   a synthesized `Started`.
//! - Worker events that do not fit the state are dropped and reported as
//!   [`ProtocolViolation`]s; they never abort the run.
//! - After `cancel_all` the aggregator is closing: late worker events are
//!   dropped quietly and new registrations resolve as `Cancelled` at once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::run::RunSummary;
use crate::error::{ProtocolViolation, WorkerError};
use crate::events::{Bus, Event, EventKind, TestEvent, TestEventKind, TestOutcome};
use crate::execution::{RunId, UnitOfWork};
use crate::worker::{WorkerId, WorkerMessage};

/// Failure detail of units orphaned by a cancelled run.
pub(crate) const RUN_CANCELLED: &str = "run cancelled";

/// How a worker's event stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ExitCause {
    /// The worker acknowledged a stop request.
    Stopped,
    /// The event stream closed without acknowledgement.
    Crashed,
    /// The worker was force-terminated after ignoring a stop request.
    Unresponsive,
}

/// Dispatched and resolved unit counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub dispatched: u64,
    pub resolved: u64,
}

impl Progress {
    #[inline]
    pub fn in_flight(&self) -> u64 {
        self.dispatched.saturating_sub(self.resolved)
    }
}

pub(crate) enum Input {
    Dispatched(UnitOfWork),
    Assigned {
        test: Arc<str>,
        worker: WorkerId,
        done: oneshot::Sender<()>,
    },
    Worker {
        worker: WorkerId,
        msg: WorkerMessage,
    },
    WorkerExited {
        worker: WorkerId,
        cause: ExitCause,
        ack: oneshot::Sender<()>,
    },
    Resolve {
        test: Arc<str>,
        outcome: TestOutcome,
        detail: Arc<str>,
    },
    CancelAll {
        reason: Arc<str>,
        ack: oneshot::Sender<()>,
    },
    Finish {
        reply: oneshot::Sender<RunSummary>,
    },
}

/// Cloneable sender side of the aggregator.
#[derive(Clone, Debug)]
pub(crate) struct AggregatorHandle {
    tx: mpsc::UnboundedSender<Input>,
    progress: watch::Receiver<Progress>,
}

impl AggregatorHandle {
    fn send(&self, input: Input) {
        if self.tx.send(input).is_err() {
            debug!("aggregator input after finish dropped");
        }
    }

    /// Registers a unit accepted by the dispatcher.
    pub(crate) fn dispatched(&self, unit: UnitOfWork) {
        self.send(Input::Dispatched(unit));
    }

    /// Binds a unit to a worker. The receiver fires once the unit is resolved.
    pub(crate) fn assigned(&self, test: Arc<str>, worker: WorkerId) -> oneshot::Receiver<()> {
        let (done, rx) = oneshot::channel();
        self.send(Input::Assigned { test, worker, done });
        rx
    }

    pub(crate) fn worker_message(&self, worker: WorkerId, msg: WorkerMessage) {
        self.send(Input::Worker { worker, msg });
    }

    /// Reports a worker exit. The receiver fires after orphaned units were resolved.
    pub(crate) fn worker_exited(&self, worker: WorkerId, cause: ExitCause) -> oneshot::Receiver<()> {
        let (ack, rx) = oneshot::channel();
        self.send(Input::WorkerExited { worker, cause, ack });
        rx
    }

    /// Resolves a unit that never reached (or lost) its worker.
    pub(crate) fn resolve(&self, test: Arc<str>, outcome: TestOutcome, detail: impl Into<Arc<str>>) {
        self.send(Input::Resolve {
            test,
            outcome,
            detail: detail.into(),
        });
    }

    /// Resolves everything in flight as `Cancelled` and enters closing mode.
    pub(crate) async fn cancel_all(&self, reason: impl Into<Arc<str>>) {
        let (ack, rx) = oneshot::channel();
        self.send(Input::CancelAll {
            reason: reason.into(),
            ack,
        });
        let _ = rx.await;
    }

    /// Stops the aggregator and returns the final tally.
    pub(crate) async fn finish(&self) -> RunSummary {
        let (reply, rx) = oneshot::channel();
        self.send(Input::Finish { reply });
        rx.await.unwrap_or_default()
    }

    pub(crate) fn progress(&self) -> watch::Receiver<Progress> {
        self.progress.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Queued,
    Assigned(WorkerId),
    Started(WorkerId),
}

impl UnitState {
    fn worker(self) -> Option<WorkerId> {
        match self {
            UnitState::Queued => None,
            UnitState::Assigned(w) | UnitState::Started(w) => Some(w),
        }
    }
}

struct InFlight {
    state: UnitState,
    done: Option<oneshot::Sender<()>>,
}

/// Single-consumer owner of the run state.
pub(crate) struct ResultAggregator {
    run: RunId,
    bus: Bus,
    out: mpsc::UnboundedSender<TestEvent>,
    progress: watch::Sender<Progress>,
    in_flight: HashMap<Arc<str>, InFlight>,
    exited: HashMap<WorkerId, ExitCause>,
    summary: RunSummary,
    next_seq: u64,
    closing: bool,
}

impl ResultAggregator {
    /// Spawns the aggregator task.
    ///
    /// Consolidated events go to `out`; the sender is dropped when the
    /// aggregator finishes, which ends the caller's event stream.
    pub(crate) fn spawn(
        run: RunId,
        bus: Bus,
        out: mpsc::UnboundedSender<TestEvent>,
    ) -> (AggregatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (progress, progress_rx) = watch::channel(Progress::default());
        let me = Self {
            run,
            bus,
            out,
            progress,
            in_flight: HashMap::new(),
            exited: HashMap::new(),
            summary: RunSummary::default(),
            next_seq: 0,
            closing: false,
        };
        let join = tokio::spawn(me.run_loop(rx));
        (
            AggregatorHandle {
                tx,
                progress: progress_rx,
            },
            join,
        )
    }

    async fn run_loop(mut self, mut rx: mpsc::UnboundedReceiver<Input>) {
        while let Some(input) = rx.recv().await {
            match input {
                Input::Dispatched(unit) => self.on_dispatched(unit),
                Input::Assigned { test, worker, done } => self.on_assigned(test, worker, done),
                Input::Worker { worker, msg } => self.on_worker_message(worker, msg),
                Input::WorkerExited { worker, cause, ack } => {
                    self.on_worker_exited(worker, cause);
                    let _ = ack.send(());
                }
                Input::Resolve {
                    test,
                    outcome,
                    detail,
                } => {
                    if self.in_flight.contains_key(&test) {
                        self.resolve_synthesized(&test, outcome, detail);
                    }
                }
                Input::CancelAll { reason, ack } => {
                    self.on_cancel_all(&reason);
                    let _ = ack.send(());
                }
                Input::Finish { reply } => {
                    if !self.in_flight.is_empty() {
                        warn!(run = %self.run, left = self.in_flight.len(), "finishing with unresolved units");
                        self.on_cancel_all(RUN_CANCELLED);
                    }
                    let _ = reply.send(self.summary);
                    return;
                }
            }
        }
    }

    fn on_dispatched(&mut self, unit: UnitOfWork) {
        let test = unit.class_name;
        if self.in_flight.contains_key(&test) {
            warn!(run = %self.run, test = %test, "unit registered twice; ignoring");
            return;
        }
        self.in_flight.insert(
            Arc::clone(&test),
            InFlight {
                state: UnitState::Queued,
                done: None,
            },
        );
        self.progress.send_modify(|p| p.dispatched += 1);
        if self.closing {
            self.resolve_synthesized(&test, TestOutcome::Cancelled, Arc::from(RUN_CANCELLED));
        }
    }

    fn on_assigned(&mut self, test: Arc<str>, worker: WorkerId, done: oneshot::Sender<()>) {
        let Some(entry) = self.in_flight.get_mut(&test) else {
            // Already resolved (cancelled while the processor was spawning).
            let _ = done.send(());
            return;
        };
        entry.state = UnitState::Assigned(worker);
        entry.done = Some(done);

        if let Some(cause) = self.exited.get(&worker).copied() {
            let (outcome, detail) = orphan_outcome(cause);
            self.resolve_synthesized(&test, outcome, detail);
        }
    }

    fn on_worker_message(&mut self, worker: WorkerId, msg: WorkerMessage) {
        if self.closing {
            return;
        }
        match msg {
            WorkerMessage::Started { test } => {
                let Some(state) = self.in_flight.get(&test).map(|e| e.state) else {
                    return self.violation(ProtocolViolation::UnknownTest { test, worker });
                };
                match state {
                    UnitState::Assigned(owner) if owner == worker => {
                        if let Some(entry) = self.in_flight.get_mut(&test) {
                            entry.state = UnitState::Started(worker);
                        }
                        self.forward(test, Some(worker), false, TestEventKind::Started);
                    }
                    UnitState::Started(owner) if owner == worker => {
                        self.violation(ProtocolViolation::AlreadyStarted { test, worker });
                    }
                    UnitState::Assigned(owner) | UnitState::Started(owner) => {
                        self.violation(ProtocolViolation::WrongWorker { test, worker, owner });
                    }
                    UnitState::Queued => {
                        self.violation(ProtocolViolation::UnknownTest { test, worker });
                    }
                }
            }
            WorkerMessage::Output { test, stream, text } => {
                if let Some(v) = self.check_started(&test, worker, "output") {
                    return self.violation(v);
                }
                self.forward(test, Some(worker), false, TestEventKind::Output { stream, text });
            }
            WorkerMessage::Completed {
                test,
                outcome,
                failure,
            } => match self.check_started(&test, worker, "completed") {
                None => {
                    self.finalize(&test, Some(worker), false, outcome, failure);
                }
                Some(v @ ProtocolViolation::NotStarted { .. }) => {
                    // The owner finished a unit it never started: the raw event
                    // is dropped, the unit still gets exactly one terminal.
                    let detail: Arc<str> = Arc::from(v.to_string());
                    self.violation(v);
                    self.resolve_synthesized(&test, TestOutcome::Failed, detail);
                }
                Some(v) => self.violation(v),
            },
            WorkerMessage::Stopped => {}
        }
    }

    /// Returns a violation unless `test` is started on `worker`.
    fn check_started(
        &self,
        test: &Arc<str>,
        worker: WorkerId,
        event: &'static str,
    ) -> Option<ProtocolViolation> {
        let test = Arc::clone(test);
        match self.in_flight.get(&test).map(|e| e.state) {
            None | Some(UnitState::Queued) => Some(ProtocolViolation::UnknownTest { test, worker }),
            Some(UnitState::Started(owner)) if owner == worker => None,
            Some(UnitState::Assigned(owner)) if owner == worker => {
                Some(ProtocolViolation::NotStarted { test, worker, event })
            }
            Some(UnitState::Assigned(owner) | UnitState::Started(owner)) => {
                Some(ProtocolViolation::WrongWorker { test, worker, owner })
            }
        }
    }

    fn on_worker_exited(&mut self, worker: WorkerId, cause: ExitCause) {
        self.exited.insert(worker, cause);

        let mut orphans: Vec<Arc<str>> = self
            .in_flight
            .iter()
            .filter(|(_, e)| e.state.worker() == Some(worker))
            .map(|(name, _)| Arc::clone(name))
            .collect();
        orphans.sort_unstable();

        let (outcome, detail) = orphan_outcome(cause);
        for test in orphans {
            debug!(run = %self.run, worker = %worker, test = %test, ?cause, "resolving orphaned unit");
            self.resolve_synthesized(&test, outcome, Arc::clone(&detail));
        }
    }

    fn on_cancel_all(&mut self, reason: &str) {
        let mut pending: Vec<Arc<str>> = self.in_flight.keys().cloned().collect();
        pending.sort_unstable();
        if !pending.is_empty() {
            debug!(run = %self.run, reason, count = pending.len(), "cancelling in-flight units");
        }
        let detail: Arc<str> = Arc::from(RUN_CANCELLED);
        for test in pending {
            self.resolve_synthesized(&test, TestOutcome::Cancelled, Arc::clone(&detail));
        }
        self.closing = true;
    }

    /// Resolves a unit on behalf of its worker, synthesizing `Started` first
    /// when the worker never reported it.
    fn resolve_synthesized(&mut self, test: &Arc<str>, outcome: TestOutcome, detail: Arc<str>) {
        let Some(state) = self.in_flight.get(test).map(|e| e.state) else {
            return;
        };
        let worker = state.worker();
        if !matches!(state, UnitState::Started(_)) {
            self.forward(Arc::clone(test), worker, true, TestEventKind::Started);
        }
        self.finalize(test, worker, true, outcome, Some(detail));
    }

    fn finalize(
        &mut self,
        test: &Arc<str>,
        worker: Option<WorkerId>,
        synthesized: bool,
        outcome: TestOutcome,
        failure: Option<Arc<str>>,
    ) {
        let Some(entry) = self.in_flight.remove(test) else {
            return;
        };
        self.summary.record(outcome);
        self.forward(
            Arc::clone(test),
            worker,
            synthesized,
            TestEventKind::Completed { outcome, failure },
        );
        self.progress.send_modify(|p| p.resolved += 1);
        if let Some(done) = entry.done {
            let _ = done.send(());
        }
    }

    fn forward(
        &mut self,
        test: Arc<str>,
        worker: Option<WorkerId>,
        synthesized: bool,
        kind: TestEventKind,
    ) {
        let ev = TestEvent {
            seq: self.next_seq,
            at: SystemTime::now(),
            run: self.run.clone(),
            test,
            worker,
            synthesized,
            kind,
        };
        self.next_seq += 1;
        self.bus.publish(Event::from_test_event(&ev));
        let _ = self.out.send(ev);
    }

    fn violation(&mut self, v: ProtocolViolation) {
        warn!(run = %self.run, worker = %v.worker(), test = %v.test(), label = v.as_label(), "{v}");
        self.summary.violations += 1;
        self.bus.publish(
            Event::new(EventKind::ProtocolViolation)
                .with_run(self.run.as_arc())
                .with_worker(v.worker())
                .with_test(Arc::clone(v.test()))
                .with_reason(v.to_string()),
        );
    }
}

fn orphan_outcome(cause: ExitCause) -> (TestOutcome, Arc<str>) {
    match cause {
        ExitCause::Stopped => (TestOutcome::Cancelled, Arc::from(RUN_CANCELLED)),
        ExitCause::Crashed | ExitCause::Unresponsive => (
            TestOutcome::Failed,
            Arc::from(WorkerError::Crashed.to_string()),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OutputStream;

    fn setup() -> (AggregatorHandle, mpsc::UnboundedReceiver<TestEvent>, Bus) {
        let bus = Bus::new(64);
        let (tx, rx) = mpsc::unbounded_channel();
        let (handle, _join) = ResultAggregator::spawn(RunId::from("r"), bus.clone(), tx);
        (handle, rx, bus)
    }

    fn unit(name: &str) -> UnitOfWork {
        UnitOfWork::new(name, RunId::from("r"))
    }

    async fn drain(
        handle: &AggregatorHandle,
        mut rx: mpsc::UnboundedReceiver<TestEvent>,
    ) -> (Vec<TestEvent>, RunSummary) {
        let summary = handle.finish().await;
        let mut out = Vec::new();
        while let Some(ev) = rx.recv().await {
            out.push(ev);
        }
        (out, summary)
    }

    #[tokio::test]
    async fn test_normal_lifecycle_is_forwarded() {
        let (agg, rx, _bus) = setup();
        let w = WorkerId::from_raw(1);
        let test: Arc<str> = Arc::from("a.ATest");

        agg.dispatched(unit("a.ATest"));
        let done = agg.assigned(Arc::clone(&test), w);
        agg.worker_message(w, WorkerMessage::Started { test: Arc::clone(&test) });
        agg.worker_message(
            w,
            WorkerMessage::Output {
                test: Arc::clone(&test),
                stream: OutputStream::Stdout,
                text: Arc::from("hi"),
            },
        );
        agg.worker_message(
            w,
            WorkerMessage::Completed {
                test: Arc::clone(&test),
                outcome: TestOutcome::Passed,
                failure: None,
            },
        );
        done.await.unwrap();

        let (events, summary) = drain(&agg, rx).await;
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| !e.synthesized));
        assert_eq!(events[2].outcome(), Some(TestOutcome::Passed));
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.violations, 0);
    }

    #[tokio::test]
    async fn test_crash_resolves_started_unit_as_failed() {
        let (agg, rx, _bus) = setup();
        let w = WorkerId::from_raw(1);
        let test: Arc<str> = Arc::from("a.BTest");

        agg.dispatched(unit("a.BTest"));
        let done = agg.assigned(Arc::clone(&test), w);
        agg.worker_message(w, WorkerMessage::Started { test: Arc::clone(&test) });
        agg.worker_exited(w, ExitCause::Crashed).await.unwrap();
        done.await.unwrap();

        let (events, summary) = drain(&agg, rx).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].synthesized);
        assert_eq!(events[1].worker, Some(w));
        assert_eq!(events[1].failure(), Some("worker terminated unexpectedly"));
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_assignment_to_exited_worker_resolves_immediately() {
        let (agg, rx, _bus) = setup();
        let w = WorkerId::from_raw(9);

        agg.dispatched(unit("a.CTest"));
        agg.worker_exited(w, ExitCause::Crashed).await.unwrap();
        agg.assigned(Arc::from("a.CTest"), w).await.unwrap();

        let (events, _) = drain(&agg, rx).await;
        let kinds: Vec<_> = events.iter().map(|e| e.is_terminal()).collect();
        assert_eq!(kinds, vec![false, true]);
        assert!(events.iter().all(|e| e.synthesized));
    }

    #[tokio::test]
    async fn test_violations_are_dropped_and_reported() {
        let (agg, rx, bus) = setup();
        let mut bus_rx = bus.subscribe();
        let w1 = WorkerId::from_raw(1);
        let w2 = WorkerId::from_raw(2);
        let test: Arc<str> = Arc::from("a.DTest");

        agg.dispatched(unit("a.DTest"));
        let done = agg.assigned(Arc::clone(&test), w1);
        // Output before Started.
        agg.worker_message(
            w1,
            WorkerMessage::Output {
                test: Arc::clone(&test),
                stream: OutputStream::Stderr,
                text: Arc::from("early"),
            },
        );
        // Unknown identity.
        agg.worker_message(w1, WorkerMessage::Started { test: Arc::from("a.Nope") });
        agg.worker_message(w1, WorkerMessage::Started { test: Arc::clone(&test) });
        // Duplicate start and foreign worker.
        agg.worker_message(w1, WorkerMessage::Started { test: Arc::clone(&test) });
        agg.worker_message(w2, WorkerMessage::Started { test: Arc::clone(&test) });
        agg.worker_message(
            w1,
            WorkerMessage::Completed {
                test: Arc::clone(&test),
                outcome: TestOutcome::Failed,
                failure: Some(Arc::from("assertion")),
            },
        );
        done.await.unwrap();

        let (events, summary) = drain(&agg, rx).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].failure(), Some("assertion"));
        assert_eq!(summary.violations, 4);

        let mut reported = 0;
        while let Ok(ev) = bus_rx.try_recv() {
            if ev.kind == EventKind::ProtocolViolation {
                reported += 1;
            }
        }
        assert_eq!(reported, 4);
    }

    #[tokio::test]
    async fn test_completed_without_started_gets_synthesized_pair() {
        let (agg, rx, _bus) = setup();
        let w = WorkerId::from_raw(1);
        let test: Arc<str> = Arc::from("a.ETest");

        agg.dispatched(unit("a.ETest"));
        let done = agg.assigned(Arc::clone(&test), w);
        agg.worker_message(
            w,
            WorkerMessage::Completed {
                test: Arc::clone(&test),
                outcome: TestOutcome::Passed,
                failure: None,
            },
        );
        done.await.unwrap();

        let (events, summary) = drain(&agg, rx).await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.synthesized));
        assert_eq!(events[1].outcome(), Some(TestOutcome::Failed));
        assert_eq!(summary.violations, 1);
    }

    #[tokio::test]
    async fn test_cancel_all_closes_and_resolves_everything() {
        let (agg, rx, _bus) = setup();
        let w = WorkerId::from_raw(1);

        agg.dispatched(unit("a.Running"));
        agg.dispatched(unit("a.Queued"));
        let done = agg.assigned(Arc::from("a.Running"), w);
        agg.worker_message(w, WorkerMessage::Started { test: Arc::from("a.Running") });
        agg.cancel_all("cancel requested").await;
        done.await.unwrap();

        // Late events are dropped quietly; late registrations cancel at once.
        agg.worker_message(
            w,
            WorkerMessage::Completed {
                test: Arc::from("a.Running"),
                outcome: TestOutcome::Passed,
                failure: None,
            },
        );
        agg.dispatched(unit("a.Late"));

        let progress = agg.progress();
        let (events, summary) = drain(&agg, rx).await;
        assert_eq!(summary.cancelled, 3);
        assert_eq!(summary.violations, 0);
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 3);
        assert_eq!(*progress.borrow(), Progress { dispatched: 3, resolved: 3 });
    }
}
