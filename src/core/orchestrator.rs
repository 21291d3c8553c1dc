//! # Orchestrator: drives test runs from class source to completion.
//!
//! The [`Orchestrator`] owns the event bus, a [`SubscriberSet`], the worker
//! factory and the shared [`LeaseCoordinator`]. Each [`start`](Orchestrator::start)
//! spawns one run task and returns a [`RunHandle`].
//!
//! ## Run task
//! ```text
//! start(spec)
//!   ├─► ResultAggregator::spawn           (TestEvent stream ─► RunHandle)
//!   ├─► forks = min(max_parallel_forks, lease budget)
//!   ├─► ParallelDispatcher(forks)
//!   │      └─ member = RestartEveryN(ForkingProcessor, fork_every)
//!   ├─► ClassSource::spawn                (blocking thread, bounded channel)
//!   │
//!   ├─► Running:  recv name ─► dispatcher.submit(unit)   (until source exhausted)
//!   ├─► Draining: dispatcher.close_intake() (idle members retire)
//!   │             wait progress.resolved >= submitted
//!   ├─► dispatcher.stop()                 (members stop their workers)
//!   ├─► aggregator.finish()               (RunSummary)
//!   └─► Stopped:  RunCompleted
//!
//! Cancellation (handle, run timeout, lease shutdown, OS signal in execute()):
//!   token.cancel()
//!     ├─► class source stops
//!     ├─► aggregator.cancel_all()   (every unresolved unit ─► Cancelled)
//!     └─► dispatcher.stop() ─► completion
//! ```
//!
//! ## Rules
//! - The lease coordinator is the only state shared between runs.
//! - Every submitted unit yields exactly one terminal event before `RunCompleted`.
//! - All leases taken by a run are returned before its completion is reported.
//! - A cancel that lands after every unit resolved does not change the verdict.
//! - A class source that dies mid-enumeration aborts the run.
//!
//! ## Example
//! ```rust
//! use testvisor::{
//!     ClassContext, ClassFailure, Config, ExecutionSpec, CandidateSource,
//!     Orchestrator, RunStatus, WorkerFn,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let factory = WorkerFn::arc("in-process", |ctx: ClassContext| async move {
//!         if ctx.class_name().ends_with("BrokenTest") {
//!             return Err(ClassFailure::new("expected 1, got 2"));
//!         }
//!         ctx.stdout(format!("ran {}", ctx.class_name()));
//!         Ok(())
//!     });
//!
//!     let mut cfg = Config::default();
//!     cfg.max_workers = 2;
//!     let orch = Orchestrator::builder(cfg, factory).build();
//!
//!     let spec = ExecutionSpec::builder("demo")
//!         .with_candidates(CandidateSource::names(["a.OkTest", "a.BrokenTest"]))
//!         .with_max_parallel_forks(2)
//!         .build();
//!
//!     let (events, done) = orch.start(spec).collect().await?;
//!     assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 2);
//!     assert_eq!(done.status, RunStatus::Failed);
//!     assert_eq!(done.summary.failed, 1);
//!     Ok(())
//! }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::aggregator::{AggregatorHandle, Progress, RUN_CANCELLED, ResultAggregator};
use super::builder::OrchestratorBuilder;
use super::config::Config;
use super::lease::LeaseCoordinator;
use super::run::{CancelReason, RunCompletion, RunControl, RunHandle, RunPhase, RunStatus};
use super::shutdown;
use crate::detection::ClassSource;
use crate::error::{RunError, SubmitError};
use crate::events::{Bus, Event, EventKind, TestEvent};
use crate::execution::{ExecutionSpec, UnitOfWork};
use crate::processors::{
    ForkingProcessor, ParallelDispatcher, RestartEveryN, TestClassProcessor, WorkerContext,
};
use crate::subscribers::SubscriberSet;
use crate::worker::WorkerRef;

/// Runs test classes across a bounded pool of forked workers.
pub struct Orchestrator {
    cfg: Config,
    factory: WorkerRef,
    leases: Arc<LeaseCoordinator>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
}

impl Orchestrator {
    /// Starts building an orchestrator around `factory`.
    pub fn builder(cfg: Config, factory: WorkerRef) -> OrchestratorBuilder {
        OrchestratorBuilder::new(cfg, factory)
    }

    pub(crate) fn new_internal(
        cfg: Config,
        factory: WorkerRef,
        leases: Arc<LeaseCoordinator>,
        bus: Bus,
        subs: Arc<SubscriberSet>,
    ) -> Self {
        Self {
            cfg,
            factory,
            leases,
            bus,
            subs,
        }
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// The shared worker budget.
    #[inline]
    pub fn leases(&self) -> &Arc<LeaseCoordinator> {
        &self.leases
    }

    /// Receiver for runtime events published after this call.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    pub(crate) fn subscriber_listener(&self) {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Starts a run and returns its handle.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, spec: ExecutionSpec) -> RunHandle {
        let control = RunControl::new(CancellationToken::new());
        let (phase_tx, phase_rx) = watch::channel(RunPhase::Idle);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let run = spec.run_id().clone();

        let task = RunTask {
            cfg: self.cfg.clone(),
            factory: Arc::clone(&self.factory),
            leases: Arc::clone(&self.leases),
            bus: self.bus.clone(),
            control: Arc::clone(&control),
            phase: phase_tx,
            spec,
        };
        let join = tokio::spawn(task.drive(events_tx));

        RunHandle {
            run,
            control,
            phase: phase_rx,
            events: events_rx,
            join,
        }
    }

    /// Runs `spec` to completion, cancelling it on a termination signal.
    ///
    /// Consolidated test events are only visible to subscribers; use
    /// [`start`](Self::start) to consume them directly.
    pub async fn execute(&self, spec: ExecutionSpec) -> Result<RunCompletion, RunError> {
        let handle = self.start(spec);
        let control = Arc::clone(&handle.control);
        let run = handle.run.clone();
        let bus = self.bus.clone();

        let watcher = tokio::spawn(async move {
            match shutdown::wait_for_shutdown_signal().await {
                Ok(signal) => {
                    info!(run = %run, %signal, "shutdown signal received; cancelling run");
                    bus.publish(
                        Event::new(EventKind::ShutdownRequested)
                            .with_run(run.as_arc())
                            .with_reason(signal.as_str()),
                    );
                    control.cancel(CancelReason::Signal);
                }
                Err(e) => warn!(run = %run, error = %e, "cannot listen for shutdown signals"),
            }
        });

        let res = handle.wait().await;
        watcher.abort();
        res
    }
}

/// Everything the run task owns.
struct RunTask {
    cfg: Config,
    factory: WorkerRef,
    leases: Arc<LeaseCoordinator>,
    bus: Bus,
    control: Arc<RunControl>,
    phase: watch::Sender<RunPhase>,
    spec: ExecutionSpec,
}

impl RunTask {
    async fn drive(self, events: mpsc::UnboundedSender<TestEvent>) -> RunCompletion {
        let started = Instant::now();
        let run = self.spec.run_id().clone();
        let token = self.control.token().clone();

        let (aggregator, aggregator_join) =
            ResultAggregator::spawn(run.clone(), self.bus.clone(), events);

        let requested = self.spec.max_parallel_forks();
        let forks = self
            .cfg
            .effective_parallelism(requested, self.leases.budget());
        if forks < requested {
            info!(
                run = %run,
                requested,
                budget = self.leases.budget(),
                forks,
                "max parallel forks clamped to worker budget"
            );
        }

        let ctx = Arc::new(WorkerContext {
            run: run.clone(),
            factory: Arc::clone(&self.factory),
            leases: Arc::clone(&self.leases),
            aggregator: aggregator.clone(),
            bus: self.bus.clone(),
            launch: Arc::clone(self.spec.launch_options()),
            classpath: Arc::clone(self.spec.classpath()),
            stop_timeout: self.cfg.stop_timeout,
            spawn_timeout: self.cfg.spawn_deadline(),
            control: Arc::clone(&self.control),
        });
        let fork_every = self.spec.fork_every();
        let mut dispatcher = ParallelDispatcher::new(
            run.clone(),
            forks,
            move || RestartEveryN::new(ForkingProcessor::new(Arc::clone(&ctx)), fork_every),
            aggregator.clone(),
            token.clone(),
        );

        let timer = self.cfg.run_deadline().map(|limit| self.arm_timeout(limit));

        self.phase.send_replace(RunPhase::Running);
        info!(run = %run, name = %self.spec.display_name(), forks, "run started");
        self.bus.publish(
            Event::new(EventKind::RunStarted)
                .with_run(run.as_arc())
                .with_reason(self.spec.display_name()),
        );

        let source = ClassSource::new(
            run.clone(),
            self.spec.candidates().clone(),
            self.spec.detector().cloned(),
            self.bus.clone(),
        );
        let (mut names, source_join) = source.spawn(self.cfg.class_queue_capacity, token.clone());

        let mut submitted = 0u64;
        loop {
            let name = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                name = names.recv() => match name {
                    Some(name) => name,
                    None => break,
                },
            };
            match dispatcher.submit(UnitOfWork::new(name, run.clone())).await {
                Ok(()) => submitted += 1,
                Err(e) => {
                    warn!(run = %run, error = %e, "unit refused");
                    let ev = Event::new(EventKind::SubmitRejected)
                        .with_run(run.as_arc())
                        .with_reason(e.to_string());
                    self.bus.publish(match &e {
                        SubmitError::Duplicate { name } => ev.with_test(Arc::clone(name)),
                        _ => ev,
                    });
                }
            }
        }
        drop(names);
        match source_join.await {
            Ok(produced) => debug!(run = %run, produced, submitted, "class source finished"),
            Err(e) => {
                warn!(run = %run, error = %e, "class source failed; aborting run");
                self.control.cancel(CancelReason::SourceFailed);
            }
        }

        // Once every unit is resolved, a late timeout or cancel no longer counts.
        let mut drained = false;
        if !token.is_cancelled() {
            // Idle members hand their leases back while the rest drain.
            dispatcher.close_intake().await;
            self.phase.send_replace(RunPhase::Draining);
            debug!(run = %run, submitted, "draining");
            self.bus.publish(
                Event::new(EventKind::RunDraining)
                    .with_run(run.as_arc())
                    .with_count(submitted),
            );
            drained = tokio::select! {
                biased;
                _ = all_resolved(aggregator.progress(), submitted) => true,
                _ = token.cancelled() => false,
            };
        }
        if let Some(timer) = timer {
            timer.abort();
        }

        let cancelled = if !drained && token.is_cancelled() {
            let reason = self.control.reason().unwrap_or(CancelReason::Requested);
            self.on_cancelled(&aggregator, reason).await;
            Some(reason)
        } else {
            None
        };

        dispatcher.stop().await;
        let summary = aggregator.finish().await;
        drop(aggregator);
        if let Err(e) = aggregator_join.await {
            warn!(run = %run, error = %e, "aggregator task failed");
        }

        let status = match cancelled {
            Some(reason @ (CancelReason::LeasesClosed | CancelReason::SourceFailed)) => {
                RunStatus::Aborted(Arc::from(reason.as_str()))
            }
            Some(reason) => RunStatus::Cancelled(reason),
            None if summary.has_failures() => RunStatus::Failed,
            None => RunStatus::Succeeded,
        };
        let elapsed = started.elapsed();

        info!(
            run = %run,
            status = status.as_label(),
            total = summary.total,
            passed = summary.passed,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "run completed"
        );
        self.bus.publish(
            Event::new(EventKind::RunCompleted)
                .with_run(run.as_arc())
                .with_count(summary.total)
                .with_elapsed(elapsed)
                .with_reason(status.as_label()),
        );
        self.phase.send_replace(RunPhase::Stopped);

        RunCompletion {
            run,
            display_name: Arc::from(self.spec.display_name()),
            elapsed,
            summary,
            status,
        }
    }

    fn arm_timeout(&self, limit: Duration) -> JoinHandle<()> {
        let control = Arc::clone(&self.control);
        let run = self.spec.run_id().clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(limit) => {
                    warn!(run = %run, timeout = ?limit, "run timed out");
                    control.cancel(CancelReason::TimedOut);
                }
                _ = control.token().cancelled() => {}
            }
        })
    }

    async fn on_cancelled(&self, aggregator: &AggregatorHandle, reason: CancelReason) {
        let run = self.spec.run_id();
        if *self.phase.borrow() == RunPhase::Running {
            self.phase.send_replace(RunPhase::Draining);
        }
        info!(run = %run, reason = %reason, "run cancelled");
        self.bus.publish(
            Event::new(EventKind::RunCancelled)
                .with_run(run.as_arc())
                .with_reason(reason.as_str()),
        );
        aggregator.cancel_all(RUN_CANCELLED).await;
    }
}

/// Completes once `target` units reached a terminal event.
async fn all_resolved(mut progress: watch::Receiver<Progress>, target: u64) {
    let _ = progress.wait_for(|p| p.resolved >= target).await;
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::detection::CandidateSource;
    use crate::events::{TestEventKind, TestOutcome};
    use crate::policies::ForkEvery;
    use crate::test_support::{Script, ScriptedFactory, StalledFactory};

    fn config(max_workers: usize) -> Config {
        Config {
            max_workers,
            stop_timeout: Duration::from_millis(100),
            ..Config::default()
        }
    }

    fn spec(names: &[&str], forks: usize, every: i64) -> ExecutionSpec {
        ExecutionSpec::builder("run-1")
            .with_candidates(CandidateSource::names(names.iter().copied()))
            .with_max_parallel_forks(forks)
            .with_fork_every(ForkEvery::from_count(every))
            .build()
    }

    fn class_names(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("a.T{i}")).collect()
    }

    fn refs(names: &[String]) -> Vec<&str> {
        names.iter().map(String::as_str).collect()
    }

    /// Every test has exactly one terminal event, preceded by its Started.
    fn assert_well_formed(events: &[TestEvent]) {
        let mut started = HashSet::new();
        let mut finished = HashSet::new();
        for ev in events {
            match &ev.kind {
                TestEventKind::Started => {
                    assert!(started.insert(ev.test.clone()), "started twice: {}", ev.test);
                }
                TestEventKind::Output { .. } => {
                    assert!(started.contains(&ev.test), "output before start: {}", ev.test);
                }
                TestEventKind::Completed { .. } => {
                    assert!(started.contains(&ev.test), "completed before start: {}", ev.test);
                    assert!(finished.insert(ev.test.clone()), "two terminals: {}", ev.test);
                }
            }
        }
        assert_eq!(started, finished);
    }

    #[tokio::test]
    async fn test_four_classes_two_forks_reuse_workers() {
        // Pairs that must run side by side force one class per worker per round.
        let first = Arc::new(tokio::sync::Barrier::new(2));
        let second = Arc::new(tokio::sync::Barrier::new(2));
        let factory = Arc::new(
            ScriptedFactory::new()
                .script("a.T1", Script::Barrier(Arc::clone(&first)))
                .script("a.T2", Script::Barrier(Arc::clone(&first)))
                .script("a.T3", Script::Barrier(Arc::clone(&second)))
                .script("a.T4", Script::Barrier(Arc::clone(&second))),
        );
        let orch = Orchestrator::builder(config(4), factory.clone()).build();

        let names = class_names(4);
        let (events, done) = orch
            .start(spec(&refs(&names), 2, 0))
            .collect()
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.summary.passed, 4);
        assert_well_formed(&events);
        assert_eq!(factory.spawns(), 2);
        let mut per_worker: Vec<usize> = factory
            .units_per_worker()
            .iter()
            .map(Vec::len)
            .collect();
        per_worker.sort_unstable();
        assert_eq!(per_worker, vec![2, 2]);
        assert_eq!(orch.leases().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_fork_every_bounds_classes_per_worker() {
        let factory = Arc::new(ScriptedFactory::new());
        let orch = Orchestrator::builder(config(4), factory.clone()).build();

        let names = class_names(5);
        let done = orch.start(spec(&refs(&names), 1, 2)).wait().await.unwrap();

        assert!(done.is_success());
        assert_eq!(factory.spawns(), 3);
        let per_worker: Vec<usize> = factory
            .units_per_worker()
            .iter()
            .map(Vec::len)
            .collect();
        assert_eq!(per_worker, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_crash_fails_only_the_running_class() {
        let factory = Arc::new(ScriptedFactory::new().script("a.T2", Script::CrashAfterStart));
        let orch = Orchestrator::builder(config(2), factory.clone()).build();

        let names = class_names(3);
        let (events, done) = orch
            .start(spec(&refs(&names), 1, 0))
            .collect()
            .await
            .unwrap();

        assert_eq!(done.status, RunStatus::Failed);
        assert_eq!(done.summary.passed, 2);
        assert_eq!(done.summary.failed, 1);
        assert_well_formed(&events);

        let crashed = events
            .iter()
            .find(|e| &*e.test == "a.T2" && e.is_terminal())
            .unwrap();
        assert_eq!(crashed.outcome(), Some(TestOutcome::Failed));
        assert_eq!(crashed.failure(), Some("worker terminated unexpectedly"));
        assert_eq!(factory.spawns(), 2);
        assert_eq!(orch.leases().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_cancel_resolves_in_flight_and_queued() {
        let factory = Arc::new(
            ScriptedFactory::new()
                .script("a.T1", Script::Hang)
                .script("a.T2", Script::Hang),
        );
        let orch = Orchestrator::builder(config(4), factory.clone()).build();
        let mut bus = orch.subscribe();

        let names = class_names(5);
        let mut handle = orch.start(spec(&refs(&names), 2, 0));

        // All five dispatched: two running, three queued.
        while bus.recv().await.unwrap().kind != EventKind::RunDraining {}
        let mut started = 0;
        while started < 2 {
            let ev = handle.next_event().await.unwrap();
            if matches!(ev.kind, TestEventKind::Started) {
                started += 1;
            }
        }
        handle.cancel();

        let (rest, done) = handle.collect().await.unwrap();
        assert_eq!(done.status, RunStatus::Cancelled(CancelReason::Requested));
        assert_eq!(done.summary.total, 5);
        assert_eq!(done.summary.cancelled, 5);
        assert_eq!(rest.iter().filter(|e| e.is_terminal()).count(), 5);
        assert_eq!(orch.leases().outstanding(), 0);
        assert_eq!(factory.spawns(), 2);
    }

    #[tokio::test]
    async fn test_skipped_classes_do_not_fail_the_run() {
        let factory = Arc::new(
            ScriptedFactory::new()
                .script("a.T1", Script::Skip)
                .script("a.T2", Script::Fail("expected 1 but was 2")),
        );
        let orch = Orchestrator::builder(config(2), factory).build();

        let done = orch.start(spec(&["a.T1", "a.T3"], 2, 0)).wait().await.unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.summary.skipped, 1);

        let (events, done) = orch
            .start(spec(&["a.T1", "a.T2"], 2, 0))
            .collect()
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Failed);
        let failed = events
            .iter()
            .find(|e| e.outcome() == Some(TestOutcome::Failed))
            .unwrap();
        assert_eq!(&*failed.test, "a.T2");
        assert_eq!(failed.failure(), Some("expected 1 but was 2"));
    }

    #[tokio::test]
    async fn test_scan_mode_runs_detected_classes() {
        use crate::detection::{Candidate, ClassFileTree, DetectorRef};
        use crate::error::DetectionError;

        let dir = tempfile::tempdir().unwrap();
        for rel in ["p/ATest.class", "p/ATest$1.class", "p/Util.class", "p/q/BTest.class"] {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, b"").unwrap();
        }
        let detector: DetectorRef = Arc::new(|c: &Candidate| -> Result<bool, DetectionError> {
            Ok(c.name.ends_with("Test"))
        });
        let spec = ExecutionSpec::builder("scan")
            .with_candidates(CandidateSource::from(ClassFileTree::new(dir.path())))
            .with_detector(detector)
            .with_max_parallel_forks(2)
            .build();

        let factory = Arc::new(ScriptedFactory::new());
        let orch = Orchestrator::builder(config(2), factory.clone()).build();
        let (events, done) = orch.start(spec).collect().await.unwrap();

        assert!(done.is_success());
        let mut ran: Vec<String> = events
            .iter()
            .filter(|e| e.is_terminal())
            .map(|e| e.test.to_string())
            .collect();
        ran.sort();
        assert_eq!(ran, vec!["p.ATest", "p.q.BTest"]);
    }

    #[tokio::test]
    async fn test_live_workers_never_exceed_budget() {
        let factory = Arc::new(ScriptedFactory::new().with_default(Script::Sleep(
            Duration::from_millis(5),
        )));
        let orch = Orchestrator::builder(config(3), factory.clone()).build();

        let names = class_names(24);
        let done = orch.start(spec(&refs(&names), 8, 3)).wait().await.unwrap();

        assert_eq!(done.summary.passed, 24);
        assert!(factory.peak_live() <= 3, "peak {}", factory.peak_live());
        assert!(orch.leases().peak_outstanding() <= 3);
        assert_eq!(orch.leases().outstanding(), 0);
        assert_eq!(
            orch.leases().acquired_total(),
            orch.leases().released_total()
        );
    }

    #[tokio::test]
    async fn test_protocol_violations_do_not_leak_into_stream() {
        let factory = Arc::new(
            ScriptedFactory::new()
                .script("a.T1", Script::CompleteWithoutStart)
                .script("a.T2", Script::OutputBeforeStart),
        );
        let orch = Orchestrator::builder(config(2), factory).build();

        let names = class_names(3);
        let (events, done) = orch
            .start(spec(&refs(&names), 1, 0))
            .collect()
            .await
            .unwrap();

        assert_well_formed(&events);
        assert_eq!(done.summary.total, 3);
        assert!(done.summary.violations >= 2);
    }

    #[tokio::test]
    async fn test_run_timeout_cancels() {
        let factory = Arc::new(ScriptedFactory::new().script("a.T1", Script::Hang));
        let mut cfg = config(2);
        cfg.run_timeout = Duration::from_millis(50);
        let orch = Orchestrator::builder(cfg, factory).build();

        let done = orch
            .start(spec(&["a.T1", "a.T2"], 1, 0))
            .wait()
            .await
            .unwrap();
        assert_eq!(done.status, RunStatus::Cancelled(CancelReason::TimedOut));
        assert_eq!(done.summary.total, 2);
        assert!(!done.is_success());
    }

    #[tokio::test]
    async fn test_run_timeout_ends_stalled_spawn() {
        let mut cfg = config(1);
        cfg.run_timeout = Duration::from_millis(50);
        let orch = Orchestrator::builder(cfg, Arc::new(StalledFactory)).build();

        let done = tokio::time::timeout(
            Duration::from_secs(2),
            orch.start(spec(&["a.T1"], 1, 0)).wait(),
        )
        .await
        .expect("run must complete")
        .unwrap();
        assert_eq!(done.status, RunStatus::Cancelled(CancelReason::TimedOut));
        assert_eq!(done.summary.total, 1);
        assert_eq!(done.summary.cancelled, 1);
        assert_eq!(orch.leases().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_panicking_detector_keeps_the_rest_of_the_run() {
        use crate::detection::{Candidate, DetectorRef};
        use crate::error::DetectionError;

        let detector: DetectorRef = Arc::new(|c: &Candidate| -> Result<bool, DetectionError> {
            if &*c.name == "a.Bad" {
                panic!("unreadable class header");
            }
            Ok(true)
        });
        let spec = ExecutionSpec::builder("detect")
            .with_candidates(CandidateSource::names(["a.T1", "a.Bad", "a.T2", "a.T3"]))
            .with_detector(detector)
            .with_max_parallel_forks(2)
            .build();
        let orch = Orchestrator::builder(config(2), Arc::new(ScriptedFactory::new())).build();
        let mut bus = orch.subscribe();

        let done = orch.start(spec).wait().await.unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.summary.passed, 3);

        let mut detector_failed = Vec::new();
        while let Ok(ev) = bus.try_recv() {
            if ev.kind == EventKind::DetectorFailed {
                detector_failed.push(ev.test.as_deref().map(str::to_string));
            }
        }
        assert_eq!(detector_failed, vec![Some("a.Bad".to_string())]);
    }

    #[tokio::test]
    async fn test_concurrent_runs_share_one_budget() {
        let leases = LeaseCoordinator::new(2);
        let factory = Arc::new(ScriptedFactory::new().with_default(Script::Sleep(
            Duration::from_millis(5),
        )));
        let build = || {
            Orchestrator::builder(config(8), factory.clone())
                .with_lease_coordinator(Arc::clone(&leases))
                .build()
        };
        let (left, right) = (build(), build());
        let run = |id: &str, prefix: &str| {
            ExecutionSpec::builder(id)
                .with_candidates(CandidateSource::names(
                    (1..=6).map(|i| format!("{prefix}.T{i}")),
                ))
                .with_max_parallel_forks(2)
                .build()
        };

        let (a, b) = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::join!(
                left.start(run("run-a", "a")).wait(),
                right.start(run("run-b", "b")).wait(),
            )
        })
        .await
        .expect("runs must not starve each other");
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.is_success() && b.is_success());
        assert_eq!(a.summary.passed + b.summary.passed, 12);
        assert!(leases.peak_outstanding() <= 2, "peak {}", leases.peak_outstanding());
        assert!(factory.peak_live() <= 2);
        assert_eq!(leases.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_cancel_after_drain_keeps_verdict() {
        let orch = Orchestrator::builder(config(2), Arc::new(ScriptedFactory::new())).build();
        let mut bus = orch.subscribe();

        let mut handle = orch.start(spec(&["a.T1", "a.T2"], 2, 0));
        while bus.recv().await.unwrap().kind != EventKind::RunDraining {}
        let mut terminals = 0;
        while terminals < 2 {
            if handle.next_event().await.unwrap().is_terminal() {
                terminals += 1;
            }
        }
        handle.cancel();

        let done = handle.wait().await.unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.summary.passed, 2);
        assert_eq!(done.summary.cancelled, 0);
    }

    #[tokio::test]
    async fn test_closed_lease_coordinator_aborts_run() {
        let leases = LeaseCoordinator::new(1);
        leases.shutdown();
        let orch = Orchestrator::builder(config(1), Arc::new(ScriptedFactory::new()))
            .with_lease_coordinator(leases)
            .build();

        let done = orch
            .start(spec(&["a.T1", "a.T2"], 1, 0))
            .wait()
            .await
            .unwrap();
        assert!(matches!(done.status, RunStatus::Aborted(_)));
        assert!(done.summary.total >= 1);
        assert_eq!(done.summary.cancelled, done.summary.total);
    }

    #[tokio::test]
    async fn test_forks_clamped_to_budget_and_empty_run_succeeds() {
        let factory = Arc::new(ScriptedFactory::new());
        let orch = Orchestrator::builder(config(1), factory.clone()).build();

        let done = orch.start(spec(&[], 4, 0)).wait().await.unwrap();
        assert_eq!(done.status, RunStatus::Succeeded);
        assert_eq!(done.summary.total, 0);
        assert_eq!(factory.spawns(), 0);

        let names = class_names(4);
        let done = orch.start(spec(&refs(&names), 4, 0)).wait().await.unwrap();
        assert!(done.is_success());
        assert_eq!(factory.spawns(), 1);
    }

    #[tokio::test]
    async fn test_lifecycle_events_on_bus() {
        let orch = Orchestrator::builder(config(1), Arc::new(ScriptedFactory::new())).build();
        let mut rx = orch.subscribe();

        let handle = orch.start(spec(&["a.T1"], 1, 0));
        let mut phases = handle.phases();
        handle.wait().await.unwrap();
        assert_eq!(*phases.borrow_and_update(), RunPhase::Stopped);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        let pos = |k: EventKind| kinds.iter().position(|x| *x == k).unwrap();
        assert!(pos(EventKind::RunStarted) < pos(EventKind::WorkerStarted));
        assert!(pos(EventKind::TestCompleted) < pos(EventKind::RunCompleted));
        assert!(kinds.contains(&EventKind::WorkerRetired));
    }
}
