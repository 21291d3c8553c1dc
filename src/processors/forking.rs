//! # ForkingProcessor: one lease, one worker.
//!
//! Owns at most one live worker. The worker is spawned lazily on the first
//! unit of work and torn down on [`stop`](TestClassProcessor::stop).
//!
//! ## Submit flow
//! ```text
//! submit(unit)
//!   ├─► reap previous worker if its pump already exited (crash)
//!   ├─► no live worker?
//!   │     ├─► leases.acquire()     (select! against the run token)
//!   │     ├─► factory.spawn()      (select! against the run token, bounded by spawn_timeout)
//!   │     │      Err / timeout ─► release lease, WorkerSpawnFailed, unit Failed
//!   │     │      cancelled     ─► release lease, unit Cancelled
//!   │     └─► spawn pump task
//!   ├─► aggregator.assigned(unit, worker)
//!   ├─► send Execute(unit)
//!   └─► wait until the unit is resolved (or the run is cancelled)
//! ```
//!
//! ## Pump task (one per worker)
//! ```text
//! loop select! {
//!   events.recv()        ─► Some(Stopped) → exit(Stopped)
//!                           Some(msg)     → aggregator.worker_message
//!                           None          → exit(Crashed)
//!   terminate.cancelled() ─► exit(Unresponsive)
//! }
//! exit: publish worker event → aggregator.worker_exited().await (orphans resolved)
//!       → terminate.cancel() → leases.release(lease)
//! ```
//!
//! ## Rules
//! - The lease is released exactly once, after the aggregator acknowledged the
//!   exit, so synthesized failures precede the freed slot.
//! - `stop()` waits for the pump at most `stop_timeout`, then force-terminates.
//! - Neither lease acquisition nor spawning outlives the run token.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::TestClassProcessor;
use crate::core::aggregator::{AggregatorHandle, ExitCause, RUN_CANCELLED};
use crate::core::lease::{Lease, LeaseCoordinator};
use crate::core::run::{CancelReason, RunControl};
use crate::error::{SubmitError, WorkerError};
use crate::events::{Bus, Event, EventKind, TestOutcome};
use crate::execution::{LaunchOptions, RunId, UnitOfWork};
use crate::worker::{
    WorkerChannel, WorkerCommand, WorkerId, WorkerLaunch, WorkerMessage, WorkerRef,
};

/// Everything a processor needs to start and supervise workers of one run.
pub(crate) struct WorkerContext {
    pub run: RunId,
    pub factory: WorkerRef,
    pub leases: Arc<LeaseCoordinator>,
    pub aggregator: AggregatorHandle,
    pub bus: Bus,
    pub launch: Arc<LaunchOptions>,
    pub classpath: Arc<[PathBuf]>,
    pub stop_timeout: Duration,
    pub spawn_timeout: Option<Duration>,
    pub control: Arc<RunControl>,
}

impl WorkerContext {
    #[inline]
    fn token(&self) -> &CancellationToken {
        self.control.token()
    }
}

struct LiveWorker {
    id: WorkerId,
    commands: mpsc::UnboundedSender<WorkerCommand>,
    terminate: CancellationToken,
    exited: Arc<AtomicBool>,
    pump: JoinHandle<()>,
}

impl LiveWorker {
    /// The pump stopped reading events (it may still be releasing the lease).
    fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire) || self.pump.is_finished()
    }
}

/// Processor owning at most one live worker.
pub(crate) struct ForkingProcessor {
    ctx: Arc<WorkerContext>,
    live: Option<LiveWorker>,
}

impl ForkingProcessor {
    pub(crate) fn new(ctx: Arc<WorkerContext>) -> Self {
        Self { ctx, live: None }
    }

    /// Drops the handle of a worker that already exited, waiting for its lease.
    async fn reap(&mut self) {
        if self.live.as_ref().is_some_and(LiveWorker::has_exited) {
            if let Some(dead) = self.live.take() {
                debug!(run = %self.ctx.run, worker = %dead.id, "reaping exited worker");
                join_pump(&self.ctx.run, dead.id, dead.pump).await;
            }
        }
    }

    /// Acquires a lease and spawns a worker.
    ///
    /// On failure the unit is resolved here and `None` is returned.
    async fn start_worker(&self, test: &Arc<str>) -> Option<LiveWorker> {
        let ctx = &self.ctx;
        let acquired = tokio::select! {
            biased;
            _ = ctx.token().cancelled() => None,
            res = ctx.leases.acquire() => Some(res),
        };
        let lease = match acquired {
            None => {
                ctx.aggregator
                    .resolve(Arc::clone(test), TestOutcome::Cancelled, RUN_CANCELLED);
                return None;
            }
            Some(Err(e)) => {
                warn!(run = %ctx.run, error = %e, "no lease available; aborting run");
                ctx.control.cancel(CancelReason::LeasesClosed);
                ctx.aggregator
                    .resolve(Arc::clone(test), TestOutcome::Cancelled, RUN_CANCELLED);
                return None;
            }
            Some(Ok(lease)) => lease,
        };

        let id = WorkerId::next();
        let launch = WorkerLaunch {
            worker: id,
            run: ctx.run.clone(),
            options: Arc::clone(&ctx.launch),
            classpath: Arc::clone(&ctx.classpath),
        };
        let spawned = tokio::select! {
            biased;
            _ = ctx.token().cancelled() => None,
            res = spawn_bounded(ctx, launch) => Some(res),
        };
        let channel = match spawned {
            None => {
                debug!(run = %ctx.run, worker = %id, test = %test, "run cancelled while spawning");
                if let Err(le) = ctx.leases.release(lease) {
                    warn!(run = %ctx.run, error = %le, "lease release failed");
                }
                ctx.aggregator
                    .resolve(Arc::clone(test), TestOutcome::Cancelled, RUN_CANCELLED);
                return None;
            }
            Some(Err(e)) => {
                self.spawn_failed(id, lease, test, e);
                return None;
            }
            Some(Ok(channel)) => channel,
        };

        debug!(run = %ctx.run, worker = %id, factory = ctx.factory.name(), "worker started");
        ctx.bus.publish(
            Event::new(EventKind::WorkerStarted)
                .with_run(ctx.run.as_arc())
                .with_worker(id),
        );

        let WorkerChannel {
            commands,
            events,
            terminate,
        } = channel;
        let exited = Arc::new(AtomicBool::new(false));
        let pump = tokio::spawn(pump(
            Arc::clone(ctx),
            id,
            events,
            terminate.clone(),
            Arc::clone(&exited),
            lease,
        ));
        Some(LiveWorker {
            id,
            commands,
            terminate,
            exited,
            pump,
        })
    }

    fn spawn_failed(&self, id: WorkerId, lease: Lease, test: &Arc<str>, e: WorkerError) {
        let ctx = &self.ctx;
        if let Err(le) = ctx.leases.release(lease) {
            warn!(run = %ctx.run, error = %le, "lease release failed");
        }
        warn!(run = %ctx.run, worker = %id, test = %test, error = %e, "worker spawn failed");
        ctx.bus.publish(
            Event::new(EventKind::WorkerSpawnFailed)
                .with_run(ctx.run.as_arc())
                .with_worker(id)
                .with_test(Arc::clone(test))
                .with_reason(e.to_string()),
        );
        ctx.aggregator
            .resolve(Arc::clone(test), TestOutcome::Failed, e.to_string());
    }
}

#[async_trait]
impl TestClassProcessor for ForkingProcessor {
    async fn submit(&mut self, unit: UnitOfWork) -> Result<(), SubmitError> {
        self.reap().await;
        let test = Arc::clone(&unit.class_name);

        if self.ctx.token().is_cancelled() {
            self.ctx
                .aggregator
                .resolve(test, TestOutcome::Cancelled, RUN_CANCELLED);
            return Ok(());
        }

        if self.live.is_none() {
            self.live = self.start_worker(&test).await;
        }
        let Some(live) = self.live.as_ref() else {
            return Ok(());
        };

        let done = self.ctx.aggregator.assigned(Arc::clone(&test), live.id);
        if live.commands.send(WorkerCommand::Execute(unit)).is_err() {
            // Worker is gone; its pump reports the exit and the unit resolves with it.
            debug!(run = %self.ctx.run, worker = %live.id, test = %test, "worker closed before execute");
        }

        tokio::select! {
            _ = done => {}
            _ = self.ctx.token().cancelled() => {}
        }
        Ok(())
    }

    async fn stop(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };
        let LiveWorker {
            id,
            commands,
            terminate,
            mut pump,
            ..
        } = live;

        let _ = commands.send(WorkerCommand::Stop);
        match tokio::time::timeout(self.ctx.stop_timeout, &mut pump).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(run = %self.ctx.run, worker = %id, error = %e, "worker pump failed");
            }
            Err(_) => {
                warn!(
                    run = %self.ctx.run,
                    worker = %id,
                    timeout = ?self.ctx.stop_timeout,
                    "worker did not acknowledge stop; terminating"
                );
                terminate.cancel();
                join_pump(&self.ctx.run, id, pump).await;
            }
        }
    }

    fn worker(&self) -> Option<WorkerId> {
        self.live.as_ref().map(|w| w.id)
    }
}

/// Spawns through the factory, bounded by the configured spawn timeout.
async fn spawn_bounded(
    ctx: &WorkerContext,
    launch: WorkerLaunch,
) -> Result<WorkerChannel, WorkerError> {
    let spawning = ctx.factory.spawn(launch);
    match ctx.spawn_timeout {
        None => spawning.await,
        Some(limit) => tokio::time::timeout(limit, spawning)
            .await
            .unwrap_or(Err(WorkerError::SpawnTimedOut { timeout: limit })),
    }
}

async fn join_pump(run: &RunId, worker: WorkerId, pump: JoinHandle<()>) {
    if let Err(e) = pump.await {
        warn!(run = %run, worker = %worker, error = %e, "worker pump failed");
    }
}

async fn pump(
    ctx: Arc<WorkerContext>,
    worker: WorkerId,
    mut events: mpsc::UnboundedReceiver<WorkerMessage>,
    terminate: CancellationToken,
    exited: Arc<AtomicBool>,
    lease: Lease,
) {
    let cause = loop {
        tokio::select! {
            biased;
            msg = events.recv() => match msg {
                Some(WorkerMessage::Stopped) => break ExitCause::Stopped,
                Some(msg) => ctx.aggregator.worker_message(worker, msg),
                None => break ExitCause::Crashed,
            },
            _ = terminate.cancelled() => break ExitCause::Unresponsive,
        }
    };
    exited.store(true, Ordering::Release);

    let ev = Event::new(match cause {
        ExitCause::Stopped => EventKind::WorkerRetired,
        ExitCause::Crashed => EventKind::WorkerCrashed,
        ExitCause::Unresponsive => EventKind::WorkerUnresponsive,
    })
    .with_run(ctx.run.as_arc())
    .with_worker(worker);
    match cause {
        ExitCause::Stopped => {
            debug!(run = %ctx.run, worker = %worker, "worker retired");
            ctx.bus.publish(ev);
        }
        ExitCause::Crashed => {
            warn!(run = %ctx.run, worker = %worker, "worker terminated unexpectedly");
            ctx.bus.publish(ev.with_reason(WorkerError::Crashed.to_string()));
        }
        ExitCause::Unresponsive => {
            let e = WorkerError::Unresponsive {
                timeout: ctx.stop_timeout,
            };
            warn!(run = %ctx.run, worker = %worker, error = %e, "worker terminated");
            ctx.bus.publish(ev.with_reason(e.to_string()));
        }
    }

    let _ = ctx.aggregator.worker_exited(worker, cause).await;
    terminate.cancel();
    if let Err(e) = ctx.leases.release(lease) {
        warn!(run = %ctx.run, worker = %worker, error = %e, "lease release failed");
    }
}
