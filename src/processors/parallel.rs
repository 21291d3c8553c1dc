//! # ParallelDispatcher: bounded pool of processors.
//!
//! Spreads units of work across at most `max` pool members. Members are
//! created lazily through a member factory, each running as its own task.
//! The pool only shrinks once intake is closed.
//!
//! ## Routing
//! ```text
//! submit(unit)
//!   ├─► duplicate name?           ─► Err(Duplicate)
//!   ├─► aggregator.dispatched(unit)
//!   ├─► idle members > queued?    ─► push, wake one member
//!   ├─► members < max?            ─► spawn member with unit as first work
//!   └─► otherwise                 ─► push (FIFO)
//!
//! member task:
//!   loop { processor.submit(unit) ─► idle ─► next queued unit | closed }
//!   processor.stop()
//!
//! close_intake()  ─► no more submits; members retire once the queue is empty
//! ```
//!
//! ## Rules
//! - A member is idle once its last unit reached a terminal event.
//! - Queued units go to the first member that becomes idle.
//! - Closing intake lets idle members stop their workers (and hand back their
//!   leases) while busy members finish the queue.
//! - `stop()` cancels queued units, lets members finish and stops every member.

use std::collections::{HashSet, VecDeque};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::TestClassProcessor;
use crate::core::aggregator::{AggregatorHandle, RUN_CANCELLED};
use crate::error::SubmitError;
use crate::events::TestOutcome;
use crate::execution::{RunId, UnitOfWork};

#[derive(Default)]
struct Pending {
    queue: VecDeque<UnitOfWork>,
    idle: usize,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    pending: Mutex<Pending>,
    wake: Notify,
}

/// Pool of at most `max` processors fed from a FIFO queue.
pub(crate) struct ParallelDispatcher<P, F> {
    run: RunId,
    max: usize,
    make_member: F,
    shared: Arc<Shared>,
    members: JoinSet<()>,
    spawned: usize,
    seen: HashSet<Arc<str>>,
    closed: bool,
    aggregator: AggregatorHandle,
    token: CancellationToken,
    _member: PhantomData<fn() -> P>,
}

impl<P, F> ParallelDispatcher<P, F>
where
    P: TestClassProcessor,
    F: FnMut() -> P + Send + 'static,
{
    pub(crate) fn new(
        run: RunId,
        max: usize,
        make_member: F,
        aggregator: AggregatorHandle,
        token: CancellationToken,
    ) -> Self {
        Self {
            run,
            max: max.max(1),
            make_member,
            shared: Arc::new(Shared::default()),
            members: JoinSet::new(),
            spawned: 0,
            seen: HashSet::new(),
            closed: false,
            aggregator,
            token,
            _member: PhantomData,
        }
    }

    /// Number of members created so far.
    pub(crate) fn pool_size(&self) -> usize {
        self.spawned
    }

    /// Refuses further submissions and retires members as they run out of work.
    pub(crate) async fn close_intake(&mut self) {
        self.closed = true;
        self.shared.pending.lock().await.closed = true;
        self.shared.wake.notify_waiters();
        debug!(run = %self.run, members = self.spawned, "pool intake closed");
    }

    fn spawn_member(&mut self, first: UnitOfWork) {
        let processor = (self.make_member)();
        self.spawned += 1;
        debug!(run = %self.run, member = self.spawned, max = self.max, "pool member created");
        self.members.spawn(run_member(
            processor,
            first,
            Arc::clone(&self.shared),
            self.token.clone(),
        ));
    }
}

#[async_trait]
impl<P, F> TestClassProcessor for ParallelDispatcher<P, F>
where
    P: TestClassProcessor,
    F: FnMut() -> P + Send + 'static,
{
    async fn submit(&mut self, unit: UnitOfWork) -> Result<(), SubmitError> {
        if self.closed {
            return Err(SubmitError::Closed);
        }
        if !self.seen.insert(Arc::clone(&unit.class_name)) {
            return Err(SubmitError::Duplicate {
                name: Arc::clone(&unit.class_name),
            });
        }
        self.aggregator.dispatched(unit.clone());

        let mut pending = self.shared.pending.lock().await;
        if pending.idle > pending.queue.len() {
            pending.queue.push_back(unit);
            drop(pending);
            self.shared.wake.notify_one();
        } else if self.spawned < self.max {
            drop(pending);
            self.spawn_member(unit);
        } else {
            pending.queue.push_back(unit);
        }
        Ok(())
    }

    async fn stop(&mut self) {
        self.closed = true;
        let cancelled: Vec<UnitOfWork> = {
            let mut pending = self.shared.pending.lock().await;
            pending.closed = true;
            pending.queue.drain(..).collect()
        };
        for unit in cancelled {
            self.aggregator
                .resolve(unit.class_name, TestOutcome::Cancelled, RUN_CANCELLED);
        }
        self.shared.wake.notify_waiters();

        while let Some(res) = self.members.join_next().await {
            match res {
                Err(e) if e.is_panic() => {
                    warn!(run = %self.run, error = %e, "pool member panicked");
                }
                _ => {}
            }
        }
        debug!(run = %self.run, members = self.spawned, "pool stopped");
    }
}

async fn run_member<P: TestClassProcessor>(
    mut processor: P,
    first: UnitOfWork,
    shared: Arc<Shared>,
    token: CancellationToken,
) {
    let mut next = Some(first);
    while let Some(unit) = next.take() {
        let test = Arc::clone(&unit.class_name);
        if let Err(e) = processor.submit(unit).await {
            warn!(test = %test, error = %e, "pool member refused unit");
        }
        if token.is_cancelled() {
            break;
        }
        next = next_unit(&shared, &token).await;
    }
    processor.stop().await;
}

/// Waits as an idle member until a unit is queued or the pool closes.
async fn next_unit(shared: &Shared, token: &CancellationToken) -> Option<UnitOfWork> {
    shared.pending.lock().await.idle += 1;
    loop {
        let wake = shared.wake.notified();
        tokio::pin!(wake);
        wake.as_mut().enable();
        {
            let mut pending = shared.pending.lock().await;
            if let Some(unit) = pending.queue.pop_front() {
                pending.idle -= 1;
                return Some(unit);
            }
            if pending.closed || token.is_cancelled() {
                pending.idle -= 1;
                return None;
            }
        }
        tokio::select! {
            _ = &mut wake => {}
            _ = token.cancelled() => {}
        }
    }
}
