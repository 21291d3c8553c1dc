//! # testvisor
//!
//! **Testvisor** runs test classes in parallel across a bounded pool of forked
//! workers.
//!
//! A run takes a set of candidate classes, keeps the ones a [`Detector`]
//! accepts, and spreads them over at most `max_parallel_forks` workers. Workers
//! are spawned through a pluggable [`WorkerFactory`], optionally recycled every
//! N classes ([`ForkEvery`]), and every live worker holds a lease from a
//! process-wide [`LeaseCoordinator`]. Whatever the workers report (or fail to
//! report) is folded into one coherent stream of [`TestEvent`]s: each class gets
//! exactly one terminal event, even when its worker crashes or the run is
//! cancelled.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ExecutionSpec (candidates, detector, forks, fork_every, launch options)
//!          │
//!          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Orchestrator (one run task per start())                          │
//! │  - ClassSource (blocking enumeration, dedupe, detector)           │
//! │  - ParallelDispatcher (≤ forks members, FIFO queue)               │
//! │  - ResultAggregator (run state, consolidated TestEvent stream)     │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌────────────┐     ┌────────────┐     ┌────────────┐
//!  │RestartEvery│     │RestartEvery│     │RestartEvery│
//!  │     N      │     │     N      │     │     N      │
//!  │ ┌────────┐ │     │ ┌────────┐ │     │ ┌────────┐ │
//!  │ │Forking │ │     │ │Forking │ │     │ │Forking │ │
//!  │ │Process.│ │     │ │Process.│ │     │ │Process.│ │
//!  │ └───┬────┘ │     │ └───┬────┘ │     │ └───┬────┘ │
//!  └─────┼──────┘     └─────┼──────┘     └─────┼──────┘
//!        │ lease            │ lease            │ lease
//!        ▼                  ▼                  ▼
//!  ┌───────────────────────────────────────────────────┐
//!  │          LeaseCoordinator (global budget)         │
//!  └───────────────────────────────────────────────────┘
//!        │                  │                  │
//!     worker 1           worker 2           worker 3     (WorkerFactory::spawn)
//!        │ Started/Output/Completed/Stopped    │
//!        └────────► pump ──► ResultAggregator ◄┘
//!                                │
//!                  ┌─────────────┴──────────────┐
//!                  ▼                            ▼
//!        RunHandle::next_event()      Bus ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ### Run lifecycle
//! ```text
//! Idle ──► Running ──► Draining ──► Stopped
//!   Running:  class source feeds the dispatcher
//!   Draining: source exhausted, waiting for every unit to resolve
//!   Stopped:  pool torn down, leases returned, RunCompleted published
//! cancel (handle / run timeout / lease shutdown / OS signal):
//!   every unresolved unit ─► Completed(Cancelled) ─► Stopped
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                              |
//! |-------------------|-------------------------------------------------------------|-------------------------------------------------|
//! | **Orchestration** | Start, observe, cancel and await runs.                      | [`Orchestrator`], [`RunHandle`], [`RunCompletion`] |
//! | **Workers**       | Plug in how workers are created and spoken to.              | [`WorkerFactory`], [`WorkerChannel`], [`WorkerFn`] |
//! | **Discovery**     | Explicit class lists or class-file trees, filtered by a detector. | [`CandidateSource`], [`ClassFileTree`], [`Detector`] |
//! | **Budget**        | Global cap on live workers across runs.                     | [`LeaseCoordinator`]                            |
//! | **Policies**      | Recycle workers every N classes.                            | [`ForkEvery`]                                   |
//! | **Subscriber API**| Hook into run, worker and test events.                      | [`Subscribe`], [`Event`]                        |
//! | **Errors**        | Typed errors with stable labels.                            | [`WorkerError`], [`DetectionError`], [`RunError`] |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], which renders events through `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use testvisor::{
//!     CandidateSource, ClassContext, ClassFailure, Config, ExecutionSpec, ForkEvery,
//!     Orchestrator, WorkerFn,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.max_workers = 4;
//!
//!     // Build subscribers (optional)
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn testvisor::Subscribe>> = vec![Arc::new(testvisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn testvisor::Subscribe>> = Vec::new();
//!
//!     // In-process workers: one async call per test class.
//!     let factory = WorkerFn::arc("in-process", |ctx: ClassContext| async move {
//!         match ctx.class_name() {
//!             "com.acme.SkippedTest" => Err(ClassFailure::skipped("disabled")),
//!             _ => Ok(()),
//!         }
//!     });
//!
//!     let orch = Orchestrator::builder(cfg, factory)
//!         .with_subscribers(subs)
//!         .build();
//!
//!     let spec = ExecutionSpec::builder("unit-tests")
//!         .with_candidates(CandidateSource::names([
//!             "com.acme.FooTest",
//!             "com.acme.BarTest",
//!             "com.acme.SkippedTest",
//!         ]))
//!         .with_max_parallel_forks(2)
//!         .with_fork_every(ForkEvery::from_count(10))
//!         .build();
//!
//!     let done = orch.start(spec).wait().await?;
//!     assert!(done.is_success());
//!     assert_eq!(done.summary.skipped, 1);
//!     Ok(())
//! }
//! ```
mod core;
mod detection;
mod error;
mod events;
mod execution;
mod policies;
mod processors;
mod subscribers;
mod worker;

#[cfg(test)]
mod test_support;

// ---- Public re-exports ----

pub use core::{
    CancelReason, Config, Lease, LeaseCoordinator, Orchestrator, OrchestratorBuilder, RunCompletion,
    RunHandle, RunPhase, RunStatus, RunSummary,
};
pub use detection::{Candidate, CandidateSource, ClassFileTree, Detector, DetectorRef};
pub use error::{
    DetectionError, LeaseError, ProtocolViolation, RunError, SubmitError, WorkerError,
};
pub use events::{Bus, Event, EventKind, OutputStream, TestEvent, TestEventKind, TestOutcome};
pub use execution::{ExecutionSpec, ExecutionSpecBuilder, LaunchOptions, RunId, UnitOfWork};
pub use policies::ForkEvery;
pub use subscribers::{Subscribe, SubscriberSet};
pub use worker::{
    ClassContext, ClassFailure, WorkerChannel, WorkerCommand, WorkerEndpoint, WorkerFactory,
    WorkerFn, WorkerId, WorkerLaunch, WorkerMessage, WorkerRef,
};

// Optional: expose the built-in tracing subscriber.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
