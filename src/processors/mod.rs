//! # Layered test-class processors.
//!
//! A run routes every [`UnitOfWork`] through a stack of processors:
//!
//! ```text
//! ParallelDispatcher ──► member 1: RestartEveryN ──► ForkingProcessor ──► worker
//!        │           ──► member 2: RestartEveryN ──► ForkingProcessor ──► worker
//!        │                 ...
//!        └─ FIFO queue of units waiting for an idle member
//! ```
//!
//! - [`ForkingProcessor`] owns at most one live worker and its lease.
//! - [`RestartEveryN`] replaces the worker after a fixed number of classes.
//! - [`ParallelDispatcher`] load-balances units across a bounded pool of members.
//!
//! Every layer implements [`TestClassProcessor`], so layers compose freely.

mod forking;
mod parallel;
mod restart;

use async_trait::async_trait;

pub(crate) use forking::{ForkingProcessor, WorkerContext};
pub(crate) use parallel::ParallelDispatcher;
pub(crate) use restart::RestartEveryN;

use crate::error::SubmitError;
use crate::execution::UnitOfWork;
use crate::worker::WorkerId;

/// # A stage of the dispatch pipeline.
///
/// ## Rules
/// - `submit` hands over ownership of the unit; every accepted unit eventually
///   reaches a terminal event, whatever happens to the processor afterwards.
/// - `stop` tears down everything the processor owns and returns only once
///   workers are gone and their leases released. A stopped processor may be
///   submitted to again (it starts fresh).
#[async_trait]
pub(crate) trait TestClassProcessor: Send + 'static {
    /// Processes one unit of work.
    async fn submit(&mut self, unit: UnitOfWork) -> Result<(), SubmitError>;

    /// Stops the processor and releases its resources.
    async fn stop(&mut self);

    /// Worker currently bound to this processor, if it owns one.
    fn worker(&self) -> Option<WorkerId> {
        None
    }
}
