//! # Workers: identity, channel protocol and factories.
//!
//! A worker is an isolated execution context (typically a child process) that
//! runs test classes one at a time and reports what happened through a
//! [`WorkerChannel`].
//!
//! ```text
//!        ForkingProcessor                         worker
//!   ┌───────────────────────┐  WorkerCommand  ┌────────────┐
//!   │ WorkerChannel         │ ──────────────► │ Endpoint   │
//!   │   commands / events   │ ◄────────────── │ (runs unit)│
//!   │   terminate (token)   │  WorkerMessage  └────────────┘
//!   └───────────────────────┘
//! ```
//!
//! - [`WorkerId`]: process-unique worker identity.
//! - [`WorkerFactory`]: creates workers from a [`WorkerLaunch`].
//! - [`WorkerFn`]: in-process factory backed by an async closure.

mod channel;
mod factory;
mod worker_fn;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

pub use channel::{WorkerChannel, WorkerCommand, WorkerEndpoint, WorkerMessage};
pub use factory::{WorkerFactory, WorkerLaunch, WorkerRef};
pub use worker_fn::{ClassContext, ClassFailure, WorkerFn};

static WORKER_SEQ: AtomicU64 = AtomicU64::new(1);

/// Identity of one worker, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerId(u64);

impl WorkerId {
    /// Reserves the next identity.
    pub(crate) fn next() -> Self {
        WorkerId(WORKER_SEQ.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Wraps a raw id (useful for tests and external bookkeeping).
    pub const fn from_raw(raw: u64) -> Self {
        WorkerId(raw)
    }

    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}
