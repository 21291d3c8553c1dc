//! # Worker factory abstraction.
//!
//! The runtime never creates worker processes itself: it hands a
//! [`WorkerLaunch`] to a [`WorkerFactory`] and talks to whatever comes back
//! through the [`WorkerChannel`]. A real factory forks a JVM (or any test
//! host) with the run's launch options; tests use in-process factories.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use super::WorkerId;
use super::channel::WorkerChannel;
use crate::error::WorkerError;
use crate::execution::{LaunchOptions, RunId};

/// Shared handle to a worker factory.
pub type WorkerRef = Arc<dyn WorkerFactory>;

/// Everything a factory needs to start one worker.
#[derive(Debug, Clone)]
pub struct WorkerLaunch {
    /// Identity reserved for the new worker.
    pub worker: WorkerId,
    /// Run the worker belongs to.
    pub run: RunId,
    /// Process-level launch options, identical for all workers of a run.
    pub options: Arc<LaunchOptions>,
    /// Classpath the worker loads test classes from.
    pub classpath: Arc<[PathBuf]>,
}

/// # Creates workers.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use testvisor::{WorkerChannel, WorkerError, WorkerFactory, WorkerLaunch};
///
/// struct Unavailable;
///
/// #[async_trait]
/// impl WorkerFactory for Unavailable {
///     async fn spawn(&self, _launch: WorkerLaunch) -> Result<WorkerChannel, WorkerError> {
///         Err(WorkerError::spawn("no test host installed"))
///     }
/// }
/// ```
#[async_trait]
pub trait WorkerFactory: Send + Sync + 'static {
    /// Starts a worker and returns the runtime side of its channel.
    async fn spawn(&self, launch: WorkerLaunch) -> Result<WorkerChannel, WorkerError>;

    /// Human-readable factory name for logs.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
