//! Runtime core: orchestration and run state.
//!
//! The public API from this module is [`Orchestrator`] (built through
//! [`OrchestratorBuilder`]), the [`LeaseCoordinator`] shared between runs, and
//! the run types returned to callers.
//!
//! Internal modules:
//! - [`orchestrator`]: run state machine, class feeding, drain and cancellation;
//! - [`aggregator`]: single owner of per-unit state, consolidated test stream;
//! - [`lease`]: global worker budget;
//! - [`run`]: run handle, phases, summary and completion;
//! - [`shutdown`]: cross-platform shutdown signal handling.

pub(crate) mod aggregator;
mod builder;
mod config;
pub(crate) mod lease;
mod orchestrator;
pub(crate) mod run;
mod shutdown;

pub use builder::OrchestratorBuilder;
pub use config::Config;
pub use lease::{Lease, LeaseCoordinator};
pub use orchestrator::Orchestrator;
pub use run::{CancelReason, RunCompletion, RunHandle, RunPhase, RunStatus, RunSummary};
