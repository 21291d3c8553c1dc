//! Run inputs: what to execute and how workers are launched.
//!
//! - [`ExecutionSpec`] / [`ExecutionSpecBuilder`] immutable run configuration.
//! - [`LaunchOptions`] opaque per-worker process options.
//! - [`UnitOfWork`] one test class of one run.
//! - [`RunId`] run identity.

mod builder;
mod spec;
mod unit;

pub use builder::ExecutionSpecBuilder;
pub use spec::{ExecutionSpec, LaunchOptions};
pub use unit::{RunId, UnitOfWork};
