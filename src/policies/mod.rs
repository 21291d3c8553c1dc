//! Worker recycling policies.
//!
//! ## Contents
//! - [`ForkEvery`] how many classes one worker executes before it is replaced
//!
//! ## Quick wiring
//! ```text
//! ExecutionSpec { fork_every: ForkEvery, .. }
//!      └─► processors::RestartEveryN uses:
//!           - should_retire(count) to stop the inner processor between units
//! ```
//!
//! ## Defaults
//! - `ForkEvery::Never`: workers live for the whole run.

mod fork_every;

pub use fork_every::ForkEvery;
