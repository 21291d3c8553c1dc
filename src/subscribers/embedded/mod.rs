//! # Built-in subscribers
//!
//! - [`LogWriter`]: renders events as `tracing` records (feature `logging`).

#[cfg(feature = "logging")]
mod log;

#[cfg(feature = "logging")]
pub use log::LogWriter;
