//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events.
//!
//! ## Contents
//! - [`TestEvent`], [`TestEventKind`], [`TestOutcome`] the consolidated per-test stream
//! - [`EventKind`], [`Event`] runtime event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Orchestrator`, worker pumps, `ResultAggregator`,
//!   `ClassSource`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: `Orchestrator::subscriber_listener()` (fans out to `SubscriberSet`).

mod bus;
mod event;
mod test_event;

pub use bus::Bus;
pub use event::{Event, EventKind};
pub use test_event::{OutputStream, TestEvent, TestEventKind, TestOutcome};
