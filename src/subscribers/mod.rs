//! # Event subscribers for the testvisor runtime.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and built-in implementations for handling runtime events broadcast through
//! the [`Bus`](crate::events::Bus).
//!
//! ## Architecture
//! ```text
//! Orchestrator / pumps / aggregator ── publish(Event) ──► Bus
//!                                                          │
//!                                                 subscriber_listener
//!                                                          │
//!                                                    SubscriberSet
//!                                               ┌──────────┼──────────┐
//!                                               ▼          ▼          ▼
//!                                           LogWriter   Reporter   Custom ...
//! ```

mod embedded;
mod subscribe;
mod subscriber_set;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use subscribe::Subscribe;
pub use subscriber_set::SubscriberSet;
