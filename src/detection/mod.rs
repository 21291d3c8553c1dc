//! Test-class discovery.
//!
//! ## Contents
//! - [`CandidateSource`] explicit names or a [`ClassFileTree`] to scan
//! - [`Detector`] pluggable "is this a test?" decision
//! - `ClassSource` (internal) dedupes, filters and feeds names to the run

mod detector;
mod source;
mod tree;

pub use detector::{Candidate, Detector, DetectorRef};
pub use source::CandidateSource;
pub use tree::ClassFileTree;

pub(crate) use source::ClassSource;
