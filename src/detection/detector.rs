use std::path::PathBuf;
use std::sync::Arc;

use crate::error::DetectionError;

/// A class that may or may not be a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Fully qualified class name (`com.acme.FooTest`).
    pub name: Arc<str>,
    /// Compiled class file, when the candidate came from a class tree.
    pub path: Option<PathBuf>,
}

impl Candidate {
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            path: None,
        }
    }
}

/// Shared handle to a detector.
pub type DetectorRef = Arc<dyn Detector>;

/// # Decides whether a candidate class is a test.
///
/// Called from a blocking thread, once per distinct candidate.
/// - `Ok(false)` drops the candidate silently.
/// - `Err(_)` drops it too, and is reported as a `DetectorFailed` event.
///
/// Closures implement the trait directly.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use testvisor::{Candidate, DetectionError, Detector, DetectorRef};
///
/// let suffix: DetectorRef = Arc::new(|c: &Candidate| -> Result<bool, DetectionError> {
///     Ok(c.name.ends_with("Test"))
/// });
///
/// assert!(suffix.accepts(&Candidate::named("a.FooTest")).unwrap());
/// assert!(!suffix.accepts(&Candidate::named("a.Helper")).unwrap());
/// ```
pub trait Detector: Send + Sync + 'static {
    fn accepts(&self, candidate: &Candidate) -> Result<bool, DetectionError>;
}

impl<F> Detector for F
where
    F: Fn(&Candidate) -> Result<bool, DetectionError> + Send + Sync + 'static,
{
    fn accepts(&self, candidate: &Candidate) -> Result<bool, DetectionError> {
        self(candidate)
    }
}
