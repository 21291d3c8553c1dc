use std::fmt;
use std::sync::Arc;

/// Identity of one test run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunId(Arc<str>);

impl RunId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        RunId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shared string form (for event fields).
    #[inline]
    pub fn as_arc(&self) -> Arc<str> {
        Arc::clone(&self.0)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(Arc::from(s))
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        RunId(Arc::from(s))
    }
}

/// One test class to execute in one run.
///
/// The class name is the test identity: it is unique within a run and names
/// every event the unit produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitOfWork {
    pub class_name: Arc<str>,
    pub run: RunId,
}

impl UnitOfWork {
    pub fn new(class_name: impl Into<Arc<str>>, run: RunId) -> Self {
        Self {
            class_name: class_name.into(),
            run,
        }
    }
}
