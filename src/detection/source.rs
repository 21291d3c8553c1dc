//! # Class source: the stream of test-class names of one run.
//!
//! ```text
//! CandidateSource ──► dedupe ──► Detector? ──► bounded mpsc ──► Orchestrator
//!  (names | tree)       │           │ Err / panic ─► DetectorFailed
//!        │ Err          │           └ false ─► dropped (debug)
//!        └──► CandidateUnreadable
//! ```
//!
//! ## Rules
//! - Enumeration runs on a blocking thread (class trees hit the filesystem and
//!   detectors may read class files).
//! - Single producer, consumed once, not restartable.
//! - Stops early when the run token is cancelled or the receiver is dropped.
//! - A panicking detector rejects only the candidate it panicked on.

use std::any::Any;
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::detector::{Candidate, DetectorRef};
use super::tree::ClassFileTree;
use crate::error::DetectionError;
use crate::events::{Bus, Event, EventKind};
use crate::execution::RunId;

/// Where candidate class names come from.
#[derive(Debug, Clone)]
pub enum CandidateSource {
    /// An explicit list of class names.
    Names(Arc<[Arc<str>]>),
    /// A directory of compiled classes.
    Tree(ClassFileTree),
}

impl CandidateSource {
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Arc<str>>,
    {
        CandidateSource::Names(names.into_iter().map(Into::into).collect())
    }

    fn candidates(&self) -> Box<dyn Iterator<Item = Result<Candidate, DetectionError>> + '_> {
        match self {
            CandidateSource::Names(names) => Box::new(
                names
                    .iter()
                    .map(|name| Ok(Candidate::named(Arc::clone(name)))),
            ),
            CandidateSource::Tree(tree) => Box::new(tree.scan()),
        }
    }
}

impl Default for CandidateSource {
    /// Returns an empty name list.
    fn default() -> Self {
        CandidateSource::Names(Arc::from(Vec::new()))
    }
}

impl From<ClassFileTree> for CandidateSource {
    fn from(tree: ClassFileTree) -> Self {
        CandidateSource::Tree(tree)
    }
}

/// Filters candidates through the detector and feeds the run.
pub(crate) struct ClassSource {
    run: RunId,
    candidates: CandidateSource,
    detector: Option<DetectorRef>,
    bus: Bus,
}

impl ClassSource {
    pub(crate) fn new(
        run: RunId,
        candidates: CandidateSource,
        detector: Option<DetectorRef>,
        bus: Bus,
    ) -> Self {
        Self {
            run,
            candidates,
            detector,
            bus,
        }
    }

    /// Starts enumeration on a blocking thread.
    ///
    /// The join handle yields the number of names produced.
    pub(crate) fn spawn(
        self,
        capacity: usize,
        token: CancellationToken,
    ) -> (mpsc::Receiver<Arc<str>>, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let join = tokio::task::spawn_blocking(move || {
            self.enumerate(&token, |name| tx.blocking_send(name).is_ok())
        });
        (rx, join)
    }

    /// Enumerates accepted names until exhaustion, cancellation or `emit` returning `false`.
    pub(crate) fn enumerate(
        &self,
        token: &CancellationToken,
        mut emit: impl FnMut(Arc<str>) -> bool,
    ) -> usize {
        let mut seen: HashSet<Arc<str>> = HashSet::new();
        let mut produced = 0;

        for candidate in self.candidates.candidates() {
            if token.is_cancelled() {
                debug!(run = %self.run, produced, "class source cancelled");
                break;
            }
            let candidate = match candidate {
                Ok(c) => c,
                Err(e) => {
                    warn!(run = %self.run, error = %e, "candidate unreadable");
                    self.bus.publish(
                        Event::new(EventKind::CandidateUnreadable)
                            .with_run(self.run.as_arc())
                            .with_reason(e.to_string()),
                    );
                    continue;
                }
            };
            if !seen.insert(Arc::clone(&candidate.name)) {
                debug!(run = %self.run, class = %candidate.name, "duplicate candidate skipped");
                continue;
            }
            if !self.accepts(&candidate) {
                continue;
            }
            if !emit(Arc::clone(&candidate.name)) {
                break;
            }
            produced += 1;
        }
        produced
    }

    fn accepts(&self, candidate: &Candidate) -> bool {
        let Some(detector) = &self.detector else {
            return true;
        };
        let verdict = catch_unwind(AssertUnwindSafe(|| detector.accepts(candidate)))
            .unwrap_or_else(|panic| {
                Err(DetectionError::detector(
                    Arc::clone(&candidate.name),
                    format!("detector panicked: {}", panic_message(&*panic)),
                ))
            });
        match verdict {
            Ok(true) => true,
            Ok(false) => {
                debug!(run = %self.run, class = %candidate.name, "not a test class");
                false
            }
            Err(e) => {
                warn!(run = %self.run, class = %candidate.name, error = %e, "detector failed");
                self.bus.publish(
                    Event::new(EventKind::DetectorFailed)
                        .with_run(self.run.as_arc())
                        .with_test(Arc::clone(&candidate.name))
                        .with_reason(e.to_string()),
                );
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(source: &ClassSource) -> Vec<String> {
        let mut out = Vec::new();
        source.enumerate(&CancellationToken::new(), |name| {
            out.push(name.to_string());
            true
        });
        out
    }

    #[test]
    fn test_dedupes_and_keeps_order_without_detector() {
        let source = ClassSource::new(
            RunId::from("r"),
            CandidateSource::names(["a.B", "a.A", "a.B"]),
            None,
            Bus::new(8),
        );
        assert_eq!(collect(&source), vec!["a.B", "a.A"]);
    }

    #[test]
    fn test_detector_rejection_is_silent_and_failure_is_reported() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let detector: DetectorRef = Arc::new(|c: &Candidate| -> Result<bool, DetectionError> {
            match &*c.name {
                "a.Broken" => Err(DetectionError::detector(Arc::clone(&c.name), "bad magic")),
                name => Ok(name.ends_with("Test")),
            }
        });
        let source = ClassSource::new(
            RunId::from("r"),
            CandidateSource::names(["a.FooTest", "a.Helper", "a.Broken", "a.BarTest"]),
            Some(detector),
            bus,
        );

        assert_eq!(collect(&source), vec!["a.FooTest", "a.BarTest"]);

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::DetectorFailed);
        assert_eq!(ev.test.as_deref(), Some("a.Broken"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_panicking_detector_rejects_only_its_candidate() {
        let bus = Bus::new(8);
        let mut rx = bus.subscribe();
        let detector: DetectorRef = Arc::new(|c: &Candidate| -> Result<bool, DetectionError> {
            if &*c.name == "a.Bad" {
                panic!("corrupt constant pool");
            }
            Ok(true)
        });
        let source = ClassSource::new(
            RunId::from("r"),
            CandidateSource::names(["a.T1", "a.Bad", "a.T2", "a.T3"]),
            Some(detector),
            bus,
        );

        assert_eq!(collect(&source), vec!["a.T1", "a.T2", "a.T3"]);

        let ev = rx.try_recv().unwrap();
        assert_eq!(ev.kind, EventKind::DetectorFailed);
        assert_eq!(ev.test.as_deref(), Some("a.Bad"));
        assert!(ev.reason.as_deref().unwrap().contains("corrupt constant pool"));
    }

    #[test]
    fn test_cancelled_token_stops_enumeration() {
        let source = ClassSource::new(
            RunId::from("r"),
            CandidateSource::names(["a.A", "a.B"]),
            None,
            Bus::new(8),
        );
        let token = CancellationToken::new();
        token.cancel();
        assert_eq!(source.enumerate(&token, |_| true), 0);
    }

    #[tokio::test]
    async fn test_spawned_source_feeds_bounded_channel() {
        let names: Vec<String> = (0..10).map(|n| format!("a.T{n}")).collect();
        let source = ClassSource::new(
            RunId::from("r"),
            CandidateSource::names(names.clone()),
            None,
            Bus::new(8),
        );
        let (mut rx, join) = source.spawn(2, CancellationToken::new());
        let mut got = Vec::new();
        while let Some(name) = rx.recv().await {
            got.push(name.to_string());
        }
        assert_eq!(got, names);
        assert_eq!(join.await.unwrap(), 10);
    }
}
