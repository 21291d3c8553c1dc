//! # RestartEveryN: bounded work per worker.
//!
//! Wraps another processor and counts the units delivered to its current
//! worker. Once the count reaches the [`ForkEvery`] threshold, the inner
//! processor is stopped *before* the next unit, so the next submit spawns a
//! fresh worker.
//!
//! ```text
//! submit(unit)
//!   ├─► policy.should_retire(count)?  ─► inner.stop(), count = 0
//!   ├─► inner.submit(unit)
//!   └─► inner.worker() changed?       ─► count = 1  (respawn after crash/retire)
//!                      unchanged      ─► count += 1
//! ```

use async_trait::async_trait;
use tracing::debug;

use super::TestClassProcessor;
use crate::error::SubmitError;
use crate::execution::UnitOfWork;
use crate::policies::ForkEvery;
use crate::worker::WorkerId;

/// Processor that recycles its inner worker every `N` units.
pub(crate) struct RestartEveryN<P> {
    inner: P,
    policy: ForkEvery,
    current: Option<WorkerId>,
    count: u64,
}

impl<P: TestClassProcessor> RestartEveryN<P> {
    pub(crate) fn new(inner: P, policy: ForkEvery) -> Self {
        Self {
            inner,
            policy,
            current: None,
            count: 0,
        }
    }
}

#[async_trait]
impl<P: TestClassProcessor> TestClassProcessor for RestartEveryN<P> {
    async fn submit(&mut self, unit: UnitOfWork) -> Result<(), SubmitError> {
        if self.policy.should_retire(self.count) {
            if let Some(worker) = self.current {
                debug!(worker = %worker, processed = self.count, "retiring worker");
            }
            self.inner.stop().await;
            self.count = 0;
        }

        self.inner.submit(unit).await?;

        match self.inner.worker() {
            None => {
                self.current = None;
                self.count = 0;
            }
            Some(w) if self.current == Some(w) => self.count += 1,
            Some(w) => {
                self.current = Some(w);
                self.count = 1;
            }
        }
        Ok(())
    }

    async fn stop(&mut self) {
        self.inner.stop().await;
        self.current = None;
        self.count = 0;
    }

    fn worker(&self) -> Option<WorkerId> {
        self.inner.worker()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::RunId;

    /// Stand-in for a forking processor: a new "worker" after every stop.
    #[derive(Default)]
    struct Counting {
        live: Option<WorkerId>,
        next: u64,
        spawns: u64,
        stops: u64,
    }

    #[async_trait]
    impl TestClassProcessor for Counting {
        async fn submit(&mut self, _unit: UnitOfWork) -> Result<(), SubmitError> {
            if self.live.is_none() {
                self.next += 1;
                self.spawns += 1;
                self.live = Some(WorkerId::from_raw(self.next));
            }
            Ok(())
        }

        async fn stop(&mut self) {
            if self.live.take().is_some() {
                self.stops += 1;
            }
        }

        fn worker(&self) -> Option<WorkerId> {
            self.live
        }
    }

    fn unit(n: usize) -> UnitOfWork {
        UnitOfWork::new(format!("a.T{n}"), RunId::from("r"))
    }

    #[tokio::test]
    async fn test_five_units_with_threshold_two_use_three_workers() {
        let mut p = RestartEveryN::new(Counting::default(), ForkEvery::from_count(2));
        for n in 0..5 {
            p.submit(unit(n)).await.unwrap();
        }
        p.stop().await;
        assert_eq!(p.inner.spawns, 3);
        assert_eq!(p.inner.stops, 3);
    }

    #[tokio::test]
    async fn test_never_keeps_one_worker() {
        let mut p = RestartEveryN::new(Counting::default(), ForkEvery::from_count(0));
        for n in 0..10 {
            p.submit(unit(n)).await.unwrap();
        }
        assert_eq!(p.inner.spawns, 1);
    }

    #[tokio::test]
    async fn test_respawn_resets_count() {
        let mut p = RestartEveryN::new(Counting::default(), ForkEvery::from_count(2));
        p.submit(unit(0)).await.unwrap();
        // Inner worker dies on its own; the replacement starts a fresh count.
        p.inner.live = None;
        p.submit(unit(1)).await.unwrap();
        assert_eq!(p.count, 1);
        p.submit(unit(2)).await.unwrap();
        assert_eq!(p.inner.spawns, 2);
    }
}
