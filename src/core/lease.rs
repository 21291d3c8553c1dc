//! # Lease coordinator: global worker budget.
//!
//! [`LeaseCoordinator`] gates how many workers may be alive at once across the
//! whole process. Every worker holds exactly one [`Lease`], acquired before the
//! worker is spawned and released exactly once when it terminates.
//!
//! ```text
//! ForkingProcessor::submit
//!   ├─► leases.acquire().await   (FIFO wait, cancellable by the caller)
//!   ├─► factory.spawn(...)
//!   │      └─ Err ──► leases.release(lease)
//!   └─► pump task ... worker exit ──► leases.release(lease)
//! ```
//!
//! ## Rules
//! - `outstanding() <= budget()` at all times.
//! - Waiters are served in FIFO order (tokio `Semaphore` fairness).
//! - `shutdown()` fails all pending and future acquires with [`LeaseError::Closed`].
//! - A [`Lease`] dropped without [`release`](LeaseCoordinator::release) still
//!   returns its slot, and the leak is logged.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use crate::error::LeaseError;

static COORDINATOR_SEQ: AtomicU64 = AtomicU64::new(1);

/// Process-wide budget of concurrently live workers.
pub struct LeaseCoordinator {
    id: u64,
    budget: usize,
    permits: Arc<Semaphore>,
    next_lease: AtomicU64,
    outstanding: AtomicUsize,
    peak: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
}

impl LeaseCoordinator {
    /// Creates a coordinator with `budget` slots (clamped to at least 1).
    pub fn new(budget: usize) -> Arc<Self> {
        let budget = budget.max(1);
        Arc::new(Self {
            id: COORDINATOR_SEQ.fetch_add(1, Ordering::Relaxed),
            budget,
            permits: Arc::new(Semaphore::new(budget)),
            next_lease: AtomicU64::new(1),
            outstanding: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            acquired: AtomicU64::new(0),
            released: AtomicU64::new(0),
        })
    }

    /// Waits for a free slot.
    ///
    /// The future is cancel-safe: dropping it (e.g. in a `select!` against a
    /// cancellation token) leaves the queue without consuming a slot.
    pub async fn acquire(self: &Arc<Self>) -> Result<Lease, LeaseError> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| LeaseError::Closed)?;

        let now = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak.fetch_max(now, Ordering::AcqRel);
        self.acquired.fetch_add(1, Ordering::Relaxed);

        let lease = Lease {
            id: self.next_lease.fetch_add(1, Ordering::Relaxed),
            issuer: Arc::clone(self),
            permit: Some(permit),
        };
        debug!(lease = lease.id, outstanding = now, budget = self.budget, "lease acquired");
        Ok(lease)
    }

    /// Returns a lease to the budget.
    ///
    /// A lease from another coordinator is still returned to its issuer, but
    /// the misuse is reported as [`LeaseError::Foreign`].
    pub fn release(&self, mut lease: Lease) -> Result<(), LeaseError> {
        let foreign = lease.issuer.id != self.id;
        lease.settle();
        if foreign {
            warn!(lease = lease.id, "lease released into a coordinator that did not issue it");
            return Err(LeaseError::Foreign { lease: lease.id });
        }
        Ok(())
    }

    /// Stops granting leases; pending `acquire` calls fail with [`LeaseError::Closed`].
    ///
    /// Leases already held stay valid until released.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Total number of slots.
    #[inline]
    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Leases currently held.
    #[inline]
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Highest number of leases held at once since creation.
    #[inline]
    pub fn peak_outstanding(&self) -> usize {
        self.peak.load(Ordering::Acquire)
    }

    #[inline]
    pub fn acquired_total(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn released_total(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for LeaseCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaseCoordinator")
            .field("budget", &self.budget)
            .field("outstanding", &self.outstanding())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// One slot of the global worker budget.
///
/// Not `Clone`: moving the lease into [`LeaseCoordinator::release`] is what
/// makes a double release impossible.
pub struct Lease {
    id: u64,
    issuer: Arc<LeaseCoordinator>,
    permit: Option<OwnedSemaphorePermit>,
}

impl Lease {
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    fn settle(&mut self) {
        if let Some(permit) = self.permit.take() {
            // Counters go down before the slot is handed to the next waiter.
            self.issuer.outstanding.fetch_sub(1, Ordering::AcqRel);
            self.issuer.released.fetch_add(1, Ordering::Relaxed);
            drop(permit);
        }
    }
}

impl fmt::Debug for Lease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease").field("id", &self.id).finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.permit.is_some() {
            warn!(lease = self.id, "lease dropped without release; returning slot");
            self.settle();
        }
    }
}
