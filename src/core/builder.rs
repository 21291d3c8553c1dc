use std::sync::Arc;

use super::{config::Config, lease::LeaseCoordinator, orchestrator::Orchestrator};
use crate::{
    events::Bus,
    subscribers::{Subscribe, SubscriberSet},
    worker::WorkerRef,
};

/// Builder for constructing an [`Orchestrator`] with optional features.
pub struct OrchestratorBuilder {
    cfg: Config,
    factory: WorkerRef,
    subscribers: Vec<Arc<dyn Subscribe>>,
    leases: Option<Arc<LeaseCoordinator>>,
}

impl OrchestratorBuilder {
    /// Creates a new builder with the given configuration and worker factory.
    pub fn new(cfg: Config, factory: WorkerRef) -> Self {
        Self {
            cfg,
            factory,
            subscribers: Vec::new(),
            leases: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (run and worker lifecycle, test
    /// events, diagnostics) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Shares an existing worker budget instead of creating one from
    /// [`Config::max_workers`].
    ///
    /// Orchestrators built with the same coordinator never exceed its budget together.
    pub fn with_lease_coordinator(mut self, leases: Arc<LeaseCoordinator>) -> Self {
        self.leases = Some(leases);
        self
    }

    /// Builds and returns the Orchestrator instance.
    ///
    /// This consumes the builder and initializes the event bus, the subscriber
    /// workers and the lease coordinator. Must be called within a Tokio runtime.
    pub fn build(self) -> Arc<Orchestrator> {
        let bus = Bus::new(self.cfg.bus_capacity_clamped());
        let subs = Arc::new(SubscriberSet::new(self.subscribers, bus.clone()));
        let leases = self
            .leases
            .unwrap_or_else(|| LeaseCoordinator::new(self.cfg.worker_budget()));

        let orch = Arc::new(Orchestrator::new_internal(
            self.cfg,
            self.factory,
            leases,
            bus,
            subs,
        ));
        orch.subscriber_listener();
        orch
    }
}
