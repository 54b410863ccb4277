use std::sync::Arc;

use tokio::runtime::Handle;

use super::bootstrapper::Bootstrapper;
use crate::{
    bootstrap::WorkerPool,
    config::Config,
    events::Bus,
    registry::RegistryGateway,
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`Bootstrapper`].
pub struct BootstrapperBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    handle: Option<Handle>,
}

impl BootstrapperBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            handle: None,
        }
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (bindings, dependency changes, module
    /// lifecycle) through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Runs watchdogs and stage-two work on `handle` instead of the current runtime.
    pub fn with_runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Builds the runtime against `registry`.
    ///
    /// Initializes the event bus, the subscriber workers and the worker pool.
    ///
    /// # Panics
    /// Without [`with_runtime`](Self::with_runtime), must be called from within a tokio runtime.
    pub fn build(self, registry: Arc<dyn RegistryGateway>) -> Arc<Bootstrapper> {
        let handle = self.handle.unwrap_or_else(Handle::current);
        let bus = Bus::new(self.cfg.bus_capacity_clamped());

        let subs = {
            let _guard = handle.enter();
            Arc::new(SubscriberSet::new(self.subscribers, bus.clone()))
        };
        let workers = WorkerPool::new(handle, self.cfg.worker_limit());

        let boot = Arc::new(Bootstrapper::new_internal(
            self.cfg, bus, subs, registry, workers,
        ));
        boot.subscriber_listener();
        boot
    }
}
