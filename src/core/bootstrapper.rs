//! # Bootstrapper: owns the shared runtime and the set of live modules.
//!
//! The [`Bootstrapper`] owns the event bus, a [`SubscriberSet`], the worker pool
//! that runs stage two, the shutdown counter and a name-keyed table of
//! [`BootstrapExecutor`]s.
//!
//! ## High-level architecture
//! ```text
//! start(module):
//!   BootstrapExecutor::new(module, registry, bus, watchdog_timeout, workers, counter)
//!        └─► table.reserve(name)  (duplicate ─► ModuleExists)
//!        └─► executor.refresh()   (error ─► forgotten, RuntimeError::Bootstrap)
//!
//! Event flow:
//!   Proxy / Tracker / Executor ── publish(Event) ──► Bus ──► fan-out listener ──► SubscriberSet::emit
//!
//! shutdown():
//!   Bus.publish(ShutdownRequested)
//!   table.drain() ─► close newest first ─┐
//!   counter.wait_for_zero(..)  ──────────┴─ within cfg.grace:
//!        ├─ Ok       → Bus.publish(AllStoppedWithin)
//!        └─ exceeded → Bus.publish(GraceExceeded), RuntimeError::GraceExceeded{stuck}
//! ```
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tether::{
//!     BootstrapState, Bootstrapper, Config, Dependency, MemoryRegistry, Module, ModuleError,
//!     Properties, ServiceQuery, OBJECT_CLASS,
//! };
//!
//! struct Billing;
//!
//! #[async_trait]
//! impl Module for Billing {
//!     fn name(&self) -> &str { "billing" }
//!     fn dependencies(&self) -> Vec<Dependency> {
//!         let q = ServiceQuery::new(["Ledger"], None).expect("valid query");
//!         vec![Dependency::mandatory("ledger", q)]
//!     }
//!     async fn complete_initialize(&self) -> Result<(), ModuleError> { Ok(()) }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MemoryRegistry::new();
//!     let boot = Bootstrapper::builder(Config::default()).build(Arc::new(registry.clone()));
//!
//!     let state = boot.start(Arc::new(Billing)).await?;
//!     assert_eq!(state, BootstrapState::ResolvingDependencies);
//!
//!     registry.register(Arc::new(()), "ledger-provider", Properties::new().with(OBJECT_CLASS, "Ledger"))?;
//!     tokio::task::yield_now().await;
//!
//!     boot.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tokio::time::Instant;

use crate::bootstrap::{BootstrapExecutor, BootstrapState, Module, ShutdownCounter, WorkerPool};
use crate::proxy::ProxyBuilder;
use crate::registry::RegistryGateway;
use crate::subscribers::SubscriberSet;
use crate::{
    config::Config,
    error::RuntimeError,
    events::{Bus, Event, EventKind},
};

use super::builder::BootstrapperBuilder;
use super::registry::ModuleTable;

/// Starts, stops and shuts down modules against one service registry.
pub struct Bootstrapper {
    cfg: Config,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    registry: Arc<dyn RegistryGateway>,
    workers: WorkerPool,
    counter: ShutdownCounter,
    modules: ModuleTable,
}

impl Bootstrapper {
    /// Returns a builder for the runtime.
    pub fn builder(cfg: Config) -> BootstrapperBuilder {
        BootstrapperBuilder::new(cfg)
    }

    pub(super) fn new_internal(
        cfg: Config,
        bus: Bus,
        subs: Arc<SubscriberSet>,
        registry: Arc<dyn RegistryGateway>,
        workers: WorkerPool,
    ) -> Self {
        Self {
            cfg,
            bus,
            subs,
            registry,
            workers,
            counter: ShutdownCounter::new(),
            modules: ModuleTable::default(),
        }
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    pub(super) fn subscriber_listener(&self) {
        if self.subs.is_empty() {
            return;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        self.workers.handle().spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Runtime configuration.
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Event bus shared by every executor and proxy created here.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The service registry modules are bootstrapped against.
    pub fn registry(&self) -> &Arc<dyn RegistryGateway> {
        &self.registry
    }

    /// Shutdown counter: modules created but not yet closed.
    pub fn pending(&self) -> usize {
        self.counter.value()
    }

    /// A proxy builder wired to this runtime's registry, retry defaults and bus.
    pub fn proxy<S>(&self) -> ProxyBuilder<S>
    where
        S: ?Sized + Send + Sync + 'static,
    {
        ProxyBuilder::new(Arc::clone(&self.registry))
            .with_defaults(&self.cfg)
            .with_bus(self.bus.clone())
    }

    /// Creates an executor for `module` and runs stage one.
    ///
    /// Returns the state reached: `Started` when every mandatory dependency was
    /// present, `ResolvingDependencies` while waiting.
    ///
    /// # Errors
    /// - [`RuntimeError::ModuleExists`] a module with this name is already managed
    /// - [`RuntimeError::Bootstrap`] stage one failed; the module was closed and forgotten
    pub async fn start(&self, module: Arc<dyn Module>) -> Result<BootstrapState, RuntimeError> {
        let name = module.name().to_string();
        let executor = BootstrapExecutor::new(
            module,
            Arc::clone(&self.registry),
            self.bus.clone(),
            self.cfg.watchdog_timeout(),
            self.workers.clone(),
            &self.counter,
        );
        self.modules.reserve(&name, executor.clone()).await?;

        match executor.refresh().await {
            Ok(state) => Ok(state),
            Err(err) => {
                let _ = self.modules.take(&name).await;
                Err(err.into())
            }
        }
    }

    /// Closes and forgets the module `name`. Returns its final state.
    ///
    /// # Errors
    /// - [`RuntimeError::ModuleNotFound`] no module with this name is managed
    pub async fn stop(&self, name: &str) -> Result<BootstrapState, RuntimeError> {
        let executor = self.modules.take(name).await?;
        executor.close().await;
        Ok(executor.state())
    }

    /// Executor of the module `name`, if managed.
    pub async fn executor(&self, name: &str) -> Option<BootstrapExecutor> {
        self.modules.get(name).await
    }

    /// Sorted names of managed modules with their states.
    pub async fn modules(&self) -> Vec<(String, BootstrapState)> {
        self.modules.list().await
    }

    /// Closes every module (newest first) and waits for them within [`Config::grace`].
    ///
    /// Publishes [`EventKind::AllStoppedWithin`] on success, or
    /// [`EventKind::GraceExceeded`] and returns [`RuntimeError::GraceExceeded`]
    /// with the modules that had not finished closing.
    pub async fn shutdown(&self) -> Result<(), RuntimeError> {
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        let grace = self.cfg.grace;
        let deadline = Instant::now() + grace;

        let executors = self.modules.drain().await;
        tracing::info!(modules = executors.len(), grace_ms = grace.as_millis() as u64, "shutting down");

        let mut closed = 0usize;
        let close_all = async {
            for executor in &executors {
                executor.close().await;
                closed += 1;
            }
        };
        let all_closed = tokio::time::timeout_at(deadline, close_all).await.is_ok();
        let drained = all_closed
            && self
                .counter
                .wait_for_zero(deadline.saturating_duration_since(Instant::now()))
                .await;

        if drained {
            self.bus.publish(Event::new(EventKind::AllStoppedWithin));
            return Ok(());
        }

        let stuck: Vec<String> = executors[closed..]
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        tracing::warn!(stuck = ?stuck, pending = self.counter.value(), "shutdown grace exceeded");
        self.bus.publish(
            Event::new(EventKind::GraceExceeded)
                .with_timeout(grace)
                .with_unsatisfied(stuck.clone()),
        );
        Err(RuntimeError::GraceExceeded { grace, stuck })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModuleError;
    use crate::registry::MemoryRegistry;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Named {
        name: &'static str,
        log: Arc<parking_lot::Mutex<Vec<&'static str>>>,
        hang: bool,
    }

    #[async_trait]
    impl Module for Named {
        fn name(&self) -> &str {
            self.name
        }
        async fn complete_initialize(&self) -> Result<(), ModuleError> {
            Ok(())
        }
        async fn shutdown(&self) -> Result<(), ModuleError> {
            self.log.lock().push(self.name);
            if self.hang {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }

    fn module(
        name: &'static str,
        log: &Arc<parking_lot::Mutex<Vec<&'static str>>>,
    ) -> Arc<dyn Module> {
        Arc::new(Named {
            name,
            log: log.clone(),
            hang: false,
        })
    }

    fn runtime(cfg: Config) -> Arc<Bootstrapper> {
        Bootstrapper::builder(cfg).build(Arc::new(MemoryRegistry::new()))
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_names() {
        let boot = runtime(Config::default());
        let log = Arc::default();

        assert_eq!(
            boot.start(module("a", &log)).await.unwrap(),
            BootstrapState::Started
        );
        let dup = boot.start(module("a", &log)).await.unwrap_err();
        assert_eq!(dup.as_label(), "runtime_module_exists");
        assert_eq!(boot.pending(), 1);

        let missing = boot.stop("nope").await.unwrap_err();
        assert_eq!(missing.as_label(), "runtime_module_not_found");

        assert_eq!(boot.stop("a").await.unwrap(), BootstrapState::Stopped);
        assert!(boot.modules().await.is_empty());
        assert_eq!(boot.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_newest_first() {
        let boot = runtime(Config::default());
        let log = Arc::default();
        for name in ["first", "second", "third"] {
            boot.start(module(name, &log)).await.unwrap();
        }
        assert_eq!(
            boot.modules().await,
            vec![
                ("first".to_string(), BootstrapState::Started),
                ("second".to_string(), BootstrapState::Started),
                ("third".to_string(), BootstrapState::Started),
            ]
        );

        boot.shutdown().await.unwrap();
        assert_eq!(*log.lock(), vec!["third", "second", "first"]);
        assert_eq!(boot.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_grace_exceeded_names_stuck_modules() {
        let cfg = Config {
            grace: Duration::from_millis(200),
            ..Config::default()
        };
        let boot = runtime(cfg);
        let log = Arc::default();
        boot.start(module("ok", &log)).await.unwrap();
        boot.start(Arc::new(Named {
            name: "stuck",
            log: Arc::clone(&log),
            hang: true,
        }))
        .await
        .unwrap();

        match boot.shutdown().await {
            Err(RuntimeError::GraceExceeded { grace, stuck }) => {
                assert_eq!(grace, Duration::from_millis(200));
                assert_eq!(stuck, vec!["stuck", "ok"]);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
