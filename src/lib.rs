//! # tether
//!
//! **Tether** keeps consumers attached to services published in a live,
//! churning service registry.
//!
//! It provides two building blocks:
//! - [`DynamicServiceProxy`]: a typed handle that binds to the best matching
//!   provider, retries while none is available and transparently rebinds when
//!   its provider goes away;
//! - [`BootstrapExecutor`]: a two-stage module bootstrap that waits, without
//!   blocking any thread, for a module's mandatory dependencies, with a
//!   watchdog bounding the wait.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!    ┌────────────────────────────────────────────────────────────────────┐
//!    │  RegistryGateway (MemoryRegistry or an adapter to a real registry) │
//!    │  lookup / bind / unbind / subscribe  ─► RegistryEvent (any thread) │
//!    └──────┬──────────────────────────────────────────────┬──────────────┘
//!           ▼                                              ▼
//!    ┌──────────────────────┐                  ┌──────────────────────────┐
//!    │ DynamicServiceProxy  │                  │ Bootstrapper             │
//!    │ - RetryPolicy        │                  │ - ModuleTable            │
//!    │ - binding (1 slot)   │                  │ - WorkerPool (stage two) │
//!    │ - BindingListeners   │                  │ - ShutdownCounter        │
//!    └──────┬───────────────┘                  └──────┬───────────────────┘
//!           │                                         ▼
//!           │                               BootstrapExecutor (per module)
//!           │                                  ├─ DependencyTracker
//!           │                                  └─ watchdog
//!           │ ProxyBound / ProxyUnbound               │ ModuleResolving / DependencySatisfied /
//!           │ ServiceUnavailable                      │ ModuleStarted / BootstrapTimedOut / ...
//!           ▼                                         ▼
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                        │
//! │                     (capacity: Config::bus_capacity)                  │
//! └──────────────────────────────────┬────────────────────────────────────┘
//!                                    ▼
//!                         SubscriberSet (per-sub queues)
//!                          ┌─────────┼─────────┐
//!                          ▼         ▼         ▼
//!                      sub1.on   sub2.on   subN.on
//!                      _event()  _event()  _event()
//! ```
//!
//! ### Module lifecycle
//! ```text
//! Initialized ─► ResolvingDependencies ─► DependenciesResolved ─► Started ─► Stopped
//!                        │                                          │
//!                        └──── timeout / error / close ─────────────┴──► Interrupted
//! ```
//!
//! ### Proxy call
//! ```text
//! call(f):
//!   bound? ──yes──► f(&service)
//!     └─no─► retry.execute(lookup + bind)   (nudged by REGISTERED events)
//!              ├─ bound      ─► f(&service)
//!              └─ exhausted  ─► Mandatory: ServiceUnavailable
//!                               Optional:  wait for the next binding
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                               |
//! |-------------------|-------------------------------------------------------------|--------------------------------------------------|
//! | **Queries**       | Type set plus LDAP-style filter, compiled once.             | [`ServiceQuery`]                                 |
//! | **Registry**      | Contract to a service registry, in-memory implementation.   | [`RegistryGateway`], [`MemoryRegistry`]          |
//! | **Proxies**       | Retry, rebind and cardinality over a live registry.         | [`DynamicServiceProxy`], [`RetryPolicy`]         |
//! | **Bootstrap**     | Dependency-gated, two-stage module start with a watchdog.   | [`Module`], [`BootstrapExecutor`], [`Bootstrapper`] |
//! | **Subscriber API**| Hook into progress events (logging, metrics, alerts).       | [`Subscribe`], [`Event`]                         |
//! | **Errors**        | Typed errors for every layer.                               | [`ProxyError`], [`BootstrapError`], [`RuntimeError`] |
//! | **Configuration** | Centralize runtime settings.                                | [`Config`]                                       |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tether::{Config, DynamicServiceProxy, MemoryRegistry, Properties};
//!
//! trait Clock: Send + Sync {
//!     fn now(&self) -> u64;
//! }
//!
//! struct Fixed(u64);
//! impl Clock for Fixed {
//!     fn now(&self) -> u64 { self.0 }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = MemoryRegistry::new();
//!     let clock: Arc<dyn Clock> = Arc::new(Fixed(42));
//!     registry.register(clock, "clock-provider", Properties::new())?;
//!
//!     let proxy = DynamicServiceProxy::<dyn Clock>::builder(Arc::new(registry.clone()))
//!         .with_defaults(&Config::default())
//!         .build()
//!         .await?;
//!     assert_eq!(proxy.call(|c| c.now()).await?, 42);
//!     Ok(())
//! }
//! ```
mod bootstrap;
mod config;
mod core;
mod error;
mod events;
mod policies;
mod proxy;
mod query;
mod registry;
mod subscribers;

// ---- Public re-exports ----

pub use bootstrap::{
    BootstrapExecutor, BootstrapState, CounterGuard, Dependency, DependencyTracker, Module,
    ShutdownCounter,
};
pub use config::Config;
pub use core::{Bootstrapper, BootstrapperBuilder};
pub use error::{BootstrapError, ModuleError, ProxyError, QueryError, RegistryError, RuntimeError};
pub use events::{Bus, Event, EventKind};
pub use policies::{RetryCallback, RetryOutcome, RetryPolicy};
pub use proxy::{BindingListener, Cardinality, DynamicServiceProxy, ProxyBuilder};
pub use query::ServiceQuery;
pub use registry::{
    Descriptor, ListenerId, MemoryRegistry, OBJECT_CLASS, Properties, PropertyValue, Registration,
    RegistryEvent, RegistryEventKind, RegistryGateway, RegistryListener, SERVICE_ID,
    SERVICE_RANKING, ServiceId, ServiceInstance,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose a simple built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
