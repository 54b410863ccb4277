//! Progress events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to progress events emitted by proxies, dependency
//! trackers, bootstrap executors and the bootstrapper.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `DynamicServiceProxy`, `DependencyTracker`, `BootstrapExecutor`,
//!   `Bootstrapper`, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the bootstrapper's fan-out listener (feeds `SubscriberSet`),
//!   or any direct `Bus::subscribe()` receiver.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
